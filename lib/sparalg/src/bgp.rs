use crate::algebra::{TriplePatterns, extend_unique};
use crate::context::EvaluationContext;
use crate::dataset::SparqlDataset;
use crate::error::QueryEvaluationError;
use crate::eval::{extend, filter};
use crate::join::CHECK_INTERVAL;
use crate::multiset::{Bag, Multiset};
use crate::pattern::{BgpPattern, TermPattern, TriplePattern};
use crate::set::Set;
use oxrdf::Term;
use rustc_hash::FxHashSet;
use tracing::trace;

/// Evaluates a basic graph pattern as a left to right fold over its patterns
///
/// The first triple pattern is restricted by the input solutions but its matches are not joined
/// with them, this is left to the enclosing operator.
pub(crate) fn evaluate_bgp<D: SparqlDataset + ?Sized>(
    patterns: &[BgpPattern],
    context: &mut EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    if patterns.is_empty() {
        return Ok(Multiset::Identity);
    }
    let input = context.shared_input();
    let mut accumulated: Option<Multiset> = None;
    for (i, pattern) in patterns.iter().enumerate() {
        context.check_timeout()?;
        let current = match pattern {
            BgpPattern::Triple(pattern) => {
                let matches = match_triple_pattern(
                    pattern,
                    accumulated.as_ref().unwrap_or(&*input),
                    context,
                )?;
                if matches.is_empty() {
                    trace!("The triple pattern {pattern} has no match");
                    return Ok(Multiset::Null);
                }
                context.check_timeout()?;
                match accumulated {
                    Some(accumulated) => accumulated.join(matches, context.deadline())?,
                    None => matches,
                }
            }
            BgpPattern::Filter(expression) => filter(
                accumulated.take().unwrap_or(Multiset::Identity),
                expression,
                context.deadline(),
            )?,
            BgpPattern::Bind(variable, expression) => {
                if i == 0 && input.contains_variable(variable) {
                    return Err(QueryEvaluationError::VariableAlreadyBound(variable.clone()));
                }
                extend(
                    accumulated.take().unwrap_or(Multiset::Identity),
                    variable,
                    expression,
                )?
            }
        };
        if current.is_empty() {
            trace!("The BGP has no solution after {} patterns", i + 1);
            return Ok(Multiset::Null);
        }
        accumulated = Some(current);
    }
    let mut output = accumulated.unwrap_or_default();
    if context.trim_temporary_variables() {
        output.trim();
    }
    Ok(output.null_if_empty())
}

/// Looks up the matches of a triple pattern
///
/// A variable of the pattern is replaced by its values in `restriction` when every solution binds it.
/// A pattern without variables gives the identity or `Null`.
pub(crate) fn match_triple_pattern<D: SparqlDataset + ?Sized>(
    pattern: &TriplePattern,
    restriction: &Multiset,
    context: &EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    let dataset = context.dataset();
    let variables = pattern.variables();
    if variables.is_empty() {
        let (Some(s), Some(p), Some(o)) = (
            pattern.subject.term(),
            pattern.predicate.term(),
            pattern.object.term(),
        ) else {
            return Ok(Multiset::Null);
        };
        return Ok(
            if dataset
                .contains_triple(s, p, o)
                .map_err(QueryEvaluationError::dataset)?
            {
                Multiset::Identity
            } else {
                Multiset::Null
            },
        );
    }
    let restricting = variables
        .iter()
        .filter(|v| restriction.binds_everywhere(v))
        .cloned()
        .collect::<Vec<_>>();
    let mut keys = Vec::new();
    if restricting.is_empty() {
        keys.push(Set::new());
    } else {
        let mut seen = FxHashSet::default();
        for set in restriction.sets() {
            let key = set.project(&restricting);
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }
    }
    let mut output = Bag::with_variables(variables);
    for key in &keys {
        let resolve = |position: &TermPattern| -> Option<Term> {
            match position {
                TermPattern::Term(t) => Some(t.clone()),
                TermPattern::Variable(v) => key.get(v).cloned(),
            }
        };
        let (s, p, o) = (
            resolve(&pattern.subject),
            resolve(&pattern.predicate),
            resolve(&pattern.object),
        );
        for (i, triple) in dataset
            .triples_for_pattern(s.as_ref(), p.as_ref(), o.as_ref())
            .enumerate()
        {
            if i % CHECK_INTERVAL == CHECK_INTERVAL - 1 {
                context.check_timeout()?;
            }
            let triple = triple.map_err(QueryEvaluationError::dataset)?;
            if let Some(set) = pattern.bind(triple) {
                output.add(set);
            }
        }
    }
    Ok(output.into())
}

/// Depth first search of the solutions of the patterns, stopping once `budget` solutions are found
///
/// Each stack frame is the index of the next pattern to match and the partial solution built so far.
fn search<D: SparqlDataset + ?Sized>(
    patterns: &[TriplePattern],
    budget: usize,
    context: &EvaluationContext<'_, D>,
) -> Result<Vec<Set>, QueryEvaluationError> {
    let dataset = context.dataset();
    let mut solutions = Vec::new();
    let mut stack = vec![(0, Set::new())];
    while let Some((index, partial)) = stack.pop() {
        context.check_timeout()?;
        let Some(pattern) = patterns.get(index) else {
            solutions.push(partial);
            if solutions.len() >= budget {
                break;
            }
            continue;
        };
        let (s, p, o) = (
            pattern.subject.resolve(&partial),
            pattern.predicate.resolve(&partial),
            pattern.object.resolve(&partial),
        );
        let mut frames = Vec::new();
        for triple in dataset.triples_for_pattern(s, p, o) {
            let triple = triple.map_err(QueryEvaluationError::dataset)?;
            if let Some(set) = pattern.bind(triple) {
                frames.push((index + 1, partial.join(&set)));
            }
        }
        // The first match is explored first
        stack.extend(frames.into_iter().rev());
    }
    Ok(solutions)
}

fn solutions_to_multiset(patterns: &TriplePatterns, solutions: Vec<Set>) -> Multiset {
    let mut variables = Vec::new();
    for pattern in patterns.patterns() {
        extend_unique(&mut variables, pattern.variables());
    }
    let mut output = Multiset::from_sets(variables, solutions);
    output.trim();
    output.null_if_empty()
}

/// Identity if the patterns have a solution, `Null` otherwise
pub(crate) fn evaluate_ask_bgp<D: SparqlDataset + ?Sized>(
    patterns: &TriplePatterns,
    context: &EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    let found = !search(patterns.patterns(), 1, context)?.is_empty();
    trace!("Ask BGP evaluated to {found}");
    Ok(if found {
        Multiset::Identity
    } else {
        Multiset::Null
    })
}

/// Evaluates the patterns until the number of solutions the query needs is reached
pub(crate) fn evaluate_lazy_bgp<D: SparqlDataset + ?Sized>(
    patterns: &TriplePatterns,
    context: &mut EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    match context.required_results() {
        None => {
            let patterns = patterns
                .patterns()
                .iter()
                .cloned()
                .map(BgpPattern::Triple)
                .collect::<Vec<_>>();
            evaluate_bgp(&patterns, context)
        }
        Some(0) => Ok(Multiset::Null),
        Some(budget) => {
            if patterns.patterns().is_empty() {
                return Ok(Multiset::Identity);
            }
            let solutions = search(patterns.patterns(), budget, context)?;
            trace!("Lazy BGP stopped after {} solutions", solutions.len());
            Ok(solutions_to_multiset(patterns, solutions))
        }
    }
}
