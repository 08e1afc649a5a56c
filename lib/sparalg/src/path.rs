//! [Property paths](https://www.w3.org/TR/sparql11-query/#propertypaths) and their evaluation.

use crate::algebra::Algebra;
use crate::bgp::match_triple_pattern;
use crate::context::EvaluationContext;
use crate::dataset::SparqlDataset;
use crate::error::QueryEvaluationError;
use crate::multiset::{Bag, Multiset, TEMPORARY_VARIABLE_PREFIX};
use crate::pattern::{TermPattern, TriplePattern};
use crate::set::Set;
use oxrdf::{NamedNode, Term, Variable};
use rustc_hash::FxHashSet;
use std::fmt;
use tracing::trace;

/// A [property path expression](https://www.w3.org/TR/sparql11-query/#defn_PropertyPathExpr)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyPath {
    Predicate(NamedNode),
    Inverse(Box<Self>),
    Sequence(Box<Self>, Box<Self>),
    Alternative(Box<Self>, Box<Self>),
    ZeroOrMore(Box<Self>),
    OneOrMore(Box<Self>),
    ZeroOrOne(Box<Self>),
    /// `!(p1 | ^p2)`
    NegatedPropertySet {
        forward: Vec<NamedNode>,
        inverse: Vec<NamedNode>,
    },
}

impl PropertyPath {
    #[inline]
    pub fn inverse(path: Self) -> Self {
        Self::Inverse(Box::new(path))
    }

    #[inline]
    pub fn sequence(left: Self, right: Self) -> Self {
        Self::Sequence(Box::new(left), Box::new(right))
    }

    #[inline]
    pub fn alternative(left: Self, right: Self) -> Self {
        Self::Alternative(Box::new(left), Box::new(right))
    }

    #[inline]
    pub fn zero_or_more(path: Self) -> Self {
        Self::ZeroOrMore(Box::new(path))
    }

    #[inline]
    pub fn one_or_more(path: Self) -> Self {
        Self::OneOrMore(Box::new(path))
    }

    #[inline]
    pub fn zero_or_one(path: Self) -> Self {
        Self::ZeroOrOne(Box::new(path))
    }

    /// Rewrites `subject path object` into the operators evaluating it
    ///
    /// Intermediate nodes of sequences are bound to temporary variables.
    ///
    /// ```
    /// use oxrdf::{NamedNode, Variable};
    /// use sparalg::{Algebra, PropertyPath};
    ///
    /// let p = PropertyPath::Predicate(NamedNode::new("http://example.com/p")?);
    /// let algebra = PropertyPath::sequence(p.clone(), p).to_algebra(
    ///     Variable::new("s")?.into(),
    ///     Variable::new("o")?.into(),
    /// );
    /// assert!(matches!(algebra, Algebra::Join { .. }));
    /// assert_eq!(algebra.variables().len(), 3);
    /// # Result::<_, Box<dyn std::error::Error>>::Ok(())
    /// ```
    pub fn to_algebra(&self, subject: TermPattern, object: TermPattern) -> Algebra {
        PathTranslator::default().translate(subject, self, object)
    }
}

impl From<NamedNode> for PropertyPath {
    #[inline]
    fn from(predicate: NamedNode) -> Self {
        Self::Predicate(predicate)
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Predicate(p) => p.fmt(f),
            Self::Inverse(p) => write!(f, "^({p})"),
            Self::Sequence(a, b) => write!(f, "({a} / {b})"),
            Self::Alternative(a, b) => write!(f, "({a} | {b})"),
            Self::ZeroOrMore(p) => write!(f, "({p})*"),
            Self::OneOrMore(p) => write!(f, "({p})+"),
            Self::ZeroOrOne(p) => write!(f, "({p})?"),
            Self::NegatedPropertySet { forward, inverse } => {
                f.write_str("!(")?;
                let members = forward
                    .iter()
                    .map(|p| p.to_string())
                    .chain(inverse.iter().map(|p| format!("^{p}")));
                for (i, member) in members.enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    f.write_str(&member)?;
                }
                f.write_str(")")
            }
        }
    }
}

#[derive(Default)]
struct PathTranslator {
    next_id: usize,
}

impl PathTranslator {
    fn fresh_variable(&mut self) -> Variable {
        let variable = Variable::new_unchecked(format!(
            "{TEMPORARY_VARIABLE_PREFIX}path{}",
            self.next_id
        ));
        self.next_id += 1;
        variable
    }

    fn translate(&mut self, subject: TermPattern, path: &PropertyPath, object: TermPattern) -> Algebra {
        match path {
            PropertyPath::Predicate(p) => {
                Algebra::Bgp(vec![TriplePattern::new(subject, p.clone(), object).into()])
            }
            PropertyPath::Inverse(p) => self.translate(object, p, subject),
            PropertyPath::Sequence(a, b) => {
                let middle = TermPattern::from(self.fresh_variable());
                let left = self.translate(subject, a, middle.clone());
                let right = self.translate(middle, b, object);
                Algebra::join(left, right)
            }
            PropertyPath::Alternative(a, b) => {
                let left = self.translate(subject.clone(), a, object.clone());
                let right = self.translate(subject, b, object);
                Algebra::union(left, right)
            }
            PropertyPath::ZeroOrMore(p) => Algebra::ZeroOrMorePath {
                subject,
                path: (**p).clone(),
                object,
            },
            PropertyPath::OneOrMore(p) => Algebra::OneOrMorePath {
                subject,
                path: (**p).clone(),
                object,
            },
            PropertyPath::ZeroOrOne(p) => Algebra::ZeroOrOnePath {
                subject,
                path: (**p).clone(),
                object,
            },
            PropertyPath::NegatedPropertySet { forward, inverse } => {
                let forward_set = Algebra::NegatedPropertySet {
                    subject: subject.clone(),
                    object: object.clone(),
                    predicates: forward.clone(),
                    inverse: false,
                };
                if inverse.is_empty() {
                    return forward_set;
                }
                let inverse_set = Algebra::NegatedPropertySet {
                    subject,
                    object,
                    predicates: inverse.clone(),
                    inverse: true,
                };
                if forward.is_empty() {
                    inverse_set
                } else {
                    Algebra::union(forward_set, inverse_set)
                }
            }
        }
    }
}

/// Evaluates the translation of the path, restricted by the input
///
/// Like a BGP, only the endpoint bindings are returned: joining them with the input is left to
/// the enclosing operator.
pub(crate) fn evaluate_property_path<D: SparqlDataset + ?Sized>(
    subject: &TermPattern,
    path: &PropertyPath,
    object: &TermPattern,
    context: &mut EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    let algebra = path.to_algebra(subject.clone(), object.clone());
    let mut result = context.with_flags(false, true, |context| context.evaluate(&algebra))?;
    result.project(&endpoint_variables(subject, object));
    context.check_timeout()?;
    Ok(result)
}

pub(crate) fn evaluate_zero_length_path<D: SparqlDataset + ?Sized>(
    subject: &TermPattern,
    object: &TermPattern,
    context: &EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    if let (TermPattern::Term(s), TermPattern::Term(o)) = (subject, object) {
        return Ok(if s == o {
            Multiset::Identity
        } else {
            Multiset::Null
        });
    }
    let nodes = zero_length_nodes(subject, object, context)?;
    let mut output = Bag::with_variables(endpoint_variables(subject, object));
    for node in nodes {
        if let Some(set) = bind_endpoints(subject, object, &node, &node) {
            output.add(set);
        }
    }
    Ok(Multiset::from(output).null_if_empty())
}

/// The nodes that are both ends of a zero length path given the input solutions
fn zero_length_nodes<D: SparqlDataset + ?Sized>(
    subject: &TermPattern,
    object: &TermPattern,
    context: &EvaluationContext<'_, D>,
) -> Result<Vec<Term>, QueryEvaluationError> {
    let input = context.input();
    match (subject, object) {
        (TermPattern::Term(term), TermPattern::Variable(variable))
        | (TermPattern::Variable(variable), TermPattern::Term(term)) => {
            let compatible = input
                .sets()
                .any(|set| set.get(variable).is_none_or(|value| value == term));
            Ok(if compatible {
                vec![term.clone()]
            } else {
                Vec::new()
            })
        }
        (TermPattern::Variable(s), TermPattern::Variable(o)) => {
            let mut seen = FxHashSet::default();
            let mut nodes = Vec::new();
            let mut all_nodes = false;
            for set in input.sets() {
                match (set.get(s), set.get(o)) {
                    (Some(a), Some(b)) => {
                        if a == b && seen.insert(a.clone()) {
                            nodes.push(a.clone());
                        }
                    }
                    (Some(value), None) | (None, Some(value)) => {
                        if seen.insert(value.clone()) {
                            nodes.push(value.clone());
                        }
                    }
                    (None, None) => all_nodes = true,
                }
            }
            if all_nodes {
                for node in graph_nodes(context)? {
                    if seen.insert(node.clone()) {
                        nodes.push(node);
                    }
                }
            }
            Ok(nodes)
        }
        (TermPattern::Term(_), TermPattern::Term(_)) => Ok(Vec::new()),
    }
}

/// The subjects and objects of the active graph, in order of first appearance
fn graph_nodes<D: SparqlDataset + ?Sized>(
    context: &EvaluationContext<'_, D>,
) -> Result<Vec<Term>, QueryEvaluationError> {
    let mut seen = FxHashSet::default();
    let mut nodes = Vec::new();
    for triple in context.dataset().triples_for_pattern(None, None, None) {
        let triple = triple.map_err(QueryEvaluationError::dataset)?;
        for node in [triple.subject, triple.object] {
            if seen.insert(node.clone()) {
                nodes.push(node);
            }
        }
    }
    Ok(nodes)
}

pub(crate) fn evaluate_one_or_more_path<D: SparqlDataset + ?Sized>(
    subject: &TermPattern,
    path: &PropertyPath,
    object: &TermPattern,
    context: &mut EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    if let (TermPattern::Term(s), TermPattern::Term(o)) = (subject, object) {
        let found = !reachable(s, path, true, Some(o), context)?.is_empty();
        trace!("The path {s} {path}+ {o} evaluated to {found}");
        return Ok(if found {
            Multiset::Identity
        } else {
            Multiset::Null
        });
    }
    let input = context.shared_input();
    let (starts, forward) = if let Some(starts) = bound_values(subject, &input) {
        (starts, true)
    } else if let Some(starts) = bound_values(object, &input) {
        (starts, false)
    } else {
        (path_starts(path, context)?, true)
    };
    let target = if forward { object.term() } else { subject.term() };
    let mut seen = FxHashSet::default();
    let mut output = Bag::with_variables(endpoint_variables(subject, object));
    for start in starts {
        for end in reachable(&start, path, forward, target, context)? {
            let (s, o) = if forward { (&start, &end) } else { (&end, &start) };
            if let Some(set) = bind_endpoints(subject, object, s, o) {
                if seen.insert(set.clone()) {
                    output.add(set);
                }
            }
        }
    }
    Ok(Multiset::from(output).null_if_empty())
}

pub(crate) fn evaluate_zero_or_more_path<D: SparqlDataset + ?Sized>(
    subject: &TermPattern,
    path: &PropertyPath,
    object: &TermPattern,
    context: &mut EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    if let (TermPattern::Term(s), TermPattern::Term(o)) = (subject, object) {
        if s == o {
            return Ok(Multiset::Identity);
        }
        return evaluate_one_or_more_path(subject, path, object, context);
    }
    let zero = evaluate_zero_length_path(subject, object, context)?;
    context.check_timeout()?;
    let more = evaluate_one_or_more_path(subject, path, object, context)?;
    Ok(zero.merge(more))
}

pub(crate) fn evaluate_zero_or_one_path<D: SparqlDataset + ?Sized>(
    subject: &TermPattern,
    path: &PropertyPath,
    object: &TermPattern,
    context: &mut EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    let zero = evaluate_zero_length_path(subject, object, context)?;
    if zero.is_identity() {
        return Ok(zero);
    }
    context.check_timeout()?;
    let algebra = path.to_algebra(subject.clone(), object.clone());
    let mut one = context.with_flags(false, true, |context| context.evaluate(&algebra))?;
    one.project(&endpoint_variables(subject, object));
    Ok(zero.merge(one))
}

pub(crate) fn evaluate_negated_property_set<D: SparqlDataset + ?Sized>(
    subject: &TermPattern,
    object: &TermPattern,
    predicates: &[NamedNode],
    inverse: bool,
    context: &EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    let (subject, object) = if inverse {
        (object, subject)
    } else {
        (subject, object)
    };
    let predicate = Variable::new_unchecked(format!("{TEMPORARY_VARIABLE_PREFIX}nps"));
    let pattern = TriplePattern::new(subject.clone(), predicate.clone(), object.clone());
    let mut matches = match_triple_pattern(&pattern, context.input(), context)?;
    matches.retain(|_, set| {
        !matches!(set.get(&predicate), Some(Term::NamedNode(p)) if predicates.contains(p))
    });
    if subject.term().is_some() && object.term().is_some() {
        return Ok(if matches.is_empty() {
            Multiset::Null
        } else {
            Multiset::Identity
        });
    }
    matches.trim_variable(&predicate);
    matches.deduplicate();
    Ok(matches.null_if_empty())
}

/// The variables among the endpoints, without duplicates
fn endpoint_variables(subject: &TermPattern, object: &TermPattern) -> Vec<Variable> {
    let mut variables = Vec::new();
    for endpoint in [subject, object] {
        if let Some(v) = endpoint.variable() {
            if !variables.contains(v) {
                variables.push(v.clone());
            }
        }
    }
    variables
}

/// The solution binding the endpoints to `start` and `end`
///
/// Returns `None` if a constant endpoint or a variable used at both ends does not match.
fn bind_endpoints(subject: &TermPattern, object: &TermPattern, start: &Term, end: &Term) -> Option<Set> {
    let mut set = Set::new();
    for (endpoint, value) in [(subject, start), (object, end)] {
        match endpoint {
            TermPattern::Term(term) => {
                if term != value {
                    return None;
                }
            }
            TermPattern::Variable(variable) => match set.get(variable) {
                Some(existing) => {
                    if existing != value {
                        return None;
                    }
                }
                None => set.add(variable.clone(), Some(value.clone())).ok()?,
            },
        }
    }
    Some(set)
}

/// The nodes an endpoint stands for: the constant itself or the distinct input values
///
/// `None` if the endpoint is a variable some input solution leaves unbound.
fn bound_values(endpoint: &TermPattern, input: &Multiset) -> Option<Vec<Term>> {
    match endpoint {
        TermPattern::Term(term) => Some(vec![term.clone()]),
        TermPattern::Variable(variable) => {
            if !input.binds_everywhere(variable) {
                return None;
            }
            let mut seen = FxHashSet::default();
            Some(
                input
                    .sets()
                    .filter_map(|set| set.get(variable))
                    .filter(|value| seen.insert(*value))
                    .cloned()
                    .collect(),
            )
        }
    }
}

/// The subjects of the first step of the path, used when no endpoint is known
fn path_starts<D: SparqlDataset + ?Sized>(
    path: &PropertyPath,
    context: &mut EvaluationContext<'_, D>,
) -> Result<Vec<Term>, QueryEvaluationError> {
    let mut seen = FxHashSet::default();
    let mut starts = Vec::new();
    if let Some((predicate, forward)) = single_predicate(path) {
        let predicate = Term::from(predicate.clone());
        for triple in context
            .dataset()
            .triples_for_pattern(None, Some(&predicate), None)
        {
            let triple = triple.map_err(QueryEvaluationError::dataset)?;
            let start = if forward {
                triple.subject
            } else {
                triple.object
            };
            if seen.insert(start.clone()) {
                starts.push(start);
            }
        }
        return Ok(starts);
    }
    let mut translator = PathTranslator::default();
    let start = translator.fresh_variable();
    let end = translator.fresh_variable();
    let algebra = translator.translate(start.clone().into(), path, end.into());
    let solutions = context.with_flags(false, true, |context| {
        context.evaluate_with_input(&algebra, Multiset::Identity)
    })?;
    for value in solutions.sets().filter_map(|set| set.get(&start)) {
        if seen.insert(value.clone()) {
            starts.push(value.clone());
        }
    }
    Ok(starts)
}

/// `Some((p, true))` for `p` and `Some((p, false))` for `^p`
fn single_predicate(path: &PropertyPath) -> Option<(&NamedNode, bool)> {
    match path {
        PropertyPath::Predicate(p) => Some((p, true)),
        PropertyPath::Inverse(inner) => match &**inner {
            PropertyPath::Predicate(p) => Some((p, false)),
            _ => None,
        },
        _ => None,
    }
}

/// The nodes reachable from `start` in one or more steps of the path
///
/// The traversal is breadth first, one step of the frontier per iteration, and stops as soon as
/// `target` is reached.
fn reachable<D: SparqlDataset + ?Sized>(
    start: &Term,
    path: &PropertyPath,
    forward: bool,
    target: Option<&Term>,
    context: &mut EvaluationContext<'_, D>,
) -> Result<Vec<Term>, QueryEvaluationError> {
    let max_depth = context.options().max_path_depth;
    let mut visited = FxHashSet::default();
    let mut reached = Vec::new();
    let mut frontier = vec![start.clone()];
    let mut depth = 0;
    while !frontier.is_empty() {
        context.check_timeout()?;
        depth += 1;
        if let Some(max_depth) = max_depth {
            if depth > max_depth {
                return Err(QueryEvaluationError::PathDepthExceeded(max_depth));
            }
        }
        let mut next = Vec::new();
        for node in &frontier {
            for neighbour in step(node, path, forward, context)? {
                if !visited.insert(neighbour.clone()) {
                    continue;
                }
                if target == Some(&neighbour) {
                    reached.push(neighbour);
                    return Ok(reached);
                }
                reached.push(neighbour.clone());
                next.push(neighbour);
            }
        }
        frontier = next;
    }
    if target.is_some() {
        // The target was not reached
        reached.clear();
    }
    Ok(reached)
}

/// The nodes one step of the path away from `node`
fn step<D: SparqlDataset + ?Sized>(
    node: &Term,
    path: &PropertyPath,
    forward: bool,
    context: &mut EvaluationContext<'_, D>,
) -> Result<Vec<Term>, QueryEvaluationError> {
    if !context.rigorous_evaluation() {
        if let Some((predicate, predicate_forward)) = single_predicate(path) {
            let predicate = Term::from(predicate.clone());
            let dataset = context.dataset();
            let triples = if forward == predicate_forward {
                dataset.triples_for_pattern(Some(node), Some(&predicate), None)
            } else {
                dataset.triples_for_pattern(None, Some(&predicate), Some(node))
            };
            return triples
                .map(|triple| {
                    let triple = triple.map_err(QueryEvaluationError::dataset)?;
                    Ok(if forward == predicate_forward {
                        triple.object
                    } else {
                        triple.subject
                    })
                })
                .collect();
        }
    }
    let mut translator = PathTranslator::default();
    let other_end = translator.fresh_variable();
    let algebra = if forward {
        translator.translate(node.clone().into(), path, other_end.clone().into())
    } else {
        translator.translate(other_end.clone().into(), path, node.clone().into())
    };
    let solutions = context.with_flags(false, true, |context| {
        context.evaluate_with_input(&algebra, Multiset::Identity)
    })?;
    Ok(solutions
        .sets()
        .filter_map(|set| set.get(&other_end))
        .cloned()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Deadline, QueryMetadata};
    use crate::dataset::InMemoryDataset;
    use crate::options::EvaluationOptions;
    use crate::service::ServiceHandlerRegistry;
    use oxrdf::{Dataset, GraphName, Quad};

    fn ex(name: &str) -> NamedNode {
        NamedNode::new_unchecked(format!("http://example.com/{name}"))
    }

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    /// a -p-> b -p-> c -p-> d and a -q-> d
    fn chain() -> InMemoryDataset {
        let mut dataset = Dataset::new();
        for (s, p, o) in [("a", "p", "b"), ("b", "p", "c"), ("c", "p", "d"), ("a", "q", "d")] {
            dataset.insert(&Quad::new(ex(s), ex(p), ex(o), GraphName::DefaultGraph));
        }
        InMemoryDataset::new(dataset)
    }

    fn values(multiset: &Multiset, variable: &Variable) -> Vec<String> {
        let mut values = multiset
            .sets()
            .filter_map(|s| s.get(variable))
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        values.sort();
        values
    }

    fn evaluate(dataset: &InMemoryDataset, options: &EvaluationOptions, algebra: &Algebra) -> Result<Multiset, QueryEvaluationError> {
        let metadata = QueryMetadata::default();
        let services = ServiceHandlerRegistry::default();
        let mut context = EvaluationContext::new(dataset, options, &metadata, &services, Deadline::unbounded());
        context.evaluate(algebra)
    }

    #[test]
    fn one_or_more_from_a_constant() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::OneOrMorePath {
            subject: ex("a").into(),
            path: ex("p").into(),
            object: var("o").into(),
        };
        let result = evaluate(&chain(), &EvaluationOptions::default(), &algebra)?;
        assert_eq!(
            values(&result, &var("o")),
            [
                "<http://example.com/b>",
                "<http://example.com/c>",
                "<http://example.com/d>"
            ]
        );
        Ok(())
    }

    #[test]
    fn one_or_more_backward_to_a_constant() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::OneOrMorePath {
            subject: var("s").into(),
            path: ex("p").into(),
            object: ex("c").into(),
        };
        let result = evaluate(&chain(), &EvaluationOptions::default(), &algebra)?;
        assert_eq!(
            values(&result, &var("s")),
            ["<http://example.com/a>", "<http://example.com/b>"]
        );
        Ok(())
    }

    #[test]
    fn one_or_more_between_constants() -> Result<(), QueryEvaluationError> {
        let reachable = Algebra::OneOrMorePath {
            subject: ex("a").into(),
            path: ex("p").into(),
            object: ex("d").into(),
        };
        assert!(evaluate(&chain(), &EvaluationOptions::default(), &reachable)?.is_identity());
        let unreachable = Algebra::OneOrMorePath {
            subject: ex("d").into(),
            path: ex("p").into(),
            object: ex("a").into(),
        };
        assert!(evaluate(&chain(), &EvaluationOptions::default(), &unreachable)?.is_null());
        Ok(())
    }

    #[test]
    fn one_or_more_without_bound_endpoint() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::OneOrMorePath {
            subject: var("s").into(),
            path: ex("p").into(),
            object: var("o").into(),
        };
        let result = evaluate(&chain(), &EvaluationOptions::default(), &algebra)?;
        // a->b a->c a->d b->c b->d c->d
        assert_eq!(result.len(), 6);
        let rigorous = evaluate(
            &chain(),
            &EvaluationOptions::default().with_rigorous_evaluation(),
            &algebra,
        )?;
        assert_eq!(rigorous.len(), 6);
        Ok(())
    }

    #[test]
    fn depth_limit() {
        let algebra = Algebra::OneOrMorePath {
            subject: ex("a").into(),
            path: ex("p").into(),
            object: var("o").into(),
        };
        let options = EvaluationOptions {
            max_path_depth: Some(2),
            ..EvaluationOptions::default()
        };
        assert!(matches!(
            evaluate(&chain(), &options, &algebra),
            Err(QueryEvaluationError::PathDepthExceeded(2))
        ));
    }

    #[test]
    fn zero_or_more_includes_the_start() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::ZeroOrMorePath {
            subject: ex("b").into(),
            path: ex("p").into(),
            object: var("o").into(),
        };
        let result = evaluate(&chain(), &EvaluationOptions::default(), &algebra)?;
        assert_eq!(
            values(&result, &var("o")),
            [
                "<http://example.com/b>",
                "<http://example.com/c>",
                "<http://example.com/d>"
            ]
        );
        let same = Algebra::ZeroOrMorePath {
            subject: ex("z").into(),
            path: ex("p").into(),
            object: ex("z").into(),
        };
        assert!(evaluate(&chain(), &EvaluationOptions::default(), &same)?.is_identity());
        Ok(())
    }

    #[test]
    fn zero_length_between_variables_enumerates_nodes() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::ZeroLengthPath {
            subject: var("s").into(),
            path: ex("p").into(),
            object: var("o").into(),
        };
        let result = evaluate(&chain(), &EvaluationOptions::default(), &algebra)?;
        assert_eq!(result.len(), 4);
        assert!(result.sets().all(|s| s.get(&var("s")) == s.get(&var("o"))));
        Ok(())
    }

    #[test]
    fn zero_or_one() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::ZeroOrOnePath {
            subject: ex("a").into(),
            path: ex("p").into(),
            object: var("o").into(),
        };
        let result = evaluate(&chain(), &EvaluationOptions::default(), &algebra)?;
        assert_eq!(
            values(&result, &var("o")),
            ["<http://example.com/a>", "<http://example.com/b>"]
        );
        Ok(())
    }

    #[test]
    fn negated_property_set() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::NegatedPropertySet {
            subject: ex("a").into(),
            object: var("o").into(),
            predicates: vec![ex("p")],
            inverse: false,
        };
        let result = evaluate(&chain(), &EvaluationOptions::default(), &algebra)?;
        assert_eq!(values(&result, &var("o")), ["<http://example.com/d>"]);
        let inverse = Algebra::NegatedPropertySet {
            subject: ex("d").into(),
            object: ex("a").into(),
            predicates: vec![ex("p")],
            inverse: true,
        };
        assert!(evaluate(&chain(), &EvaluationOptions::default(), &inverse)?.is_identity());
        Ok(())
    }

    #[test]
    fn sequence_paths_hide_intermediate_nodes() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::PropertyPath {
            subject: ex("a").into(),
            path: PropertyPath::sequence(ex("p").into(), ex("p").into()),
            object: var("o").into(),
        };
        let result = evaluate(&chain(), &EvaluationOptions::default(), &algebra)?;
        assert_eq!(values(&result, &var("o")), ["<http://example.com/c>"]);
        assert!(result.variables().iter().all(|v| v == &var("o")));
        Ok(())
    }

    #[test]
    fn alternative_and_inverse_paths() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::PropertyPath {
            subject: ex("d").into(),
            path: PropertyPath::inverse(PropertyPath::alternative(ex("p").into(), ex("q").into())),
            object: var("s").into(),
        };
        let result = evaluate(&chain(), &EvaluationOptions::default(), &algebra)?;
        assert_eq!(
            values(&result, &var("s")),
            ["<http://example.com/a>", "<http://example.com/c>"]
        );
        Ok(())
    }

    #[test]
    fn display() {
        let path = PropertyPath::sequence(
            PropertyPath::one_or_more(ex("p").into()),
            PropertyPath::NegatedPropertySet {
                forward: vec![ex("q")],
                inverse: vec![ex("r")],
            },
        );
        assert_eq!(
            path.to_string(),
            "((<http://example.com/p>)+ / !(<http://example.com/q> | ^<http://example.com/r>))"
        );
    }
}
