use crate::algebra::{Algebra, DisjointPair, OrderComparator};
use crate::aggregate::Aggregate;
use crate::bgp::{evaluate_ask_bgp, evaluate_bgp, evaluate_lazy_bgp};
use crate::context::{Deadline, EvaluationContext};
use crate::dataset::{ActiveGraphGuard, SparqlDataset};
use crate::error::QueryEvaluationError;
use crate::expression::{Expression, cmp_terms};
use crate::function::evaluate_property_function;
use crate::group::{GroupKey, GroupMultiset};
use crate::join::CHECK_INTERVAL;
use crate::multiset::{Bag, Multiset, SetId};
use crate::path::{
    evaluate_negated_property_set, evaluate_one_or_more_path, evaluate_property_path,
    evaluate_zero_length_path, evaluate_zero_or_more_path, evaluate_zero_or_one_path,
};
use crate::pattern::TermPattern;
use crate::set::Set;
use oxrdf::{GraphName, NamedNode, Term, Variable};
use rustc_hash::FxHashSet;
use std::cmp::Ordering;
use std::iter::once;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Evaluates an operator against the input of the context
pub(crate) fn evaluate<D: SparqlDataset + ?Sized>(
    algebra: &Algebra,
    context: &mut EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    context.check_timeout()?;
    match algebra {
        Algebra::Bgp(patterns) => evaluate_bgp(patterns, context),
        Algebra::AskBgp(patterns) => evaluate_ask_bgp(patterns, context),
        Algebra::LazyBgp(patterns) => evaluate_lazy_bgp(patterns, context),
        Algebra::Join { left, right } => evaluate_join(left, right, context),
        Algebra::LeftJoin {
            left,
            right,
            filter,
        } => evaluate_left_join(left, right, filter.as_ref(), context),
        Algebra::Union { left, right } => evaluate_union(left, right, context),
        Algebra::AskUnion { left, right } => {
            let lhs = context.evaluate(left)?;
            context.check_timeout()?;
            if !lhs.is_empty() {
                return Ok(lhs);
            }
            let rhs = context.evaluate(right)?;
            Ok(lhs.union(rhs))
        }
        Algebra::LazyUnion { left, right } => evaluate_lazy_union(left, right, context),
        Algebra::Minus { left, right } => {
            let lhs = context.evaluate(left)?;
            context.check_timeout()?;
            if lhs.is_empty() {
                return Ok(Multiset::Null);
            }
            let right_variables = right.variables();
            if !left.variables().iter().any(|v| right_variables.contains(v)) {
                trace!("MINUS with disjoint sides, the right side is not evaluated");
                return Ok(lhs);
            }
            let rhs = context.evaluate(right)?;
            context.check_timeout()?;
            lhs.minus_join(&rhs, context.deadline())
        }
        Algebra::ExistsJoin {
            left,
            right,
            must_exist,
        } => {
            let lhs = context.evaluate(left)?;
            context.check_timeout()?;
            if lhs.is_empty() {
                return Ok(Multiset::Null);
            }
            let lhs = Arc::new(lhs);
            let rhs = context.evaluate_with_input(right, Arc::clone(&lhs))?;
            context.check_timeout()?;
            Arc::unwrap_or_clone(lhs).exists_join(&rhs, *must_exist, context.deadline())
        }
        Algebra::ParallelJoin(pair) => evaluate_parallel(pair, true, context),
        Algebra::ParallelUnion(pair) => evaluate_parallel(pair, false, context),
        Algebra::Filter { inner, expression } | Algebra::Having { inner, expression } => {
            let inner = context.evaluate(inner)?;
            context.check_timeout()?;
            filter(inner, expression, context.deadline())
        }
        Algebra::Extend {
            inner,
            variable,
            expression,
        } => {
            let inner = context.evaluate(inner)?;
            context.check_timeout()?;
            extend(inner, variable, expression)
        }
        Algebra::GroupBy {
            inner,
            keys,
            aggregates,
        } => evaluate_group_by(inner, keys, aggregates, context),
        Algebra::OrderBy { inner, comparators } => {
            let mut result = context.evaluate(inner)?;
            context.check_timeout()?;
            result.sort_by(|a, b| compare_sets(a, b, comparators));
            context.check_timeout()?;
            Ok(result)
        }
        Algebra::Distinct {
            inner,
            trim_temporary_variables,
        } => {
            let mut result = context.evaluate(inner)?;
            if result.is_identity() || result.is_null() {
                return Ok(result);
            }
            if *trim_temporary_variables {
                result.trim();
            }
            result.deduplicate();
            Ok(result)
        }
        Algebra::Reduced { inner } => {
            let mut result = context.evaluate(inner)?;
            if context.metadata().limit.is_some() {
                result.deduplicate();
            }
            Ok(result)
        }
        Algebra::Slice {
            inner,
            offset,
            limit,
        } => evaluate_slice(inner, *offset, *limit, context),
        Algebra::Select { inner, projection } => {
            let result = context.evaluate(inner)?;
            Ok(project(result, inner, projection.as_deref()))
        }
        Algebra::Ask { inner } => {
            let result = context.with_required_results(Some(1), |context| context.evaluate(inner))?;
            Ok(if result.is_empty() {
                Multiset::Null
            } else {
                Multiset::Identity
            })
        }
        Algebra::Graph { inner, name } => match name {
            TermPattern::Term(term) => evaluate_constant_graph(inner, term, context),
            TermPattern::Variable(variable) => evaluate_variable_graph(inner, variable, context),
        },
        Algebra::Service {
            inner,
            name,
            silent,
        } => evaluate_service(inner, name, *silent, context),
        Algebra::Bindings { variables, rows } => {
            Ok(Multiset::from_sets(variables.iter().cloned(), rows.iter().cloned()))
        }
        Algebra::Null { .. } => Ok(Multiset::Null),
        Algebra::SubQuery(inner) => {
            if context.input().is_empty() {
                return Ok(Multiset::Null);
            }
            let mut fresh = context.fresh();
            let result = fresh.with_required_results(None, |context| context.evaluate(inner))?;
            Ok(match result {
                Multiset::Group(group) => group.into_groups().into(),
                result => result,
            })
        }
        Algebra::SelectDistinctGraphs { variable } => {
            let mut output = Bag::with_variables([variable.clone()]);
            for graph in context.dataset().named_graphs() {
                let graph = graph.map_err(QueryEvaluationError::dataset)?;
                if let Some(term) = graph_term(graph) {
                    output.add(once((variable.clone(), Some(term))).collect());
                }
            }
            Ok(Multiset::from(output).null_if_empty())
        }
        Algebra::AskAnyTriples => {
            let found = context
                .dataset()
                .triples_for_pattern(None, None, None)
                .next()
                .transpose()
                .map_err(QueryEvaluationError::dataset)?
                .is_some();
            Ok(if found {
                Multiset::Identity
            } else {
                Multiset::Null
            })
        }
        Algebra::ZeroLengthPath {
            subject, object, ..
        } => evaluate_zero_length_path(subject, object, context),
        Algebra::OneOrMorePath {
            subject,
            path,
            object,
        } => evaluate_one_or_more_path(subject, path, object, context),
        Algebra::ZeroOrMorePath {
            subject,
            path,
            object,
        } => evaluate_zero_or_more_path(subject, path, object, context),
        Algebra::ZeroOrOnePath {
            subject,
            path,
            object,
        } => evaluate_zero_or_one_path(subject, path, object, context),
        Algebra::NegatedPropertySet {
            subject,
            object,
            predicates,
            inverse,
        } => evaluate_negated_property_set(subject, object, predicates, *inverse, context),
        Algebra::PropertyPath {
            subject,
            path,
            object,
        } => evaluate_property_path(subject, path, object, context),
        Algebra::PropertyFunction { inner, function } => {
            let inner = context.evaluate(inner)?;
            context.check_timeout()?;
            evaluate_property_function(function.as_ref(), inner, context)
        }
    }
}

fn evaluate_join<D: SparqlDataset + ?Sized>(
    left: &Algebra,
    right: &Algebra,
    context: &mut EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    let lhs = context.evaluate(left)?;
    context.check_timeout()?;
    if lhs.is_empty() {
        return Ok(Multiset::Null);
    }
    let lhs = Arc::new(lhs);
    let rhs = context.evaluate_with_input(right, Arc::clone(&lhs))?;
    context.check_timeout()?;
    Arc::unwrap_or_clone(lhs).join(rhs, context.deadline())
}

fn evaluate_left_join<D: SparqlDataset + ?Sized>(
    left: &Algebra,
    right: &Algebra,
    filter: Option<&Expression>,
    context: &mut EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    let lhs_floating = left.floating_variables();
    // A floating variable of the left side may not be restricted by the input
    let can_linearize_lhs = !lhs_floating
        .iter()
        .any(|v| context.input().contains_variable(v));
    let lhs = if can_linearize_lhs {
        context.evaluate(left)?
    } else {
        context.evaluate_with_input(left, Multiset::Identity)?
    };
    context.check_timeout()?;
    if lhs.is_empty() {
        return Ok(Multiset::Null);
    }
    let lhs_variables = left.variables();
    let right_variables = right.variables();
    let can_flow_results_to_rhs = !right
        .floating_variables()
        .iter()
        .any(|v| lhs_variables.contains(v))
        && !right
            .fixed_variables()
            .iter()
            .any(|v| lhs_floating.contains(v));
    let is_cross_product = !lhs_variables.iter().any(|v| right_variables.contains(v));
    let lhs = Arc::new(lhs);
    let rhs_input = if can_flow_results_to_rhs && !is_cross_product {
        Arc::clone(&lhs)
    } else {
        Arc::new(Multiset::Identity)
    };
    let rhs = context.evaluate_with_input(right, rhs_input)?;
    context.check_timeout()?;
    Arc::unwrap_or_clone(lhs).left_join(rhs, filter, context.deadline())
}

fn evaluate_union<D: SparqlDataset + ?Sized>(
    left: &Algebra,
    right: &Algebra,
    context: &mut EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    let input = context.shared_input();
    // An extension has to see all the solutions of its own side
    let side_input = |side: &Algebra| {
        if matches!(side, Algebra::Extend { .. }) {
            Arc::new(Multiset::Identity)
        } else {
            Arc::clone(&input)
        }
    };
    let lhs = context.evaluate_with_input(left, side_input(left))?;
    context.check_timeout()?;
    let rhs = context.evaluate_with_input(right, side_input(right))?;
    context.check_timeout()?;
    Ok(lhs.union(rhs))
}

fn evaluate_lazy_union<D: SparqlDataset + ?Sized>(
    left: &Algebra,
    right: &Algebra,
    context: &mut EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    let required = context.required_results();
    let lhs = context.evaluate(left)?;
    context.check_timeout()?;
    if let Some(required) = required {
        if lhs.len() >= required {
            trace!("Lazy union satisfied by its left side");
            return Ok(lhs);
        }
    }
    let remaining = required.map(|r| r - lhs.len());
    let rhs = context.with_required_results(remaining, |context| context.evaluate(right))?;
    context.check_timeout()?;
    Ok(lhs.union(rhs))
}

fn evaluate_parallel<D: SparqlDataset + ?Sized>(
    pair: &DisjointPair,
    is_join: bool,
    context: &mut EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    if !context.options().use_parallel_evaluation {
        trace!("Parallel evaluation is disabled, falling back to sequential evaluation");
        return if is_join {
            evaluate_join(pair.left(), pair.right(), context)
        } else {
            evaluate_union(pair.left(), pair.right(), context)
        };
    }
    let active_graph = context.dataset().active_graph();
    let mut left_context = context.fork();
    let mut right_context = context.fork();
    let (lhs, rhs) = rayon::join(
        || evaluate_forked(pair.left(), &mut left_context, active_graph.clone()),
        || evaluate_forked(pair.right(), &mut right_context, active_graph.clone()),
    );
    let (lhs, rhs) = (lhs?, rhs?);
    context.check_timeout()?;
    if is_join {
        if lhs.is_empty() {
            return Ok(Multiset::Null);
        }
        lhs.parallel_product(rhs, context.deadline())
    } else {
        Ok(lhs.union(rhs))
    }
}

/// Evaluates a subtree on a rayon worker, under the active graph of the parent thread
fn evaluate_forked<D: SparqlDataset + ?Sized>(
    algebra: &Algebra,
    context: &mut EvaluationContext<'_, D>,
    active_graph: Vec<GraphName>,
) -> Result<Multiset, QueryEvaluationError> {
    let _guard = ActiveGraphGuard::new(context.dataset(), active_graph);
    context.evaluate(algebra)
}

/// Keeps the solutions for which the expression is true
///
/// An expression that fails on a solution drops it.
pub(crate) fn filter(
    multiset: Multiset,
    expression: &Expression,
    deadline: &Deadline,
) -> Result<Multiset, QueryEvaluationError> {
    match multiset {
        Multiset::Null => Ok(Multiset::Null),
        Multiset::Identity => {
            if !expression.variables().is_empty() {
                return Ok(Multiset::Null);
            }
            Ok(
                if expression
                    .effective_boolean_value(&Set::new())
                    .unwrap_or(false)
                {
                    Multiset::Identity
                } else {
                    Multiset::Null
                },
            )
        }
        mut multiset => {
            let mut rejected = FxHashSet::<SetId>::default();
            for (i, (id, set)) in multiset.iter().enumerate() {
                if i % CHECK_INTERVAL == CHECK_INTERVAL - 1 {
                    deadline.check()?;
                }
                if !expression.effective_boolean_value(set).unwrap_or(false) {
                    rejected.insert(id);
                }
            }
            if !rejected.is_empty() {
                multiset.retain(|id, _| !rejected.contains(&id));
            }
            Ok(match multiset {
                Multiset::Bag(_) => multiset.null_if_empty(),
                multiset => multiset,
            })
        }
    }
}

/// Binds the variable to the value of the expression in every solution
///
/// An expression that fails on a solution leaves the variable unbound.
pub(crate) fn extend(
    multiset: Multiset,
    variable: &Variable,
    expression: &Expression,
) -> Result<Multiset, QueryEvaluationError> {
    match multiset {
        Multiset::Null => Ok(Multiset::Null),
        Multiset::Identity => {
            let value = expression.evaluate(&Set::new()).ok();
            Ok(Multiset::from_sets(
                [variable.clone()],
                [once((variable.clone(), value)).collect::<Set>()],
            ))
        }
        multiset => {
            if multiset.contains_variable(variable) {
                return Err(QueryEvaluationError::VariableAlreadyBound(
                    variable.clone(),
                ));
            }
            let mut output = Bag::with_variables(
                multiset
                    .variables()
                    .iter()
                    .cloned()
                    .chain(once(variable.clone())),
            );
            for set in multiset.sets() {
                let value = expression.evaluate(set).ok();
                let mut set = set.clone();
                set.add(variable.clone(), value)?;
                output.add(set);
            }
            Ok(output.into())
        }
    }
}

fn evaluate_group_by<D: SparqlDataset + ?Sized>(
    inner: &Algebra,
    keys: &[GroupKey],
    aggregates: &[(Variable, Aggregate)],
    context: &mut EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    let contents = match context.evaluate(inner)? {
        Multiset::Identity | Multiset::Null => Multiset::empty(),
        contents => contents,
    };
    context.check_timeout()?;
    let input_was_empty = contents.is_empty();
    let mut grouped = if keys.is_empty() {
        GroupMultiset::new(contents)
    } else {
        GroupMultiset::group_by(contents, keys)?
    };
    if grouped.is_empty() && !aggregates.is_empty() && !(input_was_empty && !keys.is_empty()) {
        grouped.add_implicit_group();
    }
    for (variable, _) in aggregates {
        grouped.groups_mut().add_variable(variable.clone());
    }
    let ids = grouped.groups().ids().collect::<Vec<_>>();
    for id in ids {
        context.check_timeout()?;
        let members = grouped
            .group(id)
            .map(|group| group.members().to_vec())
            .unwrap_or_default();
        let values = aggregates
            .iter()
            .map(|(variable, aggregate)| {
                (
                    variable.clone(),
                    aggregate.evaluate(grouped.contents(), &members).ok(),
                )
            })
            .collect::<Vec<_>>();
        if let Some(representative) = grouped.groups_mut().get_mut(id) {
            for (variable, value) in values {
                representative.add(variable, value)?;
            }
        }
    }
    Ok(Multiset::Group(grouped))
}

fn compare_sets(a: &Set, b: &Set, comparators: &[OrderComparator]) -> Ordering {
    for comparator in comparators {
        let ordering = cmp_terms(
            comparator.expression.evaluate(a).ok().as_ref(),
            comparator.expression.evaluate(b).ok().as_ref(),
        );
        let ordering = if comparator.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn evaluate_slice<D: SparqlDataset + ?Sized>(
    inner: &Algebra,
    offset: usize,
    limit: Option<usize>,
    context: &mut EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    if limit == Some(0) {
        return Ok(Bag::with_variables(inner.variables()).into());
    }
    let result = context.evaluate(inner)?;
    if limit.is_none() && offset == 0 {
        return Ok(result);
    }
    let mut bag = result.into_bag();
    bag.slice(offset, limit);
    Ok(bag.into())
}

pub(crate) fn project(result: Multiset, inner: &Algebra, projection: Option<&[Variable]>) -> Multiset {
    let Some(projection) = projection else {
        return match result {
            Multiset::Null => Bag::with_variables(inner.variables()).into(),
            result => result,
        };
    };
    let mut result = match result {
        Multiset::Null => Multiset::empty(),
        Multiset::Identity => Multiset::Identity.into_bag().into(),
        result => result,
    };
    result.project(projection);
    result
}

fn evaluate_constant_graph<D: SparqlDataset + ?Sized>(
    inner: &Algebra,
    name: &Term,
    context: &mut EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    let Some(graph) = term_graph(name) else {
        return Ok(Multiset::Null);
    };
    let metadata = context.metadata();
    if metadata.has_dataset_description() && !is_named_graph_of(&graph, &metadata.named_graphs) {
        trace!("The graph {graph} is not in the query named graphs");
        return Ok(Multiset::Null);
    }
    let dataset = context.dataset();
    if !dataset
        .has_graph(&graph)
        .map_err(QueryEvaluationError::dataset)?
    {
        return Ok(Multiset::Null);
    }
    let _guard = ActiveGraphGuard::new(dataset, vec![graph]);
    context.evaluate(inner)
}

fn evaluate_variable_graph<D: SparqlDataset + ?Sized>(
    inner: &Algebra,
    variable: &Variable,
    context: &mut EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    let dataset = context.dataset();
    let metadata = context.metadata();
    let mut candidates = Vec::new();
    if context.input().binds_everywhere(variable) {
        candidates.extend(
            context
                .input()
                .sets()
                .filter_map(|set| term_graph(set.get(variable)?)),
        );
    } else if !metadata.named_graphs.is_empty() {
        candidates.extend(metadata.named_graphs.iter().cloned().map(GraphName::from));
    } else if !metadata.default_graphs.is_empty() {
        return Ok(Multiset::Null);
    } else {
        for graph in dataset.named_graphs() {
            candidates.push(graph.map_err(QueryEvaluationError::dataset)?);
        }
    }
    let mut seen = FxHashSet::default();
    candidates.retain(|graph| seen.insert(graph.clone()));

    let mut output = Multiset::Null;
    for graph in candidates {
        context.check_timeout()?;
        if graph.is_default_graph()
            || !dataset
                .has_graph(&graph)
                .map_err(QueryEvaluationError::dataset)?
        {
            continue;
        }
        let result = {
            let _guard = ActiveGraphGuard::new(dataset, vec![graph.clone()]);
            context.evaluate(inner)?
        };
        let Some(name) = graph_term(graph) else {
            continue;
        };
        output = output.union(bind_graph_variable(result, variable, &name)?);
    }
    Ok(output.null_if_empty())
}

/// Binds the graph variable in the solutions, dropping those that bind it to another graph
fn bind_graph_variable(
    result: Multiset,
    variable: &Variable,
    name: &Term,
) -> Result<Multiset, QueryEvaluationError> {
    if result.is_empty() {
        return Ok(Multiset::Null);
    }
    let mut output = Bag::with_variables(
        result
            .variables()
            .iter()
            .cloned()
            .chain(once(variable.clone())),
    );
    for set in result.sets() {
        match set.get(variable) {
            Some(value) if value != name => (),
            Some(_) => {
                output.add(set.clone());
            }
            None => {
                let mut set = set.clone();
                set.trim(|v| v == variable);
                set.add(variable.clone(), Some(name.clone()))?;
                output.add(set);
            }
        }
    }
    Ok(output.into())
}

fn is_named_graph_of(graph: &GraphName, named_graphs: &[NamedNode]) -> bool {
    match graph {
        GraphName::NamedNode(graph) => named_graphs.contains(graph),
        _ => false,
    }
}

fn term_graph(term: &Term) -> Option<GraphName> {
    match term {
        Term::NamedNode(node) => Some(node.clone().into()),
        Term::BlankNode(node) => Some(node.clone().into()),
        _ => None,
    }
}

fn graph_term(graph: GraphName) -> Option<Term> {
    match graph {
        GraphName::NamedNode(node) => Some(node.into()),
        GraphName::BlankNode(node) => Some(node.into()),
        GraphName::DefaultGraph => None,
    }
}

fn evaluate_service<D: SparqlDataset + ?Sized>(
    inner: &Algebra,
    name: &TermPattern,
    silent: bool,
    context: &mut EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    let input = context.shared_input();
    if input.is_null() {
        return Ok(Multiset::Null);
    }
    let variables = inner.variables();
    match name {
        TermPattern::Term(Term::NamedNode(service_name)) => {
            let solutions = call_service(service_name, inner, &variables, input.sets(), silent, context)?;
            Ok(Multiset::from_sets(variables, solutions).null_if_empty())
        }
        TermPattern::Term(term) => Err(QueryEvaluationError::InvalidServiceName(term.clone())),
        TermPattern::Variable(variable) => {
            if !input.binds_everywhere(variable) {
                return Err(QueryEvaluationError::UnboundService);
            }
            let mut names = Vec::new();
            for set in input.sets() {
                if let Some(name) = set.get(variable) {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
            let mut output_variables = variables.clone();
            if !output_variables.contains(variable) {
                output_variables.push(variable.clone());
            }
            let mut output = Bag::with_variables(output_variables);
            for name in names {
                let Term::NamedNode(service_name) = name else {
                    return Err(QueryEvaluationError::InvalidServiceName(name.clone()));
                };
                let rows = input.sets().filter(|set| set.get(variable) == Some(name));
                for mut solution in call_service(service_name, inner, &variables, rows, silent, context)? {
                    match solution.get(variable) {
                        Some(value) if value != name => continue,
                        Some(_) => (),
                        None => {
                            solution.trim(|v| v == variable);
                            solution.add(variable.clone(), Some(name.clone()))?;
                        }
                    }
                    output.add(solution);
                }
            }
            Ok(Multiset::from(output).null_if_empty())
        }
    }
}

/// Sends the input solutions, restricted to the pattern variables, to the service in batches
///
/// A silent service replaces a failure by the solutions already received, or by a solution
/// leaving every variable unbound.
fn call_service<'a, D: SparqlDataset + ?Sized>(
    service_name: &NamedNode,
    pattern: &Algebra,
    variables: &[Variable],
    input: impl Iterator<Item = &'a Set>,
    silent: bool,
    context: &EvaluationContext<'_, D>,
) -> Result<Vec<Set>, QueryEvaluationError> {
    let mut seen = FxHashSet::default();
    let bindings = input
        .map(|set| set.project(variables))
        .filter(|set| !set.is_empty() && seen.insert(set.clone()))
        .collect::<Vec<_>>();
    let metadata = context.metadata();
    let limit = metadata
        .limit
        .map(|limit| limit.saturating_add(metadata.offset));
    let batch_size = context.options().service_batch_size.max(1);
    let batches = if bindings.is_empty() {
        vec![&bindings[..]]
    } else {
        bindings.chunks(batch_size).collect()
    };
    let mut solutions: Vec<Set> = Vec::new();
    for batch in batches {
        context.check_timeout()?;
        match context
            .services()
            .handle(service_name, pattern, batch, limit)
        {
            Ok(received) => solutions.extend(received),
            Err(error) if error.is_timeout() || matches!(error, QueryEvaluationError::Cancelled) => {
                return Err(error);
            }
            Err(error) if silent => {
                debug!("The silent SERVICE {service_name} failed, its error is ignored: {error}");
                if solutions.is_empty() {
                    solutions.push(variables.iter().map(|v| (v.clone(), None)).collect());
                }
                return Ok(solutions);
            }
            Err(error) => {
                warn!("The SERVICE {service_name} failed: {error}");
                return Err(error);
            }
        }
    }
    Ok(solutions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateFunction;
    use crate::context::QueryMetadata;
    use crate::dataset::InMemoryDataset;
    use crate::options::EvaluationOptions;
    use crate::pattern::TriplePattern;
    use crate::service::{ServiceHandler, ServiceHandlerRegistry};
    use oxrdf::{Dataset, Literal, Quad};
    use std::convert::Infallible;

    fn ex(name: &str) -> NamedNode {
        NamedNode::new_unchecked(format!("http://example.com/{name}"))
    }

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    fn bgp(patterns: &[(&str, &str, &str)]) -> Algebra {
        let position = |value: &str| -> TermPattern {
            match value.strip_prefix('?') {
                Some(name) => var(name).into(),
                None => ex(value).into(),
            }
        };
        Algebra::Bgp(
            patterns
                .iter()
                .map(|(s, p, o)| TriplePattern::new(position(s), position(p), position(o)).into())
                .collect(),
        )
    }

    fn dataset() -> InMemoryDataset {
        let mut dataset = Dataset::new();
        for (s, p, o, g) in [
            ("a", "p", "b", None),
            ("a", "p", "c", None),
            ("b", "q", "d", None),
            ("a", "p", "e", Some("g1")),
            ("f", "p", "e", Some("g2")),
        ] {
            let graph = g.map_or(GraphName::DefaultGraph, |g| ex(g).into());
            dataset.insert(&Quad::new(ex(s), ex(p), ex(o), graph));
        }
        InMemoryDataset::new(dataset)
    }

    fn run(
        algebra: &Algebra,
        options: &EvaluationOptions,
        metadata: &QueryMetadata,
        services: &ServiceHandlerRegistry,
    ) -> Result<Multiset, QueryEvaluationError> {
        let dataset = dataset();
        let mut context =
            EvaluationContext::new(&dataset, options, metadata, services, Deadline::unbounded());
        context.evaluate(algebra)
    }

    fn eval(algebra: &Algebra) -> Result<Multiset, QueryEvaluationError> {
        run(
            algebra,
            &EvaluationOptions::default(),
            &QueryMetadata::default(),
            &ServiceHandlerRegistry::default(),
        )
    }

    fn column(multiset: &Multiset, variable: &str) -> Vec<Option<String>> {
        let mut values = multiset
            .sets()
            .map(|s| s.get(&var(variable)).map(ToString::to_string))
            .collect::<Vec<_>>();
        values.sort();
        values
    }

    fn iri(name: &str) -> Option<String> {
        Some(format!("<http://example.com/{name}>"))
    }

    #[test]
    fn left_join_keeps_unmatched_solutions() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::left_join(
            bgp(&[("?s", "p", "?o")]),
            bgp(&[("?o", "q", "?o2")]),
            None,
        );
        let result = eval(&algebra)?;
        assert_eq!(result.len(), 2);
        assert_eq!(column(&result, "o2"), [None, iri("d")]);
        Ok(())
    }

    #[test]
    fn minus_with_disjoint_sides_is_a_no_op() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::Minus {
            left: Box::new(bgp(&[("?s", "p", "?o")])),
            right: Box::new(bgp(&[("?x", "q", "?y")])),
        };
        assert_eq!(eval(&algebra)?.len(), 2);
        let algebra = Algebra::Minus {
            left: Box::new(bgp(&[("?s", "p", "?o")])),
            right: Box::new(bgp(&[("?o", "q", "?y")])),
        };
        assert_eq!(column(&eval(&algebra)?, "o"), [iri("c")]);
        Ok(())
    }

    #[test]
    fn filter_on_identity() -> Result<(), QueryEvaluationError> {
        let deadline = Deadline::unbounded();
        let constant = Expression::Constant(Literal::from(true).into());
        assert!(filter(Multiset::Identity, &constant, &deadline)?.is_identity());
        let variable = Expression::Bound(var("x"));
        assert!(filter(Multiset::Identity, &variable, &deadline)?.is_null());
        assert!(filter(Multiset::Null, &constant, &deadline)?.is_null());
        Ok(())
    }

    #[test]
    fn extend_twice_fails() -> Result<(), QueryEvaluationError> {
        let once = extend(
            Multiset::Identity,
            &var("x"),
            &Expression::Constant(Literal::from(1).into()),
        )?;
        assert_eq!(once.len(), 1);
        assert!(matches!(
            extend(once, &var("x"), &Expression::Variable(var("y"))),
            Err(QueryEvaluationError::VariableAlreadyBound(_))
        ));
        Ok(())
    }

    #[test]
    fn extend_errors_leave_the_variable_unbound() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::Extend {
            inner: Box::new(bgp(&[("?s", "p", "?o")])),
            variable: var("x"),
            expression: Expression::Variable(var("unknown")),
        };
        let result = eval(&algebra)?;
        assert_eq!(result.len(), 2);
        assert!(result.contains_variable(&var("x")));
        assert!(result.sets().all(|s| s.get(&var("x")).is_none()));
        Ok(())
    }

    #[test]
    fn group_by_counts() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::GroupBy {
            inner: Box::new(bgp(&[("?s", "?p", "?o")])),
            keys: vec![GroupKey::variable(var("s"))],
            aggregates: vec![(var("c"), Aggregate::count_solutions())],
        };
        let result = eval(&algebra)?;
        let mut counts = result
            .sets()
            .map(|s| {
                (
                    s.get(&var("s")).map(ToString::to_string),
                    s.get(&var("c")).cloned(),
                )
            })
            .collect::<Vec<_>>();
        counts.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            counts,
            [
                (iri("a"), Some(Literal::from(2).into())),
                (iri("b"), Some(Literal::from(1).into()))
            ]
        );
        Ok(())
    }

    #[test]
    fn group_by_without_solution() -> Result<(), QueryEvaluationError> {
        let empty = bgp(&[("?s", "nothing", "?o")]);
        let implicit = Algebra::GroupBy {
            inner: Box::new(empty.clone()),
            keys: Vec::new(),
            aggregates: vec![(
                var("c"),
                Aggregate::new(AggregateFunction::Count, var("o")),
            )],
        };
        let result = eval(&implicit)?;
        assert_eq!(result.len(), 1);
        assert_eq!(
            result.sets().next().and_then(|s| s.get(&var("c")).cloned()),
            Some(Literal::from(0).into())
        );
        let keyed = Algebra::GroupBy {
            inner: Box::new(empty),
            keys: vec![GroupKey::variable(var("s"))],
            aggregates: vec![(var("c"), Aggregate::count_solutions())],
        };
        assert!(eval(&keyed)?.is_empty());
        Ok(())
    }

    #[test]
    fn order_by_descending() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::OrderBy {
            inner: Box::new(bgp(&[("a", "p", "?o")])),
            comparators: vec![OrderComparator::desc(var("o"))],
        };
        let result = eval(&algebra)?;
        let values = result
            .sets()
            .map(|s| s.get(&var("o")).map(ToString::to_string))
            .collect::<Vec<_>>();
        assert_eq!(values, [iri("c"), iri("b")]);
        Ok(())
    }

    #[test]
    fn slice_limit_zero_does_not_evaluate() -> Result<(), QueryEvaluationError> {
        let failing = Algebra::Service {
            inner: Box::new(bgp(&[("?s", "p", "?o")])),
            name: ex("unknown").into(),
            silent: false,
        };
        let algebra = Algebra::Slice {
            inner: Box::new(failing),
            offset: 0,
            limit: Some(0),
        };
        let result = eval(&algebra)?;
        assert!(result.is_empty() && !result.is_null());
        assert_eq!(result.variables(), [var("s"), var("o")]);
        Ok(())
    }

    #[test]
    fn slice_with_offset() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::Slice {
            inner: Box::new(bgp(&[("?s", "?p", "?o")])),
            offset: 1,
            limit: Some(5),
        };
        let result = eval(&algebra)?;
        assert_eq!(result.len(), 2);
        assert_eq!(result.virtual_count(), 3);
        let past_end = Algebra::Slice {
            inner: Box::new(bgp(&[("?s", "?p", "?o")])),
            offset: 10,
            limit: None,
        };
        assert!(eval(&past_end)?.is_empty());
        Ok(())
    }

    #[test]
    fn select_projects_and_orders_variables() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::Select {
            inner: Box::new(bgp(&[("?s", "p", "?o")])),
            projection: Some(vec![var("o"), var("missing")]),
        };
        let result = eval(&algebra)?;
        assert_eq!(result.variables(), [var("o"), var("missing")]);
        assert!(result.sets().all(|s| s.get(&var("s")).is_none()));
        let empty = Algebra::Select {
            inner: Box::new(bgp(&[("?s", "nothing", "?o")])),
            projection: Some(vec![var("s")]),
        };
        let result = eval(&empty)?;
        assert!(!result.is_null() && result.is_empty());
        Ok(())
    }

    #[test]
    fn distinct_and_ask() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::Distinct {
            inner: Box::new(Algebra::Select {
                inner: Box::new(bgp(&[("?s", "p", "?o")])),
                projection: Some(vec![var("s")]),
            }),
            trim_temporary_variables: true,
        };
        assert_eq!(eval(&algebra)?.len(), 1);
        let ask = Algebra::Ask {
            inner: Box::new(bgp(&[("?s", "q", "?o")])),
        };
        assert!(eval(&ask)?.is_identity());
        let ask = Algebra::Ask {
            inner: Box::new(bgp(&[("?s", "nothing", "?o")])),
        };
        assert!(eval(&ask)?.is_null());
        Ok(())
    }

    #[test]
    fn graph_variable() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::Graph {
            inner: Box::new(bgp(&[("?s", "p", "e")])),
            name: var("g").into(),
        };
        let result = eval(&algebra)?;
        assert_eq!(column(&result, "g"), [iri("g1"), iri("g2")]);
        let restricted = run(
            &algebra,
            &EvaluationOptions::default(),
            &QueryMetadata::default().with_named_graph(ex("g2")),
            &ServiceHandlerRegistry::default(),
        )?;
        assert_eq!(column(&restricted, "s"), [iri("f")]);
        let default_only = run(
            &algebra,
            &EvaluationOptions::default(),
            &QueryMetadata::default().with_default_graph(ex("g1")),
            &ServiceHandlerRegistry::default(),
        )?;
        assert!(default_only.is_null());
        Ok(())
    }

    #[test]
    fn graph_constant() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::Graph {
            inner: Box::new(bgp(&[("?s", "p", "?o")])),
            name: ex("g1").into(),
        };
        assert_eq!(column(&eval(&algebra)?, "o"), [iri("e")]);
        let missing = Algebra::Graph {
            inner: Box::new(bgp(&[("?s", "p", "?o")])),
            name: ex("g3").into(),
        };
        assert!(eval(&missing)?.is_null());
        // The default graph is active again
        assert_eq!(eval(&bgp(&[("?s", "p", "?o")]))?.len(), 2);
        Ok(())
    }

    #[test]
    fn dataset_level_operators() -> Result<(), QueryEvaluationError> {
        let graphs = eval(&Algebra::SelectDistinctGraphs { variable: var("g") })?;
        assert_eq!(column(&graphs, "g"), [iri("g1"), iri("g2")]);
        assert!(eval(&Algebra::AskAnyTriples)?.is_identity());
        assert!(eval(&Algebra::Null {
            variables: vec![var("x")]
        })?
        .is_null());
        Ok(())
    }

    #[test]
    fn parallel_and_sequential_unions_agree() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::parallel_union(bgp(&[("?s", "p", "?o")]), bgp(&[("?x", "q", "?y")]))?;
        let sequential = eval(&algebra)?;
        let parallel = run(
            &algebra,
            &EvaluationOptions::default().with_parallel_evaluation(),
            &QueryMetadata::default(),
            &ServiceHandlerRegistry::default(),
        )?;
        assert_eq!(sequential.len(), 3);
        assert_eq!(parallel.len(), 3);
        Ok(())
    }

    struct EchoService;

    impl ServiceHandler for EchoService {
        type Error = Infallible;

        fn handle(&self, _: &Algebra, bindings: &[Set], _: Option<usize>) -> Result<Vec<Set>, Infallible> {
            Ok(bindings.to_vec())
        }
    }

    #[test]
    fn service_batches_input() -> Result<(), QueryEvaluationError> {
        let services = ServiceHandlerRegistry::default().with_handler(ex("echo"), EchoService);
        let algebra = Algebra::join(
            bgp(&[("?s", "p", "?o")]),
            Algebra::Service {
                inner: Box::new(bgp(&[("?o", "r", "?z")])),
                name: ex("echo").into(),
                silent: false,
            },
        );
        let options = EvaluationOptions {
            service_batch_size: 1,
            ..EvaluationOptions::default()
        };
        let result = run(&algebra, &options, &QueryMetadata::default(), &services)?;
        assert_eq!(column(&result, "o"), [iri("b"), iri("c")]);
        Ok(())
    }

    #[test]
    fn silent_service_failure() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::Service {
            inner: Box::new(bgp(&[("?s", "p", "?o")])),
            name: ex("unknown").into(),
            silent: true,
        };
        let result = eval(&algebra)?;
        assert_eq!(result.len(), 1);
        assert!(result.sets().all(|s| s.get(&var("s")).is_none()));
        let loud = Algebra::Service {
            inner: Box::new(bgp(&[("?s", "p", "?o")])),
            name: ex("unknown").into(),
            silent: false,
        };
        assert!(matches!(
            eval(&loud),
            Err(QueryEvaluationError::UnsupportedService(_))
        ));
        let unbound = Algebra::Service {
            inner: Box::new(bgp(&[("?s", "p", "?o")])),
            name: var("service").into(),
            silent: false,
        };
        assert!(matches!(
            eval(&unbound),
            Err(QueryEvaluationError::UnboundService)
        ));
        Ok(())
    }

    #[test]
    fn sub_query_is_evaluated_independently() -> Result<(), QueryEvaluationError> {
        let sub_query = Algebra::SubQuery(Box::new(Algebra::Select {
            inner: Box::new(Algebra::GroupBy {
                inner: Box::new(bgp(&[("?s", "p", "?o")])),
                keys: Vec::new(),
                aggregates: vec![(var("n"), Aggregate::count_solutions())],
            }),
            projection: Some(vec![var("n")]),
        }));
        let algebra = Algebra::join(bgp(&[("b", "q", "?d")]), sub_query);
        let result = eval(&algebra)?;
        assert_eq!(result.len(), 1);
        assert_eq!(
            result.sets().next().and_then(|s| s.get(&var("n")).cloned()),
            Some(Literal::from(2).into())
        );
        Ok(())
    }

    #[test]
    fn lazy_union_stops_once_satisfied() -> Result<(), QueryEvaluationError> {
        let algebra = Algebra::LazyUnion {
            left: Box::new(Algebra::lazy_bgp(vec![
                TriplePattern::new(var("s"), ex("p"), var("o")).into(),
            ])?),
            right: Box::new(Algebra::lazy_bgp(vec![
                TriplePattern::new(var("s"), ex("q"), var("o")).into(),
            ])?),
        };
        let limited = run(
            &algebra,
            &EvaluationOptions::default(),
            &QueryMetadata::default().with_limit(1),
            &ServiceHandlerRegistry::default(),
        )?;
        assert_eq!(limited.len(), 1);
        assert_eq!(eval(&algebra)?.len(), 3);
        Ok(())
    }
}
