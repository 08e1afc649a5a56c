//! Relational primitives over [`Multiset`]s
//!
//! Every primitive applies the identity/null short circuits first and checks the deadline
//! every [`CHECK_INTERVAL`] probed rows.

use crate::context::Deadline;
use crate::error::QueryEvaluationError;
use crate::expression::Expression;
use crate::multiset::{Bag, Multiset, PartitionedMultiset, SetId};
use crate::set::Set;
use oxrdf::{Term, Variable};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) const CHECK_INTERVAL: usize = 1024;

/// Index of the solutions of a multiset on a list of variables
///
/// Solutions where a variable is unbound are compatible with any value and are returned for every probe.
struct SetIndex<'a> {
    variables: &'a [Variable],
    by_value: Vec<FxHashMap<&'a Term, Vec<SetId>>>,
    unbound: Vec<Vec<SetId>>,
    all: Vec<SetId>,
}

impl<'a> SetIndex<'a> {
    fn new(multiset: &'a Multiset, variables: &'a [Variable]) -> Self {
        let mut by_value = vec![FxHashMap::<&'a Term, Vec<SetId>>::default(); variables.len()];
        let mut unbound = vec![Vec::new(); variables.len()];
        let mut all = Vec::new();
        for (id, set) in multiset.iter() {
            all.push(id);
            for (i, variable) in variables.iter().enumerate() {
                if let Some(value) = set.get(variable) {
                    by_value[i].entry(value).or_default().push(id);
                } else {
                    unbound[i].push(id);
                }
            }
        }
        Self {
            variables,
            by_value,
            unbound,
            all,
        }
    }

    /// The identifiers of the indexed solutions that may be compatible with `probe`, in increasing order
    fn candidates(&self, probe: &Set) -> Vec<SetId> {
        let mut result: Option<FxHashSet<SetId>> = None;
        for (i, variable) in self.variables.iter().enumerate() {
            let Some(value) = probe.get(variable) else {
                continue;
            };
            let ids = self.by_value[i]
                .get(value)
                .into_iter()
                .flatten()
                .chain(&self.unbound[i])
                .copied();
            result = Some(match result {
                Some(previous) => ids.filter(|id| previous.contains(id)).collect(),
                None => ids.collect(),
            });
            if result.as_ref().is_some_and(FxHashSet::is_empty) {
                return Vec::new();
            }
        }
        match result {
            Some(ids) => {
                let mut ids = ids.into_iter().collect::<Vec<_>>();
                ids.sort_unstable();
                ids
            }
            None => self.all.clone(),
        }
    }
}

fn union_variables(lhs: &Multiset, rhs: &Multiset) -> Vec<Variable> {
    let mut variables = lhs.variables().to_vec();
    for variable in rhs.variables() {
        if !variables.contains(variable) {
            variables.push(variable.clone());
        }
    }
    variables
}

fn check_every(counter: usize, deadline: &Deadline) -> Result<(), QueryEvaluationError> {
    if counter % CHECK_INTERVAL == 0 {
        deadline.check()?;
    }
    Ok(())
}

pub(crate) fn join(
    lhs: Multiset,
    rhs: Multiset,
    deadline: &Deadline,
) -> Result<Multiset, QueryEvaluationError> {
    if lhs.is_identity() {
        return Ok(rhs);
    }
    if rhs.is_identity() {
        return Ok(lhs);
    }
    if lhs.is_empty() || rhs.is_empty() {
        return Ok(Multiset::Null);
    }
    let join_variables = lhs.shared_variables(&rhs);
    if join_variables.is_empty() {
        return product(lhs, rhs, deadline);
    }
    let index = SetIndex::new(&lhs, &join_variables);
    let mut output = Bag::with_variables(union_variables(&lhs, &rhs));
    for (i, y) in rhs.sets().enumerate() {
        check_every(i, deadline)?;
        for id in index.candidates(y) {
            if let Some(x) = lhs.get(id) {
                if x.is_compatible_with(y, &join_variables) {
                    output.add(x.join(y));
                }
            }
        }
    }
    Ok(output.into())
}

pub(crate) fn left_join(
    lhs: Multiset,
    rhs: Multiset,
    filter: Option<&Expression>,
    deadline: &Deadline,
) -> Result<Multiset, QueryEvaluationError> {
    if rhs.is_identity() || rhs.is_empty() || lhs.is_empty() {
        return Ok(lhs);
    }
    let accepts = |set: &Set| filter.is_none_or(|f| f.effective_boolean_value(set) == Ok(true));
    let join_variables = lhs.shared_variables(&rhs);
    let mut output = Bag::with_variables(union_variables(&lhs, &rhs));
    if join_variables.is_empty() {
        for (i, x) in lhs.sets().enumerate() {
            check_every(i, deadline)?;
            let mut matched = false;
            for y in rhs.sets() {
                let z = x.join(y);
                if accepts(&z) {
                    output.add(z);
                    matched = true;
                }
            }
            if !matched {
                output.add(x.clone());
            }
        }
    } else {
        let index = SetIndex::new(&rhs, &join_variables);
        for (i, x) in lhs.sets().enumerate() {
            check_every(i, deadline)?;
            let mut matched = false;
            for id in index.candidates(x) {
                let Some(y) = rhs.get(id) else {
                    continue;
                };
                if !x.is_compatible_with(y, &join_variables) {
                    continue;
                }
                let z = x.join(y);
                if accepts(&z) {
                    output.add(z);
                    matched = true;
                }
            }
            if !matched {
                output.add(x.clone());
            }
        }
    }
    Ok(output.into())
}

pub(crate) fn exists_join(
    lhs: Multiset,
    rhs: &Multiset,
    must_exist: bool,
    deadline: &Deadline,
) -> Result<Multiset, QueryEvaluationError> {
    if rhs.is_identity() || lhs.is_null() {
        return Ok(lhs);
    }
    if rhs.is_empty() {
        return Ok(if must_exist { Multiset::Null } else { lhs });
    }
    let join_variables = lhs.shared_variables(rhs);
    if join_variables.is_empty() {
        return Ok(if must_exist { lhs } else { Multiset::Null });
    }
    let index = SetIndex::new(rhs, &join_variables);
    let mut output = lhs;
    let mut counter = 0;
    let mut timeout = Ok(());
    output.retain(|_, x| {
        counter += 1;
        if timeout.is_ok() && counter % CHECK_INTERVAL == 0 {
            timeout = deadline.check();
        }
        let exists = index.candidates(x).into_iter().any(|id| {
            rhs.get(id)
                .is_some_and(|y| x.is_compatible_with(y, &join_variables))
        });
        exists == must_exist
    });
    timeout?;
    Ok(output.null_if_empty())
}

pub(crate) fn minus_join(
    lhs: Multiset,
    rhs: &Multiset,
    deadline: &Deadline,
) -> Result<Multiset, QueryEvaluationError> {
    if rhs.is_identity() || rhs.is_null() || lhs.is_identity() || lhs.is_null() {
        return Ok(lhs);
    }
    let join_variables = lhs.shared_variables(rhs);
    if join_variables.is_empty() {
        return Ok(lhs);
    }
    let index = SetIndex::new(rhs, &join_variables);
    let mut output = lhs;
    let mut counter = 0;
    let mut timeout = Ok(());
    output.retain(|_, x| {
        counter += 1;
        if timeout.is_ok() && counter % CHECK_INTERVAL == 0 {
            timeout = deadline.check();
        }
        !index.candidates(x).into_iter().any(|id| {
            rhs.get(id).is_some_and(|y| {
                x.is_compatible_with(y, &join_variables)
                    && x.is_minus_compatible_with(y, &join_variables)
            })
        })
    });
    timeout?;
    Ok(output.null_if_empty())
}

pub(crate) fn product(
    lhs: Multiset,
    rhs: Multiset,
    deadline: &Deadline,
) -> Result<Multiset, QueryEvaluationError> {
    if lhs.is_identity() {
        return Ok(rhs);
    }
    if rhs.is_identity() {
        return Ok(lhs);
    }
    if lhs.is_empty() || rhs.is_empty() {
        return Ok(Multiset::Null);
    }
    let mut output = Bag::with_variables(union_variables(&lhs, &rhs));
    let mut counter = 0;
    for x in lhs.sets() {
        for y in rhs.sets() {
            check_every(counter, deadline)?;
            counter += 1;
            output.add(x.join(y));
        }
    }
    Ok(output.into())
}

/// Cartesian product split over the larger side, one partition per rayon worker
///
/// A worker hitting the deadline raises a shared stop flag so that the other workers give up early.
pub(crate) fn parallel_product(
    lhs: Multiset,
    rhs: Multiset,
    deadline: &Deadline,
) -> Result<Multiset, QueryEvaluationError> {
    if lhs.is_identity() {
        return Ok(rhs);
    }
    if rhs.is_identity() {
        return Ok(lhs);
    }
    if lhs.is_empty() || rhs.is_empty() {
        return Ok(Multiset::Null);
    }
    let lhs_is_outer = lhs.len() >= rhs.len();
    let (outer, inner) = if lhs_is_outer {
        (&lhs, &rhs)
    } else {
        (&rhs, &lhs)
    };
    let outer = outer.sets().collect::<Vec<_>>();
    let inner = inner.sets().collect::<Vec<_>>();
    let chunk_size = outer.len().div_ceil(rayon::current_num_threads().max(1));
    let stride = (CHECK_INTERVAL / inner.len()).max(1);
    let stop = AtomicBool::new(false);
    let partitions = outer
        .par_chunks(chunk_size)
        .map(|chunk| {
            let mut partition = Vec::with_capacity(chunk.len() * inner.len());
            for (i, x) in chunk.iter().enumerate() {
                if stop.load(Ordering::Relaxed) {
                    return Err(QueryEvaluationError::Timeout);
                }
                if i % stride == 0 {
                    if let Err(e) = deadline.check() {
                        stop.store(true, Ordering::Relaxed);
                        return Err(e);
                    }
                }
                for y in &inner {
                    partition.push(if lhs_is_outer { x.join(y) } else { y.join(x) });
                }
            }
            Ok(partition)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Multiset::Partitioned(PartitionedMultiset::new(
        union_variables(&lhs, &rhs),
        chunk_size * inner.len(),
        partitions,
    )?))
}

pub(crate) fn union(lhs: Multiset, rhs: Multiset) -> Multiset {
    if lhs.is_empty() && !rhs.is_null() {
        return with_extra_variables(rhs, lhs.variables());
    }
    if rhs.is_empty() {
        return with_extra_variables(lhs, rhs.variables());
    }
    let variables = union_variables(&lhs, &rhs);
    let mut output = lhs.into_bag();
    for variable in variables {
        output.add_variable(variable);
    }
    for set in rhs.into_bag().into_sets() {
        output.add(set);
    }
    output.into()
}

fn with_extra_variables(mut multiset: Multiset, variables: &[Variable]) -> Multiset {
    for variable in variables {
        multiset.add_variable(variable.clone());
    }
    multiset
}

pub(crate) fn merge(lhs: Multiset, rhs: Multiset) -> Multiset {
    if lhs.is_empty() {
        return rhs;
    }
    if rhs.is_empty() {
        return lhs;
    }
    // Keyed on both sides so that an identity left side does not hide the right rows
    let variables = union_variables(&lhs, &rhs);
    let mut seen = lhs
        .sets()
        .map(|s| owned_key(s, &variables))
        .collect::<FxHashSet<_>>();
    let mut output = lhs.into_bag();
    for variable in &variables {
        output.add_variable(variable.clone());
    }
    for set in rhs.into_bag().into_sets() {
        if seen.insert(owned_key(&set, &variables)) {
            output.add(set);
        }
    }
    output.into()
}

fn owned_key(set: &Set, variables: &[Variable]) -> Vec<Option<Term>> {
    set.key(variables).into_iter().map(|t| t.cloned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancellationToken;
    use oxrdf::NamedNode;
    use std::time::Duration;

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    fn iri(name: &str) -> Term {
        NamedNode::new_unchecked(format!("http://example.com/{name}")).into()
    }

    fn multiset(variables: &[&str], rows: &[&[Option<&str>]]) -> Multiset {
        Multiset::from_sets(
            variables.iter().map(|v| var(v)),
            rows.iter().map(|row| {
                variables
                    .iter()
                    .zip(row.iter())
                    .map(|(v, value)| (var(v), value.map(iri)))
                    .collect()
            }),
        )
    }

    fn sorted_rows(multiset: &Multiset) -> Vec<String> {
        let mut rows = multiset.sets().map(ToString::to_string).collect::<Vec<_>>();
        rows.sort();
        rows
    }

    #[test]
    fn join_with_unbound_values() -> Result<(), QueryEvaluationError> {
        let lhs = multiset(&["x", "y"], &[&[Some("a"), Some("1")], &[None, Some("2")]]);
        let rhs = multiset(&["x", "z"], &[&[Some("a"), Some("3")], &[Some("b"), Some("4")]]);
        let result = join(lhs, rhs, &Deadline::unbounded())?;
        assert_eq!(result.len(), 3);
        assert!(result.sets().any(|s| s.get(&var("x")) == Some(&iri("b"))
            && s.get(&var("y")) == Some(&iri("2"))));
        Ok(())
    }

    #[test]
    fn join_is_commutative_up_to_order() -> Result<(), QueryEvaluationError> {
        let a = multiset(&["x", "y"], &[&[Some("a"), Some("1")], &[Some("b"), Some("2")]]);
        let b = multiset(&["x"], &[&[Some("a")], &[Some("a")], &[Some("c")]]);
        let ab = join(a.clone(), b.clone(), &Deadline::unbounded())?;
        let ba = join(b, a, &Deadline::unbounded())?;
        assert_eq!(sorted_rows(&ab), sorted_rows(&ba));
        Ok(())
    }

    #[test]
    fn left_join_keeps_rejected_rows() -> Result<(), QueryEvaluationError> {
        let lhs = multiset(&["x"], &[&[Some("a")], &[Some("b")]]);
        let rhs = multiset(&["x", "y"], &[&[Some("a"), Some("1")], &[Some("b"), Some("2")]]);
        let filter = Expression::SameTerm(
            Box::new(Expression::Variable(var("y"))),
            Box::new(Expression::Constant(iri("1"))),
        );
        let result = left_join(lhs, rhs, Some(&filter), &Deadline::unbounded())?;
        assert_eq!(result.len(), 2);
        assert!(result.sets().any(|s| s.get(&var("x")) == Some(&iri("b"))
            && s.get(&var("y")).is_none()));
        Ok(())
    }

    #[test]
    fn minus_needs_a_shared_binding() -> Result<(), QueryEvaluationError> {
        let lhs = multiset(&["x", "y"], &[&[Some("a"), None], &[Some("b"), Some("1")]]);
        let rhs = multiset(&["x", "y"], &[&[None, Some("1")], &[Some("a"), None]]);
        let result = minus_join(lhs, &rhs, &Deadline::unbounded())?;
        assert!(result.is_null());
        Ok(())
    }

    #[test]
    fn exists_join_partitions() -> Result<(), QueryEvaluationError> {
        let lhs = multiset(&["x"], &[&[Some("1")], &[Some("2")]]);
        let rhs = multiset(&["x"], &[&[Some("1")]]);
        let kept = exists_join(lhs.clone(), &rhs, true, &Deadline::unbounded())?;
        assert_eq!(kept.to_sets(), [Set::new().with(var("x"), iri("1"))?]);
        let removed = exists_join(lhs, &rhs, false, &Deadline::unbounded())?;
        assert_eq!(removed.to_sets(), [Set::new().with(var("x"), iri("2"))?]);
        Ok(())
    }

    #[test]
    fn parallel_product_matches_product() -> Result<(), QueryEvaluationError> {
        let lhs = multiset(&["x"], &[&[Some("a")], &[Some("b")], &[Some("c")]]);
        let rhs = multiset(&["y"], &[&[Some("1")], &[Some("2")]]);
        let serial = product(lhs.clone(), rhs.clone(), &Deadline::unbounded())?;
        let parallel = parallel_product(lhs, rhs, &Deadline::unbounded())?;
        assert_eq!(parallel.len(), 6);
        assert_eq!(sorted_rows(&serial), sorted_rows(&parallel));
        Ok(())
    }

    #[test]
    fn product_times_out() {
        let rows = (0..2000).map(|i| i.to_string()).collect::<Vec<_>>();
        let rows = rows.iter().map(|r| [Some(r.as_str())]).collect::<Vec<_>>();
        let rows = rows.iter().map(|r| r.as_slice()).collect::<Vec<_>>();
        let lhs = multiset(&["x"], &rows);
        let rhs = multiset(&["y"], &rows);
        let deadline = Deadline::new(Some(Duration::ZERO), CancellationToken::new());
        assert!(matches!(
            product(lhs, rhs, &deadline),
            Err(QueryEvaluationError::Timeout)
        ));
    }

    #[test]
    fn merge_skips_known_rows() {
        let lhs = multiset(&["x"], &[&[Some("a")]]);
        let rhs = multiset(&["x"], &[&[Some("a")], &[Some("b")]]);
        assert_eq!(merge(lhs, rhs).len(), 2);
    }

    #[test]
    fn merge_with_identity() {
        let rhs = multiset(&["x"], &[&[Some("a")], &[Some("b")]]);
        let result = merge(Multiset::Identity, rhs);
        assert_eq!(result.len(), 3);
        assert_eq!(result.variables(), [var("x")]);
        assert!(result.sets().any(Set::is_empty));
        assert!(result.sets().any(|s| s.get(&var("x")) == Some(&iri("b"))));
        let lhs = multiset(&["x"], &[&[Some("a")]]);
        assert_eq!(merge(lhs, Multiset::Identity).len(), 2);
    }

    #[test]
    fn union_with_identity() {
        let lhs = multiset(&["x"], &[&[Some("a")]]);
        let result = union(lhs, Multiset::Identity);
        assert_eq!(result.len(), 2);
        assert!(result.sets().any(Set::is_empty));
    }
}
