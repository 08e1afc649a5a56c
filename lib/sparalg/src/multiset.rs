use crate::context::Deadline;
use crate::error::QueryEvaluationError;
use crate::expression::Expression;
use crate::group::GroupMultiset;
use crate::join;
use crate::set::{EMPTY_SET, Set};
use oxrdf::{Term, Variable};
use rustc_hash::FxHashSet;
use std::cmp::Ordering;
use std::iter::{empty, once};

/// Identifier of a [`Set`] inside a multiset
///
/// Identifiers are only meaningful for the multiset that assigned them.
pub type SetId = usize;

/// Prefix of the variables introduced by the translator for blank nodes and intermediate path nodes
pub const TEMPORARY_VARIABLE_PREFIX: &str = "_:";

/// Returns `true` if the variable has been introduced during the query translation
#[inline]
pub fn is_temporary_variable(variable: &Variable) -> bool {
    variable.as_str().starts_with(TEMPORARY_VARIABLE_PREFIX)
}

/// A bag of solutions
///
/// The sentinel variants carry the algebraic identities of the SPARQL algebra:
/// [`Identity`](Self::Identity) is the neutral element of joins and products,
/// [`Null`](Self::Null) absorbs them.
#[derive(Clone, Debug)]
pub enum Multiset {
    /// Exactly one solution without any binding
    Identity,
    /// No solution at all
    Null,
    /// An ordinary, possibly empty, multiset
    Bag(Bag),
    /// The result of a `GROUP BY`, one representative solution per group
    Group(GroupMultiset),
    /// The result of a parallel product
    Partitioned(PartitionedMultiset),
}

impl Default for Multiset {
    #[inline]
    fn default() -> Self {
        Self::Identity
    }
}

impl Multiset {
    /// An empty ordinary multiset
    #[inline]
    pub fn empty() -> Self {
        Self::Bag(Bag::new())
    }

    /// An ordinary multiset declaring the given variables
    pub fn from_sets(
        variables: impl IntoIterator<Item = Variable>,
        sets: impl IntoIterator<Item = Set>,
    ) -> Self {
        let mut bag = Bag::with_variables(variables);
        for set in sets {
            bag.add(set);
        }
        Self::Bag(bag)
    }

    #[inline]
    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// `Null` and ordinary multisets without solution are empty, the identity never is
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of solutions
    pub fn len(&self) -> usize {
        match self {
            Self::Identity => 1,
            Self::Null => 0,
            Self::Bag(bag) => bag.len(),
            Self::Group(group) => group.len(),
            Self::Partitioned(partitioned) => partitioned.len(),
        }
    }

    /// Number of solutions before the last `LIMIT`/`OFFSET`
    pub fn virtual_count(&self) -> usize {
        match self {
            Self::Bag(bag) => bag.virtual_count(),
            _ => self.len(),
        }
    }

    pub fn variables(&self) -> &[Variable] {
        match self {
            Self::Identity | Self::Null => &[],
            Self::Bag(bag) => bag.variables(),
            Self::Group(group) => group.groups().variables(),
            Self::Partitioned(partitioned) => &partitioned.variables,
        }
    }

    #[inline]
    pub fn contains_variable(&self, variable: &Variable) -> bool {
        self.variables().contains(variable)
    }

    /// Returns `true` if every solution binds the variable
    pub fn binds_everywhere(&self, variable: &Variable) -> bool {
        self.contains_variable(variable) && self.sets().all(|s| s.get(variable).is_some())
    }

    /// Returns `true` if some solution binds the variable to the term
    pub fn contains_value(&self, variable: &Variable, value: &Term) -> bool {
        self.sets().any(|s| s.get(variable) == Some(value))
    }

    /// Returns `true` if both multisets share no variable
    pub fn is_disjoint_with(&self, other: &Self) -> bool {
        !self
            .variables()
            .iter()
            .any(|v| other.contains_variable(v))
    }

    /// Variables present in both multisets, in the order of `self`
    pub fn shared_variables(&self, other: &Self) -> Vec<Variable> {
        self.variables()
            .iter()
            .filter(|v| other.contains_variable(v))
            .cloned()
            .collect()
    }

    /// The solutions with their identifiers
    ///
    /// The identity yields a single empty solution.
    pub fn iter(&self) -> Box<dyn Iterator<Item = (SetId, &Set)> + '_> {
        match self {
            Self::Identity => Box::new(once((0, &EMPTY_SET))),
            Self::Null => Box::new(empty()),
            Self::Bag(bag) => Box::new(bag.iter()),
            Self::Group(group) => Box::new(group.groups().iter()),
            Self::Partitioned(partitioned) => Box::new(partitioned.iter()),
        }
    }

    #[inline]
    pub fn sets(&self) -> impl Iterator<Item = &Set> {
        self.iter().map(|(_, s)| s)
    }

    #[inline]
    pub fn ids(&self) -> impl Iterator<Item = SetId> + '_ {
        self.iter().map(|(id, _)| id)
    }

    pub fn get(&self, id: SetId) -> Option<&Set> {
        match self {
            Self::Identity => (id == 0).then_some(&EMPTY_SET),
            Self::Null => None,
            Self::Bag(bag) => bag.get(id),
            Self::Group(group) => group.groups().get(id),
            Self::Partitioned(partitioned) => partitioned.get(id),
        }
    }

    /// Adds a solution and returns its identifier
    ///
    /// Only ordinary multisets accept arbitrary solutions.
    pub fn add(&mut self, set: Set) -> Result<SetId, QueryEvaluationError> {
        match self {
            Self::Bag(bag) => Ok(bag.add(set)),
            Self::Identity => Err(QueryEvaluationError::InvalidMultisetOperation(
                "a solution can not be added to the identity multiset",
            )),
            Self::Null => Err(QueryEvaluationError::InvalidMultisetOperation(
                "a solution can not be added to the null multiset",
            )),
            Self::Group(_) => Err(QueryEvaluationError::InvalidMultisetOperation(
                "only whole groups can be added to a group multiset",
            )),
            Self::Partitioned(_) => Err(QueryEvaluationError::InvalidMultisetOperation(
                "solutions of a partitioned multiset are added per partition",
            )),
        }
    }

    /// Declares a variable without binding it
    pub fn add_variable(&mut self, variable: Variable) {
        if let Some(bag) = self.bag_mut() {
            bag.add_variable(variable);
        }
    }

    /// Converts the multiset into an ordinary one
    ///
    /// The identity becomes a single empty solution and `Null` an empty bag.
    pub fn into_bag(self) -> Bag {
        match self {
            Self::Identity => {
                let mut bag = Bag::new();
                bag.add(Set::new());
                bag
            }
            Self::Null => Bag::new(),
            Self::Bag(bag) => bag,
            Self::Group(group) => group.into_groups(),
            Self::Partitioned(partitioned) => partitioned.into_bag(),
        }
    }

    /// Copies the solutions, in identifier order
    pub fn to_sets(&self) -> Vec<Set> {
        self.sets().cloned().collect()
    }

    /// Removes the temporary variables
    pub fn trim(&mut self) {
        if let Some(bag) = self.bag_mut() {
            bag.trim(is_temporary_variable);
        }
    }

    /// Removes a single variable
    pub fn trim_variable(&mut self, variable: &Variable) {
        if let Some(bag) = self.bag_mut() {
            bag.trim(|v| v == variable);
        }
    }

    /// Keeps only the given variables, adding the missing ones unbound
    pub fn project(&mut self, variables: &[Variable]) {
        if let Some(bag) = self.bag_mut() {
            bag.trim(|v| !variables.contains(v));
            for variable in variables {
                bag.add_variable(variable.clone());
            }
            bag.set_variable_order(variables);
        }
    }

    /// Sets the order in which variables are reported
    pub fn set_variable_order(&mut self, variables: &[Variable]) {
        if let Some(bag) = self.bag_mut() {
            bag.set_variable_order(variables);
        }
    }

    /// Stable sorts the solutions
    pub fn sort_by(&mut self, compare: impl FnMut(&Set, &Set) -> Ordering) {
        if let Some(bag) = self.bag_mut() {
            bag.sort_by(compare);
        }
    }

    /// Keeps the solutions for which the predicate returns `true`
    pub fn retain(&mut self, predicate: impl FnMut(SetId, &Set) -> bool) {
        if let Some(bag) = self.bag_mut() {
            bag.retain(predicate);
        }
    }

    /// Removes duplicated solutions, comparing the values of all the multiset variables
    pub fn deduplicate(&mut self) {
        if let Some(bag) = self.bag_mut() {
            bag.deduplicate();
        }
    }

    /// Turns an empty ordinary multiset into `Null`
    #[must_use]
    pub fn null_if_empty(self) -> Self {
        if matches!(self, Self::Bag(_) | Self::Partitioned(_)) && self.is_empty() {
            Self::Null
        } else {
            self
        }
    }

    /// Gives mutable access to the underlying bag, converting a partitioned multiset if needed
    ///
    /// Returns `None` for the sentinels that have no bag.
    fn bag_mut(&mut self) -> Option<&mut Bag> {
        if let Self::Partitioned(partitioned) = self {
            *self = Self::Bag(std::mem::take(partitioned).into_bag());
        }
        match self {
            Self::Bag(bag) => Some(bag),
            Self::Group(group) => Some(group.groups_mut()),
            Self::Identity | Self::Null | Self::Partitioned(_) => None,
        }
    }

    /// Joins the two multisets: every pair of compatible solutions is merged
    pub fn join(self, other: Self, deadline: &Deadline) -> Result<Self, QueryEvaluationError> {
        join::join(self, other, deadline)
    }

    /// Left joins the two multisets, keeping the solutions of `self` without match
    pub fn left_join(
        self,
        other: Self,
        filter: Option<&Expression>,
        deadline: &Deadline,
    ) -> Result<Self, QueryEvaluationError> {
        join::left_join(self, other, filter, deadline)
    }

    /// Keeps the solutions of `self` that have (`must_exist`) or do not have a compatible solution in `other`
    pub fn exists_join(
        self,
        other: &Self,
        must_exist: bool,
        deadline: &Deadline,
    ) -> Result<Self, QueryEvaluationError> {
        join::exists_join(self, other, must_exist, deadline)
    }

    /// Removes the solutions of `self` that share a binding with a compatible solution of `other`
    pub fn minus_join(self, other: &Self, deadline: &Deadline) -> Result<Self, QueryEvaluationError> {
        join::minus_join(self, other, deadline)
    }

    /// Cartesian product
    pub fn product(self, other: Self, deadline: &Deadline) -> Result<Self, QueryEvaluationError> {
        join::product(self, other, deadline)
    }

    /// Cartesian product computed on the rayon thread pool
    pub fn parallel_product(
        self,
        other: Self,
        deadline: &Deadline,
    ) -> Result<Self, QueryEvaluationError> {
        join::parallel_product(self, other, deadline)
    }

    /// Bag union, duplicates are kept
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        join::union(self, other)
    }

    /// Adds the solutions of `other` that are not already in `self`
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        join::merge(self, other)
    }
}

/// An ordinary multiset: an arena of solutions indexed by [`SetId`]
///
/// Identifiers follow insertion order.
#[derive(Clone, Debug, Default)]
pub struct Bag {
    variables: Vec<Variable>,
    sets: Vec<Option<Set>>,
    len: usize,
    ordered_ids: Option<Vec<SetId>>,
    virtual_count: Option<usize>,
}

impl Bag {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variables(variables: impl IntoIterator<Item = Variable>) -> Self {
        let mut bag = Self::new();
        for variable in variables {
            bag.add_variable(variable);
        }
        bag
    }

    /// Adds a solution, the variables it contains are declared
    pub fn add(&mut self, set: Set) -> SetId {
        for variable in set.variables() {
            if !self.variables.contains(variable) {
                self.variables.push(variable.clone());
            }
        }
        let id = self.sets.len();
        self.sets.push(Some(set));
        if let Some(ordered_ids) = &mut self.ordered_ids {
            ordered_ids.push(id);
        }
        self.len += 1;
        id
    }

    pub fn remove(&mut self, id: SetId) -> Option<Set> {
        let set = self.sets.get_mut(id)?.take()?;
        self.len -= 1;
        Some(set)
    }

    #[inline]
    pub fn get(&self, id: SetId) -> Option<&Set> {
        self.sets.get(id)?.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, id: SetId) -> Option<&mut Set> {
        self.sets.get_mut(id)?.as_mut()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of solutions before slicing, defaults to the actual number of solutions
    #[inline]
    pub fn virtual_count(&self) -> usize {
        self.virtual_count.unwrap_or(self.len)
    }

    #[inline]
    pub fn set_virtual_count(&mut self, count: usize) {
        self.virtual_count = Some(count);
    }

    #[inline]
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn add_variable(&mut self, variable: Variable) {
        if !self.variables.contains(&variable) {
            self.variables.push(variable);
        }
    }

    /// The solution identifiers, in sort order if the bag has been sorted
    pub fn ids(&self) -> impl Iterator<Item = SetId> + '_ {
        let ordered: Box<dyn Iterator<Item = SetId> + '_> = match &self.ordered_ids {
            Some(ids) => Box::new(ids.iter().copied()),
            None => Box::new(0..self.sets.len()),
        };
        ordered.filter(|id| self.sets.get(*id).is_some_and(Option::is_some))
    }

    pub fn iter(&self) -> impl Iterator<Item = (SetId, &Set)> {
        self.ids().filter_map(|id| Some((id, self.get(id)?)))
    }

    pub fn trim(&mut self, mut predicate: impl FnMut(&Variable) -> bool) {
        self.variables.retain(|v| !predicate(v));
        for set in self.sets.iter_mut().flatten() {
            set.trim(&mut predicate);
        }
    }

    /// Puts the given variables first, in the given order
    pub fn set_variable_order(&mut self, order: &[Variable]) {
        let mut variables = order
            .iter()
            .filter(|v| self.variables.contains(v))
            .cloned()
            .collect::<Vec<_>>();
        for variable in &self.variables {
            if !variables.contains(variable) {
                variables.push(variable.clone());
            }
        }
        self.variables = variables;
    }

    pub fn sort_by(&mut self, mut compare: impl FnMut(&Set, &Set) -> Ordering) {
        let mut ids = self.ids().collect::<Vec<_>>();
        ids.sort_by(|a, b| match (self.get(*a), self.get(*b)) {
            (Some(a), Some(b)) => compare(a, b),
            _ => Ordering::Equal,
        });
        self.ordered_ids = Some(ids);
    }

    pub fn retain(&mut self, mut predicate: impl FnMut(SetId, &Set) -> bool) {
        for (id, slot) in self.sets.iter_mut().enumerate() {
            if slot.as_ref().is_some_and(|set| !predicate(id, set)) {
                *slot = None;
                self.len -= 1;
            }
        }
    }

    pub fn deduplicate(&mut self) {
        let variables = self.variables.clone();
        let mut seen = FxHashSet::default();
        let duplicates = self
            .iter()
            .filter(|(_, set)| !seen.insert(set.key(&variables)))
            .map(|(id, _)| id)
            .collect::<Vec<_>>();
        for id in duplicates {
            self.remove(id);
        }
    }

    /// Keeps `limit` solutions after skipping `offset`, in identifier order
    pub fn slice(&mut self, offset: usize, limit: Option<usize>) {
        let count = self.len;
        let kept = self
            .ids()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .collect::<FxHashSet<_>>();
        self.retain(|id, _| kept.contains(&id));
        if let Some(ordered_ids) = &mut self.ordered_ids {
            ordered_ids.retain(|id| kept.contains(id));
        }
        self.virtual_count = Some(count);
    }

    /// The solutions in identifier order
    pub fn into_sets(self) -> Vec<Set> {
        let Self {
            mut sets,
            ordered_ids,
            ..
        } = self;
        match ordered_ids {
            Some(ids) => ids
                .into_iter()
                .filter_map(|id| sets.get_mut(id)?.take())
                .collect(),
            None => sets.into_iter().flatten().collect(),
        }
    }
}

impl From<Bag> for Multiset {
    #[inline]
    fn from(bag: Bag) -> Self {
        Self::Bag(bag)
    }
}

/// A multiset whose identifier space is split into fixed size partitions
///
/// Each partition can be filled independently, e.g. by a rayon worker:
/// the solution at position `i` of partition `p` gets the identifier `p * partition_size + i`.
#[derive(Clone, Debug, Default)]
pub struct PartitionedMultiset {
    variables: Vec<Variable>,
    partition_size: usize,
    partitions: Vec<Vec<Set>>,
    len: usize,
}

impl PartitionedMultiset {
    /// Builds the multiset from partitions
    ///
    /// Fails if a partition is larger than `partition_size`.
    pub fn new(
        variables: Vec<Variable>,
        partition_size: usize,
        partitions: Vec<Vec<Set>>,
    ) -> Result<Self, QueryEvaluationError> {
        if partitions.iter().any(|p| p.len() > partition_size) {
            return Err(QueryEvaluationError::InvalidMultisetOperation(
                "a partition is larger than the partition size",
            ));
        }
        Ok(Self {
            len: partitions.iter().map(Vec::len).sum(),
            variables,
            partition_size,
            partitions,
        })
    }

    /// The first identifier of the partition
    #[inline]
    pub fn base_id(&self, partition: usize) -> SetId {
        partition * self.partition_size
    }

    #[inline]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, id: SetId) -> Option<&Set> {
        if self.partition_size == 0 {
            return None;
        }
        self.partitions
            .get(id / self.partition_size)?
            .get(id % self.partition_size)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SetId, &Set)> {
        self.partitions
            .iter()
            .enumerate()
            .flat_map(move |(p, partition)| {
                let base = self.base_id(p);
                partition.iter().enumerate().map(move |(i, s)| (base + i, s))
            })
    }

    /// Flattens the partitions into an ordinary multiset, keeping the partition order
    pub fn into_bag(self) -> Bag {
        let mut bag = Bag::with_variables(self.variables);
        for set in self.partitions.into_iter().flatten() {
            bag.add(set);
        }
        bag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::NamedNode;

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    fn iri(name: &str) -> Term {
        NamedNode::new_unchecked(format!("http://example.com/{name}")).into()
    }

    fn row(values: &[(&str, &str)]) -> Set {
        values
            .iter()
            .map(|(k, v)| (var(k), Some(iri(v))))
            .collect()
    }

    #[test]
    fn ids_follow_insertion_order() {
        let mut bag = Bag::new();
        assert_eq!(bag.add(row(&[("x", "a")])), 0);
        assert_eq!(bag.add(row(&[("x", "b")])), 1);
        bag.remove(0);
        assert_eq!(bag.add(row(&[("x", "c")])), 2);
        assert_eq!(bag.ids().collect::<Vec<_>>(), [1, 2]);
        assert_eq!(bag.len(), 2);
    }

    #[test]
    fn sentinels_reject_add() {
        assert!(Multiset::Identity.add(Set::new()).is_err());
        assert!(Multiset::Null.add(Set::new()).is_err());
        assert!(Multiset::empty().add(Set::new()).is_ok());
    }

    #[test]
    fn identity_is_one_empty_solution() {
        let identity = Multiset::Identity;
        assert_eq!(identity.len(), 1);
        assert!(!identity.is_empty());
        assert_eq!(identity.sets().collect::<Vec<_>>(), [&Set::new()]);
        assert!(Multiset::Null.is_empty());
    }

    #[test]
    fn sort_then_slice() {
        let mut bag = Bag::new();
        for v in ["c", "a", "b", "d"] {
            bag.add(row(&[("x", v)]));
        }
        bag.sort_by(|a, b| a.get(&var("x")).map(ToString::to_string).cmp(&b.get(&var("x")).map(ToString::to_string)));
        bag.slice(1, Some(2));
        let values = bag
            .into_sets()
            .into_iter()
            .map(|s| s.get(&var("x")).cloned())
            .collect::<Vec<_>>();
        assert_eq!(values, [Some(iri("b")), Some(iri("c"))]);
    }

    #[test]
    fn slice_records_virtual_count() {
        let mut bag = Bag::new();
        for v in ["a", "b", "c"] {
            bag.add(row(&[("x", v)]));
        }
        bag.slice(5, None);
        assert!(bag.is_empty());
        assert_eq!(bag.virtual_count(), 3);
    }

    #[test]
    fn deduplicate_compares_all_variables() {
        let mut bag = Bag::new();
        bag.add(row(&[("x", "a")]));
        bag.add(row(&[("x", "a")]));
        bag.add(row(&[("x", "a"), ("y", "b")]));
        bag.deduplicate();
        assert_eq!(bag.len(), 2);
    }

    #[test]
    fn trim_removes_temporary_variables() {
        let mut multiset = Multiset::from_sets([], [row(&[("x", "a"), ("_:b0", "b")])]);
        multiset.trim();
        assert_eq!(multiset.variables(), [var("x")]);
        assert_eq!(multiset.sets().next().map(Set::len), Some(1));
    }

    #[test]
    fn partitioned_ids() -> Result<(), QueryEvaluationError> {
        let partitioned = PartitionedMultiset::new(
            vec![var("x")],
            2,
            vec![vec![row(&[("x", "a")]), row(&[("x", "b")])], vec![row(&[("x", "c")])]],
        )?;
        assert_eq!(partitioned.len(), 3);
        assert_eq!(partitioned.base_id(1), 2);
        assert_eq!(partitioned.get(2), Some(&row(&[("x", "c")])));
        assert_eq!(partitioned.into_bag().len(), 3);
        Ok(())
    }
}
