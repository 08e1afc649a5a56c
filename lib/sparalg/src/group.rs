use crate::error::{ExpressionError, QueryEvaluationError};
use crate::expression::Expression;
use crate::multiset::{Bag, Multiset, SetId};
use crate::set::Set;
use oxrdf::{Term, Variable};
use rustc_hash::FxHashMap;

/// A grouping expression, optionally bound to a variable (`GROUP BY (?a + ?b AS ?c)`)
#[derive(Clone, Debug)]
pub struct GroupKey {
    pub expression: Expression,
    pub variable: Option<Variable>,
}

impl GroupKey {
    pub fn new(expression: Expression) -> Self {
        Self {
            expression,
            variable: None,
        }
    }

    /// Groups on the value of a variable, the variable is kept in the group solution
    pub fn variable(variable: Variable) -> Self {
        Self {
            expression: Expression::Variable(variable.clone()),
            variable: Some(variable),
        }
    }

    #[must_use]
    pub fn with_variable(mut self, variable: Variable) -> Self {
        self.variable = Some(variable);
        self
    }
}

/// The value of a grouping key for one solution
///
/// Unbound and erroneous keys form groups of their own.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum KeyValue {
    Bound(Term),
    Unbound,
    Error,
}

impl KeyValue {
    pub(crate) fn evaluate(key: &GroupKey, set: &Set) -> Self {
        match key.expression.evaluate(set) {
            Ok(term) => Self::Bound(term),
            Err(ExpressionError::UnboundVariable(_)) => Self::Unbound,
            Err(_) => Self::Error,
        }
    }

    fn into_term(self) -> Option<Term> {
        match self {
            Self::Bound(term) => Some(term),
            Self::Unbound | Self::Error => None,
        }
    }
}

/// A group of solutions sharing the same key values
#[derive(Clone, Debug)]
pub struct BindingGroup {
    key: Vec<KeyValue>,
    members: Vec<SetId>,
}

impl BindingGroup {
    /// The identifiers of the grouped solutions
    #[inline]
    pub fn members(&self) -> &[SetId] {
        &self.members
    }
}

/// The output of a `GROUP BY`
///
/// It holds one representative solution per group, binding the grouping variables,
/// and maps each of them back to the members of the group in the grouped multiset.
#[derive(Clone, Debug)]
pub struct GroupMultiset {
    groups: Bag,
    contents: Box<Multiset>,
    members: FxHashMap<SetId, BindingGroup>,
}

impl GroupMultiset {
    pub fn new(contents: Multiset) -> Self {
        Self {
            groups: Bag::new(),
            contents: Box::new(contents),
            members: FxHashMap::default(),
        }
    }

    /// Buckets the solutions of `contents` by the values of the keys
    ///
    /// Groups are created in order of first appearance.
    pub(crate) fn group_by(contents: Multiset, keys: &[GroupKey]) -> Result<Self, QueryEvaluationError> {
        let mut buckets: FxHashMap<Vec<KeyValue>, usize> = FxHashMap::default();
        let mut groups: Vec<BindingGroup> = Vec::new();
        for (id, set) in contents.iter() {
            let key = keys
                .iter()
                .map(|k| KeyValue::evaluate(k, set))
                .collect::<Vec<_>>();
            if let Some(&position) = buckets.get(&key) {
                groups[position].members.push(id);
            } else {
                buckets.insert(key.clone(), groups.len());
                groups.push(BindingGroup {
                    key,
                    members: vec![id],
                });
            }
        }
        let mut output = Self::new(contents);
        for key in keys {
            if let Some(variable) = &key.variable {
                output.groups.add_variable(variable.clone());
            }
        }
        for group in groups {
            output.add_group(group, keys)?;
        }
        Ok(output)
    }

    fn add_group(&mut self, group: BindingGroup, keys: &[GroupKey]) -> Result<SetId, QueryEvaluationError> {
        let mut representative = Set::new();
        for (key, value) in keys.iter().zip(group.key.iter().cloned()) {
            if let Some(variable) = &key.variable {
                if !representative.contains_variable(variable) {
                    representative.add(variable.clone(), value.into_term())?;
                }
            }
        }
        let id = self.groups.add(representative);
        self.members.insert(id, group);
        Ok(id)
    }

    /// Adds a group without key whose members are all the solutions of the contents
    pub(crate) fn add_implicit_group(&mut self) -> SetId {
        let members = self.contents.ids().collect();
        let id = self.groups.add(Set::new());
        self.members.insert(
            id,
            BindingGroup {
                key: Vec::new(),
                members,
            },
        );
        id
    }

    /// The representative solutions
    #[inline]
    pub fn groups(&self) -> &Bag {
        &self.groups
    }

    #[inline]
    pub(crate) fn groups_mut(&mut self) -> &mut Bag {
        &mut self.groups
    }

    /// The grouped multiset
    #[inline]
    pub fn contents(&self) -> &Multiset {
        &self.contents
    }

    /// The group behind a representative solution
    #[inline]
    pub fn group(&self, id: SetId) -> Option<&BindingGroup> {
        self.members.get(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Drops the grouping information, keeping the representative solutions
    pub fn into_groups(self) -> Bag {
        self.groups
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

    #[test]
    fn groups_in_order_of_appearance() -> Result<(), QueryEvaluationError> {
        let contents = Multiset::from_sets(
            [var("x"), var("y")],
            [
                Set::new().with(var("x"), iri("b"))?.with(var("y"), iri("1"))?,
                Set::new().with(var("x"), iri("a"))?.with(var("y"), iri("2"))?,
                Set::new().with(var("x"), iri("b"))?.with(var("y"), iri("3"))?,
                Set::new().with(var("y"), iri("4"))?,
            ],
        );
        let grouped = GroupMultiset::group_by(contents, &[GroupKey::variable(var("x"))])?;
        assert_eq!(grouped.len(), 3);
        let representatives = grouped.groups().iter().collect::<Vec<_>>();
        assert_eq!(representatives[0].1.get(&var("x")), Some(&iri("b")));
        assert_eq!(representatives[2].1.get(&var("x")), None);
        assert!(representatives[2].1.contains_variable(&var("x")));
        assert_eq!(
            grouped.group(representatives[0].0).map(BindingGroup::members),
            Some([0, 2].as_slice())
        );
        Ok(())
    }

    #[test]
    fn group_multiset_rejects_arbitrary_solutions() {
        let mut multiset = Multiset::Group(GroupMultiset::new(Multiset::empty()));
        assert!(multiset.add(Set::new()).is_err());
    }

    #[test]
    fn implicit_group_contains_everything() -> Result<(), QueryEvaluationError> {
        let contents = Multiset::from_sets(
            [var("x")],
            [
                Set::new().with(var("x"), iri("a"))?,
                Set::new().with(var("x"), iri("b"))?,
            ],
        );
        let mut grouped = GroupMultiset::group_by(contents, &[])?;
        assert_eq!(grouped.len(), 1);
        let mut empty = GroupMultiset::new(Multiset::empty());
        let id = empty.add_implicit_group();
        assert_eq!(empty.group(id).map(|g| g.members().len()), Some(0));
        grouped.add_implicit_group();
        assert_eq!(grouped.len(), 2);
        Ok(())
    }
}
