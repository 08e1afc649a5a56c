use crate::error::QueryEvaluationError;
use oxrdf::{Term, Variable};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;

/// A solution: a partial mapping from variables to RDF terms
///
/// A variable may be present but unbound. Once a variable is present it can not be added again,
/// derived solutions are built with [`join`](Self::join) or by copying.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Set {
    values: BTreeMap<Variable, Option<Term>>,
}

/// The set without any variable
pub(crate) static EMPTY_SET: Set = Set {
    values: BTreeMap::new(),
};

impl Set {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable to the set
    ///
    /// Fails if the variable is already present, even when unbound.
    pub fn add(&mut self, variable: Variable, value: Option<Term>) -> Result<(), QueryEvaluationError> {
        match self.values.entry(variable) {
            Entry::Vacant(e) => {
                e.insert(value);
                Ok(())
            }
            Entry::Occupied(e) => Err(QueryEvaluationError::VariableAlreadyBound(e.key().clone())),
        }
    }

    /// Builder flavour of [`add`](Self::add)
    pub fn with(mut self, variable: Variable, value: impl Into<Term>) -> Result<Self, QueryEvaluationError> {
        self.add(variable, Some(value.into()))?;
        Ok(self)
    }

    /// The value bound to the variable if any
    #[inline]
    pub fn get(&self, variable: &Variable) -> Option<&Term> {
        self.values.get(variable)?.as_ref()
    }

    /// If the variable is present, bound or not
    #[inline]
    pub fn contains_variable(&self, variable: &Variable) -> bool {
        self.values.contains_key(variable)
    }

    #[inline]
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.values.keys()
    }

    /// Bound variables and their values
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&Variable, &Term)> {
        self.values
            .iter()
            .filter_map(|(k, v)| Some((k, v.as_ref()?)))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns `true` iff for every variable, one side is unbound or both sides agree
    pub fn is_compatible_with<'a>(
        &self,
        other: &Self,
        variables: impl IntoIterator<Item = &'a Variable>,
    ) -> bool {
        variables
            .into_iter()
            .all(|v| match (self.get(v), other.get(v)) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            })
    }

    /// Returns `true` iff at least one of the variables is bound to the same term on both sides
    ///
    /// `MINUS` only removes solutions sharing an actual binding, this is checked on top of compatibility.
    pub fn is_minus_compatible_with<'a>(
        &self,
        other: &Self,
        variables: impl IntoIterator<Item = &'a Variable>,
    ) -> bool {
        variables
            .into_iter()
            .any(|v| matches!((self.get(v), other.get(v)), (Some(a), Some(b)) if a == b))
    }

    /// Builds a new set with the bindings of both sets
    ///
    /// A variable unbound on one side takes the value of the other side.
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        let mut values = self.values.clone();
        for (variable, value) in &other.values {
            match values.entry(variable.clone()) {
                Entry::Vacant(e) => {
                    e.insert(value.clone());
                }
                Entry::Occupied(mut e) => {
                    if e.get().is_none() && value.is_some() {
                        e.insert(value.clone());
                    }
                }
            }
        }
        Self { values }
    }

    /// Removes the variables for which `predicate` returns `true`
    pub fn trim(&mut self, mut predicate: impl FnMut(&Variable) -> bool) {
        self.values.retain(|k, _| !predicate(k));
    }

    /// Keeps only the given variables
    pub(crate) fn project(&self, variables: &[Variable]) -> Self {
        Self {
            values: variables
                .iter()
                .filter_map(|v| Some((v.clone(), self.values.get(v)?.clone())))
                .collect(),
        }
    }

    /// Makes sure the variable is present, unbound if it was missing
    pub(crate) fn ensure_variable(&mut self, variable: &Variable) {
        self.values.entry(variable.clone()).or_insert(None);
    }

    /// The values of the given variables, `None` when unbound
    pub(crate) fn key<'a>(&'a self, variables: &'a [Variable]) -> Vec<Option<&'a Term>> {
        variables.iter().map(|v| self.get(v)).collect()
    }
}

impl fmt::Debug for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.values
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_ref().map(ToString::to_string))),
            )
            .finish()
    }
}

impl fmt::Display for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (variable, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if let Some(value) = value {
                write!(f, "{variable} = {value}")?;
            } else {
                write!(f, "{variable} = UNDEF")?;
            }
        }
        f.write_str("}")
    }
}

impl FromIterator<(Variable, Option<Term>)> for Set {
    /// Builds a set, later occurrences of a variable are ignored
    fn from_iter<I: IntoIterator<Item = (Variable, Option<Term>)>>(iter: I) -> Self {
        let mut values = BTreeMap::new();
        for (k, v) in iter {
            values.entry(k).or_insert(v);
        }
        Self { values }
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
    fn add_twice_fails() {
        let mut set = Set::new();
        set.add(var("x"), None).unwrap();
        assert!(matches!(
            set.add(var("x"), Some(iri("a"))),
            Err(QueryEvaluationError::VariableAlreadyBound(v)) if v == var("x")
        ));
    }

    #[test]
    fn compatibility() {
        let a = Set::new().with(var("x"), iri("a")).unwrap();
        let b = Set::new().with(var("x"), iri("b")).unwrap();
        let unbound = Set::from_iter([(var("x"), None)]);
        let vars = [var("x")];
        assert!(!a.is_compatible_with(&b, &vars));
        assert!(a.is_compatible_with(&unbound, &vars));
        assert!(a.is_compatible_with(&a.clone(), &vars));
    }

    #[test]
    fn minus_compatibility_requires_a_shared_binding() {
        let a = Set::new().with(var("x"), iri("a")).unwrap();
        let unbound = Set::from_iter([(var("x"), None)]);
        let vars = [var("x")];
        assert!(a.is_minus_compatible_with(&a.clone(), &vars));
        assert!(!a.is_minus_compatible_with(&unbound, &vars));
    }

    #[test]
    fn join_prefers_bound_values() {
        let a = Set::from_iter([(var("x"), None), (var("y"), Some(iri("y")))]);
        let b = Set::new().with(var("x"), iri("x")).unwrap();
        let joined = a.join(&b);
        assert_eq!(joined.get(&var("x")), Some(&iri("x")));
        assert_eq!(joined.get(&var("y")), Some(&iri("y")));
        assert_eq!(joined.len(), 2);
    }

    #[test]
    fn trim_removes_matching_variables() {
        let mut set = Set::new()
            .with(var("x"), iri("x"))
            .unwrap()
            .with(var("_:b0"), iri("b"))
            .unwrap();
        set.trim(|v| v.as_str().starts_with("_:"));
        assert_eq!(set.variables().collect::<Vec<_>>(), [&var("x")]);
    }
}
