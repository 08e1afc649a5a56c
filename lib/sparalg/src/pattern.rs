use crate::dataset::DatasetTriple;
use crate::expression::Expression;
use crate::set::Set;
use oxrdf::{BlankNode, Literal, NamedNode, Term, Variable};
use std::fmt;

/// The subject, predicate or object of a [`TriplePattern`]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TermPattern {
    Term(Term),
    Variable(Variable),
}

impl TermPattern {
    #[inline]
    pub fn variable(&self) -> Option<&Variable> {
        match self {
            Self::Variable(v) => Some(v),
            Self::Term(_) => None,
        }
    }

    #[inline]
    pub fn term(&self) -> Option<&Term> {
        match self {
            Self::Term(t) => Some(t),
            Self::Variable(_) => None,
        }
    }

    /// The term the pattern stands for in a solution: the constant itself or the variable value
    #[inline]
    pub fn resolve<'a>(&'a self, set: &'a Set) -> Option<&'a Term> {
        match self {
            Self::Term(t) => Some(t),
            Self::Variable(v) => set.get(v),
        }
    }
}

impl fmt::Display for TermPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Term(t) => t.fmt(f),
            Self::Variable(v) => v.fmt(f),
        }
    }
}

impl From<Variable> for TermPattern {
    #[inline]
    fn from(variable: Variable) -> Self {
        Self::Variable(variable)
    }
}

impl From<Term> for TermPattern {
    #[inline]
    fn from(term: Term) -> Self {
        Self::Term(term)
    }
}

impl From<NamedNode> for TermPattern {
    #[inline]
    fn from(node: NamedNode) -> Self {
        Self::Term(node.into())
    }
}

impl From<BlankNode> for TermPattern {
    #[inline]
    fn from(node: BlankNode) -> Self {
        Self::Term(node.into())
    }
}

impl From<Literal> for TermPattern {
    #[inline]
    fn from(literal: Literal) -> Self {
        Self::Term(literal.into())
    }
}

/// A [triple pattern](https://www.w3.org/TR/sparql11-query/#defn_TriplePattern)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TriplePattern {
    pub subject: TermPattern,
    pub predicate: TermPattern,
    pub object: TermPattern,
}

impl TriplePattern {
    pub fn new(
        subject: impl Into<TermPattern>,
        predicate: impl Into<TermPattern>,
        object: impl Into<TermPattern>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }

    /// The variables of the pattern, in subject, predicate, object order and without duplicates
    pub fn variables(&self) -> Vec<Variable> {
        let mut variables = Vec::new();
        for position in [&self.subject, &self.predicate, &self.object] {
            if let Some(v) = position.variable() {
                if !variables.contains(v) {
                    variables.push(v.clone());
                }
            }
        }
        variables
    }

    /// Builds the solution binding the pattern variables to the triple terms
    ///
    /// Returns `None` if a variable repeated in the pattern matches different terms.
    pub fn bind(&self, triple: DatasetTriple) -> Option<Set> {
        let mut set = Set::new();
        for (position, term) in [
            (&self.subject, triple.subject),
            (&self.predicate, triple.predicate),
            (&self.object, triple.object),
        ] {
            let TermPattern::Variable(variable) = position else {
                continue;
            };
            if set.contains_variable(variable) {
                if set.get(variable) != Some(&term) {
                    return None;
                }
            } else {
                set.add(variable.clone(), Some(term)).ok()?;
            }
        }
        Some(set)
    }
}

impl fmt::Display for TriplePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)
    }
}

/// An element of a basic graph pattern
#[derive(Clone, Debug)]
pub enum BgpPattern {
    Triple(TriplePattern),
    /// A `FILTER` evaluated against the solutions accumulated so far
    Filter(Expression),
    /// A `BIND` extending the solutions accumulated so far
    Bind(Variable, Expression),
}

impl BgpPattern {
    pub fn variables(&self) -> Vec<Variable> {
        match self {
            Self::Triple(p) => p.variables(),
            Self::Filter(e) => e.variables(),
            Self::Bind(v, e) => {
                let mut variables = e.variables();
                if !variables.contains(v) {
                    variables.push(v.clone());
                }
                variables
            }
        }
    }
}

impl From<TriplePattern> for BgpPattern {
    #[inline]
    fn from(pattern: TriplePattern) -> Self {
        Self::Triple(pattern)
    }
}
