//! The operators an algebra tree is built from.

use crate::aggregate::Aggregate;
use crate::error::QueryEvaluationError;
use crate::expression::Expression;
use crate::function::PropertyFunction;
use crate::group::GroupKey;
use crate::path::PropertyPath;
use crate::pattern::{BgpPattern, TermPattern, TriplePattern};
use crate::set::Set;
use oxrdf::{NamedNode, Variable};
use std::sync::Arc;

/// A SPARQL algebra operator
///
/// Most operators read their input solutions from the evaluation context: a [`Join`](Self::Join)
/// evaluates its right side against the solutions of its left side.
///
/// Every operator exposes its variable scope without being evaluated: the variables it mentions
/// ([`variables`](Self::variables)), the ones bound in every solution it produces
/// ([`fixed_variables`](Self::fixed_variables)) and the ones that may be left unbound
/// ([`floating_variables`](Self::floating_variables)).
#[derive(Clone, Debug)]
pub enum Algebra {
    /// A [basic graph pattern](https://www.w3.org/TR/sparql11-query/#BasicGraphPatterns),
    /// possibly interleaved with filters and binds
    Bgp(Vec<BgpPattern>),
    /// A basic graph pattern evaluated until a first solution is found
    AskBgp(TriplePatterns),
    /// A basic graph pattern evaluated until enough solutions for the query are found
    LazyBgp(TriplePatterns),
    /// [Join](https://www.w3.org/TR/sparql11-query/#defn_algJoin)
    Join { left: Box<Self>, right: Box<Self> },
    /// [LeftJoin](https://www.w3.org/TR/sparql11-query/#defn_algLeftJoin)
    LeftJoin {
        left: Box<Self>,
        right: Box<Self>,
        filter: Option<Expression>,
    },
    /// [Union](https://www.w3.org/TR/sparql11-query/#defn_algUnion)
    Union { left: Box<Self>, right: Box<Self> },
    /// A union that only evaluates its right side if the left one has no solution
    AskUnion { left: Box<Self>, right: Box<Self> },
    /// A union that only evaluates its right side if the left one does not produce enough solutions
    LazyUnion { left: Box<Self>, right: Box<Self> },
    /// [Minus](https://www.w3.org/TR/sparql11-query/#defn_algMinus)
    Minus { left: Box<Self>, right: Box<Self> },
    /// `FILTER EXISTS` if `must_exist`, `FILTER NOT EXISTS` otherwise
    ExistsJoin {
        left: Box<Self>,
        right: Box<Self>,
        must_exist: bool,
    },
    /// A join of variable disjoint sides that may be evaluated concurrently
    ParallelJoin(DisjointPair),
    /// A union of variable disjoint sides that may be evaluated concurrently
    ParallelUnion(DisjointPair),
    /// [Filter](https://www.w3.org/TR/sparql11-query/#defn_algFilter)
    Filter {
        inner: Box<Self>,
        expression: Expression,
    },
    /// [Extend](https://www.w3.org/TR/sparql11-query/#defn_extend)
    Extend {
        inner: Box<Self>,
        variable: Variable,
        expression: Expression,
    },
    /// [Group](https://www.w3.org/TR/sparql11-query/#defn_algGroup) followed by the aggregations
    GroupBy {
        inner: Box<Self>,
        keys: Vec<GroupKey>,
        aggregates: Vec<(Variable, Aggregate)>,
    },
    /// A filter on the groups of a [`GroupBy`](Self::GroupBy)
    Having {
        inner: Box<Self>,
        expression: Expression,
    },
    /// [OrderBy](https://www.w3.org/TR/sparql11-query/#defn_algOrdered)
    OrderBy {
        inner: Box<Self>,
        comparators: Vec<OrderComparator>,
    },
    /// [Distinct](https://www.w3.org/TR/sparql11-query/#defn_algDistinct)
    Distinct {
        inner: Box<Self>,
        trim_temporary_variables: bool,
    },
    /// [Reduced](https://www.w3.org/TR/sparql11-query/#defn_algReduced)
    Reduced { inner: Box<Self> },
    /// [Slice](https://www.w3.org/TR/sparql11-query/#defn_algSlice)
    Slice {
        inner: Box<Self>,
        offset: usize,
        limit: Option<usize>,
    },
    /// [Projection](https://www.w3.org/TR/sparql11-query/#defn_algProjection), `None` is `SELECT *`
    Select {
        inner: Box<Self>,
        projection: Option<Vec<Variable>>,
    },
    /// `ASK`: Identity if the inner operator has a solution, Null otherwise
    Ask { inner: Box<Self> },
    /// `GRAPH`, the name is an IRI or a variable
    Graph { inner: Box<Self>, name: TermPattern },
    /// [Service](https://www.w3.org/TR/sparql11-federated-query/#defn_evalService)
    Service {
        inner: Box<Self>,
        name: TermPattern,
        silent: bool,
    },
    /// Inline data (`VALUES`)
    Bindings {
        variables: Vec<Variable>,
        rows: Vec<Set>,
    },
    /// An operator without solutions declaring some variables
    Null { variables: Vec<Variable> },
    /// A nested query, evaluated independently of the outer solutions and joined afterwards
    SubQuery(Box<Self>),
    /// `SELECT DISTINCT ?g WHERE { GRAPH ?g { ?s ?p ?o } }`
    SelectDistinctGraphs { variable: Variable },
    /// `ASK WHERE { ?s ?p ?o }`
    AskAnyTriples,
    /// Paths of length zero between two nodes
    ZeroLengthPath {
        subject: TermPattern,
        path: PropertyPath,
        object: TermPattern,
    },
    /// `path+`
    OneOrMorePath {
        subject: TermPattern,
        path: PropertyPath,
        object: TermPattern,
    },
    /// `path*`
    ZeroOrMorePath {
        subject: TermPattern,
        path: PropertyPath,
        object: TermPattern,
    },
    /// `path?`
    ZeroOrOnePath {
        subject: TermPattern,
        path: PropertyPath,
        object: TermPattern,
    },
    /// `!(p1|p2)`, or `^!(p1|p2)` if `inverse`
    NegatedPropertySet {
        subject: TermPattern,
        object: TermPattern,
        predicates: Vec<NamedNode>,
        inverse: bool,
    },
    /// A property path, evaluated by translation to the other operators
    PropertyPath {
        subject: TermPattern,
        path: PropertyPath,
        object: TermPattern,
    },
    /// A [`PropertyFunction`] applied to the solutions of the inner operator
    PropertyFunction {
        inner: Box<Self>,
        function: Arc<dyn PropertyFunction>,
    },
}

/// The triple patterns of a [`Algebra::AskBgp`] or [`Algebra::LazyBgp`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TriplePatterns {
    patterns: Vec<TriplePattern>,
}

impl TriplePatterns {
    /// Fails if the patterns contain a `FILTER` or a `BIND`
    pub fn new(patterns: Vec<BgpPattern>) -> Result<Self, QueryEvaluationError> {
        patterns
            .into_iter()
            .map(|pattern| match pattern {
                BgpPattern::Triple(pattern) => Ok(pattern),
                BgpPattern::Filter(_) | BgpPattern::Bind(..) => {
                    Err(QueryEvaluationError::InvalidAlgebra(
                        "lazy and ask BGPs can only contain triple patterns".into(),
                    ))
                }
            })
            .collect::<Result<_, _>>()
            .map(|patterns| Self { patterns })
    }

    #[inline]
    pub fn patterns(&self) -> &[TriplePattern] {
        &self.patterns
    }

    fn variables(&self) -> Vec<Variable> {
        let mut variables = Vec::new();
        for pattern in &self.patterns {
            extend_unique(&mut variables, pattern.variables());
        }
        variables
    }
}

impl From<Vec<TriplePattern>> for TriplePatterns {
    #[inline]
    fn from(patterns: Vec<TriplePattern>) -> Self {
        Self { patterns }
    }
}

/// The sides of a [`Algebra::ParallelJoin`] or [`Algebra::ParallelUnion`], which share no variable
#[derive(Clone, Debug)]
pub struct DisjointPair {
    left: Box<Algebra>,
    right: Box<Algebra>,
}

impl DisjointPair {
    pub fn new(left: Algebra, right: Algebra) -> Result<Self, QueryEvaluationError> {
        let right_variables = right.variables();
        if let Some(shared) = left
            .variables()
            .into_iter()
            .find(|v| right_variables.contains(v))
        {
            return Err(QueryEvaluationError::InvalidAlgebra(format!(
                "the sides of a parallel operator share the variable {shared}"
            )));
        }
        Ok(Self {
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    #[inline]
    pub fn left(&self) -> &Algebra {
        &self.left
    }

    #[inline]
    pub fn right(&self) -> &Algebra {
        &self.right
    }
}

/// An `ORDER BY` condition
#[derive(Clone, Debug)]
pub struct OrderComparator {
    pub expression: Expression,
    pub descending: bool,
}

impl OrderComparator {
    pub fn asc(expression: impl Into<Expression>) -> Self {
        Self {
            expression: expression.into(),
            descending: false,
        }
    }

    pub fn desc(expression: impl Into<Expression>) -> Self {
        Self {
            expression: expression.into(),
            descending: true,
        }
    }
}

/// A rewriting applied to every operator of a tree by [`Algebra::transform`]
pub trait Optimiser {
    fn optimise(&mut self, algebra: Algebra) -> Algebra;

    /// If the optimiser has to be applied to an operator
    fn is_applicable(&self, _algebra: &Algebra) -> bool {
        true
    }
}

struct Scope {
    fixed: Vec<Variable>,
    floating: Vec<Variable>,
}

impl Scope {
    fn new(fixed: Vec<Variable>, floating: Vec<Variable>) -> Self {
        let floating = floating
            .into_iter()
            .filter(|v| !fixed.contains(v))
            .collect::<Vec<_>>();
        let mut scope = Self {
            fixed: Vec::new(),
            floating: Vec::new(),
        };
        extend_unique(&mut scope.fixed, fixed);
        extend_unique(&mut scope.floating, floating);
        scope
    }

    fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    fn fixed(variables: Vec<Variable>) -> Self {
        Self::new(variables, Vec::new())
    }
}

impl Algebra {
    pub fn join(left: Self, right: Self) -> Self {
        Self::Join {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn left_join(left: Self, right: Self, filter: Option<Expression>) -> Self {
        Self::LeftJoin {
            left: Box::new(left),
            right: Box::new(right),
            filter,
        }
    }

    pub fn union(left: Self, right: Self) -> Self {
        Self::Union {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Fails if the patterns contain a `FILTER` or a `BIND`
    pub fn ask_bgp(patterns: Vec<BgpPattern>) -> Result<Self, QueryEvaluationError> {
        TriplePatterns::new(patterns).map(Self::AskBgp)
    }

    /// Fails if the patterns contain a `FILTER` or a `BIND`
    pub fn lazy_bgp(patterns: Vec<BgpPattern>) -> Result<Self, QueryEvaluationError> {
        TriplePatterns::new(patterns).map(Self::LazyBgp)
    }

    /// Fails if the sides share a variable
    pub fn parallel_join(left: Self, right: Self) -> Result<Self, QueryEvaluationError> {
        DisjointPair::new(left, right).map(Self::ParallelJoin)
    }

    /// Fails if the sides share a variable
    pub fn parallel_union(left: Self, right: Self) -> Result<Self, QueryEvaluationError> {
        DisjointPair::new(left, right).map(Self::ParallelUnion)
    }

    /// All the variables the operator mentions, in order of first appearance
    pub fn variables(&self) -> Vec<Variable> {
        match self {
            Self::Bgp(patterns) => {
                let mut variables = Vec::new();
                for pattern in patterns {
                    extend_unique(&mut variables, pattern.variables());
                }
                variables
            }
            Self::AskBgp(patterns) | Self::LazyBgp(patterns) => patterns.variables(),
            Self::Join { left, right }
            | Self::LeftJoin { left, right, .. }
            | Self::Union { left, right }
            | Self::AskUnion { left, right }
            | Self::LazyUnion { left, right }
            | Self::Minus { left, right }
            | Self::ExistsJoin { left, right, .. }
            | Self::ParallelJoin(DisjointPair { left, right })
            | Self::ParallelUnion(DisjointPair { left, right }) => {
                let mut variables = left.variables();
                extend_unique(&mut variables, right.variables());
                variables
            }
            Self::Filter { inner, .. }
            | Self::Having { inner, .. }
            | Self::OrderBy { inner, .. }
            | Self::Distinct { inner, .. }
            | Self::Reduced { inner }
            | Self::Slice { inner, .. }
            | Self::Service { inner, .. }
            | Self::SubQuery(inner)
            | Self::Select {
                inner,
                projection: None,
            } => inner.variables(),
            Self::Extend {
                inner, variable, ..
            } => {
                let mut variables = inner.variables();
                extend_unique(&mut variables, [variable.clone()]);
                variables
            }
            Self::GroupBy {
                keys, aggregates, ..
            } => {
                let mut variables = keys
                    .iter()
                    .filter_map(|k| k.variable.clone())
                    .collect::<Vec<_>>();
                extend_unique(&mut variables, aggregates.iter().map(|(v, _)| v.clone()));
                variables
            }
            Self::Select {
                projection: Some(projection),
                ..
            } => projection.clone(),
            Self::Ask { .. } | Self::AskAnyTriples => Vec::new(),
            Self::Graph { inner, name } => {
                let mut variables = inner.variables();
                extend_unique(&mut variables, name.variable().cloned());
                variables
            }
            Self::Bindings { variables, .. } | Self::Null { variables } => variables.clone(),
            Self::SelectDistinctGraphs { variable } => vec![variable.clone()],
            Self::ZeroLengthPath {
                subject, object, ..
            }
            | Self::OneOrMorePath {
                subject, object, ..
            }
            | Self::ZeroOrMorePath {
                subject, object, ..
            }
            | Self::ZeroOrOnePath {
                subject, object, ..
            }
            | Self::NegatedPropertySet {
                subject, object, ..
            }
            | Self::PropertyPath {
                subject, object, ..
            } => endpoint_variables(subject, object),
            Self::PropertyFunction { inner, function } => {
                let mut variables = inner.variables();
                extend_unique(&mut variables, function.variables());
                variables
            }
        }
    }

    /// The variables bound in every solution of the operator
    pub fn fixed_variables(&self) -> Vec<Variable> {
        self.scope().fixed
    }

    /// The variables that may be unbound in some solutions of the operator
    pub fn floating_variables(&self) -> Vec<Variable> {
        self.scope().floating
    }

    fn scope(&self) -> Scope {
        match self {
            Self::Bgp(patterns) => {
                let mut fixed = Vec::new();
                let mut floating = Vec::new();
                for pattern in patterns {
                    match pattern {
                        BgpPattern::Triple(p) => extend_unique(&mut fixed, p.variables()),
                        BgpPattern::Bind(v, _) => extend_unique(&mut floating, [v.clone()]),
                        BgpPattern::Filter(_) => (),
                    }
                }
                Scope::new(fixed, floating)
            }
            Self::LazyBgp(patterns) => Scope::fixed(patterns.variables()),
            Self::AskBgp(_) | Self::Ask { .. } | Self::AskAnyTriples => Scope::empty(),
            Self::Join { left, right }
            | Self::ParallelJoin(DisjointPair { left, right }) => {
                let (left, right) = (left.scope(), right.scope());
                let mut fixed = left.fixed;
                extend_unique(&mut fixed, right.fixed);
                let mut floating = left.floating;
                extend_unique(&mut floating, right.floating);
                Scope::new(fixed, floating)
            }
            Self::LeftJoin { left, right, .. } => {
                let scope = left.scope();
                let mut floating = scope.floating;
                extend_unique(&mut floating, right.variables());
                Scope::new(scope.fixed, floating)
            }
            Self::Union { left, right }
            | Self::AskUnion { left, right }
            | Self::LazyUnion { left, right }
            | Self::ParallelUnion(DisjointPair { left, right }) => {
                let right_fixed = right.fixed_variables();
                let fixed = left
                    .fixed_variables()
                    .into_iter()
                    .filter(|v| right_fixed.contains(v))
                    .collect();
                let mut floating = left.variables();
                extend_unique(&mut floating, right.variables());
                Scope::new(fixed, floating)
            }
            Self::Minus { left, .. } | Self::ExistsJoin { left, .. } => left.scope(),
            Self::Filter { inner, .. }
            | Self::Having { inner, .. }
            | Self::OrderBy { inner, .. }
            | Self::Distinct { inner, .. }
            | Self::Reduced { inner }
            | Self::Slice { inner, .. }
            | Self::SubQuery(inner)
            | Self::Select {
                inner,
                projection: None,
            } => inner.scope(),
            Self::Extend {
                inner, variable, ..
            } => {
                let scope = inner.scope();
                let mut floating = scope.floating;
                extend_unique(&mut floating, [variable.clone()]);
                Scope::new(scope.fixed, floating)
            }
            Self::GroupBy {
                inner,
                keys,
                aggregates,
            } => {
                let inner_fixed = inner.fixed_variables();
                let (fixed, mut floating): (Vec<_>, Vec<_>) = keys
                    .iter()
                    .filter_map(|k| k.variable.clone())
                    .partition(|v| inner_fixed.contains(v));
                extend_unique(&mut floating, aggregates.iter().map(|(v, _)| v.clone()));
                Scope::new(fixed, floating)
            }
            Self::Select {
                inner,
                projection: Some(projection),
            } => {
                let inner_fixed = inner.fixed_variables();
                let (fixed, floating) = projection
                    .iter()
                    .cloned()
                    .partition(|v| inner_fixed.contains(v));
                Scope::new(fixed, floating)
            }
            Self::Graph { inner, name } => {
                let scope = inner.scope();
                let mut fixed = scope.fixed;
                extend_unique(&mut fixed, name.variable().cloned());
                Scope::new(fixed, scope.floating)
            }
            Self::Service { inner, silent, .. } => {
                if *silent {
                    Scope::new(Vec::new(), inner.variables())
                } else {
                    inner.scope()
                }
            }
            Self::Bindings { variables, rows } => {
                let (fixed, floating) = variables
                    .iter()
                    .cloned()
                    .partition(|v| rows.iter().all(|row| row.get(v).is_some()));
                Scope::new(fixed, floating)
            }
            Self::Null { variables } => Scope::fixed(variables.clone()),
            Self::SelectDistinctGraphs { variable } => Scope::fixed(vec![variable.clone()]),
            Self::ZeroLengthPath { .. }
            | Self::OneOrMorePath { .. }
            | Self::ZeroOrMorePath { .. }
            | Self::ZeroOrOnePath { .. }
            | Self::NegatedPropertySet { .. }
            | Self::PropertyPath { .. } => Scope::fixed(self.variables()),
            Self::PropertyFunction { inner, function } => {
                let scope = inner.scope();
                let mut floating = scope.floating;
                extend_unique(&mut floating, function.variables());
                Scope::new(scope.fixed, floating)
            }
        }
    }

    /// Applies the optimiser to every operator of the tree, children first
    #[must_use]
    pub fn transform(self, optimiser: &mut impl Optimiser) -> Self {
        let algebra = self.map_children(&mut |child| child.transform(optimiser));
        if optimiser.is_applicable(&algebra) {
            optimiser.optimise(algebra)
        } else {
            algebra
        }
    }

    fn map_children(self, f: &mut impl FnMut(Self) -> Self) -> Self {
        let mut map = |inner: Box<Self>| Box::new(f(*inner));
        match self {
            Self::Join { left, right } => Self::Join {
                left: map(left),
                right: map(right),
            },
            Self::LeftJoin {
                left,
                right,
                filter,
            } => Self::LeftJoin {
                left: map(left),
                right: map(right),
                filter,
            },
            Self::Union { left, right } => Self::Union {
                left: map(left),
                right: map(right),
            },
            Self::AskUnion { left, right } => Self::AskUnion {
                left: map(left),
                right: map(right),
            },
            Self::LazyUnion { left, right } => Self::LazyUnion {
                left: map(left),
                right: map(right),
            },
            Self::Minus { left, right } => Self::Minus {
                left: map(left),
                right: map(right),
            },
            Self::ExistsJoin {
                left,
                right,
                must_exist,
            } => Self::ExistsJoin {
                left: map(left),
                right: map(right),
                must_exist,
            },
            Self::ParallelJoin(DisjointPair { left, right }) => {
                let (left, right) = (*map(left), *map(right));
                // The optimiser may have made the sides overlap
                match DisjointPair::new(left.clone(), right.clone()) {
                    Ok(pair) => Self::ParallelJoin(pair),
                    Err(_) => Self::join(left, right),
                }
            }
            Self::ParallelUnion(DisjointPair { left, right }) => {
                let (left, right) = (*map(left), *map(right));
                match DisjointPair::new(left.clone(), right.clone()) {
                    Ok(pair) => Self::ParallelUnion(pair),
                    Err(_) => Self::union(left, right),
                }
            }
            Self::Filter { inner, expression } => Self::Filter {
                inner: map(inner),
                expression,
            },
            Self::Extend {
                inner,
                variable,
                expression,
            } => Self::Extend {
                inner: map(inner),
                variable,
                expression,
            },
            Self::GroupBy {
                inner,
                keys,
                aggregates,
            } => Self::GroupBy {
                inner: map(inner),
                keys,
                aggregates,
            },
            Self::Having { inner, expression } => Self::Having {
                inner: map(inner),
                expression,
            },
            Self::OrderBy { inner, comparators } => Self::OrderBy {
                inner: map(inner),
                comparators,
            },
            Self::Distinct {
                inner,
                trim_temporary_variables,
            } => Self::Distinct {
                inner: map(inner),
                trim_temporary_variables,
            },
            Self::Reduced { inner } => Self::Reduced { inner: map(inner) },
            Self::Slice {
                inner,
                offset,
                limit,
            } => Self::Slice {
                inner: map(inner),
                offset,
                limit,
            },
            Self::Select { inner, projection } => Self::Select {
                inner: map(inner),
                projection,
            },
            Self::Ask { inner } => Self::Ask { inner: map(inner) },
            Self::Graph { inner, name } => Self::Graph {
                inner: map(inner),
                name,
            },
            Self::Service {
                inner,
                name,
                silent,
            } => Self::Service {
                inner: map(inner),
                name,
                silent,
            },
            Self::SubQuery(inner) => Self::SubQuery(map(inner)),
            Self::PropertyFunction { inner, function } => Self::PropertyFunction {
                inner: map(inner),
                function,
            },
            leaf @ (Self::Bgp(_)
            | Self::AskBgp(_)
            | Self::LazyBgp(_)
            | Self::Bindings { .. }
            | Self::Null { .. }
            | Self::SelectDistinctGraphs { .. }
            | Self::AskAnyTriples
            | Self::ZeroLengthPath { .. }
            | Self::OneOrMorePath { .. }
            | Self::ZeroOrMorePath { .. }
            | Self::ZeroOrOnePath { .. }
            | Self::NegatedPropertySet { .. }
            | Self::PropertyPath { .. }) => leaf,
        }
    }
}

fn endpoint_variables(subject: &TermPattern, object: &TermPattern) -> Vec<Variable> {
    let mut variables = Vec::new();
    extend_unique(&mut variables, subject.variable().cloned());
    extend_unique(&mut variables, object.variable().cloned());
    variables
}

pub(crate) fn extend_unique(
    variables: &mut Vec<Variable>,
    new: impl IntoIterator<Item = Variable>,
) {
    for variable in new {
        if !variables.contains(&variable) {
            variables.push(variable);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::NamedNode;

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    fn triple(s: &str, o: &str) -> BgpPattern {
        TriplePattern::new(
            var(s),
            NamedNode::new_unchecked("http://example.com/p"),
            var(o),
        )
        .into()
    }

    #[test]
    fn join_scope() {
        let algebra = Algebra::join(
            Algebra::Bgp(vec![triple("a", "b")]),
            Algebra::Bgp(vec![
                triple("b", "c"),
                BgpPattern::Bind(var("d"), Expression::Variable(var("c"))),
            ]),
        );
        assert_eq!(algebra.variables(), [var("a"), var("b"), var("c"), var("d")]);
        assert_eq!(algebra.fixed_variables(), [var("a"), var("b"), var("c")]);
        assert_eq!(algebra.floating_variables(), [var("d")]);
    }

    #[test]
    fn left_join_scope() {
        let algebra = Algebra::left_join(
            Algebra::Bgp(vec![triple("s", "o")]),
            Algebra::Bgp(vec![triple("o", "o2")]),
            None,
        );
        assert_eq!(algebra.fixed_variables(), [var("s"), var("o")]);
        assert_eq!(algebra.floating_variables(), [var("o2")]);
    }

    #[test]
    fn union_scope() {
        let algebra = Algebra::union(
            Algebra::Bgp(vec![triple("a", "b")]),
            Algebra::Bgp(vec![triple("a", "c")]),
        );
        assert_eq!(algebra.fixed_variables(), [var("a")]);
        assert_eq!(algebra.floating_variables(), [var("b"), var("c")]);
    }

    #[test]
    fn minus_and_exists_keep_the_left_scope() {
        let left = Algebra::Bgp(vec![triple("a", "b")]);
        let right = Algebra::Bgp(vec![triple("b", "c")]);
        let minus = Algebra::Minus {
            left: Box::new(left.clone()),
            right: Box::new(right.clone()),
        };
        assert_eq!(minus.fixed_variables(), [var("a"), var("b")]);
        assert!(minus.floating_variables().is_empty());
        let exists = Algebra::ExistsJoin {
            left: Box::new(left),
            right: Box::new(right),
            must_exist: true,
        };
        assert_eq!(exists.fixed_variables(), [var("a"), var("b")]);
    }

    #[test]
    fn constructors_validate_their_input() {
        assert!(Algebra::lazy_bgp(vec![triple("a", "b")]).is_ok());
        assert!(matches!(
            Algebra::ask_bgp(vec![
                triple("a", "b"),
                BgpPattern::Filter(Expression::Bound(var("a")))
            ]),
            Err(QueryEvaluationError::InvalidAlgebra(_))
        ));
        assert!(
            Algebra::parallel_join(
                Algebra::Bgp(vec![triple("a", "b")]),
                Algebra::Bgp(vec![triple("c", "d")])
            )
            .is_ok()
        );
        assert!(matches!(
            Algebra::parallel_union(
                Algebra::Bgp(vec![triple("a", "b")]),
                Algebra::Bgp(vec![triple("b", "c")])
            ),
            Err(QueryEvaluationError::InvalidAlgebra(_))
        ));
    }

    #[test]
    fn select_scope() {
        let algebra = Algebra::Select {
            inner: Box::new(Algebra::left_join(
                Algebra::Bgp(vec![triple("a", "b")]),
                Algebra::Bgp(vec![triple("b", "c")]),
                None,
            )),
            projection: Some(vec![var("c"), var("a"), var("z")]),
        };
        assert_eq!(algebra.variables(), [var("c"), var("a"), var("z")]);
        assert_eq!(algebra.fixed_variables(), [var("a")]);
        assert_eq!(algebra.floating_variables(), [var("c"), var("z")]);
    }

    struct JoinToUnion {
        applied: usize,
    }

    impl Optimiser for JoinToUnion {
        fn optimise(&mut self, algebra: Algebra) -> Algebra {
            self.applied += 1;
            match algebra {
                Algebra::Join { left, right } => Algebra::Union { left, right },
                algebra => algebra,
            }
        }

        fn is_applicable(&self, algebra: &Algebra) -> bool {
            matches!(algebra, Algebra::Join { .. })
        }
    }

    #[test]
    fn transform_rewrites_bottom_up() {
        let algebra = Algebra::Filter {
            inner: Box::new(Algebra::join(
                Algebra::join(
                    Algebra::Bgp(vec![triple("a", "b")]),
                    Algebra::Bgp(vec![triple("b", "c")]),
                ),
                Algebra::Bgp(vec![triple("c", "d")]),
            )),
            expression: Expression::Bound(var("a")),
        };
        let mut optimiser = JoinToUnion { applied: 0 };
        let algebra = algebra.transform(&mut optimiser);
        assert_eq!(optimiser.applied, 2);
        let Algebra::Filter { inner, .. } = algebra else {
            panic!("the filter must be kept");
        };
        let Algebra::Union { left, .. } = *inner else {
            panic!("the outer join must be rewritten");
        };
        assert!(matches!(*left, Algebra::Union { .. }));
    }
}
