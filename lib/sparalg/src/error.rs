use oxrdf::{NamedNode, Term, Variable};
use std::convert::Infallible;
use std::error::Error;

/// An algebra evaluation error
///
/// Row-local failures are never reported through this type, see [`ExpressionError`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum QueryEvaluationError {
    /// The evaluation deadline has been exceeded
    #[error("The query execution time exceeded its timeout and has been aborted")]
    Timeout,
    /// The evaluation has been cancelled using a [`CancellationToken`](crate::CancellationToken)
    #[error("The SPARQL operation has been cancelled")]
    Cancelled,
    /// A variable has been bound twice in the same solution
    #[error("The variable {0} is already bound")]
    VariableAlreadyBound(Variable),
    /// A multiset has been used in a way its kind does not allow, e.g. adding a set to the identity multiset
    #[error("Invalid multiset operation: {0}")]
    InvalidMultisetOperation(&'static str),
    /// An operator has been built with arguments it does not support
    #[error("Invalid algebra: {0}")]
    InvalidAlgebra(String),
    /// A property path traversal went deeper than allowed
    #[error("The property path evaluation exceeded the maximal depth of {0}")]
    PathDepthExceeded(usize),
    /// The variable storing the `SERVICE` name is unbound
    #[error("The variable encoding the service name is unbound")]
    UnboundService,
    /// Invalid service name
    #[error("{0} is not a valid service name")]
    InvalidServiceName(Term),
    /// The given `SERVICE` is not supported
    #[error("The service {0} is not supported")]
    UnsupportedService(NamedNode),
    /// Error during `SERVICE` evaluation
    #[error("{0}")]
    Service(#[source] Box<dyn Error + Send + Sync>),
    /// Error from the underlying RDF dataset
    #[error(transparent)]
    Dataset(Box<dyn Error + Send + Sync>),
    #[doc(hidden)]
    #[error(transparent)]
    Unexpected(Box<dyn Error + Send + Sync>),
}

impl QueryEvaluationError {
    pub(crate) fn dataset(error: impl Error + Send + Sync + 'static) -> Self {
        Self::Dataset(Box::new(error))
    }

    /// Returns `true` if the error is caused by the evaluation deadline
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl From<Infallible> for QueryEvaluationError {
    #[inline]
    fn from(error: Infallible) -> Self {
        match error {}
    }
}

/// An error raised while evaluating an expression against a single solution
///
/// Operators turn it into an unbound value or a dropped row, it never aborts a query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ExpressionError {
    /// The expression refers to a variable that is not bound in the solution
    #[error("The variable {0} is not bound")]
    UnboundVariable(Variable),
    /// An operand has a type the operation does not support
    #[error("Type error: {0}")]
    TypeError(&'static str),
    /// A numeric operation overflowed or divided by zero
    #[error("Numeric overflow or division by zero")]
    NumericOverflow,
    /// A custom function returned no value
    #[error("The custom function {0} failed")]
    CustomFunction(NamedNode),
    /// An aggregate could not be computed
    #[error("The aggregate could not be computed")]
    Aggregate,
}
