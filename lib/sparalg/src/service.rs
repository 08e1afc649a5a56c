use crate::algebra::Algebra;
use crate::error::QueryEvaluationError;
use crate::set::Set;
use oxrdf::NamedNode;
use rustc_hash::FxHashMap;
use std::error::Error;
use std::sync::Arc;

/// Handler for [SPARQL 1.1 Federated Query](https://www.w3.org/TR/sparql11-federated-query/) SERVICEs.
///
/// Should be given to [`AlgebraEvaluator::with_service_handler`](super::AlgebraEvaluator::with_service_handler)
/// before evaluating an algebra that uses SERVICE calls.
///
/// The handler gets the pattern to evaluate, a chunk of the input solutions restricted to the
/// pattern variables (a `VALUES` block) and the number of solutions the query needs, if known.
///
/// Note that you can also use [`DefaultServiceHandler`] if you need to handle any service and not a specific one.
///
/// ```
/// use oxrdf::{Dataset, Literal, NamedNode, Variable};
/// use sparalg::{Algebra, AlgebraEvaluator, InMemoryDataset, QueryMetadata, ServiceHandler, Set};
/// use std::convert::Infallible;
///
/// struct TestServiceHandler {}
///
/// impl ServiceHandler for TestServiceHandler {
///     type Error = Infallible;
///
///     fn handle(
///         &self,
///         _pattern: &Algebra,
///         _bindings: &[Set],
///         _limit: Option<usize>,
///     ) -> Result<Vec<Set>, Self::Error> {
///         // Always return a single binding foo -> 1
///         let mut solution = Set::new();
///         solution.add(Variable::new_unchecked("foo"), Some(Literal::from(1).into())).ok();
///         Ok(vec![solution])
///     }
/// }
///
/// let service = NamedNode::new("http://example.com/service")?;
/// let evaluator = AlgebraEvaluator::new().with_service_handler(service.clone(), TestServiceHandler {});
/// let algebra = Algebra::Service {
///     inner: Box::new(Algebra::Bgp(Vec::new())),
///     name: service.into(),
///     silent: false,
/// };
/// let results = evaluator.evaluate(
///     &InMemoryDataset::new(Dataset::new()),
///     &algebra,
///     &QueryMetadata::default(),
/// )?;
/// assert_eq!(
///     results.sets().next().and_then(|s| s.get(&Variable::new_unchecked("foo")).cloned()),
///     Some(Literal::from(1).into())
/// );
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
pub trait ServiceHandler: Send + Sync {
    /// The service evaluation error.
    type Error: Error + Send + Sync + 'static;

    /// Evaluates an [`Algebra`] against the service.
    fn handle(
        &self,
        pattern: &Algebra,
        bindings: &[Set],
        limit: Option<usize>,
    ) -> Result<Vec<Set>, Self::Error>;
}

/// Default handler for [SPARQL 1.1 Federated Query](https://www.w3.org/TR/sparql11-federated-query/) SERVICEs.
///
/// Should be given to [`AlgebraEvaluator::with_default_service_handler`](super::AlgebraEvaluator::with_default_service_handler)
/// before evaluating an algebra that uses SERVICE calls.
///
/// Note that you can also use [`ServiceHandler`] if you need to handle a single service and not any service.
pub trait DefaultServiceHandler: Send + Sync {
    /// The service evaluation error.
    type Error: Error + Send + Sync + 'static;

    /// Evaluates an [`Algebra`] against a given service identified by a [`NamedNode`].
    fn handle(
        &self,
        service_name: &NamedNode,
        pattern: &Algebra,
        bindings: &[Set],
        limit: Option<usize>,
    ) -> Result<Vec<Set>, Self::Error>;
}

#[derive(Clone, Default)]
pub struct ServiceHandlerRegistry {
    default: Option<Arc<dyn DefaultServiceHandler<Error = QueryEvaluationError>>>,
    handlers: FxHashMap<NamedNode, Arc<dyn ServiceHandler<Error = QueryEvaluationError>>>,
}

impl ServiceHandlerRegistry {
    #[must_use]
    pub fn with_handler(
        mut self,
        service_name: NamedNode,
        handler: impl ServiceHandler + 'static,
    ) -> Self {
        self.handlers.insert(
            service_name,
            Arc::new(ErrorConversionServiceHandler(handler)),
        );
        self
    }

    #[must_use]
    pub fn with_default_handler(mut self, default: impl DefaultServiceHandler + 'static) -> Self {
        self.default = Some(Arc::new(ErrorConversionServiceHandler(default)));
        self
    }

    pub fn has_default_handler(&self) -> bool {
        self.default.is_some()
    }

    pub fn handle(
        &self,
        service_name: &NamedNode,
        pattern: &Algebra,
        bindings: &[Set],
        limit: Option<usize>,
    ) -> Result<Vec<Set>, QueryEvaluationError> {
        if let Some(handler) = self.handlers.get(service_name) {
            return handler.handle(pattern, bindings, limit);
        }
        if let Some(default) = &self.default {
            return default.handle(service_name, pattern, bindings, limit);
        }
        Err(QueryEvaluationError::UnsupportedService(
            service_name.clone(),
        ))
    }
}

struct ErrorConversionServiceHandler<S>(S);

impl<S: ServiceHandler> ServiceHandler for ErrorConversionServiceHandler<S> {
    type Error = QueryEvaluationError;

    fn handle(
        &self,
        pattern: &Algebra,
        bindings: &[Set],
        limit: Option<usize>,
    ) -> Result<Vec<Set>, QueryEvaluationError> {
        self.0
            .handle(pattern, bindings, limit)
            .map_err(wrap_service_error)
    }
}

impl<S: DefaultServiceHandler> DefaultServiceHandler for ErrorConversionServiceHandler<S> {
    type Error = QueryEvaluationError;

    fn handle(
        &self,
        service_name: &NamedNode,
        pattern: &Algebra,
        bindings: &[Set],
        limit: Option<usize>,
    ) -> Result<Vec<Set>, QueryEvaluationError> {
        self.0
            .handle(service_name, pattern, bindings, limit)
            .map_err(wrap_service_error)
    }
}

fn wrap_service_error(error: impl Error + Send + Sync + 'static) -> QueryEvaluationError {
    let error: Box<dyn Error + Send + Sync> = Box::new(error);
    match error.downcast() {
        Ok(error) => *error,
        Err(error) => QueryEvaluationError::Service(error),
    }
}
