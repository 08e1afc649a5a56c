#![doc = include_str!("../README.md")]
#![doc(test(attr(deny(warnings))))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod aggregate;
mod algebra;
mod bgp;
mod context;
mod dataset;
mod error;
mod eval;
mod expression;
mod function;
mod group;
mod join;
mod multiset;
mod options;
mod path;
mod pattern;
mod service;
mod set;

pub use crate::aggregate::{
    AccumulatorFactory, Aggregate, AggregateFunction, AggregateFunctionAccumulator,
    CustomAggregate,
};
pub use crate::algebra::{Algebra, DisjointPair, Optimiser, OrderComparator, TriplePatterns};
pub use crate::context::{CancellationToken, Deadline, EvaluationContext, QueryMetadata};
pub use crate::dataset::{ActiveGraphGuard, DatasetTriple, InMemoryDataset, SparqlDataset};
pub use crate::error::{ExpressionError, QueryEvaluationError};
pub use crate::expression::{CustomFunction, Expression, ExpressionTerm, cmp_terms};
pub use crate::function::{PropertyFunction, PropertyFunctionContext};
pub use crate::group::{BindingGroup, GroupKey, GroupMultiset};
pub use crate::multiset::{
    Bag, Multiset, PartitionedMultiset, SetId, TEMPORARY_VARIABLE_PREFIX, is_temporary_variable,
};
pub use crate::options::EvaluationOptions;
pub use crate::path::PropertyPath;
pub use crate::pattern::{BgpPattern, TermPattern, TriplePattern};
pub use crate::service::{DefaultServiceHandler, ServiceHandler, ServiceHandlerRegistry};
pub use crate::set::Set;
use oxrdf::{GraphName, NamedNode};
use tracing::{debug, debug_span};

/// Evaluates an [`Algebra`] tree against a [`SparqlDataset`]
///
/// The evaluator holds everything that does not depend on the query: the options, the
/// `SERVICE` handlers and an optional cancellation token.
///
/// ```
/// use oxrdf::{Dataset, GraphName, NamedNode, Quad, Variable};
/// use sparalg::{Algebra, AlgebraEvaluator, InMemoryDataset, QueryMetadata, TriplePattern};
///
/// let ex = NamedNode::new("http://example.com")?;
/// let dataset = InMemoryDataset::new(Dataset::from_iter([Quad::new(
///     ex.clone(),
///     ex.clone(),
///     ex.clone(),
///     GraphName::DefaultGraph,
/// )]));
/// let s = Variable::new("s")?;
/// let algebra = Algebra::Bgp(vec![
///     TriplePattern::new(s.clone(), ex.clone(), ex.clone()).into(),
/// ]);
/// let results = AlgebraEvaluator::new().evaluate(&dataset, &algebra, &QueryMetadata::default())?;
/// assert_eq!(results.len(), 1);
/// assert_eq!(results.sets().next().and_then(|set| set.get(&s)), Some(&ex.into()));
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
#[derive(Clone, Default)]
pub struct AlgebraEvaluator {
    options: EvaluationOptions,
    service_handler: ServiceHandlerRegistry,
    cancellation_token: Option<CancellationToken>,
}

impl AlgebraEvaluator {
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_options(mut self, options: EvaluationOptions) -> Self {
        self.options = options;
        self
    }

    #[inline]
    pub fn options(&self) -> &EvaluationOptions {
        &self.options
    }

    /// Use a given [`ServiceHandler`] to execute [SPARQL 1.1 Federated Query](https://www.w3.org/TR/sparql11-federated-query/) SERVICE calls.
    ///
    /// See [`ServiceHandler`] for an example.
    #[inline]
    #[must_use]
    pub fn with_service_handler(
        mut self,
        service_name: impl Into<NamedNode>,
        handler: impl ServiceHandler + 'static,
    ) -> Self {
        self.service_handler = self
            .service_handler
            .with_handler(service_name.into(), handler);
        self
    }

    /// Use a given [`DefaultServiceHandler`] to execute [SPARQL 1.1 Federated Query](https://www.w3.org/TR/sparql11-federated-query/) SERVICE calls if no explicit service handler is defined for the service.
    #[inline]
    #[must_use]
    pub fn with_default_service_handler(
        mut self,
        handler: impl DefaultServiceHandler + 'static,
    ) -> Self {
        self.service_handler = self.service_handler.with_default_handler(handler);
        self
    }

    #[inline]
    #[must_use]
    pub fn has_default_service_handler(&self) -> bool {
        self.service_handler.has_default_handler()
    }

    /// Inject a cancellation token to the evaluation.
    ///
    /// This might be used to abort a long-running evaluation from another thread.
    ///
    /// ```
    /// use oxrdf::{Dataset, GraphName, NamedNode, Quad};
    /// use sparalg::{
    ///     Algebra, AlgebraEvaluator, CancellationToken, InMemoryDataset, QueryEvaluationError,
    ///     QueryMetadata,
    /// };
    ///
    /// let ex = NamedNode::new("http://example.com")?;
    /// let dataset = InMemoryDataset::new(Dataset::from_iter([Quad::new(
    ///     ex.clone(),
    ///     ex.clone(),
    ///     ex.clone(),
    ///     GraphName::DefaultGraph,
    /// )]));
    /// let cancellation_token = CancellationToken::new();
    /// let evaluator = AlgebraEvaluator::new().with_cancellation_token(cancellation_token.clone());
    /// cancellation_token.cancel();
    /// assert!(matches!(
    ///     evaluator.evaluate(&dataset, &Algebra::AskAnyTriples, &QueryMetadata::default()),
    ///     Err(QueryEvaluationError::Cancelled)
    /// ));
    /// # Result::<_, Box<dyn std::error::Error>>::Ok(())
    /// ```
    #[must_use]
    pub fn with_cancellation_token(mut self, cancellation_token: CancellationToken) -> Self {
        self.cancellation_token = Some(cancellation_token);
        self
    }

    /// Evaluates the algebra against the dataset
    ///
    /// The `FROM` graphs of the metadata, if any, become the active graph for the whole evaluation.
    /// When [`EvaluationOptions::partial_results_on_timeout`] is set, a top level `SELECT`, `ASK`
    /// or `DISTINCT` that exceeds the timeout returns the last solutions materialized before the
    /// deadline instead of failing. These are the output of the last sub-operator that completed,
    /// wherever it sits in the tree, shaped like the output of the top level operator: they only
    /// carry the bindings that sub-operator produced and the other projected variables are unbound.
    pub fn evaluate<D: SparqlDataset + ?Sized>(
        &self,
        dataset: &D,
        algebra: &Algebra,
        metadata: &QueryMetadata,
    ) -> Result<Multiset, QueryEvaluationError> {
        let span = debug_span!(
            "evaluate",
            parallel = self.options.use_parallel_evaluation,
            timeout = ?self.options.timeout
        );
        let _enter = span.enter();
        let deadline = Deadline::new(
            self.options.timeout,
            self.cancellation_token.clone().unwrap_or_default(),
        );
        let _guard = (!metadata.default_graphs.is_empty()).then(|| {
            ActiveGraphGuard::new(
                dataset,
                metadata
                    .default_graphs
                    .iter()
                    .cloned()
                    .map(GraphName::from)
                    .collect(),
            )
        });
        let mut context = EvaluationContext::new(
            dataset,
            &self.options,
            metadata,
            &self.service_handler,
            deadline,
        );
        match context.evaluate(algebra) {
            Err(QueryEvaluationError::Timeout) if self.options.partial_results_on_timeout => {
                let partial = context.take_output().unwrap_or(Multiset::Null);
                let Some(results) = absorb_timeout(algebra, partial) else {
                    return Err(QueryEvaluationError::Timeout);
                };
                debug!(
                    "The evaluation timed out, returning {} partial results",
                    results.len()
                );
                Ok(results)
            }
            result => result,
        }
    }
}

/// Shapes the last materialized solutions like the output of the top level operator
///
/// `partial` is the output of the last sub-operator evaluated before the deadline, not a prefix of
/// the top level operator output. Only `SELECT`, `ASK` and `DISTINCT` accept partial results.
fn absorb_timeout(algebra: &Algebra, partial: Multiset) -> Option<Multiset> {
    match algebra {
        Algebra::Select { inner, projection } => {
            Some(eval::project(partial, inner, projection.as_deref()))
        }
        Algebra::Ask { .. } => Some(if partial.is_empty() {
            Multiset::Null
        } else {
            Multiset::Identity
        }),
        Algebra::Distinct { inner, .. } => {
            let mut results = absorb_timeout(inner, partial)?;
            results.deduplicate();
            Some(results)
        }
        _ => None,
    }
}
