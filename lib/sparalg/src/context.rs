use crate::algebra::Algebra;
use crate::dataset::SparqlDataset;
use crate::error::QueryEvaluationError;
use crate::eval;
use crate::multiset::Multiset;
use crate::options::EvaluationOptions;
use crate::service::ServiceHandlerRegistry;
use oxrdf::NamedNode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// A token that can be used to cancel an evaluation from another thread
///
/// Cancellation can not be undone. All the clones of a token share the same state.
///
/// ```
/// use sparalg::CancellationToken;
///
/// let token = CancellationToken::new();
/// let clone = token.clone();
/// clone.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The instant after which an evaluation must stop, computed once when the evaluation starts
#[derive(Clone, Debug)]
pub struct Deadline {
    expires_at: Option<Instant>,
    token: CancellationToken,
}

impl Deadline {
    pub fn new(timeout: Option<Duration>, token: CancellationToken) -> Self {
        Self {
            expires_at: timeout.and_then(|t| Instant::now().checked_add(t)),
            token,
        }
    }

    /// A deadline that never expires and can not be cancelled
    pub fn unbounded() -> Self {
        Self::new(None, CancellationToken::new())
    }

    /// Fails if the deadline has passed or the evaluation has been cancelled
    #[inline]
    pub fn check(&self) -> Result<(), QueryEvaluationError> {
        if self.token.is_cancelled() {
            return Err(QueryEvaluationError::Cancelled);
        }
        if self.expires_at.is_some_and(|d| Instant::now() >= d) {
            return Err(QueryEvaluationError::Timeout);
        }
        Ok(())
    }

    /// Time left before the deadline, `None` if there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        Some(self.expires_at?.saturating_duration_since(Instant::now()))
    }

    #[inline]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Facts about the query the algebra has been built from
///
/// They drive the graph resolution of `GRAPH` and the number of results lazy operators have to produce.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[expect(clippy::struct_excessive_bools)]
pub struct QueryMetadata {
    /// `FROM` graphs
    pub default_graphs: Vec<NamedNode>,
    /// `FROM NAMED` graphs
    pub named_graphs: Vec<NamedNode>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub distinct: bool,
    pub group_by: bool,
    pub having: bool,
    /// The query has a top level `VALUES` clause
    pub values: bool,
    pub order_by: bool,
    /// The `ORDER BY` only uses variables in an order the data source already provides
    pub optimisable_order_by: bool,
}

impl QueryMetadata {
    #[inline]
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_named_graph(mut self, graph: impl Into<NamedNode>) -> Self {
        self.named_graphs.push(graph.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_default_graph(mut self, graph: impl Into<NamedNode>) -> Self {
        self.default_graphs.push(graph.into());
        self
    }

    /// Number of solutions lazy operators have to produce
    ///
    /// `None` means every solution is needed: the query deduplicates, groups, filters groups,
    /// has inline data or sorts in an order the data source does not provide.
    pub fn required_results(&self) -> Option<usize> {
        if self.distinct
            || self.group_by
            || self.having
            || self.values
            || (self.order_by && !self.optimisable_order_by)
        {
            return None;
        }
        Some(self.limit?.saturating_add(self.offset))
    }

    /// If the query has explicit `FROM` or `FROM NAMED` clauses
    #[inline]
    pub fn has_dataset_description(&self) -> bool {
        !self.default_graphs.is_empty() || !self.named_graphs.is_empty()
    }
}

/// The cursor threaded through the evaluation of an [`Algebra`] tree
///
/// Operators read their input from [`input`](Self::input) and evaluate their children with
/// [`evaluate_with_input`](Self::evaluate_with_input), which restores the previous input afterwards.
/// A context is never shared between concurrently evaluated subtrees, parallel operators [`fork`](Self::fork) it.
pub struct EvaluationContext<'a, D: SparqlDataset + ?Sized> {
    dataset: &'a D,
    input: Arc<Multiset>,
    output: Option<Multiset>,
    deadline: Deadline,
    options: &'a EvaluationOptions,
    metadata: &'a QueryMetadata,
    services: &'a ServiceHandlerRegistry,
    trim_temporary_variables: bool,
    rigorous_evaluation: bool,
    required_results: Option<usize>,
}

impl<'a, D: SparqlDataset + ?Sized> EvaluationContext<'a, D> {
    pub fn new(
        dataset: &'a D,
        options: &'a EvaluationOptions,
        metadata: &'a QueryMetadata,
        services: &'a ServiceHandlerRegistry,
        deadline: Deadline,
    ) -> Self {
        Self {
            dataset,
            input: Arc::new(Multiset::Identity),
            output: None,
            deadline,
            options,
            metadata,
            services,
            trim_temporary_variables: options.trim_temporary_variables,
            rigorous_evaluation: options.rigorous_evaluation,
            required_results: metadata.required_results(),
        }
    }

    /// Evaluates an operator against the current input
    ///
    /// The result is kept as the last materialized output when partial results are allowed.
    pub fn evaluate(&mut self, algebra: &Algebra) -> Result<Multiset, QueryEvaluationError> {
        let output = eval::evaluate(algebra, self)?;
        if self.options.partial_results_on_timeout {
            self.output = Some(output.clone());
        }
        Ok(output)
    }

    /// Evaluates an operator against another input, then restores the current one
    pub fn evaluate_with_input(
        &mut self,
        algebra: &Algebra,
        input: impl Into<Arc<Multiset>>,
    ) -> Result<Multiset, QueryEvaluationError> {
        let previous = std::mem::replace(&mut self.input, input.into());
        let result = self.evaluate(algebra);
        self.input = previous;
        result
    }

    /// Fails with [`QueryEvaluationError::Timeout`] once the deadline has passed
    #[inline]
    pub fn check_timeout(&self) -> Result<(), QueryEvaluationError> {
        self.deadline.check()
    }

    /// A copy of the context for a concurrently evaluated subtree
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            dataset: self.dataset,
            input: Arc::clone(&self.input),
            output: None,
            deadline: self.deadline.clone(),
            options: self.options,
            metadata: self.metadata,
            services: self.services,
            trim_temporary_variables: self.trim_temporary_variables,
            rigorous_evaluation: self.rigorous_evaluation,
            required_results: self.required_results,
        }
    }

    /// A context sharing the dataset, deadline and options but starting from the identity input
    #[must_use]
    pub fn fresh(&self) -> Self {
        let mut context = self.fork();
        context.input = Arc::new(Multiset::Identity);
        context.trim_temporary_variables = self.options.trim_temporary_variables;
        context.rigorous_evaluation = self.options.rigorous_evaluation;
        context
    }

    #[inline]
    pub fn dataset(&self) -> &'a D {
        self.dataset
    }

    #[inline]
    pub fn input(&self) -> &Multiset {
        &self.input
    }

    #[inline]
    pub(crate) fn shared_input(&self) -> Arc<Multiset> {
        Arc::clone(&self.input)
    }

    /// The last materialized output, only tracked when partial results are allowed
    #[inline]
    pub fn output(&self) -> Option<&Multiset> {
        self.output.as_ref()
    }

    pub(crate) fn take_output(&mut self) -> Option<Multiset> {
        self.output.take()
    }

    #[inline]
    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    #[inline]
    pub fn options(&self) -> &'a EvaluationOptions {
        self.options
    }

    #[inline]
    pub fn metadata(&self) -> &'a QueryMetadata {
        self.metadata
    }

    #[inline]
    pub fn services(&self) -> &'a ServiceHandlerRegistry {
        self.services
    }

    /// If temporary variables have to be removed from BGP results
    #[inline]
    pub fn trim_temporary_variables(&self) -> bool {
        self.trim_temporary_variables
    }

    #[inline]
    pub fn rigorous_evaluation(&self) -> bool {
        self.rigorous_evaluation
    }

    /// Number of solutions lazy operators have to produce, `None` for all of them
    #[inline]
    pub fn required_results(&self) -> Option<usize> {
        self.required_results
    }

    /// Runs `f` with trimming and rigorous evaluation overridden, then restores them
    pub(crate) fn with_flags<T>(
        &mut self,
        trim_temporary_variables: bool,
        rigorous_evaluation: bool,
        f: impl FnOnce(&mut Self) -> T,
    ) -> T {
        let previous = (self.trim_temporary_variables, self.rigorous_evaluation);
        self.trim_temporary_variables = trim_temporary_variables;
        self.rigorous_evaluation = rigorous_evaluation;
        let result = f(self);
        (self.trim_temporary_variables, self.rigorous_evaluation) = previous;
        result
    }

    /// Runs `f` with another required results budget, then restores it
    pub(crate) fn with_required_results<T>(
        &mut self,
        required_results: Option<usize>,
        f: impl FnOnce(&mut Self) -> T,
    ) -> T {
        let previous = std::mem::replace(&mut self.required_results, required_results);
        let result = f(self);
        self.required_results = previous;
        result
    }
}
