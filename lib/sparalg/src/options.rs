use std::time::Duration;

/// Options driving the algebra evaluation
///
/// They replace ambient global switches: each evaluation gets its own copy threaded through the
/// [`EvaluationContext`](crate::EvaluationContext).
///
/// # Example
///
/// ```
/// use sparalg::EvaluationOptions;
/// use std::time::Duration;
///
/// // Strict options for public endpoints
/// let options = EvaluationOptions::strict();
///
/// // Or custom ones
/// let custom = EvaluationOptions {
///     timeout: Some(Duration::from_secs(10)),
///     use_parallel_evaluation: true,
///     ..EvaluationOptions::default()
/// };
/// assert!(options.partial_results_on_timeout && !custom.partial_results_on_timeout);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
#[expect(clippy::struct_excessive_bools)]
pub struct EvaluationOptions {
    /// Maximum evaluation time
    ///
    /// The deadline is computed once when the evaluation starts.
    /// Default: 30 seconds
    pub timeout: Option<Duration>,

    /// If the top-level `SELECT`/`ASK` should return the last materialized results
    /// instead of failing when the timeout is exceeded
    ///
    /// Default: `false`
    pub partial_results_on_timeout: bool,

    /// Allows products, `ParallelJoin` and `ParallelUnion` to fan out on the rayon thread pool
    ///
    /// Default: `false`
    pub use_parallel_evaluation: bool,

    /// Forces property paths to be evaluated through the generic step evaluation
    /// instead of the single predicate fast path
    ///
    /// Default: `false`
    pub rigorous_evaluation: bool,

    /// If variables used internally (blank nodes, intermediate path nodes) are removed from BGP results
    ///
    /// Default: `true`
    pub trim_temporary_variables: bool,

    /// Number of input solutions sent in one `SERVICE` request
    ///
    /// Default: 100
    pub service_batch_size: usize,

    /// Maximum number of steps of an arbitrary length property path traversal
    ///
    /// Default: 1,000 steps
    pub max_path_depth: Option<usize>,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            partial_results_on_timeout: false,
            use_parallel_evaluation: false,
            rigorous_evaluation: false,
            trim_temporary_variables: true,
            service_batch_size: 100,
            max_path_depth: Some(1_000),
        }
    }
}

impl EvaluationOptions {
    /// Creates a new instance with the default options
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options suitable for public endpoints
    ///
    /// - Timeout: 5 seconds, partial results are returned on timeout
    /// - Max path depth: 100
    #[must_use]
    pub fn strict() -> Self {
        Self {
            timeout: Some(Duration::from_secs(5)),
            partial_results_on_timeout: true,
            max_path_depth: Some(100),
            ..Self::default()
        }
    }

    /// Options suitable for trusted internal queries
    ///
    /// - Timeout: 5 minutes
    /// - Parallel evaluation enabled
    /// - Max path depth: 10,000
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            timeout: Some(Duration::from_secs(300)),
            use_parallel_evaluation: true,
            max_path_depth: Some(10_000),
            ..Self::default()
        }
    }

    /// Disables all limits
    ///
    /// Use with caution - only for trusted queries or local development.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            timeout: None,
            max_path_depth: None,
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_partial_results_on_timeout(mut self) -> Self {
        self.partial_results_on_timeout = true;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_parallel_evaluation(mut self) -> Self {
        self.use_parallel_evaluation = true;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_rigorous_evaluation(mut self) -> Self {
        self.rigorous_evaluation = true;
        self
    }

    /// Keeps temporary variables in BGP results
    #[inline]
    #[must_use]
    pub fn without_trimming(mut self) -> Self {
        self.trim_temporary_variables = false;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_service_batch_size(mut self, size: usize) -> Self {
        self.service_batch_size = size.max(1);
        self
    }
}
