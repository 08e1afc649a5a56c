use crate::context::{Deadline, EvaluationContext, QueryMetadata};
use crate::dataset::{DatasetTriple, SparqlDataset};
use crate::error::QueryEvaluationError;
use crate::multiset::Multiset;
use crate::options::EvaluationOptions;
use oxrdf::{NamedNode, Term, Variable};
use std::fmt;

/// A property function (sometimes called "magic property"): a predicate computed by code
/// instead of being matched against the dataset
///
/// The function gets the solutions of the pattern it is attached to and returns the
/// transformed solutions.
///
/// ```
/// use oxrdf::{Dataset, Literal, NamedNode, Variable};
/// use sparalg::{
///     Algebra, AlgebraEvaluator, InMemoryDataset, Multiset, PropertyFunction,
///     PropertyFunctionContext, QueryEvaluationError, QueryMetadata, Set,
/// };
/// use std::sync::Arc;
///
/// /// Binds ?n to the number of input solutions
/// struct CountSolutions(NamedNode);
///
/// impl PropertyFunction for CountSolutions {
///     fn name(&self) -> &NamedNode {
///         &self.0
///     }
///
///     fn evaluate(
///         &self,
///         input: Multiset,
///         _context: &PropertyFunctionContext<'_>,
///     ) -> Result<Multiset, QueryEvaluationError> {
///         let n = Variable::new_unchecked("n");
///         let count = i64::try_from(input.len()).unwrap_or(i64::MAX);
///         Ok(Multiset::from_sets([n.clone()], [Set::new().with(n, Literal::from(count))?]))
///     }
/// }
///
/// let algebra = Algebra::PropertyFunction {
///     inner: Box::new(Algebra::Bgp(Vec::new())),
///     function: Arc::new(CountSolutions(NamedNode::new("http://example.com/count")?)),
/// };
/// let results = AlgebraEvaluator::new().evaluate(
///     &InMemoryDataset::new(Dataset::new()),
///     &algebra,
///     &QueryMetadata::default(),
/// )?;
/// assert_eq!(
///     results.sets().next().and_then(|s| s.get(&Variable::new_unchecked("n")).cloned()),
///     Some(Literal::from(1).into())
/// );
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
pub trait PropertyFunction: Send + Sync {
    /// The IRI the function is registered under
    fn name(&self) -> &NamedNode;

    /// The variables the function may bind, used for scope computation
    fn variables(&self) -> Vec<Variable> {
        Vec::new()
    }

    fn evaluate(
        &self,
        input: Multiset,
        context: &PropertyFunctionContext<'_>,
    ) -> Result<Multiset, QueryEvaluationError>;
}

impl fmt::Debug for dyn PropertyFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PropertyFunction").field(self.name()).finish()
    }
}

/// What a [`PropertyFunction`] sees of the evaluation: the active graph, the deadline and the options
pub struct PropertyFunctionContext<'a> {
    lookup: &'a dyn TripleLookup,
    deadline: &'a Deadline,
    options: &'a EvaluationOptions,
    metadata: &'a QueryMetadata,
}

impl<'a> PropertyFunctionContext<'a> {
    /// Fetches the triples of the active graph matching a pattern, `None` matches anything
    pub fn triples_for_pattern(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
    ) -> Result<Vec<DatasetTriple>, QueryEvaluationError> {
        self.lookup.triples(subject, predicate, object)
    }

    #[inline]
    pub fn check_timeout(&self) -> Result<(), QueryEvaluationError> {
        self.deadline.check()
    }

    #[inline]
    pub fn options(&self) -> &'a EvaluationOptions {
        self.options
    }

    #[inline]
    pub fn metadata(&self) -> &'a QueryMetadata {
        self.metadata
    }
}

trait TripleLookup {
    fn triples(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
    ) -> Result<Vec<DatasetTriple>, QueryEvaluationError>;
}

struct DatasetLookup<'a, D: SparqlDataset + ?Sized>(&'a D);

impl<D: SparqlDataset + ?Sized> TripleLookup for DatasetLookup<'_, D> {
    fn triples(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
    ) -> Result<Vec<DatasetTriple>, QueryEvaluationError> {
        self.0
            .triples_for_pattern(subject, predicate, object)
            .map(|t| t.map_err(QueryEvaluationError::dataset))
            .collect()
    }
}

/// Hands `input` to the function with a view of the current evaluation
pub(crate) fn evaluate_property_function<D: SparqlDataset + ?Sized>(
    function: &dyn PropertyFunction,
    input: Multiset,
    context: &EvaluationContext<'_, D>,
) -> Result<Multiset, QueryEvaluationError> {
    let lookup = DatasetLookup(context.dataset());
    let view = PropertyFunctionContext {
        lookup: &lookup,
        deadline: context.deadline(),
        options: context.options(),
        metadata: context.metadata(),
    };
    function.evaluate(input, &view)
}
