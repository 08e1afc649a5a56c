use oxrdf::{Dataset, GraphName, GraphNameRef, QuadRef, Term, TermRef};
use rustc_hash::{FxHashMap, FxHashSet};
use std::convert::Infallible;
use std::error::Error;
use std::iter::empty;
use std::sync::{Mutex, PoisonError};
use std::thread::{self, ThreadId};

/// A triple returned by a [`SparqlDataset`]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DatasetTriple {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

/// A [RDF dataset](https://www.w3.org/TR/sparql11-query/#rdfDataset) the algebra is evaluated against
///
/// Triple lookups are done against the *active graph*, that `GRAPH` changes through
/// [`set_active_graph`](Self::set_active_graph) and [`reset_active_graph`](Self::reset_active_graph).
/// The active graph is a per thread stack: a rayon worker starts from the default graph and has to
/// re-establish the one of its parent, see [`ActiveGraphGuard`].
pub trait SparqlDataset: Send + Sync {
    /// Error returned by the dataset.
    type Error: Error + Send + Sync + 'static;

    /// Fetches the triples of the active graph matching a pattern, `None` matches anything
    fn triples_for_pattern<'a>(
        &'a self,
        subject: Option<&'a Term>,
        predicate: Option<&'a Term>,
        object: Option<&'a Term>,
    ) -> Box<dyn Iterator<Item = Result<DatasetTriple, Self::Error>> + 'a>;

    /// Returns if the active graph contains the triple
    fn contains_triple(
        &self,
        subject: &Term,
        predicate: &Term,
        object: &Term,
    ) -> Result<bool, Self::Error> {
        Ok(self
            .triples_for_pattern(Some(subject), Some(predicate), Some(object))
            .next()
            .transpose()?
            .is_some())
    }

    /// Fetches the list of dataset named graphs
    fn named_graphs(&self) -> Box<dyn Iterator<Item = Result<GraphName, Self::Error>> + '_>;

    /// Returns if the dataset contains a given graph, the default graph always exists
    fn has_graph(&self, graph_name: &GraphName) -> Result<bool, Self::Error> {
        if graph_name.is_default_graph() {
            return Ok(true);
        }
        for graph in self.named_graphs() {
            if graph? == *graph_name {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The graphs whose merge is the active graph of the current thread
    fn active_graph(&self) -> Vec<GraphName>;

    /// Makes the merge of the given graphs the active graph of the current thread
    fn set_active_graph(&self, graphs: Vec<GraphName>);

    /// Restores the active graph in place before the last [`set_active_graph`](Self::set_active_graph)
    ///
    /// Does nothing if there is nothing to restore.
    fn reset_active_graph(&self);
}

/// Sets the active graph of a dataset and resets it when dropped, including on error or unwind
#[must_use]
pub struct ActiveGraphGuard<'a, D: SparqlDataset + ?Sized> {
    dataset: &'a D,
}

impl<'a, D: SparqlDataset + ?Sized> ActiveGraphGuard<'a, D> {
    pub fn new(dataset: &'a D, graphs: Vec<GraphName>) -> Self {
        dataset.set_active_graph(graphs);
        Self { dataset }
    }
}

impl<D: SparqlDataset + ?Sized> Drop for ActiveGraphGuard<'_, D> {
    fn drop(&mut self) {
        self.dataset.reset_active_graph();
    }
}

/// A [`SparqlDataset`] backed by an in-memory [`oxrdf::Dataset`]
///
/// ```
/// use oxrdf::{Dataset, GraphName, NamedNode, Quad};
/// use sparalg::{InMemoryDataset, SparqlDataset};
///
/// let ex = NamedNode::new("http://example.com")?;
/// let mut dataset = Dataset::new();
/// dataset.insert(&Quad::new(ex.clone(), ex.clone(), ex.clone(), ex.clone()));
/// let dataset = InMemoryDataset::new(dataset);
///
/// // Nothing in the default graph
/// assert_eq!(dataset.triples_for_pattern(None, None, None).count(), 0);
/// dataset.set_active_graph(vec![GraphName::from(ex.clone())]);
/// assert_eq!(dataset.triples_for_pattern(None, None, None).count(), 1);
/// dataset.reset_active_graph();
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
pub struct InMemoryDataset {
    dataset: Dataset,
    default_graph: Vec<GraphName>,
    active_graphs: Mutex<FxHashMap<ThreadId, Vec<Vec<GraphName>>>>,
}

impl InMemoryDataset {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            default_graph: vec![GraphName::DefaultGraph],
            active_graphs: Mutex::default(),
        }
    }

    /// Uses the merge of the given graphs as default graph
    #[must_use]
    pub fn with_default_graph(mut self, graphs: Vec<GraphName>) -> Self {
        self.default_graph = graphs;
        self
    }

    #[inline]
    pub fn inner(&self) -> &Dataset {
        &self.dataset
    }

    fn quads_for_pattern<'a>(
        &'a self,
        subject: Option<&'a Term>,
        predicate: Option<&'a Term>,
        object: Option<&'a Term>,
        graph_name: GraphNameRef<'a>,
    ) -> Box<dyn Iterator<Item = DatasetTriple> + 'a> {
        let candidates: Box<dyn Iterator<Item = QuadRef<'a>> + 'a> = match subject {
            Some(Term::NamedNode(s)) => Box::new(self.dataset.quads_for_subject(s.as_ref())),
            Some(Term::BlankNode(s)) => Box::new(self.dataset.quads_for_subject(s.as_ref())),
            Some(Term::Literal(_)) => return Box::new(empty()),
            None => {
                if let Some(object) = object {
                    Box::new(self.dataset.quads_for_object(object.as_ref()))
                } else if let Some(predicate) = predicate {
                    let Term::NamedNode(predicate) = predicate else {
                        return Box::new(empty());
                    };
                    Box::new(self.dataset.quads_for_predicate(predicate.as_ref()))
                } else {
                    Box::new(self.dataset.quads_for_graph_name(graph_name))
                }
            }
        };
        Box::new(
            candidates
                .filter(move |q| {
                    q.graph_name == graph_name
                        && predicate.is_none_or(|p| TermRef::from(q.predicate) == p.as_ref())
                        && object.is_none_or(|o| q.object == o.as_ref())
                })
                .map(|q| DatasetTriple {
                    subject: TermRef::from(q.subject).into_owned(),
                    predicate: q.predicate.into_owned().into(),
                    object: q.object.into_owned(),
                }),
        )
    }

    /// The graph name borrowed from the dataset, `None` if the dataset has no such graph
    fn graph_name_ref(&self, graph_name: &GraphName) -> Option<GraphNameRef<'_>> {
        if graph_name.is_default_graph() {
            return Some(GraphNameRef::DefaultGraph);
        }
        self.dataset
            .quads_for_graph_name(graph_name.as_ref())
            .next()
            .map(|q| q.graph_name)
    }

    fn with_stack<T>(&self, f: impl FnOnce(&mut Vec<Vec<GraphName>>) -> T) -> T {
        let mut active_graphs = self
            .active_graphs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = thread::current().id();
        let stack = active_graphs.entry(id).or_default();
        let result = f(stack);
        if stack.is_empty() {
            active_graphs.remove(&id);
        }
        result
    }
}

impl SparqlDataset for InMemoryDataset {
    type Error = Infallible;

    fn triples_for_pattern<'a>(
        &'a self,
        subject: Option<&'a Term>,
        predicate: Option<&'a Term>,
        object: Option<&'a Term>,
    ) -> Box<dyn Iterator<Item = Result<DatasetTriple, Infallible>> + 'a> {
        let graphs = self
            .active_graph()
            .iter()
            .filter_map(|graph| self.graph_name_ref(graph))
            .collect::<Vec<_>>();
        if let [graph] = graphs.as_slice() {
            return Box::new(
                self.quads_for_pattern(subject, predicate, object, *graph)
                    .map(Ok),
            );
        }
        let mut seen = FxHashSet::default();
        Box::new(
            graphs
                .into_iter()
                .flat_map(move |graph| self.quads_for_pattern(subject, predicate, object, graph))
                .filter(move |triple| seen.insert(triple.clone()))
                .map(Ok),
        )
    }

    fn named_graphs(&self) -> Box<dyn Iterator<Item = Result<GraphName, Infallible>> + '_> {
        let mut seen = FxHashSet::default();
        Box::new(
            self.dataset
                .iter()
                .filter(|q| !q.graph_name.is_default_graph())
                .map(|q| q.graph_name.into_owned())
                .filter(move |g| seen.insert(g.clone()))
                .map(Ok),
        )
    }

    fn has_graph(&self, graph_name: &GraphName) -> Result<bool, Infallible> {
        Ok(graph_name.is_default_graph()
            || self
                .dataset
                .quads_for_graph_name(graph_name.as_ref())
                .next()
                .is_some())
    }

    fn active_graph(&self) -> Vec<GraphName> {
        self.with_stack(|stack| stack.last().cloned())
            .unwrap_or_else(|| self.default_graph.clone())
    }

    fn set_active_graph(&self, graphs: Vec<GraphName>) {
        self.with_stack(|stack| stack.push(graphs));
    }

    fn reset_active_graph(&self) {
        self.with_stack(|stack| {
            stack.pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::{NamedNode, Quad};

    fn ex(name: &str) -> NamedNode {
        NamedNode::new_unchecked(format!("http://example.com/{name}"))
    }

    fn dataset() -> InMemoryDataset {
        let mut dataset = Dataset::new();
        dataset.insert(&Quad::new(ex("a"), ex("p"), ex("b"), GraphName::DefaultGraph));
        dataset.insert(&Quad::new(ex("a"), ex("p"), ex("c"), ex("g1")));
        dataset.insert(&Quad::new(ex("a"), ex("p"), ex("b"), ex("g2")));
        InMemoryDataset::new(dataset)
    }

    #[test]
    fn pattern_lookup_in_default_graph() {
        let dataset = dataset();
        let p = Term::from(ex("p"));
        let b = Term::from(ex("b"));
        assert_eq!(dataset.triples_for_pattern(None, Some(&p), None).count(), 1);
        assert_eq!(dataset.triples_for_pattern(None, None, Some(&b)).count(), 1);
        assert!(
            dataset
                .contains_triple(&ex("a").into(), &p, &b)
                .unwrap_or(false)
        );
    }

    #[test]
    fn guard_restores_the_active_graph() {
        let dataset = dataset();
        {
            let _guard = ActiveGraphGuard::new(&dataset, vec![ex("g1").into()]);
            assert_eq!(dataset.active_graph(), [GraphName::from(ex("g1"))]);
            {
                let _inner = ActiveGraphGuard::new(&dataset, vec![ex("g2").into()]);
                assert_eq!(dataset.active_graph(), [GraphName::from(ex("g2"))]);
            }
            assert_eq!(dataset.active_graph(), [GraphName::from(ex("g1"))]);
        }
        assert_eq!(dataset.active_graph(), [GraphName::DefaultGraph]);
        dataset.reset_active_graph();
        assert_eq!(dataset.active_graph(), [GraphName::DefaultGraph]);
    }

    #[test]
    fn merged_graphs_are_deduplicated() {
        let dataset = dataset();
        let _guard = ActiveGraphGuard::new(
            &dataset,
            vec![GraphName::DefaultGraph, ex("g1").into(), ex("g2").into()],
        );
        assert_eq!(dataset.triples_for_pattern(None, None, None).count(), 2);
    }

    #[test]
    fn pattern_lookup_is_lazy() {
        let dataset = dataset();
        let _guard = ActiveGraphGuard::new(
            &dataset,
            vec![ex("g3").into(), ex("g2").into(), ex("g1").into()],
        );
        let mut triples = dataset.triples_for_pattern(None, None, None);
        assert!(matches!(
            triples.next(),
            Some(Ok(t)) if t.object == Term::from(ex("b"))
        ));
        assert_eq!(triples.count(), 1);
    }

    #[test]
    fn named_graphs() {
        let dataset = dataset();
        let graphs = dataset
            .named_graphs()
            .collect::<Result<Vec<_>, _>>()
            .unwrap_or_default();
        assert_eq!(graphs.len(), 2);
        assert!(dataset.has_graph(&ex("g1").into()).unwrap_or(false));
        assert!(!dataset.has_graph(&ex("g3").into()).unwrap_or(true));
    }
}
