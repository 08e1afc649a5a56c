use crate::error::ExpressionError;
use crate::expression::{
    Expression, add_numeric, build_plain_literal, cmp_terms, divide_numeric, string_and_language,
};
use crate::multiset::{Multiset, SetId};
use oxrdf::{Literal, NamedNode, Term};
use rustc_hash::FxHashSet;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// A trait for custom aggregate function implementation.
///
/// The accumulator accumulates values using the [`accumulate`](Self::accumulate) method
/// and returns a final aggregated value (or an error) using [`finish`](Self::finish).
///
/// ```
/// use oxrdf::{Literal, NamedNode, Term, Variable};
/// use sparalg::{Aggregate, AggregateFunction, AggregateFunctionAccumulator, CustomAggregate};
/// use std::mem::take;
///
/// struct ConcatAccumulator {
///     value: String,
/// }
///
/// impl AggregateFunctionAccumulator for ConcatAccumulator {
///     fn accumulate(&mut self, element: Term) {
///         if let Term::Literal(v) = element {
///             if !self.value.is_empty() {
///                 self.value.push(' ');
///             }
///             self.value.push_str(v.value());
///         }
///     }
///
///     fn finish(&mut self) -> Option<Term> {
///         Some(Literal::new_simple_literal(take(&mut self.value)).into())
///     }
/// }
///
/// let concat = CustomAggregate::new(NamedNode::new("http://example.com/concat")?, || {
///     Box::new(ConcatAccumulator {
///         value: String::new(),
///     })
/// });
/// let aggregate = Aggregate::new(AggregateFunction::Custom(concat), Variable::new("v")?);
/// assert!(!aggregate.distinct);
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
pub trait AggregateFunctionAccumulator {
    fn accumulate(&mut self, element: Term);
    fn finish(&mut self) -> Option<Term>;
}

/// Builds a fresh accumulator for each group
pub type AccumulatorFactory =
    Arc<dyn (Fn() -> Box<dyn AggregateFunctionAccumulator + Send + Sync>) + Send + Sync>;

/// A named custom aggregate
#[derive(Clone)]
pub struct CustomAggregate {
    name: NamedNode,
    factory: AccumulatorFactory,
}

impl CustomAggregate {
    pub fn new(
        name: NamedNode,
        factory: impl Fn() -> Box<dyn AggregateFunctionAccumulator + Send + Sync>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            name,
            factory: Arc::new(factory),
        }
    }

    #[inline]
    pub fn name(&self) -> &NamedNode {
        &self.name
    }
}

impl fmt::Debug for CustomAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomAggregate")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// An aggregate function
#[derive(Clone, Debug)]
pub enum AggregateFunction {
    /// [Count](https://www.w3.org/TR/sparql11-query/#defn_aggCount)
    Count,
    /// [Sum](https://www.w3.org/TR/sparql11-query/#defn_aggSum)
    Sum,
    /// [Avg](https://www.w3.org/TR/sparql11-query/#defn_aggAvg)
    Avg,
    /// [Min](https://www.w3.org/TR/sparql11-query/#defn_aggMin)
    Min,
    /// [Max](https://www.w3.org/TR/sparql11-query/#defn_aggMax)
    Max,
    /// [GroupConcat](https://www.w3.org/TR/sparql11-query/#defn_aggGroupConcat), the separator defaults to a space
    GroupConcat { separator: Option<String> },
    /// [Sample](https://www.w3.org/TR/sparql11-query/#defn_aggSample)
    Sample,
    Custom(CustomAggregate),
}

/// An aggregate computed over the members of a group
///
/// `expression` is `None` only for `COUNT(*)`.
#[derive(Clone, Debug)]
pub struct Aggregate {
    pub function: AggregateFunction,
    pub expression: Option<Expression>,
    pub distinct: bool,
}

impl Aggregate {
    pub fn new(function: AggregateFunction, expression: impl Into<Expression>) -> Self {
        Self {
            function,
            expression: Some(expression.into()),
            distinct: false,
        }
    }

    /// `COUNT(*)`
    pub fn count_solutions() -> Self {
        Self {
            function: AggregateFunction::Count,
            expression: None,
            distinct: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Computes the aggregate over the given solutions of the multiset
    ///
    /// Solutions for which the expression fails are skipped by `COUNT` and `SAMPLE`
    /// and make the other functions fail.
    pub fn evaluate(&self, multiset: &Multiset, ids: &[SetId]) -> Result<Term, ExpressionError> {
        let Some(expression) = &self.expression else {
            return Ok(count_literal(self.count_solutions_of(multiset, ids)));
        };
        let mut seen = FxHashSet::default();
        let mut values = Vec::with_capacity(ids.len());
        let mut failed = false;
        for set in ids.iter().filter_map(|id| multiset.get(*id)) {
            match expression.evaluate(set) {
                Ok(value) => {
                    if !self.distinct || seen.insert(value.clone()) {
                        values.push(value);
                    }
                }
                Err(_) => failed = true,
            }
        }
        match &self.function {
            AggregateFunction::Count => return Ok(count_literal(values.len())),
            AggregateFunction::Sample => {
                return values.into_iter().next().ok_or(ExpressionError::Aggregate);
            }
            _ if failed => return Err(ExpressionError::Aggregate),
            _ => (),
        }
        let mut accumulator = self.accumulator();
        for value in values {
            accumulator.accumulate(value);
        }
        accumulator.finish().ok_or(ExpressionError::Aggregate)
    }

    fn count_solutions_of(&self, multiset: &Multiset, ids: &[SetId]) -> usize {
        if !self.distinct {
            return ids.len();
        }
        let variables = multiset.variables();
        ids.iter()
            .filter_map(|id| multiset.get(*id))
            .map(|set| set.key(variables))
            .collect::<FxHashSet<_>>()
            .len()
    }

    fn accumulator(&self) -> Box<dyn AggregateFunctionAccumulator + Send + Sync> {
        match &self.function {
            AggregateFunction::Count | AggregateFunction::Sample => {
                Box::<SampleAccumulator>::default()
            }
            AggregateFunction::Sum => Box::<SumAccumulator>::default(),
            AggregateFunction::Avg => Box::<AvgAccumulator>::default(),
            AggregateFunction::Min => Box::new(ExtremumAccumulator::new(Ordering::Less)),
            AggregateFunction::Max => Box::new(ExtremumAccumulator::new(Ordering::Greater)),
            AggregateFunction::GroupConcat { separator } => Box::new(GroupConcatAccumulator::new(
                separator.clone().unwrap_or_else(|| " ".into()),
            )),
            AggregateFunction::Custom(custom) => (custom.factory)(),
        }
    }
}

fn count_literal(count: usize) -> Term {
    Literal::from(i64::try_from(count).unwrap_or(i64::MAX)).into()
}

#[derive(Default)]
struct SampleAccumulator {
    value: Option<Term>,
}

impl AggregateFunctionAccumulator for SampleAccumulator {
    fn accumulate(&mut self, element: Term) {
        if self.value.is_none() {
            self.value = Some(element);
        }
    }

    fn finish(&mut self) -> Option<Term> {
        self.value.take()
    }
}

struct SumAccumulator {
    sum: Option<Term>,
}

impl Default for SumAccumulator {
    fn default() -> Self {
        Self {
            sum: Some(Literal::from(0_i64).into()),
        }
    }
}

impl AggregateFunctionAccumulator for SumAccumulator {
    fn accumulate(&mut self, element: Term) {
        if let Some(sum) = self.sum.take() {
            self.sum = add_numeric(sum, element).ok();
        }
    }

    fn finish(&mut self) -> Option<Term> {
        self.sum.take()
    }
}

#[derive(Default)]
struct AvgAccumulator {
    sum: SumAccumulator,
    count: i64,
}

impl AggregateFunctionAccumulator for AvgAccumulator {
    fn accumulate(&mut self, element: Term) {
        self.sum.accumulate(element);
        self.count += 1;
    }

    fn finish(&mut self) -> Option<Term> {
        let sum = self.sum.finish()?;
        if self.count == 0 {
            return Some(Literal::from(0_i64).into());
        }
        divide_numeric(sum, Literal::from(self.count).into()).ok()
    }
}

/// `MIN` or `MAX`, using the `ORDER BY` total order
struct ExtremumAccumulator {
    value: Option<Term>,
    keep: Ordering,
}

impl ExtremumAccumulator {
    fn new(keep: Ordering) -> Self {
        Self { value: None, keep }
    }
}

impl AggregateFunctionAccumulator for ExtremumAccumulator {
    fn accumulate(&mut self, element: Term) {
        if self
            .value
            .as_ref()
            .is_none_or(|current| cmp_terms(Some(&element), Some(current)) == self.keep)
        {
            self.value = Some(element);
        }
    }

    fn finish(&mut self) -> Option<Term> {
        self.value.take()
    }
}

#[expect(clippy::option_option)]
struct GroupConcatAccumulator {
    concat: Option<String>,
    language: Option<Option<String>>,
    separator: String,
}

impl GroupConcatAccumulator {
    fn new(separator: String) -> Self {
        Self {
            concat: Some(String::new()),
            language: None,
            separator,
        }
    }
}

impl AggregateFunctionAccumulator for GroupConcatAccumulator {
    fn accumulate(&mut self, element: Term) {
        let Some(concat) = self.concat.as_mut() else {
            return;
        };
        let Some((value, e_language)) = string_and_language(&element) else {
            self.concat = None;
            return;
        };
        if let Some(lang) = &self.language {
            if *lang != e_language {
                self.language = Some(None);
            }
            concat.push_str(&self.separator);
        } else {
            self.language = Some(e_language);
        }
        concat.push_str(&value);
    }

    fn finish(&mut self) -> Option<Term> {
        self.concat
            .take()
            .map(|result| build_plain_literal(result, self.language.take().flatten()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::set::Set;
    use oxrdf::Variable;
    use oxsdatatypes::Decimal;

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    fn numbers(values: &[i64]) -> Multiset {
        Multiset::from_sets(
            [var("v")],
            values.iter().map(|v| {
                Set::from_iter([(var("v"), Some(Term::from(Literal::from(*v))))])
            }),
        )
    }

    fn all_ids(multiset: &Multiset) -> Vec<SetId> {
        multiset.ids().collect()
    }

    #[test]
    fn count_and_count_distinct() {
        let multiset = numbers(&[1, 2, 2]);
        let ids = all_ids(&multiset);
        assert_eq!(
            Aggregate::count_solutions().evaluate(&multiset, &ids),
            Ok(Literal::from(3_i64).into())
        );
        assert_eq!(
            Aggregate::new(AggregateFunction::Count, var("v"))
                .distinct()
                .evaluate(&multiset, &ids),
            Ok(Literal::from(2_i64).into())
        );
        assert_eq!(
            Aggregate::count_solutions().distinct().evaluate(&multiset, &ids),
            Ok(Literal::from(2_i64).into())
        );
    }

    #[test]
    fn sum_and_avg() {
        let multiset = numbers(&[1, 2, 3]);
        let ids = all_ids(&multiset);
        assert_eq!(
            Aggregate::new(AggregateFunction::Sum, var("v")).evaluate(&multiset, &ids),
            Ok(Literal::from(6_i64).into())
        );
        assert_eq!(
            Aggregate::new(AggregateFunction::Avg, var("v")).evaluate(&multiset, &ids),
            Ok(Literal::from(Decimal::from(2)).into())
        );
        assert_eq!(
            Aggregate::new(AggregateFunction::Avg, var("v")).evaluate(&multiset, &[]),
            Ok(Literal::from(0_i64).into())
        );
    }

    #[test]
    fn sum_of_a_non_numeric_value_fails() {
        let mut multiset = numbers(&[1]);
        let _ = multiset.add(Set::from_iter([(
            var("v"),
            Some(Literal::new_simple_literal("foo").into()),
        )]));
        let ids = all_ids(&multiset);
        assert_eq!(
            Aggregate::new(AggregateFunction::Sum, var("v")).evaluate(&multiset, &ids),
            Err(ExpressionError::Aggregate)
        );
    }

    #[test]
    fn unbound_values_are_skipped_by_count_only() {
        let mut multiset = numbers(&[4, 7]);
        let _ = multiset.add(Set::from_iter([(var("v"), None)]));
        let ids = all_ids(&multiset);
        assert_eq!(
            Aggregate::new(AggregateFunction::Count, var("v")).evaluate(&multiset, &ids),
            Ok(Literal::from(2_i64).into())
        );
        assert_eq!(
            Aggregate::new(AggregateFunction::Sample, var("v")).evaluate(&multiset, &ids),
            Ok(Literal::from(4_i64).into())
        );
        assert!(
            Aggregate::new(AggregateFunction::Max, var("v"))
                .evaluate(&multiset, &ids)
                .is_err()
        );
    }

    #[test]
    fn min_max() {
        let multiset = numbers(&[5, 2, 9]);
        let ids = all_ids(&multiset);
        assert_eq!(
            Aggregate::new(AggregateFunction::Min, var("v")).evaluate(&multiset, &ids),
            Ok(Literal::from(2_i64).into())
        );
        assert_eq!(
            Aggregate::new(AggregateFunction::Max, var("v")).evaluate(&multiset, &ids),
            Ok(Literal::from(9_i64).into())
        );
    }

    #[test]
    fn group_concat() {
        let multiset = Multiset::from_sets(
            [var("v")],
            ["a", "b"].into_iter().map(|v| {
                Set::from_iter([(
                    var("v"),
                    Some(Term::from(Literal::new_language_tagged_literal_unchecked(
                        v, "en",
                    ))),
                )])
            }),
        );
        let ids = all_ids(&multiset);
        assert_eq!(
            Aggregate::new(
                AggregateFunction::GroupConcat {
                    separator: Some(", ".into())
                },
                var("v")
            )
            .evaluate(&multiset, &ids),
            Ok(Literal::new_language_tagged_literal_unchecked("a, b", "en").into())
        );
    }

    #[test]
    fn custom_aggregate() {
        struct Last(Option<Term>);

        impl AggregateFunctionAccumulator for Last {
            fn accumulate(&mut self, element: Term) {
                self.0 = Some(element);
            }

            fn finish(&mut self) -> Option<Term> {
                self.0.take()
            }
        }

        let multiset = numbers(&[1, 2, 3]);
        let ids = all_ids(&multiset);
        let last = CustomAggregate::new(
            NamedNode::new_unchecked("http://example.com/last"),
            || Box::new(Last(None)),
        );
        assert_eq!(
            Aggregate::new(AggregateFunction::Custom(last), var("v")).evaluate(&multiset, &ids),
            Ok(Literal::from(3_i64).into())
        );
    }
}
