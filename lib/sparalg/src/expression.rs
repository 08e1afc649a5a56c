use crate::error::ExpressionError;
use crate::set::Set;
use oxrdf::vocab::xsd;
use oxrdf::{BlankNode, Literal, NamedNode, Term, Variable};
use oxsdatatypes::{Boolean, DateTime, Decimal, Double, Float, Integer};
use regex::{Regex, RegexBuilder};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

const REGEX_SIZE_LIMIT: usize = 1_000_000;

/// Signature of the functions that can be plugged into an [`Expression`]
///
/// Returning `None` is an evaluation error for the current solution.
pub type CustomFunctionImpl = Arc<dyn Fn(&[Term]) -> Option<Term> + Send + Sync>;

/// A named custom function
#[derive(Clone)]
pub struct CustomFunction {
    name: NamedNode,
    implementation: CustomFunctionImpl,
}

impl CustomFunction {
    pub fn new(
        name: NamedNode,
        implementation: impl Fn(&[Term]) -> Option<Term> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            implementation: Arc::new(implementation),
        }
    }

    #[inline]
    pub fn name(&self) -> &NamedNode {
        &self.name
    }
}

impl fmt::Debug for CustomFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// An expression evaluated against a single solution
///
/// Used by `FILTER`, `BIND`, `ORDER BY`, grouping keys and left join conditions.
#[derive(Clone, Debug)]
pub enum Expression {
    Constant(Term),
    Variable(Variable),
    /// `BOUND(?v)`
    Bound(Variable),
    Or(Box<Self>, Box<Self>),
    And(Box<Self>, Box<Self>),
    Not(Box<Self>),
    /// `=`, value equality
    Equal(Box<Self>, Box<Self>),
    /// `sameTerm`, strict RDF term equality
    SameTerm(Box<Self>, Box<Self>),
    Greater(Box<Self>, Box<Self>),
    GreaterOrEqual(Box<Self>, Box<Self>),
    Less(Box<Self>, Box<Self>),
    LessOrEqual(Box<Self>, Box<Self>),
    In(Box<Self>, Vec<Self>),
    Add(Box<Self>, Box<Self>),
    Subtract(Box<Self>, Box<Self>),
    Multiply(Box<Self>, Box<Self>),
    Divide(Box<Self>, Box<Self>),
    UnaryMinus(Box<Self>),
    If(Box<Self>, Box<Self>, Box<Self>),
    Coalesce(Vec<Self>),
    IsIri(Box<Self>),
    IsBlank(Box<Self>),
    IsLiteral(Box<Self>),
    IsNumeric(Box<Self>),
    Str(Box<Self>),
    Lang(Box<Self>),
    Datatype(Box<Self>),
    /// `REGEX(text, pattern, flags?)`
    Regex(Box<Self>, Box<Self>, Option<Box<Self>>),
    Custom(CustomFunction, Vec<Self>),
}

impl Expression {
    /// Evaluates the expression against a solution
    pub fn evaluate(&self, set: &Set) -> Result<Term, ExpressionError> {
        self.evaluate_term(set).map(Into::into)
    }

    /// Evaluates the expression then computes its [effective boolean value](https://www.w3.org/TR/sparql11-query/#ebv)
    pub fn effective_boolean_value(&self, set: &Set) -> Result<bool, ExpressionError> {
        self.evaluate_term(set)?
            .effective_boolean_value()
            .ok_or(ExpressionError::TypeError(
                "the value has no effective boolean value",
            ))
    }

    /// The variables the expression mentions, without duplicates
    pub fn variables(&self) -> Vec<Variable> {
        let mut variables = Vec::new();
        self.collect_variables(&mut variables);
        variables
    }

    fn collect_variables(&self, variables: &mut Vec<Variable>) {
        match self {
            Self::Constant(_) => (),
            Self::Variable(v) | Self::Bound(v) => {
                if !variables.contains(v) {
                    variables.push(v.clone());
                }
            }
            Self::Not(e)
            | Self::UnaryMinus(e)
            | Self::IsIri(e)
            | Self::IsBlank(e)
            | Self::IsLiteral(e)
            | Self::IsNumeric(e)
            | Self::Str(e)
            | Self::Lang(e)
            | Self::Datatype(e) => e.collect_variables(variables),
            Self::Or(a, b)
            | Self::And(a, b)
            | Self::Equal(a, b)
            | Self::SameTerm(a, b)
            | Self::Greater(a, b)
            | Self::GreaterOrEqual(a, b)
            | Self::Less(a, b)
            | Self::LessOrEqual(a, b)
            | Self::Add(a, b)
            | Self::Subtract(a, b)
            | Self::Multiply(a, b)
            | Self::Divide(a, b) => {
                a.collect_variables(variables);
                b.collect_variables(variables);
            }
            Self::In(e, list) => {
                e.collect_variables(variables);
                for e in list {
                    e.collect_variables(variables);
                }
            }
            Self::If(a, b, c) => {
                a.collect_variables(variables);
                b.collect_variables(variables);
                c.collect_variables(variables);
            }
            Self::Regex(a, b, c) => {
                a.collect_variables(variables);
                b.collect_variables(variables);
                if let Some(c) = c {
                    c.collect_variables(variables);
                }
            }
            Self::Coalesce(list) | Self::Custom(_, list) => {
                for e in list {
                    e.collect_variables(variables);
                }
            }
        }
    }

    fn evaluate_term(&self, set: &Set) -> Result<ExpressionTerm, ExpressionError> {
        match self {
            Self::Constant(t) => Ok(t.into()),
            Self::Variable(v) => set
                .get(v)
                .map(Into::into)
                .ok_or_else(|| ExpressionError::UnboundVariable(v.clone())),
            Self::Bound(v) => Ok(set.get(v).is_some().into()),
            Self::Or(a, b) => match a.effective_boolean_value(set) {
                Ok(true) => Ok(true.into()),
                Ok(false) => Ok(b.effective_boolean_value(set)?.into()),
                Err(e) => {
                    if b.effective_boolean_value(set)? {
                        Ok(true.into())
                    } else {
                        Err(e)
                    }
                }
            },
            Self::And(a, b) => match a.effective_boolean_value(set) {
                Ok(false) => Ok(false.into()),
                Ok(true) => Ok(b.effective_boolean_value(set)?.into()),
                Err(e) => {
                    if b.effective_boolean_value(set)? {
                        Err(e)
                    } else {
                        Ok(false.into())
                    }
                }
            },
            Self::Not(e) => Ok((!e.effective_boolean_value(set)?).into()),
            Self::Equal(a, b) => {
                let a = a.evaluate_term(set)?;
                let b = b.evaluate_term(set)?;
                equals(&a, &b)
                    .map(Into::into)
                    .ok_or(ExpressionError::TypeError("the values can not be compared"))
            }
            Self::SameTerm(a, b) => Ok((a.evaluate(set)? == b.evaluate(set)?).into()),
            Self::Greater(a, b) => Ok((compare(a, b, set)? == Ordering::Greater).into()),
            Self::GreaterOrEqual(a, b) => Ok((compare(a, b, set)? != Ordering::Less).into()),
            Self::Less(a, b) => Ok((compare(a, b, set)? == Ordering::Less).into()),
            Self::LessOrEqual(a, b) => Ok((compare(a, b, set)? != Ordering::Greater).into()),
            Self::In(e, list) => {
                let needle = e.evaluate_term(set)?;
                let mut error = None;
                for candidate in list {
                    match candidate.evaluate_term(set) {
                        Ok(candidate) => match equals(&needle, &candidate) {
                            Some(true) => return Ok(true.into()),
                            Some(false) => (),
                            None => {
                                error = Some(ExpressionError::TypeError(
                                    "the values can not be compared",
                                ));
                            }
                        },
                        Err(e) => error = Some(e),
                    }
                }
                match error {
                    Some(e) => Err(e),
                    None => Ok(false.into()),
                }
            }
            Self::Add(a, b) => {
                numeric_binary(a.evaluate_term(set)?, b.evaluate_term(set)?, NumericOperator::Add)
            }
            Self::Subtract(a, b) => numeric_binary(
                a.evaluate_term(set)?,
                b.evaluate_term(set)?,
                NumericOperator::Subtract,
            ),
            Self::Multiply(a, b) => numeric_binary(
                a.evaluate_term(set)?,
                b.evaluate_term(set)?,
                NumericOperator::Multiply,
            ),
            Self::Divide(a, b) => numeric_binary(
                a.evaluate_term(set)?,
                b.evaluate_term(set)?,
                NumericOperator::Divide,
            ),
            Self::UnaryMinus(e) => match e.evaluate_term(set)? {
                ExpressionTerm::IntegerLiteral(v) => Ok(ExpressionTerm::IntegerLiteral(
                    v.checked_neg().ok_or(ExpressionError::NumericOverflow)?,
                )),
                ExpressionTerm::DecimalLiteral(v) => Ok(ExpressionTerm::DecimalLiteral(
                    v.checked_neg().ok_or(ExpressionError::NumericOverflow)?,
                )),
                ExpressionTerm::FloatLiteral(v) => Ok(ExpressionTerm::FloatLiteral(-v)),
                ExpressionTerm::DoubleLiteral(v) => Ok(ExpressionTerm::DoubleLiteral(-v)),
                _ => Err(ExpressionError::TypeError("a numeric value is expected")),
            },
            Self::If(condition, then, otherwise) => {
                if condition.effective_boolean_value(set)? {
                    then.evaluate_term(set)
                } else {
                    otherwise.evaluate_term(set)
                }
            }
            Self::Coalesce(list) => {
                let mut last_error = ExpressionError::TypeError("COALESCE without valid argument");
                for e in list {
                    match e.evaluate_term(set) {
                        Ok(v) => return Ok(v),
                        Err(e) => last_error = e,
                    }
                }
                Err(last_error)
            }
            Self::IsIri(e) => Ok(matches!(e.evaluate_term(set)?, ExpressionTerm::NamedNode(_)).into()),
            Self::IsBlank(e) => {
                Ok(matches!(e.evaluate_term(set)?, ExpressionTerm::BlankNode(_)).into())
            }
            Self::IsLiteral(e) => Ok(e.evaluate_term(set)?.is_literal().into()),
            Self::IsNumeric(e) => Ok(matches!(
                e.evaluate_term(set)?,
                ExpressionTerm::IntegerLiteral(_)
                    | ExpressionTerm::DecimalLiteral(_)
                    | ExpressionTerm::FloatLiteral(_)
                    | ExpressionTerm::DoubleLiteral(_)
            )
            .into()),
            Self::Str(e) => match Term::from(e.evaluate_term(set)?) {
                Term::NamedNode(node) => Ok(ExpressionTerm::StringLiteral(node.into_string())),
                Term::Literal(literal) => Ok(ExpressionTerm::StringLiteral(literal.value().into())),
                Term::BlankNode(_) => Err(ExpressionError::TypeError(
                    "STR is not defined on blank nodes",
                )),
            },
            Self::Lang(e) => match e.evaluate_term(set)? {
                ExpressionTerm::LangStringLiteral { language, .. } => {
                    Ok(ExpressionTerm::StringLiteral(language))
                }
                ExpressionTerm::NamedNode(_) | ExpressionTerm::BlankNode(_) => Err(
                    ExpressionError::TypeError("LANG is only defined on literals"),
                ),
                _ => Ok(ExpressionTerm::StringLiteral(String::new())),
            },
            Self::Datatype(e) => match Term::from(e.evaluate_term(set)?) {
                Term::Literal(literal) => Ok(ExpressionTerm::NamedNode(literal.datatype().into_owned())),
                _ => Err(ExpressionError::TypeError(
                    "DATATYPE is only defined on literals",
                )),
            },
            Self::Regex(text, pattern, flags) => {
                let (text, _) = to_string_and_language(text.evaluate_term(set)?)
                    .ok_or(ExpressionError::TypeError("REGEX expects a string"))?;
                let pattern = to_simple_string(pattern.evaluate_term(set)?)?;
                let flags = flags
                    .as_ref()
                    .map(|f| to_simple_string(f.evaluate_term(set)?))
                    .transpose()?;
                let regex = compile_pattern(&pattern, flags.as_deref())
                    .ok_or(ExpressionError::TypeError("invalid regular expression"))?;
                Ok(regex.is_match(&text).into())
            }
            Self::Custom(function, arguments) => {
                let arguments = arguments
                    .iter()
                    .map(|e| e.evaluate(set))
                    .collect::<Result<Vec<_>, _>>()?;
                (function.implementation)(&arguments)
                    .map(Into::into)
                    .ok_or_else(|| ExpressionError::CustomFunction(function.name.clone()))
            }
        }
    }

}

fn compare(a: &Expression, b: &Expression, set: &Set) -> Result<Ordering, ExpressionError> {
    let a = a.evaluate_term(set)?;
    let b = b.evaluate_term(set)?;
    if equals(&a, &b) == Some(true) {
        return Ok(Ordering::Equal);
    }
    partial_cmp_literals(&a, &b).ok_or(ExpressionError::TypeError(
        "the values can not be ordered",
    ))
}

impl From<Variable> for Expression {
    #[inline]
    fn from(variable: Variable) -> Self {
        Self::Variable(variable)
    }
}

impl From<NamedNode> for Expression {
    #[inline]
    fn from(node: NamedNode) -> Self {
        Self::Constant(node.into())
    }
}

impl From<Literal> for Expression {
    #[inline]
    fn from(literal: Literal) -> Self {
        Self::Constant(literal.into())
    }
}

impl From<Term> for Expression {
    #[inline]
    fn from(term: Term) -> Self {
        Self::Constant(term)
    }
}

/// An RDF term with its literal value parsed according to its datatype
#[derive(Clone, Debug)]
pub enum ExpressionTerm {
    NamedNode(NamedNode),
    BlankNode(BlankNode),
    StringLiteral(String),
    LangStringLiteral { value: String, language: String },
    BooleanLiteral(Boolean),
    IntegerLiteral(Integer),
    DecimalLiteral(Decimal),
    FloatLiteral(Float),
    DoubleLiteral(Double),
    DateTimeLiteral(DateTime),
    OtherTypedLiteral { value: String, datatype: NamedNode },
}

impl ExpressionTerm {
    /// Computes the term [effective boolean value](https://www.w3.org/TR/sparql11-query/#ebv)
    pub fn effective_boolean_value(&self) -> Option<bool> {
        match self {
            Self::BooleanLiteral(value) => Some((*value).into()),
            Self::StringLiteral(value) => Some(!value.is_empty()),
            Self::FloatLiteral(value) => Some(Boolean::from(*value).into()),
            Self::DoubleLiteral(value) => Some(Boolean::from(*value).into()),
            Self::IntegerLiteral(value) => Some(Boolean::from(*value).into()),
            Self::DecimalLiteral(value) => Some(Boolean::from(*value).into()),
            _ => None,
        }
    }

    fn is_literal(&self) -> bool {
        !matches!(self, Self::NamedNode(_) | Self::BlankNode(_))
    }
}

impl From<&Term> for ExpressionTerm {
    fn from(term: &Term) -> Self {
        match term {
            Term::NamedNode(t) => Self::NamedNode(t.clone()),
            Term::BlankNode(t) => Self::BlankNode(t.clone()),
            Term::Literal(t) => {
                if let Some(language) = t.language() {
                    Self::LangStringLiteral {
                        value: t.value().into(),
                        language: language.into(),
                    }
                } else if t.datatype() == xsd::STRING {
                    Self::StringLiteral(t.value().into())
                } else {
                    parse_typed_literal(t.value(), t.datatype().as_str()).unwrap_or_else(|| {
                        Self::OtherTypedLiteral {
                            value: t.value().into(),
                            datatype: t.datatype().into_owned(),
                        }
                    })
                }
            }
        }
    }
}

impl From<Term> for ExpressionTerm {
    #[inline]
    fn from(term: Term) -> Self {
        (&term).into()
    }
}

impl From<ExpressionTerm> for Term {
    fn from(term: ExpressionTerm) -> Self {
        match term {
            ExpressionTerm::NamedNode(t) => t.into(),
            ExpressionTerm::BlankNode(t) => t.into(),
            ExpressionTerm::StringLiteral(value) => Literal::new_simple_literal(value).into(),
            ExpressionTerm::LangStringLiteral { value, language } => {
                Literal::new_language_tagged_literal_unchecked(value, language).into()
            }
            ExpressionTerm::BooleanLiteral(value) => Literal::from(value).into(),
            ExpressionTerm::IntegerLiteral(value) => Literal::from(value).into(),
            ExpressionTerm::DecimalLiteral(value) => Literal::from(value).into(),
            ExpressionTerm::FloatLiteral(value) => Literal::from(value).into(),
            ExpressionTerm::DoubleLiteral(value) => Literal::from(value).into(),
            ExpressionTerm::DateTimeLiteral(value) => Literal::from(value).into(),
            ExpressionTerm::OtherTypedLiteral { value, datatype } => {
                Literal::new_typed_literal(value, datatype).into()
            }
        }
    }
}

impl From<bool> for ExpressionTerm {
    #[inline]
    fn from(value: bool) -> Self {
        Self::BooleanLiteral(value.into())
    }
}

fn parse_typed_literal(value: &str, datatype: &str) -> Option<ExpressionTerm> {
    Some(match datatype {
        "http://www.w3.org/2001/XMLSchema#boolean" => {
            ExpressionTerm::BooleanLiteral(value.parse().ok()?)
        }
        "http://www.w3.org/2001/XMLSchema#float" => ExpressionTerm::FloatLiteral(value.parse().ok()?),
        "http://www.w3.org/2001/XMLSchema#double" => {
            ExpressionTerm::DoubleLiteral(value.parse().ok()?)
        }
        "http://www.w3.org/2001/XMLSchema#decimal" => {
            ExpressionTerm::DecimalLiteral(value.parse().ok()?)
        }
        "http://www.w3.org/2001/XMLSchema#integer"
        | "http://www.w3.org/2001/XMLSchema#byte"
        | "http://www.w3.org/2001/XMLSchema#short"
        | "http://www.w3.org/2001/XMLSchema#int"
        | "http://www.w3.org/2001/XMLSchema#long"
        | "http://www.w3.org/2001/XMLSchema#unsignedByte"
        | "http://www.w3.org/2001/XMLSchema#unsignedShort"
        | "http://www.w3.org/2001/XMLSchema#unsignedInt"
        | "http://www.w3.org/2001/XMLSchema#unsignedLong"
        | "http://www.w3.org/2001/XMLSchema#positiveInteger"
        | "http://www.w3.org/2001/XMLSchema#negativeInteger"
        | "http://www.w3.org/2001/XMLSchema#nonPositiveInteger"
        | "http://www.w3.org/2001/XMLSchema#nonNegativeInteger" => {
            ExpressionTerm::IntegerLiteral(value.parse().ok()?)
        }
        "http://www.w3.org/2001/XMLSchema#dateTime"
        | "http://www.w3.org/2001/XMLSchema#dateTimeStamp" => {
            ExpressionTerm::DateTimeLiteral(value.parse().ok()?)
        }
        _ => return None,
    })
}

/// Value equality, `None` if the two values are not comparable
fn equals(a: &ExpressionTerm, b: &ExpressionTerm) -> Option<bool> {
    match (a, b) {
        (ExpressionTerm::NamedNode(a), ExpressionTerm::NamedNode(b)) => Some(a == b),
        (ExpressionTerm::BlankNode(a), ExpressionTerm::BlankNode(b)) => Some(a == b),
        (ExpressionTerm::StringLiteral(a), ExpressionTerm::StringLiteral(b)) => Some(a == b),
        (
            ExpressionTerm::LangStringLiteral {
                value: va,
                language: la,
            },
            ExpressionTerm::LangStringLiteral {
                value: vb,
                language: lb,
            },
        ) => Some(va == vb && la == lb),
        (ExpressionTerm::BooleanLiteral(a), ExpressionTerm::BooleanLiteral(b)) => Some(a == b),
        (ExpressionTerm::DateTimeLiteral(a), ExpressionTerm::DateTimeLiteral(b)) => Some(a == b),
        (
            ExpressionTerm::OtherTypedLiteral {
                value: va,
                datatype: da,
            },
            ExpressionTerm::OtherTypedLiteral {
                value: vb,
                datatype: db,
            },
        ) => (va == vb && da == db).then_some(true),
        (ExpressionTerm::OtherTypedLiteral { .. }, b) | (b, ExpressionTerm::OtherTypedLiteral { .. }) => {
            if b.is_literal() {
                None
            } else {
                Some(false)
            }
        }
        (a, b) => match NumericBinaryOperands::new(a.clone(), b.clone()) {
            Some(NumericBinaryOperands::Float(a, b)) => Some(a == b),
            Some(NumericBinaryOperands::Double(a, b)) => Some(a == b),
            Some(NumericBinaryOperands::Integer(a, b)) => Some(a == b),
            Some(NumericBinaryOperands::Decimal(a, b)) => Some(a == b),
            None => Some(false),
        },
    }
}

fn partial_cmp_literals(a: &ExpressionTerm, b: &ExpressionTerm) -> Option<Ordering> {
    match (a, b) {
        (ExpressionTerm::StringLiteral(a), ExpressionTerm::StringLiteral(b)) => a.partial_cmp(b),
        (
            ExpressionTerm::LangStringLiteral {
                value: va,
                language: la,
            },
            ExpressionTerm::LangStringLiteral {
                value: vb,
                language: lb,
            },
        ) => (la == lb).then(|| va.cmp(vb)),
        (ExpressionTerm::BooleanLiteral(a), ExpressionTerm::BooleanLiteral(b)) => a.partial_cmp(b),
        (ExpressionTerm::DateTimeLiteral(a), ExpressionTerm::DateTimeLiteral(b)) => a.partial_cmp(b),
        (a, b) => match NumericBinaryOperands::new(a.clone(), b.clone())? {
            NumericBinaryOperands::Float(a, b) => a.partial_cmp(&b),
            NumericBinaryOperands::Double(a, b) => a.partial_cmp(&b),
            NumericBinaryOperands::Integer(a, b) => a.partial_cmp(&b),
            NumericBinaryOperands::Decimal(a, b) => a.partial_cmp(&b),
        },
    }
}

/// Total order used by `ORDER BY`: unbound, then blank nodes, then IRIs, then literals
pub fn cmp_terms(a: Option<&Term>, b: Option<&Term>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match (a, b) {
            (Term::BlankNode(a), Term::BlankNode(b)) => a.as_str().cmp(b.as_str()),
            (Term::BlankNode(_), _) => Ordering::Less,
            (_, Term::BlankNode(_)) => Ordering::Greater,
            (Term::NamedNode(a), Term::NamedNode(b)) => a.as_str().cmp(b.as_str()),
            (Term::NamedNode(_), _) => Ordering::Less,
            (_, Term::NamedNode(_)) => Ordering::Greater,
            (Term::Literal(la), Term::Literal(lb)) => {
                partial_cmp_literals(&a.into(), &b.into()).unwrap_or_else(|| {
                    (la.value(), la.datatype(), la.language()).cmp(&(
                        lb.value(),
                        lb.datatype(),
                        lb.language(),
                    ))
                })
            }
        },
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

#[derive(Clone, Copy)]
enum NumericOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

enum NumericBinaryOperands {
    Float(Float, Float),
    Double(Double, Double),
    Integer(Integer, Integer),
    Decimal(Decimal, Decimal),
}

impl NumericBinaryOperands {
    fn new(a: ExpressionTerm, b: ExpressionTerm) -> Option<Self> {
        match (a, b) {
            (ExpressionTerm::FloatLiteral(v1), ExpressionTerm::FloatLiteral(v2)) => {
                Some(Self::Float(v1, v2))
            }
            (ExpressionTerm::FloatLiteral(v1), ExpressionTerm::DoubleLiteral(v2)) => {
                Some(Self::Double(v1.into(), v2))
            }
            (ExpressionTerm::FloatLiteral(v1), ExpressionTerm::IntegerLiteral(v2)) => {
                Some(Self::Float(v1, v2.into()))
            }
            (ExpressionTerm::FloatLiteral(v1), ExpressionTerm::DecimalLiteral(v2)) => {
                Some(Self::Float(v1, v2.into()))
            }
            (ExpressionTerm::DoubleLiteral(v1), ExpressionTerm::FloatLiteral(v2)) => {
                Some(Self::Double(v1, v2.into()))
            }
            (ExpressionTerm::DoubleLiteral(v1), ExpressionTerm::DoubleLiteral(v2)) => {
                Some(Self::Double(v1, v2))
            }
            (ExpressionTerm::DoubleLiteral(v1), ExpressionTerm::IntegerLiteral(v2)) => {
                Some(Self::Double(v1, v2.into()))
            }
            (ExpressionTerm::DoubleLiteral(v1), ExpressionTerm::DecimalLiteral(v2)) => {
                Some(Self::Double(v1, v2.into()))
            }
            (ExpressionTerm::IntegerLiteral(v1), ExpressionTerm::FloatLiteral(v2)) => {
                Some(Self::Float(v1.into(), v2))
            }
            (ExpressionTerm::IntegerLiteral(v1), ExpressionTerm::DoubleLiteral(v2)) => {
                Some(Self::Double(v1.into(), v2))
            }
            (ExpressionTerm::IntegerLiteral(v1), ExpressionTerm::IntegerLiteral(v2)) => {
                Some(Self::Integer(v1, v2))
            }
            (ExpressionTerm::IntegerLiteral(v1), ExpressionTerm::DecimalLiteral(v2)) => {
                Some(Self::Decimal(v1.into(), v2))
            }
            (ExpressionTerm::DecimalLiteral(v1), ExpressionTerm::FloatLiteral(v2)) => {
                Some(Self::Float(v1.into(), v2))
            }
            (ExpressionTerm::DecimalLiteral(v1), ExpressionTerm::DoubleLiteral(v2)) => {
                Some(Self::Double(v1.into(), v2))
            }
            (ExpressionTerm::DecimalLiteral(v1), ExpressionTerm::IntegerLiteral(v2)) => {
                Some(Self::Decimal(v1, v2.into()))
            }
            (ExpressionTerm::DecimalLiteral(v1), ExpressionTerm::DecimalLiteral(v2)) => {
                Some(Self::Decimal(v1, v2))
            }
            _ => None,
        }
    }
}

fn numeric_binary(
    a: ExpressionTerm,
    b: ExpressionTerm,
    operator: NumericOperator,
) -> Result<ExpressionTerm, ExpressionError> {
    let operands = NumericBinaryOperands::new(a, b)
        .ok_or(ExpressionError::TypeError("numeric values are expected"))?;
    Ok(match operands {
        NumericBinaryOperands::Float(a, b) => ExpressionTerm::FloatLiteral(match operator {
            NumericOperator::Add => a + b,
            NumericOperator::Subtract => a - b,
            NumericOperator::Multiply => a * b,
            NumericOperator::Divide => a / b,
        }),
        NumericBinaryOperands::Double(a, b) => ExpressionTerm::DoubleLiteral(match operator {
            NumericOperator::Add => a + b,
            NumericOperator::Subtract => a - b,
            NumericOperator::Multiply => a * b,
            NumericOperator::Divide => a / b,
        }),
        NumericBinaryOperands::Integer(a, b) => match operator {
            NumericOperator::Add => ExpressionTerm::IntegerLiteral(
                a.checked_add(b).ok_or(ExpressionError::NumericOverflow)?,
            ),
            NumericOperator::Subtract => ExpressionTerm::IntegerLiteral(
                a.checked_sub(b).ok_or(ExpressionError::NumericOverflow)?,
            ),
            NumericOperator::Multiply => ExpressionTerm::IntegerLiteral(
                a.checked_mul(b).ok_or(ExpressionError::NumericOverflow)?,
            ),
            NumericOperator::Divide => ExpressionTerm::DecimalLiteral(
                Decimal::from(a)
                    .checked_div(b)
                    .ok_or(ExpressionError::NumericOverflow)?,
            ),
        },
        NumericBinaryOperands::Decimal(a, b) => ExpressionTerm::DecimalLiteral(
            match operator {
                NumericOperator::Add => a.checked_add(b),
                NumericOperator::Subtract => a.checked_sub(b),
                NumericOperator::Multiply => a.checked_mul(b),
                NumericOperator::Divide => a.checked_div(b),
            }
            .ok_or(ExpressionError::NumericOverflow)?,
        ),
    })
}

/// Adds two numeric terms, used by `SUM` and `AVG`
pub(crate) fn add_numeric(a: Term, b: Term) -> Result<Term, ExpressionError> {
    numeric_binary(a.into(), b.into(), NumericOperator::Add).map(Into::into)
}

/// Divides two numeric terms, used by `AVG`
pub(crate) fn divide_numeric(a: Term, b: Term) -> Result<Term, ExpressionError> {
    numeric_binary(a.into(), b.into(), NumericOperator::Divide).map(Into::into)
}

/// Compares two terms with the `<` operator semantics, used by `MIN` and `MAX`
pub(crate) fn partial_cmp_terms(a: &Term, b: &Term) -> Option<Ordering> {
    if a == b {
        return Some(Ordering::Equal);
    }
    partial_cmp_literals(&a.into(), &b.into())
}

pub(crate) fn is_numeric(term: &Term) -> bool {
    matches!(
        ExpressionTerm::from(term),
        ExpressionTerm::IntegerLiteral(_)
            | ExpressionTerm::DecimalLiteral(_)
            | ExpressionTerm::FloatLiteral(_)
            | ExpressionTerm::DoubleLiteral(_)
    )
}

fn to_string_and_language(term: ExpressionTerm) -> Option<(String, Option<String>)> {
    match term {
        ExpressionTerm::StringLiteral(value) => Some((value, None)),
        ExpressionTerm::LangStringLiteral { value, language } => Some((value, Some(language))),
        _ => None,
    }
}

fn to_simple_string(term: ExpressionTerm) -> Result<String, ExpressionError> {
    if let ExpressionTerm::StringLiteral(value) = term {
        Ok(value)
    } else {
        Err(ExpressionError::TypeError("a simple string is expected"))
    }
}

/// The string value of a literal and its language tag, used by `GROUP_CONCAT`
pub(crate) fn string_and_language(term: &Term) -> Option<(String, Option<String>)> {
    to_string_and_language(term.into())
}

pub(crate) fn build_plain_literal(value: String, language: Option<String>) -> Term {
    if let Some(language) = language {
        Literal::new_language_tagged_literal_unchecked(value, language).into()
    } else {
        Literal::new_simple_literal(value).into()
    }
}

fn compile_pattern(pattern: &str, flags: Option<&str>) -> Option<Regex> {
    let mut pattern = Cow::Borrowed(pattern);
    let flags = flags.unwrap_or_default();
    if flags.contains('q') {
        pattern = regex::escape(&pattern).into();
    }
    let mut regex_builder = RegexBuilder::new(&pattern);
    regex_builder.size_limit(REGEX_SIZE_LIMIT);
    for flag in flags.chars() {
        match flag {
            's' => {
                regex_builder.dot_matches_new_line(true);
            }
            'm' => {
                regex_builder.multi_line(true);
            }
            'i' => {
                regex_builder.case_insensitive(true);
            }
            'x' => {
                regex_builder.ignore_whitespace(true);
            }
            'q' => (),
            _ => return None,
        }
    }
    regex_builder.build().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    fn int(value: i64) -> Expression {
        Literal::from(value).into()
    }

    fn bin(
        f: fn(Box<Expression>, Box<Expression>) -> Expression,
        a: Expression,
        b: Expression,
    ) -> Expression {
        f(Box::new(a), Box::new(b))
    }

    #[test]
    fn numeric_promotion() -> Result<(), ExpressionError> {
        let sum = bin(
            Expression::Add,
            int(1),
            Literal::new_typed_literal("1.5", xsd::DECIMAL).into(),
        );
        assert_eq!(
            sum.evaluate(&Set::new())?,
            Literal::new_typed_literal("2.5", xsd::DECIMAL).into()
        );
        let quotient = bin(Expression::Divide, int(1), int(2));
        assert_eq!(
            quotient.evaluate(&Set::new())?,
            Literal::new_typed_literal("0.5", xsd::DECIMAL).into()
        );
        Ok(())
    }

    #[test]
    fn integer_division_by_zero_is_an_error() {
        let quotient = bin(Expression::Divide, int(1), int(0));
        assert_eq!(
            quotient.evaluate(&Set::new()),
            Err(ExpressionError::NumericOverflow)
        );
    }

    #[test]
    fn equality_across_numeric_types() -> Result<(), ExpressionError> {
        let eq = bin(
            Expression::Equal,
            int(1),
            Literal::new_typed_literal("1.0", xsd::DOUBLE).into(),
        );
        assert!(eq.effective_boolean_value(&Set::new())?);
        let same = bin(
            Expression::SameTerm,
            int(1),
            Literal::new_typed_literal("1.0", xsd::DOUBLE).into(),
        );
        assert!(!same.effective_boolean_value(&Set::new())?);
        Ok(())
    }

    #[test]
    fn unbound_variable() {
        assert_eq!(
            Expression::Variable(var("x")).evaluate(&Set::new()),
            Err(ExpressionError::UnboundVariable(var("x")))
        );
    }

    #[test]
    fn logical_or_recovers_from_errors() -> Result<(), ExpressionError> {
        let or = bin(
            Expression::Or,
            Expression::Variable(var("x")),
            Literal::from(true).into(),
        );
        assert!(or.effective_boolean_value(&Set::new())?);
        let and = bin(
            Expression::And,
            Expression::Variable(var("x")),
            Literal::from(true).into(),
        );
        assert!(and.effective_boolean_value(&Set::new()).is_err());
        Ok(())
    }

    #[test]
    fn regex_flags() -> Result<(), ExpressionError> {
        let regex = Expression::Regex(
            Box::new(Literal::new_simple_literal("Alice").into()),
            Box::new(Literal::new_simple_literal("^ali").into()),
            Some(Box::new(Literal::new_simple_literal("i").into())),
        );
        assert!(regex.effective_boolean_value(&Set::new())?);
        let invalid = Expression::Regex(
            Box::new(Literal::new_simple_literal("Alice").into()),
            Box::new(Literal::new_simple_literal("a").into()),
            Some(Box::new(Literal::new_simple_literal("z").into())),
        );
        assert!(invalid.evaluate(&Set::new()).is_err());
        Ok(())
    }

    #[test]
    fn custom_function() -> Result<(), ExpressionError> {
        let name = NamedNode::new_unchecked("http://example.com/first");
        let first = CustomFunction::new(name.clone(), |args| args.first().cloned());
        let call = Expression::Custom(first.clone(), vec![int(7)]);
        assert_eq!(call.evaluate(&Set::new())?, Literal::from(7).into());
        let empty = Expression::Custom(first, Vec::new());
        assert_eq!(
            empty.evaluate(&Set::new()),
            Err(ExpressionError::CustomFunction(name))
        );
        Ok(())
    }

    #[test]
    fn order_of_terms() {
        let blank = Term::from(BlankNode::new_unchecked("b"));
        let iri = Term::from(NamedNode::new_unchecked("http://example.com/"));
        let one = Term::from(Literal::from(1));
        let two = Term::from(Literal::new_typed_literal("2.0", xsd::DOUBLE));
        assert_eq!(cmp_terms(None, Some(&blank)), Ordering::Less);
        assert_eq!(cmp_terms(Some(&blank), Some(&iri)), Ordering::Less);
        assert_eq!(cmp_terms(Some(&iri), Some(&one)), Ordering::Less);
        assert_eq!(cmp_terms(Some(&one), Some(&two)), Ordering::Less);
    }

    #[test]
    fn variables_are_deduplicated() {
        let e = bin(
            Expression::Add,
            Expression::Variable(var("x")),
            bin(
                Expression::Multiply,
                Expression::Variable(var("x")),
                Expression::Variable(var("y")),
            ),
        );
        assert_eq!(e.variables(), [var("x"), var("y")]);
    }
}
