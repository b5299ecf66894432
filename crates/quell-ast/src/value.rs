use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Reason};

/// A record value: named fields in a stable order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Record::default()
    }

    /// Builder-style field insertion, for literals in tests and fixtures.
    pub fn with<S, V>(mut self, name: S, value: V) -> Self
    where
        S: Into<String>,
        V: Into<Value>,
    {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert<S, V>(&mut self, name: S, value: V)
    where
        S: Into<String>,
        V: Into<Value>,
    {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Runtime values both backends agree on.
///
/// The scalar semantics here (truthiness, loose equality, promotion) are the
/// single source of truth: the in-memory evaluator applies them directly and
/// the relational backend is expected to produce results consistent with
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumAsInner, strum::AsRefStr, strum::IntoStaticStr)]
pub enum Value {
    #[strum(serialize = "null")]
    Null,
    #[strum(serialize = "boolean")]
    Boolean(bool),
    #[strum(serialize = "integer")]
    Integer(i64),
    #[strum(serialize = "float")]
    Float(f64),
    #[strum(serialize = "string")]
    String(String),
    #[strum(serialize = "list")]
    List(Vec<Value>),
    #[strum(serialize = "record")]
    Record(Record),
}

impl Value {
    /// Name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        self.into()
    }

    /// Empty and zero values are falsy, everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Record(record) => !record.is_empty(),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn is_zero(&self) -> bool {
        matches!(self.as_number(), Some(divisor) if divisor == 0.0)
    }

    /// Equality across the numeric tower; everything else compares by
    /// variant. Never fails: mismatched types are simply not equal.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(l), Some(r)) => l == r,
            _ => self == other,
        }
    }

    /// Total order within a type (numeric across integer/float); ordering
    /// across unrelated types is an error, like the source language.
    pub fn compare(&self, other: &Value) -> Result<Ordering, Error> {
        if let (Some(l), Some(r)) = (self.as_number(), other.as_number()) {
            return l
                .partial_cmp(&r)
                .ok_or_else(|| Error::type_mismatch("compare", self.type_name(), other.type_name()));
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            (Value::Boolean(l), Value::Boolean(r)) => Ok(l.cmp(r)),
            (Value::String(l), Value::String(r)) => Ok(l.cmp(r)),
            (Value::List(l), Value::List(r)) => {
                for (a, b) in l.iter().zip(r.iter()) {
                    match a.compare(b)? {
                        Ordering::Equal => continue,
                        other => return Ok(other),
                    }
                }
                Ok(l.len().cmp(&r.len()))
            }
            _ => Err(Error::type_mismatch(
                "compare",
                self.type_name(),
                other.type_name(),
            )),
        }
    }

    pub fn add(&self, other: &Value) -> Result<Value, Error> {
        match (self, other) {
            (Value::Integer(l), Value::Integer(r)) => Ok(Value::Integer(l + r)),
            (Value::String(l), Value::String(r)) => Ok(Value::String(format!("{l}{r}"))),
            (Value::List(l), Value::List(r)) => {
                Ok(Value::List(l.iter().chain(r.iter()).cloned().collect()))
            }
            _ => self.numeric("+", other, |l, r| l + r),
        }
    }

    pub fn sub(&self, other: &Value) -> Result<Value, Error> {
        match (self, other) {
            (Value::Integer(l), Value::Integer(r)) => Ok(Value::Integer(l - r)),
            _ => self.numeric("-", other, |l, r| l - r),
        }
    }

    pub fn mul(&self, other: &Value) -> Result<Value, Error> {
        match (self, other) {
            (Value::Integer(l), Value::Integer(r)) => Ok(Value::Integer(l * r)),
            _ => self.numeric("*", other, |l, r| l * r),
        }
    }

    /// True division: always yields a float, even for integer operands.
    pub fn div(&self, other: &Value) -> Result<Value, Error> {
        if other.is_zero() {
            return Err(Error::new(Reason::DivisionByZero));
        }
        self.numeric("/", other, |l, r| l / r)
    }

    /// Floor division: integral for integer operands, floored for floats.
    pub fn floordiv(&self, other: &Value) -> Result<Value, Error> {
        match (self, other) {
            (Value::Integer(_), Value::Integer(0)) => Err(Error::new(Reason::DivisionByZero)),
            (Value::Integer(l), Value::Integer(r)) => {
                let quotient = l / r;
                let remainder = l % r;
                // round toward negative infinity, not toward zero
                if remainder != 0 && (remainder < 0) != (*r < 0) {
                    Ok(Value::Integer(quotient - 1))
                } else {
                    Ok(Value::Integer(quotient))
                }
            }
            _ => {
                if other.is_zero() {
                    return Err(Error::new(Reason::DivisionByZero));
                }
                self.numeric("//", other, |l, r| (l / r).floor())
            }
        }
    }

    pub fn pow(&self, other: &Value) -> Result<Value, Error> {
        match (self, other) {
            (Value::Integer(l), Value::Integer(r)) if *r >= 0 => {
                match u32::try_from(*r).ok().and_then(|exp| l.checked_pow(exp)) {
                    Some(result) => Ok(Value::Integer(result)),
                    None => Ok(Value::Float((*l as f64).powf(*r as f64))),
                }
            }
            _ => self.numeric("**", other, f64::powf),
        }
    }

    pub fn rem(&self, other: &Value) -> Result<Value, Error> {
        match (self, other) {
            (Value::Integer(_), Value::Integer(0)) => Err(Error::new(Reason::DivisionByZero)),
            (Value::Integer(l), Value::Integer(r)) => {
                // sign follows the divisor, matching floor division
                Ok(Value::Integer(((l % r) + r) % r))
            }
            _ => {
                if other.is_zero() {
                    return Err(Error::new(Reason::DivisionByZero));
                }
                self.numeric("%", other, |l, r| l - (l / r).floor() * r)
            }
        }
    }

    pub fn neg(&self) -> Result<Value, Error> {
        match self {
            Value::Integer(i) => Ok(Value::Integer(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            _ => Err(Error::type_mismatch("-", self.type_name(), "")
                .with_help("unary minus applies to numbers only")),
        }
    }

    fn numeric<F>(&self, op: &str, other: &Value, f: F) -> Result<Value, Error>
    where
        F: FnOnce(f64, f64) -> f64,
    {
        match (self.as_number(), other.as_number()) {
            (Some(l), Some(r)) => Ok(Value::Float(f(l, r))),
            _ => Err(Error::type_mismatch(
                op,
                self.type_name(),
                other.type_name(),
            )),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Value::Record(value)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => f.write_str(if *b { "true" } else { "false" }),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::List(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Record(record) => {
                f.write_str("{")?;
                for (index, (name, value)) in record.fields().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name} = {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}
