use std::mem::discriminant;

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::Value;

/// A query expression. Purely descriptive: building one never evaluates
/// anything, and built nodes are never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    #[serde(flatten)]
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Expr { kind }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumAsInner, strum::AsRefStr)]
pub enum ExprKind {
    /// A root field reference, resolved against the record under evaluation.
    Field(String),
    /// Chained attribute access on the parent's value. The name itself may
    /// be lazy (an expression evaluated per record).
    GetAttr { name: Operand, parent: Box<Expr> },
    /// Index or key access on the parent's value.
    GetItem { key: Operand, parent: Box<Expr> },
    /// Method invocation on the parent's value.
    Call { args: Vec<Operand>, parent: Box<Expr> },
    /// A constant lifted into the node algebra. Always evaluates to its
    /// value, unchanged.
    Literal(Value),
    Binary(BinaryExpr),
    Unary(UnaryExpr),
    Aggregation(Aggregation),
}

/// An operand is either a node (lazy, evaluated per record) or a plain
/// value. Plain values are coerced by the compilers, not eagerly wrapped in
/// [ExprKind::Literal] at build time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumAsInner)]
pub enum Operand {
    Expr(Box<Expr>),
    Value(Value),
}

/// N-ary application of a binary operator; `operands` has at least two
/// entries unless constant folding collapsed them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpr {
    pub op: BinOp,
    pub operands: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryExpr {
    pub op: UnOp,
    pub operand: Operand,
}

/// Reduction of a record-local collection to a scalar (or a list, for
/// `Collect`), optionally refined by an inner query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub kind: AggKind,
    /// Path to the aggregated collection, and for projecting kinds the
    /// projected field as its last segment (`"items.line_total"`).
    pub field: String,
    pub query: Option<Box<Expr>>,
}

impl Aggregation {
    /// The collection the aggregation ranges over, and the projected field.
    /// `count` and `has` never project, so their whole path names the
    /// collection; the projecting kinds take the last path segment.
    pub fn collection_and_projection(&self) -> (&str, Option<&str>) {
        match self.kind {
            AggKind::Count | AggKind::Has => (self.field.as_str(), None),
            _ => match self.field.rsplit_once('.') {
                Some((collection, projection)) => (collection, Some(projection)),
                None => (self.field.as_str(), None),
            },
        }
    }
}

#[derive(
    Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
pub enum BinOp {
    #[strum(to_string = "==")]
    Eq,
    #[strum(to_string = "!=")]
    Ne,
    #[strum(to_string = ">")]
    Gt,
    #[strum(to_string = ">=")]
    Gte,
    #[strum(to_string = "<")]
    Lt,
    #[strum(to_string = "<=")]
    Lte,
    #[strum(to_string = "&")]
    And,
    #[strum(to_string = "|")]
    Or,
    #[strum(to_string = "+")]
    Add,
    #[strum(to_string = "-")]
    Sub,
    #[strum(to_string = "*")]
    Mul,
    #[strum(to_string = "/")]
    Div,
    #[strum(to_string = "//")]
    FloorDiv,
    #[strum(to_string = "**")]
    Pow,
    #[strum(to_string = "%")]
    Mod,
}

impl BinOp {
    /// Comparison and logical operators; these evaluate pairwise over
    /// consecutive operands, so `Lt(a, b, c)` means `a < b && b < c`.
    pub fn is_boolean(self) -> bool {
        use BinOp::*;
        matches!(self, Eq | Ne | Gt | Gte | Lt | Lte | And | Or)
    }

    /// Operators whose adjacent same-typed constant operands are pre-reduced
    /// at build time.
    pub fn precalc(self) -> bool {
        matches!(self, BinOp::Add | BinOp::Mul)
    }

    /// The operator produced by logical negation, where one exists.
    pub fn inverse(self) -> Option<BinOp> {
        use BinOp::*;
        match self {
            Eq => Some(Ne),
            Ne => Some(Eq),
            Gt => Some(Lte),
            Gte => Some(Lt),
            Lt => Some(Gte),
            Lte => Some(Gt),
            _ => None,
        }
    }

    /// The operator's scalar reducer: the single definition of what the op
    /// means on two values, shared by every backend.
    pub fn reduce(self, lhs: &Value, rhs: &Value) -> Result<Value, Error> {
        use std::cmp::Ordering::*;
        Ok(match self {
            BinOp::Eq => Value::Boolean(lhs.loose_eq(rhs)),
            BinOp::Ne => Value::Boolean(!lhs.loose_eq(rhs)),
            BinOp::Gt => Value::Boolean(lhs.compare(rhs)? == Greater),
            BinOp::Gte => Value::Boolean(lhs.compare(rhs)? != Less),
            BinOp::Lt => Value::Boolean(lhs.compare(rhs)? == Less),
            BinOp::Lte => Value::Boolean(lhs.compare(rhs)? != Greater),
            BinOp::And => Value::Boolean(lhs.is_truthy() && rhs.is_truthy()),
            BinOp::Or => Value::Boolean(lhs.is_truthy() || rhs.is_truthy()),
            BinOp::Add => lhs.add(rhs)?,
            BinOp::Sub => lhs.sub(rhs)?,
            BinOp::Mul => lhs.mul(rhs)?,
            BinOp::Div => lhs.div(rhs)?,
            BinOp::FloorDiv => lhs.floordiv(rhs)?,
            BinOp::Pow => lhs.pow(rhs)?,
            BinOp::Mod => lhs.rem(rhs)?,
        })
    }
}

#[derive(
    Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
pub enum UnOp {
    #[strum(to_string = "~")]
    Not,
    #[strum(to_string = "-")]
    Neg,
}

impl UnOp {
    pub fn reduce(self, value: &Value) -> Result<Value, Error> {
        match self {
            UnOp::Not => Ok(Value::Boolean(!value.is_truthy())),
            UnOp::Neg => value.neg(),
        }
    }
}

#[derive(
    Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
pub enum AggKind {
    #[strum(to_string = "count")]
    Count,
    #[strum(to_string = "sum")]
    Sum,
    #[strum(to_string = "mean")]
    Mean,
    #[strum(to_string = "median")]
    Median,
    #[strum(to_string = "has")]
    Has,
    #[strum(to_string = "collect")]
    Collect,
}

impl Expr {
    /// Build an n-ary binary node. Operands that are themselves binary nodes
    /// of the same operator are flattened in place, keeping the operand
    /// sequence left-associative. For `precalc` operators, adjacent plain
    /// operands of the same concrete type are pre-reduced; mixed-type
    /// operands are never reordered.
    pub fn binary<I>(op: BinOp, operands: I) -> Expr
    where
        I: IntoIterator<Item = Operand>,
    {
        let mut flat = Vec::new();
        for operand in operands {
            match operand {
                Operand::Expr(expr) if matches!(&expr.kind, ExprKind::Binary(b) if b.op == op) => {
                    match expr.kind {
                        ExprKind::Binary(binary) => flat.extend(binary.operands),
                        _ => unreachable!(),
                    }
                }
                other => flat.push(other),
            }
        }

        let operands = if op.precalc() {
            fold_constants(op, flat)
        } else {
            flat
        };

        Expr::new(ExprKind::Binary(BinaryExpr { op, operands }))
    }

    pub fn unary(op: UnOp, operand: impl Into<Operand>) -> Expr {
        Expr::new(ExprKind::Unary(UnaryExpr {
            op,
            operand: operand.into(),
        }))
    }

    pub fn literal(value: impl Into<Value>) -> Expr {
        Expr::new(ExprKind::Literal(value.into()))
    }

    /// Chained attribute access: `field("cart").attr("items")`.
    pub fn attr(self, name: impl Into<Operand>) -> Expr {
        Expr::new(ExprKind::GetAttr {
            name: name.into(),
            parent: Box::new(self),
        })
    }

    /// Index or key access: `field("items").index(0)`.
    pub fn index(self, key: impl Into<Operand>) -> Expr {
        Expr::new(ExprKind::GetItem {
            key: key.into(),
            parent: Box::new(self),
        })
    }

    /// Method invocation: `field("name").attr("trim").call([])`.
    pub fn call<I>(self, args: I) -> Expr
    where
        I: IntoIterator,
        I::Item: Into<Operand>,
    {
        Expr::new(ExprKind::Call {
            args: args.into_iter().map(Into::into).collect(),
            parent: Box::new(self),
        })
    }

    /// Refine an aggregation with an inner query; the last `where_` wins.
    /// Has no effect on non-aggregation expressions.
    pub fn where_(self, query: impl Into<Expr>) -> Expr {
        match self.kind {
            ExprKind::Aggregation(agg) => Expr::new(ExprKind::Aggregation(Aggregation {
                query: Some(Box::new(query.into())),
                ..agg
            })),
            kind => Expr { kind },
        }
    }

    pub fn eq(self, other: impl Into<Operand>) -> Expr {
        Expr::binary(BinOp::Eq, [self.into(), other.into()])
    }

    pub fn ne(self, other: impl Into<Operand>) -> Expr {
        Expr::binary(BinOp::Ne, [self.into(), other.into()])
    }

    pub fn gt(self, other: impl Into<Operand>) -> Expr {
        Expr::binary(BinOp::Gt, [self.into(), other.into()])
    }

    pub fn gte(self, other: impl Into<Operand>) -> Expr {
        Expr::binary(BinOp::Gte, [self.into(), other.into()])
    }

    pub fn lt(self, other: impl Into<Operand>) -> Expr {
        Expr::binary(BinOp::Lt, [self.into(), other.into()])
    }

    pub fn lte(self, other: impl Into<Operand>) -> Expr {
        Expr::binary(BinOp::Lte, [self.into(), other.into()])
    }

    pub fn and(self, other: impl Into<Operand>) -> Expr {
        Expr::binary(BinOp::And, [self.into(), other.into()])
    }

    pub fn or(self, other: impl Into<Operand>) -> Expr {
        Expr::binary(BinOp::Or, [self.into(), other.into()])
    }

    pub fn floordiv(self, other: impl Into<Operand>) -> Expr {
        Expr::binary(BinOp::FloorDiv, [self.into(), other.into()])
    }

    pub fn pow(self, other: impl Into<Operand>) -> Expr {
        Expr::binary(BinOp::Pow, [self.into(), other.into()])
    }
}

/// Pre-reduce runs of adjacent plain operands of the same concrete type.
/// Only called for associative (`precalc`) operators, so reducing a run is
/// equivalent to reducing its members one pair at a time at evaluation.
fn fold_constants(op: BinOp, operands: Vec<Operand>) -> Vec<Operand> {
    let mut folded: Vec<Operand> = Vec::with_capacity(operands.len());
    for operand in operands {
        if let (Some(Operand::Value(acc)), Operand::Value(value)) = (folded.last(), &operand) {
            if discriminant(acc) == discriminant(value) {
                if let Ok(reduced) = op.reduce(acc, value) {
                    *folded.last_mut().expect("non-empty") = Operand::Value(reduced);
                    continue;
                }
            }
        }
        folded.push(operand);
    }
    folded
}

impl From<Expr> for Operand {
    fn from(expr: Expr) -> Self {
        Operand::Expr(Box::new(expr))
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

impl From<bool> for Operand {
    fn from(value: bool) -> Self {
        Operand::Value(value.into())
    }
}

impl From<i64> for Operand {
    fn from(value: i64) -> Self {
        Operand::Value(value.into())
    }
}

impl From<i32> for Operand {
    fn from(value: i32) -> Self {
        Operand::Value(value.into())
    }
}

impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        Operand::Value(value.into())
    }
}

impl From<&str> for Operand {
    fn from(value: &str) -> Self {
        Operand::Value(value.into())
    }
}

impl From<String> for Operand {
    fn from(value: String) -> Self {
        Operand::Value(value.into())
    }
}
