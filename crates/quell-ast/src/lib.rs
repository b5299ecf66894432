//! Abstract syntax tree of the quell query language.
//!
//! Expressions are built with the fluent [builder] API and interpreted by
//! the backends in the `quell` crate. Nodes form a DAG of shared,
//! immutable sub-expressions; operator semantics live on the op enums
//! ([expr::BinOp], [expr::UnOp], [expr::AggKind]) as data, so backends
//! dispatch on variant tags rather than on a class hierarchy.

pub mod builder;
pub mod error;
pub mod expr;
mod display;
mod ops;
pub mod value;

pub use error::{Error, Reason, Result, WithErrorInfo};
pub use expr::{AggKind, Aggregation, BinOp, BinaryExpr, Expr, ExprKind, Operand, UnOp, UnaryExpr};
pub use value::{Record, Value};
