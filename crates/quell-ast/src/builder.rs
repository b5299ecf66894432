//! Entry points of the fluent DSL.
//!
//! ```
//! use quell_ast::builder::{field, has};
//!
//! let eligible = field("points").gte(1000);
//! let welcomed = has("giftcards").where_(field("reason").eq("welcome giftcard"));
//! ```

use crate::expr::{AggKind, Aggregation, Expr, ExprKind};
use crate::value::Value;

/// Start a field-reference chain.
pub fn field(name: impl Into<String>) -> Expr {
    Expr::new(ExprKind::Field(name.into()))
}

/// Wrap a constant so it participates in the expression algebra.
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::literal(value)
}

fn aggregation(kind: AggKind, field: impl Into<String>) -> Expr {
    Expr::new(ExprKind::Aggregation(Aggregation {
        kind,
        field: field.into(),
        query: None,
    }))
}

/// Number of elements of a record-local collection, after the optional
/// `where_` refinement.
pub fn count(field: impl Into<String>) -> Expr {
    aggregation(AggKind::Count, field)
}

/// Sum of the projected elements; an empty sum is zero.
pub fn sum(field: impl Into<String>) -> Expr {
    aggregation(AggKind::Sum, field)
}

/// Sum divided by count; an error on empty collections.
pub fn mean(field: impl Into<String>) -> Expr {
    aggregation(AggKind::Mean, field)
}

/// Middle of the sorted projections (mean of the two middle elements for
/// even counts); null on empty collections.
pub fn median(field: impl Into<String>) -> Expr {
    aggregation(AggKind::Median, field)
}

/// True iff the collection is non-empty after the refinement.
pub fn has(field: impl Into<String>) -> Expr {
    aggregation(AggKind::Has, field)
}

/// The projected elements as a list, preserving source order.
pub fn collect(field: impl Into<String>) -> Expr {
    aggregation(AggKind::Collect, field)
}
