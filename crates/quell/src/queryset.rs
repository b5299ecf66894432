//! The contract both backends implement.

use quell_ast::error::Result;
use quell_ast::expr::Expr;
use quell_ast::value::Value;

/// Accepts a single query or a collection of them, so call sites read
/// `qs.filter(expr)` as well as `qs.filter([a, b])`.
pub trait IntoQueries {
    fn into_queries(self) -> Vec<Expr>;
}

impl IntoQueries for Expr {
    fn into_queries(self) -> Vec<Expr> {
        vec![self]
    }
}

impl IntoQueries for Vec<Expr> {
    fn into_queries(self) -> Vec<Expr> {
        self
    }
}

impl<const N: usize> IntoQueries for [Expr; N] {
    fn into_queries(self) -> Vec<Expr> {
        self.into()
    }
}

/// An immutable lazy collection with a fluent refinement API.
///
/// Refinements return new querysets; the receiver is never altered.
/// `execute` materializes: it re-reads the underlying source (or re-runs the
/// accumulated relational query) every time.
pub trait QuerySet: Sized {
    type Item;

    /// The queryset itself, unrefined.
    fn all(&self) -> Self;

    /// Keep records satisfying every query.
    fn filter(&self, queries: impl IntoQueries) -> Self;

    /// Keep records failing at least one query.
    fn exclude(&self, queries: impl IntoQueries) -> Self;

    /// Sort by the given fields, first field as the primary key; a negated
    /// field sorts descending. The sort is stable.
    fn order_by(&self, fields: impl IntoQueries) -> Self;

    /// `filter` plus "exactly one": [quell_ast::error::Reason::MultipleObjectsReturned]
    /// on surplus, [quell_ast::error::Reason::ObjectDoesNotExist] on absence.
    fn get(&self, queries: impl IntoQueries) -> Result<Self::Item>;

    fn first(&self) -> Result<Option<Self::Item>>;

    fn last(&self) -> Result<Option<Self::Item>>;

    /// Apply an aggregation expression to the queryset as a whole.
    fn aggregate(&self, agg: &Expr) -> Result<Value>;

    /// Materialize the records.
    fn execute(&self) -> Result<Vec<Self::Item>>;
}
