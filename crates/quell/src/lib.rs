//! Dual-backend evaluation for the quell query language.
//!
//! One expression, two interpreters:
//! ```ascii
//!                 Expr (quell-ast)
//!
//!                 │            │
//!  LambdaCompiler │            │ SqlCompiler
//!                 │            │
//!                 ▼            ▼
//!
//!       record -> value      sqlparser clause
//!
//!                 │            │
//!  MemoryQuerySet │            │ SqlQuerySet
//!                 ▼            ▼
//!
//!        pipeline stages     SELECT ... WHERE
//! ```
//! Both sides implement the same [QuerySet] contract and must agree on
//! results for every expression built from the common subset.

pub use quell_ast as ast;
pub use quell_ast::error::{Error, Reason, Result, WithErrorInfo};
pub use quell_ast::{builder, expr, value};

pub mod memory;
pub mod queryset;
pub mod sql;

pub use memory::{Access, LambdaCompiler, MemoryQuerySet};
pub use queryset::{IntoQueries, QuerySet};
pub use sql::{Schema, Session, SqlCompiler, SqlQuerySet, Table};

use quell_ast::expr::Expr;

/// JSON serialization of an expression.
pub fn json_of_expr(expr: &Expr) -> Result<String> {
    Ok(serde_json::to_string(expr)?)
}

/// JSON deserialization of an expression.
pub fn expr_of_json(json: &str) -> Result<Expr> {
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod test {
    use quell_ast::builder::{count, field};

    use super::*;

    #[test]
    fn expressions_round_trip_through_json() {
        let expr = count("items").where_(field("quantity").gt(0)).eq(0);
        let json = json_of_expr(&expr).unwrap();
        assert_eq!(expr_of_json(&json).unwrap(), expr);
    }
}
