//! Relational backend: lowers expressions to SQL through [sqlparser] and
//! executes them over SQLite.

mod compiler;
mod queryset;
mod schema;
mod session;

pub use compiler::SqlCompiler;
pub use queryset::SqlQuerySet;
pub use schema::{Relation, Schema, Table};
pub use session::Session;
