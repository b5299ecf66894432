//! In-memory backend: compiles expressions to record-level closures and
//! threads materialized sources through a pipeline of pure stages.

mod compiler;
mod queryset;

pub use compiler::{Access, Accessor, Compiled, LambdaCompiler};
pub use queryset::{MemoryQuerySet, Source};
