//! Nested lifetime scopes hosting injectable components and background runnables.
//!
//! A [`Context`] is a node in an ownership tree. Parents own their children,
//! children hold only weak back-references, and teardown cascades depth-first so
//! every child (and every runnable registered with it) stops before its parent
//! finishes. Components injected into a context are visible to all descendants.

mod context;
mod error;

#[cfg(test)]
mod tests;

pub use context::{Context, ContextState, Global, RunnableEntry};
pub use error::{ContextError, ContextResult};
