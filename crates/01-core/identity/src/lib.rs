//! Process-wide type identities shared by the context, dispatch, and diagnostic layers.
//!
//! This crate exposes the pieces every other layer keys off:
//! * [`TypeIdentity`] – a stable, copyable token naming one logical type for the
//!   lifetime of the process, interned on first use.
//! * [`short_name`] – strips module paths from a reflected type name, including
//!   inside generic arguments, for human-facing output.
//! * [`field_name`] – renders the `"ClassName.FieldName"` form consumed by
//!   configuration tooling.

mod name;
mod registry;

pub use name::{field_name, short_name};
pub use registry::TypeIdentity;
