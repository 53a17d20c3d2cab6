use context::ContextError;
use thiserror::Error;

pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("filter `{filter}` is already registered with the same arguments")]
    DuplicateFilter { filter: String },

    #[error("decoration `{decoration}` is already attached to packet {packet}")]
    DuplicateDecoration { decoration: String, packet: u64 },

    #[error("filter registry is frozen; `{filter}` was not registered")]
    RegistryFrozen { filter: String },

    #[error("packet factory is stopped")]
    FactoryStopped,

    #[error("invalid descriptor for `{filter}`: {reason}")]
    InvalidDescriptor { filter: String, reason: &'static str },

    #[error("filter `{filter}` does not declare `{decoration}` as an input")]
    UndeclaredInput { filter: String, decoration: String },

    #[error("filter `{filter}` does not declare `{decoration}` as an output")]
    UndeclaredOutput { filter: String, decoration: String },

    #[error("decoration `{decoration}` is not available to filter `{filter}`")]
    MissingDecoration { filter: String, decoration: String },

    #[error("filter `{filter}` failed: {reason}")]
    FilterFailed { filter: String, reason: String },

    #[error(transparent)]
    Context(#[from] ContextError),
}
