use runnable::RunnableError;
use thiserror::Error;

pub type ContextResult<T> = Result<T, ContextError>;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("context `{context}` is torn down")]
    ContextTornDown { context: String },

    #[error("context `{context}` already holds a member of type `{member}`")]
    DuplicateMember { context: String, member: String },

    #[error(transparent)]
    Runnable(#[from] RunnableError),
}
