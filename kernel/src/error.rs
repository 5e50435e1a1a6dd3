// Error Taxonomy
//
// Shared result type for the consensus metadata layer. Storage and
// decoding failures are recoverable and returned to the caller;
// `InvalidState` marks a broken consensus contract and is fatal.

use crate::invariants::InvariantViolation;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already present: {0}")]
    AlreadyExists(String),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A consensus safety contract was broken by the caller.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid config: {0}")]
    InvalidConfig(#[from] InvariantViolation),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether the process should stop instead of continuing with
    /// possibly inconsistent consensus state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InvalidState(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }
}
