//! Error taxonomy shared by fetchers, the combinators and handlers.

use thiserror::Error;

/// Errors that can occur while loading or resolving graph data.
///
/// `NotFound`, `Backend` and `Missing` describe a single key and are
/// normally carried inside a [`Record`](crate::Record) and reported as a
/// path value. `Unauthorized` and `InvalidArgument` abort a whole handler
/// call before any backend is touched. A `Backend` error returned from a
/// fetch as a whole is delivered to every caller sharing that batch, which is
/// why this type is `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("not found")]
    NotFound,

    #[error("backend error: {0}")]
    Backend(String),

    #[error("fetcher returned no record for a requested key")]
    Missing,

    #[error("not authorized")]
    Unauthorized,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl Error {
    pub fn backend(cause: impl ToString) -> Self {
        Error::Backend(cause.to_string())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// True for the errors that abort a whole handler invocation rather than
    /// a single key.
    pub fn is_call_level(&self) -> bool {
        matches!(
            self,
            Error::Unauthorized | Error::InvalidArgument(..) | Error::Unsupported(..)
        )
    }
}

/// Result type for loading and resolution operations
pub type Result<T> = std::result::Result<T, Error>;
