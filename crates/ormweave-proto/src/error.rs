//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding IR values from their textual form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The query method name is not one of the supported methods.
    #[error("unknown query method `{0}`")]
    UnknownMethod(String),

    /// The sort direction is neither `ASC` nor `DESC`.
    #[error("unknown sort direction `{0}`")]
    UnknownSortDirection(String),
}
