use thiserror::Error;

use crate::error::{Error, UsageCode, UsageError, ValidationCause};

/// Failure to normalize a criteria.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CriteriaError {
    #[error("highly irregular criteria: {0}")]
    HighlyIrregular(String),

    /// The criteria provably matches no records.
    #[error("criteria would match nothing: {0}")]
    WouldMatchNothing(String),

    #[error("filter not usable: {0}")]
    FilterNotUsable(String),

    #[error("{0}")]
    Consistency(String),
}

impl CriteriaError {
    pub fn cause(&self) -> Option<ValidationCause> {
        match self {
            CriteriaError::HighlyIrregular(_) => Some(ValidationCause::HighlyIrregular),
            CriteriaError::WouldMatchNothing(_) => Some(ValidationCause::WouldMatchNothing),
            CriteriaError::FilterNotUsable(_) => Some(ValidationCause::FilterNotUsable),
            CriteriaError::Consistency(_) => None,
        }
    }

    /// Surface as a crate error under `code`.
    pub fn into_error(self, code: UsageCode) -> Error {
        match (self.cause(), self) {
            (Some(cause), e) => UsageError::with_cause(code, cause, e.to_string()).into(),
            (None, e) => Error::Consistency(e.to_string()),
        }
    }
}

/// Failure to normalize a single filter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("highly irregular filter: {0}")]
    HighlyIrregular(String),

    #[error("filter not usable: {0}")]
    FilterNotUsable(String),

    #[error("{0}")]
    Consistency(String),
}

/// Failure to normalize a value or record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("highly irregular value: {0}")]
    HighlyIrregular(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("missing required value: {0}")]
    MissingRequired(String),

    #[error("invalid primary key value: {0}")]
    InvalidPkValue(String),

    #[error("{0}")]
    Consistency(String),
}

impl ValueError {
    pub fn cause(&self) -> Option<ValidationCause> {
        match self {
            ValueError::HighlyIrregular(_) => Some(ValidationCause::HighlyIrregular),
            ValueError::TypeMismatch(_) => Some(ValidationCause::TypeMismatch),
            ValueError::MissingRequired(_) => Some(ValidationCause::MissingRequired),
            ValueError::InvalidPkValue(_) => Some(ValidationCause::InvalidPkValue),
            ValueError::Consistency(_) => None,
        }
    }

    /// Surface as a crate error under `code`. Missing required values always
    /// surface as [`UsageCode::MissingRequired`].
    pub fn into_error(self, code: UsageCode) -> Error {
        let code = match self {
            ValueError::MissingRequired(_) => UsageCode::MissingRequired,
            _ => code,
        };
        match (self.cause(), self) {
            (Some(cause), e) => UsageError::with_cause(code, cause, e.to_string()).into(),
            (None, e) => Error::Consistency(e.to_string()),
        }
    }
}

impl From<ValueError> for FilterError {
    fn from(e: ValueError) -> Self {
        match e {
            ValueError::Consistency(msg) => FilterError::Consistency(msg),
            other => FilterError::FilterNotUsable(other.to_string()),
        }
    }
}
