//! Core error types.

use std::fmt;

use thiserror::Error;

use crate::adapter::AdapterError;

/// Stable codes for usage errors reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageCode {
    InvalidCriteria,
    InvalidPopulates,
    InvalidNewRecord,
    InvalidNewRecords,
    InvalidValuesToSet,
    InvalidTargetRecordIds,
    InvalidCollectionAttrName,
    InvalidAssociatedIds,
    InvalidNumericAttrName,
    InvalidStreamIteratee,
    InvalidMeta,
    UnrecognizedQueryKey,
    MissingRequired,
    /// The query provably does nothing (matches no records, empty id list).
    Noop,
}

impl UsageCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageCode::InvalidCriteria => "E_INVALID_CRITERIA",
            UsageCode::InvalidPopulates => "E_INVALID_POPULATES",
            UsageCode::InvalidNewRecord => "E_INVALID_NEW_RECORD",
            UsageCode::InvalidNewRecords => "E_INVALID_NEW_RECORDS",
            UsageCode::InvalidValuesToSet => "E_INVALID_VALUES_TO_SET",
            UsageCode::InvalidTargetRecordIds => "E_INVALID_TARGET_RECORD_IDS",
            UsageCode::InvalidCollectionAttrName => "E_INVALID_COLLECTION_ATTR_NAME",
            UsageCode::InvalidAssociatedIds => "E_INVALID_ASSOCIATED_IDS",
            UsageCode::InvalidNumericAttrName => "E_INVALID_NUMERIC_ATTR_NAME",
            UsageCode::InvalidStreamIteratee => "E_INVALID_STREAM_ITERATEE",
            UsageCode::InvalidMeta => "E_INVALID_META",
            UsageCode::UnrecognizedQueryKey => "E_UNRECOGNIZED_QUERY_KEY",
            UsageCode::MissingRequired => "E_REQUIRED",
            UsageCode::Noop => "E_NOOP",
        }
    }
}

impl fmt::Display for UsageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The lower-level validation failure behind a usage error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationCause {
    HighlyIrregular,
    WouldMatchNothing,
    WouldMatchEverything,
    FilterNotUsable,
    MissingRequired,
    InvalidPkValue,
    TypeMismatch,
}

impl fmt::Display for ValidationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationCause::HighlyIrregular => "E_HIGHLY_IRREGULAR",
            ValidationCause::WouldMatchNothing => "E_WOULD_MATCH_NOTHING",
            ValidationCause::WouldMatchEverything => "E_WOULD_MATCH_EVERYTHING",
            ValidationCause::FilterNotUsable => "E_FILTER_NOT_USABLE",
            ValidationCause::MissingRequired => "E_REQUIRED",
            ValidationCause::InvalidPkValue => "E_INVALID_PK_VALUE",
            ValidationCause::TypeMismatch => "E_TYPE",
        };
        f.write_str(s)
    }
}

/// A caller-recoverable validation error with a stable code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {details}")]
pub struct UsageError {
    pub code: UsageCode,
    pub cause: Option<ValidationCause>,
    pub details: String,
}

impl UsageError {
    pub fn new(code: UsageCode, details: impl Into<String>) -> Self {
        Self {
            code,
            cause: None,
            details: details.into(),
        }
    }

    pub fn with_cause(code: UsageCode, cause: ValidationCause, details: impl Into<String>) -> Self {
        Self {
            code,
            cause: Some(cause),
            details: details.into(),
        }
    }

    /// Check whether this error means "nothing to do".
    pub fn is_noop(&self) -> bool {
        self.code == UsageCode::Noop
    }
}

/// Core errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller misuse; safe to report back verbatim.
    #[error("usage error: {0}")]
    Usage(#[from] UsageError),

    /// An invariant an earlier stage should have guaranteed does not hold.
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// The model identity is not registered.
    #[error("model `{0}` is not registered")]
    ModelNotRegistered(String),

    /// The attribute is not registered on the model.
    #[error("attribute `{attribute}` is not registered on model `{model}`")]
    AttributeNotRegistered { model: String, attribute: String },

    /// No adapter is registered under the datastore name.
    #[error("datastore `{0}` is not registered")]
    DatastoreNotRegistered(String),

    /// Error returned by a backend adapter.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// A record could not be transformed for a backend.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// A query could not be transformed for a backend.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// `findOne` matched more than one record.
    #[error("more than one `{model}` record matched ({count})")]
    MultipleMatches { model: String, count: usize },
}

impl Error {
    /// Build a usage error.
    pub fn usage(code: UsageCode, details: impl Into<String>) -> Self {
        Error::Usage(UsageError::new(code, details))
    }

    /// The usage error, if this is one.
    pub fn as_usage(&self) -> Option<&UsageError> {
        match self {
            Error::Usage(e) => Some(e),
            _ => None,
        }
    }

    /// The usage code, if this is a usage error.
    pub fn usage_code(&self) -> Option<UsageCode> {
        self.as_usage().map(|e| e.code)
    }

    /// Whether this error points at a defect rather than caller misuse.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, Error::Consistency(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
