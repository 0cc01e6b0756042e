//! Backend adapter contract.
//!
//! Every datastore is reached through an [`Adapter`]. Adapters only ever see
//! stage-three queries: physical table names, column-named criteria and
//! payloads, and join descriptors.

mod memory;

pub use memory::{CallLog, CallRecord, MemoryAdapter, TableDef};

use async_trait::async_trait;
use ormweave_proto::{Record, Stage3Query};
use thiserror::Error;

/// Errors reported by adapters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdapterError {
    /// A uniqueness constraint was violated. `keys` names the offending
    /// columns (attribute names once surfaced by the ORM).
    #[error("E_UNIQUE: {message} ({keys:?})")]
    Unique { keys: Vec<String>, message: String },

    /// Any other backend failure.
    #[error("{0}")]
    Backend(String),

    /// The adapter does not implement this capability.
    #[error("adapter does not support `{0}`")]
    Unsupported(&'static str),
}

impl AdapterError {
    /// Stable error code, when the backend reports one.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            AdapterError::Unique { .. } => Some("E_UNIQUE"),
            _ => None,
        }
    }
}

/// Result type for adapter calls.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// The capability contract of one backend connection.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Adapter name, used in logs.
    fn identity(&self) -> &str;

    /// Whether [`Adapter::join`] is implemented.
    fn supports_join(&self) -> bool {
        false
    }

    /// Fetch records matching `query.criteria`.
    async fn find(&self, query: &Stage3Query) -> AdapterResult<Vec<Record>>;

    /// Fetch records with every join in `query.joins` resolved.
    ///
    /// Each returned parent record carries one key per join alias: a child
    /// record or `null` for singular associations, an array for plural ones.
    /// Child records stay column-named.
    async fn join(&self, _query: &Stage3Query) -> AdapterResult<Vec<Record>> {
        Err(AdapterError::Unsupported("join"))
    }

    /// Insert `query.new_record` and return the stored record.
    async fn create(&self, query: &Stage3Query) -> AdapterResult<Record>;

    /// Insert every record of `query.new_records`.
    async fn create_each(&self, query: &Stage3Query) -> AdapterResult<Vec<Record>>;

    /// Apply `query.values_to_set` to matching records and return them.
    async fn update(&self, query: &Stage3Query) -> AdapterResult<Vec<Record>>;

    /// Delete matching records and return them.
    async fn destroy(&self, query: &Stage3Query) -> AdapterResult<Vec<Record>>;

    async fn count(&self, query: &Stage3Query) -> AdapterResult<u64>;

    /// Sum of `query.numeric_attr_name` over matching records.
    async fn sum(&self, query: &Stage3Query) -> AdapterResult<f64>;

    /// Mean of `query.numeric_attr_name` over matching records (`0` when none
    /// match).
    async fn avg(&self, query: &Stage3Query) -> AdapterResult<f64>;
}
