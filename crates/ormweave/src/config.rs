//! Facade configuration.

use ormweave_core::CompatOptions;
use serde::{Deserialize, Serialize};

/// Records fetched per round trip while streaming.
pub const DEFAULT_STREAM_BATCH_SIZE: u64 = 30;

/// Configuration for an [`Orm`](crate::Orm).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrmConfig {
    /// Which deprecated query shapes are still tolerated.
    pub compat: CompatOptions,

    /// Records fetched per batch by `stream`.
    pub stream_batch_size: u64,

    /// Fail `find_one` when more than one record matches.
    pub find_one_guard: bool,
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            compat: CompatOptions::default(),
            stream_batch_size: DEFAULT_STREAM_BATCH_SIZE,
            find_one_guard: true,
        }
    }
}

impl OrmConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every deprecated query shape.
    pub fn strict() -> Self {
        Self {
            compat: CompatOptions::strict(),
            ..Default::default()
        }
    }

    /// Load a configuration from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Set the compatibility shims.
    pub fn with_compat(mut self, compat: CompatOptions) -> Self {
        self.compat = compat;
        self
    }

    /// Set the stream batch size. Zero is treated as one.
    pub fn with_stream_batch_size(mut self, size: u64) -> Self {
        self.stream_batch_size = size.max(1);
        self
    }

    /// Enable or disable the `find_one` multiple-match guard.
    pub fn with_find_one_guard(mut self, enabled: bool) -> Self {
        self.find_one_guard = enabled;
        self
    }
}
