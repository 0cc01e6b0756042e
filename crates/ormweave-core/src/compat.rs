//! Compatibility shims for deprecated query shapes.
//!
//! Each shim is independently toggleable. An enabled shim accepts the shape,
//! logs a warning and applies the documented fallback; a disabled shim rejects
//! the shape as highly irregular.

use serde::{Deserialize, Serialize};

/// Toggles for deprecated-but-tolerated usages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatOptions {
    /// `null` criteria or `null` where clause means "match everything".
    pub null_criteria: bool,
    /// A negative `limit` means "no limit".
    pub negative_limit: bool,
    /// Mongo-style sort dictionaries (`{ name: 1, age: -1 }`).
    pub mongo_sort: bool,
    /// Modifier aliases such as `lessThan` and `not`.
    pub modifier_aliases: bool,
    /// Attribute names mixed in beside clause names are folded into `where`.
    pub loose_top_level_keys: bool,
}

impl Default for CompatOptions {
    fn default() -> Self {
        Self::tolerant()
    }
}

impl CompatOptions {
    /// Accept every deprecated shape (with warnings).
    pub fn tolerant() -> Self {
        Self {
            null_criteria: true,
            negative_limit: true,
            mongo_sort: true,
            modifier_aliases: true,
            loose_top_level_keys: true,
        }
    }

    /// Reject every deprecated shape.
    pub fn strict() -> Self {
        Self {
            null_criteria: false,
            negative_limit: false,
            mongo_sort: false,
            modifier_aliases: false,
            loose_top_level_keys: false,
        }
    }

    pub fn null_criteria(mut self, enabled: bool) -> Self {
        self.null_criteria = enabled;
        self
    }

    pub fn negative_limit(mut self, enabled: bool) -> Self {
        self.negative_limit = enabled;
        self
    }

    pub fn mongo_sort(mut self, enabled: bool) -> Self {
        self.mongo_sort = enabled;
        self
    }

    pub fn modifier_aliases(mut self, enabled: bool) -> Self {
        self.modifier_aliases = enabled;
        self
    }

    pub fn loose_top_level_keys(mut self, enabled: bool) -> Self {
        self.loose_top_level_keys = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_tolerant() {
        assert_eq!(CompatOptions::default(), CompatOptions::tolerant());
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let opts: CompatOptions = serde_json::from_str(r#"{ "mongo_sort": false }"#).unwrap();
        assert!(!opts.mongo_sort);
        assert!(opts.negative_limit);
    }
}
