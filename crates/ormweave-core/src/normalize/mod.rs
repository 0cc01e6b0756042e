//! Criteria and value normalization.
//!
//! A [`Normalizer`] validates loosely shaped caller input against a model and
//! rewrites it into its canonical form:
//!
//! - [`criteria`](Normalizer::criteria) - `where`, `limit`, `skip`, `sort`, `select`, `omit`
//! - [`where_clause`](Normalizer::where_clause) - predicate trees, fractured and simplified
//! - [`filter`](Normalizer::filter) - single-attribute constraints
//! - [`pk_value`](Normalizer::pk_value) and friends - primary keys and attribute values
//! - [`new_record`](Normalizer::new_record) / [`values_to_set`](Normalizer::values_to_set) - write payloads
//!
//! Normalization is idempotent: feeding a normalized criteria back in yields
//! the same criteria.

mod criteria;
mod error;
mod filter;
mod record;
mod value;
mod where_clause;

pub use error::{CriteriaError, FilterError, ValueError};
pub use filter::FilterOutcome;
pub use value::coerce_scalar;
pub use where_clause::MAX_WHERE_DEPTH;

use chrono::{DateTime, Utc};

use crate::compat::CompatOptions;
use crate::ontology::{AttributeDef, ModelDef, Ontology};

/// Validates and canonicalizes caller input against an [`Ontology`].
#[derive(Debug, Clone, Copy)]
pub struct Normalizer<'a> {
    ontology: &'a Ontology,
    compat: CompatOptions,
    now: Option<DateTime<Utc>>,
}

impl<'a> Normalizer<'a> {
    pub fn new(ontology: &'a Ontology) -> Self {
        Self {
            ontology,
            compat: CompatOptions::default(),
            now: None,
        }
    }

    pub fn with_compat(mut self, compat: CompatOptions) -> Self {
        self.compat = compat;
        self
    }

    /// Pin the clock used for automatic timestamps.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn ontology(&self) -> &'a Ontology {
        self.ontology
    }

    pub fn compat(&self) -> &CompatOptions {
        &self.compat
    }

    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    /// Model an association attribute points at.
    fn target_model(&self, attr: &AttributeDef) -> Result<&'a ModelDef, String> {
        let target = attr
            .target()
            .ok_or_else(|| format!("`{}` is not an association", attr.name))?;
        self.ontology
            .get_model(target)
            .map_err(|e| e.to_string())
    }
}
