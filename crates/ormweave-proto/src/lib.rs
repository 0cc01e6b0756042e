//! ormweave query IR.
//!
//! This crate defines the typed intermediate representation that flows through
//! the ormweave query compiler:
//!
//! - [`method`] - Query methods and the payload keys each accepts
//! - [`criteria`] - Normalized criteria (`where`, `limit`, `skip`, `sort`, `select`, `omit`)
//! - [`where_clause`] - Normalized predicate trees
//! - [`query`] - Stage-one, stage-two and stage-three queries
//! - [`join`] - Join descriptors addressed with physical names
//! - [`record`] - Record dictionaries
//!
//! Normalized values serialize back to the dictionary form callers use, so a
//! normalized criteria can be fed through normalization again.

pub mod criteria;
pub mod error;
pub mod join;
pub mod method;
pub mod query;
pub mod record;
pub mod where_clause;

pub use criteria::{Criteria, SortDirection, SortDirective, MAX_SAFE_INTEGER, SELECT_ALL};
pub use error::Error;
pub use join::{group_by_alias, Join, JoinGroup};
pub use method::{Method, QueryKey};
pub use query::{IterateeKind, Populate, Stage1Query, Stage2Query, Stage3Query};
pub use record::{record, value_key, Record};
pub use where_clause::{Constraint, Filter, Modifier, WhereClause};
