//! ormweave - a model-level query compiler that spans datastores.
//!
//! Callers describe queries against models (`find`, `create`,
//! `addToCollection`, ...) with loosely shaped JSON. [`Orm`] validates them
//! against an [`Ontology`], compiles them into physical queries, plans the
//! work across the datastores involved and stitches populated associations
//! back together in memory when a backend cannot join natively.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use ormweave::{AttributeDef, MemoryAdapter, ModelDef, Ontology, Orm};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> ormweave::Result<()> {
//!     let ontology = Ontology::builder()
//!         .model(
//!             ModelDef::new("user", "id")
//!                 .with_attribute(AttributeDef::number("id").auto_increment())
//!                 .with_attribute(AttributeDef::string("name"))
//!                 .with_attribute(AttributeDef::collection("pets", "pet").via("owner")),
//!         )
//!         .model(
//!             ModelDef::new("pet", "id")
//!                 .with_attribute(AttributeDef::number("id").auto_increment())
//!                 .with_attribute(AttributeDef::string("name"))
//!                 .with_attribute(AttributeDef::model("owner", "user")),
//!         )
//!         .build()?;
//!
//!     let adapter = Arc::new(MemoryAdapter::for_datastore(&ontology, "default"));
//!     let orm = Orm::builder(ontology).datastore("default", adapter).build()?;
//!
//!     let alice = orm.create("user", json!({ "name": "alice" })).await?;
//!     orm.create("pet", json!({ "name": "rex", "owner": alice["id"] })).await?;
//!
//!     let users = orm
//!         .find("user", json!({ "name": "alice" }), json!({ "pets": true }))
//!         .await?;
//!     assert_eq!(users[0]["pets"][0]["name"], "rex");
//!     Ok(())
//! }
//! ```

mod collection;
mod config;
mod orm;
mod write;

pub use config::{OrmConfig, DEFAULT_STREAM_BATCH_SIZE};
pub use orm::{Iteratee, Orm, OrmBuilder};

pub use ormweave_core::{
    Adapter, AdapterError, AttributeDef, AttributeKind, CallLog, CompatOptions, Error,
    MemoryAdapter, ModelDef, Ontology, Result, ScalarType, TableDef, UsageCode, UsageError,
    ValidationCause,
};
pub use ormweave_proto::{Method, Record, Stage1Query, Stage2Query, Stage3Query};
