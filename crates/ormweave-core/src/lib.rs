//! ormweave core - query compiler, cross-datastore planner and join integrator.
//!
//! A read flows through the crate in one direction:
//!
//! 1. [`normalize`] canonicalizes loose criteria against a model
//! 2. [`forge::StageTwoForger`] validates a whole query per method
//! 3. [`forge::StageThreeForger`] rewrites it into column names and joins
//! 4. [`query::OperationPlanner`] decides which backend calls are needed
//! 5. [`query::OperationRunner`] runs them and fills a result cache
//! 6. [`query::integrate`] stitches cached results back into parent records

pub mod adapter;
pub mod compat;
pub mod datastore;
pub mod error;
pub mod forge;
pub mod normalize;
pub mod ontology;
pub mod query;

pub use adapter::{Adapter, AdapterError, AdapterResult, CallLog, CallRecord, MemoryAdapter, TableDef};
pub use compat::CompatOptions;
pub use datastore::Datastores;
pub use error::{Error, Result, UsageCode, UsageError, ValidationCause};
pub use forge::{StageThreeForger, StageTwoForger};
pub use normalize::{CriteriaError, FilterError, FilterOutcome, Normalizer, ValueError};
pub use ontology::{
    AttributeDef, AttributeKind, ModelDef, Ontology, OntologyBuilder, ScalarType, Transformer,
};
pub use query::{
    integrate, CacheBuilder, FilterEvaluator, Operation, OperationPlanner, OperationRunner, Plan,
    PlanState, QueryExecutor, ResultCache, Shaper,
};
