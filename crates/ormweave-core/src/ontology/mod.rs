//! Model registry.
//!
//! Models, their attributes, the junction models generated for
//! many-to-many associations, and the per-model name transformer.

mod attribute;
mod model;
mod registry;
mod transformer;

pub use attribute::{AttributeDef, AttributeKind, ScalarType};
pub use model::{ModelDef, DEFAULT_DATASTORE};
pub use registry::{Association, JunctionLink, Ontology, OntologyBuilder, JUNCTION_PRIMARY_KEY};
pub use transformer::Transformer;
