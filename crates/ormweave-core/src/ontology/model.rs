//! Model definitions.

use super::attribute::{AttributeDef, ScalarType};

/// Name of the datastore a model lands on when none is given.
pub const DEFAULT_DATASTORE: &str = "default";

/// A model: a named entity with attributes, stored in one table on one
/// datastore.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDef {
    /// Unique identity (lower-case model name).
    pub identity: String,
    /// Physical table or collection name.
    pub table_name: String,
    /// Datastore the table lives on.
    pub datastore: String,
    /// Name of the primary-key attribute.
    pub primary_key: String,
    /// Attributes, in declaration order.
    pub attributes: Vec<AttributeDef>,
    /// `true` rejects unrecognized attributes; `false` tolerates them as opaque JSON.
    pub schema: bool,
    /// Generated junction model for a many-to-many association.
    pub junction: bool,
}

impl ModelDef {
    /// Create a model whose table is named after its identity.
    pub fn new(identity: impl Into<String>, primary_key: impl Into<String>) -> Self {
        let identity = identity.into();
        Self {
            table_name: identity.clone(),
            identity,
            datastore: DEFAULT_DATASTORE.to_string(),
            primary_key: primary_key.into(),
            attributes: Vec::new(),
            schema: true,
            junction: false,
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table_name = table.into();
        self
    }

    pub fn with_datastore(mut self, datastore: impl Into<String>) -> Self {
        self.datastore = datastore.into();
        self
    }

    pub fn with_attribute(mut self, attribute: AttributeDef) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_attributes(mut self, attributes: impl IntoIterator<Item = AttributeDef>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    /// Tolerate attributes that are not declared.
    pub fn schemaless(mut self) -> Self {
        self.schema = false;
        self
    }

    pub fn get_attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Find the attribute stored in `column`.
    pub fn attribute_for_column(&self, column: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.column_name == column)
    }

    pub fn primary_key_attribute(&self) -> Option<&AttributeDef> {
        self.get_attribute(&self.primary_key)
    }

    /// Column holding the primary key.
    pub fn primary_key_column(&self) -> &str {
        self.primary_key_attribute()
            .map(|a| a.column_name.as_str())
            .unwrap_or(&self.primary_key)
    }

    /// Declared type of the primary key.
    pub fn primary_key_type(&self) -> Option<ScalarType> {
        self.primary_key_attribute().and_then(|a| a.scalar_type())
    }

    /// Column for `attr`, or `attr` itself for undeclared attributes.
    pub fn column_of<'a>(&'a self, attr: &'a str) -> &'a str {
        self.get_attribute(attr)
            .map(|a| a.column_name.as_str())
            .unwrap_or(attr)
    }

    /// Attributes stored in this model's table (everything but plural
    /// associations).
    pub fn stored_attributes(&self) -> impl Iterator<Item = &AttributeDef> {
        self.attributes.iter().filter(|a| !a.is_plural())
    }

    pub fn plural_attributes(&self) -> impl Iterator<Item = &AttributeDef> {
        self.attributes.iter().filter(|a| a.is_plural())
    }
}
