//! Attribute definitions.

use serde_json::Value;

/// Declared type of a scalar attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    String,
    Number,
    Boolean,
    /// Any JSON-compatible value.
    Json,
    /// Anything at all; passed through to the adapter untouched.
    Ref,
}

impl ScalarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Number => "number",
            ScalarType::Boolean => "boolean",
            ScalarType::Json => "json",
            ScalarType::Ref => "ref",
        }
    }

    /// The value a new record gets when the attribute is omitted and has no
    /// default.
    pub fn base_value(&self) -> Value {
        match self {
            ScalarType::String => Value::String(String::new()),
            ScalarType::Number => Value::from(0),
            ScalarType::Boolean => Value::Bool(false),
            ScalarType::Json | ScalarType::Ref => Value::Null,
        }
    }
}

/// The shape of an attribute. Exactly one of the three holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeKind {
    /// A plain value of a declared type.
    Scalar(ScalarType),
    /// A singular association holding the target's primary key.
    Model { target: String },
    /// A plural association.
    Collection {
        target: String,
        /// Attribute on the target (or on `through`) pointing back here.
        via: Option<String>,
        /// Explicit junction model.
        through: Option<String>,
    },
}

/// An attribute of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDef {
    pub name: String,
    pub kind: AttributeKind,
    /// Physical column name.
    pub column_name: String,
    pub required: bool,
    pub default_value: Option<Value>,
    pub auto_increment: bool,
    pub auto_created_at: bool,
    pub auto_updated_at: bool,
    pub unique: bool,
    /// For many-to-many: this side's datastore houses the junction.
    pub dominant: bool,
}

impl AttributeDef {
    /// Create an optional attribute of the given kind.
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        let name = name.into();
        Self {
            column_name: name.clone(),
            name,
            kind,
            required: false,
            default_value: None,
            auto_increment: false,
            auto_created_at: false,
            auto_updated_at: false,
            unique: false,
            dominant: false,
        }
    }

    pub fn scalar(name: impl Into<String>, ty: ScalarType) -> Self {
        Self::new(name, AttributeKind::Scalar(ty))
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::scalar(name, ScalarType::String)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::scalar(name, ScalarType::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::scalar(name, ScalarType::Boolean)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::scalar(name, ScalarType::Json)
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Self::scalar(name, ScalarType::Ref)
    }

    /// Singular association to `target`.
    pub fn model(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            AttributeKind::Model {
                target: target.into(),
            },
        )
    }

    /// Plural association to `target`.
    pub fn collection(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            AttributeKind::Collection {
                target: target.into(),
                via: None,
                through: None,
            },
        )
    }

    /// Set `via` on a plural association.
    pub fn via(mut self, via: impl Into<String>) -> Self {
        if let AttributeKind::Collection { via: v, .. } = &mut self.kind {
            *v = Some(via.into());
        }
        self
    }

    /// Set `through` on a plural association.
    pub fn through(mut self, through: impl Into<String>) -> Self {
        if let AttributeKind::Collection { through: t, .. } = &mut self.kind {
            *t = Some(through.into());
        }
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column_name = column.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn auto_created_at(mut self) -> Self {
        self.auto_created_at = true;
        self
    }

    pub fn auto_updated_at(mut self) -> Self {
        self.auto_updated_at = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn dominant(mut self) -> Self {
        self.dominant = true;
        self
    }

    /// Declared scalar type, if this is a scalar.
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self.kind {
            AttributeKind::Scalar(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn is_plural(&self) -> bool {
        matches!(self.kind, AttributeKind::Collection { .. })
    }

    pub fn is_singular_association(&self) -> bool {
        matches!(self.kind, AttributeKind::Model { .. })
    }

    pub fn is_association(&self) -> bool {
        !matches!(self.kind, AttributeKind::Scalar(_))
    }

    /// Identity of the associated model, for associations.
    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            AttributeKind::Model { target } | AttributeKind::Collection { target, .. } => {
                Some(target)
            }
            AttributeKind::Scalar(_) => None,
        }
    }
}
