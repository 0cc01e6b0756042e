//! Primary-key and attribute value normalization.

use std::collections::HashSet;

use ormweave_proto::{value_key, MAX_SAFE_INTEGER};
use serde_json::{Number, Value};

use super::error::ValueError;
use super::Normalizer;
use crate::ontology::{AttributeDef, AttributeKind, ModelDef, ScalarType};

impl<'a> Normalizer<'a> {
    /// Normalize one primary-key value of `model`.
    ///
    /// Number keys must be non-negative safe integers (numeric strings are
    /// coerced); string keys must be non-empty.
    pub fn pk_value(&self, model: &ModelDef, value: &Value) -> Result<Value, ValueError> {
        match model.primary_key_type() {
            Some(ScalarType::Number) => numeric_pk(value).ok_or_else(|| {
                ValueError::InvalidPkValue(format!(
                    "`{value}` is not a valid `{}` primary key (expected a non-negative safe integer)",
                    model.identity
                ))
            }),
            Some(ScalarType::String) => match value {
                Value::String(s) if !s.is_empty() => Ok(value.clone()),
                _ => Err(ValueError::InvalidPkValue(format!(
                    "`{value}` is not a valid `{}` primary key (expected a non-empty string)",
                    model.identity
                ))),
            },
            _ => Err(ValueError::Consistency(format!(
                "primary key of `{}` is neither a string nor a number",
                model.identity
            ))),
        }
    }

    /// Normalize one primary-key value or an array of them, de-duplicated.
    pub fn pk_values(&self, model: &ModelDef, value: &Value) -> Result<Vec<Value>, ValueError> {
        let items: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let pk = self.pk_value(model, item)?;
            if seen.insert(value_key(&pk)) {
                out.push(pk);
            }
        }
        Ok(out)
    }

    /// Normalize a value about to be stored in `attr`.
    ///
    /// Singular associations take the target's primary key, plural ones an
    /// array of them. `null` is only accepted for optional attributes.
    pub fn attribute_value(
        &self,
        model: &ModelDef,
        attr: &AttributeDef,
        value: &Value,
    ) -> Result<Value, ValueError> {
        if value.is_null() {
            if attr.required || attr.name == model.primary_key {
                return Err(ValueError::MissingRequired(format!(
                    "`{}.{}` cannot be null",
                    model.identity, attr.name
                )));
            }
            if attr.is_plural() {
                return Err(ValueError::TypeMismatch(format!(
                    "`{}.{}` expects an array of primary keys",
                    model.identity, attr.name
                )));
            }
            return Ok(Value::Null);
        }

        match &attr.kind {
            AttributeKind::Scalar(_) if attr.name == model.primary_key => self.pk_value(model, value),
            AttributeKind::Scalar(ty) => coerce_scalar(*ty, value).map_err(|e| {
                ValueError::TypeMismatch(format!("`{}.{}`: {e}", model.identity, attr.name))
            }),
            AttributeKind::Model { .. } => {
                let target = self.target_model(attr).map_err(ValueError::Consistency)?;
                self.pk_value(target, value)
            }
            AttributeKind::Collection { .. } => {
                if !value.is_array() {
                    return Err(ValueError::TypeMismatch(format!(
                        "`{}.{}` expects an array of primary keys",
                        model.identity, attr.name
                    )));
                }
                let target = self.target_model(attr).map_err(ValueError::Consistency)?;
                Ok(Value::Array(self.pk_values(target, value)?))
            }
        }
    }
}

fn numeric_pk(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                return (u <= MAX_SAFE_INTEGER).then(|| Value::from(u));
            }
            let f = n.as_f64()?;
            (f.fract() == 0.0 && f >= 0.0 && f <= MAX_SAFE_INTEGER as f64).then(|| Value::from(f as u64))
        }
        Value::String(s) => match number_from_str(s)? {
            Value::String(_) => None,
            n => numeric_pk(&n),
        },
        _ => None,
    }
}

/// Parse a numeric string. Integers stay integers.
pub(crate) fn number_from_str(s: &str) -> Option<Value> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Value::from(i));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(Number::from_f64)
        .map(Value::Number)
}

/// Loosely coerce a non-null value to a declared scalar type.
///
/// Numeric strings become numbers, `"true"`/`"false"` and `1`/`0` become
/// booleans, numbers and booleans become strings. `json` and `ref` accept
/// anything.
pub fn coerce_scalar(ty: ScalarType, value: &Value) -> Result<Value, ValueError> {
    let mismatch = || ValueError::TypeMismatch(format!("`{value}` is not a valid {}", ty.as_str()));
    match ty {
        ScalarType::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(mismatch()),
        },
        ScalarType::Number => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => number_from_str(s).ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        ScalarType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) if s == "true" => Ok(Value::Bool(true)),
            Value::String(s) if s == "false" => Ok(Value::Bool(false)),
            Value::Number(n) if n.as_f64() == Some(1.0) => Ok(Value::Bool(true)),
            Value::Number(n) if n.as_f64() == Some(0.0) => Ok(Value::Bool(false)),
            _ => Err(mismatch()),
        },
        ScalarType::Json | ScalarType::Ref => Ok(value.clone()),
    }
}
