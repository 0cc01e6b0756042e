//! Single-attribute filter normalization.

use std::collections::HashSet;

use ormweave_proto::{value_key, Constraint, Filter, Modifier};
use serde_json::{Map, Value};
use tracing::warn;

use super::error::FilterError;
use super::value::coerce_scalar;
use super::Normalizer;
use crate::ontology::{AttributeKind, ModelDef, ScalarType};

/// Result of normalizing one filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    Filter(Filter),
    /// The filter constrains nothing and can be dropped (`nin: []`,
    /// `contains: ''`).
    Everything,
    /// The filter can never match (`in: []`).
    Nothing,
}

/// What a filter's right-hand side is compared against.
#[derive(Clone, Copy)]
enum Operand<'m> {
    /// A primary key, either of the model itself or of an association target.
    Key(&'m ModelDef),
    Typed(ScalarType),
}

impl Operand<'_> {
    fn scalar_type(&self) -> ScalarType {
        match self {
            Operand::Key(model) => model.primary_key_type().unwrap_or(ScalarType::Json),
            Operand::Typed(ty) => *ty,
        }
    }

    /// String patterns only make sense against strings and opaque values.
    fn accepts_patterns(&self) -> bool {
        matches!(
            self.scalar_type(),
            ScalarType::String | ScalarType::Json | ScalarType::Ref
        )
    }
}

#[derive(Clone, Copy)]
enum Pattern {
    Contains,
    StartsWith,
    EndsWith,
}

/// Deprecated modifier spellings and their replacements.
const MODIFIER_ALIASES: [(&str, &str); 7] = [
    ("not", "!="),
    ("!", "!="),
    ("lessThan", "<"),
    ("lessThanOrEqual", "<="),
    ("greaterThan", ">"),
    ("greaterThanOrEqual", ">="),
    ("notIn", "nin"),
];

impl<'a> Normalizer<'a> {
    /// Normalize the filter `attr: rhs` against `model`.
    ///
    /// An array right-hand side becomes an `in`; a dictionary must hold exactly
    /// one modifier. Pattern modifiers are rewritten into `like`.
    pub fn filter(&self, model: &ModelDef, attr: &str, rhs: &Value) -> Result<FilterOutcome, FilterError> {
        let operand = self.operand(model, attr)?;

        match rhs {
            Value::Array(items) => self.in_list(operand, attr, items, true),
            Value::Object(map) => self.modifier(operand, attr, map),
            value => Ok(FilterOutcome::Filter(Filter::eq(
                attr,
                self.rhs_value(operand, value)?,
            ))),
        }
    }

    fn operand(&self, model: &ModelDef, attr: &str) -> Result<Operand<'a>, FilterError> {
        let Some(def) = model.get_attribute(attr) else {
            if model.schema {
                return Err(FilterError::HighlyIrregular(format!(
                    "`{attr}` is not an attribute of `{}`",
                    model.identity
                )));
            }
            return Ok(Operand::Typed(ScalarType::Json));
        };

        match &def.kind {
            AttributeKind::Collection { .. } => Err(FilterError::FilterNotUsable(format!(
                "cannot filter by the plural association `{attr}`"
            ))),
            AttributeKind::Model { .. } => self
                .target_model(def)
                .map(Operand::Key)
                .map_err(FilterError::Consistency),
            AttributeKind::Scalar(_) if attr == model.primary_key => {
                let model = self.ontology.get_model(&model.identity).map_err(|e| {
                    FilterError::Consistency(e.to_string())
                })?;
                Ok(Operand::Key(model))
            }
            AttributeKind::Scalar(ty) => Ok(Operand::Typed(*ty)),
        }
    }

    fn modifier(
        &self,
        operand: Operand<'a>,
        attr: &str,
        map: &Map<String, Value>,
    ) -> Result<FilterOutcome, FilterError> {
        let mut entries = map.iter();
        let (name, value) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            (None, _) => {
                return Err(FilterError::HighlyIrregular(format!(
                    "the filter on `{attr}` is an empty dictionary"
                )))
            }
            (Some(_), Some(_)) => {
                return Err(FilterError::HighlyIrregular(format!(
                    "the filter on `{attr}` holds more than one modifier"
                )))
            }
        };

        let name = self.canonical_modifier(attr, name)?;
        let compare = |m: fn(Value) -> Modifier| -> Result<FilterOutcome, FilterError> {
            let value = self.comparison_value(operand, attr, name, value)?;
            Ok(FilterOutcome::Filter(Filter::new(attr, Constraint::Modifier(m(value)))))
        };

        match name {
            "in" | "nin" => {
                let Value::Array(items) = value else {
                    return Err(FilterError::FilterNotUsable(format!(
                        "`{name}` on `{attr}` expects an array, got `{value}`"
                    )));
                };
                self.in_list(operand, attr, items, name == "in")
            }
            "!=" => Ok(FilterOutcome::Filter(Filter::new(
                attr,
                Constraint::Modifier(Modifier::Ne(self.rhs_value(operand, value)?)),
            ))),
            "<" => compare(Modifier::Lt),
            "<=" => compare(Modifier::Lte),
            ">" => compare(Modifier::Gt),
            ">=" => compare(Modifier::Gte),
            "like" => {
                let pattern = self.pattern_operand(operand, attr, name, value)?;
                if pattern.is_empty() {
                    return Err(FilterError::FilterNotUsable(format!(
                        "`like` on `{attr}` needs a non-empty pattern"
                    )));
                }
                Ok(FilterOutcome::Filter(Filter::new(
                    attr,
                    Constraint::Modifier(Modifier::Like(pattern.to_string())),
                )))
            }
            "contains" => self.pattern(operand, attr, name, value, Pattern::Contains),
            "startsWith" => self.pattern(operand, attr, name, value, Pattern::StartsWith),
            "endsWith" => self.pattern(operand, attr, name, value, Pattern::EndsWith),
            other => Err(FilterError::FilterNotUsable(format!(
                "unrecognized modifier `{other}` on `{attr}`"
            ))),
        }
    }

    /// Resolve deprecated aliases to their canonical modifier.
    fn canonical_modifier<'n>(&self, attr: &str, name: &'n str) -> Result<&'n str, FilterError> {
        let Some((_, canonical)) = MODIFIER_ALIASES.iter().find(|(alias, _)| *alias == name) else {
            return Ok(name);
        };
        if !self.compat.modifier_aliases {
            return Err(FilterError::HighlyIrregular(format!(
                "`{name}` on `{attr}` is no longer supported, use `{canonical}` instead"
            )));
        }
        warn!(attr, alias = name, canonical, "deprecated modifier alias");
        Ok(*canonical)
    }

    fn in_list(
        &self,
        operand: Operand<'a>,
        attr: &str,
        items: &[Value],
        is_in: bool,
    ) -> Result<FilterOutcome, FilterError> {
        let mut seen = HashSet::new();
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            if item.is_array() || item.is_object() {
                return Err(FilterError::FilterNotUsable(format!(
                    "`{attr}` cannot be compared against `{item}`"
                )));
            }
            let value = self.rhs_value(operand, item)?;
            if seen.insert(value_key(&value)) {
                values.push(value);
            }
        }

        Ok(match (values.is_empty(), is_in) {
            (true, true) => FilterOutcome::Nothing,
            (true, false) => FilterOutcome::Everything,
            (false, true) => FilterOutcome::Filter(Filter::is_in(attr, values)),
            (false, false) => {
                FilterOutcome::Filter(Filter::new(attr, Constraint::Modifier(Modifier::Nin(values))))
            }
        })
    }

    /// Normalize an equality-style value. `null` passes through.
    fn rhs_value(&self, operand: Operand<'a>, value: &Value) -> Result<Value, FilterError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match operand {
            Operand::Key(model) => Ok(self.pk_value(model, value)?),
            Operand::Typed(ty) => Ok(coerce_scalar(ty, value)?),
        }
    }

    /// Normalize the operand of `<`, `<=`, `>` or `>=`.
    fn comparison_value(
        &self,
        operand: Operand<'a>,
        attr: &str,
        name: &str,
        value: &Value,
    ) -> Result<Value, FilterError> {
        let ty = operand.scalar_type();
        if ty == ScalarType::Boolean {
            return Err(FilterError::FilterNotUsable(format!(
                "`{name}` cannot be used on the boolean attribute `{attr}`"
            )));
        }
        match value {
            Value::String(_) | Value::Number(_) => match ty {
                ScalarType::Json | ScalarType::Ref => Ok(value.clone()),
                ty => Ok(coerce_scalar(ty, value)?),
            },
            other => Err(FilterError::FilterNotUsable(format!(
                "`{name}` on `{attr}` expects a string or a number, got `{other}`"
            ))),
        }
    }

    fn pattern_operand<'v>(
        &self,
        operand: Operand<'a>,
        attr: &str,
        name: &str,
        value: &'v Value,
    ) -> Result<&'v str, FilterError> {
        if !operand.accepts_patterns() {
            return Err(FilterError::FilterNotUsable(format!(
                "`{name}` cannot be used on the {} attribute `{attr}`",
                operand.scalar_type().as_str()
            )));
        }
        value.as_str().ok_or_else(|| {
            FilterError::FilterNotUsable(format!("`{name}` on `{attr}` expects a string, got `{value}`"))
        })
    }

    fn pattern(
        &self,
        operand: Operand<'a>,
        attr: &str,
        name: &str,
        value: &Value,
        kind: Pattern,
    ) -> Result<FilterOutcome, FilterError> {
        let text = self.pattern_operand(operand, attr, name, value)?;
        if text.is_empty() {
            return Ok(FilterOutcome::Everything);
        }
        let escaped = text
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = match kind {
            Pattern::Contains => format!("%{escaped}%"),
            Pattern::StartsWith => format!("{escaped}%"),
            Pattern::EndsWith => format!("%{escaped}"),
        };
        Ok(FilterOutcome::Filter(Filter::new(
            attr,
            Constraint::Modifier(Modifier::Like(pattern)),
        )))
    }
}
