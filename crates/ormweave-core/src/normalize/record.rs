//! Write payload normalization.

use ormweave_proto::Record;
use serde_json::Value;

use super::error::ValueError;
use super::Normalizer;
use crate::ontology::{AttributeDef, AttributeKind, ModelDef, ScalarType};

impl<'a> Normalizer<'a> {
    /// Normalize a record about to be created.
    ///
    /// Omitted attributes get their default (or the base value of their type),
    /// automatic timestamps are stamped, and a `null` auto-increment primary
    /// key is dropped so the backend assigns one. Plural associations are kept
    /// only when supplied.
    pub fn new_record(&self, model: &ModelDef, raw: &Value) -> Result<Record, ValueError> {
        let Value::Object(raw) = raw else {
            return Err(ValueError::HighlyIrregular(format!(
                "a new `{}` record must be a dictionary, got `{raw}`",
                model.identity
            )));
        };

        let mut out = Record::new();
        for (key, value) in raw {
            let Some(attr) = model.get_attribute(key) else {
                self.undeclared(model, key)?;
                out.insert(key.clone(), value.clone());
                continue;
            };
            if value.is_null() && key == &model.primary_key && attr.auto_increment {
                continue;
            }
            out.insert(key.clone(), self.attribute_value(model, attr, value)?);
        }

        for attr in &model.attributes {
            if out.contains_key(&attr.name) || attr.is_plural() {
                continue;
            }
            if attr.name == model.primary_key {
                if attr.auto_increment {
                    continue;
                }
                return Err(ValueError::MissingRequired(format!(
                    "`{}` needs a value for its primary key `{}`",
                    model.identity, attr.name
                )));
            }
            if attr.auto_created_at || attr.auto_updated_at {
                out.insert(attr.name.clone(), self.timestamp(attr));
                continue;
            }
            if attr.required {
                return Err(ValueError::MissingRequired(format!(
                    "`{}.{}` is required",
                    model.identity, attr.name
                )));
            }
            out.insert(attr.name.clone(), default_for(attr));
        }
        Ok(out)
    }

    /// Normalize the values an update sets.
    ///
    /// The primary key can never be changed; `auto_updated_at` attributes are
    /// stamped unless supplied.
    pub fn values_to_set(&self, model: &ModelDef, raw: &Value) -> Result<Record, ValueError> {
        let Value::Object(raw) = raw else {
            return Err(ValueError::HighlyIrregular(format!(
                "values to set on `{}` must be a dictionary, got `{raw}`",
                model.identity
            )));
        };

        let mut out = Record::new();
        for (key, value) in raw {
            if key == &model.primary_key {
                return Err(ValueError::HighlyIrregular(format!(
                    "the primary key `{}` of `{}` cannot be changed",
                    key, model.identity
                )));
            }
            match model.get_attribute(key) {
                Some(attr) => {
                    out.insert(key.clone(), self.attribute_value(model, attr, value)?);
                }
                None => {
                    self.undeclared(model, key)?;
                    out.insert(key.clone(), value.clone());
                }
            }
        }

        for attr in model.attributes.iter().filter(|a| a.auto_updated_at) {
            if !out.contains_key(&attr.name) {
                out.insert(attr.name.clone(), self.timestamp(attr));
            }
        }
        Ok(out)
    }

    fn undeclared(&self, model: &ModelDef, key: &str) -> Result<(), ValueError> {
        if model.schema {
            Err(ValueError::HighlyIrregular(format!(
                "`{key}` is not an attribute of `{}`",
                model.identity
            )))
        } else {
            Ok(())
        }
    }

    /// Current time in the representation `attr` stores: epoch millis for
    /// numbers, RFC 3339 otherwise.
    fn timestamp(&self, attr: &AttributeDef) -> Value {
        let now = self.now();
        match attr.scalar_type() {
            Some(ScalarType::Number) => Value::from(now.timestamp_millis()),
            _ => Value::String(now.to_rfc3339()),
        }
    }
}

fn default_for(attr: &AttributeDef) -> Value {
    if let Some(value) = &attr.default_value {
        return value.clone();
    }
    match &attr.kind {
        AttributeKind::Scalar(ty) => ty.base_value(),
        AttributeKind::Model { .. } | AttributeKind::Collection { .. } => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::Ontology;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn ontology() -> Ontology {
        Ontology::builder()
            .model(
                ModelDef::new("user", "id")
                    .with_attribute(AttributeDef::number("id").auto_increment())
                    .with_attribute(AttributeDef::string("email").required())
                    .with_attribute(AttributeDef::number("age"))
                    .with_attribute(AttributeDef::string("role").with_default(json!("member")))
                    .with_attribute(AttributeDef::number("createdAt").auto_created_at())
                    .with_attribute(AttributeDef::string("updatedAt").auto_updated_at())
                    .with_attribute(AttributeDef::model("manager", "user"))
                    .with_attribute(AttributeDef::collection("pets", "pet").via("owner")),
            )
            .model(
                ModelDef::new("pet", "id")
                    .with_attribute(AttributeDef::number("id").auto_increment())
                    .with_attribute(AttributeDef::model("owner", "user")),
            )
            .model(ModelDef::new("blob", "id").with_attribute(AttributeDef::string("id")).schemaless())
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_record_defaults_and_timestamps() {
        let ontology = ontology();
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let n = Normalizer::new(&ontology).at(now);
        let user = ontology.get_model("user").unwrap();

        let rec = n
            .new_record(user, &json!({ "id": null, "email": "a@b.c", "age": "30" }))
            .unwrap();
        assert!(!rec.contains_key("id"));
        assert_eq!(rec["age"], json!(30));
        assert_eq!(rec["role"], json!("member"));
        assert_eq!(rec["manager"], Value::Null);
        assert_eq!(rec["createdAt"], json!(now.timestamp_millis()));
        assert_eq!(rec["updatedAt"], json!(now.to_rfc3339()));
        assert!(!rec.contains_key("pets"));

        let rec = n
            .new_record(user, &json!({ "email": "x", "pets": [1, 2, 2] }))
            .unwrap();
        assert_eq!(rec["pets"], json!([1, 2]));
    }

    #[test]
    fn test_new_record_rejections() {
        let ontology = ontology();
        let n = Normalizer::new(&ontology);
        let user = ontology.get_model("user").unwrap();

        assert!(matches!(
            n.new_record(user, &json!({ "age": 3 })),
            Err(ValueError::MissingRequired(_))
        ));
        assert!(matches!(
            n.new_record(user, &json!({ "email": "x", "nickname": "y" })),
            Err(ValueError::HighlyIrregular(_))
        ));
        assert!(matches!(
            n.new_record(user, &json!({ "email": "x", "age": "old" })),
            Err(ValueError::TypeMismatch(_))
        ));
        assert!(n.new_record(user, &json!([1])).is_err());

        let blob = ontology.get_model("blob").unwrap();
        assert!(matches!(n.new_record(blob, &json!({})), Err(ValueError::MissingRequired(_))));
        let rec = n.new_record(blob, &json!({ "id": "k", "extra": { "a": 1 } })).unwrap();
        assert_eq!(rec["extra"], json!({ "a": 1 }));
    }

    #[test]
    fn test_values_to_set() {
        let ontology = ontology();
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let n = Normalizer::new(&ontology).at(now);
        let user = ontology.get_model("user").unwrap();

        let set = n.values_to_set(user, &json!({ "age": 31, "manager": "4" })).unwrap();
        assert_eq!(set["age"], json!(31));
        assert_eq!(set["manager"], json!(4));
        assert_eq!(set["updatedAt"], json!(now.to_rfc3339()));
        assert!(!set.contains_key("createdAt"));

        assert!(matches!(
            n.values_to_set(user, &json!({ "id": 9 })),
            Err(ValueError::HighlyIrregular(_))
        ));
        assert!(matches!(
            n.values_to_set(user, &json!({ "email": null })),
            Err(ValueError::MissingRequired(_))
        ));
    }
}
