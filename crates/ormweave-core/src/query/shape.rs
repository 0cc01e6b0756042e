//! Result shaping.
//!
//! Turns column-named records (with column-named populated children) back
//! into attribute-named records, the way callers see them.

use ormweave_proto::{Populate, Record, Stage2Query};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::ontology::{Ontology, Transformer};

/// Shapes executed read results for a stage-two query.
pub struct Shaper<'a> {
    ontology: &'a Ontology,
}

impl<'a> Shaper<'a> {
    pub fn new(ontology: &'a Ontology) -> Self {
        Self { ontology }
    }

    /// Unserialize records and their populated children.
    ///
    /// A singular populate becomes `null` or a child record, a plural one an
    /// array (empty for subcriteria that match nothing).
    pub fn shape(&self, query: &Stage2Query, records: Vec<Record>) -> Result<Vec<Record>> {
        let model = self.ontology.get_model(&query.using)?;
        let transformer = Transformer::new(model);
        let omit: &[String] = match &query.criteria {
            Some(criteria) if !model.schema => &criteria.omit,
            _ => &[],
        };

        let mut children = Vec::with_capacity(query.populates.len());
        for alias in query.populates.keys() {
            let attr = self.ontology.get_attribute(&query.using, alias)?;
            let target = attr.target().ok_or_else(|| {
                Error::Consistency(format!("populated `{alias}` is not an association"))
            })?;
            children.push(Transformer::new(self.ontology.get_model(target)?));
        }

        let mut shaped = Vec::with_capacity(records.len());
        for mut record in records {
            let mut populated = Vec::with_capacity(children.len());
            for ((alias, populate), child) in query.populates.iter().zip(&children) {
                let raw = record.remove(alias);
                let value = match populate {
                    Populate::Singular => match raw {
                        Some(Value::Object(row)) => Value::Object(child.unserialize(row)),
                        _ => Value::Null,
                    },
                    Populate::Plural(_) => match raw {
                        Some(Value::Array(rows)) => Value::Array(
                            rows.into_iter()
                                .map(|row| match row {
                                    Value::Object(row) => Value::Object(child.unserialize(row)),
                                    other => other,
                                })
                                .collect(),
                        ),
                        _ => Value::Array(Vec::new()),
                    },
                    Populate::Unmatchable => Value::Array(Vec::new()),
                };
                populated.push((alias.clone(), value));
            }

            let mut out = transformer.unserialize(record);
            for attr in omit {
                out.remove(attr);
            }
            out.extend(populated);
            shaped.push(out);
        }
        Ok(shaped)
    }
}
