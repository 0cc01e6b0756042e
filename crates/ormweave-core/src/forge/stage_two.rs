//! Stage-two forging: validate and normalize a caller's query.

use std::collections::BTreeMap;

use ormweave_proto::{
    Criteria, IterateeKind, Method, Populate, QueryKey, Record, Stage1Query, Stage2Query,
};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result, UsageCode, UsageError, ValidationCause};
use crate::normalize::{CriteriaError, Normalizer, ValueError};
use crate::ontology::{AttributeKind, ModelDef, ScalarType};

/// Turns stage-one queries into validated stage-two queries.
///
/// Every top-level key is checked against the method's whitelist, then each
/// payload key is normalized. A query that provably does nothing fails with
/// [`UsageCode::Noop`].
#[derive(Debug, Clone, Copy)]
pub struct StageTwoForger<'a> {
    normalizer: Normalizer<'a>,
}

impl<'a> StageTwoForger<'a> {
    pub fn new(normalizer: Normalizer<'a>) -> Self {
        Self { normalizer }
    }

    pub fn forge(&self, query: Stage1Query) -> Result<Stage2Query> {
        let ontology = self.normalizer.ontology();
        let model = ontology.get_model(&query.using)?;
        let method = query.method;

        for key in query.args.keys() {
            match QueryKey::from_name(key) {
                Some(k) if method.accepts(k) => {}
                Some(_) => {
                    return Err(Error::usage(
                        UsageCode::UnrecognizedQueryKey,
                        format!("`{key}` cannot be used with `{method}`"),
                    ))
                }
                None => {
                    return Err(Error::usage(
                        UsageCode::UnrecognizedQueryKey,
                        format!("unrecognized query key `{key}`"),
                    ))
                }
            }
        }

        let mut out = Stage2Query::new(method, &model.identity);
        out.meta = meta(query.get(QueryKey::Meta))?;

        if method.accepts(QueryKey::Criteria) {
            out.criteria = Some(self.criteria(model, method, query.get(QueryKey::Criteria))?);
        }
        if method.accepts(QueryKey::Populates) {
            if let Some(raw) = query.get(QueryKey::Populates) {
                let criteria = out.criteria.as_mut().ok_or_else(|| {
                    Error::Consistency(format!("`{method}` accepts populates but not criteria"))
                })?;
                out.populates = self.populates(model, raw, criteria)?;
            }
        }
        if method == Method::Stream {
            out.iteratee = Some(iteratee(&query)?);
        }
        if method.accepts(QueryKey::NewRecord) {
            let raw = required(&query, QueryKey::NewRecord, UsageCode::InvalidNewRecord)?;
            out.new_record = Some(
                self.normalizer
                    .new_record(model, raw)
                    .map_err(|e| e.into_error(UsageCode::InvalidNewRecord))?,
            );
        }
        if method.accepts(QueryKey::NewRecords) {
            out.new_records = Some(self.new_records(model, &query)?);
        }
        if method.accepts(QueryKey::ValuesToSet) {
            let raw = required(&query, QueryKey::ValuesToSet, UsageCode::InvalidValuesToSet)?;
            out.values_to_set = Some(
                self.normalizer
                    .values_to_set(model, raw)
                    .map_err(|e| e.into_error(UsageCode::InvalidValuesToSet))?,
            );
        }
        if method.accepts(QueryKey::TargetRecordIds) {
            out.target_record_ids = Some(self.target_record_ids(model, &query)?);
        }
        if method.accepts(QueryKey::CollectionAttrName) {
            let (name, target) = self.collection_attr_name(model, &query)?;
            out.associated_ids = Some(self.associated_ids(method, target, &query)?);
            out.collection_attr_name = Some(name);
        }
        if method.accepts(QueryKey::NumericAttrName) {
            out.numeric_attr_name = Some(numeric_attr_name(model, &query)?);
        }

        debug!(method = %method, model = %model.identity, populates = out.populates.len(), "forged stage two query");
        Ok(out)
    }

    fn criteria(&self, model: &ModelDef, method: Method, raw: Option<&Value>) -> Result<Criteria> {
        let empty = Value::Object(Map::new());
        let criteria = self
            .normalizer
            .criteria(model, raw.unwrap_or(&empty))
            .map_err(|e| criteria_error(e, UsageCode::InvalidCriteria))?;

        if !method.supports_pagination() && (criteria.has_limit() || criteria.skip != 0) {
            return Err(UsageError::with_cause(
                UsageCode::InvalidCriteria,
                ValidationCause::HighlyIrregular,
                format!("`limit` and `skip` cannot be used with `{method}`"),
            )
            .into());
        }
        if !method.is_read() && criteria.has_custom_projection() {
            return Err(UsageError::with_cause(
                UsageCode::InvalidCriteria,
                ValidationCause::HighlyIrregular,
                format!("`select` and `omit` cannot be used with `{method}`"),
            )
            .into());
        }
        Ok(criteria)
    }

    /// Validate populates and widen `select` so populated attributes come
    /// back.
    fn populates(
        &self,
        model: &ModelDef,
        raw: &Value,
        criteria: &mut Criteria,
    ) -> Result<BTreeMap<String, Populate>> {
        let invalid = |cause: ValidationCause, details: String| -> Error {
            UsageError::with_cause(UsageCode::InvalidPopulates, cause, details).into()
        };

        let map = match raw {
            Value::Null => return Ok(BTreeMap::new()),
            Value::Object(map) => map,
            other => {
                return Err(invalid(
                    ValidationCause::HighlyIrregular,
                    format!("populates must be a dictionary, got `{other}`"),
                ))
            }
        };

        let ontology = self.normalizer.ontology();
        let mut populates = BTreeMap::new();
        for (name, value) in map {
            let attr = model.get_attribute(name).ok_or_else(|| {
                invalid(
                    ValidationCause::HighlyIrregular,
                    format!("`{name}` is not an attribute of `{}`", model.identity),
                )
            })?;
            if value == &Value::Bool(false) {
                continue;
            }
            if criteria.omit.iter().any(|o| o == name) {
                return Err(invalid(
                    ValidationCause::HighlyIrregular,
                    format!("`{name}` cannot be both populated and omitted"),
                ));
            }

            let populate = match &attr.kind {
                AttributeKind::Scalar(_) => {
                    return Err(invalid(
                        ValidationCause::HighlyIrregular,
                        format!("`{name}` is not an association and cannot be populated"),
                    ))
                }
                AttributeKind::Model { .. } => match value {
                    Value::Bool(true) => Populate::Singular,
                    Value::Object(sub) if sub.is_empty() => Populate::Singular,
                    other => {
                        return Err(invalid(
                            ValidationCause::HighlyIrregular,
                            format!(
                                "`{name}` is a singular association; populate it with `true`, not `{other}`"
                            ),
                        ))
                    }
                },
                AttributeKind::Collection { target, .. } => {
                    let target = ontology.get_model(target)?;
                    let sub = match value {
                        Value::Bool(true) => Value::Object(Map::new()),
                        Value::Object(_) => value.clone(),
                        other => {
                            return Err(invalid(
                                ValidationCause::HighlyIrregular,
                                format!("subcriteria for `{name}` must be a dictionary, got `{other}`"),
                            ))
                        }
                    };
                    match self.normalizer.criteria(target, &sub) {
                        Ok(sub) => Populate::Plural(sub),
                        Err(CriteriaError::WouldMatchNothing(_)) => Populate::Unmatchable,
                        Err(e) => return Err(e.into_error(UsageCode::InvalidPopulates)),
                    }
                }
            };

            if !criteria.selects_all() && !criteria.select.iter().any(|s| s == name) {
                criteria.select.push(name.clone());
            }
            populates.insert(name.clone(), populate);
        }
        Ok(populates)
    }

    fn new_records(&self, model: &ModelDef, query: &Stage1Query) -> Result<Vec<Record>> {
        let raw = required(query, QueryKey::NewRecords, UsageCode::InvalidNewRecords)?;
        let Value::Array(items) = raw else {
            return Err(UsageError::with_cause(
                UsageCode::InvalidNewRecords,
                ValidationCause::HighlyIrregular,
                format!("`newRecords` must be an array, got `{raw}`"),
            )
            .into());
        };
        if items.is_empty() {
            return Err(noop("`newRecords` is empty"));
        }
        items
            .iter()
            .map(|item| {
                self.normalizer
                    .new_record(model, item)
                    .map_err(|e| e.into_error(UsageCode::InvalidNewRecords))
            })
            .collect()
    }

    fn target_record_ids(&self, model: &ModelDef, query: &Stage1Query) -> Result<Vec<Value>> {
        let raw = required(query, QueryKey::TargetRecordIds, UsageCode::InvalidTargetRecordIds)?;
        let ids = self
            .normalizer
            .pk_values(model, raw)
            .map_err(|e| e.into_error(UsageCode::InvalidTargetRecordIds))?;
        if ids.is_empty() {
            return Err(noop("`targetRecordIds` is empty"));
        }
        Ok(ids)
    }

    fn collection_attr_name(
        &self,
        model: &ModelDef,
        query: &Stage1Query,
    ) -> Result<(String, &'a ModelDef)> {
        let raw = required(query, QueryKey::CollectionAttrName, UsageCode::InvalidCollectionAttrName)?;
        let invalid = |details: String| -> Error {
            UsageError::with_cause(UsageCode::InvalidCollectionAttrName, ValidationCause::HighlyIrregular, details)
                .into()
        };
        let name = raw
            .as_str()
            .ok_or_else(|| invalid(format!("`collectionAttrName` must be a string, got `{raw}`")))?;
        let attr = model
            .get_attribute(name)
            .ok_or_else(|| invalid(format!("`{name}` is not an attribute of `{}`", model.identity)))?;
        match &attr.kind {
            AttributeKind::Collection { target, .. } => {
                Ok((name.to_string(), self.normalizer.ontology().get_model(target)?))
            }
            _ => Err(invalid(format!("`{name}` is not a plural association"))),
        }
    }

    fn associated_ids(&self, method: Method, target: &ModelDef, query: &Stage1Query) -> Result<Vec<Value>> {
        let raw = required(query, QueryKey::AssociatedIds, UsageCode::InvalidAssociatedIds)?;
        if !raw.is_array() {
            return Err(ValueError::HighlyIrregular(format!(
                "`associatedIds` must be an array, got `{raw}`"
            ))
            .into_error(UsageCode::InvalidAssociatedIds));
        }
        let ids = self
            .normalizer
            .pk_values(target, raw)
            .map_err(|e| e.into_error(UsageCode::InvalidAssociatedIds))?;
        // An empty replacement clears the collection; an empty add or remove
        // does nothing.
        if ids.is_empty() && method != Method::ReplaceCollection {
            return Err(noop("`associatedIds` is empty"));
        }
        Ok(ids)
    }
}

fn criteria_error(e: CriteriaError, code: UsageCode) -> Error {
    match e {
        CriteriaError::WouldMatchNothing(details) => {
            UsageError::with_cause(UsageCode::Noop, ValidationCause::WouldMatchNothing, details).into()
        }
        other => other.into_error(code),
    }
}

fn noop(details: &str) -> Error {
    UsageError::new(UsageCode::Noop, details).into()
}

fn required<'q>(query: &'q Stage1Query, key: QueryKey, code: UsageCode) -> Result<&'q Value> {
    match query.get(key) {
        Some(value) if !value.is_null() => Ok(value),
        _ => Err(UsageError::with_cause(
            code,
            ValidationCause::MissingRequired,
            format!("`{}` requires `{}`", query.method, key.as_str()),
        )
        .into()),
    }
}

fn meta(raw: Option<&Value>) -> Result<Option<Map<String, Value>>> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(other) => Err(Error::usage(
            UsageCode::InvalidMeta,
            format!("`meta` must be a dictionary, got `{other}`"),
        )),
    }
}

fn iteratee(query: &Stage1Query) -> Result<IterateeKind> {
    let declared = [IterateeKind::EachRecord, IterateeKind::EachBatch]
        .into_iter()
        .filter(|kind| query.get(kind.key()).is_some_and(|v| !v.is_null()));
    let mut kinds: Vec<IterateeKind> = Vec::new();
    for kind in query.iteratees.iter().copied().chain(declared) {
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    match kinds.as_slice() {
        [kind] => Ok(*kind),
        [] => Err(Error::usage(
            UsageCode::InvalidStreamIteratee,
            "`stream` needs either `eachRecordFn` or `eachBatchFn`",
        )),
        _ => Err(Error::usage(
            UsageCode::InvalidStreamIteratee,
            "`eachRecordFn` and `eachBatchFn` cannot both be used",
        )),
    }
}

fn numeric_attr_name(model: &ModelDef, query: &Stage1Query) -> Result<String> {
    let raw = required(query, QueryKey::NumericAttrName, UsageCode::InvalidNumericAttrName)?;
    let invalid = |details: String| -> Error {
        UsageError::with_cause(UsageCode::InvalidNumericAttrName, ValidationCause::HighlyIrregular, details).into()
    };
    let name = raw
        .as_str()
        .ok_or_else(|| invalid(format!("`numericAttrName` must be a string, got `{raw}`")))?;
    match model.get_attribute(name).and_then(|a| a.scalar_type()) {
        Some(ScalarType::Number) => Ok(name.to_string()),
        Some(_) => Err(invalid(format!("`{name}` is not a number attribute"))),
        None => Err(invalid(format!(
            "`{name}` is not a scalar attribute of `{}`",
            model.identity
        ))),
    }
}
