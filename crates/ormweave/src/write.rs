//! Write methods.

use ormweave_core::ontology::Association;
use ormweave_core::{Error, ModelDef, Result, Transformer};
use ormweave_proto::{Criteria, Filter, Method, QueryKey, Record, Stage1Query, Stage2Query, WhereClause};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::collection::CollectionEdit;
use crate::orm::{adapter_error, primary_key, Orm};

/// Plural association values carried by a write payload.
type CollectionValues = Vec<(String, Vec<Value>)>;

impl Orm {
    /// Create a record.
    ///
    /// Plural association values are written after the insert, as if by
    /// [`replace_collection`](Orm::replace_collection).
    #[instrument(skip(self, new_record))]
    pub async fn create(&self, model: &str, new_record: Value) -> Result<Record> {
        let query = self.forge(Stage1Query::new(Method::Create, model).with_key(QueryKey::NewRecord, new_record))?;
        self.insert(query).await
    }

    /// Create several records at once. An empty list creates nothing.
    #[instrument(skip(self, new_records))]
    pub async fn create_each(&self, model: &str, new_records: Value) -> Result<Vec<Record>> {
        let query = Stage1Query::new(Method::CreateEach, model).with_key(QueryKey::NewRecords, new_records);
        let Some(query) = self.forge_or_noop(query)? else {
            return Ok(Vec::new());
        };
        let model = self.model(&query.using)?;
        let collections: Vec<CollectionValues> = query
            .new_records
            .iter()
            .flatten()
            .map(|record| collection_values(model, record))
            .collect();

        let physical = self.compile(&query)?;
        let created = self
            .adapter(model)?
            .create_each(&physical)
            .await
            .map_err(|e| adapter_error(model, e))?;

        let transformer = Transformer::new(model);
        let created: Vec<Record> = created.into_iter().map(|r| transformer.unserialize(r)).collect();
        for (record, values) in created.iter().zip(collections) {
            self.write_collections(model, record, values).await?;
        }
        Ok(created)
    }

    /// Find the record matching `criteria`, or create it from `new_record`.
    ///
    /// Returns the record and whether it was created.
    #[instrument(skip(self, criteria, new_record))]
    pub async fn find_or_create(&self, model: &str, criteria: Value, new_record: Value) -> Result<(Record, bool)> {
        let query = Stage1Query::new(Method::FindOrCreate, model)
            .with_criteria(criteria)
            .with_key(QueryKey::NewRecord, new_record.clone());

        let Some(query) = self.forge_or_noop(query)? else {
            return Ok((self.create(model, new_record).await?, true));
        };

        let mut lookup = Stage2Query::new(Method::FindOne, &query.using);
        lookup.criteria = query.criteria.clone();
        if let Some(found) = self.read_one(&lookup).await? {
            return Ok((found, false));
        }

        let mut create = Stage2Query::new(Method::Create, &query.using);
        create.new_record = query.new_record;
        create.meta = query.meta;
        Ok((self.insert(create).await?, true))
    }

    /// Update every record matching `criteria` and return the updated records.
    #[instrument(skip(self, criteria, values_to_set))]
    pub async fn update(&self, model: &str, criteria: Value, values_to_set: Value) -> Result<Vec<Record>> {
        let query = Stage1Query::new(Method::Update, model)
            .with_criteria(criteria)
            .with_key(QueryKey::ValuesToSet, values_to_set);
        let Some(query) = self.forge_or_noop(query)? else {
            return Ok(Vec::new());
        };
        let model = self.model(&query.using)?;
        let collections = query
            .values_to_set
            .as_ref()
            .map(|values| collection_values(model, values))
            .unwrap_or_default();

        let physical = self.compile(&query)?;
        let updated = self
            .adapter(model)?
            .update(&physical)
            .await
            .map_err(|e| adapter_error(model, e))?;

        let transformer = Transformer::new(model);
        let updated: Vec<Record> = updated.into_iter().map(|r| transformer.unserialize(r)).collect();
        if !collections.is_empty() && !updated.is_empty() {
            let ids = updated
                .iter()
                .map(|r| primary_key(model, r))
                .collect::<Result<Vec<_>>>()?;
            for (attr, associated) in collections {
                self.edit_collection(CollectionEdit::Replace, model, &ids, &attr, &associated)
                    .await?;
            }
        }
        Ok(updated)
    }

    /// Destroy every record matching `criteria` and return the destroyed records.
    ///
    /// Junction rows that pointed at a destroyed record are destroyed too.
    #[instrument(skip(self, criteria))]
    pub async fn destroy(&self, model: &str, criteria: Value) -> Result<Vec<Record>> {
        let query = Stage1Query::new(Method::Destroy, model).with_criteria(criteria);
        let Some(query) = self.forge_or_noop(query)? else {
            return Ok(Vec::new());
        };
        let model = self.model(&query.using)?;
        let physical = self.compile(&query)?;
        let destroyed = self
            .adapter(model)?
            .destroy(&physical)
            .await
            .map_err(|e| adapter_error(model, e))?;

        let transformer = Transformer::new(model);
        let destroyed: Vec<Record> = destroyed.into_iter().map(|r| transformer.unserialize(r)).collect();
        if !destroyed.is_empty() {
            let ids = destroyed
                .iter()
                .map(|r| primary_key(model, r))
                .collect::<Result<Vec<_>>>()?;
            self.unlink_junctions(model, ids).await?;
        }
        Ok(destroyed)
    }

    /// Run a forged `create` and apply its plural association values.
    pub(crate) async fn insert(&self, query: Stage2Query) -> Result<Record> {
        let model = self.model(&query.using)?;
        let record = query
            .new_record
            .as_ref()
            .ok_or_else(|| Error::Consistency("`create` query without a new record".to_string()))?;
        let collections = collection_values(model, record);

        let physical = self.compile(&query)?;
        let created = self
            .adapter(model)?
            .create(&physical)
            .await
            .map_err(|e| adapter_error(model, e))?;
        let created = Transformer::new(model).unserialize(created);
        self.write_collections(model, &created, collections).await?;
        Ok(created)
    }

    async fn write_collections(&self, model: &ModelDef, record: &Record, values: CollectionValues) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let id = primary_key(model, record)?;
        for (attr, associated) in values {
            self.edit_collection(CollectionEdit::Replace, model, std::slice::from_ref(&id), &attr, &associated)
                .await?;
        }
        Ok(())
    }

    /// Destroy the junction rows owned by destroyed parents.
    async fn unlink_junctions(&self, model: &ModelDef, ids: Vec<Value>) -> Result<()> {
        for attr in model.plural_attributes() {
            let Association::Junction {
                junction, parent_fk, ..
            } = self.ontology.association(&model.identity, &attr.name)?
            else {
                continue;
            };
            let query = Stage2Query::new(Method::Destroy, &junction.identity).with_criteria(
                Criteria {
                    where_clause: WhereClause::filter(Filter::is_in(&parent_fk.name, ids.clone())),
                    ..Default::default()
                },
            );
            let physical = self.compile(&query)?;
            let removed = self
                .adapter(junction)?
                .destroy(&physical)
                .await
                .map_err(|e| adapter_error(junction, e))?;
            debug!(junction = %junction.identity, removed = removed.len(), "removed junction rows");
        }
        Ok(())
    }
}

/// Plural association values present in a normalized payload.
fn collection_values(model: &ModelDef, record: &Record) -> CollectionValues {
    model
        .plural_attributes()
        .filter_map(|attr| match record.get(&attr.name) {
            Some(Value::Array(ids)) => Some((attr.name.clone(), ids.clone())),
            _ => None,
        })
        .collect()
}
