//! Collection membership methods.
//!
//! One-to-many associations are edited by rewriting the foreign key on the
//! child records. Many-to-many associations are edited by creating and
//! destroying junction rows.

use std::collections::HashSet;

use ormweave_core::ontology::Association;
use ormweave_core::{AttributeDef, Error, ModelDef, Result, UsageCode};
use ormweave_proto::{
    record, value_key, Criteria, Filter, Method, QueryKey, Record, Stage1Query, Stage2Query,
    WhereClause,
};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::orm::{adapter_error, Orm};

/// How a collection is being changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CollectionEdit {
    Add,
    Remove,
    Replace,
}

impl Orm {
    /// Add `associated_ids` to the `attr` collection of each target record.
    #[instrument(skip(self, target_ids, associated_ids))]
    pub async fn add_to_collection(
        &self,
        model: &str,
        target_ids: Value,
        attr: &str,
        associated_ids: Value,
    ) -> Result<()> {
        self.collection_method(Method::AddToCollection, model, target_ids, attr, associated_ids)
            .await
    }

    /// Remove `associated_ids` from the `attr` collection of each target record.
    #[instrument(skip(self, target_ids, associated_ids))]
    pub async fn remove_from_collection(
        &self,
        model: &str,
        target_ids: Value,
        attr: &str,
        associated_ids: Value,
    ) -> Result<()> {
        self.collection_method(Method::RemoveFromCollection, model, target_ids, attr, associated_ids)
            .await
    }

    /// Make `associated_ids` the whole `attr` collection of each target record.
    ///
    /// An empty `associated_ids` empties the collection.
    #[instrument(skip(self, target_ids, associated_ids))]
    pub async fn replace_collection(
        &self,
        model: &str,
        target_ids: Value,
        attr: &str,
        associated_ids: Value,
    ) -> Result<()> {
        self.collection_method(Method::ReplaceCollection, model, target_ids, attr, associated_ids)
            .await
    }

    async fn collection_method(
        &self,
        method: Method,
        model: &str,
        target_ids: Value,
        attr: &str,
        associated_ids: Value,
    ) -> Result<()> {
        let query = Stage1Query::new(method, model)
            .with_key(QueryKey::TargetRecordIds, target_ids)
            .with_key(QueryKey::CollectionAttrName, Value::String(attr.to_string()))
            .with_key(QueryKey::AssociatedIds, associated_ids);
        let Some(query) = self.forge_or_noop(query)? else {
            return Ok(());
        };

        let edit = match method {
            Method::AddToCollection => CollectionEdit::Add,
            Method::RemoveFromCollection => CollectionEdit::Remove,
            _ => CollectionEdit::Replace,
        };
        let missing = |key: QueryKey| Error::Consistency(format!("`{method}` query without `{}`", key.as_str()));
        let targets = query
            .target_record_ids
            .as_deref()
            .ok_or_else(|| missing(QueryKey::TargetRecordIds))?;
        let attr = query
            .collection_attr_name
            .as_deref()
            .ok_or_else(|| missing(QueryKey::CollectionAttrName))?;
        let associated = query
            .associated_ids
            .as_deref()
            .ok_or_else(|| missing(QueryKey::AssociatedIds))?;

        let model = self.model(&query.using)?;
        self.edit_collection(edit, model, targets, attr, associated).await
    }

    /// Apply a normalized collection edit.
    pub(crate) async fn edit_collection(
        &self,
        edit: CollectionEdit,
        model: &ModelDef,
        targets: &[Value],
        attr: &str,
        associated: &[Value],
    ) -> Result<()> {
        debug!(model = %model.identity, attr, ?edit, targets = targets.len(), associated = associated.len(), "editing collection");
        match self.ontology.association(&model.identity, attr)? {
            Association::Via { target, via } => {
                self.edit_via(edit, target, via, targets, attr, associated).await
            }
            Association::Junction {
                junction,
                parent_fk,
                child_fk,
                ..
            } => {
                self.edit_junction(edit, junction, parent_fk, child_fk, targets, associated)
                    .await
            }
            Association::Singular { .. } => Err(Error::Consistency(format!(
                "`{}.{attr}` is not a collection",
                model.identity
            ))),
        }
    }

    async fn edit_via(
        &self,
        edit: CollectionEdit,
        child: &ModelDef,
        via: &AttributeDef,
        targets: &[Value],
        attr: &str,
        associated: &[Value],
    ) -> Result<()> {
        let owns = || WhereClause::filter(Filter::is_in(&via.name, targets.to_vec()));
        let children = || WhereClause::filter(Filter::is_in(&child.primary_key, associated.to_vec()));

        // A child has one parent, so attaching children to many parents is ambiguous.
        if edit != CollectionEdit::Remove && targets.len() > 1 && !associated.is_empty() {
            return Err(Error::usage(
                UsageCode::InvalidTargetRecordIds,
                format!("children of one-to-many `{attr}` can only be attached to one parent at a time"),
            ));
        }

        match edit {
            CollectionEdit::Remove => {
                if associated.is_empty() {
                    return Ok(());
                }
                self.set_foreign_key(child, via, children().and(owns()), Value::Null)
                    .await
            }
            CollectionEdit::Replace => {
                self.set_foreign_key(child, via, owns(), Value::Null).await?;
                match targets.first() {
                    Some(parent) if !associated.is_empty() => {
                        self.set_foreign_key(child, via, children(), parent.clone())
                            .await
                    }
                    _ => Ok(()),
                }
            }
            CollectionEdit::Add => match targets.first() {
                Some(parent) if !associated.is_empty() => {
                    self.set_foreign_key(child, via, children(), parent.clone())
                        .await
                }
                _ => Ok(()),
            },
        }
    }

    async fn set_foreign_key(
        &self,
        child: &ModelDef,
        via: &AttributeDef,
        clause: WhereClause,
        parent: Value,
    ) -> Result<()> {
        let mut query = Stage2Query::new(Method::Update, &child.identity).with_criteria(Criteria {
            where_clause: clause,
            ..Default::default()
        });
        query.values_to_set = Some(record([(via.name.clone(), parent)]));
        let physical = self.compile(&query)?;
        self.adapter(child)?
            .update(&physical)
            .await
            .map_err(|e| adapter_error(child, e))?;
        Ok(())
    }

    async fn edit_junction(
        &self,
        edit: CollectionEdit,
        junction: &ModelDef,
        parent_fk: &AttributeDef,
        child_fk: &AttributeDef,
        targets: &[Value],
        associated: &[Value],
    ) -> Result<()> {
        let owned = WhereClause::filter(Filter::is_in(&parent_fk.name, targets.to_vec()));
        let linked = WhereClause::filter(Filter::is_in(&child_fk.name, associated.to_vec()));

        match edit {
            CollectionEdit::Remove => {
                if !associated.is_empty() {
                    self.destroy_rows(junction, owned.and(linked)).await?;
                }
                Ok(())
            }
            CollectionEdit::Replace => {
                self.destroy_rows(junction, owned).await?;
                self.link(junction, parent_fk, child_fk, targets, associated, HashSet::new())
                    .await
            }
            CollectionEdit::Add => {
                if associated.is_empty() {
                    return Ok(());
                }
                let mut lookup = Stage2Query::new(Method::Find, &junction.identity);
                lookup.criteria = Some(Criteria {
                    where_clause: owned.and(linked),
                    ..Default::default()
                });
                let existing = self
                    .read(&lookup)
                    .await?
                    .iter()
                    .map(|row| pair_key(row, parent_fk, child_fk))
                    .collect();
                self.link(junction, parent_fk, child_fk, targets, associated, existing)
                    .await
            }
        }
    }

    /// Create a junction row for every target/child pair not in `existing`.
    async fn link(
        &self,
        junction: &ModelDef,
        parent_fk: &AttributeDef,
        child_fk: &AttributeDef,
        targets: &[Value],
        associated: &[Value],
        mut existing: HashSet<(String, String)>,
    ) -> Result<()> {
        let mut rows = Vec::new();
        for parent in targets {
            for child in associated {
                if existing.insert((value_key(parent), value_key(child))) {
                    rows.push(record([
                        (parent_fk.name.clone(), parent.clone()),
                        (child_fk.name.clone(), child.clone()),
                    ]));
                }
            }
        }
        if rows.is_empty() {
            return Ok(());
        }

        let mut query = Stage2Query::new(Method::CreateEach, &junction.identity);
        query.new_records = Some(rows);
        let physical = self.compile(&query)?;
        self.adapter(junction)?
            .create_each(&physical)
            .await
            .map_err(|e| adapter_error(junction, e))?;
        Ok(())
    }

    async fn destroy_rows(&self, junction: &ModelDef, clause: WhereClause) -> Result<()> {
        let query = Stage2Query::new(Method::Destroy, &junction.identity).with_criteria(Criteria {
            where_clause: clause,
            ..Default::default()
        });
        let physical = self.compile(&query)?;
        self.adapter(junction)?
            .destroy(&physical)
            .await
            .map_err(|e| adapter_error(junction, e))?;
        Ok(())
    }
}

fn pair_key(row: &Record, parent_fk: &AttributeDef, child_fk: &AttributeDef) -> (String, String) {
    let key = |attr: &AttributeDef| row.get(&attr.name).map(value_key).unwrap_or_default();
    (key(parent_fk), key(child_fk))
}
