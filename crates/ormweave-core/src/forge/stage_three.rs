//! Stage-three forging: attribute names to column names, populates to joins.

use ormweave_proto::{Criteria, Join, Method, Populate, Stage2Query, Stage3Query, SELECT_ALL};
use tracing::debug;

use crate::error::{Error, Result};
use crate::ontology::{Association, ModelDef, Ontology, Transformer};

/// Rewrites stage-two queries into physical stage-three queries.
#[derive(Debug, Clone, Copy)]
pub struct StageThreeForger<'a> {
    ontology: &'a Ontology,
}

impl<'a> StageThreeForger<'a> {
    pub fn new(ontology: &'a Ontology) -> Self {
        Self { ontology }
    }

    pub fn forge(&self, query: &Stage2Query) -> Result<Stage3Query> {
        let model = self.ontology.get_model(&query.using)?;
        let transformer = Transformer::new(model);
        let mut out = Stage3Query::new(query.method, &model.table_name, &model.identity);
        out.meta = query.meta.clone();

        match query.method {
            Method::Find | Method::FindOne | Method::Stream => {
                let criteria = query.criteria.clone().unwrap_or_default();
                out.criteria = Some(physical_criteria(model, &criteria, &[]));
                out.joins = self.joins(model, query)?;
            }
            Method::Count | Method::Sum | Method::Avg => {
                let criteria = query.criteria.clone().unwrap_or_default();
                out.criteria = Some(Criteria {
                    where_clause: transformer.serialize_where(&criteria.where_clause),
                    ..Criteria::default()
                });
                out.numeric_attr_name = query
                    .numeric_attr_name
                    .as_deref()
                    .map(|attr| transformer.column(attr));
            }
            Method::Create => {
                let record = query.new_record.as_ref().ok_or_else(|| missing(query, "newRecord"))?;
                out.new_record = Some(transformer.serialize(record)?);
            }
            Method::CreateEach => {
                let records = query.new_records.as_ref().ok_or_else(|| missing(query, "newRecords"))?;
                out.new_records = Some(
                    records
                        .iter()
                        .map(|r| transformer.serialize(r))
                        .collect::<Result<Vec<_>>>()?,
                );
            }
            Method::Update | Method::Destroy => {
                let criteria = query.criteria.clone().unwrap_or_default();
                out.criteria = Some(Criteria {
                    where_clause: transformer.serialize_where(&criteria.where_clause),
                    ..Criteria::default()
                });
                if query.method == Method::Update {
                    let values = query
                        .values_to_set
                        .as_ref()
                        .ok_or_else(|| missing(query, "valuesToSet"))?;
                    out.values_to_set = Some(transformer.serialize(values)?);
                }
            }
            Method::FindOrCreate
            | Method::AddToCollection
            | Method::RemoveFromCollection
            | Method::ReplaceCollection => {
                return Err(Error::InvalidQuery(format!(
                    "`{}` is composed of other queries and has no physical form",
                    query.method
                )))
            }
        }

        debug!(method = %query.method, table = %out.using, joins = out.joins.len(), "forged stage three query");
        Ok(out)
    }

    /// Expand populates into join legs. Unmatchable populates get no leg.
    fn joins(&self, model: &ModelDef, query: &Stage2Query) -> Result<Vec<Join>> {
        let mut joins = Vec::new();
        for (alias, populate) in &query.populates {
            let association = self.ontology.association(&model.identity, alias)?;
            match (populate, association) {
                (Populate::Unmatchable, _) => {}
                (Populate::Singular, Association::Singular { attribute, target }) => {
                    let key = target.primary_key_column().to_string();
                    joins.push(Join {
                        is_model_assoc: true,
                        is_collection_assoc: false,
                        remove_parent_key: true,
                        criteria: Some(physical_criteria(target, &Criteria::default(), &[])),
                        ..leg(model, target, alias, &attribute.column_name, &key)
                    });
                }
                (Populate::Plural(sub), Association::Via { target, via }) => {
                    joins.push(Join {
                        criteria: Some(physical_criteria(target, sub, &[via.name.as_str()])),
                        ..leg(model, target, alias, model.primary_key_column(), &via.column_name)
                    });
                }
                (
                    Populate::Plural(sub),
                    Association::Junction {
                        target,
                        junction,
                        parent_fk,
                        child_fk,
                    },
                ) => {
                    joins.push(Join {
                        is_junction: true,
                        select: false,
                        criteria: None,
                        ..leg(model, junction, alias, model.primary_key_column(), &parent_fk.column_name)
                    });
                    joins.push(Join {
                        is_junction: true,
                        criteria: Some(physical_criteria(target, sub, &[])),
                        ..leg(junction, target, alias, &child_fk.column_name, target.primary_key_column())
                    });
                }
                (populate, _) => {
                    return Err(Error::Consistency(format!(
                        "populate {populate:?} does not fit the association `{}.{alias}`",
                        model.identity
                    )))
                }
            }
        }
        Ok(joins)
    }
}

/// A plural, selectable leg from `parent` to `child`.
fn leg(parent: &ModelDef, child: &ModelDef, alias: &str, parent_key: &str, child_key: &str) -> Join {
    Join {
        parent_collection: parent.identity.clone(),
        parent: parent.table_name.clone(),
        parent_alias: format!("{}__{alias}", parent.table_name),
        parent_key: parent_key.to_string(),
        child_collection: child.identity.clone(),
        child: child.table_name.clone(),
        child_alias: format!("{}__{alias}", child.table_name),
        child_key: child_key.to_string(),
        child_primary_key: child.primary_key_column().to_string(),
        alias: alias.to_string(),
        is_junction: false,
        is_model_assoc: false,
        is_collection_assoc: true,
        remove_parent_key: false,
        select: true,
        criteria: None,
    }
}

/// Column-named criteria with an explicit projection.
///
/// For models with a schema, `['*']` expands to every stored attribute and
/// `omit` is folded into `select`. The primary key and `forced` attributes
/// are always selected.
fn physical_criteria(model: &ModelDef, criteria: &Criteria, forced: &[&str]) -> Criteria {
    let transformer = Transformer::new(model);
    let mut select: Vec<String> = if criteria.selects_all() {
        if model.schema {
            model.stored_attributes().map(|a| a.name.clone()).collect()
        } else {
            vec![SELECT_ALL.to_string()]
        }
    } else {
        criteria
            .select
            .iter()
            .filter(|name| !model.get_attribute(name).is_some_and(|a| a.is_plural()))
            .cloned()
            .collect()
    };
    let mut omit: Vec<String> = criteria
        .omit
        .iter()
        .filter(|name| !forced.contains(&name.as_str()))
        .cloned()
        .collect();

    if select.first().map(String::as_str) != Some(SELECT_ALL) {
        if model.schema {
            select.retain(|name| !omit.contains(name));
            omit.clear();
        }
        for name in std::iter::once(model.primary_key.as_str()).chain(forced.iter().copied()) {
            if !select.iter().any(|s| s == name) {
                select.push(name.to_string());
            }
        }
    }

    transformer.serialize_criteria(&Criteria {
        where_clause: criteria.where_clause.clone(),
        limit: criteria.limit,
        skip: criteria.skip,
        sort: criteria.sort.clone(),
        select,
        omit,
    })
}

fn missing(query: &Stage2Query, key: &str) -> Error {
    Error::Consistency(format!("stage two `{}` query has no `{key}`", query.method))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::AttributeDef;
    use ormweave_proto::{record, Filter, SortDirective, WhereClause};
    use serde_json::json;

    fn ontology() -> Ontology {
        Ontology::builder()
            .model(
                ModelDef::new("user", "id")
                    .with_table("users")
                    .with_attribute(AttributeDef::number("id").column("user_id"))
                    .with_attribute(AttributeDef::string("name").column("full_name"))
                    .with_attribute(AttributeDef::number("age"))
                    .with_attribute(AttributeDef::model("manager", "user").column("manager_id"))
                    .with_attribute(AttributeDef::collection("pets", "pet").via("owner"))
                    .with_attribute(AttributeDef::collection("tags", "tag").via("users")),
            )
            .model(
                ModelDef::new("pet", "id")
                    .with_table("pets")
                    .with_attribute(AttributeDef::number("id"))
                    .with_attribute(AttributeDef::string("name"))
                    .with_attribute(AttributeDef::model("owner", "user").column("owner_id")),
            )
            .model(
                ModelDef::new("tag", "id")
                    .with_table("tags")
                    .with_attribute(AttributeDef::number("id"))
                    .with_attribute(AttributeDef::string("label"))
                    .with_attribute(AttributeDef::collection("users", "user").via("tags")),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_find_projection_and_columns() {
        let ontology = ontology();
        let criteria = Criteria {
            where_clause: WhereClause::Filter(Filter::eq("name", "bob")),
            sort: vec![SortDirective::desc("name")],
            omit: vec!["age".into()],
            ..Default::default()
        };
        let q = StageThreeForger::new(&ontology)
            .forge(&Stage2Query::new(Method::Find, "user").with_criteria(criteria))
            .unwrap();

        assert_eq!(q.using, "users");
        let c = q.criteria.unwrap();
        assert_eq!(c.where_clause, WhereClause::Filter(Filter::eq("full_name", "bob")));
        assert_eq!(c.sort, vec![SortDirective::desc("full_name")]);
        assert_eq!(c.select, vec!["user_id", "full_name", "manager_id"]);
        assert!(c.omit.is_empty());
    }

    #[test]
    fn test_populates_become_joins() {
        let ontology = ontology();
        let mut q = Stage2Query::new(Method::Find, "user").with_criteria(Criteria::default());
        q.populates.insert("manager".into(), Populate::Singular);
        q.populates.insert(
            "pets".into(),
            Populate::Plural(Criteria {
                select: vec!["id".into(), "name".into()],
                ..Default::default()
            }),
        );
        q.populates.insert("tags".into(), Populate::Plural(Criteria::default()));
        let q = StageThreeForger::new(&ontology).forge(&q).unwrap();

        assert_eq!(q.joins.len(), 4);

        let manager = &q.joins[0];
        assert!(manager.is_model_assoc && manager.remove_parent_key);
        assert_eq!(manager.parent_key, "manager_id");
        assert_eq!((manager.child.as_str(), manager.child_key.as_str()), ("users", "user_id"));
        assert_eq!(manager.parent_alias, "users__manager");

        let pets = &q.joins[1];
        assert_eq!((pets.parent_key.as_str(), pets.child_key.as_str()), ("user_id", "owner_id"));
        assert_eq!(pets.criteria.as_ref().unwrap().select, vec!["id", "name", "owner_id"]);

        let (entry, terminal) = (&q.joins[2], &q.joins[3]);
        assert!(entry.is_junction_entry());
        assert_eq!(entry.child_collection, "tag_users__user_tags");
        assert_eq!(entry.child_key, "user_tags");
        assert_eq!(terminal.parent_key, "tag_users");
        assert_eq!((terminal.child.as_str(), terminal.child_key.as_str()), ("tags", "id"));
        assert!(terminal.select && terminal.is_junction);
        assert_eq!(terminal.alias, entry.alias);
    }

    #[test]
    fn test_unmatchable_has_no_join() {
        let ontology = ontology();
        let mut q = Stage2Query::new(Method::Find, "user");
        q.populates.insert("pets".into(), Populate::Unmatchable);
        assert!(StageThreeForger::new(&ontology).forge(&q).unwrap().joins.is_empty());
    }

    #[test]
    fn test_writes_and_aggregates() {
        let ontology = ontology();
        let forger = StageThreeForger::new(&ontology);

        let mut q = Stage2Query::new(Method::Create, "user");
        q.new_record = Some(record([("name", json!("ann")), ("pets", json!([1]))]));
        let out = forger.forge(&q).unwrap();
        assert_eq!(out.new_record.unwrap(), record([("full_name", json!("ann"))]));

        let mut q = Stage2Query::new(Method::Avg, "user").with_criteria(Criteria {
            where_clause: WhereClause::Filter(Filter::eq("name", "x")),
            sort: vec![SortDirective::asc("id")],
            ..Default::default()
        });
        q.numeric_attr_name = Some("id".into());
        let out = forger.forge(&q).unwrap();
        assert_eq!(out.numeric_attr_name.as_deref(), Some("user_id"));
        let criteria = out.criteria.unwrap();
        assert!(criteria.sort.is_empty());
        assert_eq!(criteria.where_clause, WhereClause::Filter(Filter::eq("full_name", "x")));

        let err = forger.forge(&Stage2Query::new(Method::AddToCollection, "user")).unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }
}
