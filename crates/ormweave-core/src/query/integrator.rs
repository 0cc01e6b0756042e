//! In-memory join integration.
//!
//! Stitches the per-leg record sets of a [`ResultCache`] into parent
//! records, one alias at a time. Each alias is integrated as a hash join:
//!
//! 1. Build phase: index the child bucket (and junction rows) by join key
//! 2. Probe phase: for each parent, look up its children in O(1)
//!
//! Children are attached column-named. Subcriteria `where` is re-applied,
//! then `sort`, `skip` and `limit` run per parent.

use std::collections::{HashMap, HashSet};

use ormweave_proto::{group_by_alias, value_key, Criteria, Join, JoinGroup, Record};
use serde_json::Value;
use tracing::debug;

use super::cache::ResultCache;
use super::filter::FilterEvaluator;
use super::rows::{paginate, project, sort_records};

/// Attach every alias of `joins` to the cached parent records.
///
/// Parents keep the order the parent operation returned them in.
pub fn integrate(joins: &[Join], cache: &ResultCache) -> Vec<Record> {
    let indexes: Vec<AliasIndex<'_>> = group_by_alias(joins)
        .into_iter()
        .map(|group| AliasIndex::build(group, cache))
        .collect();

    debug!(
        parents = cache.parents().len(),
        aliases = indexes.len(),
        "integrating joins in memory"
    );

    cache
        .parents()
        .iter()
        .map(|parent| {
            let mut record = parent.clone();
            for index in &indexes {
                index.attach(&mut record);
            }
            record
        })
        .collect()
}

enum AliasIndex<'a> {
    Singular {
        join: &'a Join,
        children: HashMap<String, &'a Record>,
    },
    Plural {
        join: &'a Join,
        children: HashMap<String, Vec<&'a Record>>,
    },
    Junction {
        entry: &'a Join,
        terminal: &'a Join,
        links: HashMap<String, Vec<&'a Value>>,
        children: HashMap<String, &'a Record>,
    },
}

impl<'a> AliasIndex<'a> {
    fn build(group: JoinGroup<'a>, cache: &'a ResultCache) -> Self {
        let terminal = group.terminal();
        let matching = matching_children(terminal, cache);

        if let Some(entry) = group.junction() {
            let mut links: HashMap<String, Vec<&Value>> = HashMap::new();
            for row in cache.records(entry) {
                let (Some(parent), Some(child)) =
                    (row.get(&entry.child_key), row.get(&terminal.parent_key))
                else {
                    continue;
                };
                if parent.is_null() || child.is_null() {
                    continue;
                }
                links.entry(value_key(parent)).or_default().push(child);
            }
            return AliasIndex::Junction {
                entry,
                terminal,
                links,
                children: index_unique(matching, &terminal.child_key),
            };
        }

        if terminal.is_model_assoc {
            AliasIndex::Singular {
                join: terminal,
                children: index_unique(matching, &terminal.child_key),
            }
        } else {
            let mut children: HashMap<String, Vec<&Record>> = HashMap::new();
            for child in matching {
                if let Some(key) = child.get(&terminal.child_key).filter(|v| !v.is_null()) {
                    children.entry(value_key(key)).or_default().push(child);
                }
            }
            AliasIndex::Plural {
                join: terminal,
                children,
            }
        }
    }

    fn attach(&self, record: &mut Record) {
        match self {
            AliasIndex::Singular { join, children } => {
                let child = parent_key(record, &join.parent_key)
                    .and_then(|key| children.get(&key))
                    .map(|child| Value::Object(project_child(join, child)))
                    .unwrap_or(Value::Null);
                if join.remove_parent_key {
                    record.remove(&join.parent_key);
                }
                record.insert(join.alias.clone(), child);
            }
            AliasIndex::Plural { join, children } => {
                let matched = parent_key(record, &join.parent_key)
                    .and_then(|key| children.get(&key))
                    .cloned()
                    .unwrap_or_default();
                record.insert(join.alias.clone(), finish_plural(join, matched));
            }
            AliasIndex::Junction {
                entry,
                terminal,
                links,
                children,
            } => {
                let mut seen = HashSet::new();
                let matched: Vec<&Record> = parent_key(record, &entry.parent_key)
                    .and_then(|key| links.get(&key))
                    .into_iter()
                    .flatten()
                    .map(|fk| value_key(fk))
                    .filter(|fk| seen.insert(fk.clone()))
                    .filter_map(|fk| children.get(&fk).copied())
                    .collect();
                record.insert(terminal.alias.clone(), finish_plural(terminal, matched));
            }
        }
    }
}

/// Child records of a leg that satisfy the leg's `where`.
fn matching_children<'a>(join: &Join, cache: &'a ResultCache) -> Vec<&'a Record> {
    let records = cache.records(join);
    match &join.criteria {
        Some(criteria) if !criteria.where_clause.is_all() => records
            .iter()
            .filter(|r| FilterEvaluator::evaluate(&criteria.where_clause, r))
            .collect(),
        _ => records.iter().collect(),
    }
}

fn index_unique<'a>(records: Vec<&'a Record>, column: &str) -> HashMap<String, &'a Record> {
    let mut index = HashMap::new();
    for record in records {
        if let Some(key) = record.get(column).filter(|v| !v.is_null()) {
            index.entry(value_key(key)).or_insert(record);
        }
    }
    index
}

fn parent_key(record: &Record, column: &str) -> Option<String> {
    record
        .get(column)
        .filter(|v| !v.is_null())
        .map(value_key)
}

fn project_child(join: &Join, child: &Record) -> Record {
    match &join.criteria {
        Some(criteria) => project(child, &criteria.select, &criteria.omit),
        None => child.clone(),
    }
}

fn finish_plural(join: &Join, matched: Vec<&Record>) -> Value {
    let mut children: Vec<Record> = matched.into_iter().cloned().collect();
    let default = Criteria::default();
    let criteria = join.criteria.as_ref().unwrap_or(&default);
    sort_records(&mut children, &criteria.sort);
    paginate(&mut children, criteria.skip, criteria.limit);
    Value::Array(
        children
            .iter()
            .map(|c| Value::Object(project(c, &criteria.select, &criteria.omit)))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::cache::CacheBuilder;
    use ormweave_proto::{record, Filter, SortDirective, WhereClause};
    use serde_json::json;

    fn join(alias: &str, parent: &str, parent_key: &str, child: &str, child_key: &str) -> Join {
        Join {
            parent_collection: parent.into(),
            parent: parent.into(),
            parent_alias: format!("{parent}__{alias}"),
            parent_key: parent_key.into(),
            child_collection: child.into(),
            child: child.into(),
            child_alias: format!("{child}__{alias}"),
            child_key: child_key.into(),
            child_primary_key: "id".into(),
            alias: alias.into(),
            is_junction: false,
            is_model_assoc: false,
            is_collection_assoc: true,
            remove_parent_key: false,
            select: true,
            criteria: Some(Criteria {
                sort: vec![SortDirective::asc("id")],
                ..Default::default()
            }),
        }
    }

    fn users() -> Vec<Record> {
        vec![record([("id", json!(1))]), record([("id", json!(2))])]
    }

    #[test]
    fn test_plural_via() {
        let pets = join("pets", "user", "id", "pet", "owner");
        let cache = CacheBuilder::new("user", "id", users());
        cache.append(
            &pets,
            vec![
                record([("id", json!(11)), ("owner", json!(1))]),
                record([("id", json!(10)), ("owner", json!(1))]),
                record([("id", json!(12)), ("owner", json!(2))]),
            ],
        );
        let out = integrate(&[pets], &cache.freeze());
        assert_eq!(out[0]["pets"], json!([{ "id": 10, "owner": 1 }, { "id": 11, "owner": 1 }]));
        assert_eq!(out[1]["pets"], json!([{ "id": 12, "owner": 2 }]));
    }

    #[test]
    fn test_singular_replaces_parent_key() {
        let mut owner = join("owner", "pet", "owner_id", "user", "id");
        owner.is_model_assoc = true;
        owner.is_collection_assoc = false;
        owner.remove_parent_key = true;
        let cache = CacheBuilder::new(
            "pet",
            "id",
            vec![
                record([("id", json!(10)), ("owner_id", json!(1))]),
                record([("id", json!(11)), ("owner_id", Value::Null)]),
            ],
        );
        cache.append(&owner, vec![record([("id", json!(1)), ("name", json!("a"))])]);

        let out = integrate(&[owner], &cache.freeze());
        assert_eq!(out[0], record([("id", json!(10)), ("owner", json!({ "id": 1, "name": "a" }))]));
        assert_eq!(out[1]["owner"], Value::Null);
        assert!(!out[1].contains_key("owner_id"));
    }

    #[test]
    fn test_junction_dedupes_children() {
        let mut entry = join("tags", "user", "id", "user_tags__tag_users", "user_tags");
        entry.is_junction = true;
        entry.select = false;
        let mut terminal = join("tags", "user_tags__tag_users", "tag_users", "tag", "id");
        terminal.is_junction = true;

        let cache = CacheBuilder::new("user", "id", users());
        cache.append(
            &entry,
            vec![
                record([("id", json!(1)), ("user_tags", json!(1)), ("tag_users", json!(5))]),
                record([("id", json!(2)), ("user_tags", json!(1)), ("tag_users", json!(5))]),
                record([("id", json!(3)), ("user_tags", json!(1)), ("tag_users", json!(6))]),
            ],
        );
        cache.append(&terminal, vec![record([("id", json!(5))]), record([("id", json!(6))])]);

        let out = integrate(&[entry, terminal], &cache.freeze());
        assert_eq!(out[0]["tags"], json!([{ "id": 5 }, { "id": 6 }]));
        assert_eq!(out[1]["tags"], json!([]));
    }

    #[test]
    fn test_self_referential_alias_sees_every_child() {
        let reports = join("reports", "user", "id", "user", "manager");
        let cache = CacheBuilder::new("user", "id", vec![record([("id", json!(1))])]);
        cache.append(
            &reports,
            vec![
                record([("id", json!(1)), ("manager", Value::Null)]),
                record([("id", json!(2)), ("manager", json!(1))]),
            ],
        );
        let out = integrate(&[reports], &cache.freeze());
        assert_eq!(out, vec![record([("id", json!(1)), ("reports", json!([{ "id": 2, "manager": 1 }]))])]);
    }

    #[test]
    fn test_reapplies_where_and_paginates_per_parent() {
        let mut pets = join("pets", "user", "id", "pet", "owner");
        pets.criteria = Some(Criteria {
            where_clause: WhereClause::filter(Filter::eq("kind", "dog")),
            sort: vec![SortDirective::desc("id")],
            limit: 1,
            select: vec!["id".into()],
            ..Default::default()
        });
        let cache = CacheBuilder::new("user", "id", users());
        cache.append(
            &pets,
            vec![
                record([("id", json!(10)), ("owner", json!(1)), ("kind", json!("cat"))]),
                record([("id", json!(11)), ("owner", json!(1)), ("kind", json!("dog"))]),
                record([("id", json!(12)), ("owner", json!(1)), ("kind", json!("dog"))]),
                record([("id", json!(13)), ("owner", json!(2)), ("kind", json!("dog"))]),
            ],
        );

        let out = integrate(&[pets], &cache.freeze());
        assert_eq!(out[0]["pets"], json!([{ "id": 12 }]));
        assert_eq!(out[1]["pets"], json!([{ "id": 13 }]));
    }
}
