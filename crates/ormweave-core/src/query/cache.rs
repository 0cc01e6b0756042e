//! Per-query result cache.
//!
//! While a plan runs, every join leg appends its records to its own bucket,
//! keyed by the leg's alias and child collection. Two aliases reading the
//! same collection (or a model populating itself) therefore never share a
//! bucket, and each bucket holds exactly the columns its leg selected. The
//! parent operation's records are kept apart from every bucket.
//!
//! Appends de-duplicate by primary key. A duplicate merges any columns the
//! first copy lacked, so arrival order does not change a bucket's contents.
//! Once the runner is done the cache is frozen into a read-only
//! [`ResultCache`] for the integrator.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use ormweave_proto::{value_key, Join, Record};
use serde_json::Value;

#[derive(Debug, Default)]
struct Bucket {
    records: Vec<Record>,
    positions: HashMap<String, usize>,
}

impl Bucket {
    fn append(&mut self, primary_key: &str, records: Vec<Record>) -> usize {
        let before = self.records.len();
        for record in records {
            // Records without a primary key cannot be de-duplicated; keep them.
            let key = match record.get(primary_key) {
                Some(pk) if !pk.is_null() => value_key(pk),
                _ => {
                    self.records.push(record);
                    continue;
                }
            };
            match self.positions.get(&key) {
                Some(&at) => {
                    let existing = &mut self.records[at];
                    for (column, value) in record {
                        existing.entry(column).or_insert(value);
                    }
                }
                None => {
                    self.positions.insert(key, self.records.len());
                    self.records.push(record);
                }
            }
        }
        self.records.len() - before
    }
}

/// Bucket key of a join leg.
fn leg_key(join: &Join) -> String {
    format!("{}/{}", join.alias, join.child_collection)
}

/// Writable cache used while a plan runs.
#[derive(Debug)]
pub struct CacheBuilder {
    parent_collection: String,
    parent_primary_key: String,
    parents: Vec<Record>,
    buckets: DashMap<String, Bucket>,
}

impl CacheBuilder {
    /// Start a cache from the parent operation's records.
    pub fn new(
        collection: impl Into<String>,
        primary_key: impl Into<String>,
        parents: Vec<Record>,
    ) -> Self {
        Self {
            parent_collection: collection.into(),
            parent_primary_key: primary_key.into(),
            parents,
            buckets: DashMap::new(),
        }
    }

    pub fn parents(&self) -> &[Record] {
        &self.parents
    }

    /// Append records fetched for a join leg, returning how many were new.
    pub fn append(&self, leg: &Join, records: Vec<Record>) -> usize {
        self.buckets
            .entry(leg_key(leg))
            .or_default()
            .append(&leg.child_primary_key, records)
    }

    /// Freeze into a read-only cache.
    pub fn freeze(self) -> ResultCache {
        ResultCache {
            parent_collection: self.parent_collection,
            parent_primary_key: self.parent_primary_key,
            parents: self.parents,
            buckets: self
                .buckets
                .into_iter()
                .map(|(name, bucket)| (name, bucket.records))
                .collect(),
        }
    }
}

/// Read-only view of everything a plan fetched.
#[derive(Debug, Clone, Default)]
pub struct ResultCache {
    parent_collection: String,
    parent_primary_key: String,
    parents: Vec<Record>,
    buckets: HashMap<String, Vec<Record>>,
}

impl ResultCache {
    pub fn parent_collection(&self) -> &str {
        &self.parent_collection
    }

    pub fn parent_primary_key(&self) -> &str {
        &self.parent_primary_key
    }

    /// Parent records in the order the parent operation returned them.
    pub fn parents(&self) -> &[Record] {
        &self.parents
    }

    /// Records fetched for a join leg.
    pub fn records(&self, leg: &Join) -> &[Record] {
        self.buckets
            .get(&leg_key(leg))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn into_parents(self) -> Vec<Record> {
        self.parents
    }
}

/// Distinct non-null values of `column`, in first-seen order.
pub fn distinct<'r>(records: impl Iterator<Item = &'r Record>, column: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    records
        .filter_map(|r| r.get(column))
        .filter(|v| !v.is_null() && seen.insert(value_key(v)))
        .cloned()
        .collect()
}
