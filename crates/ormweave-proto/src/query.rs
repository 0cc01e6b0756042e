//! Staged query types.
//!
//! A query moves through three shapes:
//! - [`Stage1Query`]: what the caller handed in, loosely typed;
//! - [`Stage2Query`]: validated and normalized, still attribute-named;
//! - [`Stage3Query`]: physical, column-named, with populates expanded to joins.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::criteria::Criteria;
use crate::join::Join;
use crate::method::{Method, QueryKey};
use crate::record::Record;

/// How a stream delivers records to its iteratee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IterateeKind {
    /// Called once per record.
    EachRecord,
    /// Called once per batch of records.
    EachBatch,
}

impl IterateeKind {
    pub fn key(&self) -> QueryKey {
        match self {
            IterateeKind::EachRecord => QueryKey::EachRecordFn,
            IterateeKind::EachBatch => QueryKey::EachBatchFn,
        }
    }
}

/// Raw caller input.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage1Query {
    pub method: Method,
    /// Identity of the model being queried.
    pub using: String,
    /// Top-level keys (`criteria`, `populates`, `newRecord`, ...).
    pub args: Map<String, Value>,
    /// Iteratees supplied for `stream`.
    pub iteratees: Vec<IterateeKind>,
}

impl Stage1Query {
    pub fn new(method: Method, using: impl Into<String>) -> Self {
        Self {
            method,
            using: using.into(),
            args: Map::new(),
            iteratees: Vec::new(),
        }
    }

    /// Set an arbitrary top-level key.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    /// Set a well-known top-level key.
    pub fn with_key(self, key: QueryKey, value: Value) -> Self {
        self.with(key.as_str(), value)
    }

    pub fn with_criteria(self, criteria: Value) -> Self {
        self.with_key(QueryKey::Criteria, criteria)
    }

    pub fn with_populates(self, populates: Value) -> Self {
        self.with_key(QueryKey::Populates, populates)
    }

    /// Add a single populate with a subcriteria (or `true`).
    pub fn populate(mut self, attr: impl Into<String>, subcriteria: Value) -> Self {
        let entry = self
            .args
            .entry(QueryKey::Populates.as_str())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = entry {
            map.insert(attr.into(), subcriteria);
        }
        self
    }

    pub fn with_iteratee(mut self, kind: IterateeKind) -> Self {
        self.iteratees.push(kind);
        self
    }

    /// Read a well-known top-level key.
    pub fn get(&self, key: QueryKey) -> Option<&Value> {
        self.args.get(key.as_str())
    }
}

/// A populate directive after validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Populate {
    /// Populate a singular association.
    Singular,
    /// Populate a plural association with normalized subcriteria.
    Plural(Criteria),
    /// A plural populate whose subcriteria provably matches nothing.
    ///
    /// It still yields an empty array on every parent record.
    Unmatchable,
}

/// A validated, normalized, attribute-named query.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage2Query {
    pub method: Method,
    /// Model identity.
    pub using: String,
    pub criteria: Option<Criteria>,
    pub populates: BTreeMap<String, Populate>,
    pub new_record: Option<Record>,
    pub new_records: Option<Vec<Record>>,
    pub values_to_set: Option<Record>,
    pub target_record_ids: Option<Vec<Value>>,
    pub collection_attr_name: Option<String>,
    pub associated_ids: Option<Vec<Value>>,
    pub numeric_attr_name: Option<String>,
    pub iteratee: Option<IterateeKind>,
    pub meta: Option<Map<String, Value>>,
}

impl Stage2Query {
    pub fn new(method: Method, using: impl Into<String>) -> Self {
        Self {
            method,
            using: using.into(),
            criteria: None,
            populates: BTreeMap::new(),
            new_record: None,
            new_records: None,
            values_to_set: None,
            target_record_ids: None,
            collection_attr_name: None,
            associated_ids: None,
            numeric_attr_name: None,
            iteratee: None,
            meta: None,
        }
    }

    pub fn with_criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = Some(criteria);
        self
    }
}

/// A physical, column-named query ready for an adapter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage3Query {
    pub method: Method,
    /// Physical table name.
    pub using: String,
    /// Model identity the table belongs to.
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Criteria>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub joins: Vec<Join>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_record: Option<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_records: Option<Vec<Record>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values_to_set: Option<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_attr_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

impl Stage3Query {
    pub fn new(method: Method, table: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            method,
            using: table.into(),
            model: model.into(),
            criteria: None,
            joins: Vec::new(),
            new_record: None,
            new_records: None,
            values_to_set: None,
            numeric_attr_name: None,
            meta: None,
        }
    }

    pub fn with_criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = Some(criteria);
        self
    }

    /// Criteria, or the match-everything default.
    pub fn criteria_or_default(&self) -> Criteria {
        self.criteria.clone().unwrap_or_default()
    }
}
