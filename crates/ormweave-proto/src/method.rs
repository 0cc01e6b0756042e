//! Query methods and the payload keys each one accepts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A model method a caller can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    Find,
    FindOne,
    Stream,
    Count,
    Sum,
    Avg,
    Create,
    CreateEach,
    FindOrCreate,
    Update,
    Destroy,
    AddToCollection,
    RemoveFromCollection,
    ReplaceCollection,
}

/// A top-level key of a stage-one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Criteria,
    Populates,
    NewRecord,
    NewRecords,
    ValuesToSet,
    TargetRecordIds,
    CollectionAttrName,
    AssociatedIds,
    NumericAttrName,
    EachRecordFn,
    EachBatchFn,
    Meta,
}

impl QueryKey {
    /// All keys, in the order they are validated.
    pub const ALL: [QueryKey; 12] = [
        QueryKey::Criteria,
        QueryKey::Populates,
        QueryKey::NewRecord,
        QueryKey::NewRecords,
        QueryKey::ValuesToSet,
        QueryKey::TargetRecordIds,
        QueryKey::CollectionAttrName,
        QueryKey::AssociatedIds,
        QueryKey::NumericAttrName,
        QueryKey::EachRecordFn,
        QueryKey::EachBatchFn,
        QueryKey::Meta,
    ];

    /// The key as it appears in a stage-one dictionary.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKey::Criteria => "criteria",
            QueryKey::Populates => "populates",
            QueryKey::NewRecord => "newRecord",
            QueryKey::NewRecords => "newRecords",
            QueryKey::ValuesToSet => "valuesToSet",
            QueryKey::TargetRecordIds => "targetRecordIds",
            QueryKey::CollectionAttrName => "collectionAttrName",
            QueryKey::AssociatedIds => "associatedIds",
            QueryKey::NumericAttrName => "numericAttrName",
            QueryKey::EachRecordFn => "eachRecordFn",
            QueryKey::EachBatchFn => "eachBatchFn",
            QueryKey::Meta => "meta",
        }
    }

    /// Look up a key by its dictionary name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|key| key.as_str() == name)
    }
}

impl Method {
    /// All methods.
    pub const ALL: [Method; 14] = [
        Method::Find,
        Method::FindOne,
        Method::Stream,
        Method::Count,
        Method::Sum,
        Method::Avg,
        Method::Create,
        Method::CreateEach,
        Method::FindOrCreate,
        Method::Update,
        Method::Destroy,
        Method::AddToCollection,
        Method::RemoveFromCollection,
        Method::ReplaceCollection,
    ];

    /// The method name as callers spell it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Find => "find",
            Method::FindOne => "findOne",
            Method::Stream => "stream",
            Method::Count => "count",
            Method::Sum => "sum",
            Method::Avg => "avg",
            Method::Create => "create",
            Method::CreateEach => "createEach",
            Method::FindOrCreate => "findOrCreate",
            Method::Update => "update",
            Method::Destroy => "destroy",
            Method::AddToCollection => "addToCollection",
            Method::RemoveFromCollection => "removeFromCollection",
            Method::ReplaceCollection => "replaceCollection",
        }
    }

    /// Payload keys this method accepts. `meta` is accepted by every method.
    pub fn legal_keys(&self) -> &'static [QueryKey] {
        use QueryKey::*;
        match self {
            Method::Find | Method::FindOne => &[Criteria, Populates, Meta],
            Method::Stream => &[Criteria, Populates, EachRecordFn, EachBatchFn, Meta],
            Method::Count | Method::Destroy => &[Criteria, Meta],
            Method::Sum | Method::Avg => &[NumericAttrName, Criteria, Meta],
            Method::Create => &[NewRecord, Meta],
            Method::CreateEach => &[NewRecords, Meta],
            Method::FindOrCreate => &[Criteria, NewRecord, Meta],
            Method::Update => &[Criteria, ValuesToSet, Meta],
            Method::AddToCollection | Method::RemoveFromCollection | Method::ReplaceCollection => {
                &[TargetRecordIds, CollectionAttrName, AssociatedIds, Meta]
            }
        }
    }

    /// Check whether `key` is legal for this method.
    pub fn accepts(&self, key: QueryKey) -> bool {
        self.legal_keys().contains(&key)
    }

    /// Methods that return records to the caller.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Method::Find | Method::FindOne | Method::Stream | Method::FindOrCreate
        )
    }

    /// Methods whose criteria may carry a custom `limit` and `skip`.
    pub fn supports_pagination(&self) -> bool {
        matches!(self, Method::Find | Method::Stream)
    }

    /// Methods that may carry `populates`.
    pub fn supports_populates(&self) -> bool {
        matches!(self, Method::Find | Method::FindOne | Method::Stream)
    }

    /// Aggregation methods.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Method::Count | Method::Sum | Method::Avg)
    }

    /// Methods that hand a payload to an adapter write call.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Method::Create | Method::CreateEach | Method::Update | Method::Destroy
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::UnknownMethod(s.to_string()))
    }
}
