//! Normalized criteria.

use std::fmt;
use std::str::FromStr;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::where_clause::WhereClause;

/// Largest integer that survives a round trip through an IEEE-754 double.
///
/// A `limit` of this value means "no limit".
pub const MAX_SAFE_INTEGER: u64 = 9_007_199_254_740_991;

/// The `select` list meaning "every attribute".
pub const SELECT_ALL: &str = "*";

/// Sort direction of a single directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("asc") {
            Ok(SortDirection::Asc)
        } else if s.eq_ignore_ascii_case("desc") {
            Ok(SortDirection::Desc)
        } else {
            Err(Error::UnknownSortDirection(s.to_string()))
        }
    }
}

/// One single-key comparator directive, e.g. `{ name: 'DESC' }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortDirective {
    pub attr: String,
    pub direction: SortDirection,
}

impl SortDirective {
    pub fn asc(attr: impl Into<String>) -> Self {
        Self {
            attr: attr.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(attr: impl Into<String>) -> Self {
        Self {
            attr: attr.into(),
            direction: SortDirection::Desc,
        }
    }
}

impl Serialize for SortDirective {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.attr, self.direction.as_str())?;
        map.end()
    }
}

/// A fully normalized criteria.
///
/// Invariants upheld by normalization:
/// - `limit` is in `1..=MAX_SAFE_INTEGER`;
/// - `sort` never names the same attribute twice;
/// - `select` and `omit` are never both customized;
/// - a custom `select` always contains the primary key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Criteria {
    #[serde(rename = "where")]
    pub where_clause: WhereClause,
    pub limit: u64,
    pub skip: u64,
    pub sort: Vec<SortDirective>,
    pub select: Vec<String>,
    pub omit: Vec<String>,
}

impl Default for Criteria {
    fn default() -> Self {
        Self {
            where_clause: WhereClause::All,
            limit: MAX_SAFE_INTEGER,
            skip: 0,
            sort: Vec::new(),
            select: vec![SELECT_ALL.to_string()],
            omit: Vec::new(),
        }
    }
}

impl Criteria {
    /// Check whether `select` is the default `['*']`.
    pub fn selects_all(&self) -> bool {
        self.select.len() == 1 && self.select[0] == SELECT_ALL
    }

    /// Check whether a limit other than "no limit" is set.
    pub fn has_limit(&self) -> bool {
        self.limit != MAX_SAFE_INTEGER
    }

    /// Check whether `select` or `omit` deviates from its default.
    pub fn has_custom_projection(&self) -> bool {
        !self.selects_all() || !self.omit.is_empty()
    }

    /// Drop pagination and ordering, leaving only the where clause.
    pub fn without_pagination(mut self) -> Self {
        self.limit = MAX_SAFE_INTEGER;
        self.skip = 0;
        self.sort.clear();
        self
    }

    /// Render in dictionary form.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::where_clause::Filter;
    use serde_json::json;

    #[test]
    fn test_default_criteria_shape() {
        let criteria = Criteria::default();
        assert!(criteria.selects_all());
        assert!(!criteria.has_limit());
        assert_eq!(
            criteria.to_value(),
            json!({
                "where": {},
                "limit": 9007199254740991u64,
                "skip": 0,
                "sort": [],
                "select": ["*"],
                "omit": []
            })
        );
    }

    #[test]
    fn test_sort_directive_form() {
        let criteria = Criteria {
            where_clause: WhereClause::filter(Filter::eq("id", 3)),
            sort: vec![SortDirective::desc("name"), SortDirective::asc("id")],
            ..Default::default()
        };
        let value = criteria.to_value();
        assert_eq!(value["sort"], json!([{ "name": "DESC" }, { "id": "ASC" }]));
        assert_eq!(value["where"], json!({ "id": 3 }));
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("desc".parse::<SortDirection>().unwrap(), SortDirection::Desc);
        assert_eq!("ASC".parse::<SortDirection>().unwrap(), SortDirection::Asc);
        assert!("up".parse::<SortDirection>().is_err());
    }

    #[test]
    fn test_without_pagination() {
        let criteria = Criteria {
            limit: 10,
            skip: 5,
            sort: vec![SortDirective::asc("id")],
            ..Default::default()
        }
        .without_pagination();
        assert_eq!(criteria.limit, MAX_SAFE_INTEGER);
        assert_eq!(criteria.skip, 0);
        assert!(criteria.sort.is_empty());
    }
}
