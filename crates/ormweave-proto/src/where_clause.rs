//! Normalized where-clause trees.
//!
//! A normalized where clause is a tree of `and`/`or` predicates whose leaves are
//! single-attribute filters. Every leaf constraint is either an equality value
//! or exactly one modifier. `contains`, `startsWith` and `endsWith` never appear
//! here: normalization rewrites them into `like` patterns.

use std::collections::BTreeSet;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::Value;

/// A normalized where clause.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum WhereClause {
    /// Matches every record (`{}`).
    #[default]
    All,
    /// Conjunction of sub-clauses.
    And(Vec<WhereClause>),
    /// Disjunction of sub-clauses.
    Or(Vec<WhereClause>),
    /// A single-attribute filter.
    Filter(Filter),
}

/// A leaf filter: one attribute (or column) and its constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub attr: String,
    pub constraint: Constraint,
}

/// The right-hand side of a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Strict equality against a primitive value (or `null`).
    Eq(Value),
    /// A single comparison modifier.
    Modifier(Modifier),
}

/// Comparison modifiers that survive normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Modifier {
    In(Vec<Value>),
    Nin(Vec<Value>),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    Ne(Value),
    Like(String),
}

impl Modifier {
    /// The modifier's key in dictionary form.
    pub fn name(&self) -> &'static str {
        match self {
            Modifier::In(_) => "in",
            Modifier::Nin(_) => "nin",
            Modifier::Lt(_) => "<",
            Modifier::Lte(_) => "<=",
            Modifier::Gt(_) => ">",
            Modifier::Gte(_) => ">=",
            Modifier::Ne(_) => "!=",
            Modifier::Like(_) => "like",
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Modifier::In(values) | Modifier::Nin(values) => Value::Array(values.clone()),
            Modifier::Lt(v)
            | Modifier::Lte(v)
            | Modifier::Gt(v)
            | Modifier::Gte(v)
            | Modifier::Ne(v) => v.clone(),
            Modifier::Like(pattern) => Value::String(pattern.clone()),
        }
    }
}

impl Filter {
    pub fn new(attr: impl Into<String>, constraint: Constraint) -> Self {
        Self {
            attr: attr.into(),
            constraint,
        }
    }

    /// Equality filter.
    pub fn eq(attr: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(attr, Constraint::Eq(value.into()))
    }

    /// `in` filter.
    pub fn is_in(attr: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(attr, Constraint::Modifier(Modifier::In(values)))
    }
}

impl WhereClause {
    /// Wrap a filter as a clause.
    pub fn filter(filter: Filter) -> Self {
        WhereClause::Filter(filter)
    }

    /// Check whether this clause matches everything.
    pub fn is_all(&self) -> bool {
        matches!(self, WhereClause::All)
    }

    /// Conjoin another clause onto this one.
    ///
    /// `All` is the identity; an existing top-level `and` is extended in place.
    pub fn and(self, other: WhereClause) -> WhereClause {
        match (self, other) {
            (WhereClause::All, other) => other,
            (this, WhereClause::All) => this,
            (WhereClause::And(mut conjuncts), other) => {
                conjuncts.push(other);
                WhereClause::And(conjuncts)
            }
            (this, other) => WhereClause::And(vec![this, other]),
        }
    }

    /// Rename every filter attribute through `rename`.
    pub fn map_attrs<F>(&self, rename: &F) -> WhereClause
    where
        F: Fn(&str) -> String,
    {
        match self {
            WhereClause::All => WhereClause::All,
            WhereClause::And(items) => {
                WhereClause::And(items.iter().map(|c| c.map_attrs(rename)).collect())
            }
            WhereClause::Or(items) => {
                WhereClause::Or(items.iter().map(|c| c.map_attrs(rename)).collect())
            }
            WhereClause::Filter(filter) => WhereClause::Filter(Filter {
                attr: rename(&filter.attr),
                constraint: filter.constraint.clone(),
            }),
        }
    }

    /// Collect every attribute referenced by a filter in this clause.
    pub fn attributes(&self) -> BTreeSet<String> {
        let mut attrs = BTreeSet::new();
        self.collect_attributes(&mut attrs);
        attrs
    }

    fn collect_attributes(&self, attrs: &mut BTreeSet<String>) {
        match self {
            WhereClause::All => {}
            WhereClause::And(items) | WhereClause::Or(items) => {
                for item in items {
                    item.collect_attributes(attrs);
                }
            }
            WhereClause::Filter(filter) => {
                attrs.insert(filter.attr.clone());
            }
        }
    }

    /// Render the clause in its dictionary form.
    pub fn to_value(&self) -> Value {
        // Serializing into a `Value` cannot fail for this type.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for WhereClause {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            WhereClause::All => serializer.serialize_map(Some(0))?.end(),
            WhereClause::And(items) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("and", items)?;
                map.end()
            }
            WhereClause::Or(items) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("or", items)?;
                map.end()
            }
            WhereClause::Filter(filter) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(&filter.attr, &filter.constraint)?;
                map.end()
            }
        }
    }
}

impl Serialize for Constraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Constraint::Eq(value) => value.serialize(serializer),
            Constraint::Modifier(modifier) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(modifier.name(), &modifier.to_value())?;
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dictionary_form() {
        let clause = WhereClause::And(vec![
            WhereClause::filter(Filter::eq("name", "bob")),
            WhereClause::Or(vec![
                WhereClause::filter(Filter::is_in("id", vec![json!(1), json!(2)])),
                WhereClause::filter(Filter::new(
                    "age",
                    Constraint::Modifier(Modifier::Gte(json!(21))),
                )),
            ]),
        ]);

        assert_eq!(
            clause.to_value(),
            json!({ "and": [
                { "name": "bob" },
                { "or": [ { "id": { "in": [1, 2] } }, { "age": { ">=": 21 } } ] }
            ]})
        );
        assert_eq!(WhereClause::All.to_value(), json!({}));
    }

    #[test]
    fn test_and_identity() {
        let f = WhereClause::filter(Filter::eq("a", 1));
        assert_eq!(WhereClause::All.and(f.clone()), f);
        assert_eq!(f.clone().and(WhereClause::All), f);

        let combined = f.clone().and(WhereClause::filter(Filter::eq("b", 2)));
        let combined = combined.and(WhereClause::filter(Filter::eq("c", 3)));
        match combined {
            WhereClause::And(items) => assert_eq!(items.len(), 3),
            other => panic!("expected and, got {other:?}"),
        }
    }

    #[test]
    fn test_map_attrs_and_attributes() {
        let clause = WhereClause::Or(vec![
            WhereClause::filter(Filter::eq("owner", 1)),
            WhereClause::filter(Filter::eq("name", "x")),
        ]);
        let renamed = clause.map_attrs(&|a: &str| format!("{a}_col"));
        let attrs: Vec<_> = renamed.attributes().into_iter().collect();
        assert_eq!(attrs, vec!["name_col".to_string(), "owner_col".to_string()]);
    }
}
