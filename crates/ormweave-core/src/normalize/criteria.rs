//! Criteria normalization.

use std::collections::HashSet;

use ormweave_proto::{Criteria, SortDirection, SortDirective, MAX_SAFE_INTEGER, SELECT_ALL};
use serde_json::{Map, Value};
use tracing::warn;

use super::error::CriteriaError;
use super::value::number_from_str;
use super::Normalizer;
use crate::ontology::ModelDef;

/// Keys a criteria dictionary may hold.
const CLAUSE_KEYS: [&str; 6] = ["where", "limit", "skip", "sort", "select", "omit"];

/// Clauses that used to be accepted and now point at a replacement.
const DEPRECATED_CLAUSES: [(&str, &str); 5] = [
    ("sum", "use the `sum` method instead"),
    ("average", "use the `avg` method instead"),
    ("min", "sort ascending and use a limit of 1 instead"),
    ("max", "sort descending and use a limit of 1 instead"),
    ("groupBy", "run a native query through the adapter instead"),
];

impl<'a> Normalizer<'a> {
    /// Normalize a raw criteria against `model`.
    ///
    /// A string, number or array is shorthand for a primary-key lookup, and a
    /// dictionary without any clause key is shorthand for a `where` clause.
    /// An empty `sort` defaults to the primary key ascending.
    pub fn criteria(&self, model: &ModelDef, raw: &Value) -> Result<Criteria, CriteriaError> {
        let mut clauses = match raw {
            Value::Null => {
                if !self.compat.null_criteria {
                    return Err(CriteriaError::HighlyIrregular("criteria cannot be null".to_string()));
                }
                warn!(model = %model.identity, "null criteria treated as match-everything");
                Map::new()
            }
            Value::String(_) | Value::Number(_) | Value::Array(_) => {
                let mut where_clause = Map::new();
                where_clause.insert(model.primary_key.clone(), raw.clone());
                let mut clauses = Map::new();
                clauses.insert("where".to_string(), Value::Object(where_clause));
                clauses
            }
            Value::Bool(_) => {
                return Err(CriteriaError::HighlyIrregular(format!(
                    "`{raw}` is not a usable criteria"
                )))
            }
            Value::Object(map) => self.clause_map(model, map)?,
        };

        let where_clause = self.where_clause(model, clauses.get("where"))?;
        let limit = limit(self, model, clauses.get("limit"))?;
        let skip = skip(clauses.get("skip"))?;
        let sort = self.sort(model, clauses.remove("sort"))?;
        let select = select(model, clauses.get("select"))?;
        let omit = omit(model, clauses.get("omit"))?;

        if select.first().map(String::as_str) != Some(SELECT_ALL) && !omit.is_empty() {
            return Err(CriteriaError::HighlyIrregular(
                "`select` and `omit` cannot both be used".to_string(),
            ));
        }

        Ok(Criteria {
            where_clause,
            limit,
            skip,
            sort,
            select,
            omit,
        })
    }

    /// Split a criteria dictionary into its clauses, folding shorthand forms.
    fn clause_map(&self, model: &ModelDef, map: &Map<String, Value>) -> Result<Map<String, Value>, CriteriaError> {
        for (name, hint) in DEPRECATED_CLAUSES {
            if map.contains_key(name) {
                return Err(CriteriaError::HighlyIrregular(format!(
                    "the `{name}` clause is no longer supported, {hint}"
                )));
            }
        }
        for name in ["populate", "joins"] {
            if map.contains_key(name) {
                return Err(CriteriaError::HighlyIrregular(format!(
                    "`{name}` cannot be used inside criteria, populate associations through `populates`"
                )));
            }
        }

        if !map.keys().any(|k| CLAUSE_KEYS.contains(&k.as_str())) {
            let mut clauses = Map::new();
            clauses.insert("where".to_string(), Value::Object(map.clone()));
            return Ok(clauses);
        }

        let mut clauses = Map::new();
        let mut loose = Map::new();
        for (key, value) in map {
            if CLAUSE_KEYS.contains(&key.as_str()) {
                clauses.insert(key.clone(), value.clone());
            } else {
                loose.insert(key.clone(), value.clone());
            }
        }
        if loose.is_empty() {
            return Ok(clauses);
        }

        if !self.compat.loose_top_level_keys {
            let keys: Vec<&str> = loose.keys().map(String::as_str).collect();
            return Err(CriteriaError::HighlyIrregular(format!(
                "unrecognized criteria keys {keys:?}; move attribute filters into `where`"
            )));
        }
        warn!(
            model = %model.identity,
            keys = ?loose.keys().collect::<Vec<_>>(),
            "attribute filters beside criteria clauses folded into `where`"
        );

        let mut folded = match clauses.remove("where") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(existing)) => existing,
            Some(other) => {
                return Err(CriteriaError::HighlyIrregular(format!(
                    "`where` must be a dictionary, got `{other}`"
                )))
            }
        };
        for (key, value) in loose {
            if folded.contains_key(&key) {
                return Err(CriteriaError::HighlyIrregular(format!(
                    "`{key}` appears both inside and beside `where`"
                )));
            }
            folded.insert(key, value);
        }
        clauses.insert("where".to_string(), Value::Object(folded));
        Ok(clauses)
    }

    fn sort(&self, model: &ModelDef, raw: Option<Value>) -> Result<Vec<SortDirective>, CriteriaError> {
        let directives = match raw {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(s)) => parse_sort_string(&s)?,
            Some(Value::Array(items)) => {
                let mut directives = Vec::with_capacity(items.len());
                for item in &items {
                    match item {
                        Value::String(s) => directives.extend(parse_sort_string(s)?),
                        Value::Object(map) if map.len() == 1 => directives.extend(mongo_sort(map)?),
                        other => {
                            return Err(CriteriaError::HighlyIrregular(format!(
                                "`{other}` is not a sort directive"
                            )))
                        }
                    }
                }
                directives
            }
            Some(Value::Object(map)) => {
                if !self.compat.mongo_sort {
                    return Err(CriteriaError::HighlyIrregular(
                        "dictionary `sort` is no longer supported, use an array of directives".to_string(),
                    ));
                }
                warn!(model = %model.identity, "dictionary `sort` converted to directives");
                mongo_sort(&map)?
            }
            Some(other) => {
                return Err(CriteriaError::HighlyIrregular(format!(
                    "`{other}` is not a usable sort"
                )))
            }
        };

        if directives.is_empty() {
            return Ok(vec![SortDirective::asc(model.primary_key.clone())]);
        }

        let mut seen = HashSet::new();
        for directive in &directives {
            check_attribute(model, &directive.attr, "sort")?;
            if !seen.insert(directive.attr.as_str()) {
                return Err(CriteriaError::HighlyIrregular(format!(
                    "`{}` is sorted on more than once",
                    directive.attr
                )));
            }
        }
        Ok(directives)
    }
}

fn limit(n: &Normalizer<'_>, model: &ModelDef, raw: Option<&Value>) -> Result<u64, CriteriaError> {
    let value = match raw {
        None | Some(Value::Null) => return Ok(MAX_SAFE_INTEGER),
        Some(Value::String(s)) if s == "Infinity" => return Ok(MAX_SAFE_INTEGER),
        Some(Value::String(s)) => number_from_str(s).map(|v| integral(&v)).ok_or_else(|| {
            CriteriaError::HighlyIrregular(format!("`limit` must be a number, got `{s}`"))
        })?,
        Some(v @ Value::Number(_)) => integral(v),
        Some(other) => {
            return Err(CriteriaError::HighlyIrregular(format!(
                "`limit` must be a number, got `{other}`"
            )))
        }
    };

    if let Some(limit) = value.as_u64() {
        return match limit {
            0 => Err(CriteriaError::WouldMatchNothing("`limit` is 0".to_string())),
            l if l > MAX_SAFE_INTEGER => Err(CriteriaError::HighlyIrregular(format!(
                "`limit` {l} is not a safe integer"
            ))),
            l => Ok(l),
        };
    }
    if value.as_i64().is_some() {
        if !n.compat.negative_limit {
            return Err(CriteriaError::HighlyIrregular(format!("`limit` cannot be negative ({value})")));
        }
        warn!(model = %model.identity, limit = %value, "negative `limit` treated as no limit");
        return Ok(MAX_SAFE_INTEGER);
    }
    Err(CriteriaError::HighlyIrregular(format!("`limit` must be an integer, got `{value}`")))
}

fn skip(raw: Option<&Value>) -> Result<u64, CriteriaError> {
    let value = match raw {
        None | Some(Value::Null) => return Ok(0),
        Some(Value::String(s)) => number_from_str(s).map_or(Value::Null, |v| integral(&v)),
        Some(v) => integral(v),
    };
    value
        .as_u64()
        .filter(|s| *s <= MAX_SAFE_INTEGER)
        .ok_or_else(|| {
            CriteriaError::HighlyIrregular(format!("`skip` must be a non-negative integer, got `{value}`"))
        })
}

/// Whole-number floats (`5.0`) as integers; anything else unchanged.
fn integral(value: &Value) -> Value {
    match value.as_f64() {
        Some(f) if value.is_f64() && f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER as f64 => {
            Value::from(f as i64)
        }
        _ => value.clone(),
    }
}

/// Parse `"name"`, `"name DESC"` or a comma-separated list of those.
fn parse_sort_string(s: &str) -> Result<Vec<SortDirective>, CriteriaError> {
    let mut directives = Vec::new();
    for part in s.split(',') {
        let mut words = part.split_whitespace();
        let (attr, direction) = match (words.next(), words.next(), words.next()) {
            (Some(attr), None, None) => (attr, SortDirection::Asc),
            (Some(attr), Some(dir), None) => (
                attr,
                dir.parse::<SortDirection>()
                    .map_err(|e| CriteriaError::HighlyIrregular(e.to_string()))?,
            ),
            _ => {
                return Err(CriteriaError::HighlyIrregular(format!(
                    "`{s}` is not a sort directive"
                )))
            }
        };
        directives.push(SortDirective {
            attr: attr.to_string(),
            direction,
        });
    }
    Ok(directives)
}

/// `{ name: 1, age: -1 }` or `{ name: 'DESC' }`.
fn mongo_sort(map: &Map<String, Value>) -> Result<Vec<SortDirective>, CriteriaError> {
    map.iter()
        .map(|(attr, dir)| {
            let direction = match dir {
                Value::Number(n) if n.as_i64() == Some(1) => SortDirection::Asc,
                Value::Number(n) if n.as_i64() == Some(-1) => SortDirection::Desc,
                Value::String(s) => s
                    .parse::<SortDirection>()
                    .map_err(|e| CriteriaError::HighlyIrregular(e.to_string()))?,
                other => {
                    return Err(CriteriaError::HighlyIrregular(format!(
                        "`{other}` is not a sort direction for `{attr}`"
                    )))
                }
            };
            Ok(SortDirective {
                attr: attr.clone(),
                direction,
            })
        })
        .collect()
}

/// Attributes named in `sort`, `select` or `omit` must be stored on the model.
fn check_attribute(model: &ModelDef, attr: &str, clause: &str) -> Result<(), CriteriaError> {
    match model.get_attribute(attr) {
        Some(def) if def.is_plural() => Err(CriteriaError::HighlyIrregular(format!(
            "the plural association `{attr}` cannot be used in `{clause}`"
        ))),
        Some(_) => Ok(()),
        None if model.schema => Err(CriteriaError::HighlyIrregular(format!(
            "`{attr}` in `{clause}` is not an attribute of `{}`",
            model.identity
        ))),
        None => Ok(()),
    }
}

fn string_list(raw: &Value, clause: &str) -> Result<Vec<String>, CriteriaError> {
    let Value::Array(items) = raw else {
        return Err(CriteriaError::HighlyIrregular(format!(
            "`{clause}` must be an array of attribute names"
        )));
    };
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let Some(name) = item.as_str().filter(|s| !s.is_empty()) else {
            return Err(CriteriaError::HighlyIrregular(format!(
                "`{item}` in `{clause}` is not an attribute name"
            )));
        };
        if !out.iter().any(|seen| seen == name) {
            out.push(name.to_string());
        }
    }
    Ok(out)
}

fn select(model: &ModelDef, raw: Option<&Value>) -> Result<Vec<String>, CriteriaError> {
    let Some(raw) = raw.filter(|v| !v.is_null()) else {
        return Ok(vec![SELECT_ALL.to_string()]);
    };
    let mut names = string_list(raw, "select")?;
    if names.is_empty() {
        return Err(CriteriaError::HighlyIrregular("`select` cannot be empty".to_string()));
    }
    if names.iter().any(|n| n == SELECT_ALL) {
        if names.len() > 1 {
            return Err(CriteriaError::HighlyIrregular(
                "`*` cannot be combined with other names in `select`".to_string(),
            ));
        }
        return Ok(names);
    }
    for name in &names {
        check_attribute(model, name, "select")?;
    }
    if !names.contains(&model.primary_key) {
        names.insert(0, model.primary_key.clone());
    }
    Ok(names)
}

fn omit(model: &ModelDef, raw: Option<&Value>) -> Result<Vec<String>, CriteriaError> {
    let Some(raw) = raw.filter(|v| !v.is_null()) else {
        return Ok(Vec::new());
    };
    let names = string_list(raw, "omit")?;
    for name in &names {
        if name == &model.primary_key {
            return Err(CriteriaError::HighlyIrregular(format!(
                "the primary key `{name}` cannot be omitted"
            )));
        }
        check_attribute(model, name, "omit")?;
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::CompatOptions;
    use crate::ontology::{AttributeDef, Ontology};
    use ormweave_proto::{Filter, WhereClause};
    use serde_json::json;

    fn ontology() -> Ontology {
        Ontology::builder()
            .model(
                ModelDef::new("user", "id")
                    .with_attribute(AttributeDef::number("id"))
                    .with_attribute(AttributeDef::string("name"))
                    .with_attribute(AttributeDef::number("age"))
                    .with_attribute(AttributeDef::collection("pets", "pet").via("owner")),
            )
            .model(
                ModelDef::new("pet", "id")
                    .with_attribute(AttributeDef::number("id"))
                    .with_attribute(AttributeDef::model("owner", "user")),
            )
            .build()
            .unwrap()
    }

    fn normalize(raw: Value) -> Result<Criteria, CriteriaError> {
        let ontology = ontology();
        let user = ontology.get_model("user").unwrap().clone();
        Normalizer::new(&ontology).criteria(&user, &raw)
    }

    #[test]
    fn test_pk_shorthand() {
        let criteria = normalize(json!([1, 2, 3])).unwrap();
        assert_eq!(
            criteria.to_value(),
            json!({
                "where": { "id": { "in": [1, 2, 3] } },
                "limit": MAX_SAFE_INTEGER,
                "skip": 0,
                "sort": [{ "id": "ASC" }],
                "select": ["*"],
                "omit": []
            })
        );

        let criteria = normalize(json!({ "where": { "id": [1, 2, 3] } })).unwrap();
        assert_eq!(criteria.where_clause, WhereClause::Filter(Filter::is_in("id", vec![json!(1), json!(2), json!(3)])));

        assert_eq!(normalize(json!("7")).unwrap().where_clause, WhereClause::Filter(Filter::eq("id", 7)));
        assert!(matches!(normalize(json!(true)), Err(CriteriaError::HighlyIrregular(_))));
    }

    #[test]
    fn test_implicit_where() {
        let criteria = normalize(json!({ "name": "bob" })).unwrap();
        assert_eq!(criteria.where_clause, WhereClause::Filter(Filter::eq("name", "bob")));
    }

    #[test]
    fn test_limit_rules() {
        assert!(matches!(normalize(json!({ "limit": 0 })), Err(CriteriaError::WouldMatchNothing(_))));
        assert_eq!(normalize(json!({ "limit": "5" })).unwrap().limit, 5);
        assert_eq!(normalize(json!({ "limit": null })).unwrap().limit, MAX_SAFE_INTEGER);
        assert_eq!(normalize(json!({ "limit": "Infinity" })).unwrap().limit, MAX_SAFE_INTEGER);
        assert_eq!(normalize(json!({ "limit": -3 })).unwrap().limit, MAX_SAFE_INTEGER);
        assert!(normalize(json!({ "limit": 2.5 })).is_err());
        assert_eq!(normalize(json!({ "skip": "4" })).unwrap().skip, 4);
        assert!(normalize(json!({ "skip": -1 })).is_err());

        let ontology = ontology();
        let user = ontology.get_model("user").unwrap();
        let strict = Normalizer::new(&ontology).with_compat(CompatOptions::strict());
        assert!(matches!(
            strict.criteria(user, &json!({ "limit": -3 })),
            Err(CriteriaError::HighlyIrregular(_))
        ));
    }

    #[test]
    fn test_whole_number_floats_are_integers() {
        let criteria = normalize(json!({ "limit": 5.0, "skip": 2.0 })).unwrap();
        assert_eq!((criteria.limit, criteria.skip), (5, 2));
        assert_eq!(normalize(json!({ "limit": "7.0" })).unwrap().limit, 7);
        assert!(matches!(normalize(json!({ "limit": 0.0 })), Err(CriteriaError::WouldMatchNothing(_))));
        assert_eq!(normalize(json!({ "limit": -3.0 })).unwrap().limit, MAX_SAFE_INTEGER);
        assert!(normalize(json!({ "skip": 2.5 })).is_err());
        assert!(normalize(json!({ "skip": -2.0 })).is_err());
    }

    #[test]
    fn test_sort_forms() {
        assert_eq!(normalize(json!({ "sort": "name desc" })).unwrap().sort, vec![SortDirective::desc("name")]);
        assert_eq!(
            normalize(json!({ "sort": { "name": 1, "age": -1 } })).unwrap().sort,
            vec![SortDirective::asc("name"), SortDirective::desc("age")]
        );
        assert_eq!(
            normalize(json!({ "sort": [{ "age": "DESC" }, "name"] })).unwrap().sort,
            vec![SortDirective::desc("age"), SortDirective::asc("name")]
        );
        assert!(normalize(json!({ "sort": ["name", "name DESC"] })).is_err());
        assert!(normalize(json!({ "sort": "pets" })).is_err());
        assert!(normalize(json!({ "sort": "name sideways" })).is_err());
    }

    #[test]
    fn test_select_and_omit() {
        assert_eq!(normalize(json!({ "select": ["name"] })).unwrap().select, vec!["id", "name"]);
        assert!(normalize(json!({ "select": ["pets"] })).is_err());
        assert!(normalize(json!({ "select": ["*", "name"] })).is_err());
        assert!(normalize(json!({ "omit": ["id"] })).is_err());
        assert_eq!(normalize(json!({ "omit": ["age", "age"] })).unwrap().omit, vec!["age"]);
        assert!(normalize(json!({ "select": ["name"], "omit": ["age"] })).is_err());
    }

    #[test]
    fn test_deprecated_and_foreign_clauses() {
        for clause in ["sum", "average", "min", "max", "groupBy"] {
            let err = normalize(json!({ clause: "age", "where": {} })).unwrap_err();
            assert!(err.to_string().contains(clause));
        }
        assert!(normalize(json!({ "populate": ["pets"] })).is_err());
    }

    #[test]
    fn test_loose_keys_fold_into_where() {
        let criteria = normalize(json!({ "name": "bob", "limit": 2 })).unwrap();
        assert_eq!(criteria.where_clause, WhereClause::Filter(Filter::eq("name", "bob")));
        assert_eq!(criteria.limit, 2);

        let ontology = ontology();
        let user = ontology.get_model("user").unwrap();
        let strict = Normalizer::new(&ontology).with_compat(CompatOptions::strict());
        assert!(strict.criteria(user, &json!({ "name": "bob", "limit": 2 })).is_err());
    }

    #[test]
    fn test_idempotent() {
        let raw = json!({
            "where": { "or": [{ "name": { "contains": "o" } }, { "age": [1, 2] }] },
            "sort": "age DESC",
            "select": ["age"],
            "limit": "10",
            "skip": 2
        });
        let once = normalize(raw).unwrap();
        let twice = normalize(once.to_value()).unwrap();
        assert_eq!(once, twice);
    }
}
