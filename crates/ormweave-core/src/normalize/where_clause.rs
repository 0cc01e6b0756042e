//! Where-clause normalization.

use ormweave_proto::WhereClause;
use serde_json::{Map, Value};
use tracing::warn;

use super::error::{CriteriaError, FilterError};
use super::filter::FilterOutcome;
use super::Normalizer;
use crate::ontology::ModelDef;

/// Deepest `and`/`or` nesting accepted in a where clause.
pub const MAX_WHERE_DEPTH: usize = 25;

/// A normalized sub-tree, or a proof that it is trivially true or false.
enum Branch {
    Clause(WhereClause),
    Everything,
    Nothing,
}

#[derive(Clone, Copy, PartialEq)]
enum Junction {
    And,
    Or,
}

impl<'a> Normalizer<'a> {
    /// Normalize a raw `where` clause.
    ///
    /// Multi-key dictionaries are fractured into an `and` of single-key ones,
    /// trivially true branches are dropped and single-child predicates are
    /// collapsed. Fails with `WouldMatchNothing` when the whole clause
    /// provably matches no record.
    pub fn where_clause(&self, model: &ModelDef, raw: Option<&Value>) -> Result<WhereClause, CriteriaError> {
        let map = match raw {
            None => return Ok(WhereClause::All),
            Some(Value::Null) => {
                if !self.compat.null_criteria {
                    return Err(CriteriaError::HighlyIrregular(
                        "`where` cannot be null".to_string(),
                    ));
                }
                warn!(model = %model.identity, "null `where` clause treated as match-everything");
                return Ok(WhereClause::All);
            }
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(CriteriaError::HighlyIrregular(format!(
                    "`where` must be a dictionary, got `{other}`"
                )))
            }
        };

        match self.branch(model, map, 0)? {
            Branch::Clause(clause) => Ok(clause),
            Branch::Everything => Ok(WhereClause::All),
            Branch::Nothing => Err(CriteriaError::WouldMatchNothing(
                "the `where` clause can never match any record".to_string(),
            )),
        }
    }

    fn branch(&self, model: &ModelDef, map: &Map<String, Value>, depth: usize) -> Result<Branch, CriteriaError> {
        if depth > MAX_WHERE_DEPTH {
            return Err(CriteriaError::HighlyIrregular(format!(
                "`where` is nested deeper than {MAX_WHERE_DEPTH} levels"
            )));
        }

        if map.len() > 1 {
            let mut conjuncts = Vec::with_capacity(map.len());
            for (key, value) in map {
                conjuncts.push(self.single_key(model, key, value, depth)?);
            }
            return Ok(combine(Junction::And, conjuncts));
        }

        match map.iter().next() {
            None => Ok(Branch::Everything),
            Some((key, value)) => self.single_key(model, key, value, depth),
        }
    }

    fn single_key(&self, model: &ModelDef, key: &str, value: &Value, depth: usize) -> Result<Branch, CriteriaError> {
        let junction = match key {
            "and" => Junction::And,
            "or" => Junction::Or,
            attr => return self.leaf(model, attr, value),
        };

        let Value::Array(items) = value else {
            return Err(CriteriaError::HighlyIrregular(format!(
                "`{key}` must hold an array of clauses, got `{value}`"
            )));
        };

        let mut children = Vec::with_capacity(items.len());
        for item in items {
            let Value::Object(map) = item else {
                return Err(CriteriaError::HighlyIrregular(format!(
                    "every clause inside `{key}` must be a dictionary, got `{item}`"
                )));
            };
            children.push(self.branch(model, map, depth + 1)?);
        }
        Ok(combine(junction, children))
    }

    fn leaf(&self, model: &ModelDef, attr: &str, rhs: &Value) -> Result<Branch, CriteriaError> {
        // `{ age: { '>': 1, '<': 9 } }` is an implicit `and` of two filters.
        if let Value::Object(modifiers) = rhs {
            if modifiers.len() > 1 {
                let mut conjuncts = Vec::with_capacity(modifiers.len());
                for (name, operand) in modifiers {
                    let mut single = Map::new();
                    single.insert(name.clone(), operand.clone());
                    conjuncts.push(self.leaf(model, attr, &Value::Object(single))?);
                }
                return Ok(combine(Junction::And, conjuncts));
            }
        }

        match self.filter(model, attr, rhs) {
            Ok(FilterOutcome::Filter(filter)) => Ok(Branch::Clause(WhereClause::Filter(filter))),
            Ok(FilterOutcome::Everything) => Ok(Branch::Everything),
            Ok(FilterOutcome::Nothing) => Ok(Branch::Nothing),
            Err(FilterError::HighlyIrregular(msg)) => Err(CriteriaError::HighlyIrregular(msg)),
            Err(FilterError::FilterNotUsable(msg)) => Err(CriteriaError::FilterNotUsable(msg)),
            Err(FilterError::Consistency(msg)) => Err(CriteriaError::Consistency(msg)),
        }
    }
}

/// Fold normalized children under `and`/`or`, simplifying trivial branches.
///
/// An empty `and`/`or` matches everything; an `or` whose every branch
/// matches nothing matches nothing.
fn combine(junction: Junction, children: Vec<Branch>) -> Branch {
    let empty = children.is_empty();
    let mut clauses = Vec::with_capacity(children.len());
    for child in children {
        match (junction, child) {
            (_, Branch::Clause(clause)) => clauses.push(clause),
            (Junction::And, Branch::Everything) | (Junction::Or, Branch::Nothing) => {}
            (Junction::And, Branch::Nothing) => return Branch::Nothing,
            (Junction::Or, Branch::Everything) => return Branch::Everything,
        }
    }

    match clauses.len() {
        0 if junction == Junction::Or && !empty => Branch::Nothing,
        0 => Branch::Everything,
        1 => Branch::Clause(clauses.remove(0)),
        _ => Branch::Clause(match junction {
            Junction::And => WhereClause::And(clauses),
            Junction::Or => WhereClause::Or(clauses),
        }),
    }
}
