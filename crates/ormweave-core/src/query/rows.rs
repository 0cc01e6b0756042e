//! Sorting, pagination and projection of record sets.

use std::cmp::Ordering;

use ormweave_proto::{Record, SortDirection, SortDirective, MAX_SAFE_INTEGER, SELECT_ALL};
use serde_json::Value;

/// Sort records by a list of directives. The sort is stable.
pub fn sort_records(records: &mut [Record], sort: &[SortDirective]) {
    if sort.is_empty() {
        return;
    }

    records.sort_by(|a, b| {
        for directive in sort {
            let cmp = compare_values_opt(a.get(&directive.attr), b.get(&directive.attr));
            let cmp = match directive.direction {
                SortDirection::Asc => cmp,
                SortDirection::Desc => cmp.reverse(),
            };
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        Ordering::Equal
    });
}

/// Compare two optional values for sorting. Missing values sort as `null`.
fn compare_values_opt(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    compare_values(a.unwrap_or(&Value::Null), b.unwrap_or(&Value::Null))
}

/// Total order used for sorting: nulls first, then booleans, numbers,
/// strings, and everything else by its JSON text.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (a, b) if rank(a) == rank(b) => a.to_string().cmp(&b.to_string()),
        (a, b) => rank(a).cmp(&rank(b)),
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Apply `skip` then `limit` to a record set.
pub fn paginate(records: &mut Vec<Record>, skip: u64, limit: u64) {
    let skip = usize::try_from(skip).unwrap_or(usize::MAX);
    if skip > 0 {
        if skip >= records.len() {
            records.clear();
            return;
        }
        records.drain(0..skip);
    }

    if limit < MAX_SAFE_INTEGER {
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        records.truncate(limit);
    }
}

/// Keep only the selected keys (in record order), then drop omitted ones.
pub fn project(record: &Record, select: &[String], omit: &[String]) -> Record {
    let select_all = select.is_empty() || select.iter().any(|s| s == SELECT_ALL);
    record
        .iter()
        .filter(|(key, _)| select_all || select.contains(key))
        .filter(|(key, _)| !omit.contains(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
