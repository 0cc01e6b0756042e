//! Record dictionaries.

use serde_json::{Map, Value};

/// A record: an ordered dictionary of attribute (or column) names to values.
pub type Record = Map<String, Value>;

/// Build a record from `(name, value)` pairs.
pub fn record<I, K>(pairs: I) -> Record
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Stable hash key for a primitive value.
///
/// `1` and `1.0` collapse to the same key so that numeric primary keys read
/// back from different backends still de-duplicate.
pub fn value_key(value: &Value) -> String {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 => {
                format!("n:{}", f as i64)
            }
            _ => format!("n:{n}"),
        },
        Value::String(s) => format!("s:{s}"),
        Value::Bool(b) => format!("b:{b}"),
        Value::Null => "null".to_string(),
        other => format!("j:{other}"),
    }
}
