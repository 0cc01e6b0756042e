//! Filter evaluation over records.
//!
//! This module provides the `FilterEvaluator` that evaluates normalized where
//! clauses against record dictionaries. It backs the in-memory adapter and the
//! integrator's re-application of subcriteria.

use std::cmp::Ordering;

use ormweave_proto::{Constraint, Filter, Modifier, Record, WhereClause};
use serde_json::Value;

static NULL: Value = Value::Null;

/// Evaluates where clauses against records.
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Evaluate a where clause against a record.
    ///
    /// Attributes missing from the record compare as `null`.
    pub fn evaluate(clause: &WhereClause, record: &Record) -> bool {
        match clause {
            WhereClause::All => true,
            WhereClause::And(items) => items.iter().all(|c| Self::evaluate(c, record)),
            WhereClause::Or(items) => items.iter().any(|c| Self::evaluate(c, record)),
            WhereClause::Filter(filter) => Self::evaluate_filter(filter, record),
        }
    }

    fn evaluate_filter(filter: &Filter, record: &Record) -> bool {
        let field = record.get(&filter.attr).unwrap_or(&NULL);
        match &filter.constraint {
            Constraint::Eq(value) => Self::values_equal(field, value),
            Constraint::Modifier(modifier) => match modifier {
                Modifier::In(values) => values.iter().any(|v| Self::values_equal(field, v)),
                Modifier::Nin(values) => !values.iter().any(|v| Self::values_equal(field, v)),
                Modifier::Ne(value) => !Self::values_equal(field, value),
                Modifier::Lt(value) => Self::compare_values(field, value).is_some_and(Ordering::is_lt),
                Modifier::Lte(value) => Self::compare_values(field, value).is_some_and(Ordering::is_le),
                Modifier::Gt(value) => Self::compare_values(field, value).is_some_and(Ordering::is_gt),
                Modifier::Gte(value) => Self::compare_values(field, value).is_some_and(Ordering::is_ge),
                Modifier::Like(pattern) => match field {
                    Value::String(s) => Self::like_match(s, pattern),
                    _ => false,
                },
            },
        }
    }

    /// Check if two values are equal. Numbers compare by value, so `1` equals
    /// `1.0`.
    pub fn values_equal(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => a == b,
            },
            _ => a == b,
        }
    }

    /// Compare two values, returning their ordering if comparable.
    pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
        match (a, b) {
            (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Match a string against a SQL LIKE pattern.
    ///
    /// Supports:
    /// - `%` matches zero or more characters
    /// - `_` matches exactly one character
    /// - `\` escapes the next character (`\%`, `\_`, `\\`)
    ///
    /// Runs in O(value x pattern): on a mismatch only the most recent `%` is
    /// retried, one character further along the value.
    pub fn like_match(value: &str, pattern: &str) -> bool {
        let value: Vec<char> = value.chars().collect();
        let pattern = like_tokens(pattern);

        let (mut v, mut p) = (0, 0);
        // Pattern position after the last `%`, and the value position it was tried at.
        let mut retry: Option<(usize, usize)> = None;
        while v < value.len() {
            match pattern.get(p) {
                Some(LikeToken::Many) => {
                    p += 1;
                    retry = Some((p, v));
                }
                Some(LikeToken::One) => {
                    v += 1;
                    p += 1;
                }
                Some(LikeToken::Char(c)) if *c == value[v] => {
                    v += 1;
                    p += 1;
                }
                _ => match retry {
                    Some((after, from)) => {
                        p = after;
                        v = from + 1;
                        retry = Some((after, v));
                    }
                    None => return false,
                },
            }
        }
        pattern[p..].iter().all(|t| *t == LikeToken::Many)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LikeToken {
    Char(char),
    One,
    Many,
}

fn like_tokens(pattern: &str) -> Vec<LikeToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => LikeToken::Many,
            '_' => LikeToken::One,
            // A trailing backslash is literal.
            '\\' => LikeToken::Char(chars.next().unwrap_or('\\')),
            c => LikeToken::Char(c),
        });
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormweave_proto::record;
    use serde_json::json;

    fn row() -> Record {
        record([
            ("id", json!(7)),
            ("name", json!("Alice")),
            ("score", json!(75.5)),
            ("active", json!(true)),
            ("nickname", Value::Null),
        ])
    }

    fn modifier(attr: &str, m: Modifier) -> WhereClause {
        WhereClause::filter(Filter::new(attr, Constraint::Modifier(m)))
    }

    #[test]
    fn test_eq_filter() {
        let row = row();
        assert!(FilterEvaluator::evaluate(&WhereClause::filter(Filter::eq("name", "Alice")), &row));
        assert!(!FilterEvaluator::evaluate(&WhereClause::filter(Filter::eq("name", "Bob")), &row));
        assert!(FilterEvaluator::evaluate(&WhereClause::filter(Filter::eq("id", 7.0)), &row));
    }

    #[test]
    fn test_missing_attribute_is_null() {
        let row = row();
        assert!(FilterEvaluator::evaluate(
            &WhereClause::filter(Filter::eq("missing", Value::Null)),
            &row
        ));
        assert!(FilterEvaluator::evaluate(
            &WhereClause::filter(Filter::eq("nickname", Value::Null)),
            &row
        ));
        assert!(!FilterEvaluator::evaluate(&modifier("missing", Modifier::Gt(json!(1))), &row));
    }

    #[test]
    fn test_comparison_filters() {
        let row = row();
        assert!(FilterEvaluator::evaluate(&modifier("score", Modifier::Gt(json!(70))), &row));
        assert!(FilterEvaluator::evaluate(&modifier("score", Modifier::Lte(json!(75.5))), &row));
        assert!(!FilterEvaluator::evaluate(&modifier("score", Modifier::Lt(json!(75))), &row));
        assert!(FilterEvaluator::evaluate(&modifier("name", Modifier::Gte(json!("Al"))), &row));
        // Incomparable types never match.
        assert!(!FilterEvaluator::evaluate(&modifier("name", Modifier::Gt(json!(1))), &row));
    }

    #[test]
    fn test_in_nin_ne() {
        let row = row();
        assert!(FilterEvaluator::evaluate(
            &modifier("id", Modifier::In(vec![json!(1), json!(7)])),
            &row
        ));
        assert!(!FilterEvaluator::evaluate(
            &modifier("id", Modifier::Nin(vec![json!(7)])),
            &row
        ));
        assert!(FilterEvaluator::evaluate(&modifier("id", Modifier::Ne(json!(8))), &row));
    }

    #[test]
    fn test_and_or() {
        let row = row();
        let clause = WhereClause::And(vec![
            WhereClause::filter(Filter::eq("active", true)),
            WhereClause::Or(vec![
                WhereClause::filter(Filter::eq("name", "Bob")),
                modifier("score", Modifier::Gt(json!(50))),
            ]),
        ]);
        assert!(FilterEvaluator::evaluate(&clause, &row));
        assert!(!FilterEvaluator::evaluate(&WhereClause::Or(vec![]), &row));
        assert!(FilterEvaluator::evaluate(&WhereClause::And(vec![]), &row));
    }

    #[test]
    fn test_like_match() {
        assert!(FilterEvaluator::like_match("hello", "hello"));
        assert!(FilterEvaluator::like_match("hello", "h%"));
        assert!(FilterEvaluator::like_match("hello", "%llo"));
        assert!(FilterEvaluator::like_match("hello", "%ell%"));
        assert!(FilterEvaluator::like_match("hello", "h_llo"));
        assert!(!FilterEvaluator::like_match("hello", "h_lo"));
        assert!(FilterEvaluator::like_match("", "%"));
        assert!(!FilterEvaluator::like_match("", "_"));
    }

    #[test]
    fn test_like_escapes() {
        assert!(FilterEvaluator::like_match("100%", "100\\%"));
        assert!(!FilterEvaluator::like_match("1000", "100\\%"));
        assert!(FilterEvaluator::like_match("50% off", "%\\%%"));
        assert!(FilterEvaluator::like_match("a_b", "a\\_b"));
        assert!(!FilterEvaluator::like_match("axb", "a\\_b"));
        assert!(FilterEvaluator::like_match("C:\\temp", "C:\\\\t%"));
        assert!(!FilterEvaluator::like_match("C:temp", "C:\\\\t%"));
        assert!(FilterEvaluator::like_match("trailing\\", "trailing\\"));
    }

    #[test]
    fn test_like_backtracks_to_latest_wildcard() {
        assert!(FilterEvaluator::like_match("abcabd", "%ab_"));
        assert!(FilterEvaluator::like_match("mississippi", "%iss%pi"));
        assert!(!FilterEvaluator::like_match("mississippi", "%iss%pix"));
        assert!(FilterEvaluator::like_match("aaa", "%%a%%"));
    }

    #[test]
    fn test_like_many_wildcards_finishes_quickly() {
        let value = "a".repeat(40);
        let pattern = format!("{}c", "%a".repeat(12));
        let started = std::time::Instant::now();
        assert!(!FilterEvaluator::like_match(&value, &pattern));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        assert!(FilterEvaluator::like_match(&format!("{value}c"), &pattern));
    }

    #[test]
    fn test_like_only_matches_strings() {
        let row = row();
        assert!(!FilterEvaluator::evaluate(&modifier("id", Modifier::Like("%".into())), &row));
        assert!(FilterEvaluator::evaluate(&modifier("name", Modifier::Like("A%".into())), &row));
    }
}
