/*
 * AEVUMDB COMMUNITY LICENSE
 * Version 1.0, February 2026
 *
 * Copyright (c) 2026 Ananda Firmansyah.
 * Official Organization: AevumDB (https://github.com/aevumdb)
 *
 * This source code is licensed under the AevumDB Community License.
 * You may not use this file except in compliance with the License.
 * A copy of the License is located at the root of this repository.
 *
 * UNLESS REQUIRED BY APPLICABLE LAW OR AGREED TO IN WRITING, SOFTWARE
 * DISTRIBUTED UNDER THE LICENSE IS PROVIDED "AS IS", WITHOUT WARRANTY
 * OF ANY KIND, EITHER EXPRESS OR IMPLIED.
 */

//! # Projection Engine
//!
//! Implements the full three-mode projection grammar — inclusion,
//! exclusion, and computed/mixed — generalized from an inclusion-only walk
//! with an implicit `_id` carve-out, plus `$slice`, `$elemMatch`, and
//! `{$meta: "textScore"}`.

use crate::error::{AevumError, AevumResult};
use crate::expr::{self, Env};
use crate::value::{Document, Value};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    /// No explicit mode observed yet.
    Unknown,
    Inclusion,
    Exclusion,
}

/// Applies a projection spec to one document. `text_score`, when present, is
/// the score produced by a preceding `$text` match:
/// `{$meta: "textScore"}` requires it to be `Some`.
pub fn project(doc: &Value, spec: &Value, text_score: Option<f64>) -> AevumResult<Value> {
    let spec_doc = match spec {
        Value::Document(d) => d,
        _ => return Err(AevumError::bad_input("projection spec must be a document")),
    };
    let source = match doc {
        Value::Document(d) => d,
        _ => return Ok(doc.clone()),
    };

    if spec_doc.is_empty() {
        return Ok(doc.clone());
    }

    let mode = classify(spec_doc)?;

    match mode {
        Mode::Exclusion => project_exclusion(source, spec_doc),
        Mode::Inclusion | Mode::Unknown => project_inclusion_or_computed(source, spec_doc, text_score),
    }
}

/// `_id` is exempt from the inclusion/exclusion mixing rule:
/// `{_id: 0, name: 1}` is pure inclusion, `{_id: 1, name: 0}` is pure
/// exclusion. Any other field mixing `0`/`false` with `1`/`true`/computed
/// values is a user error.
fn classify(spec: &Document) -> AevumResult<Mode> {
    let mut mode = Mode::Unknown;
    for (key, val) in spec.iter() {
        if key == "_id" {
            continue;
        }
        let this = if is_exclude_value(val) {
            Mode::Exclusion
        } else {
            // Plain `1`/`true`, a numeric field spec, or a computed
            // expression/$slice/$elemMatch/$meta document all count as
            // inclusion for the purposes of the mixing rule.
            Mode::Inclusion
        };
        match (mode, this) {
            (Mode::Unknown, m) => mode = m,
            (Mode::Inclusion, Mode::Exclusion) | (Mode::Exclusion, Mode::Inclusion) => {
                return Err(AevumError::bad_input(
                    "Projection cannot have a mix of inclusion and exclusion",
                ));
            }
            _ => {}
        }
    }
    Ok(mode)
}

fn is_exclude_value(v: &Value) -> bool {
    matches!(v, Value::Int64(0) | Value::Bool(false))
        || matches!(v, Value::Double(d) if *d == 0.0)
}

/// A plain `1`/`true`/nonzero-number projection value: a direct copy of the
/// source field, as opposed to a `$slice`/`$elemMatch`/`$meta`/expression
/// value, which computes an added field.
fn is_simple_retain(v: &Value) -> bool {
    matches!(v, Value::Int64(_) | Value::Bool(_) | Value::Double(_))
}

fn project_exclusion(source: &Document, spec: &Document) -> AevumResult<Value> {
    let mut out = Document::new();
    for (k, v) in source.iter() {
        if let Some(spec_val) = spec.get(k) {
            if is_exclude_value(spec_val) {
                continue;
            }
        }
        out.insert(k.clone(), v.clone());
    }
    Ok(Value::Document(out))
}

fn project_inclusion_or_computed(
    source: &Document,
    spec: &Document,
    text_score: Option<f64>,
) -> AevumResult<Value> {
    let mut out = Document::new();

    // `_id` is implicit unless explicitly excluded.
    let id_excluded = matches!(spec.get("_id"), Some(v) if is_exclude_value(v));
    if !id_excluded {
        if let Some(id) = source.get("_id") {
            out.insert("_id", id.clone());
        }
    }

    // Retained (plain-inclusion) fields follow *source* document order, not
    // spec order; computed/added fields (expressions, `$slice`,
    // `$elemMatch`, `$meta`) are appended afterward in spec order. This
    // matches the reference: `{$project:{b:1,a:1}}` over `{_id,a,b}` yields
    // `{_id,a,b}`, not `{_id,b,a}`.
    for (key, _) in source.iter() {
        if key == "_id" {
            continue;
        }
        if let Some(spec_val) = spec.get(key) {
            if is_simple_retain(spec_val) {
                out.insert(key.clone(), source.get(key).unwrap().clone());
            }
        }
    }

    for (key, val) in spec.iter() {
        if key == "_id" || is_simple_retain(val) {
            continue;
        }
        match val {
            Value::Document(d) if d.len() == 1 && d.iter().next().unwrap().0 == "$slice" => {
                let sliced = apply_slice(source.get(key), d.iter().next().unwrap().1)?;
                out.insert(key.clone(), sliced);
            }
            Value::Document(d) if d.len() == 1 && d.iter().next().unwrap().0 == "$elemMatch" => {
                let filtered = apply_elem_match(source.get(key), d.iter().next().unwrap().1)?;
                out.insert(key.clone(), filtered);
            }
            Value::Document(d) if d.len() == 1 && d.iter().next().unwrap().0 == "$meta" => {
                let meta_name = d.iter().next().unwrap().1;
                if matches!(meta_name, Value::String(s) if s == "textScore") {
                    match text_score {
                        Some(score) => out.insert(key.clone(), Value::Double(score)),
                        None => {
                            return Err(AevumError::bad_input(
                                "$meta: \"textScore\" requires a prior $text match",
                            ))
                        }
                    };
                } else {
                    return Err(AevumError::bad_input("unsupported $meta projection"));
                }
            }
            other => {
                // Computed field: an aggregation expression evaluated
                // against the source document. `$$REMOVE` omits the key.
                let root = Value::Document(source.clone());
                let env = Env::new(root, 0);
                let compiled = expr::compile(other);
                let computed = expr::eval(&compiled, &env)?;
                if computed != Value::Missing {
                    out.insert(key.clone(), computed);
                }
            }
        }
    }
    Ok(Value::Document(out))
}

/// `$slice: n` keeps the first `n` (or last `|n|` for negative `n`)
/// elements; `$slice: [skip, limit]` is the two-argument form.
fn apply_slice(field: Option<&Value>, spec: &Value) -> AevumResult<Value> {
    let items = match field {
        Some(Value::Array(items)) => items.clone(),
        _ => return Ok(Value::Missing),
    };
    match spec {
        Value::Int64(n) => Ok(Value::Array(slice_n(&items, *n))),
        Value::Array(pair) if pair.len() == 2 => {
            let skip = as_i64(&pair[0]);
            let limit = as_i64(&pair[1]);
            let start = if skip < 0 {
                items.len().saturating_sub((-skip) as usize)
            } else {
                (skip as usize).min(items.len())
            };
            let end = (start + limit.max(0) as usize).min(items.len());
            Ok(Value::Array(items[start..end].to_vec()))
        }
        _ => Err(AevumError::bad_input("$slice requires a number or [skip, limit] pair")),
    }
}

fn slice_n(items: &[Value], n: i64) -> Vec<Value> {
    if n >= 0 {
        items.iter().take(n as usize).cloned().collect()
    } else {
        let take = (-n) as usize;
        let start = items.len().saturating_sub(take);
        items[start..].to_vec()
    }
}

fn as_i64(v: &Value) -> i64 {
    match v {
        Value::Int64(i) => *i,
        Value::Double(d) => *d as i64,
        _ => 0,
    }
}

/// `$elemMatch` projection keeps only the first array element matching the
/// sub-query, as opposed to `$elemMatch` in the match
/// language, which tests for existence of such an element.
fn apply_elem_match(field: Option<&Value>, query: &Value) -> AevumResult<Value> {
    let items = match field {
        Some(Value::Array(items)) => items,
        _ => return Ok(Value::Missing),
    };
    for item in items {
        if crate::match_engine::matches(item, query)? {
            return Ok(Value::Array(vec![item.clone()]));
        }
    }
    Ok(Value::Array(Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::from_json;

    fn p(doc: serde_json::Value, spec: serde_json::Value) -> Value {
        project(&from_json(&doc), &from_json(&spec), None).unwrap()
    }

    #[test]
    fn inclusion_keeps_id_implicitly() {
        let out = p(
            serde_json::json!({"_id": 1, "name": "a", "secret": "x"}),
            serde_json::json!({"name": 1}),
        );
        assert_eq!(out, from_json(&serde_json::json!({"_id": 1, "name": "a"})));
    }

    #[test]
    fn exclusion_drops_listed_fields_only() {
        let out = p(
            serde_json::json!({"_id": 1, "name": "a", "secret": "x"}),
            serde_json::json!({"secret": 0}),
        );
        assert_eq!(out, from_json(&serde_json::json!({"_id": 1, "name": "a"})));
    }

    #[test]
    fn mixing_inclusion_and_exclusion_errors() {
        let err = project(
            &from_json(&serde_json::json!({})),
            &from_json(&serde_json::json!({"a": 1, "b": 0})),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, AevumError::BadInput(_)));
    }

    #[test]
    fn id_exception_allows_id_exclusion_in_inclusion_mode() {
        let out = p(
            serde_json::json!({"_id": 1, "name": "a"}),
            serde_json::json!({"_id": 0, "name": 1}),
        );
        assert_eq!(out, from_json(&serde_json::json!({"name": "a"})));
    }

    #[test]
    fn computed_field_remove_sentinel_omits_key() {
        let out = p(
            serde_json::json!({"_id": 1, "a": 5}),
            serde_json::json!({"a": {"$cond": [{"$gt": ["$a", 0]}, "$$REMOVE", "$a"]}}),
        );
        assert_eq!(out, from_json(&serde_json::json!({"_id": 1})));
    }

    #[test]
    fn slice_negative_keeps_tail() {
        let out = p(
            serde_json::json!({"_id": 1, "items": [1, 2, 3, 4]}),
            serde_json::json!({"items": {"$slice": -2}}),
        );
        assert_eq!(
            out,
            from_json(&serde_json::json!({"_id": 1, "items": [3, 4]}))
        );
    }

    #[test]
    fn inclusion_retains_source_field_order_not_spec_order() {
        let out = p(
            serde_json::json!({"_id": 1, "a": "x", "b": "y"}),
            serde_json::json!({"b": 1, "a": 1}),
        );
        let Value::Document(d) = out else { panic!("expected document") };
        let keys: Vec<&String> = d.keys().collect();
        assert_eq!(keys, vec!["_id", "a", "b"]);
    }

    #[test]
    fn idempotence_applying_inclusion_twice_is_stable() {
        let doc = serde_json::json!({"_id": 1, "name": "a", "secret": "x"});
        let spec = serde_json::json!({"name": 1});
        let once = p(doc.clone(), spec.clone());
        let twice = project(&once, &from_json(&spec), None).unwrap();
        assert_eq!(once, twice);
    }
}
