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

//! # Update Engine
//!
//! Per-modifier dispatch over the update grammar — `$set`/`$unset`/
//! `$setOnInsert`/`$inc`/`$mul`/`$min`/`$max`/`$push`/`$pull`/`$addToSet`/
//! `$pop`/`$rename`/`$currentDate`/`$bit` — generalized from a blind
//! recursive merge, plus positional `$`, `$[]`, and `$[identifier]` path
//! resolution driven by the array filters and the positional index that
//! [`crate::match_engine::MatchOutcome`] records. Aggregation-pipeline-as-
//! update is out of scope.

use std::collections::HashMap;

use crate::error::{AevumError, AevumResult};
use crate::match_engine::{self, MatchOutcome};
use crate::value::{self, Document, Value};

/// Per-call context threaded through [`apply`]: the positional index
/// resolved by the matcher, the `arrayFilters` identifier bindings, whether
/// this application is synthesizing an upsert-insert document (gates
/// `$setOnInsert`), and the frozen wall-clock instant for `$currentDate`.
#[derive(Debug, Clone, Default)]
pub struct UpdateContext {
    positions: Document,
    array_filters: HashMap<String, Value>,
    pub upsert_insert: bool,
    pub now: i64,
}

impl UpdateContext {
    pub fn new(now: i64) -> Self {
        UpdateContext {
            positions: Document::new(),
            array_filters: HashMap::new(),
            upsert_insert: false,
            now,
        }
    }

    pub fn from_match(outcome: &MatchOutcome, now: i64) -> Self {
        UpdateContext {
            positions: outcome.positions.clone(),
            array_filters: HashMap::new(),
            upsert_insert: false,
            now,
        }
    }

    /// Parses `arrayFilters: [{"e.qty": {$gt: 5}}, ...]` into one merged
    /// query document per identifier.
    pub fn with_array_filters(mut self, filters: &[Value]) -> AevumResult<Self> {
        let mut grouped: HashMap<String, Vec<Value>> = HashMap::new();
        for f in filters {
            let d = match f {
                Value::Document(d) => d,
                _ => return Err(AevumError::bad_input("arrayFilters entries must be documents")),
            };
            for (key, val) in d.iter() {
                let ident = key.split('.').next().unwrap_or(key).to_string();
                let field = key
                    .strip_prefix(&ident)
                    .and_then(|rest| rest.strip_prefix('.'))
                    .unwrap_or("");
                let mut clause = Document::new();
                let clause_key = if field.is_empty() { ident.clone() } else { format!("{}.{}", ident, field) };
                clause.insert(clause_key, val.clone());
                grouped.entry(ident).or_default().push(Value::Document(clause));
            }
        }
        for (ident, clauses) in grouped {
            let combined = if clauses.len() == 1 {
                clauses.into_iter().next().unwrap()
            } else {
                let mut d = Document::new();
                d.insert("$and", Value::Array(clauses));
                Value::Document(d)
            };
            self.array_filters.insert(ident, combined);
        }
        Ok(self)
    }
}

/// Rewrites an `arrayFilters` clause (keyed by `ident` or `ident.field`)
/// into a plain match-engine filter keyed by `""` (element itself) or
/// `field` (element's field) so it can be run against one array element
/// via [`match_engine::matches`].
fn rewrite_array_filter(clause: &Value, ident: &str) -> Value {
    match clause {
        Value::Document(d) => {
            let mut out = Document::new();
            for (k, v) in d.iter() {
                if k == "$and" || k == "$or" || k == "$nor" {
                    if let Value::Array(items) = v {
                        let rewritten: Vec<Value> =
                            items.iter().map(|it| rewrite_array_filter(it, ident)).collect();
                        out.insert(k.clone(), Value::Array(rewritten));
                        continue;
                    }
                }
                let new_key = if k == ident {
                    String::new()
                } else if let Some(rest) = k.strip_prefix(&format!("{}.", ident)) {
                    rest.to_string()
                } else {
                    k.clone()
                };
                out.insert(new_key, v.clone());
            }
            Value::Document(out)
        }
        other => other.clone(),
    }
}

fn array_filter_matches(item: &Value, clause: &Value, ident: &str) -> AevumResult<bool> {
    let rewritten = rewrite_array_filter(clause, ident);
    // An empty-string top-level key means "match the element itself" —
    // synthesize a one-field wrapper document so `matches` can resolve it
    // via the ordinary field-path machinery (`path_get` on an empty path
    // returns the value itself, see `value::path_get`'s segment-splitting).
    match_engine::matches(item, &rewritten)
}

/// Expands a dotted update path containing positional tokens (`$`, `[]`,
/// `[identifier]`) into the concrete set of dotted paths it addresses
///.
fn resolve_paths(doc: &Value, path: &str, ctx: &UpdateContext) -> AevumResult<Vec<String>> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut prefixes: Vec<String> = vec![String::new()];

    for seg in segments {
        let mut next = Vec::new();
        for prefix in &prefixes {
            if seg == "$" {
                // The matcher records positions keyed by the literal query
                // field path (e.g. "items.qty"), which may run deeper than
                // the array prefix the update path has reached (e.g.
                // "items"): take the first recorded position whose key
                // starts at this prefix.
                let found = ctx.positions.iter().find(|(k, _)| {
                    k.as_str() == prefix.as_str() || k.starts_with(&format!("{}.", prefix))
                });
                match found {
                    Some((_, Value::Int64(i))) => next.push(join(prefix, &i.to_string())),
                    _ => {
                        return Err(AevumError::InvalidPositionalOperator(format!(
                            "The positional operator did not find the match needed from the query in path '{}'",
                            path
                        )))
                    }
                }
            } else if seg == "[]" {
                let len = array_len_at(doc, prefix);
                for i in 0..len {
                    next.push(join(prefix, &i.to_string()));
                }
            } else if seg.starts_with('[') && seg.ends_with(']') && seg.len() > 2 {
                let ident = &seg[1..seg.len() - 1];
                let clause = ctx.array_filters.get(ident).ok_or_else(|| {
                    AevumError::InvalidPositionalOperator(format!(
                        "No array filter found for identifier '{}' in path '{}'",
                        ident, path
                    ))
                })?;
                let items = array_at(doc, prefix);
                for (i, item) in items.iter().enumerate() {
                    if array_filter_matches(item, clause, ident)? {
                        next.push(join(prefix, &i.to_string()));
                    }
                }
            } else {
                next.push(join(prefix, seg));
            }
        }
        prefixes = next;
    }
    Ok(prefixes)
}

fn join(prefix: &str, seg: &str) -> String {
    if prefix.is_empty() {
        seg.to_string()
    } else {
        format!("{}.{}", prefix, seg)
    }
}

fn array_at(doc: &Value, path: &str) -> Vec<Value> {
    match value::path_get(doc, path).into_scalar() {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

fn array_len_at(doc: &Value, path: &str) -> usize {
    array_at(doc, path).len()
}

/// Applies a full update document to `doc`, returning the new document and
/// whether it structurally differs from the input. On error the caller
/// must discard the working copy — this function simply never returns one.
pub fn apply(doc: &Value, update: &Value, ctx: &UpdateContext) -> AevumResult<(Value, bool)> {
    let update_doc = match update {
        Value::Document(d) => d,
        _ => return Err(AevumError::bad_input("update document must be an object")),
    };

    let is_modifier_doc = update_doc
        .iter()
        .next()
        .map(|(k, _)| k.starts_with('$'))
        .unwrap_or(true);
    let all_modifiers = update_doc.iter().all(|(k, _)| k.starts_with('$'));
    let none_modifiers = update_doc.iter().all(|(k, _)| !k.starts_with('$'));
    if !all_modifiers && !none_modifiers {
        return Err(AevumError::bad_input(
            "update document cannot mix modifier operators ($set, ...) with plain field replacement",
        ));
    }

    let result = if is_modifier_doc {
        let mut working = doc.clone();
        for (name, spec) in update_doc.iter() {
            working = apply_modifier(&working, name, spec, ctx)?;
        }
        working
    } else {
        apply_replacement(doc, update_doc)?
    };

    let changed = !value::equal_structural(doc, &result);
    Ok((result, changed))
}

fn apply_replacement(doc: &Value, replacement: &Document) -> AevumResult<Value> {
    let mut out = replacement.clone();
    if let Value::Document(orig) = doc {
        match (orig.get("_id"), out.get("_id")) {
            (Some(old_id), Some(new_id)) if !value::equal_structural(old_id, new_id) => {
                return Err(AevumError::bad_input(
                    "After applying the update, the (immutable) field '_id' was found to have been altered",
                ));
            }
            (Some(old_id), None) => {
                out.insert("_id", old_id.clone());
            }
            _ => {}
        }
    }
    Ok(Value::Document(out))
}

fn apply_modifier(doc: &Value, name: &str, spec: &Value, ctx: &UpdateContext) -> AevumResult<Value> {
    let fields = match spec {
        Value::Document(d) => d,
        _ => return Err(AevumError::bad_input(format!("{} requires a document argument", name))),
    };
    match name {
        "$set" => apply_set(doc, fields, ctx),
        "$setOnInsert" => {
            if ctx.upsert_insert {
                apply_set(doc, fields, ctx)
            } else {
                Ok(doc.clone())
            }
        }
        "$unset" => apply_unset(doc, fields, ctx),
        "$inc" => apply_arith(doc, fields, ctx, ArithOp::Inc),
        "$mul" => apply_arith(doc, fields, ctx, ArithOp::Mul),
        "$min" => apply_minmax(doc, fields, ctx, true),
        "$max" => apply_minmax(doc, fields, ctx, false),
        "$rename" => apply_rename(doc, fields),
        "$currentDate" => apply_current_date(doc, fields, ctx),
        "$push" => apply_push(doc, fields, ctx),
        "$pull" => apply_pull(doc, fields, ctx),
        "$addToSet" => apply_add_to_set(doc, fields, ctx),
        "$pop" => apply_pop(doc, fields, ctx),
        "$bit" => apply_bit(doc, fields, ctx),
        other => Err(AevumError::UnknownOperator(other.to_string())),
    }
}

fn apply_set(doc: &Value, fields: &Document, ctx: &UpdateContext) -> AevumResult<Value> {
    let mut working = doc.clone();
    for (path, val) in fields.iter() {
        for concrete in resolve_paths(&working, path, ctx)? {
            working = value::path_set(&working, &concrete, val.clone(), true)?;
        }
    }
    Ok(working)
}

fn apply_unset(doc: &Value, fields: &Document, ctx: &UpdateContext) -> AevumResult<Value> {
    let mut working = doc.clone();
    for (path, _) in fields.iter() {
        for concrete in resolve_paths(&working, path, ctx)? {
            working = value::path_unset(&working, &concrete);
        }
    }
    Ok(working)
}

enum ArithOp {
    Inc,
    Mul,
}

fn apply_arith(doc: &Value, fields: &Document, ctx: &UpdateContext, op: ArithOp) -> AevumResult<Value> {
    let mut working = doc.clone();
    for (path, operand) in fields.iter() {
        let delta = as_number(operand, "$inc/$mul")?;
        for concrete in resolve_paths(&working, path, ctx)? {
            let current = value::path_get(&working, &concrete).into_scalar();
            let new_val = match current {
                Value::Missing => match op {
                    ArithOp::Inc => operand.clone(),
                    ArithOp::Mul => Value::Int64(0),
                },
                Value::Int64(i) => combine(i as f64, delta, &op, matches!(operand, Value::Int64(_))),
                Value::Double(d) => combine(d, delta, &op, false),
                other => {
                    return Err(AevumError::type_mismatch(format!(
                        "Cannot apply $inc/$mul to a value of non-numeric type, found {}",
                        value::type_name(&other)
                    )))
                }
            };
            working = value::path_set(&working, &concrete, new_val, true)?;
        }
    }
    Ok(working)
}

fn combine(cur: f64, delta: f64, op: &ArithOp, keep_int: bool) -> Value {
    let result = match op {
        ArithOp::Inc => cur + delta,
        ArithOp::Mul => cur * delta,
    };
    if keep_int && result.fract() == 0.0 && result.abs() < i64::MAX as f64 {
        Value::Int64(result as i64)
    } else {
        Value::Double(result)
    }
}

fn as_number(v: &Value, op: &str) -> AevumResult<f64> {
    match v {
        Value::Int64(i) => Ok(*i as f64),
        Value::Double(d) => Ok(*d),
        other => Err(AevumError::type_mismatch(format!(
            "{} requires a numeric operand, found {}",
            op,
            value::type_name(other)
        ))),
    }
}

fn apply_minmax(doc: &Value, fields: &Document, ctx: &UpdateContext, is_min: bool) -> AevumResult<Value> {
    let mut working = doc.clone();
    for (path, candidate) in fields.iter() {
        for concrete in resolve_paths(&working, path, ctx)? {
            let current = value::path_get(&working, &concrete).into_scalar();
            let should_set = match current {
                Value::Missing => true,
                _ => {
                    let ord = value::compare(candidate, &current);
                    if is_min {
                        ord == std::cmp::Ordering::Less
                    } else {
                        ord == std::cmp::Ordering::Greater
                    }
                }
            };
            if should_set {
                working = value::path_set(&working, &concrete, candidate.clone(), true)?;
            }
        }
    }
    Ok(working)
}

fn apply_rename(doc: &Value, fields: &Document) -> AevumResult<Value> {
    let mut working = doc.clone();
    for (src, dst) in fields.iter() {
        let dst_path = match dst {
            Value::String(s) => s,
            _ => return Err(AevumError::bad_input("$rename target must be a string path")),
        };
        if src == dst_path {
            return Err(AevumError::bad_input(
                "$rename source and destination must differ",
            ));
        }
        let current = value::path_get(&working, src);
        if current.is_missing() {
            continue;
        }
        let v = current.into_scalar();
        working = value::path_unset(&working, src);
        working = value::path_set(&working, dst_path, v, true)?;
    }
    Ok(working)
}

fn apply_current_date(doc: &Value, fields: &Document, ctx: &UpdateContext) -> AevumResult<Value> {
    let mut working = doc.clone();
    for (path, spec) in fields.iter() {
        // `false` is treated identically to `true` — a documented quirk of
        // the reference server preserved here.
        let requested = match spec {
            Value::Bool(_) => true,
            Value::Document(d) => matches!(d.get("$type"), Some(Value::String(t)) if t == "date" || t == "timestamp"),
            _ => false,
        };
        if !requested {
            return Err(AevumError::bad_input(
                "$currentDate requires true, false, or {$type: \"date\"|\"timestamp\"}",
            ));
        }
        for concrete in resolve_paths(&working, path, ctx)? {
            working = value::path_set(&working, &concrete, Value::Date(ctx.now), true)?;
        }
    }
    Ok(working)
}

fn apply_bit(doc: &Value, fields: &Document, ctx: &UpdateContext) -> AevumResult<Value> {
    let mut working = doc.clone();
    for (path, spec) in fields.iter() {
        let ops = match spec {
            Value::Document(d) => d,
            _ => return Err(AevumError::bad_input("$bit requires {and|or|xor: <int>}")),
        };
        for concrete in resolve_paths(&working, path, ctx)? {
            let current = as_i64_strict(&value::path_get(&working, &concrete).into_scalar())?;
            let mut result = current;
            for (op, operand) in ops.iter() {
                let mask = as_i64_strict(operand)?;
                result = match op.as_str() {
                    "and" => result & mask,
                    "or" => result | mask,
                    "xor" => result ^ mask,
                    other => return Err(AevumError::UnknownOperator(format!("$bit.{}", other))),
                };
            }
            working = value::path_set(&working, &concrete, Value::Int64(result), true)?;
        }
    }
    Ok(working)
}

fn as_i64_strict(v: &Value) -> AevumResult<i64> {
    match v {
        Value::Missing | Value::Null => Ok(0),
        Value::Int64(i) => Ok(*i),
        Value::Double(d) if d.fract() == 0.0 => Ok(*d as i64),
        other => Err(AevumError::type_mismatch(format!(
            "$bit requires an integer operand, found {}",
            value::type_name(other)
        ))),
    }
}

#[derive(Debug, Clone, Default)]
struct PushOptions {
    each: Vec<Value>,
    position: Option<i64>,
    slice: Option<i64>,
    sort: Option<Value>,
}

fn parse_push_spec(spec: &Value) -> PushOptions {
    if let Value::Document(d) = spec {
        if d.contains_key("$each") {
            let each = match d.get("$each") {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            };
            return PushOptions {
                each,
                position: d.get("$position").map(as_i64_lenient),
                slice: d.get("$slice").map(as_i64_lenient),
                sort: d.get("$sort").cloned(),
            };
        }
    }
    PushOptions {
        each: vec![spec.clone()],
        position: None,
        slice: None,
        sort: None,
    }
}

fn as_i64_lenient(v: &Value) -> i64 {
    match v {
        Value::Int64(i) => *i,
        Value::Double(d) => *d as i64,
        _ => 0,
    }
}

fn apply_push(doc: &Value, fields: &Document, ctx: &UpdateContext) -> AevumResult<Value> {
    let mut working = doc.clone();
    for (path, spec) in fields.iter() {
        let opts = parse_push_spec(spec);
        for concrete in resolve_paths(&working, path, ctx)? {
            let mut items = match value::path_get(&working, &concrete).into_scalar() {
                Value::Array(items) => items,
                Value::Missing => Vec::new(),
                other => {
                    return Err(AevumError::type_mismatch(format!(
                        "$push requires an array, found {}",
                        value::type_name(&other)
                    )))
                }
            };

            let pos = match opts.position {
                None => items.len(),
                Some(p) if p >= 0 => (p as usize).min(items.len()),
                Some(p) => items.len().saturating_sub((-p) as usize),
            };
            for (i, v) in opts.each.iter().enumerate() {
                items.insert((pos + i).min(items.len()), v.clone());
            }

            if let Some(sort_spec) = &opts.sort {
                sort_array(&mut items, sort_spec)?;
            }

            if let Some(n) = opts.slice {
                items = apply_array_slice(items, n);
            }

            working = value::path_set(&working, &concrete, Value::Array(items), true)?;
        }
    }
    Ok(working)
}

fn apply_array_slice(items: Vec<Value>, n: i64) -> Vec<Value> {
    if n >= 0 {
        items.into_iter().take(n as usize).collect()
    } else {
        let take = (-n) as usize;
        let start = items.len().saturating_sub(take);
        items[start..].to_vec()
    }
}

fn sort_array(items: &mut [Value], sort_spec: &Value) -> AevumResult<()> {
    match sort_spec {
        Value::Int64(dir) => {
            let ascending = *dir >= 0;
            items.sort_by(|a, b| {
                let ord = value::compare(a, b);
                if ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        Value::Document(keys) => {
            let key_list: Vec<(String, bool)> = keys
                .iter()
                .map(|(k, v)| (k.clone(), as_i64_lenient(v) >= 0))
                .collect();
            items.sort_by(|a, b| {
                for (k, ascending) in &key_list {
                    let va = value::path_get(a, k).into_scalar();
                    let vb = value::path_get(b, k).into_scalar();
                    let ord = value::compare(&va, &vb);
                    let ord = if *ascending { ord } else { ord.reverse() };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }
        _ => {
            return Err(AevumError::bad_input(
                "$sort modifier requires a direction or a document of sort keys",
            ))
        }
    }
    Ok(())
}

fn apply_add_to_set(doc: &Value, fields: &Document, ctx: &UpdateContext) -> AevumResult<Value> {
    let mut working = doc.clone();
    for (path, spec) in fields.iter() {
        let to_add = match spec {
            Value::Document(d) if d.contains_key("$each") => match d.get("$each") {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            },
            other => vec![other.clone()],
        };
        for concrete in resolve_paths(&working, path, ctx)? {
            let mut items = match value::path_get(&working, &concrete).into_scalar() {
                Value::Array(items) => items,
                Value::Missing => Vec::new(),
                other => {
                    return Err(AevumError::type_mismatch(format!(
                        "$addToSet requires an array, found {}",
                        value::type_name(&other)
                    )))
                }
            };
            for v in &to_add {
                if !items.iter().any(|it| value::equal_structural(it, v)) {
                    items.push(v.clone());
                }
            }
            working = value::path_set(&working, &concrete, Value::Array(items), true)?;
        }
    }
    Ok(working)
}

fn apply_pop(doc: &Value, fields: &Document, ctx: &UpdateContext) -> AevumResult<Value> {
    let mut working = doc.clone();
    for (path, spec) in fields.iter() {
        let from_last = as_i64_lenient(spec) >= 0;
        for concrete in resolve_paths(&working, path, ctx)? {
            let mut items = match value::path_get(&working, &concrete).into_scalar() {
                Value::Array(items) => items,
                _ => continue,
            };
            if items.is_empty() {
                continue;
            }
            if from_last {
                items.pop();
            } else {
                items.remove(0);
            }
            working = value::path_set(&working, &concrete, Value::Array(items), true)?;
        }
    }
    Ok(working)
}

fn pull_matches(item: &Value, predicate: &Value) -> AevumResult<bool> {
    match predicate {
        Value::Document(d) if is_operator_doc(d) => scalar_operator_matches(item, d),
        Value::Document(d) => match item {
            Value::Document(_) => match_engine::matches(item, &Value::Document(d.clone())),
            _ => Ok(false),
        },
        other => Ok(value::equal_structural(item, other)),
    }
}

fn is_operator_doc(d: &Document) -> bool {
    d.iter().next().map(|(k, _)| k.starts_with('$')).unwrap_or(false)
}

fn scalar_operator_matches(item: &Value, ops: &Document) -> AevumResult<bool> {
    for (op, arg) in ops.iter() {
        let ok = match op.as_str() {
            "$eq" => value::equal_structural(item, arg),
            "$ne" => !value::equal_structural(item, arg),
            "$gt" => value::compare(item, arg) == std::cmp::Ordering::Greater,
            "$gte" => value::compare(item, arg) != std::cmp::Ordering::Less,
            "$lt" => value::compare(item, arg) == std::cmp::Ordering::Less,
            "$lte" => value::compare(item, arg) != std::cmp::Ordering::Greater,
            "$in" => match arg {
                Value::Array(items) => items.iter().any(|v| value::equal_structural(item, v)),
                _ => false,
            },
            "$nin" => match arg {
                Value::Array(items) => !items.iter().any(|v| value::equal_structural(item, v)),
                _ => false,
            },
            other => return Err(AevumError::UnknownOperator(other.to_string())),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn apply_pull(doc: &Value, fields: &Document, ctx: &UpdateContext) -> AevumResult<Value> {
    let mut working = doc.clone();
    for (path, predicate) in fields.iter() {
        for concrete in resolve_paths(&working, path, ctx)? {
            let items = match value::path_get(&working, &concrete).into_scalar() {
                Value::Array(items) => items,
                _ => continue,
            };
            let mut kept = Vec::with_capacity(items.len());
            for item in items {
                if !pull_matches(&item, predicate)? {
                    kept.push(item);
                }
            }
            working = value::path_set(&working, &concrete, Value::Array(kept), true)?;
        }
    }
    Ok(working)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::from_json;
    use crate::match_engine::matches_positional;

    fn doc(j: serde_json::Value) -> Value {
        from_json(&j)
    }

    #[test]
    fn set_creates_and_overwrites_fields() {
        let (out, changed) = apply(
            &doc(serde_json::json!({"a": 1})),
            &doc(serde_json::json!({"$set": {"a": 2, "b": 3}})),
            &UpdateContext::new(0),
        )
        .unwrap();
        assert!(changed);
        assert_eq!(out, doc(serde_json::json!({"a": 2, "b": 3})));
    }

    #[test]
    fn inc_initializes_missing_field_to_operand() {
        let (out, _) = apply(
            &doc(serde_json::json!({})),
            &doc(serde_json::json!({"$inc": {"count": 5}})),
            &UpdateContext::new(0),
        )
        .unwrap();
        assert_eq!(out, doc(serde_json::json!({"count": 5})));
    }

    #[test]
    fn mul_initializes_missing_field_to_zero() {
        let (out, _) = apply(
            &doc(serde_json::json!({})),
            &doc(serde_json::json!({"$mul": {"count": 5}})),
            &UpdateContext::new(0),
        )
        .unwrap();
        assert_eq!(out, doc(serde_json::json!({"count": 0})));
    }

    #[test]
    fn rename_same_source_and_destination_errors() {
        let err = apply(
            &doc(serde_json::json!({"a": 1})),
            &doc(serde_json::json!({"$rename": {"a": "a"}})),
            &UpdateContext::new(0),
        )
        .unwrap_err();
        assert!(matches!(err, AevumError::BadInput(_)));
    }

    #[test]
    fn atomicity_error_leaves_original_untouched() {
        let original = doc(serde_json::json!({"a": "not a number"}));
        let err = apply(
            &original,
            &doc(serde_json::json!({"$inc": {"a": 1}})),
            &UpdateContext::new(0),
        )
        .unwrap_err();
        assert!(matches!(err, AevumError::TypeMismatch(_)));
    }

    #[test]
    fn push_with_each_position_slice_and_sort() {
        let (out, _) = apply(
            &doc(serde_json::json!({"scores": [3, 1]})),
            &doc(serde_json::json!({
                "$push": {
                    "scores": {"$each": [5, 2], "$sort": -1, "$slice": 3}
                }
            })),
            &UpdateContext::new(0),
        )
        .unwrap();
        assert_eq!(out, doc(serde_json::json!({"scores": [5, 3, 2]})));
    }

    #[test]
    fn positional_array_filters_mark_matching_indices_only() {
        let original = doc(serde_json::json!({
            "items": [
                {"name": "a", "qty": 10, "status": "active"},
                {"name": "b", "qty": 5, "status": "deleted"},
                {"name": "c", "qty": 15, "status": "active"},
                {"name": "d", "qty": 3, "status": "active"}
            ]
        }));
        let ctx = UpdateContext::new(0)
            .with_array_filters(&[doc(serde_json::json!({
                "e.qty": {"$gt": 5},
                "e.status": {"$ne": "deleted"}
            }))])
            .unwrap();
        let (out, _) = apply(
            &original,
            &doc(serde_json::json!({"$set": {"items.$[e].marked": true}})),
            &ctx,
        )
        .unwrap();
        let Value::Document(d) = &out else { panic!() };
        let Value::Array(items) = d.get("items").unwrap() else { panic!() };
        let marked: Vec<bool> = items
            .iter()
            .map(|it| matches!(it, Value::Document(d) if d.get("marked") == Some(&Value::Bool(true))))
            .collect();
        assert_eq!(marked, vec![true, false, true, false]);
    }

    #[test]
    fn bare_positional_operator_resolves_first_matched_index() {
        let original = doc(serde_json::json!({"items": [{"qty": 1}, {"qty": 10}]}));
        let outcome =
            matches_positional(&original, &doc(serde_json::json!({"items.qty": {"$gt": 5}}))).unwrap();
        let ctx = UpdateContext::from_match(&outcome, 0);
        let (out, _) = apply(
            &original,
            &doc(serde_json::json!({"$set": {"items.$.touched": true}})),
            &ctx,
        )
        .unwrap();
        assert_eq!(
            out,
            doc(serde_json::json!({"items": [{"qty": 1}, {"qty": 10, "touched": true}]}))
        );
    }

    #[test]
    fn replace_document_preserves_immutable_id() {
        let (out, _) = apply(
            &doc(serde_json::json!({"_id": 7, "a": 1})),
            &doc(serde_json::json!({"a": 2, "b": 3})),
            &UpdateContext::new(0),
        )
        .unwrap();
        assert_eq!(out, doc(serde_json::json!({"a": 2, "b": 3, "_id": 7})));
    }

    #[test]
    fn pull_removes_matching_subdocuments() {
        let (out, _) = apply(
            &doc(serde_json::json!({"items": [{"qty": 1}, {"qty": 10}]})),
            &doc(serde_json::json!({"$pull": {"items": {"qty": {"$gt": 5}}}})),
            &UpdateContext::new(0),
        )
        .unwrap();
        assert_eq!(out, doc(serde_json::json!({"items": [{"qty": 1}]})));
    }
}
