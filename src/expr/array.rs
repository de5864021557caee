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

//! Array operator group.
//!
//! `$map`/`$filter`/`$reduce` bind `$$this` (and `$$value` for `$reduce`) in
//! a child [`Env`] frame — aliased via `as` when present — so nested
//! same-name bindings shadow the enclosing scope's variable.

use std::cmp::Ordering;

use super::{compile, eval as expr_eval, eval_array_args, eval_doc_args, Env, Expr, OpArgs};
use crate::error::{AevumError, AevumResult};
use crate::value::{self, Document, Value};

fn as_array<'a>(v: &'a Value, op: &str) -> AevumResult<&'a [Value]> {
    match v {
        Value::Array(items) => Ok(items),
        other => Err(AevumError::type_mismatch(format!(
            "{} must be an array, found: {}",
            op,
            value::type_name(other)
        ))),
    }
}

pub fn eval(name: &str, args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let vs = eval_array_args(args, env)?;
    match name {
        "size" => Ok(Value::Int64(as_array(&vs[0], "$size")?.len() as i64)),
        "isArray" => Ok(Value::Bool(matches!(vs[0], Value::Array(_)))),
        "first" => Ok(as_array(&vs[0], "$first")?
            .first()
            .cloned()
            .unwrap_or(Value::Missing)),
        "last" => Ok(as_array(&vs[0], "$last")?
            .last()
            .cloned()
            .unwrap_or(Value::Missing)),
        "reverseArray" => {
            if matches!(vs[0], Value::Null | Value::Missing) {
                return Ok(Value::Null);
            }
            let mut items = as_array(&vs[0], "$reverseArray")?.to_vec();
            items.reverse();
            Ok(Value::Array(items))
        }
        "arrayElemAt" => {
            let items = as_array(&vs[0], "$arrayElemAt")?;
            let idx = match &vs[1] {
                Value::Int64(i) => *i,
                Value::Double(d) => *d as i64,
                _ => return Err(AevumError::type_mismatch("$arrayElemAt requires a numeric index")),
            };
            let resolved = if idx < 0 {
                items.len() as i64 + idx
            } else {
                idx
            };
            if resolved < 0 || resolved as usize >= items.len() {
                Ok(Value::Missing)
            } else {
                Ok(items[resolved as usize].clone())
            }
        }
        "slice" => eval_slice(&vs),
        "concatArrays" => {
            if vs.iter().any(|v| matches!(v, Value::Null | Value::Missing)) {
                return Ok(Value::Null);
            }
            let mut out = Vec::new();
            for v in &vs {
                out.extend(as_array(v, "$concatArrays")?.iter().cloned());
            }
            Ok(Value::Array(out))
        }
        "in" => {
            let needle = &vs[0];
            let haystack = as_array(&vs[1], "$in")?;
            Ok(Value::Bool(
                haystack.iter().any(|v| value::equal_structural(v, needle)),
            ))
        }
        "indexOfArray" => {
            if matches!(vs[0], Value::Null | Value::Missing) {
                return Ok(Value::Null);
            }
            let items = as_array(&vs[0], "$indexOfArray")?;
            let needle = &vs[1];
            let start = vs.get(2).map(as_usize).unwrap_or(0);
            let end = vs.get(3).map(as_usize).unwrap_or(items.len());
            let end = end.min(items.len());
            let idx = items[start.min(end)..end]
                .iter()
                .position(|v| value::equal_structural(v, needle))
                .map(|i| (i + start) as i64)
                .unwrap_or(-1);
            Ok(Value::Int64(idx))
        }
        "range" => eval_range(&vs),
        "arrayToObject" => eval_array_to_object(&vs[0]),
        "objectToArray" => eval_object_to_array(&vs[0]),
        "zip" => eval_zip(&vs),
        "sortArray" => eval_sort_array(&vs),
        "setUnion" => eval_set_union(&vs),
        "setIntersection" => eval_set_intersection(&vs),
        "setDifference" => eval_set_difference(&vs),
        "setEquals" => eval_set_equals(&vs),
        "setIsSubset" => eval_set_is_subset(&vs),
        "allElementsTrue" => {
            let items = as_array(&vs[0], "$allElementsTrue")?;
            Ok(Value::Bool(items.iter().all(value::is_truthy)))
        }
        "anyElementTrue" => {
            let items = as_array(&vs[0], "$anyElementTrue")?;
            Ok(Value::Bool(items.iter().any(value::is_truthy)))
        }
        _ => unreachable!("array::eval called with {}", name),
    }
}

fn as_usize(v: &Value) -> usize {
    match v {
        Value::Int64(i) => (*i).max(0) as usize,
        Value::Double(d) => (*d).max(0.0) as usize,
        _ => 0,
    }
}

fn eval_slice(vs: &[Value]) -> AevumResult<Value> {
    let items = as_array(&vs[0], "$slice")?;
    let len = items.len() as i64;
    if vs.len() == 2 {
        let n = match vs[1] {
            Value::Int64(i) => i,
            Value::Double(d) => d as i64,
            _ => return Err(AevumError::type_mismatch("$slice requires a numeric count")),
        };
        return Ok(Value::Array(if n >= 0 {
            items.iter().take(n as usize).cloned().collect()
        } else {
            let skip = (len + n).max(0) as usize;
            items[skip..].to_vec()
        }));
    }
    let position = match vs[1] {
        Value::Int64(i) => i,
        Value::Double(d) => d as i64,
        _ => return Err(AevumError::type_mismatch("$slice requires a numeric position")),
    };
    let n = match vs[2] {
        Value::Int64(i) => i,
        Value::Double(d) => d as i64,
        _ => return Err(AevumError::type_mismatch("$slice requires a numeric count")),
    };
    let start = if position >= 0 {
        position.min(len)
    } else {
        (len + position).max(0)
    } as usize;
    if n >= 0 {
        let end = (start + n as usize).min(items.len());
        Ok(Value::Array(items[start..end].to_vec()))
    } else {
        // Negative n with an explicit position: take the last |n| elements
        // counting back from `start`.
        let end = start;
        let begin = end.saturating_sub((-n) as usize);
        Ok(Value::Array(items[begin..end].to_vec()))
    }
}

fn eval_range(vs: &[Value]) -> AevumResult<Value> {
    let start = match vs[0] {
        Value::Int64(i) => i,
        _ => return Err(AevumError::type_mismatch("$range requires integer bounds")),
    };
    let end = match vs[1] {
        Value::Int64(i) => i,
        _ => return Err(AevumError::type_mismatch("$range requires integer bounds")),
    };
    let step = vs
        .get(2)
        .map(|v| match v {
            Value::Int64(i) => *i,
            _ => 1,
        })
        .unwrap_or(1);
    if step == 0 {
        return Err(AevumError::bad_input("$range step must not be zero"));
    }
    let mut out = Vec::new();
    let mut cur = start;
    if step > 0 {
        while cur < end {
            out.push(Value::Int64(cur));
            cur += step;
        }
    } else {
        while cur > end {
            out.push(Value::Int64(cur));
            cur += step;
        }
    }
    Ok(Value::Array(out))
}

fn eval_array_to_object(v: &Value) -> AevumResult<Value> {
    let items = as_array(v, "$arrayToObject")?;
    let mut d = Document::new();
    for item in items {
        match item {
            Value::Array(pair) if pair.len() == 2 => {
                let key = match &pair[0] {
                    Value::String(s) => s.clone(),
                    other => {
                        return Err(AevumError::type_mismatch(format!(
                            "$arrayToObject requires string keys, found: {}",
                            value::type_name(other)
                        )))
                    }
                };
                d.insert(key, pair[1].clone());
            }
            Value::Document(kv) => {
                let key = match kv.get("k") {
                    Some(Value::String(s)) => s.clone(),
                    _ => {
                        return Err(AevumError::missing_required(
                            "$arrayToObject requires 'k' and 'v' fields",
                        ))
                    }
                };
                let val = kv.get("v").cloned().unwrap_or(Value::Missing);
                d.insert(key, val);
            }
            other => {
                return Err(AevumError::type_mismatch(format!(
                    "$arrayToObject requires [k,v] pairs or {{k,v}} documents, found: {}",
                    value::type_name(other)
                )))
            }
        }
    }
    Ok(Value::Document(d))
}

fn eval_object_to_array(v: &Value) -> AevumResult<Value> {
    let d = match v {
        Value::Document(d) => d,
        other => {
            return Err(AevumError::type_mismatch(format!(
                "$objectToArray requires a document argument, found: {}",
                value::type_name(other)
            )))
        }
    };
    let mut out = Vec::new();
    for (k, v) in d.iter() {
        let mut pair = Document::new();
        pair.insert("k", Value::String(k.clone()));
        pair.insert("v", v.clone());
        out.push(Value::Document(pair));
    }
    Ok(Value::Array(out))
}

fn eval_zip(vs: &[Value]) -> AevumResult<Value> {
    // Positional form: $zip: { inputs: [...], useLongestLength, defaults }.
    // We accept the array-of-arrays shorthand too, matched against the
    // evaluated array args (eval_array_args already flattened a single
    // argument; callers pass $zip's `inputs` pre-flattened via the doc path
    // in dispatch, so here vs[0] is always the inputs array).
    let inputs = as_array(&vs[0], "$zip")?;
    let mut arrays = Vec::new();
    for inp in inputs {
        arrays.push(as_array(inp, "$zip")?.to_vec());
    }
    let use_longest = vs.get(1).map(value::is_truthy).unwrap_or(false);
    let defaults = vs.get(2).and_then(|v| match v {
        Value::Array(d) => Some(d.clone()),
        _ => None,
    });
    let target_len = if use_longest {
        arrays.iter().map(|a| a.len()).max().unwrap_or(0)
    } else {
        arrays.iter().map(|a| a.len()).min().unwrap_or(0)
    };
    let mut out = Vec::with_capacity(target_len);
    for i in 0..target_len {
        let mut tuple = Vec::with_capacity(arrays.len());
        for (j, arr) in arrays.iter().enumerate() {
            let v = arr.get(i).cloned().unwrap_or_else(|| {
                defaults
                    .as_ref()
                    .and_then(|d| d.get(j).cloned())
                    .unwrap_or(Value::Null)
            });
            tuple.push(v);
        }
        out.push(Value::Array(tuple));
    }
    Ok(Value::Array(out))
}

fn eval_sort_array(vs: &[Value]) -> AevumResult<Value> {
    let mut items = as_array(&vs[0], "$sortArray")?.to_vec();
    let spec = &vs[1];
    match spec {
        Value::Int64(dir) => {
            items.sort_by(|a, b| {
                let c = value::compare(a, b);
                if *dir < 0 {
                    c.reverse()
                } else {
                    c
                }
            });
        }
        Value::Document(keys) => {
            items.sort_by(|a, b| {
                for (k, dir) in keys.iter() {
                    let av = value::path_get(a, k).into_scalar();
                    let bv = value::path_get(b, k).into_scalar();
                    let mut c = value::compare(&av, &bv);
                    if matches!(dir, Value::Int64(d) if *d < 0) {
                        c = c.reverse();
                    }
                    if c != Ordering::Equal {
                        return c;
                    }
                }
                Ordering::Equal
            });
        }
        _ => {
            return Err(AevumError::type_mismatch(
                "$sortArray requires a numeric direction or a key-direction document",
            ))
        }
    }
    Ok(Value::Array(items))
}

fn dedup_structural(items: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for v in items {
        if !out.iter().any(|o| value::equal_structural(o, &v)) {
            out.push(v);
        }
    }
    out
}

fn eval_set_union(vs: &[Value]) -> AevumResult<Value> {
    let mut all = Vec::new();
    for v in vs {
        all.extend(as_array(v, "$setUnion")?.iter().cloned());
    }
    Ok(Value::Array(dedup_structural(all)))
}

fn eval_set_intersection(vs: &[Value]) -> AevumResult<Value> {
    if vs.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    let mut result = dedup_structural(as_array(&vs[0], "$setIntersection")?.to_vec());
    for v in &vs[1..] {
        let other = as_array(v, "$setIntersection")?;
        result.retain(|item| other.iter().any(|o| value::equal_structural(o, item)));
    }
    Ok(Value::Array(result))
}

fn eval_set_difference(vs: &[Value]) -> AevumResult<Value> {
    let a = as_array(&vs[0], "$setDifference")?;
    let b = as_array(&vs[1], "$setDifference")?;
    let result: Vec<Value> = dedup_structural(a.to_vec())
        .into_iter()
        .filter(|item| !b.iter().any(|o| value::equal_structural(o, item)))
        .collect();
    Ok(Value::Array(result))
}

fn eval_set_equals(vs: &[Value]) -> AevumResult<Value> {
    if vs.len() < 2 {
        return Err(AevumError::bad_input(
            "$setEquals requires at least 2 arguments",
        ));
    }
    let first = dedup_structural(as_array(&vs[0], "$setEquals")?.to_vec());
    for v in &vs[1..] {
        let other = dedup_structural(as_array(v, "$setEquals")?.to_vec());
        if first.len() != other.len()
            || !first.iter().all(|i| other.iter().any(|o| value::equal_structural(o, i)))
        {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn eval_set_is_subset(vs: &[Value]) -> AevumResult<Value> {
    let a = as_array(&vs[0], "$setIsSubset")?;
    let b = as_array(&vs[1], "$setIsSubset")?;
    Ok(Value::Bool(
        a.iter().all(|item| b.iter().any(|o| value::equal_structural(o, item))),
    ))
}

/// Resolves the binding name for `$map`/`$filter`/`$reduce`'s `as` option,
/// defaulting to `this`.
fn binding_name(d: &Document) -> String {
    match d.get("as") {
        Some(Value::String(s)) => s.clone(),
        _ => "this".to_string(),
    }
}

pub fn eval_map(args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let d = eval_doc_args(args, env)?;
    let input = d.get("input").cloned().unwrap_or(Value::Missing);
    if matches!(input, Value::Null | Value::Missing) {
        return Ok(Value::Null);
    }
    let items = as_array(&input, "$map")?.to_vec();
    let bind = binding_name(&d);
    let in_expr_json = d.get("in").cloned().ok_or_else(|| {
        AevumError::missing_required("$map requires an 'in' expression")
    })?;
    let in_expr = compile(&in_expr_json);
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let child_env = env.with_var(&bind, item);
        out.push(expr_eval(&in_expr, &child_env)?);
    }
    Ok(Value::Array(out))
}

pub fn eval_filter(args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let d = eval_doc_args(args, env)?;
    let input = d.get("input").cloned().unwrap_or(Value::Missing);
    if matches!(input, Value::Null | Value::Missing) {
        return Ok(Value::Null);
    }
    let items = as_array(&input, "$filter")?.to_vec();
    let bind = binding_name(&d);
    let cond_json = d.get("cond").cloned().ok_or_else(|| {
        AevumError::missing_required("$filter requires a 'cond' expression")
    })?;
    let cond_expr = compile(&cond_json);
    let limit = match d.get("limit") {
        Some(v) if !matches!(v, Value::Null | Value::Missing) => {
            Some(as_usize(v))
        }
        _ => None,
    };
    let mut out = Vec::new();
    for item in items {
        let child_env = env.with_var(&bind, item.clone());
        if value::is_truthy(&expr_eval(&cond_expr, &child_env)?) {
            out.push(item);
            if let Some(l) = limit {
                if out.len() >= l {
                    break;
                }
            }
        }
    }
    Ok(Value::Array(out))
}

pub fn eval_reduce(args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let d = eval_doc_args(args, env)?;
    let input = d.get("input").cloned().unwrap_or(Value::Missing);
    if matches!(input, Value::Null | Value::Missing) {
        return Ok(Value::Null);
    }
    let items = as_array(&input, "$reduce")?.to_vec();
    let initial = d.get("initialValue").cloned().unwrap_or(Value::Missing);
    let in_expr_json = d.get("in").cloned().ok_or_else(|| {
        AevumError::missing_required("$reduce requires an 'in' expression")
    })?;
    let in_expr = compile(&in_expr_json);
    let mut acc = initial;
    for item in items {
        let child_env = env.with_var("this", item).with_var("value", acc.clone());
        acc = expr_eval(&in_expr, &child_env)?;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{compile, eval as expr_eval};
    use crate::json::from_json;

    fn run(json: serde_json::Value) -> Value {
        let env = Env::new(from_json(&serde_json::json!({})), 0);
        expr_eval(&compile(&from_json(&json)), &env).unwrap()
    }

    #[test]
    fn map_binds_this_and_respects_shadowing() {
        let v = run(serde_json::json!({
            "$map": {"input": [1, 2, 3], "in": {"$multiply": ["$$this", 2]}}
        }));
        assert_eq!(
            v,
            Value::Array(vec![Value::Int64(2), Value::Int64(4), Value::Int64(6)])
        );
    }

    #[test]
    fn reduce_accumulates_with_value_binding() {
        let v = run(serde_json::json!({
            "$reduce": {"input": [1,2,3,4], "initialValue": 0, "in": {"$add": ["$$value", "$$this"]}}
        }));
        assert_eq!(v, Value::Int64(10));
    }

    #[test]
    fn filter_respects_limit() {
        let v = run(serde_json::json!({
            "$filter": {"input": [1,2,3,4,5], "cond": {"$gt": ["$$this", 1]}, "limit": 2}
        }));
        assert_eq!(v, Value::Array(vec![Value::Int64(2), Value::Int64(3)]));
    }

    #[test]
    fn array_elem_at_negative_index_counts_from_end() {
        let v = run(serde_json::json!({"$arrayElemAt": [[1,2,3], -1]}));
        assert_eq!(v, Value::Int64(3));
    }

    #[test]
    fn set_equals_ignores_order_and_duplicates() {
        let v = run(serde_json::json!({"$setEquals": [[1,2,2,3], [3,1,2]]}));
        assert_eq!(v, Value::Bool(true));
    }
}
