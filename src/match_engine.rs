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

//! # Match Compiler/Evaluator
//!
//! Compiles and evaluates the full query-document grammar: the flat
//! implicit-AND over top-level keys, logical combinators, operator objects,
//! `$elemMatch`, `$jsonSchema`, `$expr`, and `$text`. Beyond a bare `bool`,
//! [`matches_positional`] returns a [`MatchOutcome`] that also records, for
//! every field whose match resolved through a specific array element, the
//! index of the first such element — this is what lets the update engine
//! resolve the `$` positional path segment without re-running the query.

use std::cmp::Ordering;

use crate::error::{AevumError, AevumResult};
use crate::expr;
use crate::regexutil;
use crate::value::{self, Document, PathResult, Value};

/// Result of evaluating a query filter against one document.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub matched: bool,
    /// Dotted field path -> first array index whose element satisfied that
    /// field's predicate, for fields where the match traversed an array.
    pub positions: Document,
}

/// Convenience wrapper over [`matches_positional`] for callers (find/delete)
/// that don't need positional information.
pub fn matches(doc: &Value, filter: &Value) -> AevumResult<bool> {
    Ok(matches_positional(doc, filter)?.matched)
}

pub fn matches_positional(doc: &Value, filter: &Value) -> AevumResult<MatchOutcome> {
    let mut positions = Document::new();
    let matched = eval_doc(doc, filter, &mut positions)?;
    Ok(MatchOutcome { matched, positions })
}

/// Resolves a path against a value, treating the empty path as "the value
/// itself" — used by `$elemMatch`'s scalar form, where operators apply
/// directly to an array element rather than to one of its fields.
fn pg(v: &Value, path: &str) -> PathResult {
    if path.is_empty() {
        PathResult::Scalar(v.clone())
    } else {
        value::path_get(v, path)
    }
}

fn eval_doc(doc: &Value, filter: &Value, positions: &mut Document) -> AevumResult<bool> {
    let fields = match filter {
        Value::Document(d) => d,
        _ => return Err(AevumError::bad_input("query filter must be a document")),
    };
    for (key, cond) in fields.iter() {
        let ok = match key.as_str() {
            "$and" => eval_logical(doc, cond, true, positions)?,
            "$or" => eval_logical(doc, cond, false, positions)?,
            "$nor" => !eval_logical(doc, cond, false, &mut Document::new())?,
            "$expr" => eval_expr_clause(doc, cond)?,
            "$comment" => true,
            "$text" => return Err(AevumError::NoTextIndex),
            "$jsonSchema" => json_schema_matches(doc, cond),
            _ => eval_field(doc, key, cond, positions)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eval_logical(
    doc: &Value,
    cond: &Value,
    is_and: bool,
    positions: &mut Document,
) -> AevumResult<bool> {
    let items = match cond {
        Value::Array(items) if !items.is_empty() => items,
        _ => {
            return Err(AevumError::bad_input(format!(
                "${} requires a nonempty array of filters",
                if is_and { "and" } else { "or" }
            )))
        }
    };
    if is_and {
        for it in items {
            if !eval_doc(doc, it, positions)? {
                return Ok(false);
            }
        }
        Ok(true)
    } else {
        for it in items {
            let mut sub_positions = Document::new();
            if eval_doc(doc, it, &mut sub_positions)? {
                for (k, v) in sub_positions.iter() {
                    positions.insert(k.clone(), v.clone());
                }
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn eval_expr_clause(doc: &Value, cond: &Expr_Value) -> AevumResult<bool> {
    let env = expr::Env::new(doc.clone(), 0);
    let compiled = expr::compile(cond);
    let v = expr::eval(&compiled, &env)?;
    Ok(value::is_truthy(&v))
}

/// Alias so the function signature above reads naturally; `$expr`'s operand
/// is just a `Value` like any other filter clause.
type Expr_Value = Value;

fn is_operator_doc(fields: &Document) -> bool {
    fields
        .iter()
        .next()
        .map(|(k, _)| k.starts_with('$'))
        .unwrap_or(false)
}

fn eval_field(
    doc: &Value,
    path: &str,
    cond: &Value,
    positions: &mut Document,
) -> AevumResult<bool> {
    match cond {
        Value::Document(fields) if is_operator_doc(fields) => {
            eval_operator_doc(doc, path, fields, positions)
        }
        Value::Regex(p, f) => {
            let re = regexutil::build(p, f)?;
            Ok(field_regex_match(doc, path, &re))
        }
        other => {
            let (m, pos) = field_equals_pos(doc, path, other);
            if let Some(i) = pos {
                positions.insert(path.to_string(), Value::Int64(i as i64));
            }
            Ok(m)
        }
    }
}

fn eval_operator_doc(
    doc: &Value,
    path: &str,
    fields: &Document,
    positions: &mut Document,
) -> AevumResult<bool> {
    // $regex/$options are a matched pair, not independent operators.
    if let Some(regex_arg) = fields.get("$regex") {
        let options = match fields.get("$options") {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        };
        let (pattern, opts) = match regex_arg {
            Value::Regex(p, f) => (p.clone(), if f.is_empty() { options } else { f.clone() }),
            Value::String(p) => (p.clone(), options),
            other => {
                return Err(AevumError::type_mismatch(format!(
                    "$regex requires a string or regex pattern, found: {}",
                    value::type_name(other)
                )))
            }
        };
        let re = regexutil::build(&pattern, &opts)?;
        if !field_regex_match(doc, path, &re) {
            return Ok(false);
        }
    }

    for (op, arg) in fields.iter() {
        if op == "$regex" || op == "$options" {
            continue;
        }
        if !eval_single_operator(doc, path, op, arg, positions)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eval_single_operator(
    doc: &Value,
    path: &str,
    op: &str,
    arg: &Value,
    positions: &mut Document,
) -> AevumResult<bool> {
    match op {
        "$eq" => {
            let (m, pos) = field_equals_pos(doc, path, arg);
            if let Some(i) = pos {
                positions.insert(path.to_string(), Value::Int64(i as i64));
            }
            Ok(m)
        }
        "$ne" => Ok(!field_equals_pos(doc, path, arg).0),
        "$gt" | "$gte" | "$lt" | "$lte" => {
            let satisfies = |c: &Value| -> bool {
                let ord = value::compare(c, arg);
                match op {
                    "$gt" => ord == Ordering::Greater,
                    "$gte" => ord != Ordering::Less,
                    "$lt" => ord == Ordering::Less,
                    "$lte" => ord != Ordering::Greater,
                    _ => unreachable!(),
                }
            };
            let mut matched_index = None;
            if let PathResult::Scalar(Value::Array(items)) = pg(doc, path) {
                matched_index = items.iter().position(|it| satisfies(it));
            }
            let any = matched_index.is_some()
                || resolve_match_values(doc, path).iter().any(|c| satisfies(c));
            if let Some(i) = matched_index {
                positions.insert(path.to_string(), Value::Int64(i as i64));
            }
            Ok(any)
        }
        "$in" => Ok(in_list(doc, path, arg)?),
        "$nin" => Ok(!in_list(doc, path, arg)?),
        "$exists" => {
            let want = value::is_truthy(arg);
            let present = !matches!(pg(doc, path), PathResult::Missing);
            Ok(present == want)
        }
        "$type" => {
            let candidates = resolve_match_values(doc, path);
            Ok(candidates.iter().any(|c| bson_type_matches(c, arg)))
        }
        "$mod" => {
            let (div, rem) = match arg {
                Value::Array(items) if items.len() == 2 => {
                    (as_i64_of(&items[0]), as_i64_of(&items[1]))
                }
                _ => return Err(AevumError::bad_input("$mod requires a [divisor, remainder] array")),
            };
            if div == 0 {
                return Err(AevumError::DivisionByZero);
            }
            let candidates = resolve_match_values(doc, path);
            Ok(candidates.iter().any(|c| as_i64_of(c) % div == rem))
        }
        "$size" => {
            let want = as_i64_of(arg);
            Ok(
                matches!(pg(doc, path), PathResult::Scalar(Value::Array(items)) if items.len() as i64 == want),
            )
        }
        "$all" => {
            let list = match arg {
                Value::Array(items) => items,
                _ => return Err(AevumError::bad_input("$all requires an array")),
            };
            match pg(doc, path) {
                PathResult::Scalar(Value::Array(items)) => Ok(list
                    .iter()
                    .all(|t| items.iter().any(|it| value::equal_structural(it, t)))),
                _ => Ok(list.is_empty()),
            }
        }
        "$elemMatch" => {
            let (m, idx) = eval_elem_match(doc, path, arg)?;
            if let Some(i) = idx {
                positions.insert(path.to_string(), Value::Int64(i as i64));
            }
            Ok(m)
        }
        "$not" => match arg {
            Value::Regex(p, f) => {
                let re = regexutil::build(p, f)?;
                Ok(!field_regex_match(doc, path, &re))
            }
            Value::Document(fields) => {
                Ok(!eval_operator_doc(doc, path, fields, &mut Document::new())?)
            }
            _ => Err(AevumError::bad_input(
                "$not requires a regex or operator document",
            )),
        },
        other => Err(AevumError::UnknownOperator(other.to_string())),
    }
}

fn in_list(doc: &Value, path: &str, arg: &Value) -> AevumResult<bool> {
    let list = match arg {
        Value::Array(items) => items,
        _ => return Err(AevumError::bad_input("$in/$nin require an array")),
    };
    let candidates = resolve_match_values(doc, path);
    for target in list {
        if let Value::Regex(p, f) = target {
            let re = regexutil::build(p, f)?;
            if candidates
                .iter()
                .any(|c| matches!(c, Value::String(s) if re.is_match(s)))
            {
                return Ok(true);
            }
        } else if candidates.iter().any(|c| value::equal_structural(c, target)) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn eval_elem_match(doc: &Value, path: &str, sub: &Value) -> AevumResult<(bool, Option<usize>)> {
    let items = match pg(doc, path) {
        PathResult::Scalar(Value::Array(items)) => items,
        _ => return Ok((false, None)),
    };
    let sub_fields = match sub {
        Value::Document(d) => d,
        _ => {
            return Err(AevumError::bad_input(
                "$elemMatch requires a document argument",
            ))
        }
    };
    let scalar_mode = is_operator_doc(sub_fields);
    for (i, item) in items.iter().enumerate() {
        let matched = if scalar_mode {
            eval_operator_doc(item, "", sub_fields, &mut Document::new())?
        } else {
            eval_doc(item, sub, &mut Document::new())?
        };
        if matched {
            return Ok((true, Some(i)));
        }
    }
    Ok((false, None))
}

/// All candidate values a query predicate should be tested against for this
/// path: the direct resolution, plus — when that resolution is itself an
/// array — each of its elements (the "array field matches a value it
/// contains" rule).
fn resolve_match_values(doc: &Value, path: &str) -> Vec<Value> {
    match pg(doc, path) {
        PathResult::Scalar(Value::Array(items)) => {
            let mut out = vec![Value::Array(items.clone())];
            out.extend(items);
            out
        }
        PathResult::Scalar(v) => vec![v],
        PathResult::FlatFromArray(vs) => vs,
        PathResult::Missing => vec![],
    }
}

fn field_equals_pos(doc: &Value, path: &str, target: &Value) -> (bool, Option<usize>) {
    match pg(doc, path) {
        PathResult::Scalar(Value::Array(items)) => {
            if value::equal_structural(&Value::Array(items.clone()), target) {
                return (true, None);
            }
            for (i, item) in items.iter().enumerate() {
                if value::equal_structural(item, target) {
                    return (true, Some(i));
                }
            }
            (false, None)
        }
        PathResult::Scalar(v) => (value::equal_structural(&v, target), None),
        PathResult::FlatFromArray(vs) => (
            vs.iter().any(|v| value::equal_structural(v, target)),
            None,
        ),
        PathResult::Missing => (matches!(target, Value::Null), None),
    }
}

fn field_regex_match(doc: &Value, path: &str, re: &regex::Regex) -> bool {
    resolve_match_values(doc, path)
        .iter()
        .any(|c| matches!(c, Value::String(s) if re.is_match(s)))
}

fn as_i64_of(v: &Value) -> i64 {
    match v {
        Value::Int64(i) => *i,
        Value::Double(d) => *d as i64,
        _ => 0,
    }
}

fn bson_type_matches(v: &Value, bt: &Value) -> bool {
    match bt {
        Value::String(alias) => type_alias_matches(v, alias),
        Value::Array(list) => list.iter().any(|item| match item {
            Value::String(alias) => type_alias_matches(v, alias),
            _ => false,
        }),
        _ => false,
    }
}

fn type_alias_matches(v: &Value, alias: &str) -> bool {
    match alias {
        "number" => matches!(v, Value::Int64(_) | Value::Double(_)),
        "int" | "long" => matches!(v, Value::Int64(_)),
        "double" | "decimal" => matches!(v, Value::Double(_)),
        "string" => matches!(v, Value::String(_)),
        "object" => matches!(v, Value::Document(_)),
        "array" => matches!(v, Value::Array(_)),
        "bool" => matches!(v, Value::Bool(_)),
        "null" => matches!(v, Value::Null),
        "objectId" => matches!(v, Value::ObjectId(_)),
        "date" => matches!(v, Value::Date(_)),
        "regex" => matches!(v, Value::Regex(_, _)),
        _ => false,
    }
}

// ---------------------------------------------------------------------
// $jsonSchema
// ---------------------------------------------------------------------

fn as_len(v: &Value) -> i64 {
    match v {
        Value::Int64(i) => *i,
        Value::Double(d) => *d as i64,
        _ => 0,
    }
}

fn num_satisfies(v: &Value, bound: &Value, exclusive: bool, is_min: bool) -> bool {
    let ord = value::compare(v, bound);
    if is_min {
        if exclusive {
            ord == Ordering::Greater
        } else {
            ord != Ordering::Less
        }
    } else if exclusive {
        ord == Ordering::Less
    } else {
        ord != Ordering::Greater
    }
}

/// Recursively checks `v` against a (sub-)schema document. Returns `true`
/// when the schema document isn't itself a document (treated as "no
/// constraint"), matching the reference server's permissive fallback for
/// malformed schema fragments.
fn json_schema_matches(v: &Value, schema: &Value) -> bool {
    let schema_doc = match schema {
        Value::Document(d) => d,
        _ => return true,
    };

    if let Some(bt) = schema_doc.get("bsonType") {
        if !bson_type_matches(v, bt) {
            return false;
        }
    }

    if let Value::Document(d) = v {
        if let Some(Value::Array(required)) = schema_doc.get("required") {
            for r in required {
                if let Value::String(name) = r {
                    if !d.contains_key(name) {
                        return false;
                    }
                }
            }
        }
        if let Some(Value::Document(props)) = schema_doc.get("properties") {
            for (k, sub_schema) in props.iter() {
                if let Some(child) = d.get(k) {
                    if !json_schema_matches(child, sub_schema) {
                        return false;
                    }
                }
            }
            if matches!(schema_doc.get("additionalProperties"), Some(Value::Bool(false))) {
                for k in d.keys() {
                    if !props.contains_key(k) {
                        return false;
                    }
                }
            }
        }
    }

    if matches!(v, Value::Int64(_) | Value::Double(_)) {
        if let Some(min) = schema_doc.get("minimum") {
            let excl = schema_doc
                .get("exclusiveMinimum")
                .map(value::is_truthy)
                .unwrap_or(false);
            if !num_satisfies(v, min, excl, true) {
                return false;
            }
        }
        if let Some(max) = schema_doc.get("maximum") {
            let excl = schema_doc
                .get("exclusiveMaximum")
                .map(value::is_truthy)
                .unwrap_or(false);
            if !num_satisfies(v, max, excl, false) {
                return false;
            }
        }
    }

    if let Value::String(s) = v {
        if let Some(min_len) = schema_doc.get("minLength") {
            if (s.chars().count() as i64) < as_len(min_len) {
                return false;
            }
        }
        if let Some(max_len) = schema_doc.get("maxLength") {
            if (s.chars().count() as i64) > as_len(max_len) {
                return false;
            }
        }
        if let Some(Value::String(pat)) = schema_doc.get("pattern") {
            match regexutil::build(pat, "") {
                Ok(re) if !re.is_match(s) => return false,
                Err(_) => return false,
                _ => {}
            }
        }
    }

    if let Value::Array(items) = v {
        if let Some(min_items) = schema_doc.get("minItems") {
            if (items.len() as i64) < as_len(min_items) {
                return false;
            }
        }
        if let Some(max_items) = schema_doc.get("maxItems") {
            if (items.len() as i64) > as_len(max_items) {
                return false;
            }
        }
        if matches!(schema_doc.get("uniqueItems"), Some(Value::Bool(true))) {
            for i in 0..items.len() {
                for j in (i + 1)..items.len() {
                    if value::equal_structural(&items[i], &items[j]) {
                        return false;
                    }
                }
            }
        }
        if let Some(item_schema) = schema_doc.get("items") {
            if !items.iter().all(|it| json_schema_matches(it, item_schema)) {
                return false;
            }
        }
    }

    if let Some(Value::Array(enum_vals)) = schema_doc.get("enum") {
        if !enum_vals.iter().any(|e| value::equal_structural(e, v)) {
            return false;
        }
    }
    if let Some(Value::Array(all_of)) = schema_doc.get("allOf") {
        if !all_of.iter().all(|s| json_schema_matches(v, s)) {
            return false;
        }
    }
    if let Some(Value::Array(any_of)) = schema_doc.get("anyOf") {
        if !any_of.iter().any(|s| json_schema_matches(v, s)) {
            return false;
        }
    }
    if let Some(Value::Array(one_of)) = schema_doc.get("oneOf") {
        if one_of.iter().filter(|s| json_schema_matches(v, s)).count() != 1 {
            return false;
        }
    }
    if let Some(not_schema) = schema_doc.get("not") {
        if json_schema_matches(v, not_schema) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::from_json;

    fn m(doc: serde_json::Value, filter: serde_json::Value) -> MatchOutcome {
        matches_positional(&from_json(&doc), &from_json(&filter)).unwrap()
    }

    #[test]
    fn implicit_and_over_top_level_fields() {
        let o = m(
            serde_json::json!({"a": 1, "b": 2}),
            serde_json::json!({"a": 1, "b": 3}),
        );
        assert!(!o.matched);
    }

    #[test]
    fn array_field_matches_contained_element() {
        let o = m(
            serde_json::json!({"tags": ["x", "y", "z"]}),
            serde_json::json!({"tags": "y"}),
        );
        assert!(o.matched);
        assert_eq!(o.positions.get("tags"), Some(&Value::Int64(1)));
    }

    #[test]
    fn null_query_matches_missing_field() {
        let o = m(serde_json::json!({}), serde_json::json!({"a": null}));
        assert!(o.matched);
    }

    #[test]
    fn elem_match_requires_single_element_to_satisfy_all_conditions() {
        let o = m(
            serde_json::json!({"items": [{"qty": 1, "price": 5}, {"qty": 10, "price": 5}]}),
            serde_json::json!({"items": {"$elemMatch": {"qty": {"$gt": 5}, "price": 5}}}),
        );
        assert!(o.matched);
        assert_eq!(o.positions.get("items"), Some(&Value::Int64(1)));
    }

    #[test]
    fn or_requires_nonempty_array() {
        let err = matches_positional(
            &from_json(&serde_json::json!({})),
            &from_json(&serde_json::json!({"$or": []})),
        )
        .unwrap_err();
        assert!(matches!(err, AevumError::BadInput(_)));
    }

    #[test]
    fn text_query_without_declared_index_errors() {
        let err = matches_positional(
            &from_json(&serde_json::json!({})),
            &from_json(&serde_json::json!({"$text": {"$search": "hello"}})),
        )
        .unwrap_err();
        assert!(matches!(err, AevumError::NoTextIndex));
    }

    #[test]
    fn json_schema_validates_required_and_bson_type() {
        let schema = serde_json::json!({
            "$jsonSchema": {
                "bsonType": "object",
                "required": ["name"],
                "properties": {"age": {"bsonType": "int", "minimum": 0}}
            }
        });
        assert!(m(serde_json::json!({"name": "a", "age": 5}), schema.clone()).matched);
        assert!(!m(serde_json::json!({"age": 5}), schema).matched);
    }

    #[test]
    fn not_negates_operator_document() {
        let o = m(
            serde_json::json!({"a": 5}),
            serde_json::json!({"a": {"$not": {"$gt": 10}}}),
        );
        assert!(o.matched);
    }
}
