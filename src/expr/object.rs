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

//! Object and Type operator groups.

use bson::oid::ObjectId;

use super::{eval, eval_array_args, eval_doc_args, Env, OpArgs};
use crate::error::{AevumError, AevumResult};
use crate::value::{self, Document, Value};

pub fn eval(name: &str, args: &OpArgs, env: &Env) -> AevumResult<Value> {
    match name {
        "getField" => eval_get_field(args, env),
        "setField" => eval_set_field(args, env),
        "mergeObjects" => eval_merge_objects(args, env),
        _ => unreachable!("object::eval called with {}", name),
    }
}

fn eval_get_field(args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let (field, input_expr) = match args {
        OpArgs::Doc(pairs) => {
            let field = pairs
                .iter()
                .find(|(k, _)| k == "field")
                .map(|(_, v)| v.clone())
                .ok_or_else(|| {
                    AevumError::missing_required("$getField requires 'field' to be specified")
                })?;
            let input_expr = pairs.iter().find(|(k, _)| k == "input").map(|(_, v)| v.clone());
            (field, input_expr)
        }
        OpArgs::Single(e) => (e.clone(), None),
        OpArgs::Array(_) => {
            return Err(AevumError::type_mismatch(
                "$getField does not accept an array argument",
            ))
        }
    };
    let field_name = match super::eval(&field, env)? {
        Value::String(s) => s,
        other => {
            return Err(AevumError::type_mismatch(format!(
                "$getField requires a string field name, found: {}",
                value::type_name(&other)
            )))
        }
    };
    let input = match input_expr {
        Some(e) => super::eval(&e, env)?,
        None => env.current.clone(),
    };
    match input {
        Value::Document(d) => Ok(d.get(&field_name).cloned().unwrap_or(Value::Missing)),
        Value::Null | Value::Missing => Ok(Value::Missing),
        other => Err(AevumError::type_mismatch(format!(
            "$getField requires a document input, found: {}",
            value::type_name(&other)
        ))),
    }
}

fn eval_set_field(args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let d = eval_doc_args(args, env)?;
    let field_name = match d.get("field") {
        Some(Value::String(s)) => s.clone(),
        _ => {
            return Err(AevumError::missing_required(
                "$setField requires 'field' to be specified",
            ))
        }
    };
    let input = d.get("input").cloned().unwrap_or(Value::Missing);
    let value = d.get("value").cloned().unwrap_or(Value::Missing);
    let mut target = match input {
        Value::Document(doc) => doc,
        Value::Missing | Value::Null => Document::new(),
        other => {
            return Err(AevumError::type_mismatch(format!(
                "$setField requires a document input, found: {}",
                value::type_name(&other)
            )))
        }
    };
    if matches!(value, Value::Missing) {
        target.remove(&field_name);
    } else {
        target.insert(field_name, value);
    }
    Ok(Value::Document(target))
}

fn eval_merge_objects(args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let vs = eval_array_args(args, env)?;
    let mut out = Document::new();
    for v in vs {
        match v {
            Value::Document(d) => {
                for (k, val) in d.iter() {
                    out.insert(k.clone(), val.clone());
                }
            }
            Value::Null | Value::Missing => {}
            other => {
                return Err(AevumError::type_mismatch(format!(
                    "$mergeObjects requires document arguments, found: {}",
                    value::type_name(&other)
                )))
            }
        }
    }
    Ok(Value::Document(out))
}

// ---------------------------------------------------------------------
// Type group
// ---------------------------------------------------------------------

pub fn eval_type(name: &str, args: &OpArgs, env: &Env) -> AevumResult<Value> {
    if name == "convert" {
        return eval_convert(args, env);
    }
    let vs = eval_array_args(args, env)?;
    if vs.len() != 1 {
        return Err(AevumError::missing_required(format!(
            "${} requires exactly 1 argument",
            name
        )));
    }
    let v = &vs[0];
    match name {
        "type" => Ok(Value::String(value::type_name(v).to_string())),
        "isNumber" => Ok(Value::Bool(matches!(v, Value::Int64(_) | Value::Double(_)))),
        "toInt" => convert_one(v, "int"),
        "toLong" => convert_one(v, "long"),
        "toDouble" => convert_one(v, "double"),
        "toDecimal" => convert_one(v, "decimal"),
        "toBool" => convert_one(v, "bool"),
        "toDate" => convert_one(v, "date"),
        "toString" => convert_one(v, "string"),
        "toObjectId" => convert_one(v, "objectId"),
        _ => unreachable!("object::eval_type called with {}", name),
    }
}

fn eval_convert(args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let d = eval_doc_args(args, env)?;
    let input = d
        .get("input")
        .cloned()
        .ok_or_else(|| AevumError::missing_required("$convert requires 'input' field"))?;
    let to = match d.get("to") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => {
            return Err(AevumError::type_mismatch(format!(
                "$convert's 'to' must name a type, found: {}",
                value::type_name(other)
            )))
        }
        None => return Err(AevumError::missing_required("$convert requires a 'to' field")),
    };
    if matches!(input, Value::Null | Value::Missing) {
        return Ok(d.get("onNull").cloned().unwrap_or(Value::Null));
    }
    match convert_one(&input, &to) {
        Ok(v) => Ok(v),
        Err(e) => match d.get("onError") {
            Some(v) => Ok(v.clone()),
            None => Err(e),
        },
    }
}

fn convert_one(v: &Value, to: &str) -> AevumResult<Value> {
    if matches!(v, Value::Null) {
        return Ok(Value::Null);
    }
    if matches!(v, Value::Missing) {
        return Ok(Value::Missing);
    }
    match to {
        "int" | "long" => to_integer(v),
        "double" | "decimal" => to_double(v),
        "bool" => Ok(Value::Bool(value::is_truthy(v))),
        "string" => to_string_value(v),
        "date" => to_date(v),
        "objectId" => to_object_id(v),
        other => Err(AevumError::bad_input(format!("unsupported $convert target type '{}'", other))),
    }
}

fn to_integer(v: &Value) -> AevumResult<Value> {
    match v {
        Value::Int64(i) => Ok(Value::Int64(*i)),
        Value::Double(d) => {
            if d.is_finite() {
                Ok(Value::Int64(*d as i64))
            } else {
                Err(AevumError::type_mismatch(
                    "Failed to parse number to integer: value is out of range",
                ))
            }
        }
        Value::Bool(b) => Ok(Value::Int64(if *b { 1 } else { 0 })),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int64)
            .map_err(|_| AevumError::type_mismatch(format!("Failed to parse number '{}'", s))),
        Value::Date(ms) => Ok(Value::Int64(*ms)),
        other => Err(AevumError::type_mismatch(format!(
            "cannot convert {} to an integer",
            value::type_name(other)
        ))),
    }
}

fn to_double(v: &Value) -> AevumResult<Value> {
    match v {
        Value::Int64(i) => Ok(Value::Double(*i as f64)),
        Value::Double(d) => Ok(Value::Double(*d)),
        Value::Bool(b) => Ok(Value::Double(if *b { 1.0 } else { 0.0 })),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| AevumError::type_mismatch(format!("Failed to parse number '{}'", s))),
        Value::Date(ms) => Ok(Value::Double(*ms as f64)),
        other => Err(AevumError::type_mismatch(format!(
            "cannot convert {} to a double",
            value::type_name(other)
        ))),
    }
}

fn to_string_value(v: &Value) -> AevumResult<Value> {
    Ok(Value::String(match v {
        Value::String(s) => s.clone(),
        Value::Int64(i) => i.to_string(),
        Value::Double(d) => d.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::ObjectId(o) => o.to_hex(),
        Value::Date(ms) => super::date::millis_to_iso_string(*ms)?,
        other => {
            return Err(AevumError::type_mismatch(format!(
                "cannot convert {} to a string",
                value::type_name(other)
            )))
        }
    }))
}

fn to_date(v: &Value) -> AevumResult<Value> {
    match v {
        Value::Date(ms) => Ok(Value::Date(*ms)),
        Value::Int64(i) => Ok(Value::Date(*i)),
        Value::Double(d) => Ok(Value::Date(*d as i64)),
        Value::String(s) => super::date::parse_iso_string(s).map(Value::Date),
        Value::ObjectId(oid) => Ok(Value::Date(oid.timestamp().timestamp_millis())),
        other => Err(AevumError::type_mismatch(format!(
            "cannot convert {} to a date",
            value::type_name(other)
        ))),
    }
}

fn to_object_id(v: &Value) -> AevumResult<Value> {
    match v {
        Value::ObjectId(o) => Ok(Value::ObjectId(*o)),
        Value::String(s) => ObjectId::parse_str(s)
            .map(Value::ObjectId)
            .map_err(|_| {
                AevumError::type_mismatch(format!(
                    "'{}' is not a valid 24-character hex ObjectId",
                    s
                ))
            }),
        other => Err(AevumError::type_mismatch(format!(
            "cannot convert {} to an ObjectId",
            value::type_name(other)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{compile, eval as expr_eval};
    use crate::json::from_json;

    fn run(json: serde_json::Value) -> AevumResult<Value> {
        let env = Env::new(from_json(&serde_json::json!({})), 0);
        expr_eval(&compile(&from_json(&json)), &env)
    }

    #[test]
    fn get_field_reads_from_current_by_default() {
        let env = Env::new(from_json(&serde_json::json!({"a": 1})), 0);
        let v = expr_eval(
            &compile(&from_json(&serde_json::json!({"$getField": "a"}))),
            &env,
        )
        .unwrap();
        assert_eq!(v, Value::Int64(1));
    }

    #[test]
    fn set_field_remove_sentinel_deletes_field() {
        let v = run(serde_json::json!({
            "$setField": {"field": "a", "input": {"a": 1, "b": 2}, "value": "$$REMOVE"}
        }))
        .unwrap();
        assert_eq!(
            v,
            from_json(&serde_json::json!({"b": 2}))
        );
    }

    #[test]
    fn merge_objects_last_write_wins_empty_does_not_overwrite() {
        let v = run(serde_json::json!({
            "$mergeObjects": [{"x": 1}, {}]
        }))
        .unwrap();
        assert_eq!(v, from_json(&serde_json::json!({"x": 1})));
    }

    #[test]
    fn to_bool_of_empty_string_is_true() {
        assert_eq!(
            run(serde_json::json!({"$toBool": ""})).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn to_object_id_requires_24_hex_chars() {
        let err = run(serde_json::json!({"$toObjectId": "not-valid"})).unwrap_err();
        assert!(matches!(err, AevumError::TypeMismatch(_)));
    }

    #[test]
    fn type_distinguishes_null_and_missing() {
        assert_eq!(
            run(serde_json::json!({"$type": null})).unwrap(),
            Value::String("null".into())
        );
    }
}
