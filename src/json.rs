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

//! Conversion between the wire format (`serde_json::Value`, what crosses the
//! FFI boundary and the `Storage` port) and the core [`crate::value::Value`].
//!
//! The wire format uses a MongoDB Extended-JSON-like convention for the
//! types plain JSON cannot express natively: `{"$oid": "<24hex>"}` for
//! ObjectId, `{"$date": <millis>}` for Date, `{"$regex": p, "$options": f}`
//! for Regex. Everything else maps structurally.

use bson::oid::ObjectId;
use serde_json::{Map, Number};

use crate::value::{Document, Value};

pub fn from_json(j: &serde_json::Value) -> Value {
    match j {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int64(i)
            } else {
                Value::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(from_json).collect()),
        serde_json::Value::Object(map) => from_json_object(map),
    }
}

fn from_json_object(map: &Map<String, serde_json::Value>) -> Value {
    if map.len() == 1 {
        if let Some(serde_json::Value::String(hex)) = map.get("$oid") {
            if let Ok(oid) = ObjectId::parse_str(hex) {
                return Value::ObjectId(oid);
            }
        }
        if let Some(date_val) = map.get("$date") {
            if let Some(ms) = date_val.as_i64() {
                return Value::Date(ms);
            }
        }
    }
    if map.len() == 2 && map.contains_key("$regex") && map.contains_key("$options") {
        if let (Some(serde_json::Value::String(p)), Some(serde_json::Value::String(o))) =
            (map.get("$regex"), map.get("$options"))
        {
            return Value::Regex(p.clone(), o.clone());
        }
    }
    let pairs = map
        .iter()
        .map(|(k, v)| (k.clone(), from_json(v)))
        .collect();
    Value::Document(Document::from_pairs(pairs))
}

pub fn to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        // Missing must never reach the wire: callers that project/compute a
        // field to Missing are expected to omit the key instead of emitting
        // a sentinel value. Serializing it as null is the safe fallback.
        Value::Missing => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int64(i) => serde_json::Value::Number((*i).into()),
        Value::Double(d) => Number::from_f64(*d)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Date(ms) => {
            let mut m = Map::new();
            m.insert("$date".to_string(), serde_json::Value::from(*ms));
            serde_json::Value::Object(m)
        }
        Value::ObjectId(oid) => {
            let mut m = Map::new();
            m.insert("$oid".to_string(), serde_json::Value::String(oid.to_hex()));
            serde_json::Value::Object(m)
        }
        Value::Regex(p, f) => {
            let mut m = Map::new();
            m.insert("$regex".to_string(), serde_json::Value::String(p.clone()));
            m.insert(
                "$options".to_string(),
                serde_json::Value::String(f.clone()),
            );
            serde_json::Value::Object(m)
        }
        Value::Array(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Document(d) => {
            let mut m = Map::new();
            for (k, v) in d.iter() {
                m.insert(k.clone(), to_json(v));
            }
            serde_json::Value::Object(m)
        }
    }
}

/// Parses a JSON text into a [`Value`], defaulting to an empty document on
/// malformed input — the FFI boundary fails open rather than panicking
/// across the ABI (see `lib.rs`).
pub fn parse_or_empty_doc(text: &str) -> Value {
    serde_json::from_str::<serde_json::Value>(text)
        .map(|j| from_json(&j))
        .unwrap_or_else(|_| Value::Document(Document::new()))
}

pub fn parse_or_empty_array(text: &str) -> Value {
    serde_json::from_str::<serde_json::Value>(text)
        .map(|j| from_json(&j))
        .unwrap_or(Value::Array(Vec::new()))
}

pub fn to_json_string(v: &Value) -> String {
    serde_json::to_string(&to_json(v)).unwrap_or_else(|_| "null".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_object_id() {
        let oid = ObjectId::new();
        let j = serde_json::json!({ "$oid": oid.to_hex() });
        let v = from_json(&j);
        assert_eq!(v, Value::ObjectId(oid));
        assert_eq!(to_json(&v), j);
    }

    #[test]
    fn integers_stay_int64_not_double() {
        let v = from_json(&serde_json::json!(42));
        assert_eq!(v, Value::Int64(42));
    }

    #[test]
    fn floats_become_double() {
        let v = from_json(&serde_json::json!(4.5));
        assert_eq!(v, Value::Double(4.5));
    }

    #[test]
    fn malformed_json_parses_as_empty_document() {
        let v = parse_or_empty_doc("not json");
        assert_eq!(v, Value::Document(Document::new()));
    }
}
