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

//! String operator group.

use super::{any_nullish, eval_array_args, eval_doc_args, Env, OpArgs};
use crate::error::{AevumError, AevumResult};
use crate::regexutil;
use crate::value::{Document, Value};

fn as_str<'a>(v: &'a Value, op: &str) -> AevumResult<&'a str> {
    match v {
        Value::String(s) => Ok(s.as_str()),
        other => Err(AevumError::type_mismatch(format!(
            "{} requires a string argument, found: {}",
            op,
            crate::value::type_name(other)
        ))),
    }
}

fn as_i64(v: &Value, default: i64) -> i64 {
    match v {
        Value::Int64(i) => *i,
        Value::Double(d) => *d as i64,
        Value::Missing => default,
        _ => default,
    }
}

pub fn eval(name: &str, args: &OpArgs, env: &Env) -> AevumResult<Value> {
    match name {
        "regexFind" | "regexFindAll" | "regexMatch" => eval_regex(name, args, env),
        "trim" | "ltrim" | "rtrim" => eval_trim(name, args, env),
        _ => {
            let vs = eval_array_args(args, env)?;
            eval_positional(name, &vs)
        }
    }
}

fn eval_positional(name: &str, vs: &[Value]) -> AevumResult<Value> {
    match name {
        "concat" => {
            if any_nullish(vs) {
                return Ok(Value::Null);
            }
            let mut out = String::new();
            for v in vs {
                out.push_str(as_str(v, "$concat")?);
            }
            Ok(Value::String(out))
        }
        "toUpper" => Ok(Value::String(string_or_empty(vs, "$toUpper")?.to_uppercase())),
        "toLower" => Ok(Value::String(string_or_empty(vs, "$toLower")?.to_lowercase())),
        "strLenCP" => Ok(Value::Int64(as_str(&vs[0], "$strLenCP")?.chars().count() as i64)),
        "strLenBytes" => Ok(Value::Int64(as_str(&vs[0], "$strLenBytes")?.len() as i64)),
        "substrCP" => {
            let s = as_str(&vs[0], "$substrCP")?;
            let chars: Vec<char> = s.chars().collect();
            let start = as_i64(&vs[1], 0).max(0) as usize;
            let len = as_i64(&vs[2], chars.len() as i64).max(0) as usize;
            let end = (start + len).min(chars.len());
            let start = start.min(chars.len());
            Ok(Value::String(chars[start..end].iter().collect()))
        }
        "substrBytes" => {
            let s = as_str(&vs[0], "$substrBytes")?;
            let bytes = s.as_bytes();
            let start = (as_i64(&vs[1], 0).max(0) as usize).min(bytes.len());
            let len = as_i64(&vs[2], bytes.len() as i64).max(0) as usize;
            let end = (start + len).min(bytes.len());
            Ok(Value::String(
                String::from_utf8_lossy(&bytes[start..end]).into_owned(),
            ))
        }
        "split" => {
            if any_nullish(vs) {
                return Ok(Value::Null);
            }
            let s = as_str(&vs[0], "$split")?;
            let delim = as_str(&vs[1], "$split")?;
            if delim.is_empty() {
                return Err(AevumError::bad_input("$split requires a non-empty delimiter"));
            }
            Ok(Value::Array(
                s.split(delim).map(|p| Value::String(p.to_string())).collect(),
            ))
        }
        "indexOfCP" | "indexOfBytes" => {
            let s = as_str(&vs[0], &format!("${}", name))?;
            let needle = as_str(&vs[1], &format!("${}", name))?;
            let start = vs.get(2).map(|v| as_i64(v, 0)).unwrap_or(0).max(0) as usize;
            let end = vs
                .get(3)
                .map(|v| as_i64(v, s.len() as i64))
                .unwrap_or(s.len() as i64)
                .max(0) as usize;
            Ok(Value::Int64(index_of(name, s, needle, start, end)))
        }
        "replaceOne" => eval_replace(vs, false),
        "replaceAll" => eval_replace(vs, true),
        "strcasecmp" => {
            let a = as_str(&vs[0], "$strcasecmp")?.to_lowercase();
            let b = as_str(&vs[1], "$strcasecmp")?.to_lowercase();
            Ok(Value::Int64(match a.cmp(&b) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            }))
        }
        _ => unreachable!("string::eval_positional called with {}", name),
    }
}

fn string_or_empty<'a>(vs: &'a [Value], op: &str) -> AevumResult<String> {
    match vs.first() {
        Some(Value::Null) | Some(Value::Missing) | None => Ok(String::new()),
        Some(other) => Ok(as_str(other, op)?.to_string()),
    }
}

fn index_of(name: &str, s: &str, needle: &str, start: usize, end: usize) -> i64 {
    if name == "indexOfCP" {
        let chars: Vec<char> = s.chars().collect();
        let hi = end.min(chars.len());
        let lo = start.min(hi);
        let window: String = chars[lo..hi].iter().collect();
        match window.find(needle) {
            Some(byte_pos) => (lo + window[..byte_pos].chars().count()) as i64,
            None => -1,
        }
    } else {
        let hi = end.min(s.len());
        let lo = start.min(hi);
        match s.get(lo..hi).and_then(|w| w.find(needle)) {
            Some(pos) => (lo + pos) as i64,
            None => -1,
        }
    }
}

fn eval_replace(vs: &[Value], all: bool) -> AevumResult<Value> {
    if vs.len() != 3 {
        return Err(AevumError::missing_required(
            "$replaceOne/$replaceAll require input, find, and replacement",
        ));
    }
    if any_nullish(vs) {
        return Ok(Value::Null);
    }
    let input = as_str(&vs[0], "$replaceOne")?;
    let find = as_str(&vs[1], "$replaceOne")?;
    let replacement = as_str(&vs[2], "$replaceOne")?;
    if find.is_empty() {
        return Err(AevumError::bad_input(
            "$replaceOne/$replaceAll require a non-empty 'find' string",
        ));
    }
    Ok(Value::String(if all {
        input.replace(find, replacement)
    } else {
        input.replacen(find, replacement, 1)
    }))
}

fn eval_trim(name: &str, args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let d: Document = match args {
        OpArgs::Doc(_) => eval_doc_args(args, env)?,
        OpArgs::Single(_) | OpArgs::Array(_) => {
            let vs = eval_array_args(args, env)?;
            let mut d = Document::new();
            d.insert("input", vs.into_iter().next().unwrap_or(Value::Missing));
            d
        }
    };
    let input = d.get("input").cloned().unwrap_or(Value::Missing);
    if matches!(input, Value::Null | Value::Missing) {
        return Ok(Value::Null);
    }
    let s = as_str(&input, &format!("${}", name))?;
    let chars: Option<String> = match d.get("chars") {
        Some(Value::String(c)) => Some(c.clone()),
        _ => None,
    };
    let trim_set: Vec<char> = chars
        .as_deref()
        .unwrap_or(" \t\n\r")
        .chars()
        .collect();
    let is_trim_char = |c: char| trim_set.contains(&c);
    let out = match name {
        "trim" => s.trim_matches(is_trim_char),
        "ltrim" => s.trim_start_matches(is_trim_char),
        "rtrim" => s.trim_end_matches(is_trim_char),
        _ => unreachable!(),
    };
    Ok(Value::String(out.to_string()))
}

fn eval_regex(name: &str, args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let d = eval_doc_args(args, env)?;
    let input = d.get("input").cloned().unwrap_or(Value::Missing);
    if matches!(input, Value::Null | Value::Missing) {
        return Ok(if name == "regexMatch" {
            Value::Bool(false)
        } else {
            Value::Null
        });
    }
    let s = as_str(&input, &format!("${}", name))?;
    let (pattern, options) = match d.get("regex") {
        Some(Value::Regex(p, f)) => (p.clone(), f.clone()),
        Some(Value::String(p)) => (
            p.clone(),
            match d.get("options") {
                Some(Value::String(o)) => o.clone(),
                _ => String::new(),
            },
        ),
        _ => {
            return Err(AevumError::missing_required(format!(
                "${} requires a 'regex' field",
                name
            )))
        }
    };
    let re = regexutil::build(&pattern, &options)?;

    match name {
        "regexMatch" => Ok(Value::Bool(re.is_match(s))),
        "regexFind" => Ok(match regexutil::find_first(&re, s) {
            Some(caps) => captures_to_value(&caps, s),
            None => Value::Null,
        }),
        "regexFindAll" => Ok(Value::Array(
            regexutil::find_all(&re, s)
                .iter()
                .map(|caps| captures_to_value(caps, s))
                .collect(),
        )),
        _ => unreachable!(),
    }
}

fn captures_to_value(caps: &regex::Captures, haystack: &str) -> Value {
    let whole = caps.get(0).unwrap();
    let mut d = Document::new();
    d.insert("match", Value::String(whole.as_str().to_string()));
    d.insert(
        "idx",
        Value::Int64(haystack[..whole.start()].chars().count() as i64),
    );
    let mut captures = Vec::new();
    for i in 1..caps.len() {
        captures.push(match caps.get(i) {
            Some(m) => Value::String(m.as_str().to_string()),
            None => Value::Null,
        });
    }
    d.insert("captures", Value::Array(captures));
    Value::Document(d)
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
    fn substr_cp_indexes_by_codepoint() {
        assert_eq!(
            run(serde_json::json!({"$substrCP": ["héllo", 1, 1]})),
            Value::String("é".to_string())
        );
    }

    #[test]
    fn substr_bytes_indexes_by_byte() {
        // 'é' is 2 bytes in UTF-8; byte offset 1 lands mid-codepoint, which
        // from_utf8_lossy replaces rather than panicking.
        let v = run(serde_json::json!({"$substrBytes": ["ab", 0, 1]}));
        assert_eq!(v, Value::String("a".to_string()));
    }

    #[test]
    fn split_on_delimiter() {
        assert_eq!(
            run(serde_json::json!({"$split": ["a,b,c", ","]})),
            Value::Array(vec![
                Value::String("a".into()),
                Value::String("b".into()),
                Value::String("c".into())
            ])
        );
    }

    #[test]
    fn regex_find_all_reports_codepoint_index() {
        let v = run(serde_json::json!({
            "$regexFindAll": {"input": "a1b2", "regex": "[0-9]"}
        }));
        if let Value::Array(items) = v {
            assert_eq!(items.len(), 2);
        } else {
            panic!("expected array");
        }
    }

    #[test]
    fn replace_one_replaces_only_first() {
        assert_eq!(
            run(serde_json::json!({"$replaceOne": ["aXaXa", "a", "b"]})),
            Value::String("bXaXa".to_string())
        );
    }

    #[test]
    fn replace_all_replaces_every_occurrence() {
        assert_eq!(
            run(serde_json::json!({"$replaceAll": ["aXaXa", "a", "b"]})),
            Value::String("bXbXb".to_string())
        );
    }
}
