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

//! # Value Model & Ordering
//!
//! `Value` is the single recursive document value type every other module in
//! this crate builds on. It generalizes ad-hoc `serde_json::Value`
//! comparisons into the full BSON total order, and adds the `Missing`
//! variant the reference server's null/undefined distinction requires —
//! `serde_json::Value` has no way to represent "this field was never
//! there" separately from `Null`.

use bson::oid::ObjectId;
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::fmt;

use crate::error::{AevumError, AevumResult};

/// An ordered mapping from string keys to [`Value`]s. Insertion order is
/// observable and preserved by every operation that copies a document
///: this is why the backing store is an [`IndexMap`] rather
/// than a language-default hash map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document(IndexMap<String, Value>);

impl Document {
    pub fn new() -> Self {
        Document(IndexMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Inserts, preserving the position of an existing key and appending a
    /// new key at the end (matching `IndexMap::insert`'s semantics, which is
    /// also how the reference server treats in-place field updates).
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Value)> {
        self.0.iter_mut()
    }

    pub fn from_pairs(pairs: Vec<(String, Value)>) -> Self {
        let mut m = IndexMap::new();
        for (k, v) in pairs {
            m.insert(k, v);
        }
        Document(m)
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, String, Value>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// The recursive document value type.
///
/// `Missing` is distinct from `Null`: it arises only from absent fields and
/// from the `$$REMOVE` sentinel, never from user data. No host-language
/// `null`/`None` is allowed to stand in for it anywhere outside this module.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Missing,
    Bool(bool),
    Int64(i64),
    Double(f64),
    String(String),
    /// Signed milliseconds since the Unix epoch.
    Date(i64),
    ObjectId(ObjectId),
    /// Pattern plus Mongo-style flag string (subset: `i`, `m`, `x`, `s`).
    Regex(String, String),
    Array(Vec<Value>),
    Document(Document),
}

/// Rank of a value's BSON type class within the total order.
/// The reference order also reserves a slot for BSON Binary data between
/// Array and ObjectId; this crate's `Value` has no Binary variant, so that
/// rank is simply never produced.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Missing => 0,
        Value::Null => 1,
        Value::Int64(_) | Value::Double(_) => 2,
        Value::String(_) => 3,
        Value::Document(_) => 4,
        Value::Array(_) => 5,
        Value::ObjectId(_) => 6,
        Value::Bool(_) => 7,
        Value::Date(_) => 8,
        Value::Regex(_, _) => 9,
    }
}

/// Compares two numbers by mathematical value, with the deterministic tie
/// break documented in SPEC_FULL.md §D: `NaN` sorts before `-Infinity`, and
/// all other comparisons fall back to IEEE-754 total order via `f64`.
fn compare_numbers(a: &Value, b: &Value) -> Ordering {
    let fa = as_f64(a);
    let fb = as_f64(b);
    let a_nan = fa.is_nan();
    let b_nan = fb.is_nan();
    match (a_nan, b_nan) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => fa.partial_cmp(&fb).unwrap_or(Ordering::Equal),
    }
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Int64(i) => *i as f64,
        Value::Double(d) => *d,
        _ => f64::NAN,
    }
}

/// Total order comparator used by `$lt`/`$gt`/`$min`/`$max`/`$sort`/`$cmp`
///. This is an *ordering* relation, not structural equality:
/// `Int64(1)` and `Double(1.0)` compare `Equal` here but are not
/// `equal_structural`.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Value::Missing, Value::Missing) => Ordering::Equal,
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Int64(_) | Value::Double(_), Value::Int64(_) | Value::Double(_)) => {
            compare_numbers(a, b)
        }
        (Value::String(x), Value::String(y)) => x.as_bytes().cmp(y.as_bytes()),
        (Value::Document(x), Value::Document(y)) => compare_documents(x, y),
        (Value::Array(x), Value::Array(y)) => compare_arrays(x, y),
        (Value::ObjectId(x), Value::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (Value::Regex(px, fx), Value::Regex(py, fy)) => (px, fx).cmp(&(py, fy)),
        _ => Ordering::Equal,
    }
}

fn compare_documents(a: &Document, b: &Document) -> Ordering {
    let mut ai = a.iter();
    let mut bi = b.iter();
    loop {
        match (ai.next(), bi.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some((ka, va)), Some((kb, vb))) => {
                let kc = ka.as_bytes().cmp(kb.as_bytes());
                if kc != Ordering::Equal {
                    return kc;
                }
                let vc = compare(va, vb);
                if vc != Ordering::Equal {
                    return vc;
                }
            }
        }
    }
}

fn compare_arrays(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let c = compare(x, y);
        if c != Ordering::Equal {
            return c;
        }
    }
    a.len().cmp(&b.len())
}

/// Structural equality: the relation used by `$eq` and set-membership
/// operators (`$addToSet`, `$in`). Unlike [`compare`], this distinguishes
/// `Int64(1)` from `Double(1.0)` and is sensitive to document key order.
pub fn equal_structural(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Missing, Value::Missing) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int64(x), Value::Int64(y)) => x == y,
        (Value::Double(x), Value::Double(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::Int64(x), Value::Double(y)) | (Value::Double(y), Value::Int64(x)) => {
            (*x as f64) == *y
        }
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Date(x), Value::Date(y)) => x == y,
        (Value::ObjectId(x), Value::ObjectId(y)) => x == y,
        (Value::Regex(px, fx), Value::Regex(py, fy)) => px == py && fx == fy,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| equal_structural(a, b))
        }
        (Value::Document(x), Value::Document(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|((ka, va), (kb, vb))| ka == kb && equal_structural(va, vb))
        }
        _ => false,
    }
}

/// Fixed type-name strings returned by `$type`.
pub fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Missing => "missing",
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Int64(_) => "int",
        Value::Double(_) => "double",
        Value::String(_) => "string",
        Value::Date(_) => "date",
        Value::ObjectId(_) => "objectId",
        Value::Regex(_, _) => "regex",
        Value::Array(_) => "array",
        Value::Document(_) => "object",
    }
}

/// MongoDB truthiness: `false`, `0` (any
/// numeric zero), `null`, and `Missing` are false; everything else,
/// including the empty string, is true.
pub fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Null | Value::Missing => false,
        Value::Int64(i) => *i != 0,
        Value::Double(d) => *d != 0.0,
        _ => true,
    }
}

/// The result of resolving a dotted path against a document: a scalar hit, a multi-valued hit produced by traversing
/// through an array, or a clean miss.
#[derive(Debug, Clone, PartialEq)]
pub enum PathResult {
    Scalar(Value),
    /// Path traversal crossed an array; each element's resolution of the
    /// remaining suffix contributes one entry (flattened one level).
    FlatFromArray(Vec<Value>),
    Missing,
}

impl PathResult {
    /// Collapses a `PathResult` to a single `Value` for scalar contexts
    /// (update targets, `$getField`): the first matching position wins.
    pub fn into_scalar(self) -> Value {
        match self {
            PathResult::Scalar(v) => v,
            PathResult::FlatFromArray(vs) => vs.into_iter().next().unwrap_or(Value::Missing),
            PathResult::Missing => Value::Missing,
        }
    }

    /// All values this path resolved to, for match-purposes multiset
    /// semantics: a scalar hit is a single-element multiset.
    pub fn into_multiset(self) -> Vec<Value> {
        match self {
            PathResult::Scalar(v) => vec![v],
            PathResult::FlatFromArray(vs) => vs,
            PathResult::Missing => vec![],
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, PathResult::Missing)
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('.').collect()
}

/// Resolves a dotted path against a value, array-aware: traversing an array
/// segment auto-flattens across its elements.
pub fn path_get(doc: &Value, path: &str) -> PathResult {
    let segments = split_path(path);
    path_get_segments(doc, &segments)
}

fn path_get_segments(v: &Value, segments: &[&str]) -> PathResult {
    let Some((head, rest)) = segments.split_first() else {
        return PathResult::Scalar(v.clone());
    };

    match v {
        Value::Document(d) => match d.get(head) {
            Some(child) => {
                if rest.is_empty() {
                    PathResult::Scalar(child.clone())
                } else {
                    path_get_segments(child, rest)
                }
            }
            None => PathResult::Missing,
        },
        Value::Array(items) => {
            // A purely numeric segment indexes directly into the array.
            if let Ok(idx) = head.parse::<usize>() {
                return match items.get(idx) {
                    Some(child) => {
                        if rest.is_empty() {
                            PathResult::Scalar(child.clone())
                        } else {
                            path_get_segments(child, rest)
                        }
                    }
                    None => PathResult::Missing,
                };
            }
            // Otherwise the segment addresses the field on each element:
            // flatten the per-element resolutions (array-aware traversal).
            let mut out = Vec::new();
            for item in items {
                match path_get_segments(item, segments) {
                    PathResult::Scalar(v) => out.push(v),
                    PathResult::FlatFromArray(mut vs) => out.append(&mut vs),
                    PathResult::Missing => {}
                }
            }
            if out.is_empty() {
                PathResult::Missing
            } else {
                PathResult::FlatFromArray(out)
            }
        }
        _ => PathResult::Missing,
    }
}

/// Sets a value at a dotted path, creating intermediate documents when
/// `create_intermediates` is true. Fails with [`AevumError::TypeMismatch`]
/// (the "cannot create field" failure mode) when an intermediate segment
/// addresses a non-document, non-array value.
pub fn path_set(
    doc: &Value,
    path: &str,
    value: Value,
    create_intermediates: bool,
) -> AevumResult<Value> {
    let segments = split_path(path);
    path_set_segments(doc, &segments, value, create_intermediates)
}

fn path_set_segments(
    v: &Value,
    segments: &[&str],
    value: Value,
    create: bool,
) -> AevumResult<Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(value);
    };

    if let Ok(idx) = head.parse::<usize>() {
        let mut items = match v {
            Value::Array(items) => items.clone(),
            Value::Missing | Value::Null if create => Vec::new(),
            _ => {
                return Err(AevumError::type_mismatch(format!(
                    "cannot create field '{}' in element {{ {}: ... }}",
                    head,
                    type_name(v)
                )))
            }
        };
        if idx >= items.len() {
            if !create && idx > items.len() {
                return Err(AevumError::type_mismatch(
                    "cannot create field beyond array bounds without padding",
                ));
            }
            items.resize(idx + 1, Value::Null);
        }
        let child = items[idx].clone();
        let new_child = if rest.is_empty() {
            value
        } else {
            path_set_segments(&child, rest, value, create)?
        };
        items[idx] = new_child;
        return Ok(Value::Array(items));
    }

    let mut d = match v {
        Value::Document(d) => d.clone(),
        Value::Missing | Value::Null if create => Document::new(),
        _ => {
            return Err(AevumError::type_mismatch(format!(
                "Cannot create field '{}' in element of type {}",
                head,
                type_name(v)
            )))
        }
    };

    let child = d.get(*head).cloned().unwrap_or(Value::Missing);
    let new_child = if rest.is_empty() {
        value
    } else if child == Value::Missing && !create {
        return Err(AevumError::type_mismatch(format!(
            "cannot create field '{}' in intermediate path",
            rest.first().unwrap_or(head)
        )));
    } else {
        path_set_segments(&child, rest, value, create)?
    };
    d.insert(*head, new_child);
    Ok(Value::Document(d))
}

/// Removes the value at a dotted path, leaving intermediate structure
/// otherwise untouched. Removing a path that does not exist is a no-op.
pub fn path_unset(doc: &Value, path: &str) -> Value {
    let segments = split_path(path);
    path_unset_segments(doc, &segments)
}

fn path_unset_segments(v: &Value, segments: &[&str]) -> Value {
    let Some((head, rest)) = segments.split_first() else {
        return v.clone();
    };

    if let Ok(idx) = head.parse::<usize>() {
        if let Value::Array(items) = v {
            let mut items = items.clone();
            if let Some(child) = items.get(idx) {
                if rest.is_empty() {
                    // Unsetting an array index sets it to Null rather than
                    // shifting (matches the reference's `$unset` behavior
                    // on array elements).
                    items[idx] = Value::Null;
                } else {
                    let new_child = path_unset_segments(child, rest);
                    items[idx] = new_child;
                }
            }
            return Value::Array(items);
        }
        return v.clone();
    }

    if let Value::Document(d) = v {
        let mut d = d.clone();
        if let Some(child) = d.get(*head).cloned() {
            if rest.is_empty() {
                d.remove(head);
            } else {
                let new_child = path_unset_segments(&child, rest);
                d.insert(*head, new_child);
            }
        }
        return Value::Document(d);
    }
    v.clone()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Missing => write!(f, "missing"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int64(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{}", s),
            Value::Date(ms) => write!(f, "Date({})", ms),
            Value::ObjectId(o) => write!(f, "ObjectId(\"{}\")", o.to_hex()),
            Value::Regex(p, fl) => write!(f, "/{}/{}", p, fl),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, it) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", it)?;
                }
                write!(f, "]")
            }
            Value::Document(d) => {
                write!(f, "{{")?;
                for (i, (k, v)) in d.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}:{}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pairs: Vec<(&str, Value)>) -> Value {
        Value::Document(Document::from_pairs(
            pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        ))
    }

    #[test]
    fn bson_order_ranks_types_ascending() {
        assert_eq!(compare(&Value::Missing, &Value::Null), Ordering::Less);
        assert_eq!(compare(&Value::Null, &Value::Int64(0)), Ordering::Less);
        assert_eq!(
            compare(&Value::Int64(5), &Value::String("a".into())),
            Ordering::Less
        );
        assert_eq!(
            compare(&Value::String("z".into()), &doc(vec![])),
            Ordering::Less
        );
        assert_eq!(
            compare(&doc(vec![]), &Value::Array(vec![])),
            Ordering::Less
        );
        assert_eq!(
            compare(&Value::Array(vec![]), &Value::ObjectId(ObjectId::new())),
            Ordering::Less
        );
        assert_eq!(
            compare(&Value::ObjectId(ObjectId::new()), &Value::Bool(false)),
            Ordering::Less
        );
        assert_eq!(
            compare(&Value::Bool(true), &Value::Date(0)),
            Ordering::Less
        );
        assert_eq!(
            compare(&Value::Date(0), &Value::Regex("a".into(), "".into())),
            Ordering::Less
        );
    }

    #[test]
    fn int_and_double_order_equal_but_structurally_distinct() {
        let i = Value::Int64(1);
        let d = Value::Double(1.0);
        assert_eq!(compare(&i, &d), Ordering::Equal);
        assert!(!equal_structural(&i, &d));
    }

    #[test]
    fn nan_sorts_before_negative_infinity() {
        let nan = Value::Double(f64::NAN);
        let neg_inf = Value::Double(f64::NEG_INFINITY);
        assert_eq!(compare(&nan, &neg_inf), Ordering::Less);
    }

    #[test]
    fn arrays_compare_elementwise_prefix_shorter_is_smaller() {
        let a = Value::Array(vec![Value::Int64(1)]);
        let b = Value::Array(vec![Value::Int64(1), Value::Int64(2)]);
        assert_eq!(compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn documents_compare_by_insertion_ordered_keys() {
        let a = doc(vec![("a", Value::Int64(1)), ("b", Value::Int64(2))]);
        let b = doc(vec![("a", Value::Int64(1)), ("b", Value::Int64(3))]);
        assert_eq!(compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn path_get_flattens_across_arrays() {
        let d = doc(vec![(
            "a",
            Value::Array(vec![
                doc(vec![("b", Value::Int64(1))]),
                doc(vec![("b", Value::Int64(2))]),
            ]),
        )]);
        let r = path_get(&d, "a.b");
        assert_eq!(
            r,
            PathResult::FlatFromArray(vec![Value::Int64(1), Value::Int64(2)])
        );
    }

    #[test]
    fn path_get_missing_intermediate_is_missing_not_null() {
        let d = doc(vec![("a", Value::Int64(1))]);
        assert_eq!(path_get(&d, "x.y"), PathResult::Missing);
    }

    #[test]
    fn path_set_creates_intermediate_documents() {
        let d = doc(vec![]);
        let out = path_set(&d, "a.b.c", Value::Int64(5), true).unwrap();
        assert_eq!(path_get(&out, "a.b.c"), PathResult::Scalar(Value::Int64(5)));
    }

    #[test]
    fn path_set_without_create_errors_on_missing_intermediate() {
        let d = doc(vec![]);
        let err = path_set(&d, "a.b.c", Value::Int64(5), false).unwrap_err();
        assert!(matches!(err, AevumError::TypeMismatch(_)));
    }

    #[test]
    fn path_unset_removes_leaf_key() {
        let d = doc(vec![("a", Value::Int64(1)), ("b", Value::Int64(2))]);
        let out = path_unset(&d, "a");
        assert_eq!(path_get(&out, "a"), PathResult::Missing);
        assert_eq!(path_get(&out, "b"), PathResult::Scalar(Value::Int64(2)));
    }

    #[test]
    fn truthiness_matches_mongo_rules() {
        assert!(!is_truthy(&Value::Bool(false)));
        assert!(!is_truthy(&Value::Int64(0)));
        assert!(!is_truthy(&Value::Double(0.0)));
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&Value::Missing));
        assert!(is_truthy(&Value::String(String::new())));
        assert!(is_truthy(&Value::Int64(-1)));
    }

    #[test]
    fn type_name_distinguishes_null_and_missing() {
        assert_eq!(type_name(&Value::Null), "null");
        assert_eq!(type_name(&Value::Missing), "missing");
    }
}
