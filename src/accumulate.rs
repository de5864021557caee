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

//! # Accumulators & Partitioners
//!
//! `$group`'s per-bucket state machines, plus the partitioning/sorting logic
//! shared by every window-class stage (`$bucket`, `$bucketAuto`,
//! `$setWindowFields`, `$densify`, `$fill`). Numeric accumulators silently
//! ignore non-numeric operand values, mirroring the
//! reference's permissive aggregation behavior rather than erroring mid-group.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::value::{self, Value};

/// One running accumulator instance, as created fresh per distinct `_id`
/// bucket in `$group`.
#[derive(Debug, Clone)]
pub enum Accumulator {
    /// Running total plus whether every operand folded in so far was an
    /// `Int64` (mirrors `expr::arithmetic::numeric_result`'s int-preservation
    /// so `{$sum:1}` and `$sum` over integral fields yield `Int64`, not
    /// `Double`, matching the reference).
    Sum(f64, bool),
    Avg { sum: f64, count: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    First(Option<Value>),
    Last(Option<Value>),
    Push(Vec<Value>),
    AddToSet(Vec<Value>),
    MergeObjects(Value),
    StdDevPop(Vec<f64>),
    StdDevSamp(Vec<f64>),
    Count(u64),
}

impl Accumulator {
    pub fn new(kind: &str) -> Self {
        match kind {
            "sum" => Accumulator::Sum(0.0, true),
            "avg" => Accumulator::Avg { sum: 0.0, count: 0 },
            "min" => Accumulator::Min(None),
            "max" => Accumulator::Max(None),
            "first" => Accumulator::First(None),
            "last" => Accumulator::Last(None),
            "push" => Accumulator::Push(Vec::new()),
            "addToSet" => Accumulator::AddToSet(Vec::new()),
            "mergeObjects" => Accumulator::MergeObjects(Value::Document(Default::default())),
            "stdDevPop" => Accumulator::StdDevPop(Vec::new()),
            "stdDevSamp" => Accumulator::StdDevSamp(Vec::new()),
            "count" => Accumulator::Count(0),
            other => panic!("unknown accumulator kind: {}", other),
        }
    }

    /// Folds one document's operand value into this accumulator's state.
    /// `$first`/`$last` capture by stage-input order: since
    /// `$group` folds documents in input order, "last write wins" for
    /// `Last` and "first write wins" (a no-op after the first) for `First`
    /// fall straight out of sequential folding.
    pub fn accumulate(&mut self, operand: &Value) {
        match self {
            Accumulator::Sum(acc, all_int) => {
                if let Some(n) = as_number(operand) {
                    *acc += n;
                    *all_int &= is_int(operand);
                }
            }
            Accumulator::Avg { sum, count } => {
                if let Some(n) = as_number(operand) {
                    *sum += n;
                    *count += 1;
                }
            }
            Accumulator::Min(cur) => update_extreme(cur, operand, Ordering::Less),
            Accumulator::Max(cur) => update_extreme(cur, operand, Ordering::Greater),
            Accumulator::First(cur) => {
                if cur.is_none() {
                    *cur = Some(operand.clone());
                }
            }
            Accumulator::Last(cur) => {
                *cur = Some(operand.clone());
            }
            Accumulator::Push(items) => items.push(operand.clone()),
            Accumulator::AddToSet(items) => {
                if !items.iter().any(|v| value::equal_structural(v, operand)) {
                    items.push(operand.clone());
                }
            }
            Accumulator::MergeObjects(acc) => {
                if let Value::Document(incoming) = operand {
                    if !incoming.is_empty() {
                        if let Value::Document(existing) = acc {
                            let mut merged = existing.clone();
                            for (k, v) in incoming.iter() {
                                merged.insert(k.clone(), v.clone());
                            }
                            *acc = Value::Document(merged);
                        }
                    }
                }
            }
            Accumulator::StdDevPop(samples) | Accumulator::StdDevSamp(samples) => {
                if let Some(n) = as_number(operand) {
                    samples.push(n);
                }
            }
            Accumulator::Count(n) => *n += 1,
        }
    }

    /// Reads out the final accumulated value.
    pub fn get_result(&self) -> Value {
        match self {
            Accumulator::Sum(acc, all_int) => numeric_result(*all_int, *acc),
            Accumulator::Avg { sum, count } => {
                if *count == 0 {
                    Value::Null
                } else {
                    Value::Double(sum / *count as f64)
                }
            }
            Accumulator::Min(cur) => cur.clone().unwrap_or(Value::Null),
            Accumulator::Max(cur) => cur.clone().unwrap_or(Value::Null),
            Accumulator::First(cur) => cur.clone().unwrap_or(Value::Null),
            Accumulator::Last(cur) => cur.clone().unwrap_or(Value::Null),
            Accumulator::Push(items) => Value::Array(items.clone()),
            Accumulator::AddToSet(items) => Value::Array(items.clone()),
            Accumulator::MergeObjects(acc) => acc.clone(),
            Accumulator::StdDevPop(samples) => std_dev(samples, 0),
            Accumulator::StdDevSamp(samples) => std_dev(samples, 1),
            Accumulator::Count(n) => Value::Int64(*n as i64),
        }
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Int64(i) => Some(*i as f64),
        Value::Double(d) => Some(*d),
        _ => None,
    }
}

fn is_int(v: &Value) -> bool {
    matches!(v, Value::Int64(_))
}

/// Mirrors `expr::arithmetic::numeric_result`: a running total stays an
/// `Int64` when every folded operand was integral and the total is still
/// representable, otherwise it widens to `Double`.
fn numeric_result(all_int: bool, total: f64) -> Value {
    if all_int && total.fract() == 0.0 && total.abs() < i64::MAX as f64 {
        Value::Int64(total as i64)
    } else {
        Value::Double(total)
    }
}

fn update_extreme(cur: &mut Option<Value>, candidate: &Value, keep_if: Ordering) {
    match cur {
        None => *cur = Some(candidate.clone()),
        Some(existing) => {
            if value::compare(candidate, existing) == keep_if {
                *cur = Some(candidate.clone());
            }
        }
    }
}

/// Two-pass mean-then-variance; `ddof` is 0 for population,
/// 1 for sample. Sample stddev of fewer than two samples is `Null`.
fn std_dev(samples: &[f64], ddof: usize) -> Value {
    let n = samples.len();
    if n == 0 || (ddof == 1 && n < 2) {
        return Value::Null;
    }
    let mean = samples.iter().sum::<f64>() / n as f64;
    let variance =
        samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - ddof) as f64;
    Value::Double(variance.sqrt())
}

/// A stable serialization of a partition-key tuple, used as a hash map key.
/// A JSON-like canonical form is sufficient here — the key is never shown
/// to the user, only used for bucketing.
fn canonical_key(v: &Value) -> String {
    crate::json::to_json_string(v)
}

/// Groups documents into partitions keyed by an arbitrary per-document
/// [`Value`] (typically the evaluated `partitionBy` expression or a
/// `partitionByFields` tuple assembled by the caller), preserving each
/// partition's first-seen order across the whole input and each document's
/// original position within its partition.
pub struct Partitioner {
    order: Vec<String>,
    keys: HashMap<String, Value>,
    members: HashMap<String, Vec<Value>>,
}

impl Partitioner {
    pub fn new() -> Self {
        Partitioner {
            order: Vec::new(),
            keys: HashMap::new(),
            members: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: Value, doc: Value) {
        let k = canonical_key(&key);
        if !self.members.contains_key(&k) {
            self.order.push(k.clone());
            self.keys.insert(k.clone(), key);
        }
        self.members.entry(k).or_default().push(doc);
    }

    /// Partitions in first-seen order, each as `(key, documents)`.
    pub fn into_partitions(self) -> Vec<(Value, Vec<Value>)> {
        let Partitioner {
            order,
            mut keys,
            mut members,
        } = self;
        order
            .into_iter()
            .map(|k| {
                let key = keys.remove(&k).unwrap();
                let docs = members.remove(&k).unwrap();
                (key, docs)
            })
            .collect()
    }
}

impl Default for Partitioner {
    fn default() -> Self {
        Self::new()
    }
}

/// A single sort key: a dotted field path plus direction.
#[derive(Debug, Clone)]
pub struct SortKey {
    pub path: String,
    pub ascending: bool,
}

/// Stable multi-key sort over a partition's documents, using `value::compare` per key in order.
pub fn sort_partition(docs: &mut [Value], keys: &[SortKey]) {
    docs.sort_by(|a, b| {
        for key in keys {
            let va = crate::value::path_get(a, &key.path).into_scalar();
            let vb = crate::value::path_get(b, &key.path).into_scalar();
            let ord = value::compare(&va, &vb);
            let ord = if key.ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_ignores_non_numeric_operands() {
        let mut acc = Accumulator::new("sum");
        acc.accumulate(&Value::Int64(1));
        acc.accumulate(&Value::String("x".into()));
        acc.accumulate(&Value::Int64(2));
        assert_eq!(acc.get_result(), Value::Int64(3));
    }

    #[test]
    fn sum_of_all_integers_stays_integral() {
        let mut acc = Accumulator::new("sum");
        acc.accumulate(&Value::Int64(1));
        acc.accumulate(&Value::Int64(1));
        assert_eq!(acc.get_result(), Value::Int64(2));
    }

    #[test]
    fn sum_widens_to_double_when_any_operand_is_double() {
        let mut acc = Accumulator::new("sum");
        acc.accumulate(&Value::Int64(1));
        acc.accumulate(&Value::Double(1.5));
        assert_eq!(acc.get_result(), Value::Double(2.5));
    }

    #[test]
    fn first_and_last_capture_by_input_order() {
        let mut first = Accumulator::new("first");
        let mut last = Accumulator::new("last");
        for v in [Value::Int64(1), Value::Int64(2), Value::Int64(3)] {
            first.accumulate(&v);
            last.accumulate(&v);
        }
        assert_eq!(first.get_result(), Value::Int64(1));
        assert_eq!(last.get_result(), Value::Int64(3));
    }

    #[test]
    fn add_to_set_dedupes_structurally() {
        let mut acc = Accumulator::new("addToSet");
        acc.accumulate(&Value::Int64(1));
        acc.accumulate(&Value::Int64(1));
        acc.accumulate(&Value::Int64(2));
        assert_eq!(acc.get_result(), Value::Array(vec![Value::Int64(1), Value::Int64(2)]));
    }

    #[test]
    fn std_dev_samp_requires_two_samples() {
        let mut acc = Accumulator::new("stdDevSamp");
        acc.accumulate(&Value::Int64(5));
        assert_eq!(acc.get_result(), Value::Null);
        acc.accumulate(&Value::Int64(7));
        assert_ne!(acc.get_result(), Value::Null);
    }

    #[test]
    fn partitioner_preserves_first_seen_order() {
        let mut p = Partitioner::new();
        p.insert(Value::String("b".into()), Value::Int64(1));
        p.insert(Value::String("a".into()), Value::Int64(2));
        p.insert(Value::String("b".into()), Value::Int64(3));
        let parts = p.into_partitions();
        assert_eq!(parts[0].0, Value::String("b".into()));
        assert_eq!(parts[1].0, Value::String("a".into()));
        assert_eq!(parts[0].1.len(), 2);
    }

    #[test]
    fn merge_objects_empty_document_does_not_overwrite() {
        let mut acc = Accumulator::new("mergeObjects");
        acc.accumulate(&crate::json::from_json(&serde_json::json!({"x": 1})));
        acc.accumulate(&crate::json::from_json(&serde_json::json!({})));
        assert_eq!(
            acc.get_result(),
            crate::json::from_json(&serde_json::json!({"x": 1}))
        );
    }
}
