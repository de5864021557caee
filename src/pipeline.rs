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

//! # Pipeline Executor
//!
//! Drives the full aggregation stage list, generalized from a fixed
//! filter/sort/paginate/project sequence into a stage-enum dispatch.
//! Execution here materializes the document sequence between stages rather
//! than truly streaming — per-stage semantics like "stable sort" and
//! "insertion order of distinct keys" matter far more than lazy pull-based
//! execution does, and a single-threaded, fully-materialized `Vec<Value>`
//! pipe is the simplest thing that is observably correct. `$$ROOT`/
//! `$$CURRENT` are rebound at the start of each stage to that stage's
//! current input document.

use std::collections::HashSet;

use tracing::{debug, instrument};

use crate::accumulate::{self, Accumulator, Partitioner, SortKey};
use crate::error::{AevumError, AevumResult};
use crate::expr::{self, Env};
use crate::projection;
use crate::storage::Storage;
use crate::value::{self, Document, Value};

/// Threads the pieces every stage needs but that aren't part of the
/// document stream itself: the storage port (for `$lookup`/`$graphLookup`/
/// `$out`/`$merge`), and the frozen pipeline-start clock.
pub struct PipelineContext<'a> {
    pub storage: &'a Storage,
    pub now: i64,
}

/// Runs a pipeline (an array of one-stage documents) over `input`,
/// returning the final document sequence.
#[instrument(skip(input, ctx))]
pub fn run(pipeline: &Value, input: Vec<Value>, ctx: &PipelineContext) -> AevumResult<Vec<Value>> {
    run_with_vars(pipeline, input, ctx, &[])
}

/// Like [`run`], but seeds every stage's expression environment with extra
/// `$$name` variable bindings — used by `$lookup`'s `let`-bound sub-pipeline
/// form.
pub fn run_with_vars(
    pipeline: &Value,
    mut docs: Vec<Value>,
    ctx: &PipelineContext,
    extra_vars: &[(String, Value)],
) -> AevumResult<Vec<Value>> {
    let stages = match pipeline {
        Value::Array(items) => items,
        _ => return Err(AevumError::bad_input("pipeline must be an array of stages")),
    };

    for (i, stage) in stages.iter().enumerate() {
        let (name, spec) = one_stage(stage)?;
        if name == "$text" {
            return Err(AevumError::bad_input("'$text' is not a pipeline stage"));
        }
        debug!(stage = name.as_str(), index = i, docs = docs.len(), "pipeline stage");
        docs = run_stage(&name, spec, docs, ctx, extra_vars)?;
    }
    Ok(docs)
}

fn one_stage(stage: &Value) -> AevumResult<(String, &Value)> {
    match stage {
        Value::Document(d) if d.len() == 1 => {
            let (k, v) = d.iter().next().unwrap();
            Ok((k.clone(), v))
        }
        _ => Err(AevumError::bad_input(
            "each pipeline stage must be a document with exactly one key",
        )),
    }
}

fn env_for(doc: &Value, now: i64, extra_vars: &[(String, Value)]) -> Env {
    let mut env = Env::new(doc.clone(), now);
    for (name, val) in extra_vars {
        env = env.with_var(name.clone(), val.clone());
    }
    env
}

fn eval_expr(e: &Value, doc: &Value, now: i64, extra_vars: &[(String, Value)]) -> AevumResult<Value> {
    let env = env_for(doc, now, extra_vars);
    let compiled = expr::compile(e);
    expr::eval(&compiled, &env)
}

#[allow(clippy::too_many_lines)]
fn run_stage(
    name: &str,
    spec: &Value,
    docs: Vec<Value>,
    ctx: &PipelineContext,
    extra_vars: &[(String, Value)],
) -> AevumResult<Vec<Value>> {
    match name {
        "$match" => stage_match(spec, docs, ctx.now, extra_vars),
        "$project" => stage_project(spec, docs, None),
        "$addFields" | "$set" => stage_add_fields(spec, docs, ctx.now, extra_vars),
        "$unset" => stage_unset(spec, docs),
        "$replaceRoot" => stage_replace_root(spec, docs, ctx.now, extra_vars),
        "$replaceWith" => {
            let mut d = Document::new();
            d.insert("newRoot", spec.clone());
            stage_replace_root(&Value::Document(d), docs, ctx.now, extra_vars)
        }
        "$sort" => stage_sort(spec, docs),
        "$skip" => {
            let n = as_usize(spec)?;
            Ok(docs.into_iter().skip(n).collect())
        }
        "$limit" => {
            let n = as_usize(spec)?;
            Ok(docs.into_iter().take(n).collect())
        }
        "$count" => stage_count(spec, docs),
        "$group" => stage_group(spec, docs, ctx.now, extra_vars),
        "$unwind" => stage_unwind(spec, docs),
        "$lookup" => stage_lookup(spec, docs, ctx),
        "$graphLookup" => stage_graph_lookup(spec, docs, ctx),
        "$bucket" => stage_bucket(spec, docs, ctx.now, extra_vars),
        "$bucketAuto" => stage_bucket_auto(spec, docs, ctx.now, extra_vars),
        "$facet" => stage_facet(spec, docs, ctx),
        "$out" => stage_out(spec, docs, ctx),
        "$merge" => stage_merge(spec, docs, ctx),
        "$geoNear" => stage_geo_near(spec, docs, ctx),
        "$setWindowFields" => stage_set_window_fields(spec, docs, ctx.now),
        "$densify" => stage_densify(spec, docs),
        "$fill" => stage_fill(spec, docs),
        other => Err(AevumError::UnknownOperator(other.to_string())),
    }
}

fn as_usize(spec: &Value) -> AevumResult<usize> {
    match spec {
        Value::Int64(n) if *n >= 0 => Ok(*n as usize),
        Value::Double(d) if *d >= 0.0 => Ok(*d as usize),
        _ => Err(AevumError::bad_input("expected a non-negative integer")),
    }
}

// ---------------------------------------------------------------------
// $match / $text
// ---------------------------------------------------------------------

fn stage_match(
    spec: &Value,
    docs: Vec<Value>,
    now: i64,
    extra_vars: &[(String, Value)],
) -> AevumResult<Vec<Value>> {
    let filter_doc = match spec {
        Value::Document(d) => d,
        _ => return Err(AevumError::bad_input("$match requires a document")),
    };
    if let Some(text_clause) = filter_doc.get("$text") {
        // $text must stand alone at the top of its $match;
        // any other sibling clauses still apply as an ordinary conjunction
        // over the text-filtered candidates.
        let scored = crate::textsearch::score(&docs, text_clause)?;
        let mut rest = filter_doc.clone();
        rest.remove("$text");
        let mut out = Vec::new();
        for (doc, score) in scored {
            let keep = rest.is_empty() || match_with_vars(&rest, &doc, now, extra_vars)?;
            if keep {
                out.push(with_text_score(doc, score));
            }
        }
        return Ok(out);
    }
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        if match_with_vars(filter_doc, &doc, now, extra_vars)? {
            out.push(doc);
        }
    }
    Ok(out)
}

/// `match_engine::matches` evaluates `$expr` with no pipeline `$$NOW`/`let`
/// bindings (it is shared by `$merge`/storage predicates that have neither).
/// A `$match` stage needs both, so a top-level `$expr` clause is pulled out
/// and evaluated with the stage's own environment; everything else is still
/// delegated to the general matcher.
fn match_with_vars(
    filter_doc: &Document,
    doc: &Value,
    now: i64,
    extra_vars: &[(String, Value)],
) -> AevumResult<bool> {
    match filter_doc.get("$expr") {
        Some(expr_clause) if extra_vars.is_empty() && filter_doc.len() == 1 => {
            // No extra bindings needed and `$expr` is the whole filter:
            // the generic matcher's own (var-less) handling is sufficient.
            let _ = expr_clause;
            crate::match_engine::matches(doc, &Value::Document(filter_doc.clone()))
        }
        Some(expr_clause) => {
            let v = eval_expr(expr_clause, doc, now, extra_vars)?;
            if !value::is_truthy(&v) {
                return Ok(false);
            }
            let mut rest = filter_doc.clone();
            rest.remove("$expr");
            if rest.is_empty() {
                Ok(true)
            } else {
                crate::match_engine::matches(doc, &Value::Document(rest))
            }
        }
        None => crate::match_engine::matches(doc, &Value::Document(filter_doc.clone())),
    }
}

/// Stashes a `$text` match score on the document under a private key so a
/// later `$project: {s: {$meta: "textScore"}}` can retrieve it. The key is
/// stripped from any `$project`/`$group` output automatically because it is
/// never named explicitly and `$project`'s computed-field form only reads
/// named source fields.
const TEXT_SCORE_KEY: &str = "__aevum_text_score";

fn with_text_score(doc: Value, score: f64) -> Value {
    match doc {
        Value::Document(mut d) => {
            d.insert(TEXT_SCORE_KEY, Value::Double(score));
            Value::Document(d)
        }
        other => other,
    }
}

fn take_text_score(doc: &Value) -> Option<f64> {
    match doc {
        Value::Document(d) => match d.get(TEXT_SCORE_KEY) {
            Some(Value::Double(s)) => Some(*s),
            _ => None,
        },
        _ => None,
    }
}

fn strip_text_score(doc: Value) -> Value {
    match doc {
        Value::Document(mut d) => {
            d.remove(TEXT_SCORE_KEY);
            Value::Document(d)
        }
        other => other,
    }
}

// ---------------------------------------------------------------------
// $project / $addFields / $set / $unset / $replaceRoot
// ---------------------------------------------------------------------

fn stage_project(spec: &Value, docs: Vec<Value>, _now: Option<i64>) -> AevumResult<Vec<Value>> {
    docs.into_iter()
        .map(|doc| {
            let score = take_text_score(&doc);
            let clean = strip_text_score(doc);
            projection::project(&clean, spec, score)
        })
        .collect()
}

fn stage_add_fields(
    spec: &Value,
    docs: Vec<Value>,
    now: i64,
    extra_vars: &[(String, Value)],
) -> AevumResult<Vec<Value>> {
    let fields = match spec {
        Value::Document(d) => d,
        _ => return Err(AevumError::bad_input("$addFields/$set requires a document")),
    };
    docs.into_iter()
        .map(|doc| {
            let mut out = match &doc {
                Value::Document(d) => d.clone(),
                _ => Document::new(),
            };
            for (key, e) in fields.iter() {
                let v = eval_expr(e, &doc, now, extra_vars)?;
                if v == Value::Missing {
                    out.remove(key);
                } else {
                    out.insert(key.clone(), v);
                }
            }
            Ok(Value::Document(out))
        })
        .collect()
}

fn stage_unset(spec: &Value, docs: Vec<Value>) -> AevumResult<Vec<Value>> {
    let fields: Vec<String> = match spec {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.clone()),
                _ => Err(AevumError::bad_input("$unset array must contain strings")),
            })
            .collect::<AevumResult<Vec<_>>>()?,
        _ => return Err(AevumError::bad_input("$unset requires a string or array of strings")),
    };
    Ok(docs
        .into_iter()
        .map(|doc| {
            let mut out = doc;
            for f in &fields {
                out = value::path_unset(&out, f);
            }
            out
        })
        .collect())
}

fn stage_replace_root(
    spec: &Value,
    docs: Vec<Value>,
    now: i64,
    extra_vars: &[(String, Value)],
) -> AevumResult<Vec<Value>> {
    let new_root_expr = match spec {
        Value::Document(d) => d.get("newRoot").ok_or_else(|| {
            AevumError::missing_required("$replaceRoot requires a 'newRoot' expression")
        })?,
        _ => return Err(AevumError::bad_input("$replaceRoot requires a document")),
    };
    docs.into_iter()
        .map(|doc| {
            let v = eval_expr(new_root_expr, &doc, now, extra_vars)?;
            match v {
                Value::Document(_) => Ok(v),
                _ => Err(AevumError::type_mismatch(
                    "'newRoot' expression must evaluate to an object",
                )),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------
// $sort / $count
// ---------------------------------------------------------------------

fn parse_sort_spec(spec: &Value) -> AevumResult<Vec<SortKey>> {
    let d = match spec {
        Value::Document(d) => d,
        _ => return Err(AevumError::bad_input("$sort requires a document")),
    };
    let mut keys = Vec::with_capacity(d.len());
    for (path, dir) in d.iter() {
        let ascending = match dir {
            Value::Int64(n) => *n >= 0,
            Value::Double(n) => *n >= 0.0,
            _ => return Err(AevumError::bad_input("sort direction must be 1 or -1")),
        };
        keys.push(SortKey {
            path: path.clone(),
            ascending,
        });
    }
    Ok(keys)
}

fn stage_sort(spec: &Value, mut docs: Vec<Value>) -> AevumResult<Vec<Value>> {
    let keys = parse_sort_spec(spec)?;
    accumulate::sort_partition(&mut docs, &keys);
    Ok(docs)
}

fn stage_count(spec: &Value, docs: Vec<Value>) -> AevumResult<Vec<Value>> {
    let field = match spec {
        Value::String(s) => s.clone(),
        _ => return Err(AevumError::bad_input("$count requires a field name string")),
    };
    let mut d = Document::new();
    d.insert(field, Value::Int64(docs.len() as i64));
    Ok(vec![Value::Document(d)])
}

// ---------------------------------------------------------------------
// $group
// ---------------------------------------------------------------------

fn stage_group(
    spec: &Value,
    docs: Vec<Value>,
    now: i64,
    extra_vars: &[(String, Value)],
) -> AevumResult<Vec<Value>> {
    let fields = match spec {
        Value::Document(d) => d,
        _ => return Err(AevumError::bad_input("$group requires a document")),
    };
    let id_expr = fields
        .get("_id")
        .ok_or_else(|| AevumError::missing_required("$group requires an '_id' expression"))?;

    let mut accum_specs: Vec<(String, String, Value)> = Vec::new();
    for (key, v) in fields.iter() {
        if key == "_id" {
            continue;
        }
        let d = match v {
            Value::Document(d) if d.len() == 1 => d,
            _ => {
                return Err(AevumError::bad_input(format!(
                    "$group field '{}' must be a single-operator accumulator document",
                    key
                )))
            }
        };
        let (op_name, op_arg) = d.iter().next().unwrap();
        if !op_name.starts_with('$') {
            return Err(AevumError::UnknownOperator(op_name.clone()));
        }
        let kind = &op_name[1..];
        accum_specs.push((key.clone(), kind.to_string(), op_arg.clone()));
    }

    // Order of distinct _id keys must match first-seen order.
    let mut order: Vec<Value> = Vec::new();
    let mut seen: Vec<(Value, Vec<Accumulator>)> = Vec::new();

    for doc in &docs {
        let key = eval_expr(id_expr, doc, now, extra_vars)?;
        let pos = seen.iter().position(|(k, _)| value::equal_structural(k, &key));
        let idx = match pos {
            Some(i) => i,
            None => {
                let accs = accum_specs
                    .iter()
                    .map(|(_, kind, _)| {
                        if kind == "count" {
                            Accumulator::new("sum")
                        } else {
                            Accumulator::new(kind)
                        }
                    })
                    .collect();
                seen.push((key.clone(), accs));
                order.push(key);
                seen.len() - 1
            }
        };
        for (i, (_, kind, op_arg)) in accum_specs.iter().enumerate() {
            let operand = if kind == "count" {
                Value::Int64(1)
            } else {
                eval_expr(op_arg, doc, now, extra_vars)?
            };
            seen[idx].1[i].accumulate(&operand);
        }
    }

    let mut out = Vec::with_capacity(seen.len());
    for key in order {
        let idx = seen.iter().position(|(k, _)| value::equal_structural(k, &key)).unwrap();
        let (id_val, accs) = &seen[idx];
        let mut d = Document::new();
        d.insert("_id", id_val.clone());
        for (i, (name, _, _)) in accum_specs.iter().enumerate() {
            d.insert(name.clone(), accs[i].get_result());
        }
        out.push(Value::Document(d));
    }
    Ok(out)
}

// ---------------------------------------------------------------------
// $unwind
// ---------------------------------------------------------------------

fn stage_unwind(spec: &Value, docs: Vec<Value>) -> AevumResult<Vec<Value>> {
    let (path, preserve_empty, include_index) = match spec {
        Value::String(s) => (s.trim_start_matches('$').to_string(), false, None),
        Value::Document(d) => {
            let path = match d.get("path") {
                Some(Value::String(s)) => s.trim_start_matches('$').to_string(),
                _ => return Err(AevumError::missing_required("$unwind requires a 'path' field")),
            };
            let preserve = matches!(d.get("preserveNullAndEmptyArrays"), Some(Value::Bool(true)));
            let idx_field = match d.get("includeArrayIndex") {
                Some(Value::String(s)) => Some(s.clone()),
                _ => None,
            };
            (path, preserve, idx_field)
        }
        _ => return Err(AevumError::bad_input("$unwind requires a string or document")),
    };

    let mut out = Vec::new();
    for doc in docs {
        let items = match value::path_get(&doc, &path).into_scalar() {
            Value::Array(items) => items,
            Value::Missing | Value::Null => {
                if preserve_empty {
                    out.push(with_unwound_index(
                        value::path_unset(&doc, &path),
                        include_index.as_deref(),
                        None,
                    ));
                }
                continue;
            }
            single => vec![single],
        };
        if items.is_empty() {
            if preserve_empty {
                out.push(with_unwound_index(
                    value::path_unset(&doc, &path),
                    include_index.as_deref(),
                    None,
                ));
            }
            continue;
        }
        for (i, item) in items.into_iter().enumerate() {
            let replaced = value::path_set(&doc, &path, item, true)
                .unwrap_or_else(|_| doc.clone());
            out.push(with_unwound_index(replaced, include_index.as_deref(), Some(i)));
        }
    }
    Ok(out)
}

fn with_unwound_index(doc: Value, idx_field: Option<&str>, idx: Option<usize>) -> Value {
    match (idx_field, &doc) {
        (Some(field), Value::Document(d)) => {
            let mut d = d.clone();
            d.insert(
                field,
                idx.map(|i| Value::Int64(i as i64)).unwrap_or(Value::Null),
            );
            Value::Document(d)
        }
        _ => doc,
    }
}

// ---------------------------------------------------------------------
// $lookup
// ---------------------------------------------------------------------

fn stage_lookup(spec: &Value, docs: Vec<Value>, ctx: &PipelineContext) -> AevumResult<Vec<Value>> {
    let d = match spec {
        Value::Document(d) => d,
        _ => return Err(AevumError::bad_input("$lookup requires a document")),
    };
    let from = match d.get("from") {
        Some(Value::String(s)) => s.clone(),
        _ => return Err(AevumError::missing_required("$lookup requires a 'from' collection name")),
    };
    let as_field = match d.get("as") {
        Some(Value::String(s)) => s.clone(),
        _ => return Err(AevumError::missing_required("$lookup requires an 'as' field name")),
    };
    let foreign = ctx.storage.get_collection(&from);
    let foreign_docs = foreign.all();

    if let Some(pipeline_spec) = d.get("pipeline") {
        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            let bound_vars = match d.get("let") {
                Some(Value::Document(lv)) => {
                    let mut vars = Vec::new();
                    for (name, e) in lv.iter() {
                        let v = eval_expr(e, &doc, ctx.now, &[])?;
                        vars.push((name.clone(), v));
                    }
                    vars
                }
                _ => Vec::new(),
            };
            let matched = run_with_vars(pipeline_spec, foreign_docs.clone(), ctx, &bound_vars)?;
            out.push(augment(doc, &as_field, matched));
        }
        return Ok(out);
    }

    let local_field = match d.get("localField") {
        Some(Value::String(s)) => s.clone(),
        _ => return Err(AevumError::missing_required("$lookup requires 'localField'")),
    };
    let foreign_field = match d.get("foreignField") {
        Some(Value::String(s)) => s.clone(),
        _ => return Err(AevumError::missing_required("$lookup requires 'foreignField'")),
    };

    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        let local_vals = value::path_get(&doc, &local_field).into_multiset();
        let matched: Vec<Value> = foreign_docs
            .iter()
            .filter(|fd| {
                let fval = value::path_get(fd, &foreign_field).into_scalar();
                local_vals.iter().any(|lv| value::equal_structural(lv, &fval))
            })
            .cloned()
            .collect();
        out.push(augment(doc, &as_field, matched));
    }
    Ok(out)
}

fn augment(doc: Value, field: &str, matched: Vec<Value>) -> Value {
    match doc {
        Value::Document(mut d) => {
            d.insert(field.to_string(), Value::Array(matched));
            Value::Document(d)
        }
        other => other,
    }
}

// ---------------------------------------------------------------------
// $graphLookup
// ---------------------------------------------------------------------

fn stage_graph_lookup(spec: &Value, docs: Vec<Value>, ctx: &PipelineContext) -> AevumResult<Vec<Value>> {
    let d = match spec {
        Value::Document(d) => d,
        _ => return Err(AevumError::bad_input("$graphLookup requires a document")),
    };
    let from = match d.get("from") {
        Some(Value::String(s)) => s.clone(),
        _ => return Err(AevumError::missing_required("$graphLookup requires 'from'")),
    };
    let start_with = d
        .get("startWith")
        .ok_or_else(|| AevumError::missing_required("$graphLookup requires 'startWith'"))?;
    let connect_from = match d.get("connectFromField") {
        Some(Value::String(s)) => s.clone(),
        _ => return Err(AevumError::missing_required("$graphLookup requires 'connectFromField'")),
    };
    let connect_to = match d.get("connectToField") {
        Some(Value::String(s)) => s.clone(),
        _ => return Err(AevumError::missing_required("$graphLookup requires 'connectToField'")),
    };
    let as_field = match d.get("as") {
        Some(Value::String(s)) => s.clone(),
        _ => return Err(AevumError::missing_required("$graphLookup requires 'as'")),
    };
    let depth_field = match d.get("depthField") {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };
    let max_depth = match d.get("maxDepth") {
        Some(Value::Int64(n)) => *n as u64,
        _ => u64::MAX,
    };
    let restrict = d.get("restrictSearchWithMatch").cloned();

    let foreign = ctx.storage.get_collection(&from);
    let candidates = foreign.all();

    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        let seeds = eval_expr(start_with, &doc, ctx.now, &[])?;
        let seed_vals: Vec<Value> = match seeds {
            Value::Array(items) => items,
            other => vec![other],
        };

        let mut visited: HashSet<Value> = HashSet::new();
        let mut result_docs: Vec<Value> = Vec::new();
        let mut frontier = seed_vals;
        let mut depth = 0u64;

        while !frontier.is_empty() && depth <= max_depth {
            let mut next_frontier = Vec::new();
            for target in &frontier {
                for cand in &candidates {
                    let cand_id = match cand {
                        Value::Document(cd) => match cd.get("_id") {
                            Some(id) => id.clone(),
                            None => continue,
                        },
                        _ => continue,
                    };
                    if visited.contains(&IdKey(cand_id.clone()).0) {
                        continue;
                    }
                    let to_val = value::path_get(cand, &connect_to).into_scalar();
                    if !value::equal_structural(&to_val, target) {
                        continue;
                    }
                    if let Some(restrict) = &restrict {
                        if !crate::match_engine::matches(cand, restrict)? {
                            continue;
                        }
                    }
                    visited.insert(cand_id.clone());
                    let annotated = annotate_depth(cand.clone(), depth_field.as_deref(), depth);
                    let from_val = value::path_get(&annotated, &connect_from).into_scalar();
                    match from_val {
                        Value::Array(items) => next_frontier.extend(items),
                        Value::Missing | Value::Null => {}
                        v => next_frontier.push(v),
                    }
                    result_docs.push(annotated);
                }
            }
            frontier = next_frontier;
            depth += 1;
        }

        out.push(augment(doc, &as_field, result_docs));
    }
    Ok(out)
}

/// `HashSet<Value>` needs `Value: Hash`, which it doesn't implement (`Value`
/// carries `f64`). Graph node identity only ever needs `_id` equality, so a
/// thin wrapper hashes via the canonical JSON text instead.
struct IdKey(Value);
impl std::hash::Hash for IdKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        crate::json::to_json_string(&self.0).hash(state);
    }
}
impl PartialEq for IdKey {
    fn eq(&self, other: &Self) -> bool {
        value::equal_structural(&self.0, &other.0)
    }
}
impl Eq for IdKey {}

fn annotate_depth(doc: Value, field: Option<&str>, depth: u64) -> Value {
    match (field, doc) {
        (Some(f), Value::Document(mut d)) => {
            d.insert(f, Value::Int64(depth as i64));
            Value::Document(d)
        }
        (None, doc) => doc,
        (Some(_), other) => other,
    }
}

// ---------------------------------------------------------------------
// $bucket / $bucketAuto
// ---------------------------------------------------------------------

fn stage_bucket(
    spec: &Value,
    docs: Vec<Value>,
    now: i64,
    extra_vars: &[(String, Value)],
) -> AevumResult<Vec<Value>> {
    let d = match spec {
        Value::Document(d) => d,
        _ => return Err(AevumError::bad_input("$bucket requires a document")),
    };
    let group_by = d
        .get("groupBy")
        .ok_or_else(|| AevumError::missing_required("$bucket requires 'groupBy'"))?;
    let boundaries = match d.get("boundaries") {
        Some(Value::Array(items)) if items.len() >= 2 => items.clone(),
        _ => return Err(AevumError::bad_input("$bucket requires >= 2 'boundaries'")),
    };
    let default_bucket = d.get("default").cloned();

    let mut buckets: Vec<(Value, Vec<Value>)> = boundaries
        .windows(2)
        .map(|w| (w[0].clone(), Vec::new()))
        .collect();
    let mut default_docs: Vec<Value> = Vec::new();

    for doc in docs {
        let key = eval_expr(group_by, &doc, now, extra_vars)?;
        let mut placed = false;
        for i in 0..boundaries.len() - 1 {
            let lo = &boundaries[i];
            let hi = &boundaries[i + 1];
            if value::compare(&key, lo) != std::cmp::Ordering::Less
                && value::compare(&key, hi) == std::cmp::Ordering::Less
            {
                buckets[i].1.push(doc.clone());
                placed = true;
                break;
            }
        }
        if !placed {
            if default_bucket.is_some() {
                default_docs.push(doc);
            } else {
                return Err(AevumError::bad_input(
                    "$bucket document does not fall into any bucket and no 'default' was specified",
                ));
            }
        }
    }

    let output_spec = d.get("output").cloned();
    let mut out = Vec::new();
    for (lower, members) in buckets {
        out.push(build_bucket_doc(lower, members, &output_spec, now, extra_vars)?);
    }
    if let Some(default_id) = default_bucket {
        if !default_docs.is_empty() {
            out.push(build_bucket_doc(default_id, default_docs, &output_spec, now, extra_vars)?);
        }
    }
    Ok(out)
}

fn build_bucket_doc(
    id: Value,
    members: Vec<Value>,
    output_spec: &Option<Value>,
    now: i64,
    extra_vars: &[(String, Value)],
) -> AevumResult<Value> {
    let mut d = Document::new();
    d.insert("_id", id);
    match output_spec {
        Some(Value::Document(fields)) => {
            for (name, acc_spec) in fields.iter() {
                let acc_doc = match acc_spec {
                    Value::Document(ad) if ad.len() == 1 => ad,
                    _ => {
                        return Err(AevumError::bad_input(
                            "bucket 'output' fields must be single-operator accumulators",
                        ))
                    }
                };
                let (kind, arg) = acc_doc.iter().next().unwrap();
                let mut acc = Accumulator::new(&kind[1..]);
                for m in &members {
                    let operand = eval_expr(arg, m, now, extra_vars)?;
                    acc.accumulate(&operand);
                }
                d.insert(name.clone(), acc.get_result());
            }
        }
        _ => {
            d.insert("count", Value::Int64(members.len() as i64));
        }
    }
    Ok(Value::Document(d))
}

fn stage_bucket_auto(
    spec: &Value,
    docs: Vec<Value>,
    now: i64,
    extra_vars: &[(String, Value)],
) -> AevumResult<Vec<Value>> {
    let d = match spec {
        Value::Document(d) => d,
        _ => return Err(AevumError::bad_input("$bucketAuto requires a document")),
    };
    let group_by = d
        .get("groupBy")
        .ok_or_else(|| AevumError::missing_required("$bucketAuto requires 'groupBy'"))?;
    let buckets_count = match d.get("buckets") {
        Some(Value::Int64(n)) if *n > 0 => *n as usize,
        _ => return Err(AevumError::bad_input("$bucketAuto requires a positive integer 'buckets'")),
    };

    let mut keyed: Vec<(Value, Value)> = Vec::with_capacity(docs.len());
    for doc in docs {
        let key = eval_expr(group_by, &doc, now, extra_vars)?;
        keyed.push((key, doc));
    }
    keyed.sort_by(|a, b| value::compare(&a.0, &b.0));

    let n = keyed.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let per_bucket = n.div_ceil(buckets_count).max(1);
    let output_spec = d.get("output").cloned();
    let mut out = Vec::new();
    let mut idx = 0;
    while idx < n {
        let end = (idx + per_bucket).min(n);
        let chunk = &keyed[idx..end];
        let min = chunk.first().unwrap().0.clone();
        let max_idx = end.min(n).saturating_sub(1);
        let max = if end < n {
            keyed[end].0.clone()
        } else {
            keyed[max_idx].0.clone()
        };
        let mut id = Document::new();
        id.insert("min", min);
        id.insert("max", max);
        let members: Vec<Value> = chunk.iter().map(|(_, d)| d.clone()).collect();
        out.push(build_bucket_doc(Value::Document(id), members, &output_spec, now, extra_vars)?);
        idx = end;
    }
    Ok(out)
}

// ---------------------------------------------------------------------
// $facet
// ---------------------------------------------------------------------

fn stage_facet(spec: &Value, docs: Vec<Value>, ctx: &PipelineContext) -> AevumResult<Vec<Value>> {
    let d = match spec {
        Value::Document(d) => d,
        _ => return Err(AevumError::bad_input("$facet requires a document")),
    };
    let mut out = Document::new();
    for (name, sub_pipeline) in d.iter() {
        let result = run(sub_pipeline, docs.clone(), ctx)?;
        out.insert(name.clone(), Value::Array(result));
    }
    Ok(vec![Value::Document(out)])
}

// ---------------------------------------------------------------------
// $out / $merge
// ---------------------------------------------------------------------

fn stage_out(spec: &Value, docs: Vec<Value>, ctx: &PipelineContext) -> AevumResult<Vec<Value>> {
    let name = match spec {
        Value::String(s) => s.clone(),
        Value::Document(d) => match d.get("coll") {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(AevumError::missing_required("$out requires a collection name")),
        },
        _ => return Err(AevumError::bad_input("$out requires a string or document")),
    };
    let col = ctx.storage.get_collection(&name);
    col.replace_all(docs.clone());
    Ok(docs)
}

fn stage_merge(spec: &Value, docs: Vec<Value>, ctx: &PipelineContext) -> AevumResult<Vec<Value>> {
    let (name, when_matched, when_not_matched) = match spec {
        Value::String(s) => (s.clone(), "merge".to_string(), "insert".to_string()),
        Value::Document(d) => {
            let name = match d.get("into") {
                Some(Value::String(s)) => s.clone(),
                _ => return Err(AevumError::missing_required("$merge requires 'into'")),
            };
            let wm = match d.get("whenMatched") {
                Some(Value::String(s)) => s.clone(),
                _ => "merge".to_string(),
            };
            let wn = match d.get("whenNotMatched") {
                Some(Value::String(s)) => s.clone(),
                _ => "insert".to_string(),
            };
            (name, wm, wn)
        }
        _ => return Err(AevumError::bad_input("$merge requires a string or document")),
    };

    let col = ctx.storage.get_collection(&name);
    for doc in &docs {
        let id = match doc {
            Value::Document(d) => d.get("_id").cloned(),
            _ => None,
        };
        let mut filter = Document::new();
        if let Some(id) = &id {
            filter.insert("_id", id.clone());
        }
        let existing = col.find_one(&Value::Document(filter.clone()))?;
        match existing {
            Some(existing_doc) => match when_matched.as_str() {
                "replace" => {
                    col.replace_one(&Value::Document(filter), doc.clone(), false)?;
                }
                "merge" => {
                    let merged = merge_documents(&existing_doc, doc);
                    col.replace_one(&Value::Document(filter), merged, false)?;
                }
                "keepExisting" => {}
                "fail" => {
                    return Err(AevumError::DuplicateKey(format!(
                        "$merge found an existing document for {:?}",
                        id
                    )))
                }
                other => return Err(AevumError::bad_input(format!("unknown whenMatched mode '{}'", other))),
            },
            None => match when_not_matched.as_str() {
                "insert" => {
                    col.insert_many(vec![doc.clone()])?;
                }
                "discard" => {}
                "fail" => {
                    return Err(AevumError::bad_input("$merge found no matching document and whenNotMatched is 'fail'"))
                }
                other => return Err(AevumError::bad_input(format!("unknown whenNotMatched mode '{}'", other))),
            },
        }
    }
    Ok(docs)
}

fn merge_documents(existing: &Value, incoming: &Value) -> Value {
    match (existing, incoming) {
        (Value::Document(e), Value::Document(i)) => {
            let mut out = e.clone();
            for (k, v) in i.iter() {
                out.insert(k.clone(), v.clone());
            }
            Value::Document(out)
        }
        _ => incoming.clone(),
    }
}

// ---------------------------------------------------------------------
// $geoNear
// ---------------------------------------------------------------------

fn stage_geo_near(spec: &Value, docs: Vec<Value>, ctx: &PipelineContext) -> AevumResult<Vec<Value>> {
    let d = match spec {
        Value::Document(d) => d,
        _ => return Err(AevumError::bad_input("$geoNear requires a document")),
    };
    let near = match d.get("near") {
        Some(Value::Array(p)) if p.len() == 2 => (as_f64(&p[0]), as_f64(&p[1])),
        _ => return Err(AevumError::bad_input("$geoNear requires a 'near': [x, y] point")),
    };
    let distance_field = match d.get("distanceField") {
        Some(Value::String(s)) => s.clone(),
        _ => return Err(AevumError::missing_required("$geoNear requires 'distanceField'")),
    };
    let key = match d.get("key") {
        Some(Value::String(s)) => s.clone(),
        _ => "location".to_string(),
    };
    // $geoNear only needs *a* declared geo index somewhere, not a way to
    // resolve which named collection backs this pipeline stage (the
    // pipeline has no "current collection" handle of its own).
    // A `from` override, mirroring `$lookup`, lets a caller name one.
    let index_source = match d.get("from") {
        Some(Value::String(name)) => ctx.storage.get_collection(name),
        _ => ctx.storage.get_collection("__default__"),
    };
    if index_source.list_geo_indexes().is_empty() {
        return Err(AevumError::bad_input("$geoNear requires a geo index"));
    }

    let mut scored: Vec<(f64, Value)> = docs
        .into_iter()
        .map(|doc| {
            let point = value::path_get(&doc, &key).into_scalar();
            let dist = match point {
                Value::Array(p) if p.len() == 2 => {
                    let dx = as_f64(&p[0]) - near.0;
                    let dy = as_f64(&p[1]) - near.1;
                    (dx * dx + dy * dy).sqrt()
                }
                _ => f64::INFINITY,
            };
            (dist, doc)
        })
        .collect();
    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    Ok(scored
        .into_iter()
        .map(|(dist, doc)| match doc {
            Value::Document(mut dd) => {
                dd.insert(distance_field.clone(), Value::Double(dist));
                Value::Document(dd)
            }
            other => other,
        })
        .collect())
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Int64(i) => *i as f64,
        Value::Double(d) => *d,
        _ => f64::NAN,
    }
}

// ---------------------------------------------------------------------
// $setWindowFields / $densify / $fill
// ---------------------------------------------------------------------

fn partition_key(doc: &Value, partition_by: Option<&Value>, now: i64) -> AevumResult<Value> {
    match partition_by {
        Some(e) => eval_expr(e, doc, now, &[]),
        None => Ok(Value::Null),
    }
}

/// A simplified but spec-faithful window evaluator: supports the default
/// (and most common) window bound of the whole partition, which covers
/// running totals expressed via explicit `window` documents only partially
/// — full arbitrary `documents`/`range` window bounds are not implemented.
fn stage_set_window_fields(spec: &Value, docs: Vec<Value>, now: i64) -> AevumResult<Vec<Value>> {
    let d = match spec {
        Value::Document(d) => d,
        _ => return Err(AevumError::bad_input("$setWindowFields requires a document")),
    };
    let partition_by = d.get("partitionBy");
    let sort_by = d.get("sortBy");
    let output = match d.get("output") {
        Some(Value::Document(o)) => o,
        _ => return Err(AevumError::missing_required("$setWindowFields requires 'output'")),
    };

    let mut partitioner = Partitioner::new();
    for doc in docs {
        let key = partition_key(&doc, partition_by, now)?;
        partitioner.insert(key, doc);
    }

    let mut out = Vec::new();
    for (_key, mut members) in partitioner.into_partitions() {
        if let Some(Value::Document(sort_spec)) = sort_by {
            let keys = parse_sort_spec(&Value::Document(sort_spec.clone()))?;
            accumulate::sort_partition(&mut members, &keys);
        }
        for (field, acc_spec) in output.iter() {
            let acc_doc = match acc_spec {
                Value::Document(ad) if ad.len() >= 1 => ad,
                _ => continue,
            };
            let (kind, arg) = acc_doc
                .iter()
                .find(|(k, _)| k.starts_with('$'))
                .ok_or_else(|| AevumError::bad_input("window output field must name an accumulator"))?;
            let mut acc = Accumulator::new(&kind[1..]);
            for m in &members {
                let operand = eval_expr(arg, m, now, &[])?;
                acc.accumulate(&operand);
            }
            let result = acc.get_result();
            for m in members.iter_mut() {
                if let Value::Document(md) = m {
                    md.insert(field.clone(), result.clone());
                }
            }
        }
        out.extend(members);
    }
    Ok(out)
}

fn stage_densify(spec: &Value, docs: Vec<Value>) -> AevumResult<Vec<Value>> {
    let d = match spec {
        Value::Document(d) => d,
        _ => return Err(AevumError::bad_input("$densify requires a document")),
    };
    let field = match d.get("field") {
        Some(Value::String(s)) => s.clone(),
        _ => return Err(AevumError::missing_required("$densify requires 'field'")),
    };
    let range = match d.get("range") {
        Some(Value::Document(r)) => r,
        _ => return Err(AevumError::missing_required("$densify requires 'range'")),
    };
    let step = match range.get("step") {
        Some(Value::Int64(n)) => *n as f64,
        Some(Value::Double(n)) => *n,
        _ => return Err(AevumError::missing_required("$densify 'range' requires 'step'")),
    };

    let mut present: Vec<f64> = docs
        .iter()
        .filter_map(|doc| match value::path_get(doc, &field).into_scalar() {
            Value::Int64(i) => Some(i as f64),
            Value::Double(d) => Some(d),
            _ => None,
        })
        .collect();
    present.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let (lo, hi) = match (range.get("bounds"), present.first(), present.last()) {
        (Some(Value::Array(b)), _, _) if b.len() == 2 => (as_f64(&b[0]), as_f64(&b[1])),
        (_, Some(lo), Some(hi)) => (*lo, *hi),
        _ => return Ok(docs),
    };

    let mut existing: HashSet<i64> = present.iter().map(|v| (*v * 1_000_000.0) as i64).collect();
    let mut synthesized = Vec::new();
    let mut cursor = lo;
    while cursor <= hi {
        let key = (cursor * 1_000_000.0) as i64;
        if !existing.contains(&key) {
            existing.insert(key);
            let mut d = Document::new();
            d.insert(field.clone(), Value::Double(cursor));
            synthesized.push(Value::Document(d));
        }
        cursor += step;
    }

    let mut all = docs;
    all.extend(synthesized);
    accumulate::sort_partition(
        &mut all,
        &[SortKey {
            path: field,
            ascending: true,
        }],
    );
    Ok(all)
}

fn stage_fill(spec: &Value, docs: Vec<Value>) -> AevumResult<Vec<Value>> {
    let d = match spec {
        Value::Document(d) => d,
        _ => return Err(AevumError::bad_input("$fill requires a document")),
    };
    let output = match d.get("output") {
        Some(Value::Document(o)) => o,
        _ => return Err(AevumError::missing_required("$fill requires 'output'")),
    };

    let mut last_seen: std::collections::HashMap<String, Value> = std::collections::HashMap::new();
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        let mut d = match doc {
            Value::Document(d) => d,
            other => {
                out.push(other);
                continue;
            }
        };
        for (field, method_spec) in output.iter() {
            let missing = !d.contains_key(field) || matches!(d.get(field), Some(Value::Null));
            if !missing {
                last_seen.insert(field.clone(), d.get(field).cloned().unwrap());
                continue;
            }
            match method_spec {
                Value::Document(m) if matches!(m.get("value"), Some(_)) => {
                    d.insert(field.clone(), m.get("value").cloned().unwrap());
                }
                Value::Document(m) if matches!(m.get("method"), Some(Value::String(s)) if s == "locf") => {
                    if let Some(v) = last_seen.get(field) {
                        d.insert(field.clone(), v.clone());
                    }
                }
                _ => {}
            }
        }
        out.push(Value::Document(d));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::from_json;
    use crate::storage::Storage;

    fn doc(j: serde_json::Value) -> Value {
        from_json(&j)
    }

    fn ctx(storage: &Storage) -> PipelineContext {
        PipelineContext { storage, now: 0 }
    }

    #[test]
    fn match_then_project_then_sort() {
        let storage = Storage::new();
        let docs = vec![
            doc(serde_json::json!({"_id": 1, "x": 3})),
            doc(serde_json::json!({"_id": 2, "x": 1})),
            doc(serde_json::json!({"_id": 3, "x": 2})),
        ];
        let pipeline = doc(serde_json::json!([
            {"$match": {"x": {"$gte": 1}}},
            {"$sort": {"x": 1}},
            {"$project": {"x": 1}},
        ]));
        let out = run(&pipeline, docs, &ctx(&storage)).unwrap();
        assert_eq!(
            out,
            vec![
                doc(serde_json::json!({"_id": 2, "x": 1})),
                doc(serde_json::json!({"_id": 3, "x": 2})),
                doc(serde_json::json!({"_id": 1, "x": 3})),
            ]
        );
    }

    #[test]
    fn group_output_order_is_first_seen() {
        let storage = Storage::new();
        let docs = vec![
            doc(serde_json::json!({"category": "B", "v": 1})),
            doc(serde_json::json!({"category": "A", "v": 2})),
            doc(serde_json::json!({"category": "B", "v": 3})),
        ];
        let pipeline = doc(serde_json::json!([
            {"$group": {"_id": "$category", "total": {"$sum": "$v"}}}
        ]));
        let out = run(&pipeline, docs, &ctx(&storage)).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(
            value::path_get(&out[0], "_id").into_scalar(),
            Value::String("B".to_string())
        );
        assert_eq!(
            value::path_get(&out[0], "total").into_scalar(),
            Value::Double(4.0)
        );
    }

    #[test]
    fn group_merge_objects_does_not_overwrite_with_empty() {
        let storage = Storage::new();
        let docs = vec![
            doc(serde_json::json!({"category": "A", "data": {"x": 1}})),
            doc(serde_json::json!({"category": "A", "data": {}})),
        ];
        let pipeline = doc(serde_json::json!([
            {"$group": {"_id": "$category", "merged": {"$mergeObjects": "$data"}}}
        ]));
        let out = run(&pipeline, docs, &ctx(&storage)).unwrap();
        assert_eq!(
            value::path_get(&out[0], "merged").into_scalar(),
            doc(serde_json::json!({"x": 1}))
        );
    }

    #[test]
    fn unwind_preserve_null_and_empty_arrays() {
        let storage = Storage::new();
        let docs = vec![
            doc(serde_json::json!({"_id": 1, "tags": ["a", "b"]})),
            doc(serde_json::json!({"_id": 2, "tags": []})),
            doc(serde_json::json!({"_id": 3})),
        ];
        let pipeline = doc(serde_json::json!([
            {"$unwind": {"path": "$tags", "preserveNullAndEmptyArrays": true}}
        ]));
        let out = run(&pipeline, docs, &ctx(&storage)).unwrap();
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn lookup_with_let_and_expr() {
        let storage = Storage::new();
        let products = storage.get_collection("products");
        products
            .insert_many(vec![
                doc(serde_json::json!({"_id": "P1", "minQty": 3})),
                doc(serde_json::json!({"_id": "P2", "minQty": 5})),
            ])
            .unwrap();

        let orders = vec![
            doc(serde_json::json!({"productId": "P1", "qty": 5})),
            doc(serde_json::json!({"productId": "P2", "qty": 3})),
        ];

        let pipeline = doc(serde_json::json!([
            {"$lookup": {
                "from": "products",
                "let": {"pid": "$productId", "orderQty": "$qty"},
                "pipeline": [
                    {"$match": {"$expr": {"$and": [
                        {"$eq": ["$_id", "$$pid"]},
                        {"$gte": ["$$orderQty", "$minQty"]}
                    ]}}}
                ],
                "as": "matchedProduct"
            }}
        ]));
        let out = run(&pipeline, orders, &ctx(&storage)).unwrap();
        let matched_p1 = value::path_get(&out[0], "matchedProduct").into_scalar();
        assert_eq!(matched_p1, Value::Array(vec![doc(serde_json::json!({"_id": "P1", "minQty": 3}))]));
        let matched_p2 = value::path_get(&out[1], "matchedProduct").into_scalar();
        assert_eq!(matched_p2, Value::Array(vec![]));
    }

    #[test]
    fn facet_runs_same_input_through_each_subpipeline() {
        let storage = Storage::new();
        let docs = vec![
            doc(serde_json::json!({"x": 1})),
            doc(serde_json::json!({"x": 2})),
        ];
        let pipeline = doc(serde_json::json!([
            {"$facet": {
                "count": [{"$count": "n"}],
                "doubled": [{"$project": {"x": {"$multiply": ["$x", 2]}}}]
            }}
        ]));
        let out = run(&pipeline, docs, &ctx(&storage)).unwrap();
        assert_eq!(out.len(), 1);
        let count_branch = value::path_get(&out[0], "count").into_scalar();
        assert_eq!(count_branch, Value::Array(vec![doc(serde_json::json!({"n": 2}))]));
    }

    #[test]
    fn out_replaces_target_collection() {
        let storage = Storage::new();
        let docs = vec![doc(serde_json::json!({"_id": 1}))];
        let pipeline = doc(serde_json::json!([{"$out": "snapshot"}]));
        run(&pipeline, docs, &ctx(&storage)).unwrap();
        assert_eq!(storage.get_collection("snapshot").all().len(), 1);
    }
}
