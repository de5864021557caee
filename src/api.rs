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

//! # Public Rust API
//!
//! Typed, `Result`-returning entry points over the query/update/aggregation
//! core, replacing an always-succeeds, whole-array-in/whole-array-out style
//! with structured results and propagated errors. Both the FFI layer
//! (`lib.rs`) and direct Rust embedders call through here; this module owns
//! the write-result shapes (matched/modified/upserted counts, inserted-id
//! maps) and the `_id` auto-generation invariant (every inserted document
//! carries a key `_id`, generated when absent).

use std::time::{SystemTime, UNIX_EPOCH};

use bson::oid::ObjectId;
use indexmap::IndexMap;

use crate::accumulate::SortKey;
use crate::error::{AevumError, AevumResult};
use crate::match_engine;
use crate::pipeline::{self, PipelineContext};
use crate::storage::Storage;
use crate::update::{self, UpdateContext};
use crate::value::{self, Document, Value};

/// Wall-clock read for `$$NOW`/`$currentDate`. The only place outside `expr::date`/
/// `update` that touches the system clock.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Generates a fresh auto `_id`.
pub fn new_object_id() -> Value {
    Value::ObjectId(ObjectId::new())
}

/// Ensures `doc` carries an `_id`, generating one if absent. Errors if `doc`
/// is not a document at all.
fn ensure_id(mut doc: Value) -> AevumResult<Value> {
    match &mut doc {
        Value::Document(d) => {
            if !d.contains_key("_id") {
                d.insert("_id", new_object_id());
            }
            Ok(doc)
        }
        _ => Err(AevumError::type_mismatch(
            "documents to insert must be objects",
        )),
    }
}

// ---------------------------------------------------------------------
// Write-result shapes
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    pub acknowledged: bool,
    pub inserted_id: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertManyResult {
    pub acknowledged: bool,
    /// Numerically-keyed map, keyed by the 0-based position within the batch.
    pub inserted_ids: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeleteResult {
    pub acknowledged: bool,
    pub deleted_count: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateResult {
    pub acknowledged: bool,
    pub matched_count: usize,
    pub modified_count: usize,
    pub upserted_count: usize,
    pub upserted_id: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkWriteResult {
    pub acknowledged: bool,
    pub inserted_count: usize,
    pub matched_count: usize,
    pub modified_count: usize,
    pub deleted_count: usize,
    pub upserted_count: usize,
    pub inserted_ids: IndexMap<String, Value>,
    pub upserted_ids: IndexMap<String, Value>,
}

/// One element of a `bulkWrite` batch. Indices into
/// `inserted_ids`/`upserted_ids` on the result are the position of the
/// originating op within the batch passed to [`bulk_write`].
pub enum BulkOp {
    InsertOne(Value),
    UpdateOne { filter: Value, update: Value, upsert: bool },
    UpdateMany { filter: Value, update: Value, upsert: bool },
    DeleteOne(Value),
    DeleteMany(Value),
}

// ---------------------------------------------------------------------
// find / count / validate
// ---------------------------------------------------------------------

/// Runs a find over `data` via the `$match`/`$sort`/`$skip`/`$limit`/
/// `$project` pipeline stages, expressed as a small fixed pipeline rather
/// than a bespoke four-phase loop.
pub fn find(
    data: &[Value],
    query: &Value,
    sort: &Value,
    projection_spec: &Value,
    limit: usize,
    skip: usize,
) -> AevumResult<Vec<Value>> {
    let storage = Storage::new();
    let ctx = PipelineContext { storage: &storage, now: now_millis() };

    let mut stages = vec![doc1("$match", query.clone())];
    if let Value::Document(d) = sort {
        if !d.is_empty() {
            stages.push(doc1("$sort", sort.clone()));
        }
    }
    if skip > 0 {
        stages.push(doc1("$skip", Value::Int64(skip as i64)));
    }
    if limit > 0 {
        stages.push(doc1("$limit", Value::Int64(limit as i64)));
    }
    if let Value::Document(d) = projection_spec {
        if !d.is_empty() {
            stages.push(doc1("$project", projection_spec.clone()));
        }
    }

    pipeline::run(&Value::Array(stages), data.to_vec(), &ctx)
}

fn doc1(key: &str, value: Value) -> Value {
    let mut d = Document::new();
    d.insert(key, value);
    Value::Document(d)
}

/// Counts documents in `data` matching `query`, without materializing a
/// projected/sorted result set.
pub fn count(data: &[Value], query: &Value) -> AevumResult<usize> {
    let mut n = 0;
    for d in data {
        if match_engine::matches(d, query)? {
            n += 1;
        }
    }
    Ok(n)
}

/// Validates `doc` against a `$jsonSchema` body, independent
/// of any surrounding query document.
pub fn validate(doc: &Value, schema: &Value) -> bool {
    match_engine::matches(doc, &doc1("$jsonSchema", schema.clone())).unwrap_or(false)
}

/// A declared index, named or by key pattern, consulted by [`validate_hint`].
/// The planner that would actually use an index to serve a query is out of
/// scope — only the hint *rejection* behavior is in scope
///.
#[derive(Debug, Clone)]
pub struct IndexDecl {
    pub name: String,
    pub key_pattern: Document,
}

/// Validates a `find(...).hint(...)` value against the set of indexes a
/// collection has declared. `{$natural: 1}`/`{$natural: -1}`
/// are always accepted — they force an insertion-order (resp. reverse) scan
/// rather than naming a real index. Anything else must match a declared
/// index's name or exact key pattern, or this returns [`AevumError::BadHint`].
pub fn validate_hint(declared: &[IndexDecl], hint: &Value) -> AevumResult<()> {
    match hint {
        Value::String(name) => {
            if declared.iter().any(|d| &d.name == name) {
                Ok(())
            } else {
                Err(AevumError::BadHint(name.clone()))
            }
        }
        Value::Document(d) => {
            if d.len() == 1 {
                match d.get("$natural") {
                    Some(Value::Int64(1)) | Some(Value::Int64(-1)) => return Ok(()),
                    Some(_) => {
                        return Err(AevumError::bad_input("$natural hint must be 1 or -1"))
                    }
                    None => {}
                }
            }
            if declared.iter().any(|decl| decl.key_pattern == *d) {
                Ok(())
            } else {
                Err(AevumError::BadHint(crate::json::to_json_string(hint)))
            }
        }
        _ => Err(AevumError::bad_input("hint must be a string or a key-pattern document")),
    }
}

/// Like [`find`], but validates an optional index `hint` first
/// and, for `{$natural: -1}`, reverses the scan order before the usual
/// match/sort/skip/limit/project pipeline runs.
pub fn find_with_hint(
    data: &[Value],
    query: &Value,
    sort: &Value,
    projection_spec: &Value,
    limit: usize,
    skip: usize,
    hint: Option<&Value>,
    declared_indexes: &[IndexDecl],
) -> AevumResult<Vec<Value>> {
    let mut scan_order = data.to_vec();
    if let Some(h) = hint {
        validate_hint(declared_indexes, h)?;
        if let Value::Document(d) = h {
            if let Some(Value::Int64(-1)) = d.get("$natural") {
                scan_order.reverse();
            }
        }
    }
    find(&scan_order, query, sort, projection_spec, limit, skip)
}

// ---------------------------------------------------------------------
// insert
// ---------------------------------------------------------------------

pub fn insert_one(collection: &mut Vec<Value>, doc: Value) -> AevumResult<InsertOneResult> {
    let doc = ensure_id(doc)?;
    let id = match &doc {
        Value::Document(d) => d.get("_id").cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    };
    collection.push(doc);
    Ok(InsertOneResult { acknowledged: true, inserted_id: id })
}

pub fn insert_many(collection: &mut Vec<Value>, docs: Vec<Value>) -> AevumResult<InsertManyResult> {
    let mut inserted_ids = IndexMap::new();
    let mut prepared = Vec::with_capacity(docs.len());
    for (i, d) in docs.into_iter().enumerate() {
        let d = ensure_id(d)?;
        let id = match &d {
            Value::Document(doc) => doc.get("_id").cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        };
        inserted_ids.insert(i.to_string(), id);
        prepared.push(d);
    }
    collection.extend(prepared);
    Ok(InsertManyResult { acknowledged: true, inserted_ids })
}

// ---------------------------------------------------------------------
// delete
// ---------------------------------------------------------------------

pub fn delete_one(collection: &mut Vec<Value>, query: &Value) -> AevumResult<DeleteResult> {
    for i in 0..collection.len() {
        if match_engine::matches(&collection[i], query)? {
            collection.remove(i);
            return Ok(DeleteResult { acknowledged: true, deleted_count: 1 });
        }
    }
    Ok(DeleteResult { acknowledged: true, deleted_count: 0 })
}

pub fn delete_many(collection: &mut Vec<Value>, query: &Value) -> AevumResult<DeleteResult> {
    let before = collection.len();
    let mut err = None;
    collection.retain(|d| match match_engine::matches(d, query) {
        Ok(m) => !m,
        Err(e) => {
            err = Some(e);
            true
        }
    });
    if let Some(e) = err {
        return Err(e);
    }
    let deleted = before - collection.len();
    Ok(DeleteResult { acknowledged: true, deleted_count: deleted })
}

// ---------------------------------------------------------------------
// update
// ---------------------------------------------------------------------

/// Synthesizes the upsert-insert document from the filter's equality
/// predicates plus `$set`/`$setOnInsert`. Only
/// top-level scalar-equality clauses of `filter` seed the new document;
/// operator clauses (`$gt`, etc.) are not invertible and are skipped.
fn synthesize_upsert_doc(filter: &Value, update_spec: &Value, now: i64) -> AevumResult<Value> {
    let mut base = Document::new();
    if let Value::Document(f) = filter {
        for (k, v) in f.iter() {
            if k.starts_with('$') {
                continue;
            }
            if !matches!(v, Value::Document(_)) {
                base = match value::path_set(&Value::Document(base), k, v.clone(), true)? {
                    Value::Document(d) => d,
                    _ => Document::new(),
                };
            }
        }
    }
    let mut ctx = UpdateContext::new(now);
    ctx.upsert_insert = true;
    let (result, _) = update::apply(&Value::Document(base), update_spec, &ctx)?;
    ensure_id(result)
}

fn apply_one_update(
    doc: &Value,
    filter: &Value,
    update_spec: &Value,
    array_filters: &[Value],
    now: i64,
) -> AevumResult<(Value, bool)> {
    let outcome = match_engine::matches_positional(doc, filter)?;
    let ctx = UpdateContext::from_match(&outcome, now).with_array_filters(array_filters)?;
    update::apply(doc, update_spec, &ctx)
}

pub fn update_one(
    collection: &mut Vec<Value>,
    filter: &Value,
    update_spec: &Value,
    upsert: bool,
    array_filters: &[Value],
) -> AevumResult<UpdateResult> {
    let now = now_millis();
    for i in 0..collection.len() {
        if match_engine::matches(&collection[i], filter)? {
            let (new_doc, changed) =
                apply_one_update(&collection[i], filter, update_spec, array_filters, now)?;
            collection[i] = new_doc;
            return Ok(UpdateResult {
                acknowledged: true,
                matched_count: 1,
                modified_count: if changed { 1 } else { 0 },
                upserted_count: 0,
                upserted_id: None,
            });
        }
    }
    if upsert {
        let inserted = synthesize_upsert_doc(filter, update_spec, now)?;
        let id = match &inserted {
            Value::Document(d) => d.get("_id").cloned(),
            _ => None,
        };
        collection.push(inserted);
        return Ok(UpdateResult {
            acknowledged: true,
            matched_count: 0,
            modified_count: 0,
            upserted_count: 1,
            upserted_id: id,
        });
    }
    Ok(UpdateResult { acknowledged: true, ..Default::default() })
}

pub fn update_many(
    collection: &mut Vec<Value>,
    filter: &Value,
    update_spec: &Value,
    upsert: bool,
    array_filters: &[Value],
) -> AevumResult<UpdateResult> {
    let now = now_millis();
    let mut matched = 0;
    let mut modified = 0;
    for i in 0..collection.len() {
        if match_engine::matches(&collection[i], filter)? {
            matched += 1;
            let (new_doc, changed) =
                apply_one_update(&collection[i], filter, update_spec, array_filters, now)?;
            collection[i] = new_doc;
            if changed {
                modified += 1;
            }
        }
    }
    if matched == 0 && upsert {
        let inserted = synthesize_upsert_doc(filter, update_spec, now)?;
        let id = match &inserted {
            Value::Document(d) => d.get("_id").cloned(),
            _ => None,
        };
        collection.push(inserted);
        return Ok(UpdateResult {
            acknowledged: true,
            matched_count: 0,
            modified_count: 0,
            upserted_count: 1,
            upserted_id: id,
        });
    }
    Ok(UpdateResult {
        acknowledged: true,
        matched_count: matched,
        modified_count: modified,
        upserted_count: 0,
        upserted_id: None,
    })
}

// ---------------------------------------------------------------------
// aggregate
// ---------------------------------------------------------------------

/// Runs an aggregation pipeline over `data`. `storage` backs `$lookup`,
/// `$graphLookup`, `$out`, and `$merge`; pass an empty [`Storage`] when the
/// pipeline uses none of those stages.
pub fn aggregate(data: Vec<Value>, pipeline_spec: &Value, storage: &Storage) -> AevumResult<Vec<Value>> {
    let ctx = PipelineContext { storage, now: now_millis() };
    pipeline::run(pipeline_spec, data, &ctx)
}

// ---------------------------------------------------------------------
// bulkWrite
// ---------------------------------------------------------------------

pub fn bulk_write(collection: &mut Vec<Value>, ops: Vec<BulkOp>) -> AevumResult<BulkWriteResult> {
    let mut result = BulkWriteResult { acknowledged: true, ..Default::default() };
    for (i, op) in ops.into_iter().enumerate() {
        match op {
            BulkOp::InsertOne(doc) => {
                let r = insert_one(collection, doc)?;
                result.inserted_count += 1;
                result.inserted_ids.insert(i.to_string(), r.inserted_id);
            }
            BulkOp::UpdateOne { filter, update, upsert } => {
                let r = update_one(collection, &filter, &update, upsert, &[])?;
                result.matched_count += r.matched_count;
                result.modified_count += r.modified_count;
                result.upserted_count += r.upserted_count;
                if let Some(id) = r.upserted_id {
                    result.upserted_ids.insert(i.to_string(), id);
                }
            }
            BulkOp::UpdateMany { filter, update, upsert } => {
                let r = update_many(collection, &filter, &update, upsert, &[])?;
                result.matched_count += r.matched_count;
                result.modified_count += r.modified_count;
                result.upserted_count += r.upserted_count;
                if let Some(id) = r.upserted_id {
                    result.upserted_ids.insert(i.to_string(), id);
                }
            }
            BulkOp::DeleteOne(filter) => {
                let r = delete_one(collection, &filter)?;
                result.deleted_count += r.deleted_count;
            }
            BulkOp::DeleteMany(filter) => {
                let r = delete_many(collection, &filter)?;
                result.deleted_count += r.deleted_count;
            }
        }
    }
    Ok(result)
}

/// Parses a sort spec document into [`SortKey`]s, exposed for embedders that
/// want to sort a document slice directly without going through
/// [`aggregate`]. Mirrors `pipeline::parse_sort_spec`'s grammar.
pub fn sort_keys_from_spec(sort: &Value) -> AevumResult<Vec<SortKey>> {
    let d = match sort {
        Value::Document(d) => d,
        _ => return Err(AevumError::bad_input("sort spec must be a document")),
    };
    let mut keys = Vec::new();
    for (k, v) in d.iter() {
        let ascending = match v {
            Value::Int64(n) => *n >= 0,
            Value::Double(n) => *n >= 0.0,
            _ => return Err(AevumError::bad_input("sort direction must be numeric")),
        };
        keys.push(SortKey { path: k.clone(), ascending });
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::from_json;

    fn doc(j: serde_json::Value) -> Value {
        from_json(&j)
    }

    #[test]
    fn insert_one_autogenerates_id() {
        let mut col = Vec::new();
        let r = insert_one(&mut col, doc(serde_json::json!({"name": "a"}))).unwrap();
        assert!(matches!(r.inserted_id, Value::ObjectId(_)));
        assert_eq!(col.len(), 1);
    }

    #[test]
    fn insert_many_keys_ids_by_position_not_array() {
        let mut col = Vec::new();
        let r = insert_many(
            &mut col,
            vec![doc(serde_json::json!({"_id": 1})), doc(serde_json::json!({"_id": 2}))],
        )
        .unwrap();
        assert_eq!(r.inserted_ids.get("0"), Some(&Value::Int64(1)));
        assert_eq!(r.inserted_ids.get("1"), Some(&Value::Int64(2)));
    }

    #[test]
    fn update_one_modified_count_tracks_actual_change() {
        let mut col = vec![doc(serde_json::json!({"_id": 1, "x": 1}))];
        let r = update_one(
            &mut col,
            &doc(serde_json::json!({"_id": 1})),
            &doc(serde_json::json!({"$set": {"x": 1}})),
            false,
            &[],
        )
        .unwrap();
        assert_eq!(r.matched_count, 1);
        assert_eq!(r.modified_count, 0, "setting to the same value is not a modification");
    }

    #[test]
    fn update_one_upsert_inserts_from_filter_equality() {
        let mut col: Vec<Value> = Vec::new();
        let r = update_one(
            &mut col,
            &doc(serde_json::json!({"email": "a@example.com"})),
            &doc(serde_json::json!({"$set": {"active": true}})),
            true,
            &[],
        )
        .unwrap();
        assert_eq!(r.upserted_count, 1);
        assert!(r.upserted_id.is_some());
        assert_eq!(col.len(), 1);
        assert_eq!(
            value::path_get(&col[0], "email").into_scalar(),
            Value::String("a@example.com".into())
        );
    }

    #[test]
    fn delete_many_counts_removed_documents() {
        let mut col = vec![
            doc(serde_json::json!({"active": false})),
            doc(serde_json::json!({"active": true})),
            doc(serde_json::json!({"active": false})),
        ];
        let r = delete_many(&mut col, &doc(serde_json::json!({"active": false}))).unwrap();
        assert_eq!(r.deleted_count, 2);
        assert_eq!(col.len(), 1);
    }

    #[test]
    fn find_applies_match_sort_skip_limit_project_in_order() {
        let data = vec![
            doc(serde_json::json!({"_id": 1, "v": 3})),
            doc(serde_json::json!({"_id": 2, "v": 1})),
            doc(serde_json::json!({"_id": 3, "v": 2})),
        ];
        let out = find(
            &data,
            &doc(serde_json::json!({})),
            &doc(serde_json::json!({"v": 1})),
            &doc(serde_json::json!({"v": 1})),
            1,
            1,
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(value::path_get(&out[0], "v").into_scalar(), Value::Int64(2));
    }

    #[test]
    fn validate_checks_required_fields() {
        let schema = doc(serde_json::json!({"required": ["pid"]}));
        assert!(validate(&doc(serde_json::json!({"pid": 1})), &schema));
        assert!(!validate(&doc(serde_json::json!({"name": "x"})), &schema));
    }

    #[test]
    fn validate_hint_accepts_natural_and_rejects_unknown_name() {
        let declared = vec![IndexDecl { name: "age_1".into(), key_pattern: {
            let mut d = Document::new();
            d.insert("age", Value::Int64(1));
            d
        }}];
        assert!(validate_hint(&declared, &doc(serde_json::json!({"$natural": -1}))).is_ok());
        assert!(validate_hint(&declared, &Value::String("age_1".into())).is_ok());
        assert!(validate_hint(&declared, &doc(serde_json::json!({"age": 1}))).is_ok());
        assert!(matches!(
            validate_hint(&declared, &Value::String("nope".into())),
            Err(AevumError::BadHint(_))
        ));
    }

    #[test]
    fn find_with_hint_natural_minus_one_reverses_scan_order() {
        let declared = Vec::new();
        let data = vec![doc(serde_json::json!({"_id": 1})), doc(serde_json::json!({"_id": 2}))];
        let out = find_with_hint(
            &data,
            &doc(serde_json::json!({})),
            &doc(serde_json::json!({})),
            &doc(serde_json::json!({})),
            0,
            0,
            Some(&doc(serde_json::json!({"$natural": -1}))),
            &declared,
        )
        .unwrap();
        assert_eq!(value::path_get(&out[0], "_id").into_scalar(), Value::Int64(2));
        assert_eq!(value::path_get(&out[1], "_id").into_scalar(), Value::Int64(1));
    }

    #[test]
    fn bulk_write_aggregates_counts_and_ids_by_index() {
        let mut col: Vec<Value> = Vec::new();
        let r = bulk_write(
            &mut col,
            vec![
                BulkOp::InsertOne(doc(serde_json::json!({"_id": 1}))),
                BulkOp::InsertOne(doc(serde_json::json!({"_id": 2}))),
                BulkOp::DeleteOne(doc(serde_json::json!({"_id": 1}))),
            ],
        )
        .unwrap();
        assert_eq!(r.inserted_count, 2);
        assert_eq!(r.deleted_count, 1);
        assert_eq!(r.inserted_ids.get("1"), Some(&Value::Int64(2)));
        assert_eq!(col.len(), 1);
    }
}
