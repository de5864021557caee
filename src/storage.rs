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

//! # Storage Port & Concurrency Envelope
//!
//! The persistence layer, index structures, and collection administration
//! stay out of scope here: the core only ever talks to storage through the
//! narrow [`Collection`] port. This module defines that
//! port plus one reference implementation, [`InMemoryCollection`], so that
//! `$lookup`/`$graphLookup`/`$out`/`$merge` and the per-collection mutex
//! envelope are exercisable without a real database behind them. This is a
//! test/embedding convenience (SPEC_FULL.md §C), not a durability layer: no
//! WAL, no file I/O, nothing surviving process exit.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::error::{AevumError, AevumResult};
use crate::value::{Document, Value};

/// A geo index declaration, consulted by `$geoNear` to decide whether the
/// stage may run.
#[derive(Debug, Clone)]
pub struct GeoIndex {
    pub field: String,
}

/// A text index declaration, consulted by `$text`/`$match`.
#[derive(Debug, Clone)]
pub struct TextIndex {
    pub fields: Vec<String>,
}

/// Outcome of a bare insert/replace/update/delete against a [`Collection`].
/// Mirrors the write-result contract callers expect; the numerically-keyed
/// `insertedIds`/`upsertedIds` maps are built by `api.rs`, one layer up,
/// since `insertMany`/`bulkWrite` compose several of these.
#[derive(Debug, Clone, Default)]
pub struct MutationResult {
    pub matched_count: usize,
    pub modified_count: usize,
    pub deleted_count: usize,
    pub upserted_id: Option<Value>,
}

/// The narrow interface the core consumes for reads and writes triggered by
/// `$lookup`, `$graphLookup`, `$out`, and `$merge`. Every
/// implementation must satisfy: single-writer-per-collection, and readers
/// see a point-in-time snapshot for the duration of one `find` iteration.
pub trait Collection: Send + Sync {
    fn find(&self, filter: &Value) -> AevumResult<Vec<Value>>;
    fn find_one(&self, filter: &Value) -> AevumResult<Option<Value>>;
    fn insert_many(&self, docs: Vec<Value>) -> AevumResult<MutationResult>;
    fn replace_one(&self, filter: &Value, doc: Value, upsert: bool) -> AevumResult<MutationResult>;
    fn delete_many(&self, filter: &Value) -> AevumResult<MutationResult>;
    fn list_geo_indexes(&self) -> Vec<GeoIndex>;
    fn list_text_indexes(&self) -> Vec<TextIndex>;
    /// Snapshot of every document currently in the collection, in storage
    /// (insertion) order. Used by `$lookup`'s 4-field equality form and by
    /// `$graphLookup`'s BFS, both of which need the whole set to scan.
    fn all(&self) -> Vec<Value>;
}

/// A named set of collections, each independently guarded by its own mutex
///.
#[derive(Clone, Default)]
pub struct Storage {
    collections: Arc<Mutex<HashMap<String, Arc<InMemoryCollection>>>>,
}

impl Storage {
    pub fn new() -> Self {
        Storage {
            collections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the named collection, creating an empty one on first access
    /// (the out-of-scope "administration" layer would normally gate this;
    /// here any name is implicitly a valid collection, matching the
    /// reference server's default `createCollection`-on-first-write
    /// convenience).
    pub fn get_collection(&self, name: &str) -> Arc<InMemoryCollection> {
        let mut map = self.collections.lock();
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(InMemoryCollection::new(name)))
            .clone()
    }

    pub fn seed(&self, name: &str, docs: Vec<Value>) {
        let col = self.get_collection(name);
        col.replace_all(docs);
    }
}

/// Reference, non-durable [`Collection`] implementation. Internally guarded
/// by a single mutex over the document vector: every logical operation
/// (`find`, `insert_many`, `replace_one`, `delete_many`) takes the lock once
/// for its whole duration, which gives exactly the serialization guarantee
/// a collection needs — concurrent write-write and read-write pairs on
/// the same collection cannot interleave; concurrent reads may (multiple
/// `find` calls can each hold, release, and reacquire the lock without
/// blocking each other for longer than the copy they make).
pub struct InMemoryCollection {
    name: String,
    docs: Mutex<Vec<Value>>,
    geo_indexes: Mutex<Vec<GeoIndex>>,
    text_indexes: Mutex<Vec<TextIndex>>,
}

impl InMemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        InMemoryCollection {
            name: name.into(),
            docs: Mutex::new(Vec::new()),
            geo_indexes: Mutex::new(Vec::new()),
            text_indexes: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn replace_all(&self, docs: Vec<Value>) {
        *self.docs.lock() = docs;
    }

    pub fn declare_geo_index(&self, field: impl Into<String>) {
        self.geo_indexes.lock().push(GeoIndex { field: field.into() });
    }

    pub fn declare_text_index(&self, fields: Vec<String>) {
        self.text_indexes.lock().push(TextIndex { fields });
    }

    fn id_of(doc: &Value) -> Option<Value> {
        match doc {
            Value::Document(d) => d.get("_id").cloned(),
            _ => None,
        }
    }
}

impl Collection for InMemoryCollection {
    fn find(&self, filter: &Value) -> AevumResult<Vec<Value>> {
        let snapshot = self.docs.lock().clone();
        // The scan itself runs outside the lock against the snapshot so a
        // slow predicate (e.g. one invoking $where-style logic) cannot hold
        // up concurrent writers longer than the copy.
        snapshot
            .into_iter()
            .filter_map(|d| match crate::match_engine::matches(&d, filter) {
                Ok(true) => Some(Ok(d)),
                Ok(false) => None,
                Err(e) => Some(Err(e)),
            })
            .collect()
    }

    fn find_one(&self, filter: &Value) -> AevumResult<Option<Value>> {
        Ok(self.find(filter)?.into_iter().next())
    }

    fn insert_many(&self, docs: Vec<Value>) -> AevumResult<MutationResult> {
        // Bulk validation scan runs in parallel (teacher's `rayon` dependency
        // carried forward for exactly this: a read-only, embarrassingly
        // parallel pass with no shared mutable state).
        let all_documents = docs
            .par_iter()
            .all(|d| matches!(d, Value::Document(_)));
        if !all_documents {
            return Err(AevumError::type_mismatch(
                "insert_many requires every element to be a document",
            ));
        }
        let n = docs.len();
        let mut guard = self.docs.lock();
        guard.extend(docs);
        Ok(MutationResult {
            matched_count: 0,
            modified_count: n,
            deleted_count: 0,
            upserted_id: None,
        })
    }

    fn replace_one(&self, filter: &Value, doc: Value, upsert: bool) -> AevumResult<MutationResult> {
        let mut guard = self.docs.lock();
        if let Some(pos) = guard
            .iter()
            .position(|d| crate::match_engine::matches(d, filter).unwrap_or(false))
        {
            guard[pos] = doc;
            return Ok(MutationResult {
                matched_count: 1,
                modified_count: 1,
                deleted_count: 0,
                upserted_id: None,
            });
        }
        if upsert {
            let id = Self::id_of(&doc);
            guard.push(doc);
            return Ok(MutationResult {
                matched_count: 0,
                modified_count: 0,
                deleted_count: 0,
                upserted_id: id,
            });
        }
        Ok(MutationResult::default())
    }

    fn delete_many(&self, filter: &Value) -> AevumResult<MutationResult> {
        let mut guard = self.docs.lock();
        let before = guard.len();
        let mut err = None;
        guard.retain(|d| match crate::match_engine::matches(d, filter) {
            Ok(m) => !m,
            Err(e) => {
                err = Some(e);
                true
            }
        });
        if let Some(e) = err {
            return Err(e);
        }
        let deleted = before - guard.len();
        Ok(MutationResult {
            matched_count: deleted,
            modified_count: 0,
            deleted_count: deleted,
            upserted_id: None,
        })
    }

    fn list_geo_indexes(&self) -> Vec<GeoIndex> {
        self.geo_indexes.lock().clone()
    }

    fn list_text_indexes(&self) -> Vec<TextIndex> {
        self.text_indexes.lock().clone()
    }

    fn all(&self) -> Vec<Value> {
        self.docs.lock().clone()
    }
}

impl Clone for GeoIndex {
    fn clone(&self) -> Self {
        GeoIndex {
            field: self.field.clone(),
        }
    }
}

impl Clone for TextIndex {
    fn clone(&self) -> Self {
        TextIndex {
            fields: self.fields.clone(),
        }
    }
}

pub fn empty_document() -> Value {
    Value::Document(Document::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::from_json;

    fn doc(j: serde_json::Value) -> Value {
        from_json(&j)
    }

    #[test]
    fn insert_then_find_round_trips() {
        let storage = Storage::new();
        let col = storage.get_collection("people");
        col.insert_many(vec![doc(serde_json::json!({"_id": 1, "name": "a"}))])
            .unwrap();
        let found = col.find(&doc(serde_json::json!({"name": "a"}))).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn concurrent_writers_serialize_total_count() {
        let storage = Storage::new();
        let col = storage.get_collection("c");
        std::thread::scope(|scope| {
            for i in 0..8 {
                let col = col.clone();
                scope.spawn(move || {
                    col.insert_many(vec![doc(serde_json::json!({"_id": i}))])
                        .unwrap();
                });
            }
        });
        assert_eq!(col.all().len(), 8);
    }

    #[test]
    fn delete_many_removes_matching_only() {
        let storage = Storage::new();
        let col = storage.get_collection("c");
        col.insert_many(vec![
            doc(serde_json::json!({"_id": 1, "active": true})),
            doc(serde_json::json!({"_id": 2, "active": false})),
        ])
        .unwrap();
        let res = col
            .delete_many(&doc(serde_json::json!({"active": false})))
            .unwrap();
        assert_eq!(res.deleted_count, 1);
        assert_eq!(col.all().len(), 1);
    }

    #[test]
    fn upsert_inserts_when_no_match() {
        let storage = Storage::new();
        let col = storage.get_collection("c");
        let res = col
            .replace_one(
                &doc(serde_json::json!({"_id": 9})),
                doc(serde_json::json!({"_id": 9, "name": "new"})),
                true,
            )
            .unwrap();
        assert_eq!(res.upserted_id, Some(Value::Int64(9)));
        assert_eq!(col.all().len(), 1);
    }
}
