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

//! # AevumDB Logic Engine
//!
//! This crate implements the query/update/aggregation execution core for
//! AevumDB: an embedded, MongoDB-compatible document store engine. It is
//! consumed two ways:
//!
//! * **Directly from Rust**, via the typed [`api`] module — the natural path
//!   for a Rust host (a client façade, a test harness) that already holds
//!   [`value::Value`] documents.
//! * **Across a C ABI boundary**, via the `extern "C"` exports below, for a
//!   host that owns the persistence/index/administration layers itself and
//!   only wants this crate's evaluator.
//!
//! ## Core Capabilities
//!
//! * **Querying:** the match compiler/evaluator ([`match_engine`]) and
//!   expression evaluator ([`expr`]) underlying `find`/`count`/`$match`.
//! * **Mutation:** the update engine ([`update`]) — `$set`, `$inc`, `$push`
//!   with modifiers, positional `$`/`$[]`/`$[identifier]`, array filters.
//! * **Validation:** `$jsonSchema` evaluation, exposed as [`api::validate`].
//! * **Aggregation:** the pipeline executor ([`pipeline`]) over the full
//!   aggregation stage list, with accumulators/partitioners ([`accumulate`]).
//!
//! ## FFI Architecture & Memory Management
//!
//! Communication between a C/C++ host and this library crosses the ABI
//! boundary as null-terminated JSON strings. Since the host and this crate
//! may use different allocators, strict ownership rules apply.
//!
//! ### The "Rust-Allocated, Rust-Freed" Protocol
//!
//! Any heap memory allocated by Rust (specifically strings returned to the
//! host) **must** be deallocated by Rust:
//!
//! 1. **Allocation:** Rust performs an operation, allocates a `CString`, and
//!    returns a raw pointer (`*mut c_char`) to the host.
//!    * *Status: Ownership transfers to the host.*
//! 2. **Consumption:** The host reads or copies the data from the pointer.
//! 3. **Deallocation:** The host **must** call [`rust_free_string`] with the
//!    original pointer.
//!    * *Status: Ownership transfers back to Rust, which then safely drops
//!      the value.*
//!
//! The FFI surface is deliberately *stateless per call*: every `find`/
//! `update`/`delete` call takes the whole collection as a JSON array and
//! returns a new one. `$lookup`/`$graphLookup`/`$out`/`$merge`, which need a
//! named multi-collection [`storage::Storage`], are Rust-only (see
//! [`api::aggregate`]) — a host wanting those drives them by embedding this
//! crate as an `rlib`, not through the `staticlib` FFI surface.

use libc::{c_char, c_int};
use std::ffi::{CStr, CString};

pub mod accumulate;
pub mod api;
pub mod error;
pub mod expr;
pub mod json;
pub mod match_engine;
pub mod pipeline;
pub mod projection;
pub mod regexutil;
pub mod storage;
pub mod textsearch;
pub mod update;
pub mod value;

use json::{parse_or_empty_array, parse_or_empty_doc, to_json_string};
use value::Value;

// ==================================================================================
//  HELPER FUNCTIONS (INTERNAL UTILITIES)
// ==================================================================================

/// Marshals a Rust `String` into a raw, C-compatible, null-terminated char
/// pointer, handing ownership to the caller across the FFI boundary.
///
/// # Memory Safety
/// The caller **must** return this pointer to [`rust_free_string`] to
/// deallocate the memory. Failing to do so leaks it.
fn to_c_string(s: String) -> *mut c_char {
    // Unwrap is safe here because every caller builds `s` from `to_json_string`,
    // which never embeds interior NUL bytes.
    CString::new(s).unwrap().into_raw()
}

/// Converts a raw C char pointer into a native Rust `String`. Null or
/// invalid-UTF8 input fails gracefully to `"{}"` rather than panicking,
/// since an engine crash across the FFI boundary is worse than a rejected
/// document (the erroneous call then simply matches/updates nothing).
fn from_c_str(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return "{}".to_string();
    }
    unsafe {
        CStr::from_ptr(ptr)
            .to_str()
            .unwrap_or("{}")
            .to_string()
    }
}

fn array_of(v: Value) -> Vec<Value> {
    match v {
        Value::Array(items) => items,
        other => vec![other],
    }
}

// ==================================================================================
//  FFI EXPORTS (PUBLIC API)
// ==================================================================================

/// Validates a JSON document against a `$jsonSchema` body.
///
/// # Returns
/// `true` if the document adheres to the schema; `false` otherwise,
/// including when either input fails to parse as JSON.
#[no_mangle]
pub extern "C" fn rust_validate(doc: *const c_char, schema: *const c_char) -> bool {
    let doc = parse_or_empty_doc(&from_c_str(doc));
    let schema = parse_or_empty_doc(&from_c_str(schema));
    api::validate(&doc, &schema)
}

/// Counts the documents in `data` matching `query`.
#[no_mangle]
pub extern "C" fn rust_count(data: *const c_char, query: *const c_char) -> c_int {
    let data = array_of(parse_or_empty_array(&from_c_str(data)));
    let query = parse_or_empty_doc(&from_c_str(query));
    api::count(&data, &query).unwrap_or(0) as c_int
}

/// Retrieves documents from `data` with filtering, sorting, and pagination
///.
///
/// # Returns
/// A raw pointer to a C string containing the result JSON array, or an
/// empty-array `"[]"` if the query/sort/projection documents were malformed
/// or the evaluator rejected the request (fail-closed: no partial result is
/// ever returned across the FFI boundary).
///
/// # Safety
/// The returned pointer is a Rust heap allocation; the caller **must** pass
/// it to [`rust_free_string`] when done.
#[no_mangle]
pub extern "C" fn rust_find(
    data: *const c_char,
    query: *const c_char,
    sort: *const c_char,
    projection: *const c_char,
    limit: c_int,
    skip: c_int,
) -> *mut c_char {
    let data = array_of(parse_or_empty_array(&from_c_str(data)));
    let query = parse_or_empty_doc(&from_c_str(query));
    let sort = parse_or_empty_doc(&from_c_str(sort));
    let projection = parse_or_empty_doc(&from_c_str(projection));
    let l = if limit < 0 { 0 } else { limit as usize };
    let s = if skip < 0 { 0 } else { skip as usize };

    let result = api::find(&data, &query, &sort, &projection, l, s).unwrap_or_default();
    to_c_string(to_json_string(&Value::Array(result)))
}

/// Applies an update document to every element of `data` matching `query`
///, returning the *entire* dataset with the matching
/// documents replaced in place.
///
/// # Safety
/// The returned pointer is a Rust heap allocation; the caller **must** pass
/// it to [`rust_free_string`] when done.
#[no_mangle]
pub extern "C" fn rust_update(
    data: *const c_char,
    query: *const c_char,
    update: *const c_char,
) -> *mut c_char {
    let mut docs = array_of(parse_or_empty_array(&from_c_str(data)));
    let query = parse_or_empty_doc(&from_c_str(query));
    let update = parse_or_empty_doc(&from_c_str(update));

    // Update atomicity: a rejected update must leave the dataset unchanged
    // rather than surface a partial result.
    let _ = api::update_many(&mut docs, &query, &update, false, &[]);
    to_c_string(to_json_string(&Value::Array(docs)))
}

/// Removes documents from `data` matching `query`, returning
/// the remaining documents.
///
/// # Safety
/// The returned pointer is a Rust heap allocation; the caller **must** pass
/// it to [`rust_free_string`] when done.
#[no_mangle]
pub extern "C" fn rust_delete(data: *const c_char, query: *const c_char) -> *mut c_char {
    let mut docs = array_of(parse_or_empty_array(&from_c_str(data)));
    let query = parse_or_empty_doc(&from_c_str(query));
    let _ = api::delete_many(&mut docs, &query);
    to_c_string(to_json_string(&Value::Array(docs)))
}

/// Runs an aggregation pipeline over `data`. Stages needing a
/// named multi-collection store (`$lookup`, `$graphLookup`, `$out`,
/// `$merge`) see an empty [`storage::Storage`] and will resolve any
/// referenced collection as empty — this entry point is for pipelines that
/// only transform `data` itself.
///
/// # Safety
/// The returned pointer is a Rust heap allocation; the caller **must** pass
/// it to [`rust_free_string`] when done.
#[no_mangle]
pub extern "C" fn rust_aggregate(data: *const c_char, pipeline: *const c_char) -> *mut c_char {
    let docs = array_of(parse_or_empty_array(&from_c_str(data)));
    let pipeline = parse_or_empty_array(&from_c_str(pipeline));
    let storage = storage::Storage::new();
    let result = api::aggregate(docs, &pipeline, &storage).unwrap_or_default();
    to_c_string(to_json_string(&Value::Array(result)))
}

// ==================================================================================
//  MEMORY MANAGEMENT EXPORTS
// ==================================================================================

/// Deallocates a C string previously allocated by this library.
///
/// # Safety
/// * `s` must be a pointer previously returned by a function in this crate.
/// * `s` must not already have been freed (no double-free).
/// * A `NULL` pointer is handled safely (no-op).
#[no_mangle]
pub unsafe extern "C" fn rust_free_string(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            let _ = CString::from_raw(s);
        }
    }
}
