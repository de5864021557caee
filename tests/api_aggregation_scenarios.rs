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

//! Integration tests driving the Rust-native [`aevum_logic::api`] surface
//! end-to-end, exercising the cross-collection and positional-update paths
//! the stateless FFI tests (`test_ffi_*`) cannot reach.

use aevum_logic::api;
use aevum_logic::json::from_json;
use aevum_logic::storage::Storage;
use aevum_logic::value::{self, Value};

fn doc(j: serde_json::Value) -> Value {
    from_json(&j)
}

#[test]
fn lookup_with_let_and_expr_matches_only_sufficient_stock() {
    let storage = Storage::new();
    storage.seed(
        "products",
        vec![
            doc(serde_json::json!({"_id": "P1", "minQty": 3})),
            doc(serde_json::json!({"_id": "P2", "minQty": 5})),
        ],
    );

    let orders = vec![
        doc(serde_json::json!({"productId": "P1", "qty": 5})),
        doc(serde_json::json!({"productId": "P2", "qty": 3})),
    ];

    let pipeline = doc(serde_json::json!([
        {
            "$lookup": {
                "from": "products",
                "let": {"pid": "$productId", "orderQty": "$qty"},
                "pipeline": [
                    {"$match": {"$expr": {"$and": [
                        {"$eq": ["$_id", "$$pid"]},
                        {"$gte": ["$$orderQty", "$minQty"]}
                    ]}}}
                ],
                "as": "matchedProduct"
            }
        }
    ]));

    let result = api::aggregate(orders, &pipeline, &storage).unwrap();
    assert_eq!(result.len(), 2);

    let p1_matches = value::path_get(&result[0], "matchedProduct").into_scalar();
    assert_eq!(p1_matches, Value::Array(vec![doc(serde_json::json!({"_id": "P1", "minQty": 3}))]));

    let p2_matches = value::path_get(&result[1], "matchedProduct").into_scalar();
    assert_eq!(p2_matches, Value::Array(vec![]));
}

#[test]
fn update_many_with_array_filters_marks_only_matching_elements() {
    let mut collection = vec![doc(serde_json::json!({
        "_id": 1,
        "items": [
            {"name": "a", "qty": 10, "status": "active"},
            {"name": "b", "qty": 5, "status": "deleted"},
            {"name": "c", "qty": 15, "status": "active"},
            {"name": "d", "qty": 3, "status": "active"}
        ]
    }))];

    let array_filters = vec![doc(serde_json::json!({
        "e.qty": {"$gt": 5},
        "e.status": {"$ne": "deleted"}
    }))];

    let r = api::update_many(
        &mut collection,
        &doc(serde_json::json!({"_id": 1})),
        &doc(serde_json::json!({"$set": {"items.$[e].marked": true}})),
        false,
        &array_filters,
    )
    .unwrap();
    assert_eq!(r.modified_count, 1);

    let items = match value::path_get(&collection[0], "items").into_scalar() {
        Value::Array(items) => items,
        other => panic!("expected array, got {other:?}"),
    };
    let marked: Vec<bool> = items
        .iter()
        .map(|it| matches!(value::path_get(it, "marked").into_scalar(), Value::Bool(true)))
        .collect();
    assert_eq!(marked, vec![true, false, true, false]);
}

#[test]
fn group_merges_objects_without_empty_documents_overwriting() {
    let docs = vec![
        doc(serde_json::json!({"category": "A", "data": {"x": 1}})),
        doc(serde_json::json!({"category": "A", "data": {}})),
    ];
    let storage = Storage::new();
    let pipeline = doc(serde_json::json!([
        {"$group": {"_id": "$category", "merged": {"$mergeObjects": "$data"}}}
    ]));
    let result = api::aggregate(docs, &pipeline, &storage).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(
        value::path_get(&result[0], "merged").into_scalar(),
        doc(serde_json::json!({"x": 1}))
    );
}

#[test]
fn facet_fans_the_same_input_out_to_every_named_sub_pipeline() {
    let docs = vec![
        doc(serde_json::json!({"price": 10})),
        doc(serde_json::json!({"price": 20})),
        doc(serde_json::json!({"price": 30})),
    ];
    let storage = Storage::new();
    let pipeline = doc(serde_json::json!([
        {"$facet": {
            "cheap": [{"$match": {"price": {"$lt": 25}}}],
            "total": [{"$count": "n"}]
        }}
    ]));
    let result = api::aggregate(docs, &pipeline, &storage).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(
        value::path_get(&result[0], "cheap").into_scalar(),
        Value::Array(vec![doc(serde_json::json!({"price": 10})), doc(serde_json::json!({"price": 20}))])
    );
    assert_eq!(
        value::path_get(&result[0], "total").into_scalar(),
        Value::Array(vec![doc(serde_json::json!({"n": 3}))])
    );
}

#[test]
fn bulk_write_upsert_synthesizes_document_from_filter_equality() {
    let mut collection: Vec<Value> = Vec::new();
    let r = api::bulk_write(
        &mut collection,
        vec![api::BulkOp::UpdateOne {
            filter: doc(serde_json::json!({"sku": "ABC"})),
            update: doc(serde_json::json!({"$set": {"qty": 5}})),
            upsert: true,
        }],
    )
    .unwrap();
    assert_eq!(r.upserted_count, 1);
    assert_eq!(collection.len(), 1);
    assert_eq!(
        value::path_get(&collection[0], "sku").into_scalar(),
        Value::String("ABC".into())
    );
    assert_eq!(value::path_get(&collection[0], "qty").into_scalar(), Value::Int64(5));
}
