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

//! # `$text` Tokenizer & Scorer
//!
//! `match_engine::matches` rejects `$text` unconditionally. This module does the part that needs document-set context
//! instead: tokenize every candidate's indexed fields, score against the
//! query's included/excluded terms and quoted phrases, and hand the
//! surviving (document, score) pairs back to the `$match` stage to continue
//! filtering on any sibling clauses.

use crate::error::{AevumError, AevumResult};
use crate::value::{self, Value};

/// One parsed `$search` query: `"a b"` is an OR of terms, `"\"a b\""` is a
/// required contiguous phrase, `-term` is a negated term.
struct ParsedQuery {
    phrases: Vec<Vec<String>>,
    required_terms: Vec<String>,
    excluded_terms: Vec<String>,
}

fn tokenize(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn parse_query(search: &str) -> ParsedQuery {
    let mut phrases = Vec::new();
    let mut required_terms = Vec::new();
    let mut excluded_terms = Vec::new();

    let mut chars = search.chars().peekable();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut negate_next = false;

    let flush = |buf: &mut String,
                 negate_next: &mut bool,
                 required_terms: &mut Vec<String>,
                 excluded_terms: &mut Vec<String>| {
        if !buf.is_empty() {
            let tokens = tokenize(buf);
            for t in tokens {
                if *negate_next {
                    excluded_terms.push(t);
                } else {
                    required_terms.push(t);
                }
            }
            buf.clear();
        }
        *negate_next = false;
    };

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes {
                    let phrase_tokens = tokenize(&buf);
                    if negate_next {
                        excluded_terms.extend(phrase_tokens);
                    } else if !phrase_tokens.is_empty() {
                        phrases.push(phrase_tokens);
                    }
                    buf.clear();
                    in_quotes = false;
                    negate_next = false;
                } else {
                    flush(&mut buf, &mut negate_next, &mut required_terms, &mut excluded_terms);
                    in_quotes = true;
                }
            }
            '-' if !in_quotes && buf.is_empty() => {
                negate_next = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                flush(&mut buf, &mut negate_next, &mut required_terms, &mut excluded_terms);
            }
            c => buf.push(c),
        }
    }
    flush(&mut buf, &mut negate_next, &mut required_terms, &mut excluded_terms);

    ParsedQuery {
        phrases,
        required_terms,
        excluded_terms,
    }
}

/// Concatenates every string value reachable (one level into arrays, per
/// common text-index field usage) from `doc` into a single token stream.
fn collect_tokens(doc: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_strings(doc, &mut out);
    out
}

fn collect_strings(v: &Value, out: &mut Vec<String>) {
    match v {
        Value::String(s) => out.extend(tokenize(s)),
        Value::Array(items) => {
            for item in items {
                collect_strings(item, out);
            }
        }
        Value::Document(d) => {
            for (_, child) in d.iter() {
                collect_strings(child, out);
            }
        }
        _ => {}
    }
}

fn contains_phrase(tokens: &[String], phrase: &[String]) -> bool {
    if phrase.is_empty() || phrase.len() > tokens.len() {
        return false;
    }
    tokens.windows(phrase.len()).any(|w| w == phrase)
}

/// Scores every document against a `$text` clause, dropping non-matches.
/// Relevance is a simple term-frequency count.
pub fn score(docs: &[Value], text_clause: &Value) -> AevumResult<Vec<(Value, f64)>> {
    let d = match text_clause {
        Value::Document(d) => d,
        _ => return Err(AevumError::bad_input("$text requires a document operand")),
    };
    let search = match d.get("$search") {
        Some(Value::String(s)) => s,
        _ => return Err(AevumError::missing_required("$text requires a '$search' string")),
    };
    let case_sensitive = matches!(d.get("$caseSensitive"), Some(Value::Bool(true)));
    let _ = case_sensitive; // tokenization already folds case; flag accepted for grammar compatibility

    let query = parse_query(search);
    if query.required_terms.is_empty() && query.phrases.is_empty() {
        return Err(AevumError::bad_input("$text query has no positive terms"));
    }

    let mut out = Vec::new();
    for doc in docs {
        let tokens = collect_tokens(doc);
        if tokens.is_empty() {
            continue;
        }
        if query.excluded_terms.iter().any(|t| tokens.contains(t)) {
            continue;
        }
        if !query.phrases.iter().all(|p| contains_phrase(&tokens, p)) {
            continue;
        }
        let mut hits = 0usize;
        for term in &query.required_terms {
            hits += tokens.iter().filter(|t| *t == term).count();
        }
        for phrase in &query.phrases {
            hits += phrase.len();
        }
        if hits == 0 && !query.phrases.is_empty() {
            // Phrase-only query: presence already confirmed above, so any
            // non-zero phrase count still yields a positive score.
            hits = query.phrases.iter().map(|p| p.len()).sum();
        }
        if hits == 0 {
            continue;
        }
        let score = hits as f64 / tokens.len() as f64;
        out.push((doc.clone(), score));
    }

    out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::from_json;

    fn doc(j: serde_json::Value) -> Value {
        from_json(&j)
    }

    #[test]
    fn matches_any_required_term() {
        let docs = vec![
            doc(serde_json::json!({"_id": 1, "body": "rust systems programming"})),
            doc(serde_json::json!({"_id": 2, "body": "cooking recipes"})),
        ];
        let clause = doc(serde_json::json!({"$search": "rust"}));
        let results = score(&docs, &clause).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(value::path_get(&results[0].0, "_id").into_scalar(), Value::Int64(1));
    }

    #[test]
    fn excludes_negated_terms() {
        let docs = vec![doc(serde_json::json!({"_id": 1, "body": "rust and coffee"}))];
        let clause = doc(serde_json::json!({"$search": "rust -coffee"}));
        let results = score(&docs, &clause).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn requires_quoted_phrase_contiguity() {
        let docs = vec![
            doc(serde_json::json!({"_id": 1, "body": "systems programming in rust"})),
            doc(serde_json::json!({"_id": 2, "body": "programming systems with rust"})),
        ];
        let clause = doc(serde_json::json!({"$search": "\"systems programming\""}));
        let results = score(&docs, &clause).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(value::path_get(&results[0].0, "_id").into_scalar(), Value::Int64(1));
    }
}
