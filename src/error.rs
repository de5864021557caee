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

//! # Error Taxonomy & Diagnostics
//!
//! `AevumError` is the single error type threaded through the evaluator,
//! matcher, update engine, projection engine, and pipeline executor. Message
//! templates are fixed exactly as observed against the reference server
//! because the dual-target test harness asserts on them verbatim — do not
//! reword a variant's `Display` impl without checking it against that
//! behavior first.

use thiserror::Error;

/// A structured error kind produced anywhere in the core.
///
/// Two variants carry a MongoDB-compatible numeric error code
/// (`DuplicateKey` = 11000, `IndexDefinitionError` = 67); the rest have no
/// reference numeric code and are identified by kind + message alone.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AevumError {
    #[error("{0}")]
    TypeMismatch(String),

    #[error("{0}")]
    DomainError(String),

    #[error("can't $mod by zero")]
    DivisionByZero,

    #[error("{0}")]
    MissingRequired(String),

    #[error("unknown group operator '{0}'")]
    UnknownOperator(String),

    #[error("{0}")]
    BadInput(String),

    #[error("E11000 duplicate key error: {0}")]
    DuplicateKey(String),

    #[error("bad hint: {0}")]
    BadHint(String),

    #[error("{0}")]
    IndexDefinitionError(String),

    #[error("text index required to use $text query")]
    NoTextIndex,

    #[error("{0}")]
    InvalidPositionalOperator(String),
}

impl AevumError {
    /// The MongoDB-compatible numeric error code for this kind, if one is
    /// specified. `None` means "no reference code" rather than "code zero".
    pub fn code(&self) -> Option<i32> {
        match self {
            AevumError::DuplicateKey(_) => Some(11000),
            AevumError::IndexDefinitionError(_) => Some(67),
            _ => None,
        }
    }

    /// Stable string tag for the error kind, used by `Display`/logging and by
    /// the FFI layer when it needs to report a kind without a typed error.
    pub fn kind_name(&self) -> &'static str {
        match self {
            AevumError::TypeMismatch(_) => "TypeMismatch",
            AevumError::DomainError(_) => "DomainError",
            AevumError::DivisionByZero => "DivisionByZero",
            AevumError::MissingRequired(_) => "MissingRequired",
            AevumError::UnknownOperator(_) => "UnknownOperator",
            AevumError::BadInput(_) => "BadInput",
            AevumError::DuplicateKey(_) => "DuplicateKey",
            AevumError::BadHint(_) => "BadHint",
            AevumError::IndexDefinitionError(_) => "IndexDefinitionError",
            AevumError::NoTextIndex => "NoTextIndex",
            AevumError::InvalidPositionalOperator(_) => "InvalidPositionalOperator",
        }
    }

    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        AevumError::TypeMismatch(msg.into())
    }

    pub fn domain(msg: impl Into<String>) -> Self {
        AevumError::DomainError(msg.into())
    }

    pub fn missing_required(msg: impl Into<String>) -> Self {
        AevumError::MissingRequired(msg.into())
    }

    pub fn bad_input(msg: impl Into<String>) -> Self {
        AevumError::BadInput(msg.into())
    }
}

pub type AevumResult<T> = Result<T, AevumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_carries_code_11000() {
        let e = AevumError::DuplicateKey("email: null".to_string());
        assert_eq!(e.code(), Some(11000));
        assert!(e.to_string().contains("E11000"));
    }

    #[test]
    fn index_definition_error_carries_code_67() {
        let e = AevumError::IndexDefinitionError("TTL index may not be compound".to_string());
        assert_eq!(e.code(), Some(67));
    }

    #[test]
    fn division_by_zero_message_matches_reference() {
        assert_eq!(AevumError::DivisionByZero.to_string(), "can't $mod by zero");
    }

    #[test]
    fn kinds_without_code_return_none() {
        assert_eq!(AevumError::NoTextIndex.code(), None);
        assert_eq!(AevumError::UnknownOperator("$foo".into()).code(), None);
    }
}
