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

//! Conditional/control operator group.
//!
//! Unlike the arithmetic/string/array groups, these operators evaluate their
//! branches lazily: `$cond`'s untaken branch, `$switch`'s unmatched cases,
//! and `$let`'s outer-scope `vars` must not be eagerly evaluated against the
//! wrong environment, so this module works directly with `Expr` rather than
//! going through `eval_array_args`.

use super::{compile, eval, Env, Expr, OpArgs};
use crate::error::{AevumError, AevumResult};
use crate::value::{self, Value};

pub fn eval_cond(args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let (if_e, then_e, else_e) = match args {
        OpArgs::Array(items) if items.len() == 3 => {
            (items[0].clone(), items[1].clone(), items[2].clone())
        }
        OpArgs::Doc(pairs) => {
            let get = |name: &str| {
                pairs
                    .iter()
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v.clone())
            };
            let if_e = get("if").ok_or_else(|| {
                AevumError::missing_required("$cond requires an 'if' field")
            })?;
            let then_e = get("then").ok_or_else(|| {
                AevumError::missing_required("$cond requires a 'then' field")
            })?;
            let else_e = get("else").ok_or_else(|| {
                AevumError::missing_required("$cond requires an 'else' field")
            })?;
            (if_e, then_e, else_e)
        }
        _ => {
            return Err(AevumError::missing_required(
                "$cond requires 3 arguments or an {if,then,else} document",
            ))
        }
    };
    if value::is_truthy(&eval(&if_e, env)?) {
        eval(&then_e, env)
    } else {
        eval(&else_e, env)
    }
}

pub fn eval_if_null(args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let items = match args {
        OpArgs::Array(items) if items.len() >= 2 => items.clone(),
        _ => {
            return Err(AevumError::missing_required(
                "$ifNull requires at least 2 arguments",
            ))
        }
    };
    let (last, rest) = items.split_last().unwrap();
    for e in rest {
        let v = eval(e, env)?;
        if !matches!(v, Value::Null | Value::Missing) {
            return Ok(v);
        }
    }
    eval(last, env)
}

pub fn eval_switch(args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let pairs = match args {
        OpArgs::Doc(pairs) => pairs,
        _ => {
            return Err(AevumError::missing_required(
                "$switch requires a {branches, default} document",
            ))
        }
    };
    let branches_expr = pairs
        .iter()
        .find(|(k, _)| k == "branches")
        .map(|(_, v)| v.clone())
        .ok_or_else(|| AevumError::missing_required("$switch requires a 'branches' array"))?;
    let branches = match branches_expr {
        Expr::Array(items) => items,
        _ => {
            return Err(AevumError::type_mismatch(
                "$switch's 'branches' must be an array",
            ))
        }
    };
    for branch in &branches {
        let (case_e, then_e) = match branch {
            Expr::Doc(fields) => {
                let case_e = fields
                    .iter()
                    .find(|(k, _)| k == "case")
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| {
                        AevumError::missing_required("$switch branch requires a 'case' field")
                    })?;
                let then_e = fields
                    .iter()
                    .find(|(k, _)| k == "then")
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| {
                        AevumError::missing_required("$switch branch requires a 'then' field")
                    })?;
                (case_e, then_e)
            }
            _ => {
                return Err(AevumError::type_mismatch(
                    "$switch's 'branches' must be {case, then} documents",
                ))
            }
        };
        if value::is_truthy(&eval(&case_e, env)?) {
            return eval(&then_e, env);
        }
    }
    if let Some((_, default_e)) = pairs.iter().find(|(k, _)| k == "default") {
        eval(default_e, env)
    } else {
        Err(AevumError::BadInput(
            "$switch could not find a matching branch for an input, and no default was specified"
                .to_string(),
        ))
    }
}

pub fn eval_let(args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let pairs = match args {
        OpArgs::Doc(pairs) => pairs,
        _ => {
            return Err(AevumError::missing_required(
                "$let requires a {vars, in} document",
            ))
        }
    };
    let vars_expr = pairs
        .iter()
        .find(|(k, _)| k == "vars")
        .map(|(_, v)| v.clone())
        .ok_or_else(|| AevumError::missing_required("$let requires a 'vars' document"))?;
    let in_expr = pairs
        .iter()
        .find(|(k, _)| k == "in")
        .map(|(_, v)| v.clone())
        .ok_or_else(|| AevumError::missing_required("$let requires an 'in' expression"))?;
    let var_pairs = match vars_expr {
        Expr::Doc(fields) => fields,
        _ => {
            return Err(AevumError::type_mismatch(
                "$let's 'vars' must be a document",
            ))
        }
    };
    // Each binding is evaluated eagerly against the *outer* scope before the
    // new frame is pushed, so `vars` cannot reference sibling bindings in the
    // same $let (matches the reference's lexical-scoping rule).
    let mut child = env.clone();
    for (name, expr) in &var_pairs {
        let v = eval(expr, env)?;
        child = child.with_var(name.clone(), v);
    }
    eval(&in_expr, &child)
}

/// Used by `$redact` (via the match/pipeline layer) to compile the sentinel
/// variable names `$$PRUNE`/`$$KEEP`/`$$DESCEND` into their `Expr` form; kept
/// here since it's a control-flow concern rather than an object/array one.
pub fn compile_redact_action(v: &Value) -> Expr {
    compile(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{compile, eval as expr_eval};
    use crate::json::from_json;

    fn run(json: serde_json::Value) -> AevumResult<Value> {
        let env = Env::new(from_json(&serde_json::json!({})), 0);
        expr_eval(&compile(&from_json(&json)), &env)
    }

    #[test]
    fn cond_array_form_picks_branch() {
        assert_eq!(
            run(serde_json::json!({"$cond": [true, "yes", "no"]})).unwrap(),
            Value::String("yes".into())
        );
    }

    #[test]
    fn cond_document_form_picks_branch() {
        assert_eq!(
            run(serde_json::json!({"$cond": {"if": false, "then": "yes", "else": "no"}}))
                .unwrap(),
            Value::String("no".into())
        );
    }

    #[test]
    fn if_null_skips_null_and_missing() {
        assert_eq!(
            run(serde_json::json!({"$ifNull": [null, "$missingField", "fallback"]})).unwrap(),
            Value::String("fallback".into())
        );
    }

    #[test]
    fn switch_errors_without_default_or_match() {
        let err = run(serde_json::json!({
            "$switch": {"branches": [{"case": false, "then": 1}]}
        }))
        .unwrap_err();
        assert!(matches!(err, AevumError::BadInput(_)));
    }

    #[test]
    fn let_vars_see_only_outer_scope() {
        // The vars document itself must not see its own sibling bindings.
        let v = run(serde_json::json!({
            "$let": {
                "vars": {"a": 1, "b": "$$a"},
                "in": "$$b"
            }
        }));
        assert!(v.is_err());
    }
}
