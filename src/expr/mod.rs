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

//! # Expression Evaluator
//!
//! Rather than dispatch on a raw operator string every time an expression
//! is invoked and re-walk the query JSON on each call, this module compiles
//! the expression JSON into a typed [`Expr`] tree once ([`compile`]) and
//! evaluates the tree without re-parsing on the hot path ([`eval`]).

mod arithmetic;
mod array;
mod control;
mod date;
mod object;
mod string;
mod trig;

use std::cmp::Ordering;

use crate::error::{AevumError, AevumResult};
use crate::value::{self, Document, Value};

/// A compiled aggregation expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// `$a.b` — a field path resolved against the current document.
    FieldPath(String),
    /// `$$NAME` — a variable reference.
    Variable(String),
    Array(Vec<Expr>),
    /// A literal document whose values may themselves be expressions.
    Doc(Vec<(String, Expr)>),
    Op(String, Box<OpArgs>),
}

/// Operator-call argument shape. Per-operator, the reference accepts array,
/// single-scalar, or named-field-document argument forms.
#[derive(Debug, Clone, PartialEq)]
pub enum OpArgs {
    Array(Vec<Expr>),
    Single(Expr),
    Doc(Vec<(String, Expr)>),
}

/// Compiles a document/array/scalar [`Value`] (as parsed from the wire
/// format) into an [`Expr`] tree. This is the single compile step: it runs
/// once per pipeline/update compilation, not once per document evaluated.
pub fn compile(v: &Value) -> Expr {
    match v {
        Value::String(s) => {
            if let Some(name) = s.strip_prefix("$$") {
                Expr::Variable(name.to_string())
            } else if let Some(path) = s.strip_prefix('$') {
                Expr::FieldPath(path.to_string())
            } else {
                Expr::Literal(Value::String(s.clone()))
            }
        }
        Value::Array(items) => Expr::Array(items.iter().map(compile).collect()),
        Value::Document(d) => compile_document(d),
        other => Expr::Literal(other.clone()),
    }
}

fn compile_document(d: &Document) -> Expr {
    if d.len() == 1 {
        let (key, val) = d.iter().next().unwrap();
        if key == "$literal" {
            return Expr::Literal(val.clone());
        }
        if key.starts_with('$') {
            return Expr::Op(key[1..].to_string(), Box::new(compile_args(val)));
        }
    }
    Expr::Doc(
        d.iter()
            .map(|(k, v)| (k.clone(), compile(v)))
            .collect(),
    )
}

fn compile_args(v: &Value) -> OpArgs {
    match v {
        Value::Array(items) => OpArgs::Array(items.iter().map(compile).collect()),
        Value::Document(d) => OpArgs::Doc(d.iter().map(|(k, v)| (k.clone(), compile(v))).collect()),
        other => OpArgs::Single(compile(other)),
    }
}

/// The lexical variable environment threaded through evaluation. `$let`
/// pushes a fresh frame; lookups scan from the most recently pushed frame
/// backward, so nested same-name bindings shadow their enclosing scope.
#[derive(Debug, Clone)]
pub struct Env {
    pub root: Value,
    pub current: Value,
    pub now: i64,
    frames: Vec<(String, Value)>,
}

impl Env {
    pub fn new(root: Value, now: i64) -> Self {
        Env {
            current: root.clone(),
            root,
            now,
            frames: Vec::new(),
        }
    }

    pub fn with_current(&self, current: Value) -> Self {
        let mut e = self.clone();
        e.current = current;
        e
    }

    pub fn with_var(&self, name: impl Into<String>, value: Value) -> Self {
        let mut e = self.clone();
        e.frames.push((name.into(), value));
        e
    }

    pub fn lookup(&self, name: &str) -> AevumResult<Value> {
        match name {
            "ROOT" => return Ok(self.root.clone()),
            "CURRENT" => return Ok(self.current.clone()),
            "REMOVE" => return Ok(Value::Missing),
            "NOW" => return Ok(Value::Date(self.now)),
            _ => {}
        }
        for (n, v) in self.frames.iter().rev() {
            if n == name {
                return Ok(v.clone());
            }
        }
        Err(AevumError::type_mismatch(format!(
            "Use of undefined variable: {}",
            name
        )))
    }
}

/// Evaluates a compiled expression against the current document and
/// environment. Errors propagate to the caller; `$convert`/`$dateToString`/`$dateFromString` intercept
/// internally via their own `onError`/`onNull` handling.
pub fn eval(expr: &Expr, env: &Env) -> AevumResult<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::FieldPath(path) => Ok(value::path_get(&env.current, path).into_scalar()),
        Expr::Variable(name) => env.lookup(name),
        Expr::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for it in items {
                out.push(eval(it, env)?);
            }
            Ok(Value::Array(out))
        }
        Expr::Doc(pairs) => {
            let mut out = Document::new();
            for (k, v) in pairs {
                out.insert(k.clone(), eval(v, env)?);
            }
            Ok(Value::Document(out))
        }
        Expr::Op(name, args) => dispatch(name, args, env),
    }
}

/// Evaluates every element of an `Array`/`Single` argument shape into a
/// `Vec<Value>` (eager evaluation, used by the large majority of operators
/// that don't need lazy/short-circuit semantics).
fn eval_array_args(args: &OpArgs, env: &Env) -> AevumResult<Vec<Value>> {
    match args {
        OpArgs::Array(items) => items.iter().map(|e| eval(e, env)).collect(),
        OpArgs::Single(e) => Ok(vec![eval(e, env)?]),
        OpArgs::Doc(_) => Err(AevumError::type_mismatch(
            "expected an array or scalar argument, found a document",
        )),
    }
}

/// Evaluates a `Doc` argument shape into a field-name -> Value map (used by
/// named-parameter operators like `$dateToString`, `$convert`, `$regexFind`).
fn eval_doc_args(args: &OpArgs, env: &Env) -> AevumResult<Document> {
    match args {
        OpArgs::Doc(pairs) => {
            let mut d = Document::new();
            for (k, v) in pairs {
                d.insert(k.clone(), eval(v, env)?);
            }
            Ok(d)
        }
        OpArgs::Single(_) | OpArgs::Array(_) => Err(AevumError::missing_required(
            "expected a document of named arguments",
        )),
    }
}

fn dispatch(name: &str, args: &OpArgs, env: &Env) -> AevumResult<Value> {
    match name {
        // --- Comparison ---
        "eq" | "ne" | "gt" | "gte" | "lt" | "lte" | "cmp" => {
            let vs = eval_array_args(args, env)?;
            eval_comparison(name, &vs)
        }

        // --- Logical (short-circuiting) ---
        "and" => eval_and(args, env),
        "or" => eval_or(args, env),
        "not" => {
            let vs = eval_array_args(args, env)?;
            let v = vs.into_iter().next().ok_or_else(|| {
                AevumError::missing_required("$not requires exactly one argument")
            })?;
            Ok(Value::Bool(!value::is_truthy(&v)))
        }

        // --- Conditional (lazy branches) ---
        "cond" => control::eval_cond(args, env),
        "ifNull" => control::eval_if_null(args, env),
        "switch" => control::eval_switch(args, env),
        "let" => control::eval_let(args, env),

        // --- Arithmetic ---
        "add" | "subtract" | "multiply" | "divide" | "mod" | "abs" | "ceil" | "floor"
        | "round" | "trunc" | "pow" | "sqrt" | "exp" | "ln" | "log" | "log10" | "rand" => {
            arithmetic::eval(name, args, env)
        }

        // --- Trigonometric ---
        "sin" | "cos" | "tan" | "asin" | "acos" | "atan" | "atan2" | "sinh" | "cosh" | "tanh"
        | "asinh" | "acosh" | "atanh" | "degreesToRadians" | "radiansToDegrees" => {
            let vs = eval_array_args(args, env)?;
            trig::eval(name, &vs)
        }

        // --- String ---
        "concat" | "toUpper" | "toLower" | "substrCP" | "substrBytes" | "strLenCP"
        | "strLenBytes" | "split" | "trim" | "ltrim" | "rtrim" | "indexOfCP" | "indexOfBytes"
        | "regexFind" | "regexFindAll" | "regexMatch" | "replaceOne" | "replaceAll"
        | "strcasecmp" => string::eval(name, args, env),

        // --- Array ---
        "size" | "arrayElemAt" | "slice" | "concatArrays" | "in" | "first" | "last"
        | "indexOfArray" | "isArray" | "range" | "reverseArray" | "arrayToObject"
        | "objectToArray" | "zip" | "sortArray" | "setUnion" | "setIntersection"
        | "setDifference" | "setEquals" | "setIsSubset" | "allElementsTrue"
        | "anyElementTrue" => array::eval(name, args, env),
        "map" => array::eval_map(args, env),
        "filter" => array::eval_filter(args, env),
        "reduce" => array::eval_reduce(args, env),

        // --- Object ---
        "getField" | "setField" | "mergeObjects" => object::eval(name, args, env),

        // --- Type ---
        "type" | "isNumber" | "toInt" | "toLong" | "toDouble" | "toDecimal" | "toBool"
        | "toDate" | "toString" | "toObjectId" | "convert" => object::eval_type(name, args, env),

        // --- Date ---
        "year" | "month" | "dayOfMonth" | "hour" | "minute" | "second" | "millisecond"
        | "dayOfWeek" | "dayOfYear" | "week" | "isoWeek" | "isoWeekYear" | "isoDayOfWeek"
        | "dateToString" | "dateFromString" | "dateAdd" | "dateSubtract" | "dateDiff"
        | "dateFromParts" | "dateToParts" => date::eval(name, args, env),

        _ => Err(AevumError::UnknownOperator(format!("${}", name))),
    }
}

fn eval_and(args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let items = match args {
        OpArgs::Array(items) => items.clone(),
        OpArgs::Single(e) => vec![e.clone()],
        OpArgs::Doc(_) => return Err(AevumError::bad_input("$and requires an array")),
    };
    for it in &items {
        if !value::is_truthy(&eval(it, env)?) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn eval_or(args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let items = match args {
        OpArgs::Array(items) => items.clone(),
        OpArgs::Single(e) => vec![e.clone()],
        OpArgs::Doc(_) => return Err(AevumError::bad_input("$or requires an array")),
    };
    for it in &items {
        if value::is_truthy(&eval(it, env)?) {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn eval_comparison(name: &str, vs: &[Value]) -> AevumResult<Value> {
    if vs.len() != 2 {
        return Err(AevumError::missing_required(format!(
            "${} requires exactly 2 arguments",
            name
        )));
    }
    let ord = value::compare(&vs[0], &vs[1]);
    Ok(match name {
        "eq" => Value::Bool(value::equal_structural(&vs[0], &vs[1])),
        "ne" => Value::Bool(!value::equal_structural(&vs[0], &vs[1])),
        "gt" => Value::Bool(ord == Ordering::Greater),
        "gte" => Value::Bool(ord != Ordering::Less),
        "lt" => Value::Bool(ord == Ordering::Less),
        "lte" => Value::Bool(ord != Ordering::Greater),
        "cmp" => {
            if matches!(vs[0], Value::Null | Value::Missing) || matches!(vs[1], Value::Null | Value::Missing) {
                if vs[0] == Value::Missing || vs[1] == Value::Missing {
                    return Ok(Value::Null);
                }
            }
            Value::Int64(match ord {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            })
        }
        _ => unreachable!(),
    })
}

/// True if any of `vs` is `Null` or `Missing` — the shared null/missing
/// propagation check used by arithmetic, `$cmp`, and date-extraction
/// operators.
pub(crate) fn any_nullish(vs: &[Value]) -> bool {
    vs.iter().any(|v| matches!(v, Value::Null | Value::Missing))
}

pub(crate) fn as_f64_checked(v: &Value, op: &str) -> AevumResult<f64> {
    match v {
        Value::Int64(i) => Ok(*i as f64),
        Value::Double(d) => Ok(*d),
        other => Err(AevumError::type_mismatch(format!(
            "{} only supports numeric types, not {}",
            op,
            value::type_name(other)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::from_json;

    fn eval_expr(doc: &serde_json::Value, expr: &serde_json::Value) -> AevumResult<Value> {
        let root = from_json(doc);
        let env = Env::new(root, 0);
        let compiled = compile(&from_json(expr));
        eval(&compiled, &env)
    }

    #[test]
    fn field_path_resolves_nested() {
        let v = eval_expr(&serde_json::json!({"a": {"b": 5}}), &serde_json::json!("$a.b")).unwrap();
        assert_eq!(v, Value::Int64(5));
    }

    #[test]
    fn literal_escape_prevents_operator_interpretation() {
        let v = eval_expr(
            &serde_json::json!({}),
            &serde_json::json!({"$literal": {"$gt": 5}}),
        )
        .unwrap();
        assert_eq!(
            v,
            from_json(&serde_json::json!({"$gt": 5}))
        );
    }

    #[test]
    fn and_short_circuits_on_first_false() {
        let v = eval_expr(
            &serde_json::json!({}),
            &serde_json::json!({"$and": [false, {"$divide": [1, 0]}]}),
        )
        .unwrap();
        // If $and didn't short-circuit, $divide would still just yield Null
        // (not error) per this engine's convention, so assert the overall
        // result directly instead.
        assert_eq!(v, Value::Bool(false));
    }

    #[test]
    fn eq_uses_structural_equality_not_ordering_equality() {
        let v = eval_expr(
            &serde_json::json!({}),
            &serde_json::json!({"$eq": [1, 1.0]}),
        )
        .unwrap();
        // BSON ordering-equal but this is still $eq's job to say true since
        // MongoDB's $eq uses BSON comparison equality, not strict structural
        // type identity.
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn variable_scoping_shadows_inner_let() {
        let env = Env::new(from_json(&serde_json::json!({})), 0);
        let inner = compile(&from_json(&serde_json::json!({
            "$let": {
                "vars": {"x": 1},
                "in": {
                    "$let": {
                        "vars": {"x": 2},
                        "in": "$$x"
                    }
                }
            }
        })));
        assert_eq!(eval(&inner, &env).unwrap(), Value::Int64(2));
    }
}
