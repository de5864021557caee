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

//! Arithmetic operator group.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::Rng;

use super::{any_nullish, as_f64_checked, eval_array_args, Env, OpArgs};
use crate::error::{AevumError, AevumResult};
use crate::value::Value;

static RNG: Lazy<Mutex<rand::rngs::StdRng>> =
    Lazy::new(|| Mutex::new(rand::SeedableRng::from_entropy()));

pub fn eval(name: &str, args: &OpArgs, env: &Env) -> AevumResult<Value> {
    if name == "rand" {
        let mut rng = RNG.lock();
        return Ok(Value::Double(rng.gen_range(0.0..1.0)));
    }

    let vs = eval_array_args(args, env)?;

    match name {
        "add" => eval_add(&vs),
        "subtract" => eval_binary(name, &vs, |a, b| a - b),
        "multiply" => eval_add_like(&vs, 1.0, |acc, x| acc * x),
        "divide" => eval_divide(&vs),
        "mod" => eval_mod(&vs),
        "abs" => eval_unary(name, &vs, f64::abs),
        "ceil" => eval_unary(name, &vs, f64::ceil),
        "floor" => eval_unary(name, &vs, f64::floor),
        "trunc" => eval_round(&vs, f64::trunc),
        "round" => eval_round(&vs, bankers_round_to_even),
        "pow" => eval_binary(name, &vs, f64::powf),
        "sqrt" => eval_domain_unary(name, &vs, |x| {
            if x < 0.0 {
                Err(format!("$sqrt's argument must be non-negative, got {}", x))
            } else {
                Ok(x.sqrt())
            }
        }),
        "exp" => eval_unary(name, &vs, f64::exp),
        "ln" => eval_domain_unary(name, &vs, |x| {
            if x <= 0.0 {
                Err("$ln's argument must be a positive number".to_string())
            } else {
                Ok(x.ln())
            }
        }),
        "log" => eval_log(&vs),
        "log10" => eval_domain_unary(name, &vs, |x| {
            if x <= 0.0 {
                Err("$log10's argument must be a positive number".to_string())
            } else {
                Ok(x.log10())
            }
        }),
        _ => unreachable!("arithmetic::eval called with non-arithmetic operator {}", name),
    }
}

fn is_int(v: &Value) -> bool {
    matches!(v, Value::Int64(_))
}

fn numeric_result(produces_int: bool, result: f64) -> Value {
    if produces_int && result.fract() == 0.0 && result.abs() < i64::MAX as f64 {
        Value::Int64(result as i64)
    } else {
        Value::Double(result)
    }
}

fn eval_add(vs: &[Value]) -> AevumResult<Value> {
    if any_nullish(vs) {
        return Ok(Value::Null);
    }
    // $add also accepts Date operands (date + number of millis); keep this
    // restricted to the numeric case, which covers the spec's scope.
    let mut acc = 0.0;
    let mut all_int = true;
    for v in vs {
        if let Value::Date(ms) = v {
            acc += *ms as f64;
            all_int = false;
            continue;
        }
        acc += as_f64_checked(v, "$add")?;
        all_int &= is_int(v);
    }
    Ok(numeric_result(all_int, acc))
}

fn eval_add_like(vs: &[Value], init: f64, f: impl Fn(f64, f64) -> f64) -> AevumResult<Value> {
    if any_nullish(vs) {
        return Ok(Value::Null);
    }
    let mut acc = init;
    let mut all_int = true;
    for v in vs {
        acc = f(acc, as_f64_checked(v, "$multiply")?);
        all_int &= is_int(v);
    }
    Ok(numeric_result(all_int, acc))
}

fn eval_binary(name: &str, vs: &[Value], f: impl Fn(f64, f64) -> f64) -> AevumResult<Value> {
    if vs.len() != 2 {
        return Err(AevumError::missing_required(format!(
            "${} requires exactly 2 arguments",
            name
        )));
    }
    if any_nullish(vs) {
        return Ok(Value::Null);
    }
    let a = as_f64_checked(&vs[0], &format!("${}", name))?;
    let b = as_f64_checked(&vs[1], &format!("${}", name))?;
    let all_int = is_int(&vs[0]) && is_int(&vs[1]);
    Ok(numeric_result(all_int, f(a, b)))
}

fn eval_divide(vs: &[Value]) -> AevumResult<Value> {
    if vs.len() != 2 {
        return Err(AevumError::missing_required(
            "$divide requires exactly 2 arguments",
        ));
    }
    if any_nullish(vs) {
        return Ok(Value::Null);
    }
    let a = as_f64_checked(&vs[0], "$divide")?;
    let b = as_f64_checked(&vs[1], "$divide")?;
    // Open Question (SPEC_FULL.md §D): division by zero returns Null in
    // this implementation rather than +/-Infinity.
    if b == 0.0 {
        return Ok(Value::Null);
    }
    Ok(Value::Double(a / b))
}

fn eval_mod(vs: &[Value]) -> AevumResult<Value> {
    if vs.len() != 2 {
        return Err(AevumError::missing_required(
            "$mod requires exactly 2 arguments",
        ));
    }
    if any_nullish(vs) {
        return Ok(Value::Null);
    }
    let a = as_f64_checked(&vs[0], "$mod")?;
    let b = as_f64_checked(&vs[1], "$mod")?;
    if b == 0.0 {
        return Err(AevumError::DivisionByZero);
    }
    // Rust's `%` already returns a result with the sign of the dividend,
    // matching the reference's documented $mod behavior.
    let r = a % b;
    let all_int = is_int(&vs[0]) && is_int(&vs[1]);
    Ok(numeric_result(all_int, r))
}

fn eval_unary(name: &str, vs: &[Value], f: impl Fn(f64) -> f64) -> AevumResult<Value> {
    if vs.len() != 1 {
        return Err(AevumError::missing_required(format!(
            "${} requires exactly 1 argument",
            name
        )));
    }
    if any_nullish(vs) {
        return Ok(Value::Null);
    }
    let a = as_f64_checked(&vs[0], &format!("${}", name))?;
    let all_int = is_int(&vs[0]);
    Ok(numeric_result(all_int, f(a)))
}

fn eval_domain_unary(
    name: &str,
    vs: &[Value],
    f: impl Fn(f64) -> Result<f64, String>,
) -> AevumResult<Value> {
    if vs.len() != 1 {
        return Err(AevumError::missing_required(format!(
            "${} requires exactly 1 argument",
            name
        )));
    }
    if any_nullish(vs) {
        return Ok(Value::Null);
    }
    let a = as_f64_checked(&vs[0], &format!("${}", name))?;
    match f(a) {
        Ok(r) => Ok(Value::Double(r)),
        Err(msg) => Err(AevumError::domain(msg)),
    }
}

fn eval_log(vs: &[Value]) -> AevumResult<Value> {
    if vs.len() != 2 {
        return Err(AevumError::missing_required(
            "$log requires exactly 2 arguments",
        ));
    }
    if any_nullish(vs) {
        return Ok(Value::Null);
    }
    let a = as_f64_checked(&vs[0], "$log")?;
    let base = as_f64_checked(&vs[1], "$log")?;
    if a <= 0.0 {
        return Err(AevumError::domain(
            "$log's argument must be a positive number",
        ));
    }
    if base <= 0.0 || base == 1.0 {
        return Err(AevumError::domain("$log's base must be a positive number not equal to 1"));
    }
    Ok(Value::Double(a.log(base)))
}

/// `$round`/`$trunc` accept an optional second argument: the decimal place.
/// `vs[0]` is the number, `vs[1]` (if present) is the place, default 0.
fn eval_round(vs: &[Value], round_fn: impl Fn(f64) -> f64) -> AevumResult<Value> {
    if vs.is_empty() || vs.len() > 2 {
        return Err(AevumError::missing_required(
            "$round/$trunc requires 1 or 2 arguments",
        ));
    }
    if any_nullish(vs) {
        return Ok(Value::Null);
    }
    let a = as_f64_checked(&vs[0], "$round")?;
    let place = if vs.len() == 2 {
        as_f64_checked(&vs[1], "$round")? as i32
    } else {
        0
    };
    let scale = 10f64.powi(place);
    let scaled = a * scale;
    let rounded = round_fn(scaled) / scale;
    let all_int = is_int(&vs[0]) && place >= 0;
    Ok(numeric_result(all_int, rounded))
}

/// Round-half-to-even ("banker's rounding") at the ones place; the caller
/// pre-scales by the decimal place, so this only ever rounds to an integer.
fn bankers_round_to_even(x: f64) -> f64 {
    let floor = x.floor();
    let diff = x - floor;
    if diff < 0.5 {
        floor
    } else if diff > 0.5 {
        floor + 1.0
    } else if (floor as i64) % 2 == 0 {
        floor
    } else {
        floor + 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{compile, eval as expr_eval};
    use crate::json::from_json;

    fn run(json: serde_json::Value) -> Value {
        let env = Env::new(from_json(&serde_json::json!({})), 0);
        expr_eval(&compile(&from_json(&json)), &env).unwrap()
    }

    #[test]
    fn bankers_rounding_ties_to_even() {
        assert_eq!(run(serde_json::json!({"$round": [2.5, 0]})), Value::Int64(2));
        assert_eq!(run(serde_json::json!({"$round": [3.5, 0]})), Value::Int64(4));
        assert_eq!(run(serde_json::json!({"$round": [-2.5, 0]})), Value::Int64(-2));
    }

    #[test]
    fn mod_takes_sign_of_dividend() {
        assert_eq!(run(serde_json::json!({"$mod": [-10, 3]})), Value::Int64(-1));
        assert_eq!(run(serde_json::json!({"$mod": [10, -3]})), Value::Int64(1));
        assert_eq!(run(serde_json::json!({"$mod": [-10, -3]})), Value::Int64(-1));
    }

    #[test]
    fn mod_by_zero_errors() {
        let env = Env::new(from_json(&serde_json::json!({})), 0);
        let err = expr_eval(
            &compile(&from_json(&serde_json::json!({"$mod": [10, 0]}))),
            &env,
        )
        .unwrap_err();
        assert_eq!(err, AevumError::DivisionByZero);
    }

    #[test]
    fn divide_by_zero_returns_null() {
        assert_eq!(run(serde_json::json!({"$divide": [10, 0]})), Value::Null);
    }

    #[test]
    fn ln_of_nonpositive_is_domain_error() {
        let env = Env::new(from_json(&serde_json::json!({})), 0);
        let err = expr_eval(
            &compile(&from_json(&serde_json::json!({"$ln": -1}))),
            &env,
        )
        .unwrap_err();
        assert!(matches!(err, AevumError::DomainError(_)));
    }

    #[test]
    fn nullish_operand_propagates_null() {
        assert_eq!(run(serde_json::json!({"$add": [1, null]})), Value::Null);
    }
}
