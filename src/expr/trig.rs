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

//! Trigonometric operator group.
//!
//! Domain violations raise [`AevumError::DomainError`]; `NaN` input yields
//! `NaN` except for the range-domain operators (`$asin`, `$acos`, `$acosh`,
//! `$atanh`), which error outside their valid domain. `$sin`/`$cos`/`$tan`
//! error on infinite input.

use super::{any_nullish, as_f64_checked};
use crate::error::{AevumError, AevumResult};
use crate::value::Value;

pub fn eval(name: &str, vs: &[Value]) -> AevumResult<Value> {
    if name == "atan2" {
        if vs.len() != 2 {
            return Err(AevumError::missing_required(
                "$atan2 requires exactly 2 arguments",
            ));
        }
        if any_nullish(vs) {
            return Ok(Value::Null);
        }
        let y = as_f64_checked(&vs[0], "$atan2")?;
        let x = as_f64_checked(&vs[1], "$atan2")?;
        return Ok(Value::Double(y.atan2(x)));
    }

    if vs.len() != 1 {
        return Err(AevumError::missing_required(format!(
            "${} requires exactly 1 argument",
            name
        )));
    }
    if any_nullish(vs) {
        return Ok(Value::Null);
    }
    let x = as_f64_checked(&vs[0], &format!("${}", name))?;

    let result = match name {
        "sin" => finite_domain(name, x, f64::sin)?,
        "cos" => finite_domain(name, x, f64::cos)?,
        "tan" => finite_domain(name, x, f64::tan)?,
        "sinh" => x.sinh(),
        "cosh" => x.cosh(),
        "tanh" => x.tanh(),
        "asin" => range_domain(name, x, -1.0, 1.0, f64::asin)?,
        "acos" => range_domain(name, x, -1.0, 1.0, f64::acos)?,
        "atan" => x.atan(),
        "asinh" => x.asinh(),
        "acosh" => {
            if x < 1.0 {
                return Err(AevumError::domain(format!(
                    "cannot apply $acosh to {}, value must be in [1,inf)",
                    x
                )));
            }
            x.acosh()
        }
        "atanh" => range_domain(name, x, -1.0, 1.0, f64::atanh)?,
        "degreesToRadians" => x.to_radians(),
        "radiansToDegrees" => x.to_degrees(),
        _ => unreachable!("trig::eval called with non-trig operator {}", name),
    };
    Ok(Value::Double(result))
}

fn finite_domain(name: &str, x: f64, f: impl Fn(f64) -> f64) -> AevumResult<f64> {
    if x.is_infinite() {
        return Err(AevumError::domain(format!(
            "cannot apply ${} to {}, value must be in (-inf,inf)",
            name,
            if x > 0.0 { "inf" } else { "-inf" }
        )));
    }
    Ok(f(x))
}

fn range_domain(
    name: &str,
    x: f64,
    lo: f64,
    hi: f64,
    f: impl Fn(f64) -> f64,
) -> AevumResult<f64> {
    if x.is_nan() {
        return Ok(f64::NAN);
    }
    if x < lo || x > hi {
        return Err(AevumError::domain(format!(
            "cannot apply ${} to {}, value must be in [{},{}]",
            name, x, lo, hi
        )));
    }
    Ok(f(x))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asin_out_of_domain_errors() {
        let err = eval("asin", &[Value::Int64(2)]).unwrap_err();
        assert!(matches!(err, AevumError::DomainError(_)));
    }

    #[test]
    fn sin_of_infinity_errors() {
        let err = eval("sin", &[Value::Double(f64::INFINITY)]).unwrap_err();
        assert!(matches!(err, AevumError::DomainError(_)));
    }

    #[test]
    fn tanh_is_defined_everywhere() {
        let v = eval("tanh", &[Value::Double(100.0)]).unwrap();
        assert_eq!(v, Value::Double(100f64.tanh()));
    }
}
