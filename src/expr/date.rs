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

//! Date operator group. Everything is computed in UTC;
//! ISO week numbers use chrono's built-in ISO 8601 week implementation,
//! which already follows the standard "Jan 4 anchors week 1" convention.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};

use super::{eval, eval_array_args, eval_doc_args, Env, OpArgs};
use crate::error::{AevumError, AevumResult};
use crate::value::{self, Document, Value};

fn to_datetime(ms: i64) -> AevumResult<NaiveDateTime> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| AevumError::domain(format!("{} is not a valid date", ms)))
}

fn as_date_ms(v: &Value, op: &str) -> AevumResult<i64> {
    match v {
        Value::Date(ms) => Ok(*ms),
        other => Err(AevumError::type_mismatch(format!(
            "{} requires a date argument, found: {}",
            op,
            value::type_name(other)
        ))),
    }
}

pub fn eval(name: &str, args: &OpArgs, env: &Env) -> AevumResult<Value> {
    match name {
        "dateToString" => eval_date_to_string(args, env),
        "dateFromString" => eval_date_from_string(args, env),
        "dateAdd" => eval_date_shift(args, env, 1),
        "dateSubtract" => eval_date_shift(args, env, -1),
        "dateDiff" => eval_date_diff(args, env),
        "dateFromParts" => eval_date_from_parts(args, env),
        "dateToParts" => eval_date_to_parts(args, env),
        _ => eval_extraction(name, args, env),
    }
}

/// `$year`/`$month`/.../`$isoDayOfWeek`: each accepts either a bare date
/// expression or a `{date, timezone}` document; timezone is accepted and
/// ignored since this engine only computes in UTC.
fn eval_extraction(name: &str, args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let date_val = match args {
        OpArgs::Doc(_) => {
            let d = eval_doc_args(args, env)?;
            d.get("date").cloned().unwrap_or(Value::Missing)
        }
        _ => {
            let vs = eval_array_args(args, env)?;
            vs.into_iter().next().unwrap_or(Value::Missing)
        }
    };
    if matches!(date_val, Value::Null | Value::Missing) {
        return Ok(Value::Null);
    }
    let ms = as_date_ms(&date_val, &format!("${}", name))?;
    let dt = to_datetime(ms)?;
    let date = dt.date();

    Ok(Value::Int64(match name {
        "year" => date.year() as i64,
        "month" => date.month() as i64,
        "dayOfMonth" => date.day() as i64,
        "hour" => dt.hour() as i64,
        "minute" => dt.minute() as i64,
        "second" => dt.second() as i64,
        "millisecond" => (dt.nanosecond() / 1_000_000) as i64,
        "dayOfWeek" => date.weekday().num_days_from_sunday() as i64 + 1,
        "isoDayOfWeek" => date.weekday().number_from_monday() as i64,
        "dayOfYear" => date.ordinal() as i64,
        "week" => week_number(date),
        "isoWeek" => date.iso_week().week() as i64,
        "isoWeekYear" => date.iso_week().year() as i64,
        _ => unreachable!("date::eval_extraction called with {}", name),
    }))
}

/// Sunday-anchored week number (distinct from ISO week): days before the
/// year's first Sunday fall in week 0.
fn week_number(date: NaiveDate) -> i64 {
    let jan1 = NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap();
    let days_since_start = (date - jan1).num_days();
    let jan1_sunday_offset = jan1.weekday().num_days_from_sunday() as i64;
    let first_sunday = (7 - jan1_sunday_offset) % 7;
    if days_since_start < first_sunday {
        0
    } else {
        1 + (days_since_start - first_sunday) / 7
    }
}

fn format_specifier(dt: &NaiveDateTime, spec: char) -> AevumResult<String> {
    let date = dt.date();
    Ok(match spec {
        'Y' => format!("{:04}", date.year()),
        'm' => format!("{:02}", date.month()),
        'd' => format!("{:02}", date.day()),
        'H' => format!("{:02}", dt.hour()),
        'M' => format!("{:02}", dt.minute()),
        'S' => format!("{:02}", dt.second()),
        'L' => format!("{:03}", dt.nanosecond() / 1_000_000),
        'j' => format!("{:03}", date.ordinal()),
        'w' => format!("{}", date.weekday().num_days_from_sunday() + 1),
        'u' => format!("{}", date.weekday().number_from_monday()),
        'U' => format!("{:02}", week_number(date)),
        'V' => format!("{:02}", date.iso_week().week()),
        'G' => format!("{:04}", date.iso_week().year()),
        '%' => "%".to_string(),
        other => {
            return Err(AevumError::bad_input(format!(
                "invalid $dateToString format specifier '%{}'",
                other
            )))
        }
    })
}

fn eval_date_to_string(args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let d = eval_doc_args(args, env)?;
    let date_val = d.get("date").cloned().unwrap_or(Value::Missing);
    if matches!(date_val, Value::Null | Value::Missing) {
        return Ok(d.get("onNull").cloned().unwrap_or(Value::Null));
    }
    let ms = as_date_ms(&date_val, "$dateToString")?;
    let dt = to_datetime(ms)?;
    let format = match d.get("format") {
        Some(Value::String(s)) => s.clone(),
        _ => "%Y-%m-%dT%H:%M:%S.%LZ".to_string(),
    };
    let mut out = String::new();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' {
            match chars.next() {
                Some(spec) => out.push_str(&format_specifier(&dt, spec)?),
                None => out.push('%'),
            }
        } else {
            out.push(c);
        }
    }
    Ok(Value::String(out))
}

fn eval_date_from_string(args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let d = eval_doc_args(args, env)?;
    let input = d.get("dateString").cloned().unwrap_or(Value::Missing);
    if matches!(input, Value::Null | Value::Missing) {
        return Ok(d.get("onNull").cloned().unwrap_or(Value::Null));
    }
    let s = match &input {
        Value::String(s) => s.clone(),
        other => {
            return Err(AevumError::type_mismatch(format!(
                "$dateFromString requires a string, found: {}",
                value::type_name(other)
            )))
        }
    };
    match parse_iso_string(&s) {
        Ok(ms) => Ok(Value::Date(ms)),
        Err(e) => match d.get("onError") {
            Some(v) => Ok(v.clone()),
            None => Err(e),
        },
    }
}

/// Parses a handful of common ISO-8601-ish forms. This is intentionally not
/// a full RFC 3339 parser: the operator catalog's `format` option lets
/// callers be explicit, and this fallback path covers the common case of
/// `$dateFromString` called without one.
pub(crate) fn parse_iso_string(s: &str) -> AevumResult<i64> {
    let candidates = [
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d",
    ];
    for fmt in candidates {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.and_utc().timestamp_millis());
        }
        if fmt == "%Y-%m-%d" {
            if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
                return Ok(d.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis());
            }
        }
    }
    Err(AevumError::domain(format!(
        "cannot convert '{}' to a date",
        s
    )))
}

pub(crate) fn millis_to_iso_string(ms: i64) -> AevumResult<String> {
    let dt = to_datetime(ms)?;
    Ok(format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        dt.year(),
        dt.month(),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.nanosecond() / 1_000_000
    ))
}

fn unit_str(v: &Value) -> AevumResult<String> {
    match v {
        Value::String(s) => Ok(s.clone()),
        other => Err(AevumError::type_mismatch(format!(
            "expected a unit string, found: {}",
            value::type_name(other)
        ))),
    }
}

fn eval_date_shift(args: &OpArgs, env: &Env, sign: i64) -> AevumResult<Value> {
    let d = eval_doc_args(args, env)?;
    let start = d.get("startDate").cloned().unwrap_or(Value::Missing);
    if matches!(start, Value::Null | Value::Missing) {
        return Ok(Value::Null);
    }
    let ms = as_date_ms(&start, "$dateAdd/$dateSubtract")?;
    let unit = unit_str(d.get("unit").unwrap_or(&Value::Missing))?;
    let amount = match d.get("amount") {
        Some(Value::Int64(i)) => *i * sign,
        Some(Value::Double(f)) => (*f as i64) * sign,
        _ => {
            return Err(AevumError::missing_required(
                "$dateAdd/$dateSubtract requires a numeric 'amount'",
            ))
        }
    };
    let dt = to_datetime(ms)?;
    let shifted = shift_datetime(dt, &unit, amount)?;
    Ok(Value::Date(shifted.and_utc().timestamp_millis()))
}

fn shift_datetime(dt: NaiveDateTime, unit: &str, amount: i64) -> AevumResult<NaiveDateTime> {
    Ok(match unit {
        "millisecond" => dt + Duration::milliseconds(amount),
        "second" => dt + Duration::seconds(amount),
        "minute" => dt + Duration::minutes(amount),
        "hour" => dt + Duration::hours(amount),
        "day" => dt + Duration::days(amount),
        "week" => dt + Duration::weeks(amount),
        "month" => shift_months(dt, amount)?,
        "quarter" => shift_months(dt, amount * 3)?,
        "year" => shift_months(dt, amount * 12)?,
        other => {
            return Err(AevumError::bad_input(format!(
                "unsupported date unit '{}'",
                other
            )))
        }
    })
}

fn shift_months(dt: NaiveDateTime, months: i64) -> AevumResult<NaiveDateTime> {
    let total = dt.year() as i64 * 12 + (dt.month() as i64 - 1) + months;
    let year = total.div_euclid(12) as i32;
    let month = total.rem_euclid(12) as u32 + 1;
    let max_day = days_in_month(year, month);
    let day = dt.day().min(max_day);
    NaiveDate::from_ymd_opt(year, month, day)
        .map(|d| d.and_time(dt.time()))
        .ok_or_else(|| AevumError::domain("date arithmetic produced an invalid calendar date"))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .unwrap();
    let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    (next - first).num_days() as u32
}

fn eval_date_diff(args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let d = eval_doc_args(args, env)?;
    let start = d.get("startDate").cloned().unwrap_or(Value::Missing);
    let end = d.get("endDate").cloned().unwrap_or(Value::Missing);
    if matches!(start, Value::Null | Value::Missing) || matches!(end, Value::Null | Value::Missing)
    {
        return Ok(Value::Null);
    }
    let start_ms = as_date_ms(&start, "$dateDiff")?;
    let end_ms = as_date_ms(&end, "$dateDiff")?;
    let unit = unit_str(d.get("unit").unwrap_or(&Value::Missing))?;
    let diff_ms = end_ms - start_ms;
    let n = match unit.as_str() {
        "millisecond" => diff_ms,
        "second" => diff_ms / 1_000,
        "minute" => diff_ms / 60_000,
        "hour" => diff_ms / 3_600_000,
        "day" => diff_ms / 86_400_000,
        "week" => diff_ms / (86_400_000 * 7),
        "month" | "quarter" | "year" => {
            let start_dt = to_datetime(start_ms)?;
            let end_dt = to_datetime(end_ms)?;
            let months = (end_dt.year() as i64 * 12 + end_dt.month() as i64 - 1)
                - (start_dt.year() as i64 * 12 + start_dt.month() as i64 - 1);
            match unit.as_str() {
                "month" => months,
                "quarter" => months / 3,
                "year" => months / 12,
                _ => unreachable!(),
            }
        }
        other => {
            return Err(AevumError::bad_input(format!(
                "unsupported date unit '{}'",
                other
            )))
        }
    };
    Ok(Value::Int64(n))
}

fn part_i64(d: &Document, key: &str, default: i64) -> AevumResult<i64> {
    match d.get(key) {
        None => Ok(default),
        Some(Value::Int64(i)) => Ok(*i),
        Some(Value::Double(f)) => Ok(*f as i64),
        Some(other) => Err(AevumError::type_mismatch(format!(
            "$dateFromParts's '{}' must be numeric, found: {}",
            key,
            value::type_name(other)
        ))),
    }
}

fn eval_date_from_parts(args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let d = eval_doc_args(args, env)?;
    let hour = part_i64(&d, "hour", 0)?;
    let minute = part_i64(&d, "minute", 0)?;
    let second = part_i64(&d, "second", 0)?;
    let millisecond = part_i64(&d, "millisecond", 0)?;

    let date = if d.contains_key("isoWeekYear") {
        let iso_year = part_i64(&d, "isoWeekYear", 1970)? as i32;
        let iso_week = part_i64(&d, "isoWeek", 1)? as u32;
        let iso_dow = part_i64(&d, "isoDayOfWeek", 1)? as u32;
        NaiveDate::from_isoywd_opt(iso_year, iso_week, weekday_from_iso(iso_dow)?)
            .ok_or_else(|| AevumError::domain("invalid ISO week date in $dateFromParts"))?
    } else {
        let year = part_i64(&d, "year", 1970)? as i32;
        let month = part_i64(&d, "month", 1)? as u32;
        let day = part_i64(&d, "day", 1)? as u32;
        NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| AevumError::domain("invalid calendar date in $dateFromParts"))?
    };
    let time = chrono::NaiveTime::from_hms_milli_opt(
        hour.rem_euclid(24) as u32,
        minute.rem_euclid(60) as u32,
        second.rem_euclid(60) as u32,
        millisecond.rem_euclid(1000) as u32,
    )
    .ok_or_else(|| AevumError::domain("invalid time-of-day in $dateFromParts"))?;
    let dt = date.and_time(time);
    Ok(Value::Date(dt.and_utc().timestamp_millis()))
}

fn weekday_from_iso(n: u32) -> AevumResult<chrono::Weekday> {
    chrono::Weekday::try_from((n.max(1).min(7) - 1) as u8)
        .map_err(|_| AevumError::domain("invalid isoDayOfWeek in $dateFromParts"))
}

fn eval_date_to_parts(args: &OpArgs, env: &Env) -> AevumResult<Value> {
    let d = eval_doc_args(args, env)?;
    let date_val = d.get("date").cloned().unwrap_or(Value::Missing);
    if matches!(date_val, Value::Null | Value::Missing) {
        return Ok(Value::Null);
    }
    let ms = as_date_ms(&date_val, "$dateToParts")?;
    let dt = to_datetime(ms)?;
    let iso8601 = d.get("iso8601").map(value::is_truthy).unwrap_or(false);
    let mut out = Document::new();
    if iso8601 {
        let week = dt.date().iso_week();
        out.insert("isoWeekYear", Value::Int64(week.year() as i64));
        out.insert("isoWeek", Value::Int64(week.week() as i64));
        out.insert(
            "isoDayOfWeek",
            Value::Int64(dt.date().weekday().number_from_monday() as i64),
        );
    } else {
        out.insert("year", Value::Int64(dt.year() as i64));
        out.insert("month", Value::Int64(dt.month() as i64));
        out.insert("day", Value::Int64(dt.day() as i64));
    }
    out.insert("hour", Value::Int64(dt.hour() as i64));
    out.insert("minute", Value::Int64(dt.minute() as i64));
    out.insert("second", Value::Int64(dt.second() as i64));
    out.insert(
        "millisecond",
        Value::Int64((dt.nanosecond() / 1_000_000) as i64),
    );
    Ok(Value::Document(out))
}
