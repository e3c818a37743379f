//! Filters and functions available to text templates.
//!
//! - `rpad`, `rpadtrim`: right-pad (and truncate) to a column width
//! - `displaybytes`: megabytes to a human readable size
//! - `trimstep`: shorten long plan step ids
//! - `derefint`, `derefbool`, `derefstr`: zero value for missing scalars
//! - `computePlanDuration(start, end)`: elapsed time between two timestamps
//! - `equal(a, b)`: value equality

use std::time::Duration;

use chrono::{DateTime, Utc};
use minijinja::value::ValueKind;
use minijinja::{Environment, Error, ErrorKind, Value};

/// Width `trimstep` truncates step ids to when none is given.
pub const DEFAULT_STEP_WIDTH: usize = 40;

pub fn register(env: &mut Environment<'_>) {
    env.add_filter("rpad", rpad);
    env.add_filter("rpadtrim", rpadtrim);
    env.add_filter("displaybytes", displaybytes);
    env.add_filter("trimstep", trimstep);
    env.add_filter("derefint", derefint);
    env.add_filter("derefbool", derefbool);
    env.add_filter("derefstr", derefstr);
    env.add_function("computePlanDuration", compute_plan_duration);
    env.add_function("equal", equal);
    env.set_formatter(|out, state, value| {
        use std::fmt::Write as _;
        match bool_literal(value) {
            Some(literal) => Ok(out.write_str(literal)?),
            None => minijinja::escape_formatter(out, state, value),
        }
    });
}

/// Booleans print lowercase.
fn bool_literal(value: &Value) -> Option<&'static str> {
    (value.kind() == ValueKind::Bool).then(|| if value.is_true() { "true" } else { "false" })
}

fn is_missing(value: &Value) -> bool {
    value.is_undefined() || value.is_none()
}

fn display(value: &Value) -> String {
    if is_missing(value) {
        String::new()
    } else if let Some(literal) = bool_literal(value) {
        literal.to_string()
    } else {
        value.to_string()
    }
}

/// Usage: `{{ name | rpad(20) }}`
pub fn rpad(value: Value, width: usize) -> String {
    format!("{:<width$}", display(&value), width = width)
}

/// Usage: `{{ name | rpadtrim(20) }}`
pub fn rpadtrim(value: Value, width: usize) -> String {
    let text: String = display(&value).chars().take(width).collect();
    format!("{:<width$}", text, width = width)
}

/// Usage: `{{ instance.node_memory | displaybytes }}`
pub fn displaybytes(value: Value) -> Result<String, Error> {
    if is_missing(&value) {
        return Ok("-".to_string());
    }
    let megabytes = f64::try_from(value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("displaybytes: {}", e)))?;
    Ok(format_megabytes(megabytes))
}

/// Render a size given in megabytes, `-` for zero.
pub fn format_megabytes(megabytes: f64) -> String {
    const UNITS: [&str; 3] = ["MB", "GB", "TB"];

    if megabytes == 0.0 {
        return "-".to_string();
    }
    let mut size = megabytes;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if size.fract() == 0.0 {
        format!("{:.0}{}", size, UNITS[unit])
    } else {
        format!("{:.2}{}", size, UNITS[unit])
    }
}

/// Usage: `{{ step.step_id | trimstep }}`
pub fn trimstep(value: &str, width: Option<usize>) -> String {
    let width = width.unwrap_or(DEFAULT_STEP_WIDTH);
    if value.chars().count() <= width {
        return value.to_string();
    }
    let kept: String = value.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", kept)
}

pub fn derefint(value: Value) -> Value {
    if is_missing(&value) {
        Value::from(0)
    } else {
        value
    }
}

pub fn derefbool(value: Value) -> bool {
    !is_missing(&value) && value.is_true()
}

pub fn derefstr(value: Value) -> String {
    display(&value)
}

/// Usage: `{{ computePlanDuration(attempt.attempt_start_time, attempt.attempt_end_time) }}`
///
/// A missing end means the plan is still running.
pub fn compute_plan_duration(start: Value, end: Option<Value>) -> Result<String, Error> {
    let start = parse_timestamp(&start)?
        .ok_or_else(|| Error::new(ErrorKind::MissingArgument, "computePlanDuration: missing start"))?;
    let end = match end {
        Some(value) => parse_timestamp(&value)?.unwrap_or_else(Utc::now),
        None => Utc::now(),
    };
    Ok(format_duration(elapsed(start, end)))
}

pub fn equal(a: Value, b: Value) -> bool {
    a == b
}

fn parse_timestamp(value: &Value) -> Result<Option<DateTime<Utc>>, Error> {
    if is_missing(value) {
        return Ok(None);
    }
    let text = value.to_string();
    DateTime::parse_from_rfc3339(&text)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("invalid timestamp {}: {}", text, e)))
}

/// Non-negative time between two instants.
pub fn elapsed(start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
    (end - start).to_std().unwrap_or(Duration::ZERO)
}

/// Render whole seconds the way Go prints durations: `45s`, `1m5s`, `1h0m5s`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
