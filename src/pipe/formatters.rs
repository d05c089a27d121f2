use super::PipeStep;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// A named formatter: receives the piped value and the stage's arguments.
pub type FormatterFn = Arc<dyn Fn(&Value, &[String]) -> Value + Send + Sync>;

/// Registry of named formatters used to evaluate pipelines.
///
/// `FormatterRegistry::default()` carries the builtin set; `empty()` starts
/// blank for callers who want full control.
#[derive(Clone)]
pub struct FormatterRegistry {
    formatters: HashMap<String, FormatterFn>,
}

impl FormatterRegistry {
    pub fn empty() -> Self {
        Self {
            formatters: HashMap::new(),
        }
    }

    /// Register (or replace) a formatter under `name`.
    pub fn register<F>(&mut self, name: &str, formatter: F)
    where
        F: Fn(&Value, &[String]) -> Value + Send + Sync + 'static,
    {
        self.formatters.insert(name.to_string(), Arc::new(formatter));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.formatters.contains_key(name)
    }

    /// Run `value` through each step left to right.
    ///
    /// Unknown formatter names leave the value untouched.
    pub fn apply(&self, value: Value, steps: &[PipeStep]) -> Value {
        steps.iter().fold(value, |current, step| {
            match self.formatters.get(&step.name) {
                Some(formatter) => formatter(&current, &step.args),
                None => {
                    warn!(formatter = %step.name, "Unknown formatter, value passed through");
                    current
                }
            }
        })
    }
}

impl Default for FormatterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("default", default_value);
        registry.register("upper", |v, _| Value::String(display(v).to_uppercase()));
        registry.register("lower", |v, _| Value::String(display(v).to_lowercase()));
        registry.register("capitalize", capitalize);
        registry.register("truncate", truncate);
        registry.register("number", number);
        registry.register("currency", currency);
        registry.register("percent", percent);
        registry.register("date", date);
        registry.register("yesno", yesno);
        registry.register("filesize", filesize);
        registry.register("json", |v, _| {
            Value::String(serde_json::to_string(v).unwrap_or_default())
        });
        registry
    }
}

impl std::fmt::Debug for FormatterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.formatters.keys().collect();
        names.sort();
        f.debug_struct("FormatterRegistry")
            .field("formatters", &names)
            .finish()
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn arg<'a>(args: &'a [String], index: usize) -> Option<&'a str> {
    args.get(index).map(String::as_str)
}

fn arg_usize(args: &[String], index: usize, fallback: usize) -> usize {
    arg(args, index)
        .and_then(|a| a.trim().parse().ok())
        .unwrap_or(fallback)
}

/// Format with fixed decimals and comma thousands separators.
fn group_number(n: f64, decimals: usize) -> String {
    let fixed = format!("{:.*}", decimals, n.abs());
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (fixed.as_str(), None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let sign = if n < 0.0 && fixed.chars().any(|c| c.is_ascii_digit() && c != '0') {
        "-"
    } else {
        ""
    };

    match frac_part {
        Some(frac) => format!("{}{}.{}", sign, grouped, frac),
        None => format!("{}{}", sign, grouped),
    }
}

// ── Builtins ─────────────────────────────────────────────────────────────────

fn default_value(value: &Value, args: &[String]) -> Value {
    if is_empty(value) {
        Value::String(arg(args, 0).unwrap_or_default().to_string())
    } else {
        value.clone()
    }
}

fn capitalize(value: &Value, _args: &[String]) -> Value {
    let text = display(value);
    let mut chars = text.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    Value::String(capitalized)
}

fn truncate(value: &Value, args: &[String]) -> Value {
    let text = display(value);
    let limit = arg_usize(args, 0, 50);
    if text.chars().count() <= limit {
        return Value::String(text);
    }
    let suffix = arg(args, 1).unwrap_or("...");
    let head: String = text.chars().take(limit).collect();
    Value::String(format!("{}{}", head.trim_end(), suffix))
}

fn number(value: &Value, args: &[String]) -> Value {
    match as_number(value) {
        Some(n) => Value::String(group_number(n, arg_usize(args, 0, 0))),
        None => value.clone(),
    }
}

fn currency(value: &Value, args: &[String]) -> Value {
    let Some(n) = as_number(value) else {
        return value.clone();
    };
    let symbol = arg(args, 0).unwrap_or("$");
    let formatted = group_number(n, arg_usize(args, 1, 2));
    match formatted.strip_prefix('-') {
        Some(rest) => Value::String(format!("-{}{}", symbol, rest)),
        None => Value::String(format!("{}{}", symbol, formatted)),
    }
}

fn percent(value: &Value, args: &[String]) -> Value {
    match as_number(value) {
        Some(n) => Value::String(format!("{}%", group_number(n * 100.0, arg_usize(args, 0, 0)))),
        None => value.clone(),
    }
}

fn yesno(value: &Value, args: &[String]) -> Value {
    let truthy = match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !matches!(s.trim().to_lowercase().as_str(), "" | "0" | "false" | "no"),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    };
    let label = if truthy {
        arg(args, 0).unwrap_or("Yes")
    } else {
        arg(args, 1).unwrap_or("No")
    };
    Value::String(label.to_string())
}

fn filesize(value: &Value, _args: &[String]) -> Value {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let Some(mut size) = as_number(value) else {
        return value.clone();
    };
    let mut unit = 0;
    while size.abs() >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        Value::String(format!("{} {}", size as i64, UNITS[0]))
    } else {
        Value::String(format!("{:.1} {}", size, UNITS[unit]))
    }
}

fn date(value: &Value, args: &[String]) -> Value {
    let Some(parsed) = parse_datetime(value) else {
        return value.clone();
    };
    let pattern = arg(args, 0).unwrap_or("MMM D, YYYY");
    Value::String(parsed.format(&moment_to_strftime(pattern)).to_string())
}

/// Accepts RFC 3339 strings, plain dates, "YYYY-MM-DD HH:MM:SS", and epoch
/// numbers (seconds, or milliseconds when large enough to be ms).
fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let raw = n.as_f64()?;
            let millis = if raw.abs() < 100_000_000_000.0 {
                raw * 1000.0
            } else {
                raw
            };
            Utc.timestamp_millis_opt(millis as i64).single()
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(Utc.from_utc_datetime(&dt));
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
                return Some(Utc.from_utc_datetime(&dt));
            }
            let day = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
            Some(Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0)?))
        }
        _ => None,
    }
}

/// Translate moment-style tokens (`MMM D, YYYY`) to a strftime pattern.
fn moment_to_strftime(pattern: &str) -> String {
    const TOKENS: [(&str, &str); 18] = [
        ("YYYY", "%Y"),
        ("YY", "%y"),
        ("MMMM", "%B"),
        ("MMM", "%b"),
        ("MM", "%m"),
        ("M", "%-m"),
        ("DD", "%d"),
        ("D", "%-d"),
        ("dddd", "%A"),
        ("ddd", "%a"),
        ("HH", "%H"),
        ("H", "%-H"),
        ("hh", "%I"),
        ("h", "%-I"),
        ("mm", "%M"),
        ("ss", "%S"),
        ("A", "%p"),
        ("a", "%P"),
    ];

    let mut out = String::with_capacity(pattern.len() * 2);
    let mut rest = pattern;
    'scan: while !rest.is_empty() {
        for (token, spec) in TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(spec);
                rest = tail;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            if c == '%' {
                out.push_str("%%");
            } else {
                out.push(c);
            }
        }
        rest = chars.as_str();
    }
    out
}
