// Formatting pipes for attribute reads
//
// A read key may carry a pipeline after the attribute path:
//   "price|currency"
//   "created|date('MMM YYYY')|default('-')"
// The pipeline is parsed into typed steps and evaluated against a
// FormatterRegistry; nothing is ever eval'd as code.

mod formatters;

pub use formatters::{FormatterFn, FormatterRegistry};

use std::fmt;

/// One `name(args...)` stage of a pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipeStep {
    pub name: String,
    pub args: Vec<String>,
}

/// Pipeline parse errors
#[derive(Debug, Clone, PartialEq)]
pub enum PipeError {
    /// A stage with no formatter name ("price||currency")
    EmptyStage,
    /// Formatter name with characters outside [A-Za-z0-9_]
    InvalidName(String),
    /// Opening parenthesis without a matching close
    UnclosedArguments(String),
    /// Quote opened but never closed
    UnterminatedQuote,
}

impl fmt::Display for PipeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipeError::EmptyStage => write!(f, "empty pipe stage"),
            PipeError::InvalidName(name) => write!(f, "invalid formatter name '{}'", name),
            PipeError::UnclosedArguments(stage) => {
                write!(f, "unclosed argument list in '{}'", stage)
            }
            PipeError::UnterminatedQuote => write!(f, "unterminated quote"),
        }
    }
}

impl std::error::Error for PipeError {}

/// Split a read key into its attribute path and optional pipeline source.
///
/// The split happens at the first `|` outside quotes and parentheses.
///
/// ```
/// use mojo_model::pipe::split_key;
///
/// assert_eq!(split_key("price|currency"), ("price", Some("currency")));
/// assert_eq!(split_key("address.city"), ("address.city", None));
/// ```
pub fn split_key(key: &str) -> (&str, Option<&str>) {
    match split_top_level(key, '|').first() {
        Some(first) if first.len() < key.len() => {
            (first.trim(), Some(key[first.len() + 1..].trim()))
        }
        _ => (key.trim(), None),
    }
}

/// Parse a pipeline (`"date('MMM YYYY')|default('-')"`) into its steps.
pub fn parse_pipeline(source: &str) -> Result<Vec<PipeStep>, PipeError> {
    if !quotes_balanced(source) {
        return Err(PipeError::UnterminatedQuote);
    }

    split_top_level(source, '|')
        .into_iter()
        .map(parse_step)
        .collect()
}

fn parse_step(stage: &str) -> Result<PipeStep, PipeError> {
    let stage = stage.trim();
    if stage.is_empty() {
        return Err(PipeError::EmptyStage);
    }

    let (name, args) = match stage.find('(') {
        Some(open) => {
            if !stage.ends_with(')') {
                return Err(PipeError::UnclosedArguments(stage.to_string()));
            }
            let inner = &stage[open + 1..stage.len() - 1];
            (stage[..open].trim(), parse_args(inner))
        }
        None => (stage, Vec::new()),
    };

    if name.is_empty() {
        return Err(PipeError::EmptyStage);
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(PipeError::InvalidName(name.to_string()));
    }

    Ok(PipeStep {
        name: name.to_string(),
        args,
    })
}

fn parse_args(inner: &str) -> Vec<String> {
    if inner.trim().is_empty() {
        return Vec::new();
    }

    split_top_level(inner, ',')
        .into_iter()
        .map(|arg| unquote(arg.trim()).to_string())
        .collect()
}

/// Strip one layer of matching single or double quotes.
fn unquote(arg: &str) -> &str {
    for quote in ['\'', '"'] {
        if arg.len() >= 2 && arg.starts_with(quote) && arg.ends_with(quote) {
            return &arg[1..arg.len() - 1];
        }
    }
    arg
}

/// Split on `separator` wherever it appears outside quotes and parentheses.
fn split_top_level(source: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in source.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                c if c == separator && depth == 0 => {
                    parts.push(&source[start..i]);
                    start = i + c.len_utf8();
                }
                _ => {}
            },
        }
    }
    parts.push(&source[start..]);
    parts
}

fn quotes_balanced(source: &str) -> bool {
    let mut quote: Option<char> = None;
    for c in source.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None => {}
        }
    }
    quote.is_none()
}
