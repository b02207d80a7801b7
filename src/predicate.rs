// Turns a raw oracle response into the single bit the attack runs on.
//
// The operator describes that bit with a short string:
//
//     <scope><qualifier>:<value>
//
// where the scope is 's' (the condition means the padding was valid) or 'e'
// (the condition means a padding error, so the answer is inverted), and the
// qualifier picks what is compared:
//
//     m  substring of the body or headers   (default when omitted)
//     c  status code
//     s  body size in bytes
//     t  response time below `value` milliseconds
//
// A string without that shape is inferred: three digits that look like an
// HTTP status become a status code predicate, anything else a message one.
// A lone prefix letter that is not a scope ("x:oops") is inferred too; only
// a scope followed by an explicit qualifier has to be well formed.
use crate::OracleResult;

use std::{fmt, time::Duration};

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredicateError {
    #[error("empty predicate")]
    Empty,
    #[error("invalid predicate scope '{0}' in {1:?}, expected 's' or 'e'")]
    InvalidScope(char, String),
    #[error("unknown predicate qualifier '{0}' in {1:?}, expected one of 'm', 'c', 's', 't'")]
    UnknownQualifier(char, String),
    #[error("predicate value {0:?} is not a number")]
    InvalidNumber(String),
}

/// The observable a predicate compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Message(String),
    StatusCode(u16),
    Size(usize),
    Timing(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    condition: Condition,
    invert_on_match: bool,
}

impl Predicate {
    pub fn new(condition: Condition, invert_on_match: bool) -> Self {
        Self {
            condition,
            invert_on_match,
        }
    }

    pub fn parse(spec: &str) -> Result<Self, PredicateError> {
        if spec.is_empty() {
            return Err(PredicateError::Empty);
        }
        match spec.split_once(':') {
            Some((kind, value)) if is_predicate_kind(kind) => parse_explicit(spec, kind, value),
            _ => Ok(infer(spec)),
        }
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn invert_on_match(&self) -> bool {
        self.invert_on_match
    }

    /// Whether the response means "padding valid".
    pub fn is_hit(&self, result: &OracleResult) -> bool {
        let matched = match &self.condition {
            Condition::Message(needle) => {
                result.body.contains(needle.as_str())
                    || result.serialized_headers().contains(needle.as_str())
            }
            Condition::StatusCode(code) => result.status == *code,
            Condition::Size(size) => result.body.len() == *size,
            Condition::Timing(limit) => result.elapsed < *limit,
        };
        matched != self.invert_on_match
    }
}

impl std::str::FromStr for Predicate {
    type Err = PredicateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = if self.invert_on_match { 'e' } else { 's' };
        match &self.condition {
            Condition::Message(m) => write!(f, "{scope}m:{m}"),
            Condition::StatusCode(c) => write!(f, "{scope}c:{c}"),
            Condition::Size(s) => write!(f, "{scope}s:{s}"),
            Condition::Timing(t) => write!(f, "{scope}t:{}", t.as_millis()),
        }
    }
}

fn is_predicate_kind(kind: &str) -> bool {
    (1..=2).contains(&kind.len()) && kind.chars().all(|c| c.is_ascii_alphabetic())
}

fn parse_explicit(spec: &str, kind: &str, value: &str) -> Result<Predicate, PredicateError> {
    let mut chars = kind.chars();
    let invert_on_match = match chars.next() {
        Some('s') => false,
        Some('e') => true,
        Some(_) if kind.len() == 1 => return Ok(infer(spec)),
        Some(other) => return Err(PredicateError::InvalidScope(other, spec.to_string())),
        None => return Err(PredicateError::Empty),
    };
    let condition = match chars.next().unwrap_or('m') {
        'm' => Condition::Message(value.to_string()),
        'c' => Condition::StatusCode(parse_number(value)?),
        's' => Condition::Size(parse_number(value)?),
        't' => Condition::Timing(Duration::from_millis(parse_number(value)?)),
        other => return Err(PredicateError::UnknownQualifier(other, spec.to_string())),
    };
    Ok(Predicate::new(condition, invert_on_match))
}

fn parse_number<N: std::str::FromStr>(value: &str) -> Result<N, PredicateError> {
    value
        .trim()
        .parse()
        .map_err(|_| PredicateError::InvalidNumber(value.to_string()))
}

fn infer(spec: &str) -> Predicate {
    if let Some(code) = as_status_code(spec) {
        warn!("assuming status code predicate: a {code} response means valid padding");
        return Predicate::new(Condition::StatusCode(code), false);
    }
    warn!("assuming message predicate: a response containing {spec:?} means valid padding");
    Predicate::new(Condition::Message(spec.to_string()), false)
}

fn as_status_code(spec: &str) -> Option<u16> {
    match spec.as_bytes() {
        [b'1'..=b'5', b'0'..=b'9', b'0'..=b'9'] => spec.parse().ok(),
        _ => None,
    }
}
