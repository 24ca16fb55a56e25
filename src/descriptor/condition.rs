//! `when` terms and the dotted-version comparator.

use crate::config::types::{LaunchError, Result};
use crate::descriptor::env::Environment;
use regex::RegexBuilder;
use std::cmp::Ordering;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Component {
    Num(u64),
    Text(String),
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Component::Num(a), Component::Num(b)) => a.cmp(b),
            (Component::Text(a), Component::Text(b)) => a.cmp(b),
            (Component::Num(_), Component::Text(_)) => Ordering::Less,
            (Component::Text(_), Component::Num(_)) => Ordering::Greater,
        }
    }
}

fn components(version: &str) -> Vec<Component> {
    let mut ret = Vec::new();
    let mut rest = version;
    while let Some(c) = rest.chars().next() {
        let digits = c.is_ascii_digit();
        let end = rest
            .find(|ch: char| ch.is_ascii_digit() != digits)
            .unwrap_or(rest.len());
        let (run, tail) = rest.split_at(end);
        ret.push(if digits {
            // Runs too long for u64 saturate; they are not real versions.
            Component::Num(run.parse().unwrap_or(u64::MAX))
        } else {
            Component::Text(run.to_string())
        });
        rest = tail;
    }
    ret
}

/// Compare two version strings Dewey style.
///
/// Digit runs compare numerically and other runs literally; a number sorts
/// before text at the same position, and a strict prefix sorts first.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    components(a).cmp(&components(b))
}

fn parse_int(s: &str) -> i64 {
    s.trim().parse().unwrap_or(i64::MIN)
}

fn operand<'a>(terms: &'a [String], i: usize, op: &str) -> Result<&'a str> {
    terms
        .get(i)
        .map(String::as_str)
        .ok_or_else(|| LaunchError::Usage(format!("when: {} needs more operands", op)))
}

/// Evaluate `TERM...` (logical AND, short-circuit).
pub fn evaluate(terms: &[String], env: &Environment) -> Result<bool> {
    let mut i = 0;
    while i < terms.len() {
        let op = terms[i].as_str();
        let (holds, used) = match op {
            "!" => (env.expand(operand(terms, i + 1, op)?)?.is_empty(), 2),
            "==" | "!=" | ">" | ">=" | "<" | "<=" | ".>" | ".>=" | ".<" | ".<=" => {
                let a = env.expand(operand(terms, i + 1, op)?)?;
                let b = env.expand(operand(terms, i + 2, op)?)?;
                (binary(op, &a, &b), 3)
            }
            "~=" | "~=i" => {
                let pattern = env.expand(operand(terms, i + 1, op)?)?;
                let subject = env.expand(operand(terms, i + 2, op)?)?;
                let re = RegexBuilder::new(&format!("^(?:{})$", pattern))
                    .case_insensitive(op == "~=i")
                    .build()
                    .map_err(|e| LaunchError::Usage(format!("when: bad pattern {}: {}", pattern, e)))?;
                (re.is_match(&subject), 3)
            }
            word => (!env.expand(word)?.is_empty(), 1),
        };
        if !holds {
            return Ok(false);
        }
        i += used;
    }
    Ok(true)
}

fn binary(op: &str, a: &str, b: &str) -> bool {
    match op {
        "==" => a == b,
        "!=" => a != b,
        ">" => parse_int(a) > parse_int(b),
        ">=" => parse_int(a) >= parse_int(b),
        "<" => parse_int(a) < parse_int(b),
        "<=" => parse_int(a) <= parse_int(b),
        ".>" => compare_versions(a, b) == Ordering::Greater,
        ".>=" => compare_versions(a, b) != Ordering::Less,
        ".<" => compare_versions(a, b) == Ordering::Less,
        ".<=" => compare_versions(a, b) != Ordering::Greater,
        _ => false,
    }
}
