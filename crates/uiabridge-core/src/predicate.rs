//! Attribute predicates for child lookups (`with_predicate`).
//!
//! Supports the subset of predicate syntax test scripts actually use:
//!
//! ```text
//! name beginswith 'Log' AND visible == true
//! ```
//!
//! Comparisons: `==`/`=`, `!=`, `BEGINSWITH`, `ENDSWITH`, `CONTAINS`, `LIKE`
//! (glob with `*` and `?`) and `MATCHES` (whole-string regex). Keywords are
//! case-insensitive; clauses are joined by `AND` or `&&`.

use regex::Regex;
use thiserror::Error;

use crate::element::ElementSnapshot;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredicateError {
    #[error("empty predicate")]
    Empty,

    #[error("cannot parse predicate clause '{0}'")]
    Clause(String),

    #[error("invalid pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },
}

#[derive(Debug, Clone)]
enum Comparison {
    Equals(String),
    NotEquals(String),
    BeginsWith(String),
    EndsWith(String),
    Contains(String),
    Like(String),
    Matches(Regex),
}

#[derive(Debug, Clone)]
struct Clause {
    key: String,
    comparison: Comparison,
}

/// A parsed predicate; all clauses must hold.
#[derive(Debug, Clone)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

/// Returns true if the pattern contains glob wildcard characters (`*` or `?`).
fn has_wildcard(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Matches a string against a glob pattern with `*` (any chars) and `?` (single char).
///
/// When the pattern has no wildcards, falls back to exact equality.
fn glob_match(pattern: &str, text: &str) -> bool {
    if !has_wildcard(pattern) {
        return pattern == text;
    }

    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();

    // row[j] = pattern[..i] matches text[..j], rolled over i
    let mut row = vec![false; txt.len() + 1];
    row[0] = true;
    for &p in &pat {
        let mut next = vec![false; txt.len() + 1];
        next[0] = p == '*' && row[0];
        for j in 1..=txt.len() {
            next[j] = match p {
                '*' => row[j] || next[j - 1],
                '?' => row[j - 1],
                c => row[j - 1] && c == txt[j - 1],
            };
        }
        row = next;
    }
    row[txt.len()]
}

/// Splits on ` AND ` (any case) or `&&` outside quotes.
fn split_clauses(input: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            current.push(c);
            i += 1;
            continue;
        }
        if c == '\'' || c == '"' {
            quote = Some(c);
            current.push(c);
            i += 1;
            continue;
        }
        if c == '&' && chars.get(i + 1) == Some(&'&') {
            clauses.push(std::mem::take(&mut current));
            i += 2;
            continue;
        }
        let rest: String = chars[i..chars.len().min(i + 5)].iter().collect();
        if rest.len() == 5 && rest.to_ascii_uppercase() == " AND " {
            clauses.push(std::mem::take(&mut current));
            i += 5;
            continue;
        }
        current.push(c);
        i += 1;
    }
    clauses.push(current);
    clauses
}

fn unquote(value: &str) -> String {
    let v = value.trim();
    for q in ['\'', '"'] {
        if v.len() >= 2 && v.starts_with(q) && v.ends_with(q) {
            return v[1..v.len() - 1].to_string();
        }
    }
    v.to_string()
}

fn parse_clause(text: &str) -> Result<Clause, PredicateError> {
    let text = text.trim();
    let clause_err = || PredicateError::Clause(text.to_string());

    for symbol in ["==", "!=", "="] {
        if let Some(at) = text.find(symbol) {
            let key = text[..at].trim().to_ascii_lowercase();
            if key.is_empty() {
                return Err(clause_err());
            }
            if key.contains(char::is_whitespace) {
                // the symbol sits inside a keyword clause's operand
                break;
            }
            let value = unquote(&text[at + symbol.len()..]);
            let comparison = match symbol {
                "!=" => Comparison::NotEquals(value),
                _ => Comparison::Equals(value),
            };
            return Ok(Clause { key, comparison });
        }
    }

    let mut parts = text.splitn(3, char::is_whitespace);
    let key = parts.next().ok_or_else(clause_err)?.to_ascii_lowercase();
    let keyword = parts.next().ok_or_else(clause_err)?.to_ascii_uppercase();
    let value = unquote(parts.next().ok_or_else(clause_err)?);
    let comparison = match keyword.as_str() {
        "BEGINSWITH" => Comparison::BeginsWith(value),
        "ENDSWITH" => Comparison::EndsWith(value),
        "CONTAINS" => Comparison::Contains(value),
        "LIKE" => Comparison::Like(value),
        "MATCHES" => {
            let anchored = format!("^(?:{value})$");
            Comparison::Matches(Regex::new(&anchored).map_err(|e| PredicateError::Pattern {
                pattern: value.clone(),
                reason: e.to_string(),
            })?)
        }
        _ => return Err(clause_err()),
    };
    Ok(Clause { key, comparison })
}

impl Predicate {
    pub fn parse(input: &str) -> Result<Self, PredicateError> {
        if input.trim().is_empty() {
            return Err(PredicateError::Empty);
        }
        let clauses = split_clauses(input)
            .iter()
            .map(|c| parse_clause(c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { clauses })
    }

    pub fn matches(&self, snapshot: &ElementSnapshot) -> bool {
        self.clauses.iter().all(|clause| {
            let Some(actual) = snapshot.attribute(&clause.key) else {
                return false;
            };
            match &clause.comparison {
                Comparison::Equals(v) => actual == *v,
                Comparison::NotEquals(v) => actual != *v,
                Comparison::BeginsWith(v) => actual.starts_with(v.as_str()),
                Comparison::EndsWith(v) => actual.ends_with(v.as_str()),
                Comparison::Contains(v) => actual.contains(v.as_str()),
                Comparison::Like(v) => glob_match(v, &actual),
                Comparison::Matches(re) => re.is_match(&actual),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn button(name: &str) -> ElementSnapshot {
        ElementSnapshot::new("UIAButton").with_name(name)
    }

    #[test]
    fn glob_basics() {
        assert!(glob_match("Log*", "Login"));
        assert!(glob_match("L?g", "Log"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("L?g", "Lg"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[test]
    fn keyword_comparisons() {
        assert!(Predicate::parse("name beginswith 'Log'").unwrap().matches(&button("Login")));
        assert!(Predicate::parse("name ENDSWITH \"in\"").unwrap().matches(&button("Login")));
        assert!(Predicate::parse("name contains 'ogi'").unwrap().matches(&button("Login")));
        assert!(Predicate::parse("name like 'L*n'").unwrap().matches(&button("Login")));
        assert!(Predicate::parse("name matches 'L.*'").unwrap().matches(&button("Login")));
        assert!(!Predicate::parse("name matches 'ogi'").unwrap().matches(&button("Login")));
    }

    #[test]
    fn conjunctions() {
        let p = Predicate::parse("name == 'OK' AND classname = 'UIAButton' && visible == true").unwrap();
        assert!(p.matches(&button("OK")));
        assert!(!p.matches(&button("Cancel")));
    }

    #[test]
    fn and_inside_quotes_is_literal() {
        let p = Predicate::parse("name == 'Terms AND Conditions'").unwrap();
        assert!(p.matches(&button("Terms AND Conditions")));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(Predicate::parse("  ").unwrap_err(), PredicateError::Empty);
        assert!(matches!(Predicate::parse("name sortof 'x'"), Err(PredicateError::Clause(_))));
        assert!(matches!(Predicate::parse("name"), Err(PredicateError::Clause(_))));
    }
}
