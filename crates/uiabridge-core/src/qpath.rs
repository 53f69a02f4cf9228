//! Structural locators (QPath).
//!
//! A QPath addresses elements by walking the accessibility tree node by node:
//!
//! ```text
//! /classname='UIAWindow'/classname='UIAButton' && name='OK' && maxdepth=4
//! ```
//!
//! Each `/`-separated node is a set of conditions joined by `&` or `&&`. A
//! condition is `key = value` (equality), `key != value` or `key ~= pattern`
//! (regular expression search). Values may be single- or double-quoted, or
//! bare. Two keys are directives rather than attribute tests:
//!
//! - `maxdepth` - how many levels below the previous node to search (default 1)
//! - `instance` - keep only the n-th match of this node (0-based)
//!
//! Searching reports how far the path got: [`FindOutcome::valid_path_part`] is
//! the prefix that matched, [`FindOutcome::invalid_path_part`] the remainder
//! starting at the first node that matched nothing.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::element::ElementSnapshot;
use crate::host::ElementRef;

/// Default search depth below the previous node.
const DEFAULT_MAX_DEPTH: usize = 1;

/// Errors produced while parsing a QPath.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QPathError {
    #[error("qpath must start with '/': {0}")]
    NotAbsolute(String),

    #[error("empty node at position {position}")]
    EmptyNode { position: usize },

    #[error("empty condition in node '{node}'")]
    EmptyCondition { node: String },

    #[error("condition '{condition}' has no operator")]
    MissingOperator { condition: String },

    #[error("unterminated quote starting at position {position}")]
    UnterminatedQuote { position: usize },

    #[error("{key} expects a non-negative integer, got '{value}'")]
    InvalidNumber { key: String, value: String },

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

// ---------------------------------------------------------------------------
// Parsed representation
// ---------------------------------------------------------------------------

/// How a condition compares an attribute against its operand.
#[derive(Debug, Clone)]
pub enum MatchOp {
    Equals(String),
    NotEquals(String),
    Regex(Regex),
}

/// A single `key op value` test.
#[derive(Debug, Clone)]
pub struct Condition {
    /// Lower-cased attribute key.
    pub key: String,
    pub op: MatchOp,
}

impl Condition {
    /// Tests the condition against an element's attributes.
    ///
    /// A missing attribute never matches, not even `!=`.
    pub fn matches(&self, snapshot: &ElementSnapshot) -> bool {
        let Some(actual) = snapshot.attribute(&self.key) else {
            return false;
        };
        match &self.op {
            MatchOp::Equals(expected) => attribute_eq(&actual, expected),
            MatchOp::NotEquals(expected) => !attribute_eq(&actual, expected),
            MatchOp::Regex(re) => re.is_match(&actual),
        }
    }
}

/// Booleans compare case-insensitively so `visible=True` works.
fn attribute_eq(actual: &str, expected: &str) -> bool {
    if actual == expected {
        return true;
    }
    matches!(actual, "true" | "false") && actual.eq_ignore_ascii_case(expected)
}

/// One `/`-separated step of a QPath.
#[derive(Debug, Clone)]
pub struct QPathNode {
    /// The node as written, including its leading `/`.
    pub text: String,
    pub conditions: Vec<Condition>,
    pub max_depth: usize,
    pub instance: Option<usize>,
}

impl QPathNode {
    pub fn matches(&self, snapshot: &ElementSnapshot) -> bool {
        self.conditions.iter().all(|c| c.matches(snapshot))
    }
}

/// A parsed structural locator.
#[derive(Debug, Clone)]
pub struct QPath {
    source: String,
    nodes: Vec<QPathNode>,
}

impl fmt::Display for QPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// The result of a search.
pub struct FindOutcome {
    /// Elements matched by the last node, in tree order.
    pub elements: Vec<ElementRef>,
    pub valid_path_part: String,
    pub invalid_path_part: String,
    /// Number of tree walks performed.
    pub attempts: u32,
    pub elapsed: Duration,
}

impl fmt::Debug for FindOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FindOutcome")
            .field("elements", &self.elements.len())
            .field("valid_path_part", &self.valid_path_part)
            .field("invalid_path_part", &self.invalid_path_part)
            .field("attempts", &self.attempts)
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Splits `input` on `sep` wherever it is not inside a quoted value.
///
/// Returns `(offset, piece)` pairs; offsets are byte positions in `input`.
fn split_unquoted(input: &str, sep: char, base: usize) -> Result<Vec<(usize, &str)>, QPathError> {
    let mut pieces = Vec::new();
    let mut quote: Option<(char, usize)> = None;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match quote {
            Some((q, _)) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some((c, i)),
            None if c == sep => {
                pieces.push((base + start, &input[start..i]));
                start = i + c.len_utf8();
            }
            None => {}
        }
    }
    if let Some((_, position)) = quote {
        return Err(QPathError::UnterminatedQuote { position: base + position });
    }
    pieces.push((base + start, &input[start..]));
    Ok(pieces)
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'\'' || first == b'"') && first == last {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Finds the first comparison operator outside quotes.
fn find_operator(condition: &str) -> Option<(usize, &'static str)> {
    let mut quote: Option<char> = None;
    let bytes = condition.as_bytes();
    for (i, c) in condition.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == '~' && bytes.get(i + 1) == Some(&b'=') => return Some((i, "~=")),
            None if c == '!' && bytes.get(i + 1) == Some(&b'=') => return Some((i, "!=")),
            None if c == '=' => return Some((i, "=")),
            None => {}
        }
    }
    None
}

fn parse_number(key: &str, value: &str) -> Result<usize, QPathError> {
    value.parse().map_err(|_| QPathError::InvalidNumber {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_node(text: &str, base: usize) -> Result<QPathNode, QPathError> {
    let mut node = QPathNode {
        text: format!("/{text}"),
        conditions: Vec::new(),
        max_depth: DEFAULT_MAX_DEPTH,
        instance: None,
    };

    let pieces = split_unquoted(text, '&', base)?;
    let mut previous_empty = false;
    for (index, (_, raw)) in pieces.iter().enumerate() {
        let condition = raw.trim();
        if condition.is_empty() {
            // `&&` produces exactly one empty piece between its halves.
            if previous_empty || index == 0 || index == pieces.len() - 1 {
                return Err(QPathError::EmptyCondition { node: node.text.clone() });
            }
            previous_empty = true;
            continue;
        }
        previous_empty = false;

        let (at, op) = find_operator(condition).ok_or_else(|| QPathError::MissingOperator {
            condition: condition.to_string(),
        })?;
        let key = condition[..at].trim().to_ascii_lowercase();
        let value = unquote(condition[at + op.len()..].trim());
        if key.is_empty() {
            return Err(QPathError::MissingOperator { condition: condition.to_string() });
        }

        match key.as_str() {
            "maxdepth" => node.max_depth = parse_number(&key, value)?,
            "instance" => node.instance = Some(parse_number(&key, value)?),
            _ => {
                let op = match op {
                    "~=" => MatchOp::Regex(Regex::new(value).map_err(|e| QPathError::InvalidPattern {
                        pattern: value.to_string(),
                        reason: e.to_string(),
                    })?),
                    "!=" => MatchOp::NotEquals(value.to_string()),
                    _ => MatchOp::Equals(value.to_string()),
                };
                node.conditions.push(Condition { key, op });
            }
        }
    }
    Ok(node)
}

impl QPath {
    /// Parses a QPath string.
    pub fn parse(source: &str) -> Result<Self, QPathError> {
        let trimmed = source.trim();
        let Some(body) = trimmed.strip_prefix('/') else {
            return Err(QPathError::NotAbsolute(source.to_string()));
        };

        let mut nodes = Vec::new();
        for (position, text) in split_unquoted(body, '/', 1)? {
            if text.trim().is_empty() {
                return Err(QPathError::EmptyNode { position });
            }
            nodes.push(parse_node(text.trim(), position)?);
        }

        Ok(Self {
            source: trimmed.to_string(),
            nodes,
        })
    }

    pub fn nodes(&self) -> &[QPathNode] {
        &self.nodes
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Walks the tree under `root` once.
    pub async fn search(&self, root: &ElementRef) -> FindOutcome {
        let start = Instant::now();
        let mut current = vec![root.clone()];

        for (index, node) in self.nodes.iter().enumerate() {
            let mut matched = Vec::new();
            for parent in &current {
                collect_matches(parent, node, &mut matched).await;
            }
            if let Some(instance) = node.instance {
                matched = matched.into_iter().nth(instance).into_iter().collect();
            }
            trace!(node = %node.text, matches = matched.len(), "qpath node");

            if matched.is_empty() {
                return FindOutcome {
                    elements: Vec::new(),
                    valid_path_part: self.join(..index),
                    invalid_path_part: self.join(index..),
                    attempts: 1,
                    elapsed: start.elapsed(),
                };
            }
            current = matched;
        }

        FindOutcome {
            elements: current,
            valid_path_part: self.source.clone(),
            invalid_path_part: String::new(),
            attempts: 1,
            elapsed: start.elapsed(),
        }
    }

    /// Repeats [`search`](Self::search) every `interval` until something
    /// matches or `timeout` has elapsed. A zero timeout searches exactly once.
    pub async fn find(&self, root: &ElementRef, timeout: Duration, interval: Duration) -> FindOutcome {
        let start = Instant::now();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let mut outcome = self.search(root).await;
            if !outcome.elements.is_empty() || start.elapsed() >= timeout {
                outcome.attempts = attempts;
                outcome.elapsed = start.elapsed();
                debug!(
                    qpath = %self.source,
                    found = outcome.elements.len(),
                    attempts,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "qpath find complete"
                );
                return outcome;
            }
            tokio::time::sleep(interval).await;
        }
    }

    fn join<R>(&self, range: R) -> String
    where
        R: std::slice::SliceIndex<[QPathNode], Output = [QPathNode]>,
    {
        self.nodes[range].iter().map(|n| n.text.as_str()).collect()
    }
}

/// Breadth-first search of `parent`'s descendants up to the node's depth.
///
/// Elements that error while being inspected (typically because they vanished
/// mid-walk) are skipped.
async fn collect_matches(parent: &ElementRef, node: &QPathNode, out: &mut Vec<ElementRef>) {
    let mut frontier = vec![parent.clone()];
    for _ in 0..node.max_depth {
        let mut next = Vec::new();
        for element in &frontier {
            let Ok(children) = element.children().await else {
                continue;
            };
            for child in children {
                if let Ok(dict) = child.element_dict().await {
                    if node.matches(&dict) && !out.iter().any(|e| same_element(e, &child)) {
                        out.push(child.clone());
                    }
                }
                next.push(child);
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
}

/// Identity comparison of two element references.
pub fn same_element(a: &ElementRef, b: &ElementRef) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multi_node_path() {
        let path = QPath::parse("/classname='UIAWindow'/classname='UIAButton' && name='OK'").unwrap();
        assert_eq!(path.nodes().len(), 2);
        assert_eq!(path.nodes()[0].text, "/classname='UIAWindow'");
        assert_eq!(path.nodes()[1].conditions.len(), 2);
        assert_eq!(path.nodes()[1].conditions[1].key, "name");
    }

    #[test]
    fn single_ampersand_and_directives() {
        let path = QPath::parse("/classname = 'UIAAlert' & maxdepth = 20 & instance=1").unwrap();
        let node = &path.nodes()[0];
        assert_eq!(node.conditions.len(), 1);
        assert_eq!(node.max_depth, 20);
        assert_eq!(node.instance, Some(1));
    }

    #[test]
    fn default_depth_is_one() {
        let path = QPath::parse("/classname='UIAWindow'").unwrap();
        assert_eq!(path.nodes()[0].max_depth, 1);
        assert_eq!(path.nodes()[0].instance, None);
    }

    #[test]
    fn separators_inside_quotes_are_literal() {
        let path = QPath::parse("/name='a/b && c'").unwrap();
        assert_eq!(path.nodes().len(), 1);
        let snap = ElementSnapshot::new("UIAButton").with_name("a/b && c");
        assert!(path.nodes()[0].matches(&snap));
    }

    #[test]
    fn regex_and_not_equals() {
        let path = QPath::parse("/label ~= '^Sign' && classname != UIAStaticText").unwrap();
        let node = &path.nodes()[0];
        assert!(node.matches(&ElementSnapshot::new("UIAButton").with_label("Sign in")));
        assert!(!node.matches(&ElementSnapshot::new("UIAStaticText").with_label("Sign in")));
        assert!(!node.matches(&ElementSnapshot::new("UIAButton").with_label("Log in")));
    }

    #[test]
    fn missing_attribute_never_matches() {
        let path = QPath::parse("/label != 'x'").unwrap();
        assert!(!path.nodes()[0].matches(&ElementSnapshot::new("UIAButton")));
    }

    #[test]
    fn boolean_values_ignore_case() {
        let path = QPath::parse("/visible=True").unwrap();
        assert!(path.nodes()[0].matches(&ElementSnapshot::new("UIAButton")));
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(matches!(QPath::parse("classname='X'"), Err(QPathError::NotAbsolute(_))));
        assert!(matches!(QPath::parse("/classname='X'//name=1"), Err(QPathError::EmptyNode { .. })));
        assert!(matches!(QPath::parse("/classname"), Err(QPathError::MissingOperator { .. })));
        assert!(matches!(QPath::parse("/name='open"), Err(QPathError::UnterminatedQuote { .. })));
        assert!(matches!(QPath::parse("/maxdepth=deep"), Err(QPathError::InvalidNumber { .. })));
        assert!(matches!(QPath::parse("/name~='('"), Err(QPathError::InvalidPattern { .. })));
        assert!(matches!(QPath::parse("/name='a' &&& label='b'"), Err(QPathError::EmptyCondition { .. })));
    }
}
