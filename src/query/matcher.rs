//! Label matchers
//!
//! A `Matcher` tests a single label value. A `LabelMatcher` binds a list of
//! matchers to a shard's string table so label sets (encoded as string
//! offsets) can be tested without resolving every string.

use crate::block::StringTable;
use crate::query::error::{QueryError, QueryResult};
use regex::Regex;
use std::fmt;

/// Matcher operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `=~`
    Regex,
    /// `!~`
    NotRegex,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            MatchType::Equal => "=",
            MatchType::NotEqual => "!=",
            MatchType::Regex => "=~",
            MatchType::NotRegex => "!~",
        };
        f.write_str(op)
    }
}

/// A single label matcher. A missing label has the value `""`.
#[derive(Debug, Clone)]
pub struct Matcher {
    pub name: String,
    pub match_type: MatchType,
    pub value: String,
    re: Option<Regex>,
}

impl Matcher {
    /// Build a matcher; regex patterns are anchored at both ends
    pub fn new(
        match_type: MatchType,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> QueryResult<Self> {
        let value = value.into();
        let re = match match_type {
            MatchType::Regex | MatchType::NotRegex => Some(
                Regex::new(&format!("^(?:{})$", value)).map_err(|e| QueryError::InvalidRegex {
                    pattern: value.clone(),
                    reason: e.to_string(),
                })?,
            ),
            MatchType::Equal | MatchType::NotEqual => None,
        };
        Ok(Self {
            name: name.into(),
            match_type,
            value,
            re,
        })
    }

    pub fn matches(&self, v: &str) -> bool {
        match (self.match_type, &self.re) {
            (MatchType::Equal, _) => v == self.value,
            (MatchType::NotEqual, _) => v != self.value,
            (MatchType::Regex, Some(re)) => re.is_match(v),
            (MatchType::NotRegex, Some(re)) => !re.is_match(v),
            (_, None) => false,
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.match_type, self.value)
    }
}

struct Bound<'a> {
    matcher: &'a Matcher,
    name: Option<i32>,
    // Offset of the expected value; only used by equality matchers.
    value: Option<i32>,
}

/// Matchers bound to a string table
pub struct LabelMatcher<'a> {
    strings: &'a StringTable,
    bound: Vec<Bound<'a>>,
    valid: bool,
}

impl<'a> LabelMatcher<'a> {
    pub fn new(strings: &'a StringTable, matchers: &'a [Matcher]) -> Self {
        let mut valid = true;
        let bound = matchers
            .iter()
            .map(|m| {
                let b = Bound {
                    matcher: m,
                    name: strings.find(&m.name),
                    value: strings.find(&m.value),
                };
                // No label set in the table can satisfy these.
                if b.name.is_none() && !m.matches("") {
                    valid = false;
                }
                if m.match_type == MatchType::Equal && b.value.is_none() {
                    valid = false;
                }
                b
            })
            .collect();
        Self {
            strings,
            bound,
            valid,
        }
    }

    /// False if no label set over this string table can match
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Test a flat `[name, value, ...]` label set
    pub fn matches(&self, set: &[i32]) -> bool {
        self.bound.iter().all(|b| {
            let value = b.name.and_then(|name| {
                set.chunks_exact(2)
                    .find(|pair| pair[0] == name)
                    .map(|pair| pair[1])
            });
            match (b.matcher.match_type, b.value) {
                (MatchType::Equal, Some(expected)) => value.unwrap_or(0) == expected,
                _ => b.matcher.matches(value.map_or("", |v| self.strings.lookup(v))),
            }
        })
    }
}
