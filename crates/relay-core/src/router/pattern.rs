// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The route pattern language.
//!
//! A pattern is a path template of literal segments, parameter segments
//! `{name}` (matches any run of non-`/` characters), and wildcards `*`
//! (matches anything, including `/`). Matching is anchored to the whole
//! path.

use std::collections::HashMap;

use regex::Regex;
use thiserror::Error;

/// Errors raised while compiling a pattern.
#[derive(Debug, Error)]
pub enum PatternError {
    /// The compiled regex engine rejected the translated pattern. Should
    /// not occur for any pattern built from valid `{name}`/`*`/literal
    /// segments, but is surfaced rather than unwrapped.
    #[error("invalid pattern {0:?}: {1}")]
    InvalidPattern(String, regex::Error),
}

/// A compiled route pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    /// The original, uncompiled pattern string. Its byte length is the
    /// "pattern length" used for longest-match tie-breaking.
    pub source: String,
    regex: Regex,
    param_names: Vec<String>,
}

impl Pattern {
    /// Compiles `source` into a matcher.
    ///
    /// Regex metacharacters are escaped except `{`/`}` (which introduce
    /// parameter captures) and `*` (which becomes `.*`).
    pub fn compile(source: &str) -> Result<Self, PatternError> {
        let mut param_names = Vec::new();
        let mut regex_src = String::from("^");
        let mut chars = source.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '{' => {
                    let mut name = String::new();
                    for inner in chars.by_ref() {
                        if inner == '}' {
                            break;
                        }
                        name.push(inner);
                    }
                    regex_src.push_str("(?P<");
                    regex_src.push_str(&sanitize_group_name(&name, param_names.len()));
                    regex_src.push_str(">[^/]+)");
                    param_names.push(name);
                }
                '*' => regex_src.push_str(".*"),
                other => {
                    if is_regex_metachar(other) {
                        regex_src.push('\\');
                    }
                    regex_src.push(other);
                }
            }
        }
        regex_src.push('$');
        let regex = Regex::new(&regex_src)
            .map_err(|err| PatternError::InvalidPattern(source.to_string(), err))?;
        Ok(Self {
            source: source.to_string(),
            regex,
            param_names,
        })
    }

    /// Byte length of the original pattern string.
    #[must_use]
    pub fn length(&self) -> usize {
        self.source.len()
    }

    /// Attempts to match `path`, returning captured parameters by name on
    /// success.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let captures = self.regex.captures(path)?;
        let mut params = HashMap::with_capacity(self.param_names.len());
        for (index, name) in self.param_names.iter().enumerate() {
            let group_name = sanitize_group_name(name, index);
            if let Some(value) = captures.name(&group_name) {
                params.insert(name.clone(), value.as_str().to_string());
            }
        }
        Some(params)
    }
}

fn is_regex_metachar(ch: char) -> bool {
    matches!(
        ch,
        '.' | '^' | '$' | '+' | '?' | '(' | ')' | '[' | ']' | '\\' | '|'
    )
}

/// Regex named groups must be valid identifiers; parameter names in paths
/// (e.g. `resourceName`) usually already are, but we index by position as
/// a fallback to stay correct for any Unicode parameter name.
fn sanitize_group_name(name: &str, index: usize) -> String {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        format!("p_{name}")
    } else {
        format!("p_{index}")
    }
}
