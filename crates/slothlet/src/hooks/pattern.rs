// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Hook pattern engine.
//!
//! Patterns address leaf paths in dot notation:
//!
//! - `*` matches exactly one segment (no dot);
//! - `**` matches any number of segments, including zero;
//! - `{a,b}` brace alternation expands combinatorially, nesting allowed to
//!   depth 10;
//! - a leading `!` negates the whole pattern;
//! - the empty pattern matches everything.
//!
//! Compilation is cached per pattern string, so registering the same
//! pattern on many hooks costs one regex build.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// Maximum brace nesting accepted at registration time.
pub const MAX_BRACE_DEPTH: usize = 10;

/// A compiled, cached hook pattern.
#[derive(Debug)]
pub struct CompiledPattern {
    /// The original pattern string.
    pub source: String,
    negated: bool,
    regex: Regex,
}

impl CompiledPattern {
    /// Does `path` match this pattern?
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path) != self.negated
    }
}

static CACHE: Lazy<DashMap<String, Arc<CompiledPattern>>> = Lazy::new(DashMap::new);

/// Compile `pattern`, consulting the process-wide cache.
pub fn compile(pattern: &str) -> crate::Result<Arc<CompiledPattern>> {
    if let Some(hit) = CACHE.get(pattern) {
        return Ok(hit.value().clone());
    }

    let (negated, body) = match pattern.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, pattern),
    };
    let body = if body.is_empty() { "**" } else { body };

    let expansions = expand_braces(body)?;
    let alternatives: Vec<String> = expansions
        .iter()
        .map(|p| pattern_to_regex_body(p))
        .collect();
    let full = format!("^(?:{})$", alternatives.join("|"));
    let regex = Regex::new(&full)
        .map_err(|e| crate::Error::Validation(format!("invalid hook pattern '{pattern}': {e}")))?;

    let compiled = Arc::new(CompiledPattern {
        source: pattern.to_string(),
        negated,
        regex,
    });
    CACHE.insert(pattern.to_string(), compiled.clone());
    Ok(compiled)
}

/// Expand brace alternation into the full set of literal patterns.
///
/// Exposed for diagnostics and tests; pure. Rejects nesting beyond
/// [`MAX_BRACE_DEPTH`].
pub fn expand_braces(pattern: &str) -> crate::Result<Vec<String>> {
    if brace_depth(pattern) > MAX_BRACE_DEPTH {
        return Err(crate::Error::Validation(format!(
            "Brace expansion exceeds maximum nesting depth of {MAX_BRACE_DEPTH}"
        )));
    }
    Ok(expand_inner(pattern))
}

fn brace_depth(pattern: &str) -> usize {
    let mut depth = 0usize;
    let mut max = 0usize;
    for c in pattern.chars() {
        match c {
            '{' => {
                depth += 1;
                max = max.max(depth);
            }
            '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    max
}

fn expand_inner(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };
    let Some(close) = matching_brace(pattern, open) else {
        // Unbalanced brace: treat literally.
        return vec![pattern.to_string()];
    };

    let prefix = &pattern[..open];
    let body = &pattern[open + 1..close];
    let suffix = &pattern[close + 1..];

    let mut out = Vec::new();
    for alt in split_top_level(body) {
        let candidate = format!("{prefix}{alt}{suffix}");
        out.extend(expand_inner(&candidate));
    }
    out
}

fn matching_brace(pattern: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in pattern.char_indices() {
        if i < open {
            continue;
        }
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in body.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

/// Translate one brace-free pattern into an anchored regex string.
///
/// Exposed for diagnostics and tests; pure.
pub fn pattern_to_regex(pattern: &str) -> String {
    format!("^{}$", pattern_to_regex_body(pattern))
}

fn pattern_to_regex_body(pattern: &str) -> String {
    if pattern.is_empty() || pattern == "**" {
        return ".*".to_string();
    }

    let segments: Vec<&str> = pattern.split('.').collect();
    let mut out = String::new();
    let mut need_sep = false;
    let last = segments.len() - 1;

    for (i, seg) in segments.iter().enumerate() {
        if *seg == "**" {
            if i == last {
                if need_sep {
                    out.push_str("(?:\\..*)?");
                } else {
                    out.push_str(".*");
                }
            } else if need_sep {
                // Zero or more additional segments before the next literal.
                out.push_str("(?:\\.[^.]+)*");
            } else {
                out.push_str("(?:[^.]+\\.)*");
                need_sep = false;
                continue;
            }
        } else {
            if need_sep {
                out.push_str("\\.");
            }
            out.push_str(&translate_segment(seg));
            need_sep = true;
        }
    }
    out
}

fn translate_segment(seg: &str) -> String {
    let mut out = String::new();
    for c in seg.chars() {
        if c == '*' {
            out.push_str("[^.]*");
        } else {
            out.push_str(&regex::escape(&c.to_string()));
        }
    }
    out
}
