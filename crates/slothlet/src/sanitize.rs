// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Filename sanitization - the L0 layer.
//!
//! Turns raw file and folder names into legal identifier segments for the
//! bound tree. Splitting happens on non-alphanumeric boundaries and on
//! lower-to-upper case transitions; the configured rule set then decides the
//! casing of each token. The function is pure and idempotent: feeding a
//! sanitized segment back through produces the same segment.

use serde::{Deserialize, Serialize};

/// Per-token casing rules with pattern overrides.
///
/// Each list holds glob-style token patterns (`*` matches any run of
/// characters, e.g. `*-ip` or `**url**`). Precedence when several lists
/// match the same token: `leave` > `leave_insensitive` >
/// `preserve_all_upper` / `preserve_all_lower` > `upper` > `lower`.
/// Tokens matched by no rule get the default camel treatment: the first
/// token lowercased, every later token capitalized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SanitizeRules {
    /// Force the token's first letter uppercase.
    pub upper: Vec<String>,
    /// Force the whole token lowercase.
    pub lower: Vec<String>,
    /// Keep the token's original casing, matched case-sensitively.
    pub leave: Vec<String>,
    /// Keep the token's original casing, matched case-insensitively.
    pub leave_insensitive: Vec<String>,
    /// Emit the token in all caps (acronyms: `ip`, `url`).
    pub preserve_all_upper: Vec<String>,
    /// Emit the token in all lowercase.
    pub preserve_all_lower: Vec<String>,
}

/// Outcome of rule evaluation for one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenRule {
    Leave,
    AllUpper,
    AllLower,
    Upper,
    Lower,
    Default,
}

/// Sanitize a raw name (already stripped of its extension) into a single
/// identifier segment.
///
/// Leading numeric-only tokens are dropped so segments never start with a
/// digit. Returns an empty string when nothing identifier-like remains;
/// callers treat that as "skip this entry".
///
/// # Example
///
/// ```rust
/// use slothlet::sanitize::{segment, SanitizeRules};
///
/// let rules = SanitizeRules::default();
/// assert_eq!(segment("auto-ip-detect", &rules), "autoIpDetect");
/// assert_eq!(segment("myModule", &rules), "myModule");
/// ```
pub fn segment(raw: &str, rules: &SanitizeRules) -> String {
    let tokens = split_tokens(raw);

    // Strip numeric-only tokens from the front.
    let mut tokens: Vec<&str> = tokens
        .iter()
        .map(String::as_str)
        .skip_while(|t| t.chars().all(|c| c.is_ascii_digit()))
        .collect();
    tokens.retain(|t| !t.is_empty());

    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        let rendered = match evaluate(token, rules) {
            TokenRule::Leave => (*token).to_string(),
            TokenRule::AllUpper => token.to_uppercase(),
            TokenRule::AllLower => token.to_lowercase(),
            TokenRule::Upper => capitalize(token),
            TokenRule::Lower => token.to_lowercase(),
            TokenRule::Default => {
                if i == 0 {
                    decamel(token)
                } else {
                    capitalize(token)
                }
            }
        };
        out.push_str(&rendered);
    }
    out
}

/// Split on non-alphanumeric boundaries and lower/digit-to-upper
/// transitions. `"auto-IPDetect2x"` becomes `["auto", "IPDetect2x"]` after
/// the separator split, then the case split yields `["auto", "IPDetect2x"]`
/// -> `["auto", "IP", "Detect2x"]` is deliberately NOT produced: only a
/// single lower/digit-to-upper boundary splits, so runs of capitals stay
/// together with their token.
fn split_tokens(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev: Option<char> = None;

    for c in raw.chars() {
        if !c.is_ascii_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev = None;
            continue;
        }
        if let Some(p) = prev {
            let boundary = (p.is_ascii_lowercase() || p.is_ascii_digit()) && c.is_ascii_uppercase();
            if boundary && !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
        prev = Some(c);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn evaluate(token: &str, rules: &SanitizeRules) -> TokenRule {
    if rules.leave.iter().any(|p| glob_match(p, token, false)) {
        return TokenRule::Leave;
    }
    if rules
        .leave_insensitive
        .iter()
        .any(|p| glob_match(p, token, true))
    {
        return TokenRule::Leave;
    }
    if rules
        .preserve_all_upper
        .iter()
        .any(|p| glob_match(p, token, true))
    {
        return TokenRule::AllUpper;
    }
    if rules
        .preserve_all_lower
        .iter()
        .any(|p| glob_match(p, token, true))
    {
        return TokenRule::AllLower;
    }
    if rules.upper.iter().any(|p| glob_match(p, token, true)) {
        return TokenRule::Upper;
    }
    if rules.lower.iter().any(|p| glob_match(p, token, true)) {
        return TokenRule::Lower;
    }
    TokenRule::Default
}

/// Minimal glob over a single token: `*` (and `**`) match any run of
/// characters, everything else is literal. Pattern separators (`-`, `_`)
/// never survive tokenization, so patterns are matched against each token
/// with separators stripped (`*-ip` matches the token `ip`).
fn glob_match(pattern: &str, token: &str, case_insensitive: bool) -> bool {
    let pat: String = pattern
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '*')
        .collect();
    let (pat, token) = if case_insensitive {
        (pat.to_lowercase(), token.to_lowercase())
    } else {
        (pat, token.to_string())
    };
    glob_inner(pat.as_bytes(), token.as_bytes())
}

fn glob_inner(pat: &[u8], text: &[u8]) -> bool {
    match pat.first() {
        None => text.is_empty(),
        Some(b'*') => {
            // Collapse consecutive stars, then try every split point.
            let rest = &pat[pat.iter().take_while(|c| **c == b'*').count()..];
            (0..=text.len()).any(|i| glob_inner(rest, &text[i..]))
        }
        Some(c) => text.first() == Some(c) && glob_inner(&pat[1..], &text[1..]),
    }
}

fn capitalize(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Default treatment for a leading token: lowercase its first letter only,
/// so already-camelled input stays stable.
fn decamel(token: &str) -> String {
    // An all-caps token lowercased wholesale would destroy acronyms on
    // re-sanitization; only the first character is folded.
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
