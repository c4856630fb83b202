//! Best-effort extraction of a single string field from an in-progress,
//! not-yet-complete JSON argument blob.
//!
//! Tool-call arguments stream in as text deltas, so the accumulated blob is
//! usually unparseable until the final delta lands. A full structural decode
//! is tried first; when it fails, a tolerant pattern match pulls out the
//! longest run of escaped-or-plain characters following `"<field>":"`. The
//! fallback handles one level of string escaping only; a raw quote inside
//! nested structure can cut the value short. That is an accepted rendering
//! approximation, not a bug to fix here.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::sync::RwLock;

lazy_static! {
    static ref FIELD_PATTERNS: RwLock<HashMap<String, Regex>> = RwLock::new(HashMap::new());
}

/// Extracts `field`'s string value from `raw`, which may be incomplete.
/// Called on every argument delta; it re-scans the whole accumulated buffer
/// each time and has no side effects, so repeated calls with the same input
/// yield the same output.
pub fn extract_string_field(raw: &str, field: &str) -> Option<String> {
    // Tier 1: the blob may already be complete and well-formed. A complete
    // blob is authoritative: no top-level field means nothing to extract,
    // and the pattern tier must not dig a same-named field out of nested
    // structure.
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
        return value
            .get(field)
            .and_then(|v| v.as_str())
            .map(str::to_string);
    }

    // Tier 2: tolerant match against the partial text.
    let pattern = field_pattern(field)?;
    let captures = pattern.captures(raw)?;
    let fragment = captures.get(1)?.as_str();
    if fragment.is_empty() {
        return None;
    }
    Some(unescape_json_fragment(fragment))
}

fn field_pattern(field: &str) -> Option<Regex> {
    if let Ok(cache) = FIELD_PATTERNS.read() {
        if let Some(re) = cache.get(field) {
            return Some(re.clone());
        }
    }
    let source = format!(r#""{}"\s*:\s*"((?:\\.|[^"\\])*)"#, regex::escape(field));
    let re = match Regex::new(&source) {
        Ok(re) => re,
        Err(e) => {
            tracing::warn!("[EXTRACT] Bad field pattern for '{}': {}", field, e);
            return None;
        }
    };
    if let Ok(mut cache) = FIELD_PATTERNS.write() {
        cache.insert(field.to_string(), re.clone());
    }
    Some(re)
}

/// Undoes one level of JSON string escaping. Unknown escapes pass through
/// with their backslash intact.
fn unescape_json_fragment(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut chars = fragment.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{0008}'),
            Some('f') => out.push('\u{000C}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                // A short escape means the remaining digits are still in
                // flight; keep it verbatim rather than decode a prefix.
                let decoded = if hex.len() == 4 {
                    u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)
                } else {
                    None
                };
                match decoded {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            // Trailing lone backslash mid-stream; the escape's second half
            // has not arrived yet.
            None => {}
        }
    }
    out
}
