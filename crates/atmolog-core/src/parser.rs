//! Lenient parsing of AtmoWEB responses.
//!
//! The controller answers with something that looks like JSON but frequently
//! is not: the outer braces may be missing, keys and marker values may be
//! unquoted, typographic quotes appear depending on firmware locale, and
//! objects may end in a trailing comma. For example:
//!
//! ```text
//! "TempSet":37.0,"TempSet_Range":{min: 0.0, max: 70.0,},"CO2Set":N/A
//! ```
//!
//! [`normalize`] rewrites such text into strict JSON in a single pass so it can
//! be handed to `serde_json`.

use serde_json::{Map, Value};

use atmolog_types::{ValueRange, channels};

use crate::error::{Error, Result};

/// A parsed AtmoWEB response: key to raw JSON value.
pub type Response = Map<String, Value>;

fn is_curly_quote(c: char) -> bool {
    matches!(c, '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}')
}

fn starts_bareword(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn continues_bareword(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-')
}

/// Number of `{` outside string literals that are never closed.
fn unclosed_braces(text: &str) -> usize {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    depth
}

/// Rewrite a raw AtmoWEB response into strict JSON.
///
/// - typographic double quotes become `"`
/// - missing outer braces are added
/// - unquoted keys and bareword values are quoted (`true`, `false` and
///   `null` are left alone)
/// - commas directly before `}` or `]` are dropped
pub fn normalize(raw: &str) -> String {
    let replaced: String = raw
        .trim()
        .chars()
        .map(|c| if is_curly_quote(c) { '"' } else { c })
        .collect();

    let mut text = replaced.trim().to_string();
    if !text.starts_with('{') {
        text.insert(0, '{');
    }
    let kept = text.trim_end_matches([',', ' ', '\r', '\n', '\t']).len();
    text.truncate(kept);
    for _ in 0..unclosed_braces(&text) {
        text.push('}');
    }

    let mut out = String::with_capacity(text.len() + 16);
    let mut chars = text.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '}' | ']' => {
                let kept = out.trim_end().len();
                out.truncate(kept);
                if out.ends_with(',') {
                    out.pop();
                }
                out.push(c);
            }
            c if starts_bareword(c) && !out.ends_with(|p: char| p.is_ascii_digit() || p == '.') => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if !continues_bareword(next) {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                if matches!(word.as_str(), "true" | "false" | "null") {
                    out.push_str(&word);
                } else {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                }
            }
            _ => out.push(c),
        }
    }

    out
}

/// Normalize and parse a raw response into a key/value map.
pub fn parse_response(raw: &str) -> Result<Response> {
    let normalized = normalize(raw);
    serde_json::from_str(&normalized).map_err(|e| {
        Error::InvalidResponse(format!("{} (normalized body: {})", e, normalized))
    })
}

/// Interpret a raw value as a number.
///
/// Firmware versions differ in whether numbers are sent bare or quoted.
/// Unavailable markers and anything else non-numeric yield `None`.
pub fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if channels::is_unavailable_marker(s) => None,
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Whether a raw value is one of the controller's "not available" markers.
pub fn is_marker(value: &Value) -> bool {
    value.as_str().is_some_and(channels::is_unavailable_marker)
}

fn lookup<'a>(block: &'a Map<String, Value>, variants: &[&str]) -> Option<&'a Value> {
    variants.iter().find_map(|k| block.get(*k))
}

/// Extract the declared valid range for `key`.
///
/// Newer firmware nests it as `<key>_Range: {min, max}` (any capitalisation
/// of the bound names); older firmware uses flat `<key>_RangeMin` /
/// `<key>_RangeMax` keys.
pub fn extract_range(key: &str, response: &Response) -> Option<ValueRange> {
    if let Some(Value::Object(block)) = response.get(&format!("{key}_Range")) {
        let min = lookup(block, &["min", "Min", "MIN"]).and_then(numeric);
        let max = lookup(block, &["max", "Max", "MAX"]).and_then(numeric);
        if let (Some(min), Some(max)) = (min, max) {
            return Some(ValueRange::new(min, max));
        }
    }

    let min = response.get(&format!("{key}_RangeMin")).and_then(numeric)?;
    let max = response.get(&format!("{key}_RangeMax")).and_then(numeric)?;
    Some(ValueRange::new(min, max))
}
