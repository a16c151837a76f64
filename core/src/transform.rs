//! Line-level classify/prepare/protect/reinject transform for
//! `$msg_arr[...] = '...'` / `"..."` assignments.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use thiserror::Error;

static SINGLE_QUOTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(\s*\$msg_arr\[.*?\]\s*=\s*')((?:[^'\\]|\\.)*)(';\s*;?\s*)$"#)
        .expect("valid single-quoted line pattern")
});

static DOUBLE_QUOTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(\s*\$msg_arr\[.*?\]\s*=\s*")((?:[^"\\]|\\.)*)(";?\s*;?\s*)$"#)
        .expect("valid double-quoted line pattern")
});

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[A-Za-z_][A-Za-z0-9_]*\}").expect("valid placeholder pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteKind {
    Single,
    Double,
}

impl QuoteKind {
    fn quote_char(self) -> char {
        match self {
            QuoteKind::Single => '\'',
            QuoteKind::Double => '"',
        }
    }
}

/// Result of [`classify`]: the three spans of a translatable line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineMatch {
    pub prefix: String,
    pub raw_literal: String,
    pub suffix: String,
    pub quote_kind: QuoteKind,
}

/// Classify a source line. Tries the single-quoted pattern first, then the
/// double-quoted one; any line matching neither is opaque (`None`).
pub fn classify(line: &str) -> Option<LineMatch> {
    if let Some(caps) = SINGLE_QUOTED.captures(line) {
        return Some(LineMatch {
            prefix: caps[1].to_string(),
            raw_literal: caps[2].to_string(),
            suffix: caps[3].to_string(),
            quote_kind: QuoteKind::Single,
        });
    }
    if let Some(caps) = DOUBLE_QUOTED.captures(line) {
        return Some(LineMatch {
            prefix: caps[1].to_string(),
            raw_literal: caps[2].to_string(),
            suffix: caps[3].to_string(),
            quote_kind: QuoteKind::Double,
        });
    }
    None
}

/// Undo the script's own escape conventions for the active quote kind.
/// No other transformation is applied.
pub fn prepare(raw_literal: &str, quote_kind: QuoteKind) -> String {
    match quote_kind {
        QuoteKind::Single => raw_literal.replace("\\'", "'").replace("\\\\", "\\"),
        QuoteKind::Double => raw_literal.replace("\\\"", "\""),
    }
}

/// Mapping from an opaque `__PH<N>__` token to the original placeholder text
/// it replaced, in first-occurrence order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderMap {
    entries: BTreeMap<String, String>,
}

impl PlaceholderMap {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    /// Original placeholder texts (e.g. `{user}`), in token order.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|s| s.as_str())
    }
}

/// Replace every `\{name\}` placeholder occurrence with an opaque
/// `__PH<N>__` token, in order of first occurrence. Casing and braces of the
/// original placeholder text are preserved in the map.
pub fn protect(text: &str) -> (String, PlaceholderMap) {
    let mut map = PlaceholderMap::default();
    let mut index = 0usize;
    let protected = PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures| {
            let token = format!("__PH{}__", index);
            index += 1;
            map.entries.insert(token.clone(), caps[0].to_string());
            token
        })
        .into_owned();
    (protected, map)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("translation is missing placeholder tokens: {0:?}")]
    MissingTokens(Vec<String>),
    #[error("translation contains unexpected placeholder tokens: {0:?}")]
    UnexpectedTokens(Vec<String>),
}

/// Substitute every placeholder token back to its original text, then
/// re-escape the active quote character, producing the full output line.
pub fn reinject(
    translated: &str,
    placeholder_map: &PlaceholderMap,
    prefix: &str,
    suffix: &str,
    quote_kind: QuoteKind,
) -> Result<String, TransformError> {
    let restored = restore_placeholders(translated, placeholder_map)?;
    let escaped = escape_for_quote(&restored, quote_kind);
    Ok(format!("{prefix}{escaped}{suffix}\n"))
}

fn restore_placeholders(
    translated: &str,
    placeholder_map: &PlaceholderMap,
) -> Result<String, TransformError> {
    if placeholder_map.is_empty() {
        return Ok(translated.to_string());
    }

    let mut missing = Vec::new();
    for token in placeholder_map.tokens() {
        if !translated.contains(token) {
            missing.push(token.to_string());
        }
    }
    if !missing.is_empty() {
        return Err(TransformError::MissingTokens(missing));
    }

    let mut out = translated.to_string();
    for (token, original) in &placeholder_map.entries {
        out = out.replace(token.as_str(), original.as_str());
    }
    Ok(out)
}

fn escape_for_quote(text: &str, quote_kind: QuoteKind) -> String {
    let quote = quote_kind.quote_char();
    match quote_kind {
        QuoteKind::Single => {
            // Escape backslashes first, then the quote character itself;
            // mirrors the order PHP single-quote escaping requires.
            text.replace('\\', "\\\\").replace(quote, "\\'")
        }
        QuoteKind::Double => text.replace(quote, "\\\""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_single_quoted_assignment() {
        let m = classify("$msg_arr['ok'] = 'Save changes';").unwrap();
        assert_eq!(m.quote_kind, QuoteKind::Single);
        assert_eq!(m.raw_literal, "Save changes");
    }

    #[test]
    fn classifies_double_quoted_assignment() {
        let m = classify("$msg_arr['m'] = \"Hi {user}\";").unwrap();
        assert_eq!(m.quote_kind, QuoteKind::Double);
        assert_eq!(m.raw_literal, "Hi {user}");
    }

    #[test]
    fn opaque_lines_do_not_classify() {
        assert!(classify("<?php").is_none());
        assert!(classify("?>").is_none());
        assert!(classify("// comment").is_none());
    }

    #[test]
    fn round_trip_without_placeholders() {
        let raw = "It\\'s here";
        let natural = prepare(raw, QuoteKind::Single);
        let (protected, map) = protect(&natural);
        assert!(map.is_empty());
        let out = reinject(&protected, &map, "", "", QuoteKind::Single).unwrap();
        assert_eq!(out.trim_end_matches('\n'), raw);
    }

    #[test]
    fn protects_and_restores_placeholders_in_order() {
        let text = "Hi {user}, you have {n} new {type} messages.";
        let (protected, map) = protect(text);
        assert_eq!(protected, "Hi __PH0__, you have __PH1__ new __PH2__ messages.");
        let restored = restore_placeholders(protected.as_str(), &map).unwrap();
        assert_eq!(restored, text);
    }

    #[test]
    fn reinject_escapes_single_quotes() {
        let map = PlaceholderMap::default();
        let out = reinject("It's here", &map, "", "", QuoteKind::Single).unwrap();
        assert_eq!(out, "It\\'s here\n");
    }

    #[test]
    fn reinject_escapes_double_quotes() {
        let map = PlaceholderMap::default();
        let out = reinject("She said \"hi\"", &map, "", "", QuoteKind::Double).unwrap();
        assert_eq!(out, "She said \\\"hi\\\"\n");
    }

    #[test]
    fn reinject_reports_missing_tokens() {
        let (_, map) = protect("Hello {user}");
        let err = reinject("Hello translated text", &map, "", "", QuoteKind::Single).unwrap_err();
        assert!(matches!(err, TransformError::MissingTokens(_)));
    }

    #[test]
    fn full_pipeline_preserves_escape_and_placeholder() {
        let raw = r#"Hi \{user\}, you owe {n} credits"#; // literal braces not a placeholder here
        let natural = prepare(raw, QuoteKind::Double);
        let (protected, map) = protect(&natural);
        // only the un-escaped {n} should be protected
        assert!(protected.contains("__PH0__"));
        let translated = protected.replace("Hi", "Olá");
        let out = reinject(&translated, &map, "", "", QuoteKind::Double).unwrap();
        assert!(out.contains("{n}"));
    }
}
