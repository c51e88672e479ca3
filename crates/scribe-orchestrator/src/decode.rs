//! Structured decoding of model output.
//!
//! Models are asked for JSON but regularly wrap it in code fences or prose,
//! or drift into `key: value` text. Every consumer goes through the same
//! ladder:
//!
//! 1. strict parse of the whole reply
//! 2. parse of the first fenced code block
//! 3. parse of the first balanced `{...}` object found in the text
//! 4. loose `key: value` extraction via [`Decode::from_fields`]
//! 5. the type's [`Decode::fallback`] value
//!
//! [`decode`] never fails; [`decode_json`] stops after stage 3.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[ \t]*(?:json|JSON)?[ \t]*\r?\n?(.*?)```").expect("fence regex should be valid")
});

static GREEDY_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[\s\S]*\}").expect("object regex should be valid"));

const PATTERN_CACHE_CAPACITY: usize = 256;

static PATTERN_CACHE: Lazy<Mutex<HashMap<String, Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Compiles `pattern` once and hands out clones afterwards.
///
/// Patterns built from field keys and section names repeat across requests.
/// The cache is emptied when it reaches capacity.
pub(crate) fn cached_regex(pattern: &str) -> Option<Regex> {
    let mut cache = PATTERN_CACHE.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(regex) = cache.get(pattern) {
        return Some(regex.clone());
    }
    let regex = Regex::new(pattern).ok()?;
    if cache.len() >= PATTERN_CACHE_CAPACITY {
        cache.clear();
    }
    cache.insert(pattern.to_string(), regex.clone());
    Some(regex)
}

/// Which rung of the ladder produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    /// The whole reply was valid JSON.
    Strict,
    /// JSON inside a code fence.
    Fenced,
    /// JSON object embedded in prose.
    Embedded,
    /// Loose key/value extraction.
    Fields,
    /// Nothing usable; the type's default.
    Fallback,
}

impl DecodeStage {
    /// Returns true if the value came from a real parse or extraction.
    #[must_use]
    pub const fn is_parsed(self) -> bool {
        !matches!(self, Self::Fallback)
    }
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Strict => "strict",
            Self::Fenced => "fenced",
            Self::Embedded => "embedded",
            Self::Fields => "fields",
            Self::Fallback => "fallback",
        };
        f.write_str(name)
    }
}

/// A decoded value with the stage that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    /// The value.
    pub value: T,
    /// How it was obtained.
    pub stage: DecodeStage,
}

/// JSON could not be recovered from the text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The reply was empty or whitespace.
    #[error("empty model reply")]
    Empty,
    /// No candidate deserialized into the target type.
    #[error("no parsable JSON found: {0}")]
    NoJson(String),
}

/// Types that can be recovered from loose model output.
pub trait Decode: DeserializeOwned {
    /// Builds a value from `key: value` fragments when no JSON parsed.
    fn from_fields(_fields: &FieldScan<'_>) -> Option<Self> {
        None
    }

    /// Value used when every other stage failed.
    fn fallback(raw: &str) -> Self;
}

/// Runs the full ladder. Never fails.
pub fn decode<T: Decode>(raw: &str) -> Decoded<T> {
    match decode_json::<T>(raw) {
        Ok(decoded) => decoded,
        Err(err) => {
            if let Some(value) = T::from_fields(&FieldScan::new(raw)) {
                debug!(error = %err, "Recovered structured output from key/value fields");
                return Decoded { value, stage: DecodeStage::Fields };
            }
            debug!(error = %err, "Structured output unrecoverable, using fallback");
            Decoded { value: T::fallback(raw), stage: DecodeStage::Fallback }
        }
    }
}

/// Runs the JSON rungs only (strict, fenced, embedded).
///
/// # Errors
/// Returns `DecodeError` when no rung yields a `T`.
pub fn decode_json<T: DeserializeOwned>(raw: &str) -> Result<Decoded<T>, DecodeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut last_error = match serde_json::from_str::<T>(trimmed) {
        Ok(value) => return Ok(Decoded { value, stage: DecodeStage::Strict }),
        Err(e) => e.to_string(),
    };

    if let Some(block) = fenced_block(trimmed) {
        match serde_json::from_str::<T>(block) {
            Ok(value) => return Ok(Decoded { value, stage: DecodeStage::Fenced }),
            Err(e) => last_error = e.to_string(),
        }
    }

    for candidate in [balanced_object(trimmed), GREEDY_OBJECT.find(trimmed).map(|m| m.as_str())]
        .into_iter()
        .flatten()
    {
        match serde_json::from_str::<T>(candidate) {
            Ok(value) => return Ok(Decoded { value, stage: DecodeStage::Embedded }),
            Err(e) => last_error = e.to_string(),
        }
    }

    Err(DecodeError::NoJson(last_error))
}

/// Contents of the first fenced code block, trimmed.
pub fn fenced_block(text: &str) -> Option<&str> {
    FENCED_BLOCK.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().trim()).filter(|s| !s.is_empty())
}

/// The first brace-balanced object in `text`, honouring JSON strings.
pub fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Loose `key: value` scanner over raw model text.
#[derive(Debug, Clone, Copy)]
pub struct FieldScan<'a> {
    text: &'a str,
}

impl<'a> FieldScan<'a> {
    /// Wraps `text`.
    #[must_use]
    pub const fn new(text: &'a str) -> Self {
        Self { text }
    }

    /// The raw text.
    #[must_use]
    pub const fn text(&self) -> &'a str {
        self.text
    }

    fn pattern(key: &str, value: &str) -> Option<Regex> {
        cached_regex(&format!(r#"(?i)["']?\b{}\b["']?\s*[:=]\s*{value}"#, regex::escape(key)))
    }

    /// First number following `key`.
    pub fn number(&self, key: &str) -> Option<f64> {
        Self::pattern(key, r"(-?\d+(?:\.\d+)?)")?
            .captures(self.text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// First boolean-ish word following `key`.
    pub fn boolean(&self, key: &str) -> Option<bool> {
        let captured = Self::pattern(key, r#"["']?(true|false|yes|no)\b"#)?.captures(self.text)?.get(1)?;
        Some(matches!(captured.as_str().to_lowercase().as_str(), "true" | "yes"))
    }

    /// Quoted string following `key`, or the rest of the line when unquoted.
    pub fn string(&self, key: &str) -> Option<String> {
        let captures = Self::pattern(key, r#"(?:"([^"]*)"|([^,\n}]+))"#)?.captures(self.text)?;
        captures
            .get(1)
            .or_else(|| captures.get(2))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    }
}
