//! Response classification
//!
//! Pure functions that decide, from raw bytes and a keyword vocabulary,
//! whether a device answer is complete and what it means.

use serde::{Deserialize, Serialize};

use super::ProtocolError;

/// Keywords a device uses to flag failures.
///
/// Matching is case-insensitive; [`ResponseVocabulary::normalized`] stores
/// everything lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseVocabulary {
    /// Marks a recoverable command error
    pub error_keyword: String,
    /// Marks an alarm condition; wins over `error_keyword`
    pub alarm_keyword: String,
    /// Marks error notices the device sends on its own, outside any exchange
    pub async_error_ack: Option<String>,
}

impl ResponseVocabulary {
    /// `error` / `alarm`, no asynchronous notices
    pub fn standard() -> Self {
        Self {
            error_keyword: "error".to_string(),
            alarm_keyword: "alarm".to_string(),
            async_error_ack: None,
        }
    }

    /// Devices that push asynchronous error notices: `err` / `alarm`, notices
    /// marked with `async`
    pub fn async_response() -> Self {
        Self {
            error_keyword: "err".to_string(),
            alarm_keyword: "alarm".to_string(),
            async_error_ack: Some("async".to_string()),
        }
    }

    /// Lowercase every keyword; an empty notice marker means "none"
    pub fn normalized(self) -> Self {
        Self {
            error_keyword: self.error_keyword.to_lowercase(),
            alarm_keyword: self.alarm_keyword.to_lowercase(),
            async_error_ack: self
                .async_error_ack
                .map(|m| m.to_lowercase())
                .filter(|m| !m.is_empty()),
        }
    }

    /// Empty keywords would match every response
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.error_keyword.is_empty() {
            return Err(ProtocolError::InvalidConfig(
                "error keyword must not be empty".to_string(),
            ));
        }
        if self.alarm_keyword.is_empty() {
            return Err(ProtocolError::InvalidConfig(
                "alarm keyword must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `response` carries the asynchronous error notice marker.
    ///
    /// Always false when no marker is configured.
    pub fn is_async_notice(&self, response: &str) -> bool {
        match &self.async_error_ack {
            Some(marker) => response.to_lowercase().contains(marker.as_str()),
            None => false,
        }
    }
}

impl Default for ResponseVocabulary {
    fn default() -> Self {
        Self::standard()
    }
}

/// Outcome of a response that ended an exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Plain answer, acknowledgement stripped and trimmed
    Acknowledged(String),
    /// Error keyword present
    Error(String),
    /// Alarm keyword present
    Alarm(String),
}

/// Byte-substring search
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

/// Remove every non-overlapping occurrence of `ack`, scanning left to right
pub fn strip_ack(raw: &[u8], ack: &[u8]) -> Vec<u8> {
    if ack.is_empty() {
        return raw.to_vec();
    }
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i..].starts_with(ack) {
            i += ack.len();
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    out
}

/// Whether a raw read finished the exchange: the acknowledgement arrived,
/// or the device answered with its error keyword (ASCII case-insensitive).
///
/// Anything else is treated as a timeout.
pub fn is_complete(raw: &[u8], ack: &[u8], error_keyword: &str) -> bool {
    contains(raw, ack) || contains(&raw.to_ascii_lowercase(), error_keyword.as_bytes())
}

/// Classify a decoded response. Alarm beats error.
pub fn classify(response: &str, vocabulary: &ResponseVocabulary) -> Classification {
    let trimmed = response.trim().to_string();
    let lower = trimmed.to_lowercase();
    if lower.contains(&vocabulary.alarm_keyword) {
        Classification::Alarm(trimmed)
    } else if lower.contains(&vocabulary.error_keyword) {
        Classification::Error(trimmed)
    } else {
        Classification::Acknowledged(trimmed)
    }
}

/// Strip the acknowledgement, decode (lossy UTF-8) and classify
pub fn process(raw: &[u8], ack: &[u8], vocabulary: &ResponseVocabulary) -> Classification {
    let stripped = strip_ack(raw, ack);
    classify(&String::from_utf8_lossy(&stripped), vocabulary)
}
