//! Output items and value encoding.
//!
//! An [`OutputItem`] is what invocation code hands to the collector: every
//! field except the increment amount may be left unset and filled in from
//! configuration. A [`ResolvedItem`] is the merged copy that is actually
//! dispatched.
//!
//! Items also deserialize from the JSON envelope used by invocation hosts:
//!
//! ```json
//! { "key": "k", "textValue": "v", "operation": "listPushRight", "ttl": "00:05:00" }
//! ```

use crate::core::error::SinkResult;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Operation performed against the backend for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    /// Set the string value at key, overwriting unconditionally.
    #[default]
    #[serde(alias = "SetKeyValue", alias = "setKeyValue", alias = "SetValue")]
    SetValue,
    /// Add the increment amount to the integer at key.
    #[serde(alias = "IncrementValue", alias = "incrementValue", alias = "Increment")]
    Increment,
    /// Append to the tail of the list at key.
    #[serde(alias = "ListRightPush", alias = "listRightPush", alias = "ListPushRight")]
    ListPushRight,
    /// Prepend to the head of the list at key.
    #[serde(alias = "ListLeftPush", alias = "listLeftPush", alias = "ListPushLeft")]
    ListPushLeft,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SetValue => write!(f, "SetValue"),
            Self::Increment => write!(f, "Increment"),
            Self::ListPushRight => write!(f, "ListPushRight"),
            Self::ListPushLeft => write!(f, "ListPushLeft"),
        }
    }
}

/// Payload of an output item.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputValue {
    /// Plain text, stored as UTF-8.
    Text(String),
    /// Arbitrary JSON, stored as its serialized text.
    Structured(serde_json::Value),
    /// Raw bytes, stored as-is.
    Binary(Bytes),
}

impl OutputValue {
    /// Encode the payload to the bytes stored by the backend.
    pub fn encode(&self) -> SinkResult<Bytes> {
        match self {
            Self::Binary(b) => Ok(b.clone()),
            Self::Structured(v) => Ok(Bytes::from(serde_json::to_vec(v)?)),
            Self::Text(s) => Ok(Bytes::from(s.clone())),
        }
    }
}

/// Encode an optional payload; an absent payload encodes to null.
pub fn encode_value(value: Option<&OutputValue>) -> SinkResult<Option<Bytes>> {
    value.map(OutputValue::encode).transpose()
}

/// One pending operation as supplied by invocation code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ItemEnvelope", into = "ItemEnvelope")]
pub struct OutputItem {
    /// Target key; falls back to declaration then provider configuration.
    pub key: Option<String>,
    /// Value payload. Ignored by [`Operation::Increment`].
    pub value: Option<OutputValue>,
    /// Operation; `None` falls back to configuration, then `SetValue`.
    pub operation: Option<Operation>,
    /// Expiry relative to write time.
    pub ttl: Option<Duration>,
    /// Amount added by [`Operation::Increment`].
    pub increment_amount: i64,
}

impl Default for OutputItem {
    fn default() -> Self {
        Self {
            key: None,
            value: None,
            operation: None,
            ttl: None,
            increment_amount: default_increment(),
        }
    }
}

impl OutputItem {
    /// An item carrying a text payload.
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: Some(OutputValue::Text(value.into())),
            ..Default::default()
        }
    }

    /// An item carrying a JSON payload.
    pub fn structured(value: serde_json::Value) -> Self {
        Self {
            value: Some(OutputValue::Structured(value)),
            ..Default::default()
        }
    }

    /// An item carrying a binary payload.
    pub fn binary(value: impl Into<Bytes>) -> Self {
        Self {
            value: Some(OutputValue::Binary(value.into())),
            ..Default::default()
        }
    }

    /// An increment of `amount`.
    pub fn increment(amount: i64) -> Self {
        Self {
            operation: Some(Operation::Increment),
            increment_amount: amount,
            ..Default::default()
        }
    }

    /// Set the key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the operation.
    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Set the time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Parse an item from its JSON envelope.
    pub fn from_json(json: &str) -> SinkResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// An item after configuration merge, ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedItem {
    pub key: String,
    pub value: Option<OutputValue>,
    pub operation: Operation,
    pub ttl: Option<Duration>,
    pub increment_amount: i64,
}

fn default_increment() -> i64 {
    1
}

/// JSON wire shape of an output item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    object_value: Option<serde_json::Value>,
    /// Base64-encoded bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    binary_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    operation: Option<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ttl: Option<TtlValue>,
    #[serde(default = "default_increment", alias = "incrementAmount")]
    increment_value: i64,
}

/// TTL as integer seconds or a `[d.]hh:mm:ss[.fffffff]` time span.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum TtlValue {
    Seconds(u64),
    Span(String),
}

impl TryFrom<ItemEnvelope> for OutputItem {
    type Error = String;

    fn try_from(envelope: ItemEnvelope) -> Result<Self, Self::Error> {
        // binary > structured > text
        let value = if let Some(encoded) = envelope.binary_value {
            let bytes = STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| format!("binaryValue is not valid base64: {}", e))?;
            Some(OutputValue::Binary(Bytes::from(bytes)))
        } else if let Some(object) = envelope.object_value {
            Some(OutputValue::Structured(object))
        } else {
            envelope.text_value.map(OutputValue::Text)
        };

        let ttl = match envelope.ttl {
            Some(TtlValue::Seconds(secs)) => Some(Duration::from_secs(secs)),
            Some(TtlValue::Span(span)) => Some(parse_time_span(&span)?),
            None => None,
        };

        Ok(Self {
            key: envelope.key,
            value,
            operation: envelope.operation,
            ttl,
            increment_amount: envelope.increment_value,
        })
    }
}

impl From<OutputItem> for ItemEnvelope {
    fn from(item: OutputItem) -> Self {
        let (text_value, object_value, binary_value) = match item.value {
            Some(OutputValue::Text(s)) => (Some(s), None, None),
            Some(OutputValue::Structured(v)) => (None, Some(v), None),
            Some(OutputValue::Binary(b)) => (None, None, Some(STANDARD.encode(&b))),
            None => (None, None, None),
        };

        Self {
            key: item.key,
            text_value,
            object_value,
            binary_value,
            operation: item.operation,
            ttl: item.ttl.map(|d| TtlValue::Span(format_time_span(d))),
            increment_value: item.increment_amount,
        }
    }
}

/// Parse a `[d.]hh:mm:ss[.fffffff]` time span.
pub fn parse_time_span(span: &str) -> Result<Duration, String> {
    let invalid = || format!("invalid time span: '{}'", span);

    let last_colon = span.rfind(':').ok_or_else(invalid)?;

    // a '.' after the last ':' starts the fraction
    let (clock, fraction) = match span.rfind('.') {
        Some(dot) if dot > last_colon => (&span[..dot], Some(&span[dot + 1..])),
        _ => (span, None),
    };

    let (days, clock) = match clock.split_once('.') {
        Some((d, rest)) => (d.parse::<u64>().map_err(|_| invalid())?, rest),
        None => (0, clock),
    };

    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() != 3 {
        return Err(invalid());
    }
    let hours: u64 = parts[0].parse().map_err(|_| invalid())?;
    let minutes: u64 = parts[1].parse().map_err(|_| invalid())?;
    let seconds: u64 = parts[2].parse().map_err(|_| invalid())?;
    if minutes >= 60 || seconds >= 60 {
        return Err(invalid());
    }

    let nanos = match fraction {
        Some(f) if !f.is_empty() && f.len() <= 9 && f.bytes().all(|b| b.is_ascii_digit()) => {
            let scale = 10u32.pow(9 - f.len() as u32);
            f.parse::<u32>().map_err(|_| invalid())? * scale
        }
        Some(_) => return Err(invalid()),
        None => 0,
    };

    let total = days
        .checked_mul(24)
        .and_then(|h| h.checked_add(hours))
        .and_then(|h| h.checked_mul(60))
        .and_then(|m| m.checked_add(minutes))
        .and_then(|m| m.checked_mul(60))
        .and_then(|s| s.checked_add(seconds))
        .ok_or_else(invalid)?;
    Ok(Duration::new(total, nanos))
}

/// Format a duration as `[d.]hh:mm:ss[.fff]`.
pub fn format_time_span(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    let millis = duration.subsec_millis();

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{}.", days));
    }
    out.push_str(&format!("{:02}:{:02}:{:02}", hours, minutes, seconds));
    if millis > 0 {
        out.push_str(&format!(".{:03}", millis));
    }
    out
}
