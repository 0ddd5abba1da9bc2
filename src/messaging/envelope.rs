//! # Message Envelope
//!
//! Every message on the wire is a JSON object:
//!
//! ```json
//! {"type": "categorized_bug", "timestamp": "2026-01-01T00:00:00Z", "data": {...}}
//! ```
//!
//! with an optional `failure_info` object carried for dead-letter bookkeeping.
//! Decoding happens in two stages: [`RawEnvelope::parse`] checks the envelope
//! shape without touching the payload, then [`RawEnvelope::into_message`] turns
//! `data` into its typed [`TriageMessage`] variant and validates it. The
//! dead-letter handler only needs the first stage.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::models::{
    Assignment, AssignmentFeedback, BugReport, CategorizedBug, DeveloperStatus,
    NotificationPayload, SystemEvent, ValidationError,
};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EnvelopeError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Envelope is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Payload does not match {message_type}: {reason}")]
    PayloadMismatch {
        message_type: MessageType,
        reason: String,
    },
}

impl From<ValidationError> for EnvelopeError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidData(err.to_string())
    }
}

/// Wire tag of every message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    BugReport,
    CategorizedBug,
    Assignment,
    AssignmentFeedback,
    DeveloperStatusUpdate,
    Notification,
    SystemEvent,
}

impl MessageType {
    pub const ALL: [MessageType; 7] = [
        Self::BugReport,
        Self::CategorizedBug,
        Self::Assignment,
        Self::AssignmentFeedback,
        Self::DeveloperStatusUpdate,
        Self::Notification,
        Self::SystemEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BugReport => "bug_report",
            Self::CategorizedBug => "categorized_bug",
            Self::Assignment => "assignment",
            Self::AssignmentFeedback => "assignment_feedback",
            Self::DeveloperStatusUpdate => "developer_status_update",
            Self::Notification => "notification",
            Self::SystemEvent => "system_event",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EnvelopeError::UnknownType(s.to_string()))
    }
}

/// A typed message; one variant per [`MessageType`]
#[derive(Debug, Clone, PartialEq)]
pub enum TriageMessage {
    BugReport(BugReport),
    CategorizedBug(CategorizedBug),
    Assignment(Assignment),
    AssignmentFeedback(AssignmentFeedback),
    DeveloperStatusUpdate(DeveloperStatus),
    Notification(NotificationPayload),
    SystemEvent(SystemEvent),
}

impl TriageMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::BugReport(_) => MessageType::BugReport,
            Self::CategorizedBug(_) => MessageType::CategorizedBug,
            Self::Assignment(_) => MessageType::Assignment,
            Self::AssignmentFeedback(_) => MessageType::AssignmentFeedback,
            Self::DeveloperStatusUpdate(_) => MessageType::DeveloperStatusUpdate,
            Self::Notification(_) => MessageType::Notification,
            Self::SystemEvent(_) => MessageType::SystemEvent,
        }
    }

    /// Payload as the JSON object placed under `data`
    pub fn to_data(&self) -> Result<Value, EnvelopeError> {
        let value = match self {
            Self::BugReport(m) => serde_json::to_value(m),
            Self::CategorizedBug(m) => serde_json::to_value(m),
            Self::Assignment(m) => serde_json::to_value(m),
            Self::AssignmentFeedback(m) => serde_json::to_value(m),
            Self::DeveloperStatusUpdate(m) => serde_json::to_value(m),
            Self::Notification(m) => serde_json::to_value(m),
            Self::SystemEvent(m) => serde_json::to_value(m),
        };
        value.map_err(|e| EnvelopeError::InvalidData(e.to_string()))
    }

    fn from_data(message_type: MessageType, data: Value) -> Result<Self, EnvelopeError> {
        let mismatch = |e: serde_json::Error| EnvelopeError::PayloadMismatch {
            message_type,
            reason: e.to_string(),
        };
        let message = match message_type {
            MessageType::BugReport => Self::BugReport(serde_json::from_value(data).map_err(mismatch)?),
            MessageType::CategorizedBug => {
                Self::CategorizedBug(serde_json::from_value(data).map_err(mismatch)?)
            }
            MessageType::Assignment => Self::Assignment(serde_json::from_value(data).map_err(mismatch)?),
            MessageType::AssignmentFeedback => {
                Self::AssignmentFeedback(serde_json::from_value(data).map_err(mismatch)?)
            }
            MessageType::DeveloperStatusUpdate => {
                Self::DeveloperStatusUpdate(serde_json::from_value(data).map_err(mismatch)?)
            }
            MessageType::Notification => {
                Self::Notification(serde_json::from_value(data).map_err(mismatch)?)
            }
            MessageType::SystemEvent => Self::SystemEvent(serde_json::from_value(data).map_err(mismatch)?),
        };
        Ok(message)
    }

    /// Domain validation of the payload
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        match self {
            Self::BugReport(m) => m.validate()?,
            Self::CategorizedBug(m) => m.validate()?,
            Self::Assignment(m) => m.validate()?,
            Self::AssignmentFeedback(m) => m.validate()?,
            Self::DeveloperStatusUpdate(m) => m.validate()?,
            Self::Notification(_) | Self::SystemEvent(_) => {}
        }
        Ok(())
    }
}

/// Dead-letter bookkeeping carried alongside a payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    #[serde(default)]
    pub original_queue: Option<String>,
    #[serde(default = "unknown_reason")]
    pub reason: String,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(with = "flexible_timestamp")]
    pub first_failed_at: DateTime<Utc>,
    #[serde(with = "flexible_timestamp")]
    pub last_failed_at: DateTime<Utc>,
    #[serde(default)]
    pub original_routing_key: Option<String>,
    #[serde(default)]
    pub original_properties: Value,
    #[serde(default)]
    pub retry_attempt: Option<u32>,
}

fn unknown_reason() -> String {
    "unknown".to_string()
}

/// Envelope whose shape has been checked but whose payload is still raw JSON
#[derive(Debug, Clone, PartialEq)]
pub struct RawEnvelope {
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
    pub failure_info: Option<FailureInfo>,
}

/// Fully decoded and validated message
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub message: TriageMessage,
    pub failure_info: Option<FailureInfo>,
}

impl RawEnvelope {
    /// Checks the envelope: JSON object, required keys, known type,
    /// parseable timestamp, object `data`
    pub fn parse(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::InvalidJson(e.to_string()))?;
        let Value::Object(mut object) = value else {
            return Err(EnvelopeError::InvalidJson(
                "envelope is not a JSON object".to_string(),
            ));
        };

        let type_value = object.remove("type").ok_or(EnvelopeError::MissingField("type"))?;
        let timestamp_value = object
            .remove("timestamp")
            .ok_or(EnvelopeError::MissingField("timestamp"))?;
        let data = object.remove("data").ok_or(EnvelopeError::MissingField("data"))?;

        let message_type = match &type_value {
            Value::String(s) => s.parse::<MessageType>()?,
            other => return Err(EnvelopeError::UnknownType(other.to_string())),
        };

        let timestamp = match &timestamp_value {
            Value::String(s) => parse_timestamp(s)
                .ok_or_else(|| EnvelopeError::InvalidTimestamp(s.clone()))?,
            other => return Err(EnvelopeError::InvalidTimestamp(other.to_string())),
        };

        if !data.is_object() {
            return Err(EnvelopeError::InvalidData(
                "'data' must be a JSON object".to_string(),
            ));
        }

        let failure_info = match object.remove("failure_info") {
            None | Some(Value::Null) => None,
            Some(info) => Some(
                serde_json::from_value(info)
                    .map_err(|e| EnvelopeError::InvalidData(format!("failure_info: {e}")))?,
            ),
        };

        Ok(Self {
            message_type,
            timestamp,
            data,
            failure_info,
        })
    }

    /// Deserializes `data` into its variant and validates it
    pub fn into_message(self) -> Result<DecodedMessage, EnvelopeError> {
        let message = TriageMessage::from_data(self.message_type, self.data)?;
        message.validate()?;
        Ok(DecodedMessage {
            message_type: self.message_type,
            timestamp: self.timestamp,
            message,
            failure_info: self.failure_info,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        write_envelope(
            self.message_type,
            self.timestamp,
            self.data.clone(),
            self.failure_info.as_ref(),
        )
    }
}

/// Encodes `message` stamped with the current time
pub fn encode(message: &TriageMessage) -> Result<Vec<u8>, EnvelopeError> {
    encode_at(message, Utc::now(), None)
}

pub fn encode_at(
    message: &TriageMessage,
    timestamp: DateTime<Utc>,
    failure_info: Option<&FailureInfo>,
) -> Result<Vec<u8>, EnvelopeError> {
    write_envelope(message.message_type(), timestamp, message.to_data()?, failure_info)
}

fn write_envelope(
    message_type: MessageType,
    timestamp: DateTime<Utc>,
    data: Value,
    failure_info: Option<&FailureInfo>,
) -> Result<Vec<u8>, EnvelopeError> {
    let mut object = Map::new();
    object.insert("type".to_string(), Value::String(message_type.as_str().to_string()));
    object.insert("timestamp".to_string(), Value::String(timestamp.to_rfc3339()));
    object.insert("data".to_string(), data);
    if let Some(info) = failure_info {
        let info = serde_json::to_value(info).map_err(|e| EnvelopeError::InvalidData(e.to_string()))?;
        object.insert("failure_info".to_string(), info);
    }
    serde_json::to_vec(&Value::Object(object)).map_err(|e| EnvelopeError::InvalidData(e.to_string()))
}

/// Parses, type-checks and validates a wire message
pub fn decode(bytes: &[u8]) -> Result<DecodedMessage, EnvelopeError> {
    RawEnvelope::parse(bytes)?.into_message()
}

/// Reads only the type tag; `None` when absent or unknown
pub fn peek_message_type(bytes: &[u8]) -> Option<MessageType> {
    #[derive(Deserialize)]
    struct TypeOnly {
        #[serde(rename = "type")]
        message_type: String,
    }
    let tag: TypeOnly = serde_json::from_slice(bytes).ok()?;
    tag.message_type.parse().ok()
}

/// RFC 3339, or a naive ISO-8601 timestamp taken as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

mod flexible_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }
}
