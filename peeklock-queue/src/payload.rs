//! Payload encoding shared by queue and topic channels.

use crate::error::{QueueError, QueueResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Structured job data.
pub type JobData = serde_json::Value;

/// A message body before it is handed to the broker.
///
/// Text and bytes pass through untouched. Structured values are encoded as
/// compact JSON with object keys in sorted order, so equal values always
/// produce equal bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// UTF-8 text, sent as is
    Text(String),
    /// Opaque bytes, sent as is
    Bytes(Vec<u8>),
    /// Structured value, sent as canonical JSON
    Json(serde_json::Value),
}

impl Payload {
    /// Build a structured payload from any serializable value.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> QueueResult<Self> {
        serde_json::to_value(value)
            .map(Payload::Json)
            .map_err(|e| QueueError::Serialization(e.to_string()))
    }

    /// Encode to the bytes stored in the broker message body.
    pub fn encode(&self) -> QueueResult<Vec<u8>> {
        match self {
            Payload::Text(text) => Ok(text.as_bytes().to_vec()),
            Payload::Bytes(bytes) => Ok(bytes.clone()),
            // A bare JSON string is raw text, not a quoted literal.
            Payload::Json(serde_json::Value::String(text)) => Ok(text.as_bytes().to_vec()),
            Payload::Json(value) => {
                serde_json::to_vec(value).map_err(|e| QueueError::Serialization(e.to_string()))
            }
        }
    }

    /// Consume and encode.
    pub fn into_bytes(self) -> QueueResult<Vec<u8>> {
        match self {
            Payload::Text(text) => Ok(text.into_bytes()),
            Payload::Bytes(bytes) => Ok(bytes),
            other => other.encode(),
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Bytes(bytes.to_vec())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

/// Decode a message body as JSON.
pub fn decode_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> QueueResult<T> {
    serde_json::from_slice(body).map_err(|e| QueueError::Deserialization(e.to_string()))
}

/// Envelope written by [`QueueChannel::push`](crate::queue::QueueChannel::push).
///
/// Field names follow the camelCase layout queue workers on the other side
/// of the broker already understand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    /// Unique id for this dispatch
    pub uuid: Uuid,

    /// Human readable job name
    pub display_name: String,

    /// Handler identifier
    pub job: String,

    /// Maximum attempts the consumer should allow
    pub max_tries: Option<u32>,

    /// Timeout in seconds the consumer should allow
    pub timeout: Option<u64>,

    /// Job data
    pub data: JobData,
}

impl JobEnvelope {
    /// Create an envelope for a job with its data.
    pub fn new(job: impl Into<String>, data: JobData) -> Self {
        let job = job.into();
        Self {
            uuid: Uuid::new_v4(),
            display_name: job.clone(),
            job,
            max_tries: None,
            timeout: None,
            data,
        }
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Set max attempts.
    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = Some(max_tries);
        self
    }

    /// Set timeout in seconds.
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    /// Encode as a structured payload.
    pub fn to_payload(&self) -> QueueResult<Payload> {
        Payload::json(self)
    }
}
