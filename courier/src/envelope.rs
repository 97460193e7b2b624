//! Wire envelope exchanged with backend queues.
//!
//! Every message a backend queue carries is a JSON object with exactly two
//! fields: `id`, a freshly generated time-ordered identifier, and `data`, the
//! job payload serialized to a JSON *string*. The double encoding keeps the
//! payload's own structure opaque to the transport.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::EnvelopeError;

/// Identifier carried by an envelope; becomes a job record's backend id.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvelopeId(String);

impl EnvelopeId {
    /// Generate a new identifier from a UUID v7 in simple (hex) form.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EnvelopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EnvelopeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for EnvelopeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A payload wrapped for delivery, with the identifier it was sent under.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Identifier generated at wrap time.
    pub id: EnvelopeId,
    /// The original payload, already decoded.
    pub data: Value,
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    id: String,
    data: String,
}

impl Envelope {
    /// Wrap a payload under a freshly generated identifier.
    pub fn wrap(payload: Value) -> Self {
        Self {
            id: EnvelopeId::generate(),
            data: payload,
        }
    }

    /// Serialize to the wire format understood by every backend.
    pub fn to_wire(&self) -> Result<String, EnvelopeError> {
        let inner = serde_json::to_string(&self.data)
            .map_err(|e| EnvelopeError::Malformed(format!("payload: {e}")))?;
        serde_json::to_string(&WireEnvelope {
            id: self.id.as_str().to_string(),
            data: inner,
        })
        .map_err(|e| EnvelopeError::Malformed(format!("envelope: {e}")))
    }

    /// Parse wire bytes back into an envelope.
    ///
    /// Fails when the outer object is not `{id, data}` with string fields,
    /// or when `data` does not hold well-formed JSON.
    pub fn from_wire(wire: &str) -> Result<Self, EnvelopeError> {
        let outer: WireEnvelope = serde_json::from_str(wire)
            .map_err(|e| EnvelopeError::Malformed(format!("envelope: {e}")))?;
        let data: Value = serde_json::from_str(&outer.data)
            .map_err(|e| EnvelopeError::Malformed(format!("payload: {e}")))?;
        Ok(Self {
            id: EnvelopeId(outer.id),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wrap_generates_distinct_ids() {
        let a = Envelope::wrap(json!({"n": 1}));
        let b = Envelope::wrap(json!({"n": 1}));
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.as_str().len(), 32);
    }

    #[test]
    fn test_from_wire_inverts_wrap() {
        let payloads = [
            json!({"to": "a@example.com"}),
            json!([1, 2, 3]),
            json!("plain string"),
            json!(null),
            json!({"nested": {"list": [true, false], "n": 1.5}}),
        ];

        for payload in payloads {
            let envelope = Envelope::wrap(payload.clone());
            let wire = envelope.to_wire().unwrap();
            let decoded = Envelope::from_wire(&wire).unwrap();
            assert_eq!(decoded.data, payload);
            assert_eq!(decoded.id, envelope.id);
        }
    }

    #[test]
    fn test_data_is_double_encoded() {
        let envelope = Envelope::wrap(json!({"to": "a@example.com"}));
        let wire: Value = serde_json::from_str(&envelope.to_wire().unwrap()).unwrap();

        let obj = wire.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert!(obj["id"].is_string());
        assert_eq!(obj["data"], json!(r#"{"to":"a@example.com"}"#));
    }

    #[test]
    fn test_from_wire_rejects_malformed_outer() {
        let err = Envelope::from_wire("not json").unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed(_)));

        let err = Envelope::from_wire(r#"{"id": "abc"}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed(_)));

        let err = Envelope::from_wire(r#"{"id": "abc", "data": {"x": 1}}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed(_)));
    }

    #[test]
    fn test_from_wire_rejects_malformed_inner() {
        let err = Envelope::from_wire(r#"{"id": "abc", "data": "{broken"}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed(msg) if msg.starts_with("payload")));
    }
}
