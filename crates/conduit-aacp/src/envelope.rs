//! AACP envelope: canonical encode/decode and the six normative invariants
//! (uniqueness, stability, ordering, acknowledgment, integrity, idempotency).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `REQUEST`/`RESPONSE` pair with a stable `requestId`, or a one-shot
/// `EVENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Initiates a logical request; pairs with a `RESPONSE` via `requestId`.
    Request,
    /// Concludes a `REQUEST`; shares its `requestId`.
    Response,
    /// Fire-and-forget; no `requestId` pairing.
    Event,
}

/// Routing variant. Only `Direct` and `Reply` are serviced by this core;
/// the others decode successfully but the session manager and
/// coordinator never produce or route them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    /// Point-to-point, the only variant this core routes.
    #[default]
    Direct,
    /// A response addressed back at a request's source.
    Reply,
    /// Unserviced: fan-out to every registered agent.
    Broadcast,
    /// Unserviced: fan-out to an explicit agent subset.
    Multicast,
    /// Unserviced: routed through an external coordinator process.
    Coordinator,
}

/// Optional metadata carried alongside a payload. Every field is
/// independently omittable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    /// Process-level id tying this envelope to a logical operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Id of the envelope that caused this one to be sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    /// Time-to-live in milliseconds from `timestamp`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    /// Relative delivery priority; interpretation is left to the coordinator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Opaque caller-propagated context (e.g. feature flags, tenant id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub propagated_context: Option<Value>,
    /// Opaque distributed-tracing context (e.g. a W3C traceparent).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracing_context: Option<Value>,
    /// Opaque authentication/authorization context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_context: Option<Value>,
    /// Opaque signature over the envelope, for transports that verify
    /// integrity end-to-end.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<Value>,
}

/// An immutable AACP envelope. Constructed once and never mutated in
/// place — every field is set at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Unique per transmission attempt, time-ordered (invariant: uniqueness).
    pub message_id: String,
    /// Stable across retries of one logical request (invariant: stability).
    /// Present for `REQUEST`/`RESPONSE`, absent for `EVENT`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Sending agent.
    pub source_agent_id: String,
    /// Receiving agent.
    pub target_agent_id: String,
    /// Monotonically increasing per (source,target) pair (invariant:
    /// ordering).
    pub seq: u64,
    /// Highest cumulative contiguous seq the sender has observed from the
    /// peer (invariant: acknowledgment).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
    /// `REQUEST`, `RESPONSE`, or `EVENT`.
    pub message_type: MessageType,
    /// Routing variant. Always `Direct` or `Reply` when minted by this
    /// core's session manager.
    #[serde(default)]
    pub destination: Destination,
    /// ISO-8601 timestamp with millisecond precision.
    pub timestamp: String,
    /// Opaque payload; never reflected or interpreted by the transport
    /// layer.
    pub payload: Value,
    /// Optional metadata, flattened into the envelope's top level on the
    /// wire.
    #[serde(flatten)]
    pub metadata: EnvelopeMetadata,
}

/// Reasons [`decode`] rejects an envelope. Becomes `INVALID_ARGUMENT` at
/// protocol boundaries.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    /// The input was not valid JSON, or not a JSON object.
    #[error("envelope is not a valid JSON object: {0}")]
    Malformed(String),
    /// A required field was missing or had the wrong type.
    #[error("envelope field {0:?} is missing or has the wrong type")]
    InvalidField(&'static str),
}

/// Canonically encode an envelope to a JSON text line. Field order matches
/// the struct's declaration order; absent optional fields are omitted
/// entirely (never emitted as `null`). Does not mutate `envelope`.
#[must_use]
pub fn encode(envelope: &Envelope) -> String {
    serde_json::to_string(envelope).expect("Envelope always serializes")
}

/// Decode and structurally validate a single envelope line. Required
/// fields (`messageId`, `sourceAgentId`, `targetAgentId`, `seq`,
/// `messageType`, `timestamp`, `payload`) must be present with the correct
/// type; anything else raises [`DecodeError`].
pub fn decode(line: &str) -> Result<Envelope, DecodeError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(DecodeError::Malformed("top-level value is not an object".to_string()));
    }
    for field in ["messageId", "sourceAgentId", "targetAgentId", "seq", "messageType", "timestamp", "payload"] {
        if value.get(field).is_none() {
            return Err(DecodeError::InvalidField(match field {
                "messageId" => "messageId",
                "sourceAgentId" => "sourceAgentId",
                "targetAgentId" => "targetAgentId",
                "seq" => "seq",
                "messageType" => "messageType",
                "timestamp" => "timestamp",
                _ => "payload",
            }));
        }
    }
    serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Envelope {
        Envelope {
            message_id: "msg-1".to_string(),
            request_id: Some("req-1".to_string()),
            source_agent_id: "a1".to_string(),
            target_agent_id: "a2".to_string(),
            seq: 1,
            ack: None,
            message_type: MessageType::Request,
            destination: Destination::Direct,
            timestamp: "2026-01-01T00:00:00.000Z".to_string(),
            payload: serde_json::json!({ "hello": "world" }),
            metadata: EnvelopeMetadata::default(),
        }
    }

    #[test]
    fn absent_optional_fields_are_omitted_not_null() {
        let line = encode(&sample());
        let value: Value = serde_json::from_str(&line).unwrap();
        assert!(value.get("ack").is_none());
        assert!(value.get("correlationId").is_none());
    }

    #[test]
    fn round_trips_through_decode() {
        let original = sample();
        let line = encode(&original);
        let decoded = decode(&line).unwrap();
        assert_eq!(decoded.message_id, original.message_id);
        assert_eq!(decoded.request_id, original.request_id);
        assert_eq!(decoded.seq, original.seq);
    }

    #[test]
    fn decode_rejects_missing_required_field() {
        let err = decode(r#"{"messageId":"m1"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField(_)));
    }

    #[test]
    fn decode_rejects_non_object_input() {
        let err = decode("[1,2,3]").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn encode_does_not_mutate_input() {
        let original = sample();
        let before = original.message_id.clone();
        let _ = encode(&original);
        assert_eq!(original.message_id, before);
    }
}
