// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Event Envelope
//!
//! This module provides the parsed representation of one published domain
//! event. Publishers emit UTF-8 JSON objects carrying an `event_type`
//! discriminator plus event-specific payload fields; the consumer keeps the
//! payload untyped and hands it to the handler layer, which owns the schema
//! of each event kind.

use crate::{errors::AmqpError, handler::HandlerError};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::error;

/// One published domain event, parsed from the delivery body.
///
/// The envelope has no identity beyond its content and is never persisted by
/// the consumer; persistence is the handler's responsibility.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Envelope {
    /// Event discriminator used for handler routing, if present
    pub event_type: Option<String>,
    /// Remaining payload fields, kept untyped
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Envelope {
    /// Parses a delivery body into an envelope.
    ///
    /// The body must be a JSON object; anything else (invalid JSON, a JSON
    /// scalar or array) is a malformed message and yields
    /// [`AmqpError::ParsePayloadError`].
    pub fn parse(body: &[u8]) -> Result<Envelope, AmqpError> {
        match serde_json::from_slice::<Envelope>(body) {
            Ok(envelope) => Ok(envelope),
            Err(err) => {
                error!(error = err.to_string(), "failure to parse event payload");
                Err(AmqpError::ParsePayloadError)
            }
        }
    }

    /// The `event_type` discriminator, if the envelope carries one.
    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    /// A payload field by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// A required unsigned integer field.
    ///
    /// A missing or mistyped field is a schema defect of the event, reported
    /// as [`HandlerError::Schema`] so the dispatcher acknowledges instead of
    /// dead-lettering.
    pub fn require_u64(&self, key: &str) -> Result<u64, HandlerError> {
        self.fields
            .get(key)
            .and_then(Value::as_u64)
            .ok_or_else(|| HandlerError::Schema(format!("missing required field `{key}`")))
    }

    /// A required string field.
    pub fn require_str(&self, key: &str) -> Result<&str, HandlerError> {
        self.fields
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::Schema(format!("missing required field `{key}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_object_with_event_type() {
        let envelope =
            Envelope::parse(br#"{"event_type":"ticket.created","ticket_id":99}"#).unwrap();

        assert_eq!(envelope.event_type(), Some("ticket.created"));
        assert_eq!(envelope.get("ticket_id"), Some(&Value::from(99)));
    }

    #[test]
    fn parses_object_without_event_type() {
        let envelope = Envelope::parse(br#"{"ticket_id":1}"#).unwrap();

        assert_eq!(envelope.event_type(), None);
    }

    #[test]
    fn rejects_invalid_json() {
        assert_eq!(Envelope::parse(b"not json"), Err(AmqpError::ParsePayloadError));
    }

    #[test]
    fn rejects_non_object_bodies() {
        assert_eq!(Envelope::parse(b"42"), Err(AmqpError::ParsePayloadError));
        assert_eq!(Envelope::parse(b"[1,2]"), Err(AmqpError::ParsePayloadError));
    }

    #[test]
    fn require_u64_reports_schema_error_for_missing_field() {
        let envelope = Envelope::parse(br#"{"event_type":"ticket.response_added"}"#).unwrap();

        let err = envelope.require_u64("ticket_id").unwrap_err();
        assert_eq!(
            err,
            HandlerError::Schema("missing required field `ticket_id`".to_owned())
        );
    }

    #[test]
    fn require_str_reports_schema_error_for_mistyped_field() {
        let envelope = Envelope::parse(br#"{"user_id":7}"#).unwrap();

        assert!(matches!(
            envelope.require_str("user_id"),
            Err(HandlerError::Schema(_))
        ));
    }
}
