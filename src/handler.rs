// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Handler Contract
//!
//! This module defines the seam between the consumer and the application
//! layer: a handler receives one parsed event envelope and reports its
//! outcome as a typed result. The dispatcher pattern-matches on that result
//! to pick the acknowledgment for the delivery, so control flow never relies
//! on downcasting error types.

use crate::envelope::Envelope;
use async_trait::async_trait;
use opentelemetry::Context;
use thiserror::Error;

/// Outcome of a handler invocation that did not succeed.
///
/// The two variants drive opposite acknowledgment decisions:
/// a [`HandlerError::Schema`] error is deterministic (redelivering the same
/// message would fail the same way), so the delivery is logged and
/// acknowledged; any [`HandlerError::Processing`] error is rejected without
/// requeue and lands in the dead-letter queue for inspection or replay.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The event is recognized but its payload misses required fields
    #[error("event failed schema validation: {0}")]
    Schema(String),

    /// Persistence or any other unexpected processing failure
    #[error("event processing failed: {0}")]
    Processing(String),
}

/// Application-side processor for consumed events.
///
/// Implementations are injected into the dispatcher, one per event type plus
/// a default. The consumer guarantees at-least-once delivery, so handlers are
/// responsible for processing redelivered messages idempotently (for example
/// by deduplicating on a response identifier).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    /// Processes one event envelope.
    ///
    /// # Parameters
    /// * `ctx` - Trace context extracted from the message headers
    /// * `envelope` - The parsed event envelope
    ///
    /// # Returns
    /// Ok(()) on success or a [`HandlerError`] describing the failure kind
    async fn handle(&self, ctx: &Context, envelope: &Envelope) -> Result<(), HandlerError>;
}
