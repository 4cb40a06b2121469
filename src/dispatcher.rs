// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Dispatcher
//!
//! This module turns one delivered message into exactly one acknowledge or
//! one reject, never both, never neither. Each delivery is parsed into an
//! event envelope, routed to the handler registered for its `event_type`
//! (unrecognized types go to the default handler or are dropped, depending on
//! the configured policy), and concluded from the handler's typed result:
//!
//! - handler success → ack
//! - schema validation error → error log, then ack (a deterministic domain
//!   defect is never retried)
//! - any other handler failure or a malformed body → nack without requeue,
//!   which the broker dead-letters
//!
//! Acknowledgments go through the [`Acknowledger`] seam so the decision logic
//! can be exercised without a broker.

use crate::{
    config::UnknownEventPolicy,
    envelope::Envelope,
    errors::AmqpError,
    handler::{ConsumerHandler, HandlerError},
    otel,
};
use async_trait::async_trait;
use lapin::{
    options::{BasicAckOptions, BasicNackOptions},
    protocol::basic::AMQPProperties,
    Channel,
};
use opentelemetry::{
    global,
    trace::{Span, Status},
};
use std::{borrow::Cow, collections::HashMap, sync::Arc};
use tracing::{debug, error};

/// Terminal state of one dispatched delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The delivery was acknowledged
    Acked,
    /// The delivery was rejected without requeue and will be dead-lettered
    Nacked,
}

/// Concludes deliveries against the broker.
///
/// The dispatcher only ever calls one of these methods once per delivery,
/// referencing the delivery's exact tag.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Acknowledges the delivery with the given tag.
    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    /// Rejects the delivery with the given tag.
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;
}

/// [`Acknowledger`] backed by a live channel.
pub struct ChannelAcknowledger {
    channel: Arc<Channel>,
}

impl ChannelAcknowledger {
    /// Creates an acknowledger over the given channel.
    pub fn new(channel: Arc<Channel>) -> ChannelAcknowledger {
        ChannelAcknowledger { channel }
    }
}

#[async_trait]
impl Acknowledger for ChannelAcknowledger {
    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error whiling ack msg");
                Err(AmqpError::AckMessageError)
            }
            _ => Ok(()),
        }
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error whiling nack msg");
                Err(AmqpError::NackMessageError)
            }
            _ => Ok(()),
        }
    }
}

/// Routes deliveries to handlers by their `event_type` discriminator.
///
/// Handlers are registered per event type; envelopes carrying no type or an
/// unrecognized one are routed by the configured [`UnknownEventPolicy`]. The
/// routing table is the per-service customization point, so the same
/// dispatcher serves every consumer instance of the backend.
pub struct RabbitMQDispatcher {
    handlers: HashMap<String, Arc<dyn ConsumerHandler>>,
    default_handler: Arc<dyn ConsumerHandler>,
    unknown_events: UnknownEventPolicy,
}

impl RabbitMQDispatcher {
    /// Creates a dispatcher with the given default handler.
    ///
    /// The default handler is the legacy direct-creation path; it receives
    /// every envelope without a recognized `event_type` when the policy is
    /// [`UnknownEventPolicy::Fallback`].
    pub fn new(
        default_handler: Arc<dyn ConsumerHandler>,
        unknown_events: UnknownEventPolicy,
    ) -> RabbitMQDispatcher {
        RabbitMQDispatcher {
            handlers: HashMap::default(),
            default_handler,
            unknown_events,
        }
    }

    /// Registers a handler for a specific event type.
    ///
    /// # Parameters
    /// * `event_type` - The `event_type` discriminator to route
    /// * `handler` - Handler to process events of that type
    ///
    /// # Returns
    /// Self for method chaining
    pub fn register(mut self, event_type: &str, handler: Arc<dyn ConsumerHandler>) -> Self {
        self.handlers.insert(event_type.to_owned(), handler);
        self
    }

    /// Dispatches one delivery and concludes it.
    ///
    /// The postcondition holds on every path: exactly one of ack/nack has
    /// been called with `delivery_tag`, and the handler was invoked at most
    /// once.
    ///
    /// # Returns
    /// The terminal state of the delivery, or an AmqpError when the
    /// acknowledgment itself failed (a connection-class failure the
    /// supervisor recovers from).
    pub async fn dispatch(
        &self,
        acker: &dyn Acknowledger,
        delivery_tag: u64,
        body: &[u8],
        props: &AMQPProperties,
    ) -> Result<DispatchOutcome, AmqpError> {
        let envelope = match Envelope::parse(body) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(error = err.to_string(), "malformed message, sending to dlq");
                acker.nack(delivery_tag, false).await?;
                return Ok(DispatchOutcome::Nacked);
            }
        };

        let event_type = envelope.event_type().unwrap_or_default().to_owned();
        let tracer = global::tracer("amqp consumer");
        let (ctx, mut span) = otel::consumer_span(props, &tracer, &event_type);

        debug!("received: {}", event_type);

        let handler = match self.handlers.get(&event_type) {
            Some(handler) => handler,
            None => match self.unknown_events {
                UnknownEventPolicy::Fallback => &self.default_handler,
                UnknownEventPolicy::Ignore => {
                    debug!("removing message from queue - reason: unsupported event type");
                    span.set_status(Status::Ok);
                    acker.ack(delivery_tag).await?;
                    return Ok(DispatchOutcome::Acked);
                }
            },
        };

        match handler.handle(&ctx, &envelope).await {
            Ok(()) => {
                debug!("message successfully processed");
                span.set_status(Status::Ok);
                acker.ack(delivery_tag).await?;
                Ok(DispatchOutcome::Acked)
            }
            Err(err @ HandlerError::Schema(_)) => {
                error!(
                    error = err.to_string(),
                    "invalid event schema, removing message from queue"
                );
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("invalid event schema"),
                });
                acker.ack(delivery_tag).await?;
                Ok(DispatchOutcome::Acked)
            }
            Err(err) => {
                error!(error = err.to_string(), "failure to process message, sending to dlq");
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("failure to process message"),
                });
                acker.nack(delivery_tag, false).await?;
                Ok(DispatchOutcome::Nacked)
            }
        }
    }
}
