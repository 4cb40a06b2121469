// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module declares the dead-letter-capable topology the consumer relies
//! on: a durable fanout exchange for published domain events, the consumer's
//! durable queue, and a dead-letter exchange/queue pair that receives every
//! message the consumer rejects without requeue.
//!
//! Dead-letter names are deterministic functions of the main queue name
//! (`<queue>.dlx`, `<queue>.dlq`, routing key `<queue>.dead`). All
//! declarations are idempotent, so the topology is installed on every
//! connection attempt, including reconnects.

use crate::errors::AmqpError;
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongString, ShortString},
    Channel, ExchangeKind,
};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Constant for the queue argument used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the queue argument used to specify a dead letter routing key
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";

/// The consumer's broker topology, derived from the exchange and queue names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerTopology {
    exchange: String,
    queue: String,
}

impl ConsumerTopology {
    /// Creates a topology definition for the given exchange and queue.
    pub fn new(exchange: &str, queue: &str) -> ConsumerTopology {
        ConsumerTopology {
            exchange: exchange.to_owned(),
            queue: queue.to_owned(),
        }
    }

    /// Name of the main fanout exchange.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Name of the consumer's durable queue.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Name of the dead-letter exchange, derived from the queue name.
    pub fn dlx_name(&self) -> String {
        format!("{}.dlx", self.queue)
    }

    /// Name of the dead-letter queue, derived from the queue name.
    pub fn dlq_name(&self) -> String {
        format!("{}.dlq", self.queue)
    }

    /// Routing key binding the dead-letter queue to the dead-letter exchange.
    pub fn dead_routing_key(&self) -> String {
        format!("{}.dead", self.queue)
    }

    /// Arguments for the main queue declaration.
    ///
    /// These point the broker at the dead-letter exchange and routing key, so
    /// any message rejected without requeue is routed into the DLQ with its
    /// original body and headers intact.
    pub fn dead_letter_args(&self) -> BTreeMap<ShortString, AMQPValue> {
        let mut args = BTreeMap::new();
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from(self.dlx_name())),
        );
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            AMQPValue::LongString(LongString::from(self.dead_routing_key())),
        );
        args
    }

    /// The queue bindings this topology installs, in install order, as
    /// `(queue, exchange, routing_key)` tuples. The dead-letter binding comes
    /// first; the main queue is only declared once its dead-letter target is
    /// bound.
    pub fn bindings(&self) -> [(String, String, String); 2] {
        [
            (self.dlq_name(), self.dlx_name(), self.dead_routing_key()),
            (self.queue.clone(), self.exchange.clone(), String::new()),
        ]
    }

    /// Installs the topology to the RabbitMQ server.
    ///
    /// Declarations run in dependency order: the dead-letter exchange and
    /// queue are declared and bound before the main queue references them in
    /// its dead-letter arguments.
    ///
    /// # Returns
    /// Ok(()) on success or AmqpError on failure
    pub async fn install(&self, channel: &Channel) -> Result<(), AmqpError> {
        let [dead_letter_binding, main_binding] = self.bindings();

        self.declare_exchange(channel, &self.exchange, ExchangeKind::Fanout)
            .await?;
        self.declare_exchange(channel, &self.dlx_name(), ExchangeKind::Direct)
            .await?;

        let (dlq, dlx, dead_key) = &dead_letter_binding;
        self.declare_queue(channel, dlq, FieldTable::default())
            .await?;
        self.bind_queue(channel, dlq, dlx, dead_key).await?;

        let (queue, exchange, routing_key) = &main_binding;
        self.declare_queue(channel, queue, FieldTable::from(self.dead_letter_args()))
            .await?;
        self.bind_queue(channel, queue, exchange, routing_key)
            .await?;

        debug!("topology installed");

        Ok(())
    }

    async fn declare_exchange(
        &self,
        channel: &Channel,
        name: &str,
        kind: ExchangeKind,
    ) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", name);

        match channel
            .exchange_declare(
                name,
                kind,
                ExchangeDeclareOptions {
                    passive: false,
                    durable: true,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = name,
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(name.to_owned()))
            }
            _ => {
                debug!("exchange: {} was created", name);
                Ok(())
            }
        }
    }

    async fn declare_queue(
        &self,
        channel: &Channel,
        name: &str,
        args: FieldTable,
    ) -> Result<(), AmqpError> {
        debug!("creating queue: {}", name);

        match channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    passive: false,
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    nowait: false,
                },
                args,
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name = name, "error to declare the queue");
                Err(AmqpError::DeclareQueueError(name.to_owned()))
            }
            _ => {
                debug!("queue: {} was created", name);
                Ok(())
            }
        }
    }

    async fn bind_queue(
        &self,
        channel: &Channel,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            queue, exchange, routing_key
        );

        match channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    exchange.to_owned(),
                    queue.to_owned(),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_letter_names_derive_from_queue_name() {
        let topology = ConsumerTopology::new("tickets", "notification-events");

        assert_eq!(topology.dlx_name(), "notification-events.dlx");
        assert_eq!(topology.dlq_name(), "notification-events.dlq");
        assert_eq!(topology.dead_routing_key(), "notification-events.dead");
    }

    #[test]
    fn main_queue_args_point_at_dead_letter_topology() {
        let topology = ConsumerTopology::new("tickets", "events");
        let args = topology.dead_letter_args();

        assert_eq!(
            args.get(&ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE)),
            Some(&AMQPValue::LongString(LongString::from("events.dlx")))
        );
        assert_eq!(
            args.get(&ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY)),
            Some(&AMQPValue::LongString(LongString::from("events.dead")))
        );
    }

    #[test]
    fn bindings_install_the_dlq_to_dlx_pair_before_the_main_queue() {
        let topology = ConsumerTopology::new("tickets", "events");
        let [dead_letter_binding, main_binding] = topology.bindings();

        assert_eq!(
            dead_letter_binding,
            (
                "events.dlq".to_owned(),
                "events.dlx".to_owned(),
                "events.dead".to_owned()
            )
        );
        assert_eq!(
            main_binding,
            ("events".to_owned(), "tickets".to_owned(), String::new())
        );
    }
}
