// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Supervisor
//!
//! This module keeps a consumer alive indefinitely across broker and network
//! failures. One supervisor owns one connection/channel pair for the lifetime
//! of a connect-consume cycle; on any failure the pair is discarded, the
//! supervisor sleeps for an exponentially growing delay and starts a fresh
//! cycle. An optional attempt budget turns endless failure into a loud,
//! non-zero process exit instead of a silent hang.
//!
//! Within one cycle the supervisor walks `Connecting → TopologySetup →
//! Consuming`; the consuming loop is sequential, resolving one delivery at a
//! time (`basic_qos(1)`). An operator-requested shutdown flips the watch
//! channel, which closes the connection gracefully and ends the run with
//! `Ok(())`.

use crate::{
    backoff::RetryPolicy,
    channel::new_amqp_channel,
    config::ConsumerConfig,
    dispatcher::{ChannelAcknowledger, RabbitMQDispatcher},
    errors::AmqpError,
    topology::ConsumerTopology,
};
use futures_util::StreamExt;
use lapin::{
    options::{BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Lifecycle states of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No broker connection is held
    Disconnected,
    /// Opening a connection and channel
    Connecting,
    /// Installing the exchange/queue/dead-letter topology
    TopologySetup,
    /// Blocking receive loop, dispatching deliveries
    Consuming,
    /// Clean terminal exit after an operator-requested shutdown
    Stopped,
}

/// Drives one consumer instance across reconnects.
pub struct ConsumerSupervisor {
    config: ConsumerConfig,
    topology: ConsumerTopology,
    dispatcher: RabbitMQDispatcher,
}

impl ConsumerSupervisor {
    /// Creates a supervisor for the given configuration and dispatcher.
    pub fn new(config: ConsumerConfig, dispatcher: RabbitMQDispatcher) -> ConsumerSupervisor {
        let topology = ConsumerTopology::new(&config.exchange, &config.queue);
        ConsumerSupervisor {
            config,
            topology,
            dispatcher,
        }
    }

    /// Creates the shutdown signal pair for [`ConsumerSupervisor::run`].
    ///
    /// The hosting binary keeps the sender and flips it to `true` from its
    /// interrupt handler (for example `tokio::signal::ctrl_c`).
    pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    /// Runs the consumer until shutdown or retry-budget exhaustion.
    ///
    /// Any failure after connecting begins (connection refused, stream lost,
    /// broker-initiated close, or an unexpected error during setup) tears the
    /// cycle down and retries after the computed backoff delay.
    ///
    /// # Returns
    /// Ok(()) on operator-requested shutdown, or
    /// [`AmqpError::MaxRetriesExceeded`] when a positive attempt budget is
    /// configured and exhausted; the hosting binary should exit non-zero on
    /// the latter.
    ///
    /// # Example
    /// ```no_run
    /// use amqp_consumer::{
    ///     config::ConsumerConfig, dispatcher::RabbitMQDispatcher, supervisor::ConsumerSupervisor,
    /// };
    /// # use amqp_consumer::{envelope::Envelope, handler::{ConsumerHandler, HandlerError}};
    /// # use std::sync::Arc;
    /// # struct Noop;
    /// # #[async_trait::async_trait]
    /// # impl ConsumerHandler for Noop {
    /// #     async fn handle(
    /// #         &self,
    /// #         _: &opentelemetry::Context,
    /// #         _: &Envelope,
    /// #     ) -> Result<(), HandlerError> {
    /// #         Ok(())
    /// #     }
    /// # }
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), amqp_consumer::errors::AmqpError> {
    /// let config = ConsumerConfig::from_env();
    /// let dispatcher = RabbitMQDispatcher::new(Arc::new(Noop), config.unknown_events);
    /// let supervisor = ConsumerSupervisor::new(config, dispatcher);
    ///
    /// let (tx, rx) = ConsumerSupervisor::shutdown_channel();
    /// tokio::spawn(async move {
    ///     let _ = tokio::signal::ctrl_c().await;
    ///     let _ = tx.send(true);
    /// });
    ///
    /// supervisor.run(rx).await
    /// # }
    /// ```
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), AmqpError> {
        let mut policy = RetryPolicy::new(&self.config.retry);

        loop {
            if *shutdown.borrow() {
                debug!(state = ?SupervisorState::Stopped, "shutdown requested before connecting");
                return Ok(());
            }

            match self.consume_cycle(&mut policy, &mut shutdown).await {
                Ok(()) => {
                    info!("consumer stopped");
                    return Ok(());
                }
                Err(err) => {
                    warn!(error = err.to_string(), "broker connection lost");
                    debug!(state = ?SupervisorState::Disconnected, "tearing down connection");

                    let Some(delay) = policy.next_delay() else {
                        error!(
                            max_attempts = self.config.retry.max_attempts,
                            "max reconnection attempts reached, giving up"
                        );
                        return Err(AmqpError::MaxRetriesExceeded(self.config.retry.max_attempts));
                    };

                    warn!(
                        attempt = policy.attempt(),
                        delay_secs = delay.as_secs(),
                        "reconnecting after backoff delay"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {
                            debug!(state = ?SupervisorState::Stopped, "shutdown requested during backoff");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// One `Connecting → TopologySetup → Consuming` cycle.
    ///
    /// Returns Ok(()) only on graceful shutdown; any other exit is an error
    /// the caller retries.
    async fn consume_cycle(
        &self,
        policy: &mut RetryPolicy,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), AmqpError> {
        debug!(state = ?SupervisorState::Connecting, "opening broker connection");
        let (conn, channel) = new_amqp_channel(&self.config).await?;

        if policy.attempt() > 0 {
            info!(
                attempts = policy.attempt(),
                "broker connection re-established"
            );
        }
        policy.record_success();

        // One unresolved delivery at a time.
        if let Err(err) = channel.basic_qos(1, BasicQosOptions::default()).await {
            error!(error = err.to_string(), "failure to configure qos");
            return Err(AmqpError::QoSDeclarationError(err.to_string()));
        }

        debug!(state = ?SupervisorState::TopologySetup, "installing topology");
        self.topology.install(&channel).await?;

        let consumer_tag = format!("{}-consumer", self.topology.queue());
        let mut consumer = match channel
            .basic_consume(
                self.topology.queue(),
                &consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                return Err(AmqpError::BindingConsumerError(consumer_tag));
            }
            Ok(c) => c,
        };

        let acker = ChannelAcknowledger::new(channel.clone());
        debug!(state = ?SupervisorState::Consuming, "waiting for deliveries");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    // A close failure must never mask the shutdown intent.
                    if let Err(err) = conn.close(200, "consumer shutdown").await {
                        warn!(error = err.to_string(), "failure whiling closing connection");
                    }
                    debug!(state = ?SupervisorState::Stopped, "connection closed");
                    return Ok(());
                }
                next = consumer.next() => match next {
                    Some(Ok(delivery)) => {
                        self.dispatcher
                            .dispatch(
                                &acker,
                                delivery.delivery_tag,
                                &delivery.data,
                                &delivery.properties,
                            )
                            .await?;
                    }
                    Some(Err(err)) => {
                        error!(error = err.to_string(), "errors consume msg");
                        return Err(AmqpError::ConsumerError(err.to_string()));
                    }
                    None => {
                        warn!("consumer stream closed by the broker");
                        return Err(AmqpError::ConnectionError);
                    }
                }
            }
        }
    }
}
