// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Collaborators
//!
//! This module defines the seams between the consumer bridge and the wire-level
//! client. The bridge never speaks the protocol itself: it acquires channels
//! from a `ConnectionFactory`, issues blocking calls against an `AmqpChannel`
//! and hands the channel a `BrokerConsumer` whose callbacks run on the
//! connection's network thread.
//!
//! The lapin-backed implementation lives in [`crate::connection`].

use crate::{delivery::Envelope, errors::AmqpError};
use lapin::BasicProperties;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

/// Cause of a connection or channel shutdown reported to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownSignal {
    pub reason: String,
    /// `true` when the application itself closed the channel or connection.
    pub initiated_by_application: bool,
}

impl ShutdownSignal {
    pub fn new(reason: &str, initiated_by_application: bool) -> ShutdownSignal {
        ShutdownSignal {
            reason: reason.to_owned(),
            initiated_by_application,
        }
    }
}

/// Produces channels for consumers.
#[cfg_attr(test, automock)]
pub trait ConnectionFactory: Send + Sync {
    /// Opens a new channel, switching it to transaction mode when requested.
    fn create_channel(&self, transactional: bool) -> Result<Arc<dyn AmqpChannel>, AmqpError>;
}

/// Blocking view over one AMQP channel.
///
/// Implementations may be driven by an async client underneath, but every call
/// here returns only once the broker answered.
#[cfg_attr(test, automock)]
pub trait AmqpChannel: Send + Sync {
    /// Channel number, used for diagnostics.
    fn id(&self) -> u16;

    /// Limits unacknowledged deliveries. Prefetch size is always zero.
    fn basic_qos(&self, prefetch_count: u16, global: bool) -> Result<(), AmqpError>;

    /// Checks that a queue exists without creating it.
    fn queue_declare_passive(&self, queue: &str) -> Result<(), AmqpError>;

    /// Starts consuming `queue`, routing broker events to `consumer`.
    ///
    /// # Returns
    /// The broker-assigned consumer tag
    fn basic_consume(
        &self,
        queue: &str,
        no_ack: bool,
        exclusive: bool,
        consumer: Arc<dyn BrokerConsumer>,
    ) -> Result<String, AmqpError>;

    fn basic_cancel(&self, consumer_tag: &str) -> Result<(), AmqpError>;

    fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), AmqpError>;

    fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;

    fn tx_commit(&self) -> Result<(), AmqpError>;

    fn tx_rollback(&self) -> Result<(), AmqpError>;

    /// Closes the channel. Failures are logged by the implementation, never raised.
    fn close(&self);
}

/// Consumer callback contract invoked by the client's network thread.
///
/// Implementations must return promptly: blocking here stalls the read loop
/// of the whole connection.
pub trait BrokerConsumer: Send + Sync {
    /// The broker confirmed a consume request.
    fn handle_consume_ok(&self, consumer_tag: &str);

    /// A message arrived for `consumer_tag`.
    fn handle_delivery(
        &self,
        consumer_tag: &str,
        envelope: Envelope,
        properties: BasicProperties,
        body: Vec<u8>,
    );

    /// The broker confirmed a cancel request issued by this client.
    fn handle_cancel_ok(&self, consumer_tag: &str);

    /// The broker cancelled the consumer on its own, e.g. the queue was deleted.
    fn handle_cancel(&self, consumer_tag: &str);

    /// The channel or its connection shut down.
    fn handle_shutdown_signal(&self, consumer_tag: &str, signal: ShutdownSignal);
}
