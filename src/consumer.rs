// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Blocking RabbitMQ Consumer
//!
//! This module provides the consumer bridge a listener container drives from its
//! worker threads. Broker deliveries arrive on the connection's network thread
//! through a [`ConsumerCallback`] and land in an unbounded FIFO buffer; workers
//! pull them with blocking retrieval calls and report the outcome back through
//! the commit and rollback operations, which translate it into acknowledgments,
//! rejections and channel transaction calls.
//!
//! Backpressure is applied by the broker through the prefetch count, never by
//! the buffer: blocking the network thread would stall every consumer sharing
//! the connection.

use crate::{
    acknowledge::AcknowledgeMode,
    callback::{ConsumerCallback, Inbound},
    channel::{AmqpChannel, ConnectionFactory},
    config::ConsumerConfig,
    counter::ActiveObjectCounter,
    delivery::{Delivery, Message},
    errors::AmqpError,
    transaction::TransactionSynchronization,
};
use parking_lot::Mutex;
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Lifecycle of a consumer. A stopped consumer cannot be started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Created,
    Started,
    Stopping,
    Stopped,
}

/// Bridges broker push deliveries to pull-based, blocking consumption.
///
/// One instance owns one channel for its whole life. Several workers may share
/// it to pull messages, but commit and rollback calls for one processing cycle
/// must not be interleaved.
pub struct BlockingConsumer {
    connection_factory: Arc<dyn ConnectionFactory>,
    config: ConsumerConfig,
    transaction_synchronization: Option<Arc<dyn TransactionSynchronization>>,
    callback: Arc<ConsumerCallback>,
    buffer: flume::Receiver<Inbound>,
    channel: Mutex<Option<Arc<dyn AmqpChannel>>>,
    state: Mutex<ConsumerState>,
}

impl BlockingConsumer {
    /// Creates a new consumer.
    ///
    /// # Parameters
    /// * `connection_factory` - Source of the consumer's channel
    /// * `counter` - Counter the consumer registers with while it is active
    /// * `config` - Queues, acknowledge mode and channel settings
    ///
    /// # Returns
    /// A consumer in the `Created` state
    pub fn new(
        connection_factory: Arc<dyn ConnectionFactory>,
        counter: Arc<ActiveObjectCounter<Uuid>>,
        config: ConsumerConfig,
    ) -> BlockingConsumer {
        let (tx, rx) = flume::unbounded();
        let callback = Arc::new(ConsumerCallback::new(config.acknowledge_mode, tx, counter));

        BlockingConsumer {
            connection_factory,
            config,
            transaction_synchronization: None,
            callback,
            buffer: rx,
            channel: Mutex::new(None),
            state: Mutex::new(ConsumerState::Created),
        }
    }

    /// Joins an externally coordinated transaction: on commit, pending
    /// delivery tags of a transacted channel that is not locally transacted
    /// are registered with `synchronization` instead of being acknowledged.
    pub fn with_transaction_synchronization(
        mut self,
        synchronization: Arc<dyn TransactionSynchronization>,
    ) -> Self {
        self.transaction_synchronization = Some(synchronization);
        self
    }

    /// Opens the channel, applies QoS, checks the queues and starts consuming.
    ///
    /// QoS is applied before any consume request so the broker never falls
    /// back to its default batching.
    ///
    /// # Returns
    /// * `Err(AmqpError::FatalListenerStartup)` when a queue is missing or not accessible
    /// * `Err(AmqpError::ConsumerDeclarationError)` when a consume request fails
    pub fn start(&self) -> Result<(), AmqpError> {
        let mut state = self.state.lock();
        if *state != ConsumerState::Created {
            return Err(AmqpError::IllegalState(format!(
                "cannot start a consumer in state {:?}",
                *state
            )));
        }

        debug!(queues = ?self.config.queues, "starting consumer");
        let channel = self
            .connection_factory
            .create_channel(self.config.transactional)?;

        self.callback.clear_delivery_tags();
        self.callback.register();

        if let Err(err) = self.prepare(&channel) {
            error!(error = err.to_string(), "failure to prepare queues");
            self.callback.release();
            channel.close();
            return Err(AmqpError::FatalListenerStartup(err.to_string()));
        }

        if let Err(err) = self.consume(&channel) {
            error!(error = err.to_string(), "failure to create the consumer");
            self.callback.release();
            channel.close();
            return Err(err);
        }

        *self.channel.lock() = Some(channel);
        *state = ConsumerState::Started;
        debug!(consumer_tags = ?self.callback.consumer_tags(), "consumer started");

        Ok(())
    }

    fn prepare(&self, channel: &Arc<dyn AmqpChannel>) -> Result<(), AmqpError> {
        if !self.config.acknowledge_mode.is_auto_ack() {
            channel.basic_qos(self.config.prefetch_count, false)?;
        }

        for queue in &self.config.queues {
            channel.queue_declare_passive(queue)?;
        }

        Ok(())
    }

    fn consume(&self, channel: &Arc<dyn AmqpChannel>) -> Result<(), AmqpError> {
        for queue in &self.config.queues {
            let consumer_tag = channel
                .basic_consume(
                    queue,
                    self.config.acknowledge_mode.is_auto_ack(),
                    self.config.exclusive,
                    self.callback.clone(),
                )
                .map_err(|err| AmqpError::ConsumerDeclarationError(queue.clone(), err.to_string()))?;

            debug!(queue, consumer_tag, "consumer registered");
            self.callback.add_consumer_tag(&consumer_tag);
        }

        Ok(())
    }

    /// Cancels the consumer and closes its channel.
    ///
    /// Returns without waiting for the broker's cancel confirmation; the
    /// container waits for it on the active object counter. Safe to call
    /// more than once.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        self.callback.cancel();

        match *state {
            ConsumerState::Stopped => return,
            ConsumerState::Created => {
                *state = ConsumerState::Stopped;
                return;
            }
            _ => *state = ConsumerState::Stopping,
        }

        let channel = self.channel.lock().clone();
        if let Some(channel) = channel {
            if self.callback.shutdown_signal().is_none() {
                for consumer_tag in self.callback.consumer_tags() {
                    debug!(consumer_tag, "cancelling consumer");
                    if let Err(err) = channel.basic_cancel(&consumer_tag) {
                        warn!(consumer_tag, error = err.to_string(), "failure to cancel consumer");
                    }
                }
            } else if self.callback.release() {
                // the link is gone, no cancel confirmation will ever arrive
                debug!(consumer = %self.callback.id(), "consumer released after shutdown");
            }
            channel.close();
        }

        self.drain_buffer();
        self.callback.clear_delivery_tags();
        *state = ConsumerState::Stopped;
        debug!("consumer stopped");
    }

    /// Discards deliveries nobody will retrieve anymore, keeping a wakeup
    /// for workers still blocked in a retrieval call.
    fn drain_buffer(&self) {
        let mut wakeup = false;

        for inbound in self.buffer.drain() {
            match inbound {
                Inbound::Delivery(delivery) if self.config.acknowledge_mode.is_auto_ack() => {
                    warn!(
                        consumer_tag = delivery.consumer_tag(),
                        delivery_tag = delivery.envelope().delivery_tag,
                        "discarding auto-acked delivery buffered at stop"
                    );
                }
                Inbound::Delivery(delivery) => {
                    debug!(
                        consumer_tag = delivery.consumer_tag(),
                        delivery_tag = delivery.envelope().delivery_tag,
                        "dropping buffered delivery at stop, broker will redeliver"
                    );
                }
                Inbound::Wakeup => wakeup = true,
            }
        }

        if wakeup {
            self.callback.wakeup();
        }
    }

    /// Blocks until a message is available.
    ///
    /// # Returns
    /// * `Err(AmqpError::ShutdownDetected)` once the link to the broker is gone
    /// * `Err(AmqpError::ConsumerCancelled)` once the consumer was cancelled
    pub fn next_message(&self) -> Result<Message, AmqpError> {
        self.check_shutdown()?;

        loop {
            let inbound = self
                .buffer
                .recv()
                .map_err(|_| AmqpError::InternalError)?;

            if let Some(msg) = self.handle(inbound)? {
                return Ok(msg);
            }
        }
    }

    /// Waits up to `timeout` for a message.
    ///
    /// Fails immediately when a shutdown was already received.
    ///
    /// # Returns
    /// `Ok(None)` when the timeout elapsed without a delivery
    pub fn next_message_timeout(&self, timeout: Duration) -> Result<Option<Message>, AmqpError> {
        self.check_shutdown()?;

        let deadline = Instant::now() + timeout;
        loop {
            let inbound = match self.buffer.recv_deadline(deadline) {
                Ok(inbound) => inbound,
                Err(flume::RecvTimeoutError::Timeout) => return Ok(None),
                Err(flume::RecvTimeoutError::Disconnected) => return Err(AmqpError::InternalError),
            };

            if let Some(msg) = self.handle(inbound)? {
                return Ok(Some(msg));
            }
        }
    }

    fn check_shutdown(&self) -> Result<(), AmqpError> {
        if let Some(signal) = self.callback.shutdown_signal() {
            return Err(AmqpError::ShutdownDetected(signal.reason.clone()));
        }
        if self.callback.is_cancelled() {
            return Err(AmqpError::ConsumerCancelled(self.consumer_tags().join(",")));
        }
        Ok(())
    }

    fn handle(&self, inbound: Inbound) -> Result<Option<Message>, AmqpError> {
        match inbound {
            Inbound::Delivery(delivery) => {
                self.check_shutdown()?;
                Ok(Some(self.convert(delivery)))
            }
            Inbound::Wakeup => {
                let terminal = self.check_shutdown().and_then(|_| {
                    if self.callback.is_cancel_received() {
                        Err(AmqpError::ConsumerCancelled(self.consumer_tags().join(",")))
                    } else {
                        Ok(())
                    }
                });
                if terminal.is_err() {
                    // Pass the wakeup on to the next blocked worker.
                    self.callback.wakeup();
                }
                terminal.map(|_| None)
            }
        }
    }

    fn convert(&self, delivery: Delivery) -> Message {
        self.callback
            .record_delivery_tag(delivery.envelope().delivery_tag);
        Message::from(delivery)
    }

    /// Acknowledges the deliveries received since the last boundary once
    /// processing succeeded, and commits a locally transacted channel.
    ///
    /// The tag log is cleared whether or not the channel calls succeed.
    ///
    /// # Parameters
    /// * `locally_transacted` - Whether this consumer drives the channel transaction itself
    ///
    /// # Returns
    /// `Ok(false)` when there was nothing to commit
    pub fn commit_if_necessary(&self, locally_transacted: bool) -> Result<bool, AmqpError> {
        let delivery_tags = self.callback.take_delivery_tags();
        let Some(last) = delivery_tags.last().copied() else {
            return Ok(false);
        };

        let channel = self.bound_channel()?;
        let ack_required = self.config.acknowledge_mode.requires_ack();

        if ack_required && self.config.transactional && !locally_transacted {
            let Some(synchronization) = &self.transaction_synchronization else {
                error!("transacted channel without transaction synchronization");
                return Err(AmqpError::NoTransactionSynchronization);
            };
            for tag in &delivery_tags {
                synchronization.register_delivery_tag(channel.clone(), *tag)?;
            }
            debug!(tags = delivery_tags.len(), "delivery tags registered with transaction");
        } else if ack_required {
            channel.basic_ack(last, true)?;
            debug!(delivery_tag = last, "deliveries acknowledged");
        }

        if locally_transacted {
            channel.tx_commit()?;
        }

        Ok(true)
    }

    /// Returns the deliveries of a failed processing cycle to the broker.
    ///
    /// Each delivery is rejected individually, with requeue unless `cause`
    /// asks for dead-lettering or requeueing is disabled. A transacted channel
    /// is rolled back first and the rejections committed afterwards.
    ///
    /// # Parameters
    /// * `message` - The message whose processing failed, if any
    /// * `cause` - The processing failure
    ///
    /// # Returns
    /// `Err(cause)` if the rollback itself failed; the rollback failure is only logged
    pub fn rollback_on_exception_if_necessary(
        &self,
        message: Option<&Message>,
        cause: &AmqpError,
    ) -> Result<(), AmqpError> {
        let delivery_tags = self.callback.take_delivery_tags();
        let ack_required = self.config.acknowledge_mode.requires_ack();
        let requeue = self.config.default_requeue_rejected && !cause.is_reject_and_dont_requeue();

        debug!(
            delivery_tag = message.map(|m| m.delivery_tag()),
            error = cause.to_string(),
            requeue,
            "rolling back processing cycle"
        );

        let Some(channel) = self.channel.lock().clone() else {
            return Ok(());
        };

        let rollback = || -> Result<(), AmqpError> {
            if self.config.transactional {
                channel.tx_rollback()?;
            }
            if ack_required {
                for tag in &delivery_tags {
                    channel.basic_reject(*tag, requeue)?;
                }
            }
            if self.config.transactional {
                channel.tx_commit()?;
            }
            Ok(())
        };

        if let Err(err) = rollback() {
            error!(
                error = err.to_string(),
                cause = cause.to_string(),
                "application exception overridden by rollback error"
            );
            return Err(cause.clone());
        }

        Ok(())
    }

    fn bound_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        self.channel
            .lock()
            .clone()
            .ok_or_else(|| AmqpError::IllegalState("consumer has no channel".to_owned()))
    }

    /// The channel bound by `start`, kept after `stop` for diagnostics.
    pub fn channel(&self) -> Option<Arc<dyn AmqpChannel>> {
        self.channel.lock().clone()
    }

    /// The broker-assigned tag of the first consumer registration.
    pub fn consumer_tag(&self) -> Option<String> {
        self.callback.consumer_tags().into_iter().next()
    }

    pub fn consumer_tags(&self) -> Vec<String> {
        self.callback.consumer_tags()
    }

    pub fn queue_names(&self) -> &[String] {
        self.config.queues()
    }

    pub fn acknowledge_mode(&self) -> AcknowledgeMode {
        self.config.acknowledge_mode
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.lock()
    }

    pub fn is_cancelled(&self) -> bool {
        self.callback.is_cancelled()
    }

    /// Number of buffered items not yet taken by a worker.
    pub fn queue_size(&self) -> usize {
        self.buffer.len()
    }

    /// Delivery tags recorded since the last commit or rollback.
    pub fn delivery_tags(&self) -> Vec<u64> {
        self.callback.delivery_tags()
    }

    /// The adapter registered with the channel for this consumer.
    pub fn callback(&self) -> Arc<ConsumerCallback> {
        self.callback.clone()
    }
}

impl fmt::Display for BlockingConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Consumer: tags=[{}], channel={}, acknowledge_mode={} local queue size={}",
            self.consumer_tags().join(", "),
            self.channel()
                .map(|c| c.id().to_string())
                .unwrap_or_else(|| "none".to_owned()),
            self.config.acknowledge_mode,
            self.queue_size(),
        )
    }
}
