// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Lapin Connection and Channels
//!
//! This module implements the channel collaborators over the lapin client. The
//! consumer bridge is synchronous, so every lapin future is driven to completion
//! on a tokio runtime handle from the calling worker thread. Consumer events are
//! delivered by lapin's own executor and forwarded to the registered
//! `BrokerConsumer` without blocking.

use crate::{
    channel::{AmqpChannel, BrokerConsumer, ConnectionFactory, ShutdownSignal},
    config::RabbitMQConfig,
    delivery::Envelope,
    errors::AmqpError,
};
use lapin::{
    message::DeliveryResult,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicQosOptions,
        BasicRejectOptions, QueueDeclareOptions,
    },
    types::{FieldTable, LongString},
    Channel, Connection, ConnectionProperties,
};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::runtime::Handle;
use tracing::{debug, error};

const REPLY_SUCCESS: u16 = 200;

/// Opens lapin channels on one shared connection.
pub struct LapinConnectionFactory {
    handle: Handle,
    connection: Arc<Connection>,
}

impl LapinConnectionFactory {
    /// Connects to RabbitMQ.
    ///
    /// Must be called from outside the runtime `handle` belongs to.
    ///
    /// # Parameters
    /// * `cfg` - Broker address, credentials and the connection name
    /// * `handle` - Runtime used to drive lapin calls
    ///
    /// # Returns
    /// * `Result<LapinConnectionFactory, AmqpError>` - The factory, or `ConnectionError`
    pub fn connect(cfg: &RabbitMQConfig, handle: Handle) -> Result<LapinConnectionFactory, AmqpError> {
        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(cfg.app_name.clone()));

        let connection = match handle.block_on(Connection::connect(&cfg.uri(), options)) {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError {})
            }
        }?;
        debug!("amqp connected");

        Ok(LapinConnectionFactory {
            handle,
            connection: Arc::new(connection),
        })
    }
}

impl ConnectionFactory for LapinConnectionFactory {
    fn create_channel(&self, transactional: bool) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        debug!("creating amqp channel...");
        let channel = match self.handle.block_on(self.connection.create_channel()) {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError {})
            }
        }?;

        if transactional {
            if let Err(err) = self.handle.block_on(channel.tx_select()) {
                error!(error = err.to_string(), "error to select transaction mode");
                return Err(AmqpError::ChannelError {});
            }
        }
        debug!(channel = channel.id(), transactional, "channel created");

        Ok(Arc::new(LapinChannel::new(self.handle.clone(), channel)))
    }
}

/// `AmqpChannel` over a lapin channel.
pub struct LapinChannel {
    handle: Handle,
    channel: Channel,
    closing: Arc<AtomicBool>,
    cancelling: Arc<Mutex<HashSet<String>>>,
}

impl LapinChannel {
    pub fn new(handle: Handle, channel: Channel) -> LapinChannel {
        LapinChannel {
            handle,
            channel,
            closing: Arc::new(AtomicBool::new(false)),
            cancelling: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

/// Routes one lapin consumer event to the broker consumer callbacks.
///
/// lapin reports the end of a consumer as `Ok(None)` both for a cancel-ok
/// answering our own `basic_cancel` and for a broker-initiated cancel; the
/// tags in `cancelling` tell the two apart.
fn dispatch(
    consumer: &Arc<dyn BrokerConsumer>,
    consumer_tag: &str,
    closing: &AtomicBool,
    cancelling: &Mutex<HashSet<String>>,
    event: DeliveryResult,
) {
    match event {
        Ok(Some(delivery)) => {
            let envelope = Envelope::new(
                delivery.delivery_tag,
                delivery.redelivered,
                delivery.exchange.as_str(),
                delivery.routing_key.as_str(),
            );
            consumer.handle_delivery(consumer_tag, envelope, delivery.properties, delivery.data);
        }
        Ok(None) => {
            if cancelling.lock().contains(consumer_tag) {
                consumer.handle_cancel_ok(consumer_tag);
            } else {
                consumer.handle_cancel(consumer_tag);
            }
        }
        Err(err) => {
            let signal = ShutdownSignal::new(&err.to_string(), closing.load(Ordering::Acquire));
            consumer.handle_shutdown_signal(consumer_tag, signal);
        }
    }
}

impl AmqpChannel for LapinChannel {
    fn id(&self) -> u16 {
        self.channel.id()
    }

    fn basic_qos(&self, prefetch_count: u16, global: bool) -> Result<(), AmqpError> {
        self.handle
            .block_on(
                self.channel
                    .basic_qos(prefetch_count, BasicQosOptions { global }),
            )
            .map_err(|err| {
                error!(error = err.to_string(), "failure to configure qos");
                AmqpError::QoSDeclarationError(err.to_string())
            })
    }

    fn queue_declare_passive(&self, queue: &str) -> Result<(), AmqpError> {
        self.handle
            .block_on(self.channel.queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            ))
            .map(|_| ())
            .map_err(|err| {
                error!(error = err.to_string(), queue, "failure to declare queue");
                AmqpError::DeclareQueueError(queue.to_owned(), err.to_string())
            })
    }

    fn basic_consume(
        &self,
        queue: &str,
        no_ack: bool,
        exclusive: bool,
        consumer: Arc<dyn BrokerConsumer>,
    ) -> Result<String, AmqpError> {
        let lapin_consumer = self
            .handle
            .block_on(self.channel.basic_consume(
                queue,
                "",
                BasicConsumeOptions {
                    no_local: false,
                    no_ack,
                    exclusive,
                    nowait: false,
                },
                FieldTable::default(),
            ))
            .map_err(|err| {
                error!(error = err.to_string(), queue, "failure to create the consumer");
                AmqpError::ConsumerDeclarationError(queue.to_owned(), err.to_string())
            })?;

        let consumer_tag = lapin_consumer.tag().to_string();
        consumer.handle_consume_ok(&consumer_tag);

        let delegate_tag = consumer_tag.clone();
        let closing = self.closing.clone();
        let cancelling = self.cancelling.clone();
        lapin_consumer.set_delegate(move |event: DeliveryResult| {
            dispatch(&consumer, &delegate_tag, &closing, &cancelling, event);
            async {}
        });

        Ok(consumer_tag)
    }

    fn basic_cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        self.cancelling.lock().insert(consumer_tag.to_owned());

        self.handle
            .block_on(
                self.channel
                    .basic_cancel(consumer_tag, BasicCancelOptions { nowait: false }),
            )
            .map_err(|err| {
                error!(error = err.to_string(), consumer_tag, "failure to cancel consumer");
                AmqpError::CancelConsumerError(consumer_tag.to_owned(), err.to_string())
            })?;

        // the delegate sees the cancel-ok as the end of the stream
        Ok(())
    }

    fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), AmqpError> {
        self.handle
            .block_on(
                self.channel
                    .basic_ack(delivery_tag, BasicAckOptions { multiple }),
            )
            .map_err(|err| {
                error!(error = err.to_string(), delivery_tag, "error whiling ack msg");
                AmqpError::AckMessageError(delivery_tag)
            })
    }

    fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.handle
            .block_on(
                self.channel
                    .basic_reject(delivery_tag, BasicRejectOptions { requeue }),
            )
            .map_err(|err| {
                error!(error = err.to_string(), delivery_tag, "error whiling reject msg");
                AmqpError::RejectMessageError(delivery_tag)
            })
    }

    fn tx_commit(&self) -> Result<(), AmqpError> {
        self.handle
            .block_on(self.channel.tx_commit())
            .map_err(|err| AmqpError::CommitError(err.to_string()))
    }

    fn tx_rollback(&self) -> Result<(), AmqpError> {
        self.handle
            .block_on(self.channel.tx_rollback())
            .map_err(|err| AmqpError::RollbackError(err.to_string()))
    }

    fn close(&self) {
        self.closing.store(true, Ordering::Release);

        if let Err(err) = self
            .handle
            .block_on(self.channel.close(REPLY_SUCCESS, "OK"))
        {
            debug!(error = err.to_string(), "failure to close channel");
        }
    }
}
