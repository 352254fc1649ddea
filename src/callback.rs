// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Callback Adapter
//!
//! `ConsumerCallback` is the half of a consumer that runs on the connection's
//! network thread. It turns broker callbacks into deliveries pushed onto the
//! bridge's unbounded buffer, records cancel confirmations and link loss, and
//! owns the per-consumer state both halves share: the delivery-tag log, the
//! cancellation flag and the write-once shutdown signal.

use crate::{
    acknowledge::AcknowledgeMode,
    channel::{BrokerConsumer, ShutdownSignal},
    counter::ActiveObjectCounter,
    delivery::{Delivery, Envelope},
};
use lapin::BasicProperties;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, OnceLock,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Item travelling through the delivery buffer.
#[derive(Debug)]
pub(crate) enum Inbound {
    Delivery(Delivery),
    /// Wakes a blocked worker so it re-checks the terminal conditions.
    Wakeup,
}

pub struct ConsumerCallback {
    id: Uuid,
    acknowledge_mode: AcknowledgeMode,
    buffer: flume::Sender<Inbound>,
    counter: Arc<ActiveObjectCounter<Uuid>>,
    cancelled: AtomicBool,
    cancel_received: AtomicBool,
    shutdown: OnceLock<ShutdownSignal>,
    consumer_tags: Mutex<Vec<String>>,
    delivery_tags: Mutex<Vec<u64>>,
}

impl ConsumerCallback {
    pub(crate) fn new(
        acknowledge_mode: AcknowledgeMode,
        buffer: flume::Sender<Inbound>,
        counter: Arc<ActiveObjectCounter<Uuid>>,
    ) -> ConsumerCallback {
        ConsumerCallback {
            id: Uuid::new_v4(),
            acknowledge_mode,
            buffer,
            counter,
            cancelled: AtomicBool::new(false),
            cancel_received: AtomicBool::new(false),
            shutdown: OnceLock::new(),
            consumer_tags: Mutex::new(vec![]),
            delivery_tags: Mutex::new(vec![]),
        }
    }

    /// Identity under which the consumer is registered with the counter.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn register(&self) {
        self.counter.add(self.id);
    }

    pub(crate) fn release(&self) -> bool {
        self.counter.release(&self.id)
    }

    /// Sets the cancellation flag and wakes any blocked worker.
    pub(crate) fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.wakeup();
        }
    }

    /// Whether `stop` was called or the owning container is shutting down.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || !self.counter.is_active()
    }

    /// Whether the broker cancelled the consumer on its own.
    pub fn is_cancel_received(&self) -> bool {
        self.cancel_received.load(Ordering::Acquire)
    }

    pub fn shutdown_signal(&self) -> Option<&ShutdownSignal> {
        self.shutdown.get()
    }

    pub fn consumer_tags(&self) -> Vec<String> {
        self.consumer_tags.lock().clone()
    }

    pub(crate) fn add_consumer_tag(&self, consumer_tag: &str) {
        let mut tags = self.consumer_tags.lock();
        if !tags.iter().any(|t| t == consumer_tag) {
            tags.push(consumer_tag.to_owned());
        }
    }

    /// Forgets `consumer_tag`; the registration is released once the last
    /// tag is gone.
    fn remove_consumer_tag(&self, consumer_tag: &str) {
        let remaining = {
            let mut tags = self.consumer_tags.lock();
            let before = tags.len();
            tags.retain(|t| t != consumer_tag);
            if tags.len() == before {
                return;
            }
            tags.len()
        };

        if remaining == 0 && self.release() {
            debug!(consumer = %self.id, "consumer released");
        }
    }

    pub(crate) fn record_delivery_tag(&self, delivery_tag: u64) {
        if self.acknowledge_mode.tracks_delivery_tags() {
            self.delivery_tags.lock().push(delivery_tag);
        }
    }

    /// Drains the tag log, leaving it empty whatever the caller does next.
    pub(crate) fn take_delivery_tags(&self) -> Vec<u64> {
        std::mem::take(&mut *self.delivery_tags.lock())
    }

    pub(crate) fn clear_delivery_tags(&self) {
        self.delivery_tags.lock().clear();
    }

    pub fn delivery_tags(&self) -> Vec<u64> {
        self.delivery_tags.lock().clone()
    }

    pub(crate) fn wakeup(&self) {
        if self.buffer.send(Inbound::Wakeup).is_err() {
            debug!(consumer = %self.id, "delivery buffer closed, no worker to wake");
        }
    }
}

impl BrokerConsumer for ConsumerCallback {
    fn handle_consume_ok(&self, consumer_tag: &str) {
        debug!(consumer_tag, "consume ok");
        self.add_consumer_tag(consumer_tag);
    }

    fn handle_delivery(
        &self,
        consumer_tag: &str,
        envelope: Envelope,
        properties: BasicProperties,
        body: Vec<u8>,
    ) {
        if self.is_cancelled() {
            if self.acknowledge_mode.is_auto_ack() {
                warn!(
                    consumer_tag,
                    delivery_tag = envelope.delivery_tag,
                    "discarding auto-acked delivery received after cancel"
                );
            } else {
                debug!(
                    consumer_tag,
                    delivery_tag = envelope.delivery_tag,
                    "dropping delivery received after cancel, broker will redeliver"
                );
            }
            return;
        }

        let delivery = Delivery::new(consumer_tag, envelope, properties, body);
        if self.buffer.send(Inbound::Delivery(delivery)).is_err() {
            warn!(consumer_tag, "delivery buffer closed, dropping delivery");
        }
    }

    fn handle_cancel_ok(&self, consumer_tag: &str) {
        debug!(consumer_tag, "cancel ok");
        self.remove_consumer_tag(consumer_tag);
    }

    fn handle_cancel(&self, consumer_tag: &str) {
        warn!(consumer_tag, "consumer cancelled by the broker");
        self.cancel_received.store(true, Ordering::Release);
        self.remove_consumer_tag(consumer_tag);
        self.wakeup();
    }

    fn handle_shutdown_signal(&self, consumer_tag: &str, signal: ShutdownSignal) {
        self.clear_delivery_tags();

        if signal.initiated_by_application {
            debug!(consumer_tag, reason = signal.reason.as_str(), "channel closed by application");
            return;
        }

        warn!(consumer_tag, reason = signal.reason.as_str(), "shutdown signal received");
        if self.shutdown.set(signal).is_ok() {
            self.wakeup();
        }
    }
}
