// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # External Transaction Synchronization
//!
//! When a consumer's channel takes part in a transaction driven by an outside
//! transaction manager, the consumer does not acknowledge deliveries itself.
//! It registers the pending delivery tags with a `TransactionSynchronization`
//! and the outside manager acks (or requeues) them when it completes.

use crate::{channel::AmqpChannel, errors::AmqpError};
use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};

#[cfg(test)]
use mockall::automock;

/// Synchronization point of an externally coordinated transaction.
#[cfg_attr(test, automock)]
pub trait TransactionSynchronization: Send + Sync {
    /// Defers the acknowledgment of `delivery_tag` on `channel` to the
    /// completion of the outside transaction.
    fn register_delivery_tag(
        &self,
        channel: Arc<dyn AmqpChannel>,
        delivery_tag: u64,
    ) -> Result<(), AmqpError>;
}

struct PendingDeliveries {
    channel: Arc<dyn AmqpChannel>,
    delivery_tags: Vec<u64>,
}

/// Holds the channels and delivery tags enlisted in one outside transaction.
///
/// The transaction manager calls `commit_all` or `rollback_all` once; both
/// forget the enlisted tags whatever the outcome.
#[derive(Default)]
pub struct ResourceHolder {
    deliveries: Mutex<BTreeMap<u16, PendingDeliveries>>,
}

impl ResourceHolder {
    pub fn new() -> ResourceHolder {
        ResourceHolder::default()
    }

    /// Number of delivery tags waiting for the outcome of the transaction.
    pub fn pending(&self) -> usize {
        self.deliveries
            .lock()
            .values()
            .map(|pending| pending.delivery_tags.len())
            .sum()
    }

    /// Acknowledges every enlisted delivery and commits each channel.
    pub fn commit_all(&self) -> Result<(), AmqpError> {
        let deliveries = std::mem::take(&mut *self.deliveries.lock());

        for (id, pending) in deliveries {
            debug!(channel = id, tags = pending.delivery_tags.len(), "committing deliveries");
            for tag in &pending.delivery_tags {
                pending.channel.basic_ack(*tag, false)?;
            }
            pending.channel.tx_commit()?;
        }

        Ok(())
    }

    /// Rolls each channel back and returns every enlisted delivery to its queue.
    pub fn rollback_all(&self) -> Result<(), AmqpError> {
        let deliveries = std::mem::take(&mut *self.deliveries.lock());

        for (id, pending) in deliveries {
            debug!(channel = id, tags = pending.delivery_tags.len(), "rolling back deliveries");
            if let Err(err) = pending.channel.tx_rollback() {
                error!(error = err.to_string(), "failure to rollback channel");
                return Err(err);
            }
            for tag in &pending.delivery_tags {
                pending.channel.basic_reject(*tag, true)?;
            }
            pending.channel.tx_commit()?;
        }

        Ok(())
    }
}

impl TransactionSynchronization for ResourceHolder {
    fn register_delivery_tag(
        &self,
        channel: Arc<dyn AmqpChannel>,
        delivery_tag: u64,
    ) -> Result<(), AmqpError> {
        self.deliveries
            .lock()
            .entry(channel.id())
            .or_insert_with(|| PendingDeliveries {
                channel: channel.clone(),
                delivery_tags: vec![],
            })
            .delivery_tags
            .push(delivery_tag);

        Ok(())
    }
}
