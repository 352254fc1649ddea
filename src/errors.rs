// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Consumer Bridge
//!
//! This module provides the error taxonomy shared by the consumer bridge, the
//! broker callback adapter and the channel collaborators. The `AmqpError` enum
//! covers setup failures while starting a consumer, protocol access failures,
//! link loss observed while retrieving messages, processing failures raised by
//! listener code and the secondary failures of the rollback sequence.

use thiserror::Error;

/// Represents errors that can occur while consuming from RabbitMQ.
///
/// Variants carry the rendered cause as a string so the enum stays `Clone` and
/// comparable, which lets the rollback path hand the original processing
/// failure back to the caller untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// An operation was invoked in a lifecycle state that does not allow it
    #[error("illegal consumer state: {0}")]
    IllegalState(String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error passively declaring a queue with the given name
    #[error("failure to declare a queue `{0}`: {1}")]
    DeclareQueueError(String, String),

    /// Queues could not be prepared while starting a consumer; never retried here
    #[error("cannot prepare queue for listener, either the queue doesn't exist or the broker will not allow us to use it: {0}")]
    FatalListenerStartup(String),

    /// Error registering a consumer on the given queue
    #[error("failure to declare consumer on queue `{0}`: {1}")]
    ConsumerDeclarationError(String, String),

    /// Error cancelling a consumer
    #[error("failure to cancel consumer `{0}`: {1}")]
    CancelConsumerError(String, String),

    /// The connection or channel went away while consuming
    #[error("shutdown signal received: {0}")]
    ShutdownDetected(String),

    /// The consumer was cancelled, either by `stop` or by the broker
    #[error("consumer `{0}` was cancelled")]
    ConsumerCancelled(String),

    /// Error acknowledging a message
    #[error("failure to ack message `{0}`")]
    AckMessageError(u64),

    /// Error rejecting a message
    #[error("failure to reject message `{0}`")]
    RejectMessageError(u64),

    /// Error committing a channel transaction
    #[error("failure to commit transaction: {0}")]
    CommitError(String),

    /// Error rolling back a channel transaction
    #[error("failure to rollback transaction: {0}")]
    RollbackError(String),

    /// A transacted, non-local commit found no external transaction to join
    #[error("no external transaction synchronization available to register delivery tags")]
    NoTransactionSynchronization,

    /// Listener failure; the delivery is requeued by the rollback path
    #[error("listener execution failed: {0}")]
    ListenerExecutionFailed(String),

    /// Listener failure that rejects the delivery without requeueing it,
    /// letting the broker dead-letter the message
    #[error("rejected and not requeued: {0}")]
    RejectAndDontRequeue(String),
}

impl AmqpError {
    /// Whether the rollback path must reject the delivery without requeueing it.
    pub fn is_reject_and_dont_requeue(&self) -> bool {
        matches!(self, AmqpError::RejectAndDontRequeue(_))
    }
}
