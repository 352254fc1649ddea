// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Configuration
//!
//! Plain configuration values for a consumer bridge and for the RabbitMQ
//! connection backing it. Both deserialize with serde so a container can load
//! them from whatever source it uses; missing fields fall back to defaults.

use crate::acknowledge::AcknowledgeMode;
use serde::Deserialize;

/// Settings of one consumer bridge.
///
/// Built either through serde or with the chained setters below.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub(crate) queues: Vec<String>,
    pub(crate) acknowledge_mode: AcknowledgeMode,
    pub(crate) prefetch_count: u16,
    pub(crate) transactional: bool,
    pub(crate) exclusive: bool,
    pub(crate) default_requeue_rejected: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            queues: vec![],
            acknowledge_mode: AcknowledgeMode::Auto,
            prefetch_count: 1,
            transactional: false,
            exclusive: false,
            default_requeue_rejected: true,
        }
    }
}

impl ConsumerConfig {
    /// Creates a configuration consuming the given queues with default settings.
    ///
    /// # Parameters
    /// * `queues` - Names of the queues to consume from
    pub fn new<S: AsRef<str>>(queues: &[S]) -> ConsumerConfig {
        ConsumerConfig {
            queues: queues.iter().map(|q| q.as_ref().to_owned()).collect(),
            ..ConsumerConfig::default()
        }
    }

    pub fn acknowledge_mode(mut self, mode: AcknowledgeMode) -> Self {
        self.acknowledge_mode = mode;
        self
    }

    /// Sets how many unacknowledged deliveries the broker may send at once.
    pub fn prefetch_count(mut self, count: u16) -> Self {
        self.prefetch_count = count;
        self
    }

    /// Opens the consumer's channel in transaction mode.
    pub fn transactional(mut self) -> Self {
        self.transactional = true;
        self
    }

    /// Requests exclusive consumers on every queue.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Sets whether failed deliveries are requeued when the failure does not
    /// say otherwise.
    pub fn default_requeue_rejected(mut self, requeue: bool) -> Self {
        self.default_requeue_rejected = requeue;
        self
    }

    pub fn queues(&self) -> &[String] {
        &self.queues
    }
}

/// Connection settings for the RabbitMQ broker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RabbitMQConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    /// Reported to the broker as the connection name.
    pub app_name: String,
}

impl Default for RabbitMQConfig {
    fn default() -> Self {
        RabbitMQConfig {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "".to_owned(),
            app_name: "rabbitmq-bridge".to_owned(),
        }
    }
}

impl RabbitMQConfig {
    pub fn uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.vhost
        )
    }
}
