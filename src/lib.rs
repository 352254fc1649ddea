// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;

pub mod acknowledge;
pub mod callback;
pub mod channel;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod counter;
pub mod delivery;
pub mod errors;
pub mod transaction;

pub use acknowledge::AcknowledgeMode;
pub use consumer::{BlockingConsumer, ConsumerState};
pub use counter::ActiveObjectCounter;
pub use errors::AmqpError;
