// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration for Consumed Messages
//!
//! Extracts the trace context a publisher propagated through RabbitMQ message
//! headers, so listener code can start its processing span as a child of it.

use lapin::{
    protocol::basic::AMQPProperties,
    types::{AMQPValue, FieldTable, ShortString},
};
use opentelemetry::{propagation::Extractor, Context};
use std::collections::BTreeMap;
use tracing::error;

/// Read-only view over RabbitMQ headers implementing the OpenTelemetry `Extractor`.
pub(crate) struct RabbitMQHeaderExtractor<'a> {
    headers: &'a BTreeMap<ShortString, AMQPValue>,
}

impl<'a> RabbitMQHeaderExtractor<'a> {
    pub(crate) fn new(headers: &'a BTreeMap<ShortString, AMQPValue>) -> Self {
        Self { headers }
    }
}

impl Extractor for RabbitMQHeaderExtractor<'_> {
    /// Looks up a propagated trace header.
    ///
    /// # Parameters
    /// * `key` - Propagation field name, e.g. `traceparent`
    ///
    /// # Returns
    /// The header as UTF-8 when it is a long string, None for any other
    /// header type or an undecodable value
    fn get(&self, key: &str) -> Option<&str> {
        match self.headers.get(key)? {
            AMQPValue::LongString(value) => std::str::from_utf8(value.as_bytes())
                .map_err(|err| error!(key, error = err.to_string(), "invalid trace header"))
                .ok(),
            _ => None,
        }
    }

    /// # Returns
    /// Names of every header on the message, traced or not
    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|name| name.as_str()).collect()
    }
}

/// Extracts the propagated context from message properties, falling back to
/// an empty context when the message carries no headers.
pub(crate) fn extract_context(props: &AMQPProperties) -> Context {
    let empty = FieldTable::default();
    let headers = props.headers().as_ref().unwrap_or(&empty);

    opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&RabbitMQHeaderExtractor::new(headers.inner()))
    })
}
