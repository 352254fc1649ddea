// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Deliveries and Messages
//!
//! A `Delivery` is the immutable value the broker callback adapter builds on the
//! network thread. Once a worker dequeues it, the bridge converts it into the
//! application-level `Message` handed to listener code.

use crate::otel;
use lapin::BasicProperties;
use opentelemetry::Context;
use std::fmt;

/// Routing information the broker attaches to every delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub message_count: u32,
}

impl Envelope {
    pub fn new(delivery_tag: u64, redelivered: bool, exchange: &str, routing_key: &str) -> Envelope {
        Envelope {
            delivery_tag,
            redelivered,
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            message_count: 0,
        }
    }
}

/// One message as delivered by the broker. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct Delivery {
    consumer_tag: String,
    envelope: Envelope,
    properties: BasicProperties,
    body: Vec<u8>,
}

impl Delivery {
    pub fn new(
        consumer_tag: &str,
        envelope: Envelope,
        properties: BasicProperties,
        body: Vec<u8>,
    ) -> Delivery {
        Delivery {
            consumer_tag: consumer_tag.to_owned(),
            envelope,
            properties,
            body,
        }
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn properties(&self) -> &BasicProperties {
        &self.properties
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Properties of an application message, flattened from the delivery envelope
/// and its AMQP basic properties.
#[derive(Debug, Clone, Default)]
pub struct MessageProperties {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub received_exchange: String,
    pub received_routing_key: String,
    pub message_count: u32,
    pub consumer_tag: String,
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    pub message_type: Option<String>,
    /// The raw basic properties, headers included.
    pub amqp_properties: BasicProperties,
}

/// The application-level message returned by the bridge's retrieval calls.
#[derive(Clone)]
pub struct Message {
    body: Vec<u8>,
    properties: MessageProperties,
    context: Context,
}

impl Message {
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn properties(&self) -> &MessageProperties {
        &self.properties
    }

    pub fn delivery_tag(&self) -> u64 {
        self.properties.delivery_tag
    }

    /// Trace context propagated by the publisher through the message headers.
    pub fn context(&self) -> &Context {
        &self.context
    }
}

impl From<Delivery> for Message {
    fn from(delivery: Delivery) -> Self {
        let context = otel::extract_context(&delivery.properties);
        let props = &delivery.properties;

        let properties = MessageProperties {
            delivery_tag: delivery.envelope.delivery_tag,
            redelivered: delivery.envelope.redelivered,
            received_exchange: delivery.envelope.exchange,
            received_routing_key: delivery.envelope.routing_key,
            message_count: delivery.envelope.message_count,
            consumer_tag: delivery.consumer_tag,
            content_type: props.content_type().as_ref().map(|v| v.to_string()),
            message_id: props.message_id().as_ref().map(|v| v.to_string()),
            message_type: props.kind().as_ref().map(|v| v.to_string()),
            amqp_properties: delivery.properties,
        };

        Message {
            body: delivery.body,
            properties,
            context,
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("properties", &self.properties)
            .field("body_len", &self.body.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::ShortString;

    #[test]
    fn conversion_carries_envelope_and_properties() {
        let mut envelope = Envelope::new(42, true, "orders", "order.created");
        envelope.message_count = 3;
        let props = BasicProperties::default()
            .with_content_type(ShortString::from("application/json"))
            .with_message_id(ShortString::from("msg-1"));

        let msg = Message::from(Delivery::new("ctag-1", envelope, props, b"{}".to_vec()));

        assert_eq!(msg.delivery_tag(), 42);
        assert_eq!(msg.body(), b"{}");
        assert!(msg.properties().redelivered);
        assert_eq!(msg.properties().received_exchange, "orders");
        assert_eq!(msg.properties().received_routing_key, "order.created");
        assert_eq!(msg.properties().message_count, 3);
        assert_eq!(msg.properties().consumer_tag, "ctag-1");
        assert_eq!(msg.properties().content_type.as_deref(), Some("application/json"));
        assert_eq!(msg.properties().message_id.as_deref(), Some("msg-1"));
        assert_eq!(msg.properties().message_type, None);
    }
}
