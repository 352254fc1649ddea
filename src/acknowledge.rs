// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Acknowledge Modes
//!
//! Closed set of acknowledgment disciplines a consumer can run with. Every
//! decision point in the bridge asks one of the predicates below instead of
//! matching on the variant itself.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How deliveries consumed by a bridge are acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcknowledgeMode {
    /// The broker considers a message acknowledged as soon as it is sent.
    None,
    /// The bridge acknowledges once processing succeeded.
    #[default]
    Auto,
    /// Acknowledgment is left to the listener.
    Manual,
}

impl AcknowledgeMode {
    /// Whether consume requests are issued with broker-side auto-ack.
    pub fn is_auto_ack(self) -> bool {
        matches!(self, AcknowledgeMode::None)
    }

    pub fn is_manual(self) -> bool {
        matches!(self, AcknowledgeMode::Manual)
    }

    /// Whether the bridge itself acks on commit and rejects on rollback.
    pub fn requires_ack(self) -> bool {
        !self.is_auto_ack() && !self.is_manual()
    }

    /// Whether deliveries in this mode may take part in a transaction.
    pub fn is_transaction_allowed(self) -> bool {
        !self.is_auto_ack()
    }

    /// Whether delivery tags are recorded between commit/rollback boundaries.
    pub fn tracks_delivery_tags(self) -> bool {
        !self.is_auto_ack()
    }
}

impl fmt::Display for AcknowledgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcknowledgeMode::None => "NONE",
            AcknowledgeMode::Auto => "AUTO",
            AcknowledgeMode::Manual => "MANUAL",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_auto_requires_ack() {
        assert!(AcknowledgeMode::Auto.requires_ack());
        assert!(!AcknowledgeMode::Manual.requires_ack());
        assert!(!AcknowledgeMode::None.requires_ack());
    }

    #[test]
    fn none_never_tracks_tags() {
        assert!(AcknowledgeMode::None.is_auto_ack());
        assert!(!AcknowledgeMode::None.tracks_delivery_tags());
        assert!(!AcknowledgeMode::None.is_transaction_allowed());
        assert!(AcknowledgeMode::Manual.tracks_delivery_tags());
        assert!(AcknowledgeMode::Auto.is_transaction_allowed());
    }

    #[test]
    fn deserializes_lowercase_names() {
        let mode: AcknowledgeMode = serde_json::from_str("\"manual\"").unwrap();
        assert_eq!(mode, AcknowledgeMode::Manual);
        assert_eq!(AcknowledgeMode::default(), AcknowledgeMode::Auto);
        assert_eq!(AcknowledgeMode::None.to_string(), "NONE");
    }
}
