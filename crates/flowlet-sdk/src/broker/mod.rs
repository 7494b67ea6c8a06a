// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Broker abstraction.
//!
//! The SDK talks to a durable pub/sub broker through these traits:
//! - `Broker`: publish, durable queue-group subscribe, stream limits
//! - `Subscription`: handle returned by subscribe, used at shutdown
//! - `DeliveryHandler`: callback the broker invokes per delivered message
//!
//! Deliveries may be handed to the callback concurrently, from any task,
//! and in any order. `memory` provides an in-process implementation.

pub mod memory;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use memory::{MemoryBroker, PublishedMessage};

/// Errors reported by a broker implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// Broker cannot be reached
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// Stream does not exist
    #[error("stream '{0}' not found")]
    StreamNotFound(String),

    /// Message exceeds the connection's max payload
    #[error("payload of {size} bytes exceeds max payload {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Subscription was already removed
    #[error("subscription '{0}' is closed")]
    SubscriptionClosed(String),

    /// Any other broker-side failure
    #[error("{0}")]
    Other(String),
}

/// Options for a durable, queue-grouped, manually acknowledged subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub subject: String,
    pub queue_group: String,
    pub durable_name: String,
    pub ack_wait: Duration,
    pub manual_ack: bool,
}

/// Broker connection shared by every task of a node.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish bytes to a subject and wait for the broker's acknowledgement.
    async fn publish(&self, subject: &str, data: Bytes) -> Result<(), BrokerError>;

    /// Open a durable queue-group subscription delivering to `handler`.
    async fn subscribe(
        &self,
        options: SubscribeOptions,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<Box<dyn Subscription>, BrokerError>;

    /// Maximum message size configured on a stream.
    ///
    /// `None` or a non-positive value means the stream is unbounded.
    async fn stream_max_message_size(&self, stream: &str) -> Result<Option<i64>, BrokerError>;

    /// Maximum payload accepted by this connection.
    fn max_payload(&self) -> usize;
}

/// A live subscription.
#[async_trait]
pub trait Subscription: Send + Sync {
    fn subject(&self) -> &str;

    fn durable_name(&self) -> &str;

    /// Stop receiving messages.
    async fn unsubscribe(&self) -> Result<(), BrokerError>;
}

/// Acknowledges a single delivered message.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;
}

/// Callback invoked by the broker for each delivered message.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn on_delivery(&self, delivery: Delivery);
}

/// A message delivered to a subscription.
#[derive(Clone)]
pub struct Delivery {
    subject: String,
    data: Bytes,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(subject: impl Into<String>, data: Bytes, acker: Arc<dyn Acknowledger>) -> Self {
        Self {
            subject: subject.into(),
            data,
            acker,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Acknowledge processing of this message.
    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("subject", &self.subject)
            .field("size", &self.data.len())
            .finish()
    }
}
