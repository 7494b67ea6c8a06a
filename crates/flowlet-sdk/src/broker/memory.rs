// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process broker for local runs and tests.
//!
//! Semantics follow a durable queue-group broker closely enough for the SDK:
//! - every queue group subscribed to a subject gets one copy of a message,
//!   load-balanced round-robin across the group's consumers
//! - each delivery runs on its own tokio task, so callbacks overlap
//! - subjects support `*` (one token) and `>` (one or more trailing tokens)
//!
//! Messages published while no consumer is subscribed are recorded but not
//! retained for later delivery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace};

use super::{
    Acknowledger, Broker, BrokerError, Delivery, DeliveryHandler, SubscribeOptions, Subscription,
};

/// Default connection max payload (1 MiB).
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// A message accepted by [`MemoryBroker::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub subject: String,
    pub data: Bytes,
}

#[derive(Debug, Default, Clone, Copy)]
struct Faults {
    publish: bool,
    subscribe: bool,
    unsubscribe: bool,
    stream_info: bool,
    ack: bool,
}

struct Consumer {
    id: u64,
    options: SubscribeOptions,
    handler: Arc<dyn DeliveryHandler>,
}

struct Inner {
    max_payload: usize,
    streams: Mutex<HashMap<String, Option<i64>>>,
    consumers: Mutex<Vec<Consumer>>,
    published: Mutex<Vec<PublishedMessage>>,
    faults: Mutex<Faults>,
    next_id: AtomicU64,
    cursor: AtomicUsize,
    acks: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process broker.
///
/// Cloning is cheap; clones share the same subjects and consumers.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Create a broker with the default max payload and one unbounded
    /// stream named `flowlet`.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    /// Create a broker with the given connection max payload.
    pub fn with_max_payload(max_payload: usize) -> Self {
        let mut streams = HashMap::new();
        streams.insert(crate::config::DEFAULT_STREAM_NAME.to_string(), None);
        Self {
            inner: Arc::new(Inner {
                max_payload,
                streams: Mutex::new(streams),
                consumers: Mutex::new(Vec::new()),
                published: Mutex::new(Vec::new()),
                faults: Mutex::new(Faults::default()),
                next_id: AtomicU64::new(1),
                cursor: AtomicUsize::new(0),
                acks: AtomicUsize::new(0),
            }),
        }
    }

    /// Declare (or redeclare) a stream and its max message size.
    pub fn with_stream(self, name: impl Into<String>, max_message_size: Option<i64>) -> Self {
        lock(&self.inner.streams).insert(name.into(), max_message_size);
        self
    }

    /// Deliver raw bytes to subscribers without recording a publish.
    ///
    /// Stands in for a message sent by another node.
    pub fn inject(&self, subject: &str, data: impl Into<Bytes>) {
        self.route(subject, data.into());
    }

    /// Every message published so far, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.inner.published).clone()
    }

    /// Messages published to one subject.
    pub fn published_to(&self, subject: &str) -> Vec<PublishedMessage> {
        lock(&self.inner.published)
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }

    /// Number of acknowledged deliveries.
    pub fn ack_count(&self) -> usize {
        self.inner.acks.load(Ordering::SeqCst)
    }

    /// Durable names of the live consumers.
    pub fn durable_names(&self) -> Vec<String> {
        lock(&self.inner.consumers)
            .iter()
            .map(|c| c.options.durable_name.clone())
            .collect()
    }

    /// Options of the live consumers.
    pub fn subscriptions(&self) -> Vec<SubscribeOptions> {
        lock(&self.inner.consumers)
            .iter()
            .map(|c| c.options.clone())
            .collect()
    }

    /// Wait until at least `count` messages have been published.
    pub async fn wait_for_published(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Option<Vec<PublishedMessage>> {
        self.wait_until(timeout, || lock(&self.inner.published).len() >= count)
            .await
            .then(|| self.published())
    }

    /// Wait until at least `count` deliveries have been acknowledged.
    pub async fn wait_for_acks(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, || self.ack_count() >= count).await
    }

    async fn wait_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if done() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    pub fn fail_publish(&self, fail: bool) {
        lock(&self.inner.faults).publish = fail;
    }

    pub fn fail_subscribe(&self, fail: bool) {
        lock(&self.inner.faults).subscribe = fail;
    }

    pub fn fail_unsubscribe(&self, fail: bool) {
        lock(&self.inner.faults).unsubscribe = fail;
    }

    pub fn fail_stream_info(&self, fail: bool) {
        lock(&self.inner.faults).stream_info = fail;
    }

    pub fn fail_ack(&self, fail: bool) {
        lock(&self.inner.faults).ack = fail;
    }

    fn faults(&self) -> Faults {
        *lock(&self.inner.faults)
    }

    fn route(&self, subject: &str, data: Bytes) {
        // One target per queue group.
        let mut groups: HashMap<String, Vec<(u64, Arc<dyn DeliveryHandler>)>> = HashMap::new();
        for consumer in lock(&self.inner.consumers).iter() {
            if subject_matches(&consumer.options.subject, subject) {
                groups
                    .entry(consumer.options.queue_group.clone())
                    .or_default()
                    .push((consumer.id, consumer.handler.clone()));
            }
        }

        for (group, members) in groups {
            let pick = self.inner.cursor.fetch_add(1, Ordering::Relaxed) % members.len();
            let (consumer_id, handler) = members[pick].clone();
            trace!(subject, group = %group, consumer_id, "Routing delivery");

            let acker = Arc::new(MemoryAcker {
                broker: self.clone(),
                acked: AtomicBool::new(false),
            });
            let delivery = Delivery::new(subject, data.clone(), acker);
            tokio::spawn(async move {
                handler.on_delivery(delivery).await;
            });
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, subject: &str, data: Bytes) -> Result<(), BrokerError> {
        if self.faults().publish {
            return Err(BrokerError::Unavailable("publish rejected".to_string()));
        }
        if data.len() > self.inner.max_payload {
            return Err(BrokerError::PayloadTooLarge {
                size: data.len(),
                max: self.inner.max_payload,
            });
        }

        lock(&self.inner.published).push(PublishedMessage {
            subject: subject.to_string(),
            data: data.clone(),
        });
        debug!(subject, size = data.len(), "Message published");

        self.route(subject, data);
        Ok(())
    }

    async fn subscribe(
        &self,
        options: SubscribeOptions,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        if self.faults().subscribe {
            return Err(BrokerError::Unavailable("subscribe rejected".to_string()));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let subscription = MemorySubscription {
            id,
            subject: options.subject.clone(),
            durable_name: options.durable_name.clone(),
            broker: self.clone(),
        };

        debug!(
            subject = %options.subject,
            durable = %options.durable_name,
            "Consumer subscribed"
        );
        lock(&self.inner.consumers).push(Consumer {
            id,
            options,
            handler,
        });

        Ok(Box::new(subscription))
    }

    async fn stream_max_message_size(&self, stream: &str) -> Result<Option<i64>, BrokerError> {
        if self.faults().stream_info {
            return Err(BrokerError::Unavailable("stream info rejected".to_string()));
        }
        lock(&self.inner.streams)
            .get(stream)
            .copied()
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))
    }

    fn max_payload(&self) -> usize {
        self.inner.max_payload
    }
}

struct MemorySubscription {
    id: u64,
    subject: String,
    durable_name: String,
    broker: MemoryBroker,
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn durable_name(&self) -> &str {
        &self.durable_name
    }

    async fn unsubscribe(&self) -> Result<(), BrokerError> {
        if self.broker.faults().unsubscribe {
            return Err(BrokerError::Unavailable("unsubscribe rejected".to_string()));
        }
        let mut consumers = lock(&self.broker.inner.consumers);
        let before = consumers.len();
        consumers.retain(|c| c.id != self.id);
        if consumers.len() == before {
            return Err(BrokerError::SubscriptionClosed(self.durable_name.clone()));
        }
        debug!(subject = %self.subject, durable = %self.durable_name, "Consumer unsubscribed");
        Ok(())
    }
}

struct MemoryAcker {
    broker: MemoryBroker,
    acked: AtomicBool,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        if self.broker.faults().ack {
            return Err(BrokerError::Unavailable("ack rejected".to_string()));
        }
        // Repeated acks of the same delivery count once.
        if !self.acked.swap(true, Ordering::SeqCst) {
            self.broker.inner.acks.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Match a subject against a pattern with `*` and `>` wildcards.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return pattern_tokens.next().is_none(),
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
