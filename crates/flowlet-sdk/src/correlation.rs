// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request/response correlation for trigger nodes.
//!
//! A trigger registers a request id before publishing, then awaits the
//! receiver. When the pipeline's final envelope for that id arrives, the
//! entry is removed and the envelope sent, so each registration resolves at
//! most once. Closing the registry drops every remaining sender; blocked
//! receivers then observe a closed channel instead of hanging. A closed
//! registry stays closed: later registrations resolve as closed at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use flowlet_protocol::Envelope;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{BoxError, Result, SdkError};
use crate::handler::Handler;
use crate::node::RequestContext;

/// Pending responses keyed by request id.
#[derive(Clone, Default)]
pub struct ResponseRegistry {
    pending: Arc<DashMap<String, oneshot::Sender<Envelope>>>,
    closed: Arc<AtomicBool>,
}

impl ResponseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request id and return the receiver for its response.
    ///
    /// Registering an id that is already pending replaces the earlier entry;
    /// the earlier receiver then observes a closed channel. After
    /// [`close_all`](Self::close_all) the returned receiver is already closed.
    pub fn register(&self, request_id: impl Into<String>) -> ResponseReceiver {
        let request_id = request_id.into();
        let (tx, rx) = oneshot::channel();
        if self.is_closed() {
            debug!(request_id = %request_id, "Registry closed, response channel not registered");
            drop(tx);
        } else {
            if self.pending.insert(request_id.clone(), tx).is_some() {
                warn!(request_id = %request_id, "Response channel re-registered");
            }
            // A close racing the insert may have missed this entry.
            if self.is_closed() {
                self.pending.remove(&request_id);
            }
        }
        ResponseReceiver {
            request_id,
            rx,
            registry: self.clone(),
        }
    }

    /// Hand an envelope to whoever registered its request id.
    ///
    /// Returns false when no registration exists (unknown, already answered,
    /// or receiver gone).
    pub fn deliver(&self, envelope: Envelope) -> bool {
        let request_id = envelope.request_id().to_string();
        match self.pending.remove(&request_id) {
            Some((_, tx)) => {
                if tx.send(envelope).is_err() {
                    debug!(request_id = %request_id, "Response receiver already dropped");
                    return false;
                }
                true
            }
            None => false,
        }
    }

    /// Drop every pending sender and refuse further registrations.
    pub fn close_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let count = self.pending.len();
        self.pending.clear();
        if count > 0 {
            info!(count, "Closed pending response channels");
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop one registration. Its receiver observes a closed channel.
    pub fn remove(&self, request_id: &str) -> bool {
        self.pending.remove(request_id).is_some()
    }
}

/// Receiving half of a registered response channel.
#[derive(Debug)]
pub struct ResponseReceiver {
    request_id: String,
    rx: oneshot::Receiver<Envelope>,
    registry: ResponseRegistry,
}

impl ResponseReceiver {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Wait for the response. Blocks until it arrives or the registry is
    /// closed.
    pub async fn recv(self) -> Result<Envelope> {
        self.rx
            .await
            .map_err(|_| SdkError::ResponseClosed(self.request_id))
    }

    /// Wait for the response at most `timeout`. On timeout the registration
    /// is removed, so a late response is dropped like an unknown one.
    pub async fn recv_timeout(self, timeout: Duration) -> Result<Envelope> {
        let ResponseReceiver {
            request_id,
            rx,
            registry,
        } = self;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(envelope)) => Ok(envelope),
            Ok(Err(_)) => Err(SdkError::ResponseClosed(request_id)),
            Err(_) => {
                registry.remove(&request_id);
                Err(SdkError::ResponseTimeout(request_id))
            }
        }
    }
}

impl std::fmt::Debug for ResponseRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseRegistry")
            .field("pending", &self.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Trigger handler routing inbound envelopes to their waiting callers.
pub struct ResponseRouter {
    registry: ResponseRegistry,
}

impl ResponseRouter {
    pub fn new(registry: ResponseRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Handler for ResponseRouter {
    async fn handle(
        &self,
        _ctx: &RequestContext,
        envelope: &Envelope,
    ) -> std::result::Result<(), BoxError> {
        if !self.registry.deliver(envelope.clone()) {
            warn!(
                request_id = %envelope.request_id(),
                from_node = %envelope.from_node(),
                "No pending request for response, dropping"
            );
        }
        Ok(())
    }
}
