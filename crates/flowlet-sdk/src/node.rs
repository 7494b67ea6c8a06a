// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node identity and execution contexts.
//!
//! `NodeContext` is the long-lived state shared by every task of a node.
//! `RequestContext` is built per inbound message and never mutated; it
//! carries the request id and sender alongside a clone of the shared state.

use std::fmt;
use std::sync::Arc;

use flowlet_protocol::Payload;

use crate::broker::Broker;
use crate::config::NodeConfig;
use crate::config_store::ConfigStore;
use crate::error::{Result, SdkError};
use crate::publisher::{PublishOptions, Publisher};

/// Case-insensitive node identifier, stored lowercase.
///
/// Only case is normalized; surrounding whitespace is significant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeName(String);

impl NodeName {
    /// Route used when no handler matches the sending node.
    pub const DEFAULT: &'static str = "default";

    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().to_lowercase())
    }

    /// The fallback route.
    pub fn default_route() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default_route(&self) -> bool {
        self.0 == Self::DEFAULT
    }
}

impl From<&str> for NodeName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for NodeName {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct NodeShared {
    config: NodeConfig,
    broker: Arc<dyn Broker>,
    publisher: Publisher,
    config_store: Option<ConfigStore>,
}

/// Shared, read-only state of a running node.
#[derive(Clone)]
pub struct NodeContext {
    inner: Arc<NodeShared>,
}

impl NodeContext {
    pub fn new(
        config: NodeConfig,
        broker: Arc<dyn Broker>,
        config_store: Option<ConfigStore>,
    ) -> Self {
        let publisher = Publisher::new(broker.clone(), &config);
        Self {
            inner: Arc::new(NodeShared {
                config,
                broker,
                publisher,
                config_store,
            }),
        }
    }

    pub fn process_name(&self) -> &str {
        &self.inner.config.process_name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.inner.broker
    }

    pub fn publisher(&self) -> &Publisher {
        &self.inner.publisher
    }

    /// The scoped configuration store, if one was attached to the runner.
    pub fn config_store(&self) -> Result<&ConfigStore> {
        self.inner
            .config_store
            .as_ref()
            .ok_or_else(|| SdkError::Config("no config store attached".to_string()))
    }

    /// Build the context for one inbound message.
    pub fn for_request(
        &self,
        request_id: impl Into<String>,
        from_node: impl Into<NodeName>,
    ) -> RequestContext {
        RequestContext {
            node: self.clone(),
            request_id: request_id.into(),
            from_node: from_node.into(),
        }
    }
}

/// Immutable per-message view handed to preprocessors, handlers and
/// postprocessors.
#[derive(Clone)]
pub struct RequestContext {
    node: NodeContext,
    request_id: String,
    from_node: NodeName,
}

impl RequestContext {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Normalized name of the node that sent the message.
    pub fn from_node(&self) -> &NodeName {
        &self.from_node
    }

    pub fn node(&self) -> &NodeContext {
        &self.node
    }

    pub fn config_store(&self) -> Result<&ConfigStore> {
        self.node.config_store()
    }

    /// Publish a result for this request.
    pub async fn reply(&self, payload: Payload) -> Result<()> {
        self.node
            .publisher()
            .publish(payload, self.options())
            .await
            .map(|_| ())
    }

    /// Publish a result for this request under `{output}.{subtopic}`.
    pub async fn reply_to(&self, subtopic: &str, payload: Payload) -> Result<()> {
        self.node
            .publisher()
            .publish(payload, self.options().with_subtopic(subtopic))
            .await
            .map(|_| ())
    }

    /// Publish with explicit options, e.g. a different request id for
    /// fan-out. Returns the request id used.
    pub async fn publish_with(&self, payload: Payload, options: PublishOptions) -> Result<String> {
        self.node.publisher().publish(payload, options).await
    }

    /// Publish a provisional early reply for this request.
    pub async fn reply_early(&self, payload: Payload) -> Result<()> {
        self.node
            .publisher()
            .publish_early_reply(payload, self.options())
            .await
            .map(|_| ())
    }

    /// Publish a provisional early exit for this request.
    pub async fn exit_early(&self, payload: Payload) -> Result<()> {
        self.node
            .publisher()
            .publish_early_exit(payload, self.options())
            .await
            .map(|_| ())
    }

    fn options(&self) -> PublishOptions {
        PublishOptions::new().with_request_id(&self.request_id)
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("from_node", &self.from_node)
            .field("process", &self.node.process_name())
            .finish()
    }
}
