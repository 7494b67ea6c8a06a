// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! User hook traits and the per-runner message pipeline.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use flowlet_protocol::Envelope;

use crate::error::BoxError;
use crate::node::{NodeContext, NodeName, RequestContext};

/// Per-message callback: preprocessors, handlers and postprocessors all
/// implement this.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &RequestContext, envelope: &Envelope) -> Result<(), BoxError>;
}

/// Lifecycle callback run once before subscribing (initializer) or once
/// after unsubscribing (finalizer).
#[async_trait]
pub trait Hook: Send + Sync {
    async fn run(&self, node: &NodeContext) -> Result<(), BoxError>;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct FnHandler<F>(F);

/// Wrap an async closure as a [`Handler`].
///
/// ```ignore
/// let echo = handler_fn(|ctx, envelope| async move {
///     if let Some(payload) = envelope.payload() {
///         ctx.reply(payload.clone()).await?;
///     }
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(RequestContext, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(RequestContext, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn handle(&self, ctx: &RequestContext, envelope: &Envelope) -> Result<(), BoxError> {
        (self.0)(ctx.clone(), envelope.clone()).await
    }
}

/// Adapter turning an async closure into a [`Hook`].
pub struct FnHook<F>(F);

/// Wrap an async closure as a [`Hook`].
pub fn hook_fn<F, Fut>(f: F) -> FnHook<F>
where
    F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    FnHook(f)
}

#[async_trait]
impl<F, Fut> Hook for FnHook<F>
where
    F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn run(&self, node: &NodeContext) -> Result<(), BoxError> {
        (self.0)(node.clone()).await
    }
}

/// Handlers keyed by sending node, with `default` as the fallback route.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<NodeName, Arc<dyn Handler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; a later registration for the same node replaces
    /// the earlier one.
    pub fn insert(&mut self, node: impl Into<NodeName>, handler: Arc<dyn Handler>) {
        self.handlers.insert(node.into(), handler);
    }

    /// Handler for the node, else the default route.
    pub fn resolve(&self, node: &NodeName) -> Option<&Arc<dyn Handler>> {
        self.handlers
            .get(node)
            .or_else(|| self.handlers.get(&NodeName::default_route()))
    }

    pub fn contains(&self, node: &NodeName) -> bool {
        self.handlers.contains_key(node)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// What the dispatcher runs for each inbound message.
#[derive(Clone, Default)]
pub struct Pipeline {
    pub handlers: HandlerTable,
    pub preprocessor: Option<Arc<dyn Handler>>,
    pub postprocessor: Option<Arc<dyn Handler>>,
}

impl Pipeline {
    /// Pipeline routing every message to one handler.
    pub fn single(handler: Arc<dyn Handler>) -> Self {
        let mut handlers = HandlerTable::new();
        handlers.insert(NodeName::default_route(), handler);
        Self {
            handlers,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn Handler> {
        Arc::new(handler_fn(|_, _| async { Ok(()) }))
    }

    #[test]
    fn test_resolve_prefers_specific_route() {
        let specific = noop();
        let fallback = noop();
        let mut table = HandlerTable::new();
        table.insert("Scorer", specific.clone());
        table.insert(NodeName::default_route(), fallback.clone());

        let hit = table.resolve(&NodeName::new("SCORER")).unwrap();
        assert!(Arc::ptr_eq(hit, &specific));

        let miss = table.resolve(&NodeName::new("enricher")).unwrap();
        assert!(Arc::ptr_eq(miss, &fallback));
    }

    #[test]
    fn test_resolve_without_default() {
        let mut table = HandlerTable::new();
        table.insert("scorer", noop());
        assert!(table.resolve(&NodeName::new("other")).is_none());
        assert!(table.contains(&NodeName::new("Scorer")));
    }

    #[test]
    fn test_single_pipeline_uses_default_route() {
        let pipeline = Pipeline::single(noop());
        assert_eq!(pipeline.handlers.len(), 1);
        assert!(pipeline.handlers.resolve(&NodeName::new("anyone")).is_some());
        assert!(pipeline.preprocessor.is_none());
    }
}
