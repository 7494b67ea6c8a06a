// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node runners.
//!
//! Every runner walks the same lifecycle:
//!
//! ```text
//! Created -> Initialized -> Running -> ShuttingDown -> Terminated
//! ```
//!
//! The current state is published on a `watch` channel. Shutdown is driven
//! by a per-runner `CancellationToken`, cancelled by SIGINT/SIGTERM in
//! `run()`, by the future passed to `run_until()`, or directly through
//! `shutdown_token()`.

pub mod pipeline;
pub mod trigger;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::config::{NodeConfig, RunnerKind};
use crate::config_store::ConfigStore;
use crate::error::{Result, SdkError};
use crate::handler::Hook;
use crate::node::NodeContext;

pub use pipeline::{ExitNode, ExitRunner, PipelineKind, PipelineRunner, TaskNode, TaskRunner};
pub use trigger::{TriggerHandle, TriggerRunner};

/// Lifecycle state of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunnerState {
    Created,
    Initialized,
    Running,
    ShuttingDown,
    Terminated,
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// State and hooks shared by every runner variant.
pub(crate) struct RunnerCore {
    kind: RunnerKind,
    config: NodeConfig,
    broker: Arc<dyn Broker>,
    config_store: Option<ConfigStore>,
    initializer: Option<Arc<dyn Hook>>,
    finalizer: Option<Arc<dyn Hook>>,
    shutdown: CancellationToken,
    state: watch::Sender<RunnerState>,
}

impl RunnerCore {
    pub(crate) fn new(kind: RunnerKind, config: NodeConfig, broker: Arc<dyn Broker>) -> Self {
        let (state, _) = watch::channel(RunnerState::Created);
        Self {
            kind,
            config,
            broker,
            config_store: None,
            initializer: None,
            finalizer: None,
            shutdown: CancellationToken::new(),
            state,
        }
    }

    pub(crate) fn kind(&self) -> RunnerKind {
        self.kind
    }

    pub(crate) fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub(crate) fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub(crate) fn set_config_store(&mut self, store: ConfigStore) {
        self.config_store = Some(store);
    }

    pub(crate) fn set_initializer(&mut self, hook: Arc<dyn Hook>) {
        self.initializer = Some(hook);
    }

    pub(crate) fn set_finalizer(&mut self, hook: Arc<dyn Hook>) {
        self.finalizer = Some(hook);
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn state(&self) -> watch::Receiver<RunnerState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: RunnerState) {
        let previous = self.state.send_replace(state);
        debug!(from = ?previous, to = ?state, "Runner state changed");
    }

    /// Validate configuration, build the node context and run the
    /// initializer. Any failure leaves the runner `Terminated`.
    pub(crate) async fn start(&self) -> Result<NodeContext> {
        if let Err(e) = self.config.validate(self.kind) {
            error!(error = %e, "Invalid node configuration");
            self.set_state(RunnerState::Terminated);
            return Err(e);
        }

        let node = NodeContext::new(
            self.config.clone(),
            self.broker.clone(),
            self.config_store.clone(),
        );

        if let Some(init) = &self.initializer {
            if let Err(e) = init.run(&node).await {
                let e = SdkError::Hook {
                    hook: "initializer",
                    message: e.to_string(),
                };
                error!(error = %e, "Initializer failed");
                self.set_state(RunnerState::Terminated);
                return Err(e);
            }
        }

        self.set_state(RunnerState::Initialized);
        Ok(node)
    }

    /// Block until the token is cancelled or `shutdown` resolves, then make
    /// sure the token is cancelled.
    pub(crate) async fn wait_for_shutdown<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;

            _ = self.shutdown.cancelled() => {
                debug!("Shutdown requested");
            }

            _ = shutdown => {
                info!("Shutdown signal received");
                self.shutdown.cancel();
            }
        }
    }

    pub(crate) async fn finalize(&self, node: &NodeContext) -> Result<()> {
        let Some(finalizer) = &self.finalizer else {
            return Ok(());
        };
        finalizer.run(node).await.map_err(|e| {
            let e = SdkError::Hook {
                hook: "finalizer",
                message: e.to_string(),
            };
            error!(error = %e, "Finalizer failed");
            e
        })
    }
}

/// First error wins.
pub(crate) fn first_error(results: impl IntoIterator<Item = Result<()>>) -> Result<()> {
    results.into_iter().find(|r| r.is_err()).unwrap_or(Ok(()))
}
