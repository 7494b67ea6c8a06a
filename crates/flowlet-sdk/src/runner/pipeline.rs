// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task and Exit runners.
//!
//! Both run the same lifecycle; they differ only in whether an output
//! subject is required.
//!
//! ```ignore
//! let runner = TaskRunner::new(NodeConfig::from_env()?, broker)
//!     .with_handler("ingest", handler_fn(|ctx, envelope| async move {
//!         let payload = envelope.payload().cloned().unwrap_or_default();
//!         ctx.reply(payload).await?;
//!         Ok(())
//!     }));
//!
//! runner.run().await?;
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span};

use super::{RunnerCore, RunnerState, first_error, shutdown_signal};
use crate::broker::Broker;
use crate::config::{NodeConfig, RunnerKind};
use crate::config_store::ConfigStore;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::handler::{Handler, Hook, Pipeline};
use crate::node::NodeName;
use crate::subscriber::{subscribe_all, unsubscribe_all};

mod sealed {
    pub trait Sealed {}
}

/// Marker selecting the Task or Exit flavour of [`PipelineRunner`].
pub trait PipelineKind: sealed::Sealed + Send + Sync + 'static {
    const KIND: RunnerKind;
}

/// In-pipeline transform node.
#[derive(Debug)]
pub struct TaskNode;

/// Terminal consumer node.
#[derive(Debug)]
pub struct ExitNode;

impl sealed::Sealed for TaskNode {}
impl sealed::Sealed for ExitNode {}

impl PipelineKind for TaskNode {
    const KIND: RunnerKind = RunnerKind::Task;
}

impl PipelineKind for ExitNode {
    const KIND: RunnerKind = RunnerKind::Exit;
}

pub type TaskRunner = PipelineRunner<TaskNode>;
pub type ExitRunner = PipelineRunner<ExitNode>;

/// Runner that subscribes its inputs and dispatches each message through a
/// handler table.
pub struct PipelineRunner<K: PipelineKind> {
    core: RunnerCore,
    pipeline: Pipeline,
    _kind: PhantomData<K>,
}

impl<K: PipelineKind> PipelineRunner<K> {
    pub fn new(config: NodeConfig, broker: Arc<dyn Broker>) -> Self {
        Self {
            core: RunnerCore::new(K::KIND, config, broker),
            pipeline: Pipeline::default(),
            _kind: PhantomData,
        }
    }

    /// Route messages from `node` to `handler`.
    pub fn with_handler(
        mut self,
        node: impl Into<NodeName>,
        handler: impl Handler + 'static,
    ) -> Self {
        self.pipeline.handlers.insert(node, Arc::new(handler));
        self
    }

    /// Route messages from nodes without a specific handler.
    pub fn with_default_handler(self, handler: impl Handler + 'static) -> Self {
        self.with_handler(NodeName::default_route(), handler)
    }

    pub fn with_preprocessor(mut self, handler: impl Handler + 'static) -> Self {
        self.pipeline.preprocessor = Some(Arc::new(handler));
        self
    }

    pub fn with_postprocessor(mut self, handler: impl Handler + 'static) -> Self {
        self.pipeline.postprocessor = Some(Arc::new(handler));
        self
    }

    /// Run once before subscribing. A failure aborts the run.
    pub fn with_initializer(mut self, hook: impl Hook + 'static) -> Self {
        self.core.set_initializer(Arc::new(hook));
        self
    }

    /// Run once after unsubscribing.
    pub fn with_finalizer(mut self, hook: impl Hook + 'static) -> Self {
        self.core.set_finalizer(Arc::new(hook));
        self
    }

    pub fn with_config_store(mut self, store: ConfigStore) -> Self {
        self.core.set_config_store(store);
        self
    }

    /// Token that stops the runner when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.core.shutdown_token()
    }

    /// Observe lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<RunnerState> {
        self.core.state()
    }

    /// Run until SIGINT/SIGTERM or the shutdown token is cancelled.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` resolves or the shutdown token is cancelled.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let kind = K::KIND;
        let span = info_span!(
            "runner",
            %kind,
            process = %self.core.config().process_name
        );
        self.lifecycle(shutdown).instrument(span).await
    }

    /// Run with signal handling and map the outcome to a process exit code.
    pub async fn run_to_exit(self) -> ExitCode {
        match self.run().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "Runner failed");
                ExitCode::FAILURE
            }
        }
    }

    async fn lifecycle<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Self { core, pipeline, .. } = self;
        let node = core.start().await?;

        let dispatcher = Arc::new(Dispatcher::new(node.clone(), Arc::new(pipeline)));
        let subscriptions =
            match subscribe_all(core.broker().as_ref(), core.config(), core.kind(), dispatcher)
                .await
            {
                Ok(subscriptions) => subscriptions,
                Err(e) => {
                    error!(error = %e, "Failed to subscribe inputs");
                    core.set_state(RunnerState::ShuttingDown);
                    let finalized = core.finalize(&node).await;
                    core.set_state(RunnerState::Terminated);
                    return first_error([Err(e), finalized]);
                }
            };

        core.set_state(RunnerState::Running);
        info!(inputs = subscriptions.len(), "Runner started");

        core.wait_for_shutdown(shutdown).await;

        core.set_state(RunnerState::ShuttingDown);
        let unsubscribed = unsubscribe_all(subscriptions).await;
        let finalized = core.finalize(&node).await;
        core.set_state(RunnerState::Terminated);
        info!("Runner stopped");

        first_error([unsubscribed, finalized])
    }
}
