// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trigger runner.
//!
//! A trigger runs a long-lived user function (an HTTP server, a scheduler,
//! a bridge from another system) that originates requests into the
//! pipeline, and subscribes to the pipeline's final output so each request
//! can await its own response.
//!
//! ```ignore
//! let runner = TriggerRunner::new(config, broker);
//! runner
//!     .run(|trigger| async move {
//!         let response = trigger.request(Payload::raw("ping")).await?;
//!         info!(kind = ?response.kind(), "Pipeline answered");
//!         trigger.cancelled().await;
//!         Ok(())
//!     })
//!     .await?;
//! ```
//!
//! The user function must return once `cancelled()` resolves; the run only
//! completes after it has.

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use flowlet_protocol::{Envelope, Payload, new_request_id};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, instrument};

use super::{RunnerCore, RunnerState, first_error, shutdown_signal};
use crate::broker::Broker;
use crate::config::{NodeConfig, RunnerKind};
use crate::config_store::ConfigStore;
use crate::correlation::{ResponseReceiver, ResponseRegistry, ResponseRouter};
use crate::dispatch::Dispatcher;
use crate::error::{BoxError, Result, SdkError};
use crate::handler::{Hook, Pipeline};
use crate::node::NodeContext;
use crate::publisher::PublishOptions;
use crate::subscriber::{subscribe_all, unsubscribe_all};

/// Handle given to the trigger function.
#[derive(Clone)]
pub struct TriggerHandle {
    node: NodeContext,
    registry: ResponseRegistry,
    shutdown: CancellationToken,
}

impl TriggerHandle {
    /// Register interest in the response to `request_id`.
    ///
    /// Call this before publishing the request, or the response may arrive
    /// before the registration exists and be dropped.
    pub fn response_channel(&self, request_id: impl Into<String>) -> ResponseReceiver {
        self.registry.register(request_id)
    }

    /// Publish into the pipeline. Returns the request id used.
    pub async fn publish(&self, payload: Payload, options: PublishOptions) -> Result<String> {
        self.node.publisher().publish(payload, options).await
    }

    /// Publish a new request and wait for its response.
    ///
    /// Waits until the response arrives or the runner shuts down. Once
    /// shutdown has started, fails with `ResponseClosed` without publishing.
    #[instrument(skip(self, payload))]
    pub async fn request(&self, payload: Payload) -> Result<Envelope> {
        self.send(payload).await?.recv().await
    }

    /// Like [`request`](Self::request), giving up after `timeout`.
    #[instrument(skip(self, payload))]
    pub async fn request_timeout(&self, payload: Payload, timeout: Duration) -> Result<Envelope> {
        self.send(payload).await?.recv_timeout(timeout).await
    }

    async fn send(&self, payload: Payload) -> Result<ResponseReceiver> {
        let request_id = new_request_id();
        if self.is_shutting_down() {
            debug!(request_id = %request_id, "Runner shutting down, request not published");
            return Err(SdkError::ResponseClosed(request_id));
        }
        let receiver = self.registry.register(&request_id);

        let options = PublishOptions::new().with_request_id(&request_id);
        if let Err(e) = self.node.publisher().publish(payload, options).await {
            self.registry.remove(&request_id);
            return Err(e);
        }
        debug!(request_id = %request_id, "Request published");
        Ok(receiver)
    }

    /// Requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.registry.len()
    }

    pub fn node(&self) -> &NodeContext {
        &self.node
    }

    pub fn config_store(&self) -> Result<&ConfigStore> {
        self.node.config_store()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Resolves once the runner starts shutting down.
    pub async fn cancelled(&self) {
        self.shutdown.cancelled().await
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Runner for nodes that originate pipeline requests.
pub struct TriggerRunner {
    core: RunnerCore,
}

impl TriggerRunner {
    pub fn new(config: NodeConfig, broker: Arc<dyn Broker>) -> Self {
        Self {
            core: RunnerCore::new(RunnerKind::Trigger, config, broker),
        }
    }

    /// Run once before subscribing. A failure aborts the run.
    pub fn with_initializer(mut self, hook: impl Hook + 'static) -> Self {
        self.core.set_initializer(Arc::new(hook));
        self
    }

    /// Run once after the function and the subscriptions have stopped.
    pub fn with_finalizer(mut self, hook: impl Hook + 'static) -> Self {
        self.core.set_finalizer(Arc::new(hook));
        self
    }

    pub fn with_config_store(mut self, store: ConfigStore) -> Self {
        self.core.set_config_store(store);
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.core.shutdown_token()
    }

    pub fn state(&self) -> watch::Receiver<RunnerState> {
        self.core.state()
    }

    /// Run `f` until SIGINT/SIGTERM or the shutdown token is cancelled.
    pub async fn run<F, Fut>(self, f: F) -> Result<()>
    where
        F: FnOnce(TriggerHandle) -> Fut + Send,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        self.run_until(f, shutdown_signal()).await
    }

    /// Run `f` until `shutdown` resolves or the shutdown token is cancelled.
    ///
    /// An error returned by `f` also triggers shutdown and is returned.
    pub async fn run_until<F, Fut, S>(self, f: F, shutdown: S) -> Result<()>
    where
        F: FnOnce(TriggerHandle) -> Fut + Send,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
        S: Future<Output = ()> + Send,
    {
        let kind = RunnerKind::Trigger;
        let span = info_span!(
            "runner",
            %kind,
            process = %self.core.config().process_name
        );
        self.lifecycle(f, shutdown).instrument(span).await
    }

    /// Run with signal handling and map the outcome to a process exit code.
    pub async fn run_to_exit<F, Fut>(self, f: F) -> ExitCode
    where
        F: FnOnce(TriggerHandle) -> Fut + Send,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        match self.run(f).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "Runner failed");
                ExitCode::FAILURE
            }
        }
    }

    async fn lifecycle<F, Fut, S>(self, f: F, shutdown: S) -> Result<()>
    where
        F: FnOnce(TriggerHandle) -> Fut + Send,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
        S: Future<Output = ()> + Send,
    {
        let core = self.core;
        let node = core.start().await?;

        let registry = ResponseRegistry::new();
        let router = Arc::new(ResponseRouter::new(registry.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            node.clone(),
            Arc::new(Pipeline::single(router)),
        ));

        // Subscribe before the function starts so no response is missed.
        let subscriptions = match subscribe_all(
            core.broker().as_ref(),
            core.config(),
            RunnerKind::Trigger,
            dispatcher,
        )
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

        let token = core.shutdown_token();
        let handle = TriggerHandle {
            node: node.clone(),
            registry: registry.clone(),
            shutdown: token.clone(),
        };

        core.set_state(RunnerState::Running);
        info!(inputs = subscriptions.len(), "Trigger started");

        let user = f(handle);
        let user_task = tokio::spawn(
            async move {
                let result = user.await;
                if let Err(e) = &result {
                    error!(error = %e, "Trigger function failed, shutting down");
                    token.cancel();
                }
                result
            }
            .in_current_span(),
        );

        core.wait_for_shutdown(shutdown).await;

        core.set_state(RunnerState::ShuttingDown);
        let unsubscribed = unsubscribe_all(subscriptions).await;
        // Unblock callers waiting on responses that can no longer arrive.
        registry.close_all();

        let user_result = match user_task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SdkError::Trigger(e.to_string())),
            Err(e) => {
                error!(error = %e, "Trigger function panicked");
                Err(SdkError::Trigger(e.to_string()))
            }
        };
        registry.close_all();

        let finalized = core.finalize(&node).await;
        core.set_state(RunnerState::Terminated);
        info!("Trigger stopped");

        first_error([unsubscribed, user_result, finalized])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;

    fn config() -> NodeConfig {
        NodeConfig::new("api")
            .with_input_subject("responses")
            .with_output_subject("requests")
    }

    #[tokio::test]
    async fn test_function_error_shuts_down_runner() {
        let broker = MemoryBroker::new();
        let runner = TriggerRunner::new(config(), Arc::new(broker.clone()));
        let state = runner.state();

        let err = runner
            .run_until(
                |_| async { Err(BoxError::from("listener bind failed")) },
                std::future::pending(),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "trigger function failed: listener bind failed"
        );
        assert_eq!(*state.borrow(), RunnerState::Terminated);
        assert!(broker.durable_names().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_failure_skips_function() {
        let broker = MemoryBroker::new();
        broker.fail_subscribe(true);
        let runner = TriggerRunner::new(config(), Arc::new(broker.clone()));

        let err = runner
            .run_until(
                |_| async { Err(BoxError::from("function must not start")) },
                std::future::pending(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SdkError::Subscribe { .. }));
    }
}
