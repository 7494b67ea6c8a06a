// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flowlet SDK - runtime for building the nodes of an event-driven pipeline.
//!
//! A node is a small program that consumes envelopes from durable broker
//! subjects, runs user logic, and publishes results for the next node. This
//! crate provides everything between the broker and that logic.
//!
//! # Features
//!
//! - **Runners**: Trigger, Task and Exit nodes with one shared lifecycle
//!   (`Created -> Initialized -> Running -> ShuttingDown -> Terminated`)
//! - **Dispatch**: decode, route by sending node, pre/post processing, and
//!   one ERROR envelope per failure; every inbound message is acked
//! - **Publishing**: size-checked publishes with transparent gzip
//! - **Correlation**: trigger nodes can await the response to a request
//! - **Scoped config**: process > workflow > product > global lookups
//! - **In-memory backends**: [`MemoryBroker`] and [`MemoryBucket`] for local
//!   runs and tests
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use flowlet_sdk::{MemoryBroker, NodeConfig, TaskRunner, handler_fn};
//!
//! #[tokio::main]
//! async fn main() -> std::process::ExitCode {
//!     let config = match NodeConfig::from_env() {
//!         Ok(config) => config,
//!         Err(_) => return std::process::ExitCode::FAILURE,
//!     };
//!
//!     TaskRunner::new(config, Arc::new(MemoryBroker::new()))
//!         .with_default_handler(handler_fn(|ctx, envelope| async move {
//!             if let Some(payload) = envelope.into_payload() {
//!                 ctx.reply(payload).await?;
//!             }
//!             Ok(())
//!         }))
//!         .run_to_exit()
//!         .await
//! }
//! ```
//!
//! # Trigger requests
//!
//! ```ignore
//! TriggerRunner::new(config, broker)
//!     .run(|trigger| async move {
//!         // Register before publishing so the response cannot be missed.
//!         let rx = trigger.response_channel("order-42");
//!         trigger
//!             .publish(payload, PublishOptions::new().with_request_id("order-42"))
//!             .await?;
//!         let response = rx.recv().await?;
//!         trigger.cancelled().await;
//!         Ok(())
//!     })
//!     .await?;
//! ```

pub mod broker;
pub mod config;
pub mod config_store;
pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod kv;
pub mod node;
pub mod publisher;
pub mod runner;
pub mod subscriber;

// Main types
pub use config::{NodeConfig, RunnerKind};
pub use config_store::{ConfigStore, Scope};
pub use error::{BoxError, Result, SdkError, Stage};
pub use handler::{Handler, HandlerTable, Hook, Pipeline, handler_fn, hook_fn};
pub use node::{NodeContext, NodeName, RequestContext};
pub use publisher::{PublishOptions, Publisher};

// Runners
pub use runner::{
    ExitRunner, PipelineRunner, RunnerState, TaskRunner, TriggerHandle, TriggerRunner,
    shutdown_signal,
};

// Correlation
pub use correlation::{ResponseReceiver, ResponseRegistry};

// Backends
pub use broker::{Broker, BrokerError, Delivery, MemoryBroker, SubscribeOptions, Subscription};
pub use kv::{KeyValueBucket, KvError, MemoryBucket};

// Re-export the wire protocol for handler code
pub use flowlet_protocol::{Envelope, MessageKind, Payload};
