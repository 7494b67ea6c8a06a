// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node configuration: process identity and broker subjects.

use std::env;
use std::fmt;
use std::time::Duration;

use crate::error::{Result, SdkError};

/// Default JetStream-style stream holding pipeline subjects.
pub const DEFAULT_STREAM_NAME: &str = "flowlet";

/// Default ack-wait before the broker redelivers an unacked message.
pub const DEFAULT_ACK_WAIT_MS: u64 = 30_000;

/// Default product and workflow names for the scoped config buckets.
pub const DEFAULT_SCOPE_NAME: &str = "default";

/// Role a node plays in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunnerKind {
    /// Originates requests and receives their final responses
    Trigger,
    /// In-pipeline transform
    Task,
    /// Terminal consumer
    Exit,
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerKind::Trigger => write!(f, "trigger"),
            RunnerKind::Task => write!(f, "task"),
            RunnerKind::Exit => write!(f, "exit"),
        }
    }
}

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Process name (required) - published as `from_node` on every envelope
    pub process_name: String,
    /// Product this node belongs to (default: "default")
    pub product: String,
    /// Workflow this node belongs to (default: "default")
    pub workflow: String,
    /// Subjects to consume from
    pub input_subjects: Vec<String>,
    /// Root subject to publish results to
    pub output_subject: Option<String>,
    /// Stream whose max message size bounds publishes (default: "flowlet")
    pub stream_name: String,
    /// Broker redelivery timeout in milliseconds (default: 30_000)
    pub ack_wait_ms: u64,
}

impl NodeConfig {
    /// Load configuration from environment variables.
    ///
    /// # Required Environment Variables
    /// - `FLOWLET_PROCESS_NAME` - Name of this process
    ///
    /// # Optional Environment Variables
    /// - `FLOWLET_INPUT_SUBJECTS` - Comma-separated input subjects
    /// - `FLOWLET_OUTPUT_SUBJECT` - Output subject root
    /// - `FLOWLET_STREAM_NAME` - Stream name (default: "flowlet")
    /// - `FLOWLET_ACK_WAIT_MS` - Ack wait (default: 30000)
    /// - `FLOWLET_PRODUCT` - Product name (default: "default")
    /// - `FLOWLET_WORKFLOW` - Workflow name (default: "default")
    pub fn from_env() -> Result<Self> {
        let process_name = env::var("FLOWLET_PROCESS_NAME")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| SdkError::Config("FLOWLET_PROCESS_NAME is required".to_string()))?;

        let input_subjects = env::var("FLOWLET_INPUT_SUBJECTS")
            .map(|v| parse_subject_list(&v))
            .unwrap_or_default();

        let output_subject = env::var("FLOWLET_OUTPUT_SUBJECT")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let stream_name =
            env::var("FLOWLET_STREAM_NAME").unwrap_or_else(|_| DEFAULT_STREAM_NAME.to_string());

        let ack_wait_ms = match env::var("FLOWLET_ACK_WAIT_MS") {
            Ok(v) => v
                .parse()
                .map_err(|e| SdkError::Config(format!("invalid FLOWLET_ACK_WAIT_MS: {}", e)))?,
            Err(_) => DEFAULT_ACK_WAIT_MS,
        };

        let product = env::var("FLOWLET_PRODUCT").unwrap_or_else(|_| DEFAULT_SCOPE_NAME.to_string());
        let workflow =
            env::var("FLOWLET_WORKFLOW").unwrap_or_else(|_| DEFAULT_SCOPE_NAME.to_string());

        Ok(Self {
            process_name,
            product,
            workflow,
            input_subjects,
            output_subject,
            stream_name,
            ack_wait_ms,
        })
    }

    /// Create a new configuration with the given process name.
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
            product: DEFAULT_SCOPE_NAME.to_string(),
            workflow: DEFAULT_SCOPE_NAME.to_string(),
            input_subjects: Vec::new(),
            output_subject: None,
            stream_name: DEFAULT_STREAM_NAME.to_string(),
            ack_wait_ms: DEFAULT_ACK_WAIT_MS,
        }
    }

    /// Add an input subject.
    pub fn with_input_subject(mut self, subject: impl Into<String>) -> Self {
        self.input_subjects.push(subject.into());
        self
    }

    /// Replace the input subjects.
    pub fn with_input_subjects<I, S>(mut self, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_subjects = subjects.into_iter().map(Into::into).collect();
        self
    }

    /// Set the output subject root.
    pub fn with_output_subject(mut self, subject: impl Into<String>) -> Self {
        self.output_subject = Some(subject.into());
        self
    }

    /// Set the stream whose limits apply to publishes.
    pub fn with_stream_name(mut self, stream: impl Into<String>) -> Self {
        self.stream_name = stream.into();
        self
    }

    /// Set the ack-wait timeout.
    pub fn with_ack_wait_ms(mut self, ack_wait_ms: u64) -> Self {
        self.ack_wait_ms = ack_wait_ms;
        self
    }

    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = product.into();
        self
    }

    pub fn with_workflow(mut self, workflow: impl Into<String>) -> Self {
        self.workflow = workflow.into();
        self
    }

    pub fn ack_wait(&self) -> Duration {
        Duration::from_millis(self.ack_wait_ms)
    }

    /// Check that the configuration is usable by a runner of the given kind.
    ///
    /// Every runner needs a process name and at least one input subject.
    /// Trigger and Task runners must also have an output subject; an Exit
    /// node may omit it.
    pub fn validate(&self, kind: RunnerKind) -> Result<()> {
        if self.process_name.trim().is_empty() {
            return Err(SdkError::Config("process name is required".to_string()));
        }
        if self.input_subjects.is_empty() {
            return Err(SdkError::Config(format!(
                "{} runner requires at least one input subject",
                kind
            )));
        }
        if let Some(blank) = self.input_subjects.iter().find(|s| s.trim().is_empty()) {
            return Err(SdkError::Config(format!(
                "invalid input subject '{}'",
                blank
            )));
        }
        if kind != RunnerKind::Exit && self.output_subject.is_none() {
            return Err(SdkError::Config(format!(
                "{} runner requires an output subject",
                kind
            )));
        }
        if self.ack_wait_ms == 0 {
            return Err(SdkError::Config("ack wait must be positive".to_string()));
        }
        Ok(())
    }
}

fn parse_subject_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
