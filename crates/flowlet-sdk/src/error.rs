// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SDK-specific error types.

use std::fmt;

use flowlet_protocol::ProtocolError;
use thiserror::Error;

use crate::broker::BrokerError;
use crate::config_store::Scope;
use crate::kv::KvError;

/// Error type returned by user-supplied hooks and handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Per-message processing stage that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preprocessor,
    Handler,
    Postprocessor,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Preprocessor => write!(f, "preprocessor"),
            Stage::Handler => write!(f, "handler"),
            Stage::Postprocessor => write!(f, "postprocessor"),
        }
    }
}

/// Errors that can occur in the SDK.
#[derive(Debug, Error)]
pub enum SdkError {
    /// Configuration error (missing or invalid setting)
    #[error("configuration error: {0}")]
    Config(String),

    /// Envelope could not be encoded, decoded or (de)compressed
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// No handler registered for the sending node and no default route
    #[error("missing handler for node {0}")]
    MissingHandler(String),

    /// A preprocessor, handler or postprocessor returned an error
    #[error("{stage} failed: {message}")]
    Stage {
        /// Stage that failed
        stage: Stage,
        /// Error text produced by user code
        message: String,
    },

    /// Encoded envelope exceeds the broker limit even after compression
    #[error("message too large: {size} bytes ({compressed} compressed), max {max}")]
    MessageTooLarge {
        /// Encoded size
        size: usize,
        /// Size after compression
        compressed: usize,
        /// Effective maximum message size
        max: usize,
    },

    /// Configuration key missing from every tier consulted
    #[error("config key '{key}' not found{}", scope_suffix(.scope))]
    ConfigKeyNotFound {
        /// Key that was looked up
        key: String,
        /// Tier that was consulted, `None` when all tiers were tried
        scope: Option<Scope>,
    },

    /// Key-value bucket failure other than a missing key
    #[error("key-value error: {0}")]
    Kv(#[from] KvError),

    /// Broker rejected a publish
    #[error("publish to '{subject}' failed: {source}")]
    Publish {
        subject: String,
        #[source]
        source: BrokerError,
    },

    /// Broker rejected an acknowledgement
    #[error("ack failed: {0}")]
    Ack(#[source] BrokerError),

    /// Durable subscription could not be created
    #[error("subscribe to '{subject}' failed: {source}")]
    Subscribe {
        subject: String,
        #[source]
        source: BrokerError,
    },

    /// Durable subscription could not be removed
    #[error("unsubscribe from '{subject}' failed: {source}")]
    Unsubscribe {
        subject: String,
        #[source]
        source: BrokerError,
    },

    /// Any other broker failure (e.g. stream info lookup)
    #[error("broker error: {0}")]
    Broker(#[source] BrokerError),

    /// The response channel was closed before a response arrived
    #[error("response channel for request '{0}' closed")]
    ResponseClosed(String),

    /// No response arrived within the caller's timeout
    #[error("timed out waiting for response to request '{0}'")]
    ResponseTimeout(String),

    /// Initializer or finalizer failed
    #[error("{hook} failed: {message}")]
    Hook {
        /// Which hook failed
        hook: &'static str,
        /// Error text produced by user code
        message: String,
    },

    /// The trigger function returned an error or panicked
    #[error("trigger function failed: {0}")]
    Trigger(String),
}

fn scope_suffix(scope: &Option<Scope>) -> String {
    match scope {
        Some(scope) => format!(" in {} scope", scope),
        None => " in any scope".to_string(),
    }
}

impl SdkError {
    /// Whether this is a configuration miss rather than a transport failure.
    pub fn is_config_key_not_found(&self) -> bool {
        matches!(self, SdkError::ConfigKeyNotFound { .. })
    }
}

/// Type alias for SDK results.
pub type Result<T> = std::result::Result<T, SdkError>;
