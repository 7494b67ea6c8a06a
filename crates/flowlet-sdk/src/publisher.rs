// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outbound publish path.
//!
//! Every publish wraps the payload in an envelope stamped with this node's
//! name and a request id, then polices the broker's size limit:
//! 1. encoded size within the limit: published as-is
//! 2. otherwise gzip; compressed size within the limit: published compressed
//! 3. otherwise `MessageTooLarge`, nothing is published
//!
//! Publishing is fire-and-forget: failures are logged and returned, never
//! retried.

use std::sync::Arc;

use flowlet_protocol::{Envelope, Payload, codec, new_request_id};
use tracing::{debug, instrument, warn};

use crate::broker::Broker;
use crate::config::NodeConfig;
use crate::error::{Result, SdkError};

/// Per-publish options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Request id to stamp; a fresh UUID is minted when absent or empty
    pub request_id: Option<String>,
    /// Suffix appended to the output subject as `{output}.{subtopic}`
    pub subtopic: Option<String>,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_subtopic(mut self, subtopic: impl Into<String>) -> Self {
        self.subtopic = Some(subtopic.into());
        self
    }

    fn resolve_request_id(&self) -> String {
        match self.request_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => new_request_id(),
        }
    }
}

/// Publishes envelopes to this node's output subject.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
    node_name: String,
    output_subject: Option<String>,
    stream_name: String,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>, config: &NodeConfig) -> Self {
        Self {
            broker,
            node_name: config.process_name.clone(),
            output_subject: config.output_subject.clone(),
            stream_name: config.stream_name.clone(),
        }
    }

    /// Name stamped as `from_node` on outgoing envelopes.
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Subject a publish with the given subtopic goes to.
    pub fn output_subject_for(&self, subtopic: Option<&str>) -> Result<String> {
        let root = self
            .output_subject
            .as_deref()
            .ok_or_else(|| SdkError::Config("no output subject configured".to_string()))?;
        Ok(match subtopic {
            Some(sub) if !sub.is_empty() => format!("{}.{}", root, sub),
            _ => root.to_string(),
        })
    }

    /// Publish an OK envelope. Returns the request id used.
    pub async fn publish(&self, payload: Payload, options: PublishOptions) -> Result<String> {
        let request_id = options.resolve_request_id();
        let envelope = Envelope::ok(&request_id, &self.node_name, payload);
        self.publish_envelope(&envelope, options.subtopic.as_deref())
            .await?;
        Ok(request_id)
    }

    /// Publish an ERROR envelope for a request.
    pub async fn publish_error(&self, request_id: &str, message: &str) -> Result<()> {
        let envelope = Envelope::error(request_id, &self.node_name, message);
        self.publish_envelope(&envelope, None).await
    }

    /// Publish a provisional EARLY_REPLY envelope. Returns the request id used.
    pub async fn publish_early_reply(
        &self,
        payload: Payload,
        options: PublishOptions,
    ) -> Result<String> {
        let request_id = options.resolve_request_id();
        let envelope = Envelope::early_reply(&request_id, &self.node_name, payload);
        self.publish_envelope(&envelope, options.subtopic.as_deref())
            .await?;
        Ok(request_id)
    }

    /// Publish a provisional EARLY_EXIT envelope. Returns the request id used.
    pub async fn publish_early_exit(
        &self,
        payload: Payload,
        options: PublishOptions,
    ) -> Result<String> {
        let request_id = options.resolve_request_id();
        let envelope = Envelope::early_exit(&request_id, &self.node_name, payload);
        self.publish_envelope(&envelope, options.subtopic.as_deref())
            .await?;
        Ok(request_id)
    }

    /// Encode, size-check and publish a prepared envelope.
    #[instrument(skip(self, envelope), fields(request_id = %envelope.request_id(), kind = ?envelope.kind()))]
    pub async fn publish_envelope(&self, envelope: &Envelope, subtopic: Option<&str>) -> Result<()> {
        let subject = self.output_subject_for(subtopic)?;
        let encoded = codec::encode(envelope);

        let max = self.max_message_size().await.inspect_err(|e| {
            warn!(subject = %subject, error = %e, "Dropping message: max size lookup failed");
        })?;

        let data = if encoded.len() <= max {
            encoded
        } else {
            let compressed = codec::compress(&encoded)?;
            if compressed.len() > max {
                warn!(
                    subject = %subject,
                    size = encoded.len(),
                    compressed = compressed.len(),
                    max,
                    "Dropping message: too large even after compression"
                );
                return Err(SdkError::MessageTooLarge {
                    size: encoded.len(),
                    compressed: compressed.len(),
                    max,
                });
            }
            debug!(
                size = encoded.len(),
                compressed = compressed.len(),
                "Publishing compressed message"
            );
            compressed.into()
        };

        let size = data.len();
        self.broker
            .publish(&subject, data)
            .await
            .map_err(|source| {
                warn!(subject = %subject, error = %source, "Publish failed");
                SdkError::Publish {
                    subject: subject.clone(),
                    source,
                }
            })?;
        debug!(subject = %subject, size, "Message published");
        Ok(())
    }

    /// Effective maximum: the stream limit capped by the connection limit.
    pub async fn max_message_size(&self) -> Result<usize> {
        let connection_max = self.broker.max_payload();
        let stream_max = self
            .broker
            .stream_max_message_size(&self.stream_name)
            .await
            .map_err(SdkError::Broker)?;

        Ok(match stream_max {
            Some(limit) if limit > 0 => connection_max.min(limit as usize),
            _ => connection_max,
        })
    }
}
