// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-message processing shared by every runner.
//!
//! decode -> route -> preprocess -> handle -> postprocess -> ack
//!
//! A failure at any step becomes exactly one outbound ERROR envelope. The
//! inbound message is acked whatever the outcome, so failures travel
//! downstream as data instead of as broker redeliveries.

use std::sync::Arc;

use async_trait::async_trait;
use flowlet_protocol::{Envelope, codec};
use tracing::{Instrument, debug, error, info_span, warn};

use crate::broker::{Delivery, DeliveryHandler};
use crate::error::{SdkError, Stage};
use crate::handler::{Handler, Pipeline};
use crate::node::{NodeContext, NodeName, RequestContext};

/// A message that could not be processed, with the request it belongs to.
#[derive(Debug)]
struct Failure {
    request_id: String,
    error: SdkError,
}

impl Failure {
    fn new(request_id: impl Into<String>, error: SdkError) -> Self {
        Self {
            request_id: request_id.into(),
            error,
        }
    }

    /// Text carried by the outbound ERROR envelope.
    fn envelope_text(&self) -> String {
        match &self.error {
            SdkError::Stage { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Delivery callback running a [`Pipeline`] for one node.
pub struct Dispatcher {
    node: NodeContext,
    pipeline: Arc<Pipeline>,
}

impl Dispatcher {
    pub fn new(node: NodeContext, pipeline: Arc<Pipeline>) -> Self {
        Self { node, pipeline }
    }

    /// Run the pipeline over raw message bytes.
    ///
    /// Returns whether the message was processed without error. Failures are
    /// reported downstream before returning.
    pub async fn dispatch(&self, data: &[u8]) -> bool {
        match self.process(data).await {
            Ok(()) => true,
            Err(failure) => {
                self.report(failure).await;
                false
            }
        }
    }

    async fn process(&self, data: &[u8]) -> Result<(), Failure> {
        let envelope = codec::decode_wire(data).map_err(|e| Failure::new("", e.into()))?;
        let request_id = envelope.request_id().to_string();
        let from_node = NodeName::new(envelope.from_node());

        let handler = self
            .pipeline
            .handlers
            .resolve(&from_node)
            .cloned()
            .ok_or_else(|| {
                Failure::new(&request_id, SdkError::MissingHandler(from_node.to_string()))
            })?;

        let ctx = self.node.for_request(&request_id, from_node);

        if let Some(pre) = &self.pipeline.preprocessor {
            run_stage(Stage::Preprocessor, pre.as_ref(), &ctx, &envelope).await?;
        }
        run_stage(Stage::Handler, handler.as_ref(), &ctx, &envelope).await?;
        if let Some(post) = &self.pipeline.postprocessor {
            run_stage(Stage::Postprocessor, post.as_ref(), &ctx, &envelope).await?;
        }

        debug!(request_id = %request_id, "Message processed");
        Ok(())
    }

    async fn report(&self, failure: Failure) {
        warn!(
            request_id = %failure.request_id,
            error = %failure.error,
            "Message processing failed"
        );

        let publisher = self.node.publisher();
        if publisher.output_subject_for(None).is_err() {
            // Terminal node without an output: nowhere to send the error.
            error!(
                request_id = %failure.request_id,
                error = %failure.error,
                "No output subject, error envelope not published"
            );
            return;
        }

        if let Err(e) = publisher
            .publish_error(&failure.request_id, &failure.envelope_text())
            .await
        {
            error!(
                request_id = %failure.request_id,
                error = %e,
                "Failed to publish error envelope"
            );
        }
    }
}

async fn run_stage(
    stage: Stage,
    handler: &dyn Handler,
    ctx: &RequestContext,
    envelope: &Envelope,
) -> Result<(), Failure> {
    handler.handle(ctx, envelope).await.map_err(|e| {
        Failure::new(
            ctx.request_id(),
            SdkError::Stage {
                stage,
                message: e.to_string(),
            },
        )
    })
}

#[async_trait]
impl DeliveryHandler for Dispatcher {
    async fn on_delivery(&self, delivery: Delivery) {
        let span = info_span!(
            "dispatch",
            subject = %delivery.subject(),
            size = delivery.data().len()
        );
        async {
            self.dispatch(delivery.data()).await;

            if let Err(e) = delivery.ack().await {
                let e = SdkError::Ack(e);
                error!(error = %e, "Failed to ack message");
            }
        }
        .instrument(span)
        .await
    }
}
