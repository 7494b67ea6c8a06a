// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable subscription management.

use std::sync::Arc;

use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::broker::{Broker, DeliveryHandler, SubscribeOptions, Subscription};
use crate::config::{NodeConfig, RunnerKind};
use crate::error::{Result, SdkError};

/// Consumer name for a subject and process.
///
/// `orders.new` + `fraud scorer` gives `orders-new-fraud-scorer`.
pub fn durable_name(subject: &str, process_name: &str) -> String {
    format!(
        "{}-{}",
        subject.replace('.', "-"),
        process_name.replace(['.', ' '], "-")
    )
}

/// Consumer name for a runner kind. Trigger consumers get a random 8-hex
/// suffix so restarted instances never collide on a durable name.
pub fn durable_name_for(kind: RunnerKind, subject: &str, process_name: &str) -> String {
    let base = durable_name(subject, process_name);
    match kind {
        RunnerKind::Trigger => {
            let suffix = Uuid::new_v4().simple().to_string();
            format!("{}-{}", base, &suffix[..8])
        }
        RunnerKind::Task | RunnerKind::Exit => base,
    }
}

/// Subscribe every configured input subject.
///
/// On failure the subscriptions already made are removed again before the
/// error is returned.
#[instrument(skip(broker, config, handler), fields(process = %config.process_name))]
pub async fn subscribe_all(
    broker: &dyn Broker,
    config: &NodeConfig,
    kind: RunnerKind,
    handler: Arc<dyn DeliveryHandler>,
) -> Result<Vec<Box<dyn Subscription>>> {
    let mut subscriptions: Vec<Box<dyn Subscription>> = Vec::new();

    for subject in &config.input_subjects {
        let durable = durable_name_for(kind, subject, &config.process_name);
        let options = SubscribeOptions {
            subject: subject.clone(),
            queue_group: durable.clone(),
            durable_name: durable,
            ack_wait: config.ack_wait(),
            manual_ack: true,
        };

        match broker.subscribe(options, handler.clone()).await {
            Ok(subscription) => {
                info!(
                    subject = %subscription.subject(),
                    durable = %subscription.durable_name(),
                    "Subscribed"
                );
                subscriptions.push(subscription);
            }
            Err(source) => {
                error!(subject = %subject, error = %source, "Subscribe failed");
                if let Err(e) = unsubscribe_all(subscriptions).await {
                    error!(error = %e, "Rollback after failed subscribe incomplete");
                }
                return Err(SdkError::Subscribe {
                    subject: subject.clone(),
                    source,
                });
            }
        }
    }

    Ok(subscriptions)
}

/// Unsubscribe everything, continuing past failures. Returns the first one.
pub async fn unsubscribe_all(subscriptions: Vec<Box<dyn Subscription>>) -> Result<()> {
    let mut first_error = None;

    for subscription in subscriptions {
        match subscription.unsubscribe().await {
            Ok(()) => info!(subject = %subscription.subject(), "Unsubscribed"),
            Err(source) => {
                error!(subject = %subscription.subject(), error = %source, "Unsubscribe failed");
                if first_error.is_none() {
                    first_error = Some(SdkError::Unsubscribe {
                        subject: subscription.subject().to_string(),
                        source,
                    });
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
