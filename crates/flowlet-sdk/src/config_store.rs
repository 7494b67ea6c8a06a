// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scoped configuration store.
//!
//! Four independent buckets hold configuration at increasing specificity.
//! A lookup without an explicit scope walks them from most to least
//! specific and returns the first hit:
//!
//! ```text
//! process  ->  workflow  ->  product  ->  global
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::config::NodeConfig;
use crate::error::{Result, SdkError};
use crate::kv::{KeyValueBucket, KvError, MemoryBucket};

/// Configuration tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Product,
    Workflow,
    Process,
}

impl Scope {
    /// Tiers in lookup order, most specific first.
    pub const LOOKUP_ORDER: [Scope; 4] =
        [Scope::Process, Scope::Workflow, Scope::Product, Scope::Global];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Product => "product",
            Scope::Workflow => "workflow",
            Scope::Process => "process",
        }
    }

    /// Name of the bucket holding this tier for the given node.
    pub fn bucket_name(&self, config: &NodeConfig) -> String {
        let name = match self {
            Scope::Global => "config-global".to_string(),
            Scope::Product => format!("config-{}", config.product),
            Scope::Workflow => format!("config-{}-{}", config.product, config.workflow),
            Scope::Process => format!(
                "config-{}-{}-{}",
                config.product, config.workflow, config.process_name
            ),
        };
        name.replace(['.', ' '], "-")
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "global" => Ok(Scope::Global),
            "product" => Ok(Scope::Product),
            "workflow" => Ok(Scope::Workflow),
            "process" => Ok(Scope::Process),
            other => Err(SdkError::Config(format!("unknown config scope '{}'", other))),
        }
    }
}

/// Four-tier key-value configuration.
#[derive(Clone)]
pub struct ConfigStore {
    global: Arc<dyn KeyValueBucket>,
    product: Arc<dyn KeyValueBucket>,
    workflow: Arc<dyn KeyValueBucket>,
    process: Arc<dyn KeyValueBucket>,
}

impl ConfigStore {
    /// Create a store over the four tier buckets.
    pub fn new(
        global: Arc<dyn KeyValueBucket>,
        product: Arc<dyn KeyValueBucket>,
        workflow: Arc<dyn KeyValueBucket>,
        process: Arc<dyn KeyValueBucket>,
    ) -> Self {
        Self {
            global,
            product,
            workflow,
            process,
        }
    }

    /// Create a store backed by fresh in-memory buckets named for the node.
    pub fn in_memory(config: &NodeConfig) -> Self {
        let bucket = |scope: Scope| -> Arc<dyn KeyValueBucket> {
            Arc::new(MemoryBucket::new(scope.bucket_name(config)))
        };
        Self::new(
            bucket(Scope::Global),
            bucket(Scope::Product),
            bucket(Scope::Workflow),
            bucket(Scope::Process),
        )
    }

    pub fn bucket(&self, scope: Scope) -> &Arc<dyn KeyValueBucket> {
        match scope {
            Scope::Global => &self.global,
            Scope::Product => &self.product,
            Scope::Workflow => &self.workflow,
            Scope::Process => &self.process,
        }
    }

    /// Read a configuration value.
    ///
    /// With an explicit scope only that tier is read. Without one, tiers are
    /// tried most specific first; the first hit wins and any error other
    /// than a missing key stops the walk.
    #[instrument(skip(self))]
    pub async fn get_config(&self, key: &str, scope: Option<Scope>) -> Result<String> {
        if let Some(scope) = scope {
            return self
                .bucket(scope)
                .get(key)
                .await
                .map_err(|e| not_found_or(e, key, Some(scope)));
        }

        for scope in Scope::LOOKUP_ORDER {
            match self.bucket(scope).get(key).await {
                Ok(value) => {
                    debug!(%scope, "Config key resolved");
                    return Ok(value);
                }
                Err(KvError::NotFound(_)) => continue,
                Err(e) => return Err(SdkError::Kv(e)),
            }
        }

        Err(SdkError::ConfigKeyNotFound {
            key: key.to_string(),
            scope: None,
        })
    }

    /// Write a configuration value (default scope: process).
    #[instrument(skip(self, value))]
    pub async fn set_config(&self, key: &str, value: &str, scope: Option<Scope>) -> Result<u64> {
        let scope = scope.unwrap_or(Scope::Process);
        let revision = self.bucket(scope).put(key, value).await?;
        debug!(%scope, revision, "Config key written");
        Ok(revision)
    }

    /// Delete a configuration value from one tier.
    #[instrument(skip(self))]
    pub async fn delete_config(&self, key: &str, scope: Scope) -> Result<()> {
        self.bucket(scope)
            .delete(key)
            .await
            .map_err(|e| not_found_or(e, key, Some(scope)))
    }
}

fn not_found_or(err: KvError, key: &str, scope: Option<Scope>) -> SdkError {
    match err {
        KvError::NotFound(_) => SdkError::ConfigKeyNotFound {
            key: key.to_string(),
            scope,
        },
        other => SdkError::Kv(other),
    }
}
