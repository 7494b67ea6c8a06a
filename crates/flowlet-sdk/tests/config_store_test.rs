// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scoped configuration lookup tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use flowlet_sdk::{ConfigStore, KeyValueBucket, KvError, MemoryBucket, NodeConfig, Scope, SdkError};

/// Bucket that counts reads and can be told to fail them.
struct ProbeBucket {
    inner: MemoryBucket,
    reads: AtomicUsize,
    broken: bool,
}

impl ProbeBucket {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBucket::new(name),
            reads: AtomicUsize::new(0),
            broken: false,
        })
    }

    fn broken(name: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBucket::new(name),
            reads: AtomicUsize::new(0),
            broken: true,
        })
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueBucket for ProbeBucket {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, key: &str) -> Result<String, KvError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(KvError::Backend {
                bucket: self.name().to_string(),
                message: "connection reset".to_string(),
            });
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<u64, KvError> {
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.inner.delete(key).await
    }
}

struct Tiers {
    global: Arc<ProbeBucket>,
    product: Arc<ProbeBucket>,
    workflow: Arc<ProbeBucket>,
    process: Arc<ProbeBucket>,
}

impl Tiers {
    fn healthy() -> Self {
        Self {
            global: ProbeBucket::new("config-global"),
            product: ProbeBucket::new("config-shop"),
            workflow: ProbeBucket::new("config-shop-checkout"),
            process: ProbeBucket::new("config-shop-checkout-scorer"),
        }
    }

    fn store(&self) -> ConfigStore {
        ConfigStore::new(
            self.global.clone(),
            self.product.clone(),
            self.workflow.clone(),
            self.process.clone(),
        )
    }
}

#[tokio::test]
async fn test_lookup_stops_at_first_hit() {
    let tiers = Tiers::healthy();
    let store = tiers.store();
    store
        .set_config("threshold", "0.7", Some(Scope::Workflow))
        .await
        .unwrap();

    assert_eq!(store.get_config("threshold", None).await.unwrap(), "0.7");

    assert_eq!(tiers.process.reads(), 1);
    assert_eq!(tiers.workflow.reads(), 1);
    assert_eq!(tiers.product.reads(), 0);
    assert_eq!(tiers.global.reads(), 0);
}

#[tokio::test]
async fn test_lookup_falls_through_to_global() {
    let tiers = Tiers::healthy();
    let store = tiers.store();
    store
        .set_config("region", "eu", Some(Scope::Global))
        .await
        .unwrap();

    assert_eq!(store.get_config("region", None).await.unwrap(), "eu");
    assert_eq!(tiers.global.reads(), 1);
}

#[tokio::test]
async fn test_miss_everywhere() {
    let tiers = Tiers::healthy();
    let err = tiers.store().get_config("absent", None).await.unwrap_err();

    assert!(matches!(
        err,
        SdkError::ConfigKeyNotFound { ref key, scope: None } if key == "absent"
    ));
    assert_eq!(tiers.global.reads(), 1);
}

#[tokio::test]
async fn test_transport_error_aborts_lookup() {
    let tiers = Tiers {
        workflow: ProbeBucket::broken("config-shop-checkout"),
        ..Tiers::healthy()
    };
    let store = tiers.store();
    store
        .set_config("threshold", "0.5", Some(Scope::Global))
        .await
        .unwrap();

    let err = store.get_config("threshold", None).await.unwrap_err();

    assert!(matches!(err, SdkError::Kv(KvError::Backend { .. })));
    assert!(!err.is_config_key_not_found());
    assert_eq!(tiers.process.reads(), 1);
    assert_eq!(tiers.workflow.reads(), 1);
    assert_eq!(tiers.product.reads(), 0);
    assert_eq!(tiers.global.reads(), 0);
}

#[tokio::test]
async fn test_explicit_scope_reads_one_tier() {
    let tiers = Tiers::healthy();
    let store = tiers.store();
    store.set_config("k", "global", Some(Scope::Global)).await.unwrap();

    let err = store.get_config("k", Some(Scope::Product)).await.unwrap_err();
    assert!(matches!(
        err,
        SdkError::ConfigKeyNotFound {
            scope: Some(Scope::Product),
            ..
        }
    ));
    assert_eq!(tiers.product.reads(), 1);
    assert_eq!(tiers.global.reads(), 0);
}

#[tokio::test]
async fn test_set_returns_increasing_revisions() {
    let store = Tiers::healthy().store();
    let first = store.set_config("k", "1", None).await.unwrap();
    let second = store.set_config("k", "2", None).await.unwrap();
    assert!(second > first);
    assert_eq!(store.get_config("k", Some(Scope::Process)).await.unwrap(), "2");
}

#[tokio::test]
async fn test_delete_then_fallback() {
    let store = Tiers::healthy().store();
    store.set_config("k", "process", None).await.unwrap();
    store.set_config("k", "global", Some(Scope::Global)).await.unwrap();

    store.delete_config("k", Scope::Process).await.unwrap();
    assert_eq!(store.get_config("k", None).await.unwrap(), "global");

    let err = store.delete_config("k", Scope::Process).await.unwrap_err();
    assert!(err.is_config_key_not_found());
}

#[tokio::test]
async fn test_in_memory_store_is_named_for_node() {
    let config = NodeConfig::new("scorer")
        .with_product("shop")
        .with_workflow("checkout");
    let store = ConfigStore::in_memory(&config);

    assert_eq!(store.bucket(Scope::Global).name(), "config-global");
    assert_eq!(
        store.bucket(Scope::Process).name(),
        "config-shop-checkout-scorer"
    );
}
