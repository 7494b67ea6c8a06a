// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Key-value bucket abstraction backing the scoped configuration store.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryBucket;

/// Errors reported by a key-value bucket.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KvError {
    /// Key does not exist in the bucket
    #[error("key '{0}' not found")]
    NotFound(String),

    /// Any other bucket failure (transport, permissions, ...)
    #[error("bucket '{bucket}' failed: {message}")]
    Backend { bucket: String, message: String },
}

/// A string-keyed, string-valued bucket.
#[async_trait]
pub trait KeyValueBucket: Send + Sync {
    /// Bucket name.
    fn name(&self) -> &str;

    /// Read a value; `KvError::NotFound` when the key is absent.
    async fn get(&self, key: &str) -> Result<String, KvError>;

    /// Write a value, returning the new revision.
    async fn put(&self, key: &str, value: &str) -> Result<u64, KvError>;

    /// Delete a key; `KvError::NotFound` when the key is absent.
    async fn delete(&self, key: &str) -> Result<(), KvError>;
}
