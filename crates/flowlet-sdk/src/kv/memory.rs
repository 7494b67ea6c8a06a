// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory key-value bucket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{KeyValueBucket, KvError};

/// In-memory bucket with a monotonically increasing revision counter.
pub struct MemoryBucket {
    name: String,
    entries: Mutex<HashMap<String, String>>,
    revision: AtomicU64,
}

impl MemoryBucket {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(HashMap::new()),
            revision: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueBucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<String, KvError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| KvError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, value: &str) -> Result<u64, KvError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(self.revision.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.remove(key) {
            Some(_) => {
                self.revision.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(KvError::NotFound(key.to_string())),
        }
    }
}
