//! Shared, versioned store of the latest result per probe kind
//!
//! One `RwLock` guards the whole map. Writes replace a kind's entry as a
//! whole and bump a store-wide version, so readers either see the previous
//! result or the new one.

use crate::error::{AppError, Result};
use crate::models::ProbeResult;
use crate::types::ProbeKind;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct StoreInner {
    entries: BTreeMap<ProbeKind, ProbeResult>,
    version: u64,
}

/// Consistent copy of every entry at one store version
#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    pub version: u64,
    pub entries: BTreeMap<ProbeKind, ProbeResult>,
}

impl StoreSnapshot {
    pub fn get(&self, kind: ProbeKind) -> Option<&ProbeResult> {
        self.entries.get(&kind)
    }
}

/// Handle to the shared store; clones point at the same map
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest result for `kind`, if any
    pub async fn get(&self, kind: ProbeKind) -> Option<ProbeResult> {
        self.inner.read().await.entries.get(&kind).cloned()
    }

    /// Atomically replace the entry for `kind`
    ///
    /// Returns the version assigned to the write. Results that do not match
    /// the key or are internally inconsistent are rejected.
    pub async fn set(&self, kind: ProbeKind, mut result: ProbeResult) -> Result<u64> {
        if result.kind != kind {
            return Err(AppError::validation(format!(
                "Result of kind {} cannot be stored under {}",
                result.kind, kind
            )));
        }
        result.validate()?;

        let mut inner = self.inner.write().await;
        inner.version += 1;
        result.version = inner.version;
        let version = inner.version;
        inner.entries.insert(kind, result);
        Ok(version)
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.read().await;
        StoreSnapshot {
            version: inner.version,
            entries: inner.entries.clone(),
        }
    }

    pub async fn version(&self) -> u64 {
        self.inner.read().await.version
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }
}
