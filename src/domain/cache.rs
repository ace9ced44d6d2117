//! Two-tier value cache with per-key reader/writer locking.
//!
//! Writers to one [`CacheKey`] are serialized and readers of that key wait for
//! an in-flight replace, so a read observes either the full old set or the
//! full new set even when the store performs delete and insert separately.
//! Keys never block each other.

use crate::domain::error::EngineError;
use crate::domain::indicator::{
    CacheKey, IndicatorId, OutputShape, StockId, TierScope, UserId, ValueMap,
};
use crate::ports::store_port::ValueRepository;
use dashmap::DashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Row counts removed by an invalidation, per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Invalidated {
    pub public_deleted: usize,
    pub private_deleted: usize,
}

pub struct CacheManager<R: ?Sized> {
    store: Arc<R>,
    locks: DashMap<CacheKey, Arc<RwLock<()>>>,
}

impl<R: ValueRepository + ?Sized> CacheManager<R> {
    pub fn new(store: Arc<R>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, key: &CacheKey) -> Arc<RwLock<()>> {
        self.locks.entry(*key).or_default().clone()
    }

    fn release(&self, key: &CacheKey) {
        // Only the map itself still holds the lock: nobody is waiting on it.
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn read(&self, key: &CacheKey) -> Result<ValueMap, EngineError> {
        let lock = self.lock_for(key);
        let result = {
            let _guard = lock.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            self.store.read_values(key)
        };
        drop(lock);
        self.release(key);
        result
    }

    /// Reads `key` as values of `shape`. A cached set written under another
    /// shape is stale and reads as empty.
    pub fn read_shaped(
        &self,
        key: &CacheKey,
        shape: &OutputShape,
    ) -> Result<ValueMap, EngineError> {
        let values = self.read(key)?;
        if values.values().all(|v| shape.accepts(v)) {
            return Ok(values);
        }
        warn!(
            %key,
            rows = values.len(),
            "cached values do not match the output shape; ignoring them"
        );
        Ok(ValueMap::new())
    }

    /// Atomically supersedes everything cached under `key` with `values`.
    pub fn replace(&self, key: &CacheKey, values: &ValueMap) -> Result<usize, EngineError> {
        let lock = self.lock_for(key);
        let result = {
            let _guard = lock.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            self.store.replace_values(key, values)
        };
        drop(lock);
        self.release(key);

        match result {
            Ok(rows) => {
                debug!(%key, rows, "replaced cached values");
                Ok(rows)
            }
            Err(e) => Err(EngineError::Persistence {
                reason: e.to_string(),
            }),
        }
    }

    /// Deletes cached rows for an indicator from the shared tier and the
    /// private tier, optionally narrowed to a stock and, on the private side,
    /// to one user.
    pub fn invalidate(
        &self,
        indicator_id: IndicatorId,
        stock_id: Option<StockId>,
        user_id: Option<UserId>,
    ) -> Result<Invalidated, EngineError> {
        let public_deleted = self
            .store
            .delete_values(indicator_id, stock_id, TierScope::Shared)?;
        let private_deleted =
            self.store
                .delete_values(indicator_id, stock_id, TierScope::Private(user_id))?;
        debug!(
            indicator = indicator_id,
            ?stock_id,
            ?user_id,
            public_deleted,
            private_deleted,
            "invalidated cached values"
        );
        Ok(Invalidated {
            public_deleted,
            private_deleted,
        })
    }

    /// Number of keys that currently have a lock entry.
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }
}
