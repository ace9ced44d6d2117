//! In-process store for tests and embedders that keep everything in memory.

use crate::domain::error::EngineError;
use crate::domain::indicator::{
    CacheKey, CacheTier, Indicator, IndicatorId, StockId, TierScope, ValueMap,
};
use crate::domain::price::PriceRow;
use crate::ports::store_port::{IndicatorRepository, PriceRepository, ValueRepository};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Tables {
    indicators: HashMap<IndicatorId, Indicator>,
    prices: HashMap<StockId, Vec<PriceRow>>,
    values: HashMap<CacheKey, ValueMap>,
}

/// All tables behind one lock, so a replace is atomic for every reader.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, EngineError> {
        self.tables.read().map_err(|e| EngineError::Database {
            reason: e.to_string(),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, EngineError> {
        self.tables.write().map_err(|e| EngineError::Database {
            reason: e.to_string(),
        })
    }

    fn write_unchecked(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn put_indicator(&self, indicator: Indicator) {
        self.write_unchecked()
            .indicators
            .insert(indicator.id, indicator);
    }

    /// Registers a stock with its price history, replacing any earlier rows.
    pub fn put_prices(&self, stock_id: StockId, mut rows: Vec<PriceRow>) {
        rows.sort_by_key(|r| r.date);
        self.write_unchecked().prices.insert(stock_id, rows);
    }
}

impl IndicatorRepository for MemoryStore {
    fn find_indicator(&self, id: IndicatorId) -> Result<Option<Indicator>, EngineError> {
        Ok(self.read()?.indicators.get(&id).cloned())
    }
}

impl PriceRepository for MemoryStore {
    fn stock_exists(&self, stock_id: StockId) -> Result<bool, EngineError> {
        Ok(self.read()?.prices.contains_key(&stock_id))
    }

    fn fetch_prices(
        &self,
        stock_id: StockId,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<PriceRow>, EngineError> {
        Ok(self
            .read()?
            .prices
            .get(&stock_id)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.in_range(start_date, end_date))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn in_scope(tier: CacheTier, scope: TierScope) -> bool {
    match (tier, scope) {
        (CacheTier::Shared, TierScope::Shared) => true,
        (CacheTier::Private(_), TierScope::Private(None)) => true,
        (CacheTier::Private(owner), TierScope::Private(Some(user))) => owner == user,
        _ => false,
    }
}

impl ValueRepository for MemoryStore {
    fn read_values(&self, key: &CacheKey) -> Result<ValueMap, EngineError> {
        Ok(self.read()?.values.get(key).cloned().unwrap_or_default())
    }

    fn replace_values(&self, key: &CacheKey, values: &ValueMap) -> Result<usize, EngineError> {
        let mut tables = self.write()?;
        if values.is_empty() {
            tables.values.remove(key);
        } else {
            tables.values.insert(*key, values.clone());
        }
        Ok(values.len())
    }

    fn delete_values(
        &self,
        indicator_id: IndicatorId,
        stock_id: Option<StockId>,
        scope: TierScope,
    ) -> Result<usize, EngineError> {
        let mut tables = self.write()?;
        let mut removed = 0;
        tables.values.retain(|key, values| {
            let matches = key.indicator_id == indicator_id
                && stock_id.is_none_or(|s| key.stock_id == s)
                && in_scope(key.tier, scope);
            if matches {
                removed += values.len();
            }
            !matches
        });
        Ok(removed)
    }
}
