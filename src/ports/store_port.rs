//! Persistence port traits: indicator definitions, price history, cached values.

use crate::domain::error::EngineError;
use crate::domain::indicator::{
    CacheKey, Indicator, IndicatorId, StockId, TierScope, ValueMap,
};
use crate::domain::price::PriceRow;
use chrono::NaiveDate;

pub trait IndicatorRepository {
    fn find_indicator(&self, id: IndicatorId) -> Result<Option<Indicator>, EngineError>;
}

pub trait PriceRepository {
    fn stock_exists(&self, stock_id: StockId) -> Result<bool, EngineError>;

    /// Rows ascending by date; both bounds inclusive, `None` is unbounded.
    fn fetch_prices(
        &self,
        stock_id: StockId,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<PriceRow>, EngineError>;
}

pub trait ValueRepository {
    fn read_values(&self, key: &CacheKey) -> Result<ValueMap, EngineError>;

    /// Removes every row stored under `key` and inserts `values` in their place.
    /// Returns the number of rows inserted.
    fn replace_values(&self, key: &CacheKey, values: &ValueMap) -> Result<usize, EngineError>;

    /// Deletes rows of one indicator, optionally narrowed to a stock.
    /// Returns the number of rows removed.
    fn delete_values(
        &self,
        indicator_id: IndicatorId,
        stock_id: Option<StockId>,
        scope: TierScope,
    ) -> Result<usize, EngineError>;
}

/// Everything the engine needs from the metadata store.
pub trait Store: IndicatorRepository + PriceRepository + ValueRepository {}

impl<T: IndicatorRepository + PriceRepository + ValueRepository> Store for T {}
