#![allow(dead_code)]

use chrono::{Days, NaiveDate};
use indicator_engine::adapters::memory_adapter::MemoryStore;
use indicator_engine::domain::engine::IndicatorEngine;
use indicator_engine::domain::error::EngineError;
pub use indicator_engine::domain::indicator::{
    CacheKey, CacheTier, Indicator, IndicatorId, IndicatorValue, OutputShape, StockId, TierScope,
    UserId, ValueMap, Visibility,
};
pub use indicator_engine::domain::price::PriceRow;
use indicator_engine::domain::sandbox::{
    ExecutionDetails, ExecutionFailure, SandboxRequest, SandboxResponse, SandboxValues,
};
use indicator_engine::ports::sandbox_port::Sandbox;
use indicator_engine::ports::store_port::{IndicatorRepository, PriceRepository, ValueRepository};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

pub const OWNER: UserId = 42;
pub const STRANGER: UserId = 99;
pub const STOCK: StockId = 3;

pub fn day(n: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .checked_add_days(Days::new(n))
        .unwrap()
}

/// `n` consecutive daily rows whose close is `base + i`.
pub fn price_series(n: u64, base: f64) -> Vec<PriceRow> {
    (0..n)
        .map(|i| {
            let close = base + i as f64;
            PriceRow::ohlcv(day(i), close - 0.5, close + 1.0, close - 1.0, close, 1_000 + i as i64)
        })
        .collect()
}

pub fn single_indicator(
    id: IndicatorId,
    column: &str,
    visibility: Visibility,
    owner_id: UserId,
) -> Indicator {
    Indicator {
        id,
        name: format!("indicator {id}"),
        code: format!("def calculate(data):\n    return data['close']  # {column}"),
        visibility,
        owner_id,
        dependencies: vec![],
        dependency_columns: vec![],
        output: OutputShape::Single {
            column: column.into(),
        },
        external_datasets: BTreeMap::new(),
    }
}

pub fn group_indicator(
    id: IndicatorId,
    name: &str,
    expected: &[&str],
    visibility: Visibility,
    owner_id: UserId,
) -> Indicator {
    Indicator {
        output: OutputShape::Group {
            name: name.into(),
            expected: expected.iter().map(|s| s.to_string()).collect(),
        },
        ..single_indicator(id, name, visibility, owner_id)
    }
}

pub fn with_dependencies(mut indicator: Indicator, deps: &[(IndicatorId, &str)]) -> Indicator {
    indicator.dependencies = deps.iter().map(|(id, _)| *id).collect();
    indicator.dependency_columns = deps.iter().map(|(_, c)| c.to_string()).collect();
    indicator
}

pub fn closes(request: &SandboxRequest) -> Vec<f64> {
    request.records.iter().map(|r| r.close).collect()
}

/// Trailing mean of `window` closes; `None` until the window is full.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            (i + 1 >= window)
                .then(|| values[i + 1 - window..=i].iter().sum::<f64>() / window as f64)
        })
        .collect()
}

type Script = dyn Fn(&SandboxRequest) -> Result<SandboxResponse, EngineError> + Send + Sync;

/// Sandbox that answers with a closure and remembers every request it saw.
pub struct ScriptedSandbox {
    script: Box<Script>,
    requests: Mutex<Vec<SandboxRequest>>,
}

impl ScriptedSandbox {
    pub fn new(
        script: impl Fn(&SandboxRequest) -> Result<SandboxResponse, EngineError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Returns `close` as the indicator value.
    pub fn echo_close() -> Self {
        Self::new(|req| {
            Ok(SandboxResponse::Success(SandboxValues::Series(
                closes(req).into_iter().map(Some).collect(),
            )))
        })
    }

    pub fn sma(window: usize) -> Self {
        Self::new(move |req| {
            Ok(SandboxResponse::Success(SandboxValues::Series(
                rolling_mean(&closes(req), window),
            )))
        })
    }

    /// Every named output is `close` scaled by the given factor.
    pub fn group(outputs: &[(&str, f64)]) -> Self {
        let outputs: Vec<(String, f64)> =
            outputs.iter().map(|(n, f)| (n.to_string(), *f)).collect();
        Self::new(move |req| {
            let close = closes(req);
            let named = outputs
                .iter()
                .map(|(name, factor)| {
                    (name.clone(), close.iter().map(|c| Some(c * factor)).collect())
                })
                .collect();
            Ok(SandboxResponse::Success(SandboxValues::Named(named)))
        })
    }

    pub fn failing(error_type: &str, message: &str) -> Self {
        let failure = ExecutionFailure {
            error: message.into(),
            error_type: error_type.into(),
            details: ExecutionDetails {
                message: message.into(),
                error_type: error_type.into(),
                code_line: Some("return data['close2']".into()),
                hints: vec!["Available columns: date, open, high, low, close, volume".into()],
                traceback: Some("Traceback (most recent call last): ...".into()),
                warnings: vec![],
            },
        };
        Self::new(move |_| Ok(SandboxResponse::Failure(failure.clone())))
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<SandboxRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl Sandbox for ScriptedSandbox {
    fn execute(&self, request: &SandboxRequest) -> Result<SandboxResponse, EngineError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.script)(request)
    }
}

pub fn seeded_store(indicators: Vec<Indicator>, rows: Vec<PriceRow>) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for indicator in indicators {
        store.put_indicator(indicator);
    }
    store.put_prices(STOCK, rows);
    store
}

pub fn engine(
    store: Arc<MemoryStore>,
    sandbox: ScriptedSandbox,
) -> IndicatorEngine<MemoryStore, ScriptedSandbox> {
    IndicatorEngine::new(store, sandbox)
}

pub fn scalar(value: f64) -> IndicatorValue {
    IndicatorValue::Scalar(Some(value))
}

/// Store whose replace deletes and then inserts row by row with no locking of
/// its own, so only the cache manager keeps readers from seeing a partial set.
pub struct SplitStore {
    pub inner: MemoryStore,
    values: Mutex<HashMap<CacheKey, ValueMap>>,
}

impl SplitStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            values: Mutex::new(HashMap::new()),
        }
    }
}

impl IndicatorRepository for SplitStore {
    fn find_indicator(&self, id: IndicatorId) -> Result<Option<Indicator>, EngineError> {
        self.inner.find_indicator(id)
    }
}

impl PriceRepository for SplitStore {
    fn stock_exists(&self, stock_id: StockId) -> Result<bool, EngineError> {
        self.inner.stock_exists(stock_id)
    }

    fn fetch_prices(
        &self,
        stock_id: StockId,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<PriceRow>, EngineError> {
        self.inner.fetch_prices(stock_id, start_date, end_date)
    }
}

impl ValueRepository for SplitStore {
    fn read_values(&self, key: &CacheKey) -> Result<ValueMap, EngineError> {
        Ok(self
            .values
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    fn replace_values(&self, key: &CacheKey, values: &ValueMap) -> Result<usize, EngineError> {
        self.values.lock().unwrap().remove(key);
        for (date, value) in values {
            std::thread::yield_now();
            self.values
                .lock()
                .unwrap()
                .entry(*key)
                .or_default()
                .insert(*date, value.clone());
        }
        Ok(values.len())
    }

    fn delete_values(
        &self,
        indicator_id: IndicatorId,
        stock_id: Option<StockId>,
        scope: TierScope,
    ) -> Result<usize, EngineError> {
        let mut values = self.values.lock().unwrap();
        let mut removed = 0;
        values.retain(|key, rows| {
            let tier_matches = match (key.tier, scope) {
                (CacheTier::Shared, TierScope::Shared) => true,
                (CacheTier::Private(_), TierScope::Private(None)) => true,
                (CacheTier::Private(owner), TierScope::Private(Some(user))) => owner == user,
                _ => false,
            };
            let matches = key.indicator_id == indicator_id
                && stock_id.is_none_or(|s| key.stock_id == s)
                && tier_matches;
            if matches {
                removed += rows.len();
            }
            !matches
        });
        Ok(removed)
    }
}
