//! Public entry point: sequences authorization, price loading, dependency
//! resolution, record assembly, sandbox execution, validation and caching.
//!
//! Failures never escape as `Err`; every operation returns a result record
//! with a `success` flag (or an attached [`ErrorReport`]).

use crate::domain::assembler;
use crate::domain::cache::CacheManager;
use crate::domain::dependency::{self, DependencyPolicy};
use crate::domain::error::{EngineError, ErrorReport};
use crate::domain::indicator::{
    CacheKey, Indicator, IndicatorId, IndicatorValue, StockId, UserId, ValueMap,
};
use crate::domain::registry;
use crate::domain::sandbox::{SandboxRequest, SandboxResponse};
use crate::domain::validator;
use crate::ports::sandbox_port::Sandbox;
use crate::ports::store_port::Store;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComputeOptions {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValuesOptions {
    pub auto_compute: bool,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeResult {
    pub indicator_id: IndicatorId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_computed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_rows: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_dependencies: Vec<IndicatorId>,
    #[serde(flatten)]
    pub failure: Option<ErrorReport>,
}

impl ComputeResult {
    fn failed(indicator_id: IndicatorId, err: &EngineError) -> Self {
        Self {
            indicator_id,
            success: false,
            rows_computed: None,
            cached_rows: None,
            missing_dependencies: Vec::new(),
            failure: Some(ErrorReport::from(err)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatedValue {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub value: IndicatorValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValuesResult {
    pub values: Vec<DatedValue>,
    pub computed: bool,
    #[serde(flatten)]
    pub failure: Option<ErrorReport>,
}

impl ValuesResult {
    fn from_map(values: ValueMap, computed: bool) -> Self {
        Self {
            values: values
                .into_iter()
                .map(|(date, value)| DatedValue { date, value })
                .collect(),
            computed,
            failure: None,
        }
    }

    fn failed(failure: ErrorReport) -> Self {
        Self {
            values: Vec::new(),
            computed: false,
            failure: Some(failure),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearResult {
    pub public_deleted: usize,
    pub private_deleted: usize,
    #[serde(flatten)]
    pub failure: Option<ErrorReport>,
}

pub struct IndicatorEngine<S, X> {
    store: Arc<S>,
    sandbox: X,
    cache: CacheManager<S>,
    policy: DependencyPolicy,
}

impl<S: Store, X: Sandbox> IndicatorEngine<S, X> {
    pub fn new(store: Arc<S>, sandbox: X) -> Self {
        Self {
            cache: CacheManager::new(store.clone()),
            store,
            sandbox,
            policy: DependencyPolicy::default(),
        }
    }

    pub fn with_dependency_policy(mut self, policy: DependencyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn sandbox(&self) -> &X {
        &self.sandbox
    }

    pub fn cache(&self) -> &CacheManager<S> {
        &self.cache
    }

    pub fn compute_indicator(
        &self,
        indicator_id: IndicatorId,
        stock_id: StockId,
        requester_id: UserId,
        options: ComputeOptions,
    ) -> ComputeResult {
        info!(
            indicator = indicator_id,
            stock = stock_id,
            requester = requester_id,
            "computing indicator"
        );
        match self.try_compute(indicator_id, stock_id, requester_id, options) {
            Ok(result) => {
                info!(
                    indicator = indicator_id,
                    stock = stock_id,
                    rows = result.rows_computed,
                    cached = result.cached_rows,
                    "indicator computed"
                );
                result
            }
            Err(e) => {
                match &e {
                    EngineError::Persistence { .. } => {
                        error!(indicator = indicator_id, stock = stock_id, "compute failed: {e}")
                    }
                    _ => warn!(indicator = indicator_id, stock = stock_id, "compute failed: {e}"),
                }
                ComputeResult::failed(indicator_id, &e)
            }
        }
    }

    fn try_compute(
        &self,
        indicator_id: IndicatorId,
        stock_id: StockId,
        requester_id: UserId,
        options: ComputeOptions,
    ) -> Result<ComputeResult, EngineError> {
        let indicator = registry::load_authorized(self.store.as_ref(), indicator_id, requester_id)?;

        if !self.store.stock_exists(stock_id)? {
            return Err(EngineError::StockNotFound { id: stock_id });
        }
        let prices = self
            .store
            .fetch_prices(stock_id, options.start_date, options.end_date)?;
        if prices.is_empty() {
            return Err(EngineError::NoData { stock_id });
        }

        let resolution = dependency::resolve(
            self.store.as_ref(),
            &self.cache,
            &indicator,
            stock_id,
            requester_id,
            self.policy,
        )?;

        let records = assembler::assemble(&prices, &resolution.dependencies);
        let dates: Vec<NaiveDate> = records.iter().map(|r| r.date).collect();
        tracing::debug!(
            indicator = indicator.id,
            records = records.len(),
            dependencies = resolution.dependencies.len(),
            "assembled sandbox records"
        );

        let request = SandboxRequest {
            code: indicator.code.clone(),
            records,
            is_group: indicator.is_group(),
            external_datasets: indicator.external_datasets.clone(),
        };
        let outputs = match self.sandbox.execute(&request)? {
            SandboxResponse::Success(values) => values,
            SandboxResponse::Failure(failure) => return Err(EngineError::Execution(failure)),
        };

        let values = validator::validate(&indicator.output, &dates, outputs)?;
        let key = CacheKey::for_indicator(&indicator, stock_id);
        let cached_rows = self.cache.replace(&key, &values)?;

        Ok(ComputeResult {
            indicator_id: indicator.id,
            success: true,
            rows_computed: Some(dates.len()),
            cached_rows: Some(cached_rows),
            missing_dependencies: resolution.missing,
            failure: None,
        })
    }

    /// Computes each indicator in the order given. Dependencies among the
    /// requested ids are not inferred; pass dependencies first.
    pub fn compute_indicators(
        &self,
        indicator_ids: &[IndicatorId],
        stock_id: StockId,
        requester_id: UserId,
        options: ComputeOptions,
    ) -> Vec<ComputeResult> {
        indicator_ids
            .iter()
            .map(|&id| self.compute_indicator(id, stock_id, requester_id, options))
            .collect()
    }

    pub fn get_indicator_values(
        &self,
        indicator_id: IndicatorId,
        stock_id: StockId,
        requester_id: UserId,
        options: ValuesOptions,
    ) -> ValuesResult {
        match self.try_values(indicator_id, stock_id, requester_id, options) {
            Ok(result) => result,
            Err(e) => {
                warn!(indicator = indicator_id, stock = stock_id, "value lookup failed: {e}");
                ValuesResult::failed(ErrorReport::from(&e))
            }
        }
    }

    fn read_in_range(
        &self,
        indicator: &Indicator,
        key: &CacheKey,
        options: &ValuesOptions,
    ) -> Result<ValueMap, EngineError> {
        let mut values = self.cache.read_shaped(key, &indicator.output)?;
        values.retain(|date, _| {
            options.start_date.is_none_or(|s| *date >= s)
                && options.end_date.is_none_or(|e| *date <= e)
        });
        Ok(values)
    }

    fn try_values(
        &self,
        indicator_id: IndicatorId,
        stock_id: StockId,
        requester_id: UserId,
        options: ValuesOptions,
    ) -> Result<ValuesResult, EngineError> {
        let indicator = registry::load_authorized(self.store.as_ref(), indicator_id, requester_id)?;
        let key = CacheKey::for_indicator(&indicator, stock_id);

        let cached = self.read_in_range(&indicator, &key, &options)?;
        if !cached.is_empty() || !options.auto_compute {
            return Ok(ValuesResult::from_map(cached, false));
        }

        // Full history: a compute replaces the whole key.
        let computed =
            self.compute_indicator(indicator_id, stock_id, requester_id, ComputeOptions::default());
        if let Some(failure) = computed.failure {
            return Ok(ValuesResult::failed(failure));
        }

        let values = self.read_in_range(&indicator, &key, &options)?;
        Ok(ValuesResult::from_map(values, true))
    }

    /// Drops cached values of an indicator. With a requester, only that
    /// user's private rows are removed, and the requester must be allowed to
    /// use the indicator.
    pub fn clear_indicator_cache(
        &self,
        indicator_id: IndicatorId,
        stock_id: Option<StockId>,
        requester_id: Option<UserId>,
    ) -> ClearResult {
        let outcome = registry::load_indicator(self.store.as_ref(), indicator_id)
            .and_then(|indicator| match requester_id {
                Some(requester) => registry::authorize(&indicator, requester),
                None => Ok(()),
            })
            .and_then(|()| self.cache.invalidate(indicator_id, stock_id, requester_id));

        match outcome {
            Ok(removed) => {
                info!(
                    indicator = indicator_id,
                    public = removed.public_deleted,
                    private = removed.private_deleted,
                    "cleared indicator cache"
                );
                ClearResult {
                    public_deleted: removed.public_deleted,
                    private_deleted: removed.private_deleted,
                    failure: None,
                }
            }
            Err(e) => {
                warn!(indicator = indicator_id, "cache clear failed: {e}");
                ClearResult {
                    public_deleted: 0,
                    private_deleted: 0,
                    failure: Some(ErrorReport::from(&e)),
                }
            }
        }
    }
}
