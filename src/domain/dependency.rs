//! Dependency resolution: loads each direct dependency and its cached values.
//!
//! Only values that are already cached are used. A dependency that was never
//! computed for the stock is not computed here; [`DependencyPolicy`] decides
//! whether that is tolerated or rejected.

use crate::domain::assembler::{PRICE_FIELDS, group_field_name};
use crate::domain::cache::CacheManager;
use crate::domain::error::EngineError;
use crate::domain::indicator::{
    CacheKey, Indicator, IndicatorId, OutputShape, StockId, UserId, ValueMap,
};
use crate::domain::registry;
use crate::ports::store_port::{IndicatorRepository, ValueRepository};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DependencyPolicy {
    /// Compute with whatever is cached; uncached dependencies become absent fields.
    #[default]
    UseCached,
    /// Refuse to compute while any dependency has no cached values for the stock.
    RequireCached,
}

impl FromStr for DependencyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "use_cached" => Ok(DependencyPolicy::UseCached),
            "require_cached" => Ok(DependencyPolicy::RequireCached),
            other => Err(format!(
                "unknown dependency policy '{other}' (expected use_cached or require_cached)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDependency {
    pub id: IndicatorId,
    /// Record field for a scalar dependency, or the prefix for a group's sub-outputs.
    pub field_name: String,
    pub values: ValueMap,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub dependencies: Vec<ResolvedDependency>,
    /// Dependencies that had no cached values for the stock.
    pub missing: Vec<IndicatorId>,
}

fn field_name(target: &Indicator, position: usize, dependency: &Indicator) -> String {
    match &dependency.output {
        OutputShape::Group { name, .. } => name.clone(),
        OutputShape::Single { column } => target
            .dependency_columns
            .get(position)
            .filter(|c| !c.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| column.clone()),
    }
}

/// Record fields a dependency adds under `field_name`.
fn exposed_fields(dependency: &Indicator, field_name: &str) -> Vec<String> {
    match &dependency.output {
        OutputShape::Single { .. } => vec![field_name.to_string()],
        OutputShape::Group { expected, .. } => expected
            .iter()
            .map(|sub| group_field_name(field_name, sub))
            .collect(),
    }
}

pub fn resolve<R>(
    indicators: &dyn IndicatorRepository,
    cache: &CacheManager<R>,
    target: &Indicator,
    stock_id: StockId,
    requester_id: UserId,
    policy: DependencyPolicy,
) -> Result<Resolution, EngineError>
where
    R: ValueRepository + ?Sized,
{
    let mut resolution = Resolution::default();
    let mut taken: HashSet<String> = PRICE_FIELDS.iter().map(|f| f.to_string()).collect();

    for (position, &dep_id) in target.dependencies.iter().enumerate() {
        let dependency = registry::load_authorized(indicators, dep_id, requester_id)?;
        let field_name = field_name(target, position, &dependency);
        for field in exposed_fields(&dependency, &field_name) {
            if !taken.insert(field.clone()) {
                return Err(EngineError::InvalidIndicator {
                    id: target.id,
                    reason: format!("dependency {dep_id} field '{field}' is already in use"),
                });
            }
        }

        let key = CacheKey::for_indicator(&dependency, stock_id);
        let values = cache.read_shaped(&key, &dependency.output)?;

        if values.is_empty() {
            if policy == DependencyPolicy::RequireCached {
                return Err(EngineError::MissingDependency {
                    dependency_id: dep_id,
                    stock_id,
                });
            }
            warn!(
                indicator = target.id,
                dependency = dep_id,
                stock = stock_id,
                "dependency has no cached values; computing without it"
            );
            resolution.missing.push(dep_id);
        } else {
            debug!(dependency = dep_id, rows = values.len(), "loaded dependency values");
        }

        resolution.dependencies.push(ResolvedDependency {
            id: dep_id,
            field_name,
            values,
        });
    }

    Ok(resolution)
}
