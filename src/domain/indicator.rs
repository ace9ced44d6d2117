//! Indicator definitions, cached value shapes and cache tier selection.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type IndicatorId = i64;
pub type StockId = i64;
pub type UserId = i64;

/// Cached values for one (indicator, stock) key, ordered by date.
pub type ValueMap = BTreeMap<NaiveDate, IndicatorValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Visibility {
    Private,
    Public,
    Unlisted,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Private => f.write_str("PRIVATE"),
            Visibility::Public => f.write_str("PUBLIC"),
            Visibility::Unlisted => f.write_str("UNLISTED"),
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PRIVATE" => Ok(Visibility::Private),
            "PUBLIC" => Ok(Visibility::Public),
            "UNLISTED" => Ok(Visibility::Unlisted),
            other => Err(format!("unknown visibility '{other}'")),
        }
    }
}

/// What an indicator produces: one named column, or a named group of sub-columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputShape {
    Single { column: String },
    Group { name: String, expected: Vec<String> },
}

impl OutputShape {
    /// Builds the shape from the flat columns a store row carries.
    ///
    /// Exactly one of `output_column` or `is_group` must be set, and a group
    /// needs a name and a non-empty expected output set.
    pub fn from_columns(
        output_column: Option<String>,
        is_group: bool,
        group_name: Option<String>,
        expected_outputs: Vec<String>,
    ) -> Result<Self, String> {
        let output_column = output_column.filter(|c| !c.trim().is_empty());
        match (output_column, is_group) {
            (Some(_), true) => Err("indicator is both single-output and group-output".into()),
            (None, false) => Err("indicator has neither an output column nor a group".into()),
            (Some(column), false) => Ok(OutputShape::Single { column }),
            (None, true) => {
                let name = group_name
                    .filter(|n| !n.trim().is_empty())
                    .ok_or_else(|| "group indicator has no group name".to_string())?;
                if expected_outputs.is_empty() {
                    return Err("group indicator has no expected outputs".into());
                }
                Ok(OutputShape::Group {
                    name,
                    expected: expected_outputs,
                })
            }
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, OutputShape::Group { .. })
    }

    /// Whether a cached value has the form this shape produces: a scalar for
    /// single output, exactly the expected sub-outputs for a group.
    pub fn accepts(&self, value: &IndicatorValue) -> bool {
        match (self, value) {
            (OutputShape::Single { .. }, IndicatorValue::Scalar(_)) => true,
            (OutputShape::Group { expected, .. }, IndicatorValue::Group(sub)) => {
                sub.len() == expected.len() && expected.iter().all(|e| sub.contains_key(e))
            }
            _ => false,
        }
    }
}

/// A dataset the sandbox joins onto the records by date; opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalDataset {
    pub group_id: String,
    pub dataset_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Indicator {
    pub id: IndicatorId,
    pub name: String,
    pub code: String,
    pub visibility: Visibility,
    pub owner_id: UserId,
    pub dependencies: Vec<IndicatorId>,
    /// Column names the dependencies are exposed under, aligned with `dependencies`.
    pub dependency_columns: Vec<String>,
    pub output: OutputShape,
    pub external_datasets: BTreeMap<String, ExternalDataset>,
}

impl Indicator {
    pub fn is_group(&self) -> bool {
        self.output.is_group()
    }

    pub fn tier(&self) -> CacheTier {
        CacheTier::for_indicator(self)
    }
}

/// One cached value: a scalar for single-output indicators, named sub-values for groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndicatorValue {
    #[serde(rename = "value")]
    Scalar(Option<f64>),
    #[serde(rename = "groupValues")]
    Group(BTreeMap<String, Option<f64>>),
}

/// Which cache partition an indicator's values live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    Shared,
    Private(UserId),
}

impl CacheTier {
    pub fn for_indicator(indicator: &Indicator) -> Self {
        match indicator.visibility {
            Visibility::Public => CacheTier::Shared,
            Visibility::Private | Visibility::Unlisted => CacheTier::Private(indicator.owner_id),
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Shared => f.write_str("shared"),
            CacheTier::Private(user) => write!(f, "private:{user}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub indicator_id: IndicatorId,
    pub stock_id: StockId,
    pub tier: CacheTier,
}

impl CacheKey {
    pub fn for_indicator(indicator: &Indicator, stock_id: StockId) -> Self {
        Self {
            indicator_id: indicator.id,
            stock_id,
            tier: indicator.tier(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "indicator={} stock={} tier={}",
            self.indicator_id, self.stock_id, self.tier
        )
    }
}

/// Which private rows an invalidation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierScope {
    Shared,
    /// Private rows of one user, or of every user when `None`.
    Private(Option<UserId>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indicator(visibility: Visibility) -> Indicator {
        Indicator {
            id: 7,
            name: "SMA 10".into(),
            code: "def calculate(data): ...".into(),
            visibility,
            owner_id: 42,
            dependencies: vec![],
            dependency_columns: vec![],
            output: OutputShape::Single {
                column: "sma10".into(),
            },
            external_datasets: BTreeMap::new(),
        }
    }

    #[test]
    fn tier_follows_visibility() {
        assert_eq!(indicator(Visibility::Public).tier(), CacheTier::Shared);
        assert_eq!(indicator(Visibility::Private).tier(), CacheTier::Private(42));
        assert_eq!(indicator(Visibility::Unlisted).tier(), CacheTier::Private(42));
    }

    #[test]
    fn visibility_parses_case_insensitively() {
        assert_eq!("public".parse::<Visibility>(), Ok(Visibility::Public));
        assert_eq!(" Unlisted ".parse::<Visibility>(), Ok(Visibility::Unlisted));
        assert!("secret".parse::<Visibility>().is_err());
        assert_eq!(Visibility::Private.to_string(), "PRIVATE");
    }

    #[test]
    fn output_shape_rejects_both_and_neither() {
        assert!(OutputShape::from_columns(Some("sma".into()), true, Some("g".into()), vec![
            "a".into()
        ])
        .is_err());
        assert!(OutputShape::from_columns(None, false, None, vec![]).is_err());
        assert!(OutputShape::from_columns(Some("  ".into()), false, None, vec![]).is_err());
    }

    #[test]
    fn output_shape_group_requires_name_and_outputs() {
        assert!(OutputShape::from_columns(None, true, None, vec!["a".into()]).is_err());
        assert!(OutputShape::from_columns(None, true, Some("boll".into()), vec![]).is_err());

        let shape = OutputShape::from_columns(
            None,
            true,
            Some("boll".into()),
            vec!["upper".into(), "lower".into()],
        )
        .unwrap();
        assert!(shape.is_group());
    }

    #[test]
    fn value_serializes_with_store_field_names() {
        let scalar = serde_json::to_value(IndicatorValue::Scalar(Some(1.5))).unwrap();
        assert_eq!(scalar, serde_json::json!({ "value": 1.5 }));

        let mut sub = BTreeMap::new();
        sub.insert("upper".to_string(), None);
        let group = serde_json::to_value(IndicatorValue::Group(sub)).unwrap();
        assert_eq!(group, serde_json::json!({ "groupValues": { "upper": null } }));
    }

    #[test]
    fn cache_key_display() {
        let key = CacheKey::for_indicator(&indicator(Visibility::Private), 3);
        assert_eq!(key.to_string(), "indicator=7 stock=3 tier=private:42");
    }
}
