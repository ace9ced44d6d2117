//! Column encoding shared by the SQL store adapters.

use crate::domain::error::EngineError;
use crate::domain::indicator::{
    ExternalDataset, Indicator, IndicatorId, IndicatorValue, OutputShape,
};
use std::collections::BTreeMap;

fn json_err(e: serde_json::Error) -> EngineError {
    EngineError::Database {
        reason: e.to_string(),
    }
}

/// Splits a value into the `value` / `group_values` column pair.
pub fn encode_value(
    value: &IndicatorValue,
) -> Result<(Option<f64>, Option<String>), EngineError> {
    match value {
        IndicatorValue::Scalar(v) => Ok((*v, None)),
        IndicatorValue::Group(sub) => {
            let json = serde_json::to_string(sub).map_err(json_err)?;
            Ok((None, Some(json)))
        }
    }
}

/// Inverse of [`encode_value`]: a non-null `group_values` column marks a group value.
pub fn decode_value(
    value: Option<f64>,
    group_values: Option<String>,
) -> Result<IndicatorValue, EngineError> {
    match group_values {
        Some(json) => Ok(IndicatorValue::Group(
            serde_json::from_str(&json).map_err(json_err)?,
        )),
        None => Ok(IndicatorValue::Scalar(value)),
    }
}

/// Flat column values of an `indicators` row, before shape validation.
pub struct IndicatorRow {
    pub id: IndicatorId,
    pub name: String,
    pub code: String,
    pub visibility: String,
    pub owner_id: i64,
    pub dependencies: String,
    pub dependency_columns: String,
    pub output_column: Option<String>,
    pub is_group: bool,
    pub group_name: Option<String>,
    pub expected_outputs: String,
    pub external_datasets: String,
}

impl IndicatorRow {
    pub fn from_indicator(indicator: &Indicator) -> Result<Self, EngineError> {
        let (output_column, group_name, expected) = match &indicator.output {
            OutputShape::Single { column } => (Some(column.clone()), None, Vec::new()),
            OutputShape::Group { name, expected } => (None, Some(name.clone()), expected.clone()),
        };
        Ok(Self {
            id: indicator.id,
            name: indicator.name.clone(),
            code: indicator.code.clone(),
            visibility: indicator.visibility.to_string(),
            owner_id: indicator.owner_id,
            dependencies: serde_json::to_string(&indicator.dependencies).map_err(json_err)?,
            dependency_columns: serde_json::to_string(&indicator.dependency_columns)
                .map_err(json_err)?,
            output_column,
            is_group: indicator.is_group(),
            group_name,
            expected_outputs: serde_json::to_string(&expected).map_err(json_err)?,
            external_datasets: serde_json::to_string(&indicator.external_datasets)
                .map_err(json_err)?,
        })
    }

    pub fn into_indicator(self) -> Result<Indicator, EngineError> {
        let id = self.id;
        let invalid = |reason: String| EngineError::InvalidIndicator { id, reason };

        let visibility = self.visibility.parse().map_err(invalid)?;
        let expected: Vec<String> = serde_json::from_str(&self.expected_outputs)
            .map_err(|e| invalid(format!("expected_outputs: {e}")))?;
        let output =
            OutputShape::from_columns(self.output_column, self.is_group, self.group_name, expected)
                .map_err(invalid)?;
        let dependencies: Vec<IndicatorId> = serde_json::from_str(&self.dependencies)
            .map_err(|e| invalid(format!("dependencies: {e}")))?;
        let dependency_columns: Vec<String> = serde_json::from_str(&self.dependency_columns)
            .map_err(|e| invalid(format!("dependency_columns: {e}")))?;
        let external_datasets: BTreeMap<String, ExternalDataset> =
            serde_json::from_str(&self.external_datasets)
                .map_err(|e| invalid(format!("external_datasets: {e}")))?;

        Ok(Indicator {
            id,
            name: self.name,
            code: self.code,
            visibility,
            owner_id: self.owner_id,
            dependencies,
            dependency_columns,
            output,
            external_datasets,
        })
    }
}
