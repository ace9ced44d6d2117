//! Checks sandbox output against what the indicator promises and turns it
//! into dated cache values.

use crate::domain::error::EngineError;
use crate::domain::indicator::{IndicatorValue, OutputShape, ValueMap};
use crate::domain::sandbox::SandboxValues;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::debug;

fn check_length(name: &str, got: usize, expected: usize) -> Result<(), EngineError> {
    if got != expected {
        return Err(EngineError::InvalidOutput {
            reason: format!("'{name}': length mismatch ({got} != {expected})"),
        });
    }
    Ok(())
}

/// Pairs each output value with the date of the record it was computed for.
///
/// For groups, every expected output must be present; unexpected outputs are
/// dropped.
pub fn validate(
    shape: &OutputShape,
    dates: &[NaiveDate],
    values: SandboxValues,
) -> Result<ValueMap, EngineError> {
    match (shape, values) {
        (OutputShape::Single { column }, SandboxValues::Series(series)) => {
            check_length(column, series.len(), dates.len())?;
            Ok(dates
                .iter()
                .copied()
                .zip(series.into_iter().map(IndicatorValue::Scalar))
                .collect())
        }
        (OutputShape::Group { expected, .. }, SandboxValues::Named(mut outputs)) => {
            let missing: Vec<String> = expected
                .iter()
                .filter(|name| !outputs.contains_key(*name))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(EngineError::MissingOutputs { missing });
            }

            outputs.retain(|name, _| {
                let keep = expected.contains(name);
                if !keep {
                    debug!(output = %name, "dropping unexpected group output");
                }
                keep
            });
            for (name, series) in &outputs {
                check_length(name, series.len(), dates.len())?;
            }

            Ok(dates
                .iter()
                .enumerate()
                .map(|(i, &date)| {
                    let sub: BTreeMap<String, Option<f64>> = outputs
                        .iter()
                        .map(|(name, series)| (name.clone(), series[i]))
                        .collect();
                    (date, IndicatorValue::Group(sub))
                })
                .collect())
        }
        (OutputShape::Single { .. }, SandboxValues::Named(_)) => Err(EngineError::InvalidOutput {
            reason: "single-output indicator returned named outputs".into(),
        }),
        (OutputShape::Group { .. }, SandboxValues::Series(_)) => Err(EngineError::InvalidOutput {
            reason: "group indicator must return a map of named outputs".into(),
        }),
    }
}
