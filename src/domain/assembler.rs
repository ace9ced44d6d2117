//! Merges price rows and upstream indicator values into sandbox records.

use crate::domain::dependency::ResolvedDependency;
use crate::domain::indicator::IndicatorValue;
use crate::domain::price::PriceRow;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// One flat row handed to the sandbox.
///
/// `fields` holds dependency columns. A key that is absent means the
/// dependency had no value on that date; a key mapped to `None` means the
/// dependency stored a null there.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turnover: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amplitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turnover_rate: Option<f64>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Option<f64>>,
}

impl Record {
    pub fn from_price(row: &PriceRow) -> Self {
        Self {
            date: row.date,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            turnover: row.turnover,
            amplitude: row.amplitude,
            change_pct: row.change_pct,
            change_amount: row.change_amount,
            turnover_rate: row.turnover_rate,
            fields: BTreeMap::new(),
        }
    }
}

/// Record fields taken by the price row; dependencies may not reuse them.
pub const PRICE_FIELDS: &[&str] = &[
    "date",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "turnover",
    "amplitude",
    "change_pct",
    "change_amount",
    "turnover_rate",
];

/// Field name a group dependency's sub-output is exposed under.
pub fn group_field_name(group: &str, sub_output: &str) -> String {
    format!("{group}:{sub_output}")
}

/// Builds one record per price row, in the order the rows are given.
pub fn assemble(prices: &[PriceRow], dependencies: &[ResolvedDependency]) -> Vec<Record> {
    prices
        .iter()
        .map(|row| {
            let mut record = Record::from_price(row);
            for dep in dependencies {
                match dep.values.get(&row.date) {
                    Some(IndicatorValue::Scalar(v)) => {
                        record.fields.insert(dep.field_name.clone(), *v);
                    }
                    Some(IndicatorValue::Group(sub)) => {
                        for (name, v) in sub {
                            record
                                .fields
                                .insert(group_field_name(&dep.field_name, name), *v);
                        }
                    }
                    None => {}
                }
            }
            record
        })
        .collect()
}
