//! Daily price row representation.

use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub turnover: Option<f64>,
    pub amplitude: Option<f64>,
    pub change_pct: Option<f64>,
    pub change_amount: Option<f64>,
    pub turnover_rate: Option<f64>,
}

impl PriceRow {
    /// A row with only the OHLCV fields populated.
    pub fn ohlcv(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: i64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
            turnover: None,
            amplitude: None,
            change_pct: None,
            change_amount: None,
            turnover_rate: None,
        }
    }

    pub fn in_range(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
        start.is_none_or(|s| self.date >= s) && end.is_none_or(|e| self.date <= e)
    }
}
