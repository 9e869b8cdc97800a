//! Per-identity token and cost accounting.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Cumulative and daily token/cost counters for one identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEntry {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: Decimal,
    pub calls: u64,
    pub daily_cost_usd: Decimal,
    pub daily_date: NaiveDate,
    /// The last model string recorded for this identity.
    #[serde(default)]
    pub model_last_seen: Option<String>,
}

impl UsageEntry {
    /// A fresh entry dated to `today` (UTC calendar day).
    pub fn new(today: NaiveDate) -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: Decimal::ZERO,
            calls: 0,
            daily_cost_usd: Decimal::ZERO,
            daily_date: today,
            model_last_seen: None,
        }
    }

    /// Record a call's usage, resetting the daily counter first if `today`
    /// has rolled over since the last recording.
    pub fn record(&mut self, input_tokens: u64, output_tokens: u64, cost: Decimal, today: NaiveDate, model: Option<&str>) {
        if self.daily_date != today {
            self.daily_date = today;
            self.daily_cost_usd = Decimal::ZERO;
        }
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.cost_usd += cost;
        self.daily_cost_usd += cost;
        self.calls += 1;
        if let Some(m) = model {
            self.model_last_seen = Some(m.to_string());
        }
    }
}
