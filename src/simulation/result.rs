use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::analysis::{CashFlow, EquityPoint, PerformanceStatistics};
use crate::config::StrategyConfig;
use crate::portfolio::{Lot, LotId, TradeAction};
use crate::taxes::{RealizedEvent, TaxYearSummary};
use crate::time::Date;
use crate::types::Decimal;

#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub id: u64,
    pub date: Date,
    pub action: TradeAction,
    pub symbol: Option<String>,
    pub quantity: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    pub slippage: Decimal,
    pub cash_delta: Decimal,
    pub lot_ids: Vec<LotId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Warning {
    pub date: Date,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    DataUnavailable,
    InsufficientShares,
    InternalConsistency,
}

/// A fatal simulation error. The driver aborts the loop on it and returns the state computed
/// up to the prior day together with the error.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationError {
    pub kind: ErrorKind,
    pub date: Date,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub message: String,
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, crate::formatting::format_date(self.date))?;
        if let Some(symbol) = &self.symbol {
            write!(f, " ({symbol})")?;
        }
        Ok(())
    }
}

impl std::error::Error for SimulationError {
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub shares: Decimal,
    pub close: Decimal,
    pub market_value: Decimal,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub total_days: usize,
    pub rebalances: u32,
    pub trades: usize,
    pub cumulative_deposits: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ira_after_tax_equivalent: Option<Decimal>,
    pub external_tax_liability: Decimal,
}

/// Everything one simulation produces.
#[derive(Serialize)]
pub struct SimulationResult {
    pub config: StrategyConfig,
    pub equity: Vec<EquityPoint>,
    pub metrics: PerformanceStatistics,
    pub benchmark_metrics: BTreeMap<String, PerformanceStatistics>,
    pub benchmark_equity: BTreeMap<String, Vec<EquityPoint>>,
    pub trades: Vec<TradeRecord>,
    pub positions: Vec<PositionSnapshot>,
    pub tax_years: Vec<TaxYearSummary>,
    pub open_lots: Vec<Lot>,
    pub realized_events: Vec<RealizedEvent>,
    pub cashflows: Vec<CashFlow>,
    pub warnings: Vec<Warning>,
    pub diagnostics: Diagnostics,
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SimulationError>,
}
