mod irr;
mod performance;

use serde::Serialize;

use crate::time::Date;
use crate::types::Decimal;

pub use irr::internal_rate_of_return;
pub use performance::analyse;

/// Daily snapshot of the simulated account.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EquityPoint {
    pub date: Date,
    pub cash: Decimal,
    pub positions_value: Decimal,
    pub total_value: Decimal,
    pub daily_return: Option<Decimal>,
}

/// An external cashflow: money entering the account from the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CashFlow {
    pub date: Date,
    pub amount: Decimal,
}

/// The metric block computed over an equity series. Ratios that aren't defined for the series
/// (fewer than two points, zero volatility, no benchmark) are null.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceStatistics {
    pub twr: Option<f64>,
    pub cagr: Option<f64>,
    pub irr: Option<f64>,
    pub volatility: Option<f64>,
    pub sharpe: Option<f64>,
    pub sortino: Option<f64>,
    pub calmar: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub drawdown_duration_days: Option<i64>,
    pub hit_ratio: Option<f64>,
    pub best_month: Option<f64>,
    pub worst_month: Option<f64>,
    pub best_quarter: Option<f64>,
    pub worst_quarter: Option<f64>,
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub tracking_error: Option<f64>,
    pub information_ratio: Option<f64>,
}
