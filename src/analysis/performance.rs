use std::collections::BTreeMap;

use chrono::Datelike;
use num_traits::ToPrimitive;

use crate::time::{self, Date};

use super::irr::internal_rate_of_return;
use super::{CashFlow, EquityPoint, PerformanceStatistics};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Computes the metric block over a recorded equity series. The benchmark series, when present,
/// must be produced over the same trading days; alpha, beta, tracking error and information
/// ratio are paired by date.
pub fn analyse(
    equity: &[EquityPoint], cashflows: &[CashFlow], benchmark: Option<&[EquityPoint]>,
    risk_free_rate: f64,
) -> PerformanceStatistics {
    let mut statistics = PerformanceStatistics::default();

    let (Some(first), Some(last)) = (equity.first(), equity.last()) else {
        return statistics;
    };

    let returns = daily_returns(equity);
    let total_days = (last.date - first.date).num_days() + 1;

    if !returns.is_empty() {
        let twr = chain(returns.iter().map(|&(_, value)| value));
        statistics.twr = Some(twr);
        statistics.cagr = Some((1.0 + twr).powf(365.0 / total_days as f64) - 1.0);
    }

    statistics.irr = {
        let flows: Vec<(Date, f64)> = cashflows.iter()
            .map(|flow| (flow.date, -decimal_to_f64(flow.amount)))
            .collect();
        internal_rate_of_return(&flows, last.date, decimal_to_f64(last.total_value))
    };

    // All the ratios below need at least two observations
    if equity.len() < 2 || returns.len() < 2 {
        return statistics;
    }

    let risk_free_daily = risk_free_rate / TRADING_DAYS_PER_YEAR;
    let excess: Vec<f64> = returns.iter().map(|&(_, value)| value - risk_free_daily).collect();

    let volatility = stdev(&returns.iter().map(|&(_, value)| value).collect::<Vec<_>>())
        .map(|stdev| stdev * TRADING_DAYS_PER_YEAR.sqrt());
    statistics.volatility = volatility;

    let mean_excess_annual = mean(&excess) * TRADING_DAYS_PER_YEAR;

    statistics.sharpe = volatility
        .filter(|&volatility| volatility > 0.0)
        .map(|volatility| mean_excess_annual / volatility);

    let downside = (excess.iter().map(|&value| value.min(0.0).powi(2)).sum::<f64>()
        / excess.len() as f64).sqrt() * TRADING_DAYS_PER_YEAR.sqrt();
    statistics.sortino = (downside > 0.0).then(|| mean_excess_annual / downside);

    let (max_drawdown, duration) = max_drawdown(equity);
    statistics.max_drawdown = Some(max_drawdown);
    statistics.drawdown_duration_days = duration;

    statistics.calmar = statistics.cagr
        .filter(|_| max_drawdown < 0.0)
        .map(|cagr| cagr / max_drawdown.abs());

    let monthly = period_returns(&returns, |date| (date.year(), date.month()));
    if !monthly.is_empty() {
        let positive = monthly.iter().filter(|&&value| value > 0.0).count();
        statistics.hit_ratio = Some(positive as f64 / monthly.len() as f64);
        statistics.best_month = monthly.iter().copied().reduce(f64::max);
        statistics.worst_month = monthly.iter().copied().reduce(f64::min);
    }

    let quarterly = period_returns(&returns, |date| (date.year(), time::quarter_of(date)));
    statistics.best_quarter = quarterly.iter().copied().reduce(f64::max);
    statistics.worst_quarter = quarterly.iter().copied().reduce(f64::min);

    if let Some(benchmark) = benchmark {
        relative_statistics(&mut statistics, &returns, benchmark, risk_free_daily);
    }

    statistics
}

fn relative_statistics(
    statistics: &mut PerformanceStatistics, returns: &[(Date, f64)], benchmark: &[EquityPoint],
    risk_free_daily: f64,
) {
    let benchmark_returns: BTreeMap<Date, f64> = daily_returns(benchmark).into_iter().collect();

    let pairs: Vec<(f64, f64)> = returns.iter()
        .filter_map(|&(date, value)| {
            benchmark_returns.get(&date).map(|&benchmark_value| (value, benchmark_value))
        })
        .collect();

    if pairs.len() < 2 {
        return;
    }

    let strategy_excess: Vec<f64> = pairs.iter().map(|&(value, _)| value - risk_free_daily).collect();
    let benchmark_excess: Vec<f64> = pairs.iter().map(|&(_, value)| value - risk_free_daily).collect();

    let strategy_mean = mean(&strategy_excess);
    let benchmark_mean = mean(&benchmark_excess);

    let mut covariance = 0.0;
    let mut variance = 0.0;
    for index in 0..pairs.len() {
        let strategy_deviation = strategy_excess[index] - strategy_mean;
        let benchmark_deviation = benchmark_excess[index] - benchmark_mean;
        covariance += strategy_deviation * benchmark_deviation;
        variance += benchmark_deviation * benchmark_deviation;
    }

    if variance > 0.0 {
        let beta = covariance / variance;
        statistics.beta = Some(beta);
        statistics.alpha = Some((strategy_mean - beta * benchmark_mean) * TRADING_DAYS_PER_YEAR);
    }

    let active: Vec<f64> = pairs.iter().map(|&(value, benchmark_value)| value - benchmark_value).collect();
    if let Some(tracking_error) = stdev(&active).map(|stdev| stdev * TRADING_DAYS_PER_YEAR.sqrt()) {
        if tracking_error > 0.0 {
            statistics.tracking_error = Some(tracking_error);
            statistics.information_ratio = Some(mean(&active) * TRADING_DAYS_PER_YEAR / tracking_error);
        }
    }
}

fn daily_returns(equity: &[EquityPoint]) -> Vec<(Date, f64)> {
    equity.iter()
        .filter_map(|point| {
            point.daily_return.map(|value| (point.date, decimal_to_f64(value)))
        })
        .collect()
}

fn chain(returns: impl Iterator<Item = f64>) -> f64 {
    returns.fold(1.0, |accumulated, value| accumulated * (1.0 + value)) - 1.0
}

/// The largest peak-to-trough decline and its duration in calendar days from the peak to the
/// recovery (to the period end if the drawdown is never recovered).
fn max_drawdown(equity: &[EquityPoint]) -> (f64, Option<i64>) {
    let mut peak = equity[0].total_value;
    let mut peak_date = equity[0].date;

    let mut max_drawdown = 0.0;
    let mut max_peak = peak;
    let mut max_peak_date = peak_date;

    for point in &equity[1..] {
        if point.total_value > peak {
            peak = point.total_value;
            peak_date = point.date;
            continue;
        }

        if !peak.is_zero() {
            let drawdown = decimal_to_f64((point.total_value - peak) / peak);
            if drawdown < max_drawdown {
                max_drawdown = drawdown;
                max_peak = peak;
                max_peak_date = peak_date;
            }
        }
    }

    if max_drawdown == 0.0 {
        return (0.0, None);
    }

    let recovery_date = equity.iter()
        .filter(|point| point.date > max_peak_date && point.total_value >= max_peak)
        .map(|point| point.date)
        .next()
        .unwrap_or(equity.last().unwrap().date);

    (max_drawdown, Some((recovery_date - max_peak_date).num_days()))
}

fn period_returns<K: Ord, F: Fn(Date) -> K>(returns: &[(Date, f64)], key: F) -> Vec<f64> {
    let mut periods = BTreeMap::new();

    for &(date, value) in returns {
        *periods.entry(key(date)).or_insert(1.0) *= 1.0 + value;
    }

    periods.into_values().map(|accumulated: f64| accumulated - 1.0).collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn stdev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }

    let mean = mean(values);
    let variance = values.iter()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>() / (values.len() - 1) as f64;

    Some(variance.sqrt())
}

fn decimal_to_f64(value: crate::types::Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}
