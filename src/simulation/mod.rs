mod result;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Datelike;
use easy_logging::GlobalContext;
use log::{debug, warn};
use rayon::prelude::*;

use crate::analysis::{self, CashFlow, EquityPoint};
use crate::calendar::MarketCalendar;
use crate::config::{
    AccountType, CashflowRebalancingConfig, DividendMode, MetaConfig, OrderTiming,
    PositionSizingConfig, PositionSizingMethod, RebalancingConfig, RebalancingType,
    StrategyConfig, UniverseConfig};
use crate::core::GenericResult;
use crate::portfolio::{Execution, OperationError, Portfolio, SellAmount};
use crate::quotes::{Bar, DividendAction, PriceSource, SplitAction};
use crate::rebalancing::{Rebalancer, TradePlan, Valuation};
use crate::taxes::TaxLedger;
use crate::time::{Date, Period};
use crate::types::Decimal;
use crate::util;

pub use result::{
    Diagnostics, ErrorKind, PositionSnapshot, SimulationError, SimulationResult, TradeRecord,
    Warning};

/// Observed by the driver at day boundaries: a cancelled simulation returns the days processed
/// so far as a partial result, never a half-applied day.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> CancellationToken {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Runs the full simulation: the daily loop, then the metrics pass and the parallel
/// buy-and-hold benchmark runs.
///
/// Given the same config and the same price source outputs the result is byte-identical: the
/// driver takes no wall-clock readings and uses no randomness.
pub fn backtest(
    config: &StrategyConfig, source: &dyn PriceSource, cancel: &CancellationToken,
) -> GenericResult<SimulationResult> {
    config.validate()?;

    let mut result = {
        let _logging_context = (!config.meta.name.is_empty())
            .then(|| GlobalContext::new(&config.meta.name));
        run_simulation(config, source, cancel)?
    };

    if !config.benchmark.is_empty() && result.error.is_none() && !result.partial {
        let runs: Vec<(String, GenericResult<SimulationResult>)> = config.benchmark.par_iter()
            .map(|symbol| {
                let benchmark = benchmark_config(config, symbol);
                (symbol.clone(), run_simulation(&benchmark, source, cancel))
            })
            .collect();

        for (symbol, run) in runs {
            match run {
                Ok(benchmark) if benchmark.error.is_none() => {
                    result.benchmark_metrics.insert(symbol.clone(), benchmark.metrics);
                    result.benchmark_equity.insert(symbol, benchmark.equity);
                },
                Ok(benchmark) => {
                    let error = benchmark.error.unwrap();
                    result.warnings.push(Warning {
                        date: config.period.start,
                        message: format!("Failed to backtest the {symbol} benchmark: {error}"),
                    });
                },
                Err(error) => {
                    result.warnings.push(Warning {
                        date: config.period.start,
                        message: format!("Failed to backtest the {symbol} benchmark: {error}"),
                    });
                },
            }
        }

        // Alpha, beta and the relative ratios are computed against the first benchmark
        if let Some(primary) = result.benchmark_equity.get(config.benchmark.first().unwrap()) {
            result.metrics = analysis::analyse(&result.equity, &result.cashflows, Some(primary), 0.0);
        }
    }

    Ok(result)
}

fn run_simulation(
    config: &StrategyConfig, source: &dyn PriceSource, cancel: &CancellationToken,
) -> GenericResult<SimulationResult> {
    Driver::new(config, source)?.run(cancel)
}

struct Driver<'a> {
    config: &'a StrategyConfig,
    source: &'a dyn PriceSource,
    calendar: MarketCalendar,
    period: Period,

    portfolio: Portfolio,
    ledger: TaxLedger,
    rebalancer: Rebalancer,

    bars: HashMap<String, BTreeMap<Date, Bar>>,
    dividends: HashMap<Date, Vec<DividendAction>>,
    splits: HashMap<Date, Vec<SplitAction>>,
    deposit_schedule: HashMap<Date, Decimal>,
    drag: HashMap<String, DragState>,
    last_close: HashMap<String, Decimal>,

    trades: Vec<TradeRecord>,
    equity: Vec<EquityPoint>,
    cashflows: Vec<CashFlow>,
    warnings: Vec<Warning>,
    rebalances: u32,
    external_tax: Decimal,
    previous_value: Decimal,
}

struct DragState {
    daily: Decimal,
    factor: Decimal,
}

impl<'a> Driver<'a> {
    fn new(config: &'a StrategyConfig, source: &'a dyn PriceSource) -> GenericResult<Driver<'a>> {
        let calendar = MarketCalendar::new(&config.period.calendar)?;
        let period = Period::new(config.period.start, config.period.end)?;

        let mut bars = HashMap::new();
        let mut dividends: HashMap<Date, Vec<DividendAction>> = HashMap::new();
        let mut splits: HashMap<Date, Vec<SplitAction>> = HashMap::new();
        let mut drag = HashMap::new();

        for symbol in &config.universe.symbols {
            let symbol_bars = source.bars(symbol, period).map_err(|e| format!(
                "Failed to get {symbol} price data: {e}"))?;
            bars.insert(symbol.clone(), symbol_bars.into_iter()
                .map(|bar| (bar.date, bar))
                .collect::<BTreeMap<_, _>>());

            for dividend in source.dividends(symbol, period)? {
                dividends.entry(dividend.ex_date).or_default().push(dividend);
            }

            for split in source.splits(symbol, period)? {
                splits.entry(split.date).or_default().push(split);
            }

            if config.frictions.use_actual_etf_er {
                if let Some(expense_ratio) = source.expense_ratio(symbol)? {
                    if !expense_ratio.is_zero() {
                        drag.insert(symbol.clone(), DragState {
                            daily: dec!(1) - expense_ratio / dec!(252),
                            factor: dec!(1),
                        });
                    }
                }
            }
        }

        let mut deposit_schedule = HashMap::new();
        if let Some(deposits) = &config.deposits {
            for scheduled in calendar.schedule(period, deposits.cadence(), deposits.day_rule)? {
                *deposit_schedule.entry(scheduled.posted).or_insert(dec!(0)) += deposits.amount;
            }
        }

        let rebalancer = Rebalancer::new(config, &calendar, period)?;

        Ok(Driver {
            config,
            source,
            calendar,
            period,

            portfolio: Portfolio::new(config),
            ledger: TaxLedger::new(config.account.type_, &config.account.tax),
            rebalancer,

            bars,
            dividends,
            splits,
            deposit_schedule,
            drag,
            last_close: HashMap::new(),

            trades: Vec::new(),
            equity: Vec::new(),
            cashflows: Vec::new(),
            warnings: Vec::new(),
            rebalances: 0,
            external_tax: dec!(0),
            previous_value: dec!(0),
        })
    }

    fn run(mut self, cancel: &CancellationToken) -> GenericResult<SimulationResult> {
        let days = self.calendar.enumerate(self.period)?;
        if days.is_empty() {
            return Err!("There are no trading days in {}", self.period);
        }

        self.previous_value = self.config.initial_cash;
        if !self.config.initial_cash.is_zero() {
            self.cashflows.push(CashFlow {date: days[0], amount: self.config.initial_cash});
        }

        let mut partial = false;
        let mut error = None;

        for (index, &date) in days.iter().enumerate() {
            if cancel.is_cancelled() {
                self.warnings.push(Warning {
                    date,
                    message: "The simulation has been cancelled by the host".to_owned(),
                });
                partial = true;
                break;
            }

            let first_day = index == 0;
            let last_of_year = days.get(index + 1)
                .is_none_or(|next| next.year() != date.year());

            if let Err(day_error) = self.process_day(date, first_day, last_of_year) {
                warn!("{day_error}.");
                partial = true;
                error = Some(day_error);
                break;
            }
        }

        Ok(self.finalize(days.len(), partial, error))
    }

    fn process_day(&mut self, date: Date, first_day: bool, last_of_year: bool) -> Result<(), SimulationError> {
        let mut opens = HashMap::new();
        let mut closes = HashMap::new();

        for symbol in &self.config.universe.symbols {
            match self.bars.get(symbol).and_then(|bars| bars.get(&date)) {
                Some(bar) => {
                    opens.insert(symbol.clone(), bar.open);
                    closes.insert(symbol.clone(), bar.close);
                    self.last_close.insert(symbol.clone(), bar.close);
                },
                None => {
                    let delisted = self.source.is_delisted(symbol, date).map_err(|e| SimulationError {
                        kind: ErrorKind::DataUnavailable,
                        date,
                        symbol: Some(symbol.clone()),
                        message: e.to_string(),
                    })?;

                    if !delisted {
                        return Err(SimulationError {
                            kind: ErrorKind::DataUnavailable,
                            date,
                            symbol: Some(symbol.clone()),
                            message: format!("There is no {symbol} bar for a trading day"),
                        });
                    }
                },
            }
        }

        for split in self.splits.remove(&date).unwrap_or_default() {
            debug!("Applying {} {} split...", split.symbol, split.ratio);
            self.portfolio.apply_split(&split.symbol, split.ratio, date);
        }

        let mut cash_added = first_day && !self.config.initial_cash.is_zero();

        for dividend in self.dividends.remove(&date).unwrap_or_default() {
            let Some(close) = closes.get(&dividend.symbol).copied()
                .or_else(|| self.last_close.get(&dividend.symbol).copied()) else {
                continue;
            };

            let qualified_fraction = self.config.account.tax.qualified_dividend_pct
                .unwrap_or(dividend.qualified_fraction);

            let executions = self.portfolio.apply_dividend(
                &dividend.symbol, dividend.amount, qualified_fraction, date,
                &self.config.dividends, close, &mut self.ledger);

            if !executions.is_empty() && self.config.dividends.mode == DividendMode::Cash {
                cash_added = true;
            }

            for execution in executions {
                self.record(date, execution);
            }
        }

        let mut external_flow = dec!(0);

        if let Some(&amount) = self.deposit_schedule.get(&date) {
            match self.portfolio.deposit(amount, date) {
                Ok(execution) => {
                    if execution.cash_delta < amount {
                        self.warnings.push(Warning {
                            date,
                            message: format!(
                                "The deposit has been clipped to {} by the contribution cap",
                                execution.cash_delta),
                        });
                    }

                    external_flow += execution.cash_delta;
                    self.cashflows.push(CashFlow {date, amount: execution.cash_delta});
                    cash_added = true;
                    self.record(date, execution);
                },
                Err(reason @ OperationError::ContributionCapExceeded {..}) => {
                    warn!("Skipping the deposit: {reason}.");
                    self.warnings.push(Warning {
                        date,
                        message: format!("Skipping the deposit: {reason}"),
                    });
                },
                Err(reason) => return Err(self.internal_error(date, reason.to_string())),
            }
        }

        let trade_prices = match self.config.orders.timing {
            OrderTiming::MarketOnOpen => &opens,
            OrderTiming::MarketOnClose => &closes,
        };

        let valuation = self.valuation(trade_prices);
        if let Some(reason) = self.rebalancer.check(date, &valuation, cash_added) {
            let plan = self.rebalancer.build_plan(date, &self.portfolio, &valuation, trade_prices);

            if !plan.is_empty() {
                debug!("Rebalancing ({reason})...");

                if plan.scaled_down {
                    self.warnings.push(Warning {
                        date,
                        message: "The rebalancing plan has been scaled down to fit into the available cash".to_owned(),
                    });
                }

                self.execute_plan(date, plan, trade_prices)?;
                self.rebalances += 1;
            }
        }

        let cash_yield = self.config.frictions.cash_yield_pct;
        if !cash_yield.is_zero() && self.portfolio.cash() > dec!(0) {
            let interest = util::round(self.portfolio.cash() * cash_yield / dec!(100) / dec!(252), 2);
            if !interest.is_zero() {
                self.portfolio.credit_interest(interest);
                self.ledger.record_interest(date, interest);
            }
        }

        for drag in self.drag.values_mut() {
            drag.factor *= drag.daily;
        }

        let mark_prices = self.mark_prices(&closes);
        let positions_value = util::round(
            self.portfolio.market_value(&mark_prices)
                .map_err(|e| self.internal_error(date, e.to_string()))?,
            2);
        let cash = util::round(self.portfolio.cash(), 2);
        let total_value = cash + positions_value;

        let daily_return = if self.previous_value.is_zero() {
            None
        } else {
            Some(util::round((total_value - external_flow) / self.previous_value - dec!(1), 8))
        };

        self.equity.push(EquityPoint {date, cash, positions_value, total_value, daily_return});
        self.previous_value = total_value;

        if last_of_year {
            let summary = self.ledger.close_year(date.year());

            if !summary.total_tax.is_zero() {
                debug!("Tax for {}: {}.", summary.year, summary.total_tax);

                if self.config.account.tax.pay_taxes_from_external {
                    self.external_tax += summary.total_tax;
                } else {
                    self.portfolio.pay_tax(summary.total_tax);
                }
            }
        }

        self.portfolio.verify_consistency()
            .map_err(|e| self.internal_error(date, e.to_string()))?;

        Ok(())
    }

    fn execute_plan(
        &mut self, date: Date, plan: TradePlan, trade_prices: &HashMap<String, Decimal>,
    ) -> Result<(), SimulationError> {
        for sell in plan.sells {
            let price = trade_prices[&sell.symbol];

            match self.portfolio.sell(&sell.symbol, SellAmount::Shares(sell.shares), price, date, &mut self.ledger) {
                Ok(execution) => self.record(date, execution),
                Err(reason @ OperationError::InsufficientShares {..}) => {
                    return Err(SimulationError {
                        kind: ErrorKind::InsufficientShares,
                        date,
                        symbol: Some(sell.symbol),
                        message: reason.to_string(),
                    });
                },
                Err(reason) => return Err(self.internal_error(date, reason.to_string())),
            }
        }

        for buy in plan.buys {
            let price = trade_prices[&buy.symbol];

            let notional = std::cmp::min(buy.notional, self.portfolio.cash());
            if notional < buy.notional {
                self.warnings.push(Warning {
                    date,
                    message: format!("The {} buy has been reduced to the available cash", buy.symbol),
                });
            }
            if notional <= self.config.frictions.commission_per_trade {
                continue;
            }

            match self.portfolio.buy(&buy.symbol, notional, price, date, &mut self.ledger) {
                Ok(execution) => self.record(date, execution),
                Err(reason @ OperationError::InsufficientCash {..}) => {
                    self.warnings.push(Warning {
                        date,
                        message: format!("Skipping the {} buy: {reason}", buy.symbol),
                    });
                },
                Err(reason) => return Err(self.internal_error(date, reason.to_string())),
            }
        }

        Ok(())
    }

    fn valuation(&self, prices: &HashMap<String, Decimal>) -> Valuation {
        let mut positions = BTreeMap::new();
        let mut total_value = self.portfolio.cash();

        for (symbol, shares) in self.portfolio.holdings() {
            let price = prices.get(symbol.as_str()).copied()
                .or_else(|| self.last_close.get(symbol.as_str()).copied());

            if let Some(price) = price {
                let value = shares * price;
                positions.insert(symbol.clone(), value);
                total_value += value;
            }
        }

        Valuation {cash: self.portfolio.cash(), positions, total_value}
    }

    // Mark prices are the closes with the accumulated expense ratio drag applied. A delisted
    // symbol is marked at its last seen close.
    fn mark_prices(&self, closes: &HashMap<String, Decimal>) -> HashMap<String, Decimal> {
        let mut prices = HashMap::new();

        for (symbol, _) in self.portfolio.holdings() {
            let Some(price) = closes.get(symbol.as_str()).copied()
                .or_else(|| self.last_close.get(symbol.as_str()).copied()) else {
                continue;
            };

            let factor = self.drag.get(symbol.as_str())
                .map(|drag| drag.factor)
                .unwrap_or(dec!(1));

            prices.insert(symbol.clone(), price * factor);
        }

        prices
    }

    fn record(&mut self, date: Date, execution: Execution) {
        let id = self.trades.len() as u64 + 1;
        self.trades.push(TradeRecord {
            id,
            date,
            action: execution.action,
            symbol: execution.symbol,
            quantity: execution.quantity,
            price: execution.price,
            commission: execution.commission,
            slippage: execution.slippage,
            cash_delta: execution.cash_delta,
            lot_ids: execution.lot_ids,
        });
    }

    fn internal_error(&self, date: Date, message: String) -> SimulationError {
        SimulationError {
            kind: ErrorKind::InternalConsistency,
            date,
            symbol: None,
            message,
        }
    }

    fn finalize(self, total_days: usize, partial: bool, error: Option<SimulationError>) -> SimulationResult {
        let metrics = analysis::analyse(&self.equity, &self.cashflows, None, 0.0);
        let executed_trades = self.trades.len();

        let positions: Vec<PositionSnapshot> = self.portfolio.holdings()
            .map(|(symbol, shares)| {
                let close = self.last_close.get(symbol.as_str()).copied().unwrap_or_default();
                PositionSnapshot {
                    symbol: symbol.clone(),
                    shares,
                    close,
                    market_value: util::round(shares * close, 2),
                }
            })
            .collect();

        let ira_after_tax_equivalent = (self.config.account.type_ == AccountType::TraditionalIra)
            .then(|| {
                let value = self.equity.last()
                    .map(|point| point.total_value)
                    .unwrap_or(self.config.initial_cash);
                util::round(value * (dec!(1) - self.config.account.tax.withdrawal_tax_rate_for_ira), 2)
            });

        SimulationResult {
            config: self.config.clone(),
            equity: self.equity,
            metrics,
            benchmark_metrics: BTreeMap::new(),
            benchmark_equity: BTreeMap::new(),
            trades: self.trades,
            positions,
            tax_years: self.ledger.summaries().to_vec(),
            open_lots: self.portfolio.open_lots().cloned().collect(),
            realized_events: self.ledger.events().to_vec(),
            cashflows: self.cashflows,
            warnings: self.warnings,
            diagnostics: Diagnostics {
                total_days,
                rebalances: self.rebalances,
                trades: executed_trades,
                cumulative_deposits: self.portfolio.cumulative_deposits(),
                ira_after_tax_equivalent,
                external_tax_liability: self.external_tax,
            },
            partial,
            error,
        }
    }
}

fn benchmark_config(config: &StrategyConfig, symbol: &str) -> StrategyConfig {
    let mut benchmark = config.clone();

    benchmark.meta = MetaConfig {
        name: format!("{symbol} buy-and-hold"),
        notes: None,
    };
    benchmark.universe = UniverseConfig {symbols: vec![symbol.to_owned()]};
    benchmark.rebalancing = RebalancingConfig {
        type_: RebalancingType::CashflowOnly,
        calendar: None,
        drift: None,
        cashflow: Some(CashflowRebalancingConfig {min_cash: dec!(0)}),
    };
    benchmark.position_sizing = PositionSizingConfig {
        method: PositionSizingMethod::EqualWeight,
        custom_weights: None,
        top_n: None,
        vol_target: None,
    };
    benchmark.frictions.commission_per_trade = dec!(0);
    benchmark.frictions.slippage_bps = dec!(0);
    benchmark.benchmark = Vec::new();

    benchmark
}
