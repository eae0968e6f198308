use chrono::{Datelike, NaiveDate};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;

use backtester::calendar::MarketCalendar;
use backtester::config::StrategyConfig;
use backtester::portfolio::TradeAction;
use backtester::quotes::{Bar, DividendAction, SplitAction, StaticPriceSource};
use backtester::simulation::{backtest, CancellationToken, ErrorKind, SimulationResult, TradeRecord};
use backtester::time::Period;

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn load_config(yaml: &str) -> StrategyConfig {
    let config: StrategyConfig = serde_yaml::from_str(yaml).unwrap();
    config.validate().unwrap();
    config
}

fn trading_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    MarketCalendar::new("us").unwrap()
        .enumerate(Period::new(start, end).unwrap()).unwrap()
}

fn bar(date: NaiveDate, price: Decimal) -> Bar {
    Bar {date, open: price, high: price, low: price, close: price, adj_close: price, volume: 1_000_000}
}

fn add_linear_series(
    source: &mut StaticPriceSource, symbol: &str, start: NaiveDate, end: NaiveDate,
    start_price: Decimal, daily_step: Decimal,
) {
    let mut price = start_price;
    for day in trading_days(start, end) {
        source.add_bar(symbol, bar(day, price));
        price += daily_step;
    }
}

fn run(config: &StrategyConfig, source: &StaticPriceSource) -> SimulationResult {
    let result = backtest(config, source, &CancellationToken::new()).unwrap();
    assert!(result.error.is_none(), "unexpected simulation error: {:?}", result.error);
    assert!(!result.partial);
    result
}

fn actions<'r>(result: &'r SimulationResult, action: TradeAction) -> Vec<&'r TradeRecord> {
    result.trades.iter().filter(|trade| trade.action == action).collect()
}

#[test]
fn buy_and_hold_with_drip() {
    let config = load_config("
        period: {start: 2010-01-04, end: 2010-12-31}
        universe: {symbols: [SPY]}
        initial_cash: 10000
        account:
          type: Taxable
          tax: {federal_ordinary: 0.24, federal_ltcg: 0.15, state: 0.05}
        dividends: {mode: DRIP}
        rebalancing: {type: cashflow_only, cashflow: {min_cash: 0}}
        position_sizing: {method: EQUAL_WEIGHT}
        benchmark: [SPY]
    ");

    let mut source = StaticPriceSource::new();
    add_linear_series(&mut source, "SPY", date(2010, 1, 4), date(2010, 12, 31), dec!(100), dec!(0.05));
    for (month, day) in [(3, 19), (6, 18), (9, 17), (12, 17)] {
        source.add_dividend(DividendAction {
            symbol: "SPY".to_owned(),
            ex_date: date(2010, month, day),
            amount: dec!(0.55),
            qualified_fraction: dec!(1),
        });
    }

    let result = run(&config, &source);

    // The whole initial cash is deployed with a single buy on the first day
    let buys = actions(&result, TradeAction::Buy);
    assert_eq!(buys.len(), 1);
    assert_eq!(buys[0].date, date(2010, 1, 4));
    assert!(actions(&result, TradeAction::Sell).is_empty());

    let dividends = actions(&result, TradeAction::DividendCash);
    let drips = actions(&result, TradeAction::Drip);
    assert_eq!(dividends.len(), 4);
    assert_eq!(drips.len(), 4);

    assert_eq!(result.equity.len(), trading_days(date(2010, 1, 4), date(2010, 12, 31)).len());
    assert!(result.metrics.twr.unwrap() > 0.0);

    // The strategy is itself a buy-and-hold of the benchmark, so it must track it exactly
    assert!(result.benchmark_equity.contains_key("SPY"));
    let beta = result.metrics.beta.unwrap();
    assert!((beta - 1.0).abs() < 1e-6, "got beta {beta}");
    assert!(result.metrics.alpha.unwrap().abs() < 1e-6);

    // Byte-identical determinism
    let other = backtest(&config, &source, &CancellationToken::new()).unwrap();
    assert_eq!(
        serde_json::to_string(&result).unwrap(),
        serde_json::to_string(&other).unwrap(),
    );
}

#[test]
fn roth_with_monthly_deposits_and_quarterly_rebalancing() {
    let config = load_config("
        period: {start: 2020-01-02, end: 2020-12-31}
        universe: {symbols: [SPY, AGG]}
        initial_cash: 10000
        account:
          type: Roth-IRA
          tax: {federal_ordinary: 0.24, federal_ltcg: 0.15, state: 0.05}
        deposits: {cadence: monthly, amount: 500, day_rule: 1}
        dividends: {mode: DRIP}
        rebalancing: {type: calendar, calendar: {period: Q}}
        lots: {method: HIFO}
        position_sizing:
          method: CUSTOM_WEIGHTS
          custom_weights: {SPY: 60, AGG: 40}
    ");

    let mut source = StaticPriceSource::new();
    add_linear_series(&mut source, "SPY", date(2020, 1, 2), date(2020, 12, 31), dec!(300), dec!(0.2));
    add_linear_series(&mut source, "AGG", date(2020, 1, 2), date(2020, 12, 31), dec!(110), dec!(0.01));

    let result = run(&config, &source);

    // 12 deposits, each on the first trading day on/after the 1st of the month
    let calendar = MarketCalendar::new("us").unwrap();
    let deposits = actions(&result, TradeAction::Deposit);
    assert_eq!(deposits.len(), 12);
    for (index, deposit) in deposits.iter().enumerate() {
        let scheduled = date(2020, index as u32 + 1, 1);
        assert_eq!(deposit.date, calendar.next_trading_day(scheduled).unwrap());
        assert_eq!(deposit.cash_delta, dec!(500));
    }

    // Four quarterly rebalances, all trades happen on the rebalance days
    assert_eq!(result.diagnostics.rebalances, 4);
    let rebalance_days = [date(2020, 1, 2), date(2020, 4, 1), date(2020, 7, 1), date(2020, 10, 1)];
    for trade in &result.trades {
        if matches!(trade.action, TradeAction::Buy | TradeAction::Sell) {
            assert!(rebalance_days.contains(&trade.date), "unexpected trade on {}", trade.date);
        }
    }

    // No tax inside a Roth account
    assert_eq!(result.tax_years.len(), 1);
    assert_eq!(result.tax_years[0].year, 2020);
    assert_eq!(result.tax_years[0].total_tax, dec!(0));
}

#[test]
fn drift_rebalancing() {
    let config = load_config("
        period: {start: 2015-01-02, end: 2015-12-31}
        universe: {symbols: [SPY, TLT]}
        initial_cash: 50000
        account:
          type: Taxable
          tax: {federal_ordinary: 0.24, federal_ltcg: 0.15, state: 0.05}
        dividends: {mode: CASH}
        rebalancing: {type: drift, drift: {abs_pct: 5}}
        position_sizing: {method: EQUAL_WEIGHT}
    ");

    let mut source = StaticPriceSource::new();
    add_linear_series(&mut source, "SPY", date(2015, 1, 2), date(2015, 12, 31), dec!(200), dec!(0.3));
    add_linear_series(&mut source, "TLT", date(2015, 1, 2), date(2015, 12, 31), dec!(120), dec!(-0.05));

    let result = run(&config, &source);

    // The initial allocation counts as the first drift rebalance; the diverging prices must
    // force at least one more
    assert!(result.diagnostics.rebalances >= 2, "got {} rebalances", result.diagnostics.rebalances);
    assert!(!actions(&result, TradeAction::Sell).is_empty());

    // Within a day the sell side always precedes the buy side
    for (index, trade) in result.trades.iter().enumerate() {
        if trade.action == TradeAction::Sell {
            for earlier in &result.trades[..index] {
                assert!(
                    earlier.date < trade.date || earlier.action != TradeAction::Buy,
                    "a buy preceded a sell on {}", trade.date,
                );
            }
        }
    }
}

#[test]
fn contribution_caps() {
    let config = load_config("
        period: {start: 2024-01-02, end: 2025-06-30}
        universe: {symbols: [SPY]}
        initial_cash: 0
        account:
          type: Roth-IRA
          tax: {federal_ordinary: 0.24, federal_ltcg: 0.15, state: 0.05}
          contribution_caps: {enforce: true, roth: 7000}
        deposits: {cadence: monthly, amount: 1000, day_rule: 1}
        dividends: {mode: DRIP}
        rebalancing: {type: cashflow_only, cashflow: {min_cash: 0}}
        position_sizing: {method: EQUAL_WEIGHT}
    ");

    let mut source = StaticPriceSource::new();
    add_linear_series(&mut source, "SPY", date(2024, 1, 2), date(2025, 6, 30), dec!(100), dec!(0.01));

    let result = run(&config, &source);

    let deposits = actions(&result, TradeAction::Deposit);
    let in_2024 = deposits.iter().filter(|deposit| deposit.date.year() == 2024).count();
    let in_2025 = deposits.iter().filter(|deposit| deposit.date.year() == 2025).count();

    // The cap stops the 8th deposit and the schedule resumes in the next calendar year
    assert_eq!(in_2024, 7);
    assert_eq!(in_2025, 6);

    let skipped = result.warnings.iter()
        .filter(|warning| warning.message.contains("deposit"))
        .count();
    assert_eq!(skipped, 5);
}

#[test]
fn split_applies_before_dividend() {
    let config = load_config("
        period: {start: 2020-01-02, end: 2020-01-31}
        universe: {symbols: [SPY]}
        initial_cash: 10000
        account:
          type: Taxable
          tax: {federal_ordinary: 0.24, federal_ltcg: 0.15, state: 0.05}
        dividends: {mode: CASH}
        rebalancing: {type: calendar, calendar: {period: A}}
        position_sizing: {method: EQUAL_WEIGHT}
    ");

    let mut source = StaticPriceSource::new();
    for day in trading_days(date(2020, 1, 2), date(2020, 1, 31)) {
        let price = if day < date(2020, 1, 15) {dec!(100)} else {dec!(50)};
        source.add_bar("SPY", bar(day, price));
    }
    source.add_split(SplitAction {
        symbol: "SPY".to_owned(),
        date: date(2020, 1, 15),
        ratio: dec!(2),
    });
    source.add_dividend(DividendAction {
        symbol: "SPY".to_owned(),
        ex_date: date(2020, 1, 15),
        amount: dec!(0.5),
        qualified_fraction: dec!(1),
    });

    let result = run(&config, &source);

    // 100 shares bought on day one become 200 by the split, and the dividend pays on the
    // post-split share count
    let dividends = actions(&result, TradeAction::DividendCash);
    assert_eq!(dividends.len(), 1);
    assert_eq!(dividends[0].cash_delta, dec!(100));

    assert_eq!(result.open_lots.len(), 1);
    assert_eq!(result.open_lots[0].remaining_quantity, dec!(200));
    assert_eq!(result.open_lots[0].cost_basis, dec!(50));

    // The equity curve doesn't jump on the split day
    let split_day_index = result.equity.iter()
        .position(|point| point.date == date(2020, 1, 15))
        .unwrap();
    let before = result.equity[split_day_index - 1].total_value;
    let after = result.equity[split_day_index].total_value;
    assert_eq!(after, before + dec!(100));
}

#[test]
fn twr_identity_for_frictionless_run() {
    let config = load_config("
        period: {start: 2020-01-02, end: 2020-12-31}
        universe: {symbols: [SPY]}
        initial_cash: 10000
        account:
          type: Taxable
          tax: {federal_ordinary: 0.24, federal_ltcg: 0.15, state: 0.05}
        dividends: {mode: CASH}
        rebalancing: {type: cashflow_only, cashflow: {min_cash: 0}}
        position_sizing: {method: EQUAL_WEIGHT}
    ");

    let mut source = StaticPriceSource::new();
    add_linear_series(&mut source, "SPY", date(2020, 1, 2), date(2020, 12, 31), dec!(100), dec!(0.1));

    let result = run(&config, &source);

    let start = result.equity.first().unwrap();
    let end = result.equity.last().unwrap();
    assert_eq!(start.total_value, dec!(10000));

    let expected = ((end.total_value - dec!(10000)) / dec!(10000)).to_f64().unwrap();
    let twr = result.metrics.twr.unwrap();
    assert!((twr - expected).abs() < 1e-3, "TWR {twr} vs identity {expected}");

    // A frictionless single-asset hold also pins the IRR to the CAGR
    assert!(result.metrics.irr.is_some());
    assert!(result.metrics.cagr.is_some());
}

#[test]
fn single_trading_day_period() {
    let config = load_config("
        period: {start: 2020-01-03, end: 2020-01-05}
        universe: {symbols: [SPY]}
        initial_cash: 10000
        account:
          type: Taxable
          tax: {federal_ordinary: 0.24, federal_ltcg: 0.15, state: 0.05}
        dividends: {mode: CASH}
        rebalancing: {type: cashflow_only, cashflow: {min_cash: 0}}
        position_sizing: {method: EQUAL_WEIGHT}
    ");

    let mut source = StaticPriceSource::new();
    source.add_bar("SPY", bar(date(2020, 1, 3), dec!(100)));

    let result = run(&config, &source);

    assert_eq!(result.equity.len(), 1);
    assert!(result.metrics.volatility.is_none());
    assert!(result.metrics.sharpe.is_none());
    assert!(result.metrics.max_drawdown.is_none());
}

#[test]
fn missing_bar_is_fatal() {
    let config = load_config("
        period: {start: 2020-01-02, end: 2020-03-31}
        universe: {symbols: [SPY, AGG]}
        initial_cash: 10000
        account:
          type: Taxable
          tax: {federal_ordinary: 0.24, federal_ltcg: 0.15, state: 0.05}
        dividends: {mode: CASH}
        rebalancing: {type: cashflow_only, cashflow: {min_cash: 0}}
        position_sizing: {method: EQUAL_WEIGHT}
    ");

    let mut source = StaticPriceSource::new();
    add_linear_series(&mut source, "SPY", date(2020, 1, 2), date(2020, 3, 31), dec!(100), dec!(0.01));
    // AGG data stops mid-February without a delisting marker
    add_linear_series(&mut source, "AGG", date(2020, 1, 2), date(2020, 2, 14), dec!(110), dec!(0.01));

    let result = backtest(&config, &source, &CancellationToken::new()).unwrap();

    assert!(result.partial);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::DataUnavailable);
    assert_eq!(error.symbol.as_deref(), Some("AGG"));
    assert_eq!(error.date, date(2020, 2, 18)); // the first trading day without a bar

    // The state computed up to the prior day is preserved
    assert_eq!(result.equity.last().unwrap().date, date(2020, 2, 14));
}

#[test]
fn market_on_open_orders() {
    let config = load_config("
        period: {start: 2020-01-02, end: 2020-01-10}
        universe: {symbols: [SPY]}
        initial_cash: 10000
        account:
          type: Taxable
          tax: {federal_ordinary: 0.24, federal_ltcg: 0.15, state: 0.05}
        dividends: {mode: CASH}
        rebalancing: {type: calendar, calendar: {period: A}}
        orders: {timing: MOO}
        position_sizing: {method: EQUAL_WEIGHT}
    ");

    let mut source = StaticPriceSource::new();
    for day in trading_days(date(2020, 1, 2), date(2020, 1, 10)) {
        source.add_bar("SPY", Bar {
            date: day,
            open: dec!(100),
            high: dec!(111),
            low: dec!(99),
            close: dec!(110),
            adj_close: dec!(110),
            volume: 1_000_000,
        });
    }

    let result = run(&config, &source);

    // The initial buy executes at the open, the mark happens at the close
    let buys = actions(&result, TradeAction::Buy);
    assert_eq!(buys[0].price, dec!(100));
    assert_eq!(buys[0].quantity, dec!(100));
    assert_eq!(result.equity[0].total_value, dec!(11000));
}

#[test]
fn expense_ratio_drag() {
    let config = load_config("
        period: {start: 2020-01-02, end: 2020-12-31}
        universe: {symbols: [SPY]}
        initial_cash: 10000
        account:
          type: Taxable
          tax: {federal_ordinary: 0.24, federal_ltcg: 0.15, state: 0.05}
        dividends: {mode: CASH}
        rebalancing: {type: calendar, calendar: {period: A}}
        frictions: {use_actual_etf_er: true}
        position_sizing: {method: EQUAL_WEIGHT}
    ");

    let mut source = StaticPriceSource::new();
    add_linear_series(&mut source, "SPY", date(2020, 1, 2), date(2020, 12, 31), dec!(100), dec!(0));
    source.set_expense_ratio("SPY", dec!(0.01));

    let result = run(&config, &source);

    // Flat prices, so the only drift in the equity curve is the accumulated expense drag of
    // roughly 1% over the year
    let final_value = result.equity.last().unwrap().total_value;
    assert!(final_value > dec!(9890) && final_value < dec!(9910), "got {final_value}");
}

#[test]
fn taxes_paid_from_portfolio_cash() {
    let config = load_config("
        period: {start: 2020-01-02, end: 2021-01-05}
        universe: {symbols: [SPY]}
        initial_cash: 10000
        account:
          type: Taxable
          tax: {federal_ordinary: 0.24, federal_ltcg: 0.15, state: 0.05}
        dividends: {mode: CASH}
        rebalancing: {type: cashflow_only, cashflow: {min_cash: 200}}
        position_sizing: {method: EQUAL_WEIGHT}
    ");

    let mut source = StaticPriceSource::new();
    add_linear_series(&mut source, "SPY", date(2020, 1, 2), date(2021, 1, 5), dec!(100), dec!(0));
    source.add_dividend(DividendAction {
        symbol: "SPY".to_owned(),
        ex_date: date(2020, 6, 15),
        amount: dec!(1),
        qualified_fraction: dec!(0),
    });

    let result = run(&config, &source);

    // 100 shares x $1 of ordinary dividends taxed at 24% federal + 5% state
    assert_eq!(result.tax_years[0].year, 2020);
    assert_eq!(result.tax_years[0].ordinary_dividends, dec!(100));
    assert_eq!(result.tax_years[0].total_tax, dec!(29));

    // The tax is deducted from cash on the last trading day of 2020
    assert_eq!(result.equity.last().unwrap().cash, dec!(71));
    assert_eq!(result.diagnostics.external_tax_liability, dec!(0));
}

#[test]
fn taxes_paid_externally() {
    let config = load_config("
        period: {start: 2020-01-02, end: 2021-01-05}
        universe: {symbols: [SPY]}
        initial_cash: 10000
        account:
          type: Taxable
          tax:
            federal_ordinary: 0.24
            federal_ltcg: 0.15
            state: 0.05
            pay_taxes_from_external: true
        dividends: {mode: CASH}
        rebalancing: {type: cashflow_only, cashflow: {min_cash: 200}}
        position_sizing: {method: EQUAL_WEIGHT}
    ");

    let mut source = StaticPriceSource::new();
    add_linear_series(&mut source, "SPY", date(2020, 1, 2), date(2021, 1, 5), dec!(100), dec!(0));
    source.add_dividend(DividendAction {
        symbol: "SPY".to_owned(),
        ex_date: date(2020, 6, 15),
        amount: dec!(1),
        qualified_fraction: dec!(0),
    });

    let result = run(&config, &source);

    // The liability is recorded outside the portfolio and doesn't reduce its value
    assert_eq!(result.tax_years[0].total_tax, dec!(29));
    assert_eq!(result.equity.last().unwrap().cash, dec!(100));
    assert_eq!(result.diagnostics.external_tax_liability, dec!(29));
}

#[test]
fn cancellation_returns_partial_result() {
    let config = load_config("
        period: {start: 2020-01-02, end: 2020-12-31}
        universe: {symbols: [SPY]}
        initial_cash: 10000
        account:
          type: Taxable
          tax: {federal_ordinary: 0.24, federal_ltcg: 0.15, state: 0.05}
        dividends: {mode: CASH}
        rebalancing: {type: cashflow_only, cashflow: {min_cash: 0}}
        position_sizing: {method: EQUAL_WEIGHT}
    ");

    let mut source = StaticPriceSource::new();
    add_linear_series(&mut source, "SPY", date(2020, 1, 2), date(2020, 12, 31), dec!(100), dec!(0.01));

    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = backtest(&config, &source, &cancel).unwrap();
    assert!(result.partial);
    assert!(result.error.is_none());
    assert!(result.equity.is_empty());
}
