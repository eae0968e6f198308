use std::collections::{BTreeMap, HashMap, HashSet};

use log::debug;

use crate::calendar::MarketCalendar;
use crate::config::{
    AccountType, LotMethod, PositionSizingMethod, RebalancingType, StrategyConfig};
use crate::core::GenericResult;
use crate::portfolio::{disposal_order, Lot, Portfolio, LONG_TERM_HOLDING_DAYS, QUANTITY_PRECISION};
use crate::time::{self, Date, Period};
use crate::types::Decimal;
use crate::util::{self, RoundingMethod};

/// A mark-to-market snapshot the driver hands to the rebalancer each day.
pub struct Valuation {
    pub cash: Decimal,
    pub positions: BTreeMap<String, Decimal>,
    pub total_value: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum RebalanceReason {
    Calendar,
    Drift,
    Cashflow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSell {
    pub symbol: String,
    pub shares: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedBuy {
    pub symbol: String,
    pub notional: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct TradePlan {
    pub sells: Vec<PlannedSell>,
    pub buys: Vec<PlannedBuy>,
    pub scaled_down: bool,
}

impl TradePlan {
    pub fn is_empty(&self) -> bool {
        self.sells.is_empty() && self.buys.is_empty()
    }
}

// Money is tracked with cents precision, so a smaller leg is not representable as a cash delta
const MIN_TRADE_VALUE: Decimal = dec!(0.01);

/// Decides when the portfolio should be rebalanced and what trades to do, ordering sells
/// tax-aware. The rebalancer only ever reads the portfolio - the produced plan is executed by
/// the driver.
pub struct Rebalancer {
    type_: RebalancingType,
    calendar_dates: HashSet<Date>,
    drift_abs: Option<Decimal>,
    drift_rel: Option<Decimal>,
    cashflow_min_cash: Decimal,
    taxable: bool,
    commission: Decimal,
    slippage: Decimal,
    weights: BTreeMap<String, Decimal>,
}

impl Rebalancer {
    pub fn new(config: &StrategyConfig, calendar: &MarketCalendar, period: Period) -> GenericResult<Rebalancer> {
        let rebalancing = &config.rebalancing;

        let calendar_dates = match rebalancing.type_ {
            RebalancingType::Calendar | RebalancingType::Both => {
                let cadence = rebalancing.calendar.as_ref().unwrap().period.cadence();
                calendar.schedule(period, cadence, 1)?.into_iter()
                    .map(|date| date.posted)
                    .collect()
            },
            RebalancingType::Drift | RebalancingType::CashflowOnly => HashSet::new(),
        };

        let (drift_abs, drift_rel) = match &rebalancing.drift {
            Some(drift) => (
                drift.abs_pct.map(|pct| pct / dec!(100)),
                drift.rel_pct.map(|pct| pct / dec!(100)),
            ),
            None => (None, None),
        };

        Ok(Rebalancer {
            type_: rebalancing.type_,
            calendar_dates,
            drift_abs,
            drift_rel,
            cashflow_min_cash: rebalancing.cashflow.as_ref()
                .map(|cashflow| cashflow.min_cash)
                .unwrap_or_default(),
            taxable: config.account.type_ == AccountType::Taxable,
            commission: config.frictions.commission_per_trade,
            slippage: config.frictions.slippage(),
            weights: target_weights(config),
        })
    }

    pub fn target_weights(&self) -> &BTreeMap<String, Decimal> {
        &self.weights
    }

    /// Whether a rebalance is due today. `cash_added` tells that a deposit or a cash dividend
    /// has credited the portfolio today.
    pub fn check(&self, date: Date, valuation: &Valuation, cash_added: bool) -> Option<RebalanceReason> {
        let calendar_due = || self.calendar_dates.contains(&date).then_some(RebalanceReason::Calendar);
        let drift_due = || self.drifted(valuation).then_some(RebalanceReason::Drift);

        match self.type_ {
            RebalancingType::Calendar => calendar_due(),
            RebalancingType::Drift => drift_due(),
            RebalancingType::Both => calendar_due().or_else(drift_due),
            RebalancingType::CashflowOnly => {
                (cash_added && valuation.cash >= self.cashflow_min_cash && !valuation.cash.is_zero())
                    .then_some(RebalanceReason::Cashflow)
            },
        }
    }

    fn drifted(&self, valuation: &Valuation) -> bool {
        if valuation.total_value.is_zero() {
            return false;
        }

        for (symbol, &target) in &self.weights {
            let current = valuation.positions.get(symbol).copied().unwrap_or_default()
                / valuation.total_value;
            let deviation = (current - target).abs();

            if let Some(threshold) = self.drift_abs {
                if deviation > threshold {
                    return true;
                }
            }

            if let Some(threshold) = self.drift_rel {
                if !target.is_zero() && deviation / target > threshold {
                    return true;
                }
            }
        }

        false
    }

    /// Builds the trade plan: sell side first in tax-aware order, then buys sized to the cash
    /// that will be available after the sells, scaled down proportionally if they don't fit.
    pub fn build_plan(
        &self, date: Date, portfolio: &Portfolio, valuation: &Valuation,
        prices: &HashMap<String, Decimal>,
    ) -> TradePlan {
        let mut plan = TradePlan::default();
        if valuation.total_value.is_zero() {
            return plan;
        }

        let mut sells = Vec::new();
        let mut buys = Vec::new();

        for (symbol, &weight) in &self.weights {
            let target_value = valuation.total_value * weight;
            let current_value = valuation.positions.get(symbol).copied().unwrap_or_default();
            let delta = target_value - current_value;
            let Some(&price) = prices.get(symbol) else {
                continue; // delisted symbols can't be traded back to target
            };

            if delta >= MIN_TRADE_VALUE {
                buys.push((symbol.clone(), delta));
            } else if delta <= -MIN_TRADE_VALUE {
                let position = portfolio.shares(symbol);
                let mut shares = util::round_with(
                    -delta / price, QUANTITY_PRECISION, RoundingMethod::Truncate);

                if weight.is_zero() || shares > position {
                    shares = position;
                }
                if shares.is_zero() {
                    continue;
                }

                let class = if self.taxable {
                    classify_sell(portfolio.symbol_lots(symbol), shares, price, date)
                } else {
                    SellClass::Exempt
                };

                sells.push((symbol.clone(), shares, class, -delta));
            }
        }

        // Losses are realized first, then long-term gains; short-term gains go last. Inside a
        // class - by largest overweight. In a non-taxable account only the overweight matters.
        sells.sort_by(|a, b| a.2.cmp(&b.2).then(b.3.cmp(&a.3)));
        buys.sort_by(|a, b| b.1.cmp(&a.1));

        let mut cash_after_sells = valuation.cash;
        for (symbol, shares, class, _) in sells {
            let price = prices[&symbol];
            cash_after_sells += shares * price * (dec!(1) - self.slippage) - self.commission;
            debug!("* Planned sell: {shares} {symbol} ({class:?})");
            plan.sells.push(PlannedSell {symbol, shares});
        }

        let total_buy_notional: Decimal = buys.iter().map(|(_, notional)| notional).sum();
        if total_buy_notional > cash_after_sells && !total_buy_notional.is_zero() {
            let scale = (cash_after_sells / total_buy_notional).max(dec!(0));
            for (_, notional) in &mut buys {
                *notional = util::round_with(*notional * scale, 2, RoundingMethod::Truncate);
            }
            plan.scaled_down = true;
        }

        for (symbol, notional) in buys {
            // A notional the commission would swallow can't produce any shares
            if notional < MIN_TRADE_VALUE || notional <= self.commission {
                continue;
            }
            debug!("* Planned buy: {symbol} for {notional}");
            plan.buys.push(PlannedBuy {symbol, notional});
        }

        plan
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SellClass {
    Loss,
    LongTermGain,
    ShortTermGain,
    Exempt,
}

// Estimates what character a sell of the given size would have, consuming lots HIFO: selling
// the highest basis first realizes losses before gains.
fn classify_sell(lots: &[Lot], shares: Decimal, price: Decimal, date: Date) -> SellClass {
    let mut remaining = shares;
    let mut gain = dec!(0);
    let mut short_term_gain = dec!(0);

    for index in disposal_order(lots, LotMethod::HIFO) {
        if remaining.is_zero() {
            break;
        }

        let lot = &lots[index];
        let portion = std::cmp::min(lot.remaining_quantity, remaining);
        remaining -= portion;

        let lot_gain = portion * (price - lot.cost_basis);
        gain += lot_gain;

        if lot_gain > dec!(0) && time::holding_days(lot.acquisition_date, date) <= LONG_TERM_HOLDING_DAYS {
            short_term_gain += lot_gain;
        }
    }

    if gain < dec!(0) {
        SellClass::Loss
    } else if short_term_gain > gain - short_term_gain {
        SellClass::ShortTermGain
    } else {
        SellClass::LongTermGain
    }
}

fn target_weights(config: &StrategyConfig) -> BTreeMap<String, Decimal> {
    match config.position_sizing.method {
        PositionSizingMethod::EqualWeight => {
            let count = Decimal::from(config.universe.symbols.len());
            config.universe.symbols.iter()
                .map(|symbol| (symbol.clone(), dec!(1) / count))
                .collect()
        },
        PositionSizingMethod::CustomWeights => {
            let weights = config.position_sizing.custom_weights.as_ref().unwrap();
            let total: Decimal = weights.values().sum();

            config.universe.symbols.iter()
                .map(|symbol| {
                    let weight = weights.get(symbol).copied().unwrap_or_default();
                    (symbol.clone(), weight / total)
                })
                .collect()
        },
        PositionSizingMethod::VolTarget | PositionSizingMethod::MomentumTopN => {
            unreachable!("rejected by config validation");
        },
    }
}
