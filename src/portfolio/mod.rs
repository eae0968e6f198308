mod lots;
mod wash_sales;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use chrono::Datelike;
use serde::Serialize;

use crate::config::{AccountType, DividendMode, DividendsConfig, StrategyConfig};
use crate::core::EmptyResult;
use crate::taxes::{HoldingTerm, RealizedEvent, TaxLedger};
use crate::time::{self, Date};
use crate::types::Decimal;
use crate::util::{self, RoundingMethod};

pub use lots::{disposal_order, total_shares, Lot, LotId};
pub use wash_sales::{WashSaleAttribution, WashSaleTracker};

/// Shares are tracked with this precision and always rounded down on acquisition.
pub const QUANTITY_PRECISION: u32 = 4;

/// A holding period of more than a full year (365 days counted from the acquisition day
/// inclusive) makes a disposal long-term.
pub const LONG_TERM_HOLDING_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TradeAction {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
    #[serde(rename = "DRIP")]
    Drip,
    #[serde(rename = "DIVIDEND-CASH")]
    DividendCash,
    #[serde(rename = "DEPOSIT")]
    Deposit,
}

/// The effects of one portfolio operation. The driver wraps executions into trade records,
/// assigning their ids.
#[derive(Debug, Clone)]
pub struct Execution {
    pub action: TradeAction,
    pub symbol: Option<String>,
    pub quantity: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    pub slippage: Decimal,
    pub cash_delta: Decimal,
    pub lot_ids: Vec<LotId>,
    pub realized: Vec<usize>,
}

impl Execution {
    fn cash_only(action: TradeAction, symbol: Option<&str>, cash_delta: Decimal) -> Execution {
        Execution {
            action,
            symbol: symbol.map(ToOwned::to_owned),
            quantity: dec!(0),
            price: dec!(0),
            commission: dec!(0),
            slippage: dec!(0),
            cash_delta,
            lot_ids: Vec::new(),
            realized: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationError {
    InsufficientCash {required: Decimal, available: Decimal},
    InsufficientShares {symbol: String, requested: Decimal, available: Decimal},
    ContributionCapExceeded {requested: Decimal, room: Decimal},
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationError::InsufficientCash {required, available} => write!(
                f, "Insufficient cash: {required} is required, but only {available} is available"),
            OperationError::InsufficientShares {symbol, requested, available} => write!(
                f, "Insufficient {symbol} shares: an attempt to sell {requested} with only {available} in the position"),
            OperationError::ContributionCapExceeded {requested, room} => write!(
                f, "Contribution cap exceeded: an attempt to deposit {requested} with only {room} of contribution room left"),
        }
    }
}

impl std::error::Error for OperationError {
}

pub type OperationResult<T> = Result<T, OperationError>;

#[derive(Debug, Clone, Copy)]
pub enum SellAmount {
    Shares(Decimal),
    Notional(Decimal),
}

/// The ledger of open tax lots and cash. Operations are transactional: a failed one leaves the
/// portfolio untouched. Realized gains and dividend income are routed to the passed tax ledger,
/// never the other way around.
pub struct Portfolio {
    lot_method: crate::config::LotMethod,
    commission: Decimal,
    slippage: Decimal,
    annual_cap: Option<Decimal>,
    allow_partial_deposits: bool,
    wash_sales: Option<WashSaleTracker>,

    cash: Decimal,
    lots: BTreeMap<String, Vec<Lot>>,
    next_lot_id: LotId,

    cumulative_deposits: Decimal,
    contribution_year: i32,
    contributions_ytd: Decimal,
    recorded_cash_movements: Decimal,
}

impl Portfolio {
    pub fn new(config: &StrategyConfig) -> Portfolio {
        let account = config.account.type_;
        let wash_sales = (account == AccountType::Taxable && config.account.tax.apply_wash_sale)
            .then(WashSaleTracker::new);

        Portfolio {
            lot_method: config.lots.method,
            commission: config.frictions.commission_per_trade,
            slippage: config.frictions.slippage(),
            annual_cap: config.account.contribution_caps.annual_cap(account, config.account.catch_up),
            allow_partial_deposits: config.account.contribution_caps.allow_partial,
            wash_sales,

            cash: config.initial_cash,
            lots: BTreeMap::new(),
            next_lot_id: 1,

            cumulative_deposits: config.initial_cash,
            contribution_year: config.period.start.year(),
            contributions_ytd: dec!(0),
            recorded_cash_movements: config.initial_cash,
        }
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn cumulative_deposits(&self) -> Decimal {
        self.cumulative_deposits
    }

    pub fn shares(&self, symbol: &str) -> Decimal {
        self.lots.get(symbol).map(|lots| total_shares(lots)).unwrap_or_default()
    }

    pub fn holdings(&self) -> impl Iterator<Item = (&String, Decimal)> {
        self.lots.iter()
            .map(|(symbol, lots)| (symbol, total_shares(lots)))
            .filter(|(_, shares)| !shares.is_zero())
    }

    pub fn open_lots(&self) -> impl Iterator<Item = &Lot> {
        self.lots.values().flatten()
    }

    pub fn symbol_lots(&self, symbol: &str) -> &[Lot] {
        self.lots.get(symbol).map(Vec::as_slice).unwrap_or_default()
    }

    /// Positions value using the provided prices. Never mutates the portfolio.
    pub fn market_value(&self, prices: &HashMap<String, Decimal>) -> crate::core::GenericResult<Decimal> {
        let mut value = dec!(0);

        for (symbol, shares) in self.holdings() {
            let price = prices.get(symbol.as_str()).ok_or_else(|| format!(
                "There is no price for {symbol}"))?;
            value += shares * price;
        }

        Ok(value)
    }

    pub fn deposit(&mut self, amount: Decimal, date: Date) -> OperationResult<Execution> {
        assert!(amount.is_sign_positive() && !amount.is_zero());

        if date.year() != self.contribution_year {
            self.contribution_year = date.year();
            self.contributions_ytd = dec!(0);
        }

        let mut credited = amount;
        if let Some(cap) = self.annual_cap {
            let room = (cap - self.contributions_ytd).max(dec!(0));
            if credited > room {
                if !self.allow_partial_deposits || room.is_zero() {
                    return Err(OperationError::ContributionCapExceeded {requested: amount, room});
                }
                credited = room;
            }
        }

        self.credit_cash(credited);
        self.cumulative_deposits += credited;
        self.contributions_ytd += credited;

        Ok(Execution::cash_only(TradeAction::Deposit, None, credited))
    }

    /// Converts a cash notional into shares at the given price, worsened by slippage and
    /// reduced by commission. Creates one new lot.
    pub fn buy(
        &mut self, symbol: &str, notional: Decimal, price: Decimal, date: Date,
        ledger: &mut TaxLedger,
    ) -> OperationResult<Execution> {
        self.buy_impl(symbol, notional, price, date, TradeAction::Buy, self.commission, self.slippage, ledger)
    }

    fn buy_impl(
        &mut self, symbol: &str, notional: Decimal, price: Decimal, date: Date,
        action: TradeAction, commission: Decimal, slippage: Decimal, ledger: &mut TaxLedger,
    ) -> OperationResult<Execution> {
        assert!(price.is_sign_positive() && !price.is_zero());

        if notional > self.cash {
            return Err(OperationError::InsufficientCash {required: notional, available: self.cash});
        }

        let execution_price = price * (dec!(1) + slippage);
        let quantity = util::round_with(
            (notional - commission) / execution_price, QUANTITY_PRECISION, RoundingMethod::Truncate);

        if quantity.is_sign_negative() || quantity.is_zero() {
            return Err(OperationError::InsufficientCash {required: commission, available: notional});
        }

        let cost = quantity * execution_price + commission;
        self.debit_cash(cost);

        let lot_id = self.next_lot_id;
        self.next_lot_id += 1;

        let mut lot = Lot::new(lot_id, symbol, quantity, execution_price, date);

        if let Some(tracker) = self.wash_sales.as_mut() {
            for attribution in tracker.on_buy(symbol, date, lot_id, quantity) {
                assert_eq!(attribution.lot_id, lot_id);
                lot.attribute_wash_sale(attribution.disallowed);
                ledger.apply_wash_sale(attribution.event_index, attribution.disallowed);
            }
        }

        self.lots.entry(symbol.to_owned()).or_default().push(lot);

        Ok(Execution {
            action,
            symbol: Some(symbol.to_owned()),
            quantity,
            price: execution_price,
            commission,
            slippage: quantity * (execution_price - price),
            cash_delta: -cost,
            lot_ids: vec![lot_id],
            realized: Vec::new(),
        })
    }

    /// Sells shares consuming lots according to the configured disposal method and routes the
    /// realized results to the tax ledger.
    pub fn sell(
        &mut self, symbol: &str, amount: SellAmount, price: Decimal, date: Date,
        ledger: &mut TaxLedger,
    ) -> OperationResult<Execution> {
        assert!(price.is_sign_positive() && !price.is_zero());

        let execution_price = price * (dec!(1) - self.slippage);
        let available = self.shares(symbol);

        let quantity = match amount {
            SellAmount::Shares(quantity) => quantity,
            SellAmount::Notional(notional) => std::cmp::min(
                util::round_with(notional / execution_price, QUANTITY_PRECISION, RoundingMethod::Truncate),
                available,
            ),
        };
        assert!(quantity.is_sign_positive() && !quantity.is_zero());

        if quantity > available {
            return Err(OperationError::InsufficientShares {
                symbol: symbol.to_owned(),
                requested: quantity,
                available,
            });
        }

        let lots = self.lots.get_mut(symbol).unwrap();

        let mut consumed = Vec::new();
        let mut to_sell = quantity;

        for index in disposal_order(lots, self.lot_method) {
            if to_sell.is_zero() {
                break;
            }

            let portion = std::cmp::min(lots[index].remaining_quantity, to_sell);
            lots[index].consume(portion);
            to_sell -= portion;
            consumed.push((index, portion));
        }
        assert!(to_sell.is_zero());

        let consumed_ids: HashSet<LotId> = consumed.iter()
            .map(|&(index, _)| lots[index].id)
            .collect();

        let proceeds = quantity * execution_price - self.commission;
        self.cash += proceeds;
        self.recorded_cash_movements += proceeds;

        let mut lot_ids = Vec::new();
        let mut realized = Vec::new();
        let mut attributions = Vec::new();

        for &(index, portion) in &consumed {
            let lot = &self.lots[symbol][index];
            lot_ids.push(lot.id);

            let portion_proceeds = portion * execution_price - self.commission * portion / quantity;
            let cost_basis = portion * lot.cost_basis;
            let holding_days = time::holding_days(lot.acquisition_date, date);

            let event = RealizedEvent {
                date,
                symbol: symbol.to_owned(),
                quantity: portion,
                proceeds: portion_proceeds,
                cost_basis,
                holding_days,
                term: if holding_days <= LONG_TERM_HOLDING_DAYS {
                    HoldingTerm::ShortTerm
                } else {
                    HoldingTerm::LongTerm
                },
                wash_sale_disallowed: dec!(0),
            };

            let gain = event.gain();
            let event_index = ledger.record_realized(event);
            realized.push(event_index);

            if gain.is_sign_negative() && !gain.is_zero() {
                if let Some(tracker) = self.wash_sales.as_mut() {
                    attributions.extend(tracker.on_loss_sell(
                        symbol, date, portion, -gain / portion, event_index, &consumed_ids));
                }
            }
        }

        for attribution in attributions {
            let lot = self.lots.get_mut(symbol).unwrap().iter_mut()
                .find(|lot| lot.id == attribution.lot_id)
                .expect("wash sale attribution to an unknown lot");
            lot.attribute_wash_sale(attribution.disallowed);
            ledger.apply_wash_sale(attribution.event_index, attribution.disallowed);
        }

        self.drop_closed_lots(symbol);

        Ok(Execution {
            action: TradeAction::Sell,
            symbol: Some(symbol.to_owned()),
            quantity,
            price: execution_price,
            commission: self.commission,
            slippage: quantity * (price - execution_price),
            cash_delta: proceeds,
            lot_ids,
            realized,
        })
    }

    /// Applies a cash dividend: eligible shares are the lots open on the ex-date. In DRIP mode
    /// the cash is immediately reinvested at the closing price, commission-free.
    pub fn apply_dividend(
        &mut self, symbol: &str, per_share: Decimal, qualified_fraction: Decimal, date: Date,
        dividends: &DividendsConfig, close_price: Decimal, ledger: &mut TaxLedger,
    ) -> Vec<Execution> {
        let shares = self.shares(symbol);
        if shares.is_zero() {
            return Vec::new();
        }

        let amount = util::round(shares * per_share, 2);
        if amount.is_zero() {
            return Vec::new();
        }

        let qualified = util::round(amount * qualified_fraction, 2);
        ledger.record_dividend(date, qualified, amount - qualified);

        self.credit_cash(amount);

        let mut executions = Vec::with_capacity(2);
        executions.push(Execution {
            quantity: shares,
            price: per_share,
            ..Execution::cash_only(TradeAction::DividendCash, Some(symbol), amount)
        });

        if dividends.mode == DividendMode::Drip && self.reinvestment_worthwhile(amount, shares, close_price, dividends) {
            // A dividend too small to buy a single rounded share quantum just stays in cash
            if let Ok(drip) = self.buy_impl(
                symbol, amount, close_price, date, TradeAction::Drip, dec!(0), dec!(0), ledger,
            ) {
                executions.push(drip);
            }
        }

        executions
    }

    fn reinvestment_worthwhile(
        &self, amount: Decimal, shares: Decimal, close_price: Decimal, dividends: &DividendsConfig,
    ) -> bool {
        match dividends.reinvest_threshold_pct {
            Some(threshold) => amount >= shares * close_price * threshold / dec!(100),
            None => true,
        }
    }

    /// Multiplies remaining quantities by the split ratio and divides per-share bases by it.
    pub fn apply_split(&mut self, symbol: &str, ratio: Decimal, _date: Date) {
        assert!(ratio.is_sign_positive() && !ratio.is_zero());

        if let Some(lots) = self.lots.get_mut(symbol) {
            for lot in lots {
                lot.original_quantity *= ratio;
                lot.remaining_quantity *= ratio;
                lot.cost_basis = util::round(lot.cost_basis / ratio, 6);
            }
        }
    }

    /// Credits interest accrued on idle cash.
    pub fn credit_interest(&mut self, amount: Decimal) {
        assert!(amount.is_sign_positive());
        self.credit_cash(amount);
    }

    /// Deducts the annual tax payment. The balance is allowed to go negative - the next
    /// operation that needs the cash will fail appropriately.
    pub fn pay_tax(&mut self, amount: Decimal) {
        assert!(amount.is_sign_positive());
        self.debit_cash(amount);
    }

    /// Checks the invariants every operation must preserve. A violation is a bug in the engine.
    pub fn verify_consistency(&self) -> EmptyResult {
        for lot in self.open_lots() {
            if lot.remaining_quantity.is_sign_negative() || lot.remaining_quantity.is_zero() {
                return Err!("Got an open lot #{} with invalid remaining quantity: {}",
                    lot.id, lot.remaining_quantity);
            }
        }

        let drift = (self.recorded_cash_movements - self.cash).abs();
        if drift > dec!(0.000001) {
            return Err!("Cash balance diverged from the recorded cash movements by {drift}");
        }

        Ok(())
    }

    fn credit_cash(&mut self, amount: Decimal) {
        self.cash += amount;
        self.recorded_cash_movements += amount;
    }

    fn debit_cash(&mut self, amount: Decimal) {
        self.cash -= amount;
        self.recorded_cash_movements -= amount;
    }

    fn drop_closed_lots(&mut self, symbol: &str) {
        let lots = self.lots.get_mut(symbol).unwrap();

        for lot in lots.iter().filter(|lot| lot.is_closed()) {
            if let Some(tracker) = self.wash_sales.as_mut() {
                tracker.retire_lot(symbol, lot.id);
            }
        }
        lots.retain(|lot| !lot.is_closed());

        if lots.is_empty() {
            self.lots.remove(symbol);
        }
    }
}
