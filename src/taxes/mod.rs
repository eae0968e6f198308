mod rates;

use std::collections::BTreeMap;

use chrono::Datelike;
use serde::Serialize;

use crate::config::{AccountType, TaxParamsConfig};
use crate::time::Date;
use crate::types::Decimal;
use crate::util;

pub use rates::TaxRates;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldingTerm {
    ShortTerm,
    LongTerm,
}

/// The result of selling a portion of one tax lot.
#[derive(Debug, Clone, Serialize)]
pub struct RealizedEvent {
    pub date: Date,
    pub symbol: String,
    pub quantity: Decimal,
    pub proceeds: Decimal,
    pub cost_basis: Decimal,
    pub holding_days: i64,
    pub term: HoldingTerm,
    pub wash_sale_disallowed: Decimal,
}

impl RealizedEvent {
    pub fn gain(&self) -> Decimal {
        self.proceeds - self.cost_basis
    }

    /// The gain that actually counts for taxes: the raw result with the disallowed part of the
    /// loss added back.
    pub fn allowed_gain(&self) -> Decimal {
        self.gain() + self.wash_sale_disallowed
    }

    pub fn is_wash_sale(&self) -> bool {
        !self.wash_sale_disallowed.is_zero()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxYearSummary {
    pub year: i32,
    pub short_term_gains: Decimal,
    pub long_term_gains: Decimal,
    pub qualified_dividends: Decimal,
    pub ordinary_dividends: Decimal,
    pub interest_income: Decimal,
    pub total_tax: Decimal,
    pub wash_sale_count: u32,
}

#[derive(Default)]
struct TaxYear {
    short_term: Decimal,
    long_term: Decimal,
    qualified_dividends: Decimal,
    ordinary_dividends: Decimal,
    interest: Decimal,
    wash_sales: u32,
    closed: bool,
}

/// Accumulates realized gains and investment income by calendar year and computes the annual
/// tax at year close. Owns all realized events produced by the portfolio.
pub struct TaxLedger {
    account: AccountType,
    rates: TaxRates,
    events: Vec<RealizedEvent>,
    years: BTreeMap<i32, TaxYear>,
    summaries: Vec<TaxYearSummary>,
}

impl TaxLedger {
    pub fn new(account: AccountType, tax: &TaxParamsConfig) -> TaxLedger {
        TaxLedger {
            account,
            rates: TaxRates::new(tax),
            events: Vec::new(),
            years: BTreeMap::new(),
            summaries: Vec::new(),
        }
    }

    pub fn record_realized(&mut self, event: RealizedEvent) -> usize {
        let year = self.year(event.date);

        match event.term {
            HoldingTerm::ShortTerm => year.short_term += event.allowed_gain(),
            HoldingTerm::LongTerm => year.long_term += event.allowed_gain(),
        }

        self.events.push(event);
        self.events.len() - 1
    }

    /// Amends an already recorded event with a wash-sale disallowance: the loss shrinks, so the
    /// year's realized result grows by the disallowed amount.
    pub fn apply_wash_sale(&mut self, index: usize, disallowed: Decimal) {
        assert!(disallowed.is_sign_positive() && !disallowed.is_zero());

        let event = &mut self.events[index];
        assert!(event.gain() + event.wash_sale_disallowed + disallowed <= dec!(0.000001));
        event.wash_sale_disallowed += disallowed;

        let (date, term) = (event.date, event.term);
        let year = self.year(date);
        match term {
            HoldingTerm::ShortTerm => year.short_term += disallowed,
            HoldingTerm::LongTerm => year.long_term += disallowed,
        }
        year.wash_sales += 1;
    }

    pub fn record_dividend(&mut self, date: Date, qualified: Decimal, ordinary: Decimal) {
        let year = self.year(date);
        year.qualified_dividends += qualified;
        year.ordinary_dividends += ordinary;
    }

    pub fn record_interest(&mut self, date: Date, amount: Decimal) {
        self.year(date).interest += amount;
    }

    /// Closes the tax year and returns its summary. The returned tax is what the driver deducts
    /// from cash (or records as an external liability) on the last trading day of the year.
    pub fn close_year(&mut self, year: i32) -> TaxYearSummary {
        let accumulator = self.years.entry(year).or_default();
        assert!(!accumulator.closed, "An attempt to close tax year {year} twice");
        accumulator.closed = true;

        let short_term = util::round(accumulator.short_term, 2);
        let long_term = util::round(accumulator.long_term, 2);
        let qualified_dividends = util::round(accumulator.qualified_dividends, 2);
        let ordinary_dividends = util::round(accumulator.ordinary_dividends, 2);
        let interest = util::round(accumulator.interest, 2);

        let total_tax = if self.account.is_tax_deferred() {
            dec!(0)
        } else {
            let (taxable_short, taxable_long) = offset_losses(short_term, long_term);
            self.rates.annual_tax(
                taxable_short + ordinary_dividends + interest,
                taxable_long + qualified_dividends)
        };

        let summary = TaxYearSummary {
            year,
            short_term_gains: short_term,
            long_term_gains: long_term,
            qualified_dividends,
            ordinary_dividends,
            interest_income: interest,
            total_tax,
            wash_sale_count: accumulator.wash_sales,
        };

        self.summaries.push(summary.clone());
        summary
    }

    pub fn events(&self) -> &[RealizedEvent] {
        &self.events
    }

    pub fn summaries(&self) -> &[TaxYearSummary] {
        &self.summaries
    }

    pub fn wash_sale_count(&self) -> u32 {
        self.years.values().map(|year| year.wash_sales).sum()
    }

    fn year(&mut self, date: Date) -> &mut TaxYear {
        self.years.entry(date.year()).or_default()
    }
}

/// Losses offset gains within class first, then cross-class. There is no loss carry-forward
/// across years: a net loss left after offsetting just zeroes the taxable amount.
fn offset_losses(short_term: Decimal, long_term: Decimal) -> (Decimal, Decimal) {
    let mut short = short_term;
    let mut long = long_term;

    if short < dec!(0) && long > dec!(0) {
        long = (long + short).max(dec!(0));
        short = dec!(0);
    } else if long < dec!(0) && short > dec!(0) {
        short = (short + long).max(dec!(0));
        long = dec!(0);
    }

    (short.max(dec!(0)), long.max(dec!(0)))
}
