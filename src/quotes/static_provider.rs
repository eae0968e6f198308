use std::collections::BTreeMap;

use itertools::Itertools;

use crate::core::GenericResult;
use crate::time::{Date, Period};
use crate::types::Decimal;

use super::{Bar, DividendAction, PriceSource, SplitAction};

/// An immutable in-memory price source. Being preloaded, it's trivially safe to share between
/// simulations running in parallel threads.
#[derive(Default)]
pub struct StaticPriceSource {
    bars: BTreeMap<String, BTreeMap<Date, Bar>>,
    dividends: BTreeMap<String, Vec<DividendAction>>,
    splits: BTreeMap<String, Vec<SplitAction>>,
    expense_ratios: BTreeMap<String, Decimal>,
    delistings: BTreeMap<String, Date>,
}

impl StaticPriceSource {
    pub fn new() -> StaticPriceSource {
        StaticPriceSource::default()
    }

    pub fn add_bar(&mut self, symbol: &str, bar: Bar) {
        self.bars.entry(symbol.to_owned()).or_default().insert(bar.date, bar);
    }

    pub fn add_dividend(&mut self, dividend: DividendAction) {
        let dividends = self.dividends.entry(dividend.symbol.clone()).or_default();
        dividends.push(dividend);
        dividends.sort_by_key(|dividend| dividend.ex_date);
    }

    pub fn add_split(&mut self, split: SplitAction) {
        let splits = self.splits.entry(split.symbol.clone()).or_default();
        splits.push(split);
        splits.sort_by_key(|split| split.date);
    }

    pub fn set_expense_ratio(&mut self, symbol: &str, ratio: Decimal) {
        self.expense_ratios.insert(symbol.to_owned(), ratio);
    }

    pub fn set_delisting(&mut self, symbol: &str, date: Date) {
        self.delistings.insert(symbol.to_owned(), date);
    }
}

impl PriceSource for StaticPriceSource {
    fn bars(&self, symbol: &str, period: Period) -> GenericResult<Vec<Bar>> {
        let bars = self.bars.get(symbol).ok_or_else(|| format!(
            "There is no price data for {symbol}"))?;

        Ok(bars.range(period.first_date()..=period.last_date())
            .map(|(_, &bar)| bar)
            .collect_vec())
    }

    fn dividends(&self, symbol: &str, period: Period) -> GenericResult<Vec<DividendAction>> {
        Ok(self.dividends.get(symbol).map(|dividends| {
            dividends.iter()
                .filter(|dividend| period.contains(dividend.ex_date))
                .cloned()
                .collect_vec()
        }).unwrap_or_default())
    }

    fn splits(&self, symbol: &str, period: Period) -> GenericResult<Vec<SplitAction>> {
        Ok(self.splits.get(symbol).map(|splits| {
            splits.iter()
                .filter(|split| period.contains(split.date))
                .cloned()
                .collect_vec()
        }).unwrap_or_default())
    }

    fn expense_ratio(&self, symbol: &str) -> GenericResult<Option<Decimal>> {
        Ok(self.expense_ratios.get(symbol).copied())
    }

    fn is_delisted(&self, symbol: &str, date: Date) -> GenericResult<bool> {
        Ok(self.delistings.get(symbol).is_some_and(|&delisted| date > delisted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(date: Date, close: Decimal) -> Bar {
        Bar {date, open: close, high: close, low: close, close, adj_close: close, volume: 1000}
    }

    #[test]
    fn bar_ranges() {
        let mut source = StaticPriceSource::new();
        source.add_bar("SPY", bar(date!(2020, 1, 2), dec!(320)));
        source.add_bar("SPY", bar(date!(2020, 1, 3), dec!(322)));
        source.add_bar("SPY", bar(date!(2020, 1, 6), dec!(321)));

        let period = Period::new(date!(2020, 1, 3), date!(2020, 1, 6)).unwrap();
        let bars = source.bars("SPY", period).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, date!(2020, 1, 3));
        assert_eq!(bars[1].date, date!(2020, 1, 6));

        assert!(source.bars("AGG", period).is_err());
    }

    #[test]
    fn delisting() {
        let mut source = StaticPriceSource::new();
        source.set_delisting("TWTR", date!(2022, 10, 27));

        assert!(!source.is_delisted("TWTR", date!(2022, 10, 27)).unwrap());
        assert!(source.is_delisted("TWTR", date!(2022, 10, 28)).unwrap());
        assert!(!source.is_delisted("SPY", date!(2022, 10, 28)).unwrap());
    }
}
