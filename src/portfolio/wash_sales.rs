use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Duration;

use crate::time::Date;
use crate::types::Decimal;

use super::lots::LotId;

const WINDOW_DAYS: i64 = 30;

/// A disallowed loss to add to the cost basis of a replacement lot.
#[derive(Debug, Clone, PartialEq)]
pub struct WashSaleAttribution {
    pub lot_id: LotId,
    pub event_index: usize,
    pub disallowed: Decimal,
}

struct BuyRecord {
    date: Date,
    lot_id: LotId,
    unmatched: Decimal,
}

struct WashWindow {
    expires: Date,
    loss_per_share: Decimal,
    unmatched: Decimal,
    event_index: usize,
}

/// Tracks replacement purchases around loss sells. Each loss-producing realized event opens a
/// window of 30 calendar days back and 30 forward, both inclusive; shares bought inside it are
/// matched FIFO and the matched part of the loss is disallowed.
#[derive(Default)]
pub struct WashSaleTracker {
    buys: HashMap<String, VecDeque<BuyRecord>>,
    windows: HashMap<String, VecDeque<WashWindow>>,
}

impl WashSaleTracker {
    pub fn new() -> WashSaleTracker {
        WashSaleTracker::default()
    }

    /// Registers a buy (including DRIP) and matches it against open loss windows of the symbol.
    pub fn on_buy(&mut self, symbol: &str, date: Date, lot_id: LotId, quantity: Decimal) -> Vec<WashSaleAttribution> {
        self.prune(symbol, date);

        let mut attributions = Vec::new();
        let mut unmatched = quantity;

        if let Some(windows) = self.windows.get_mut(symbol) {
            for window in windows.iter_mut() {
                if unmatched.is_zero() {
                    break;
                }

                let matched = std::cmp::min(window.unmatched, unmatched);
                if matched.is_zero() {
                    continue;
                }

                window.unmatched -= matched;
                unmatched -= matched;

                attributions.push(WashSaleAttribution {
                    lot_id,
                    event_index: window.event_index,
                    disallowed: window.loss_per_share * matched,
                });
            }

            windows.retain(|window| !window.unmatched.is_zero());
        }

        self.buys.entry(symbol.to_owned()).or_default().push_back(BuyRecord {
            date, lot_id, unmatched,
        });

        attributions
    }

    /// Registers a loss sell: matches it against replacement shares already bought in the
    /// previous 30 days (lots consumed by the sell itself don't count) and opens a window for
    /// the unmatched remainder.
    pub fn on_loss_sell(
        &mut self, symbol: &str, date: Date, quantity: Decimal, loss_per_share: Decimal,
        event_index: usize, exclude: &HashSet<LotId>,
    ) -> Vec<WashSaleAttribution> {
        assert!(loss_per_share.is_sign_positive() && !loss_per_share.is_zero());
        self.prune(symbol, date);

        let mut attributions = Vec::new();
        let mut unmatched = quantity;

        if let Some(buys) = self.buys.get_mut(symbol) {
            for buy in buys.iter_mut() {
                if unmatched.is_zero() {
                    break;
                }
                if exclude.contains(&buy.lot_id) {
                    continue;
                }

                let matched = std::cmp::min(buy.unmatched, unmatched);
                if matched.is_zero() {
                    continue;
                }

                buy.unmatched -= matched;
                unmatched -= matched;

                attributions.push(WashSaleAttribution {
                    lot_id: buy.lot_id,
                    event_index,
                    disallowed: loss_per_share * matched,
                });
            }
        }

        if !unmatched.is_zero() {
            self.windows.entry(symbol.to_owned()).or_default().push_back(WashWindow {
                expires: date + Duration::days(WINDOW_DAYS),
                loss_per_share,
                unmatched,
                event_index,
            });
        }

        attributions
    }

    /// Forgets a closed lot: its shares can't serve as replacement anymore.
    pub fn retire_lot(&mut self, symbol: &str, lot_id: LotId) {
        if let Some(buys) = self.buys.get_mut(symbol) {
            buys.retain(|buy| buy.lot_id != lot_id);
        }
    }

    fn prune(&mut self, symbol: &str, date: Date) {
        let horizon = date - Duration::days(WINDOW_DAYS);

        if let Some(buys) = self.buys.get_mut(symbol) {
            while buys.front().is_some_and(|buy| buy.date < horizon) {
                buys.pop_front();
            }
        }

        if let Some(windows) = self.windows.get_mut(symbol) {
            while windows.front().is_some_and(|window| window.expires < date) {
                windows.pop_front();
            }
        }
    }
}
