use itertools::Itertools;
use serde::Serialize;

use crate::config::LotMethod;
use crate::time::Date;
use crate::types::Decimal;
use crate::util;

pub type LotId = u64;

/// An open tax lot. Once created it's only ever mutated by a sell reducing its remaining
/// quantity or by a wash-sale attribution raising its cost basis.
#[derive(Debug, Clone, Serialize)]
pub struct Lot {
    pub id: LotId,
    pub symbol: String,
    pub original_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub cost_basis: Decimal, // per share
    pub acquisition_date: Date,
    pub disallowed_loss: Decimal,
    pub washed: bool,
}

impl Lot {
    pub fn new(id: LotId, symbol: &str, quantity: Decimal, cost_basis: Decimal, acquisition_date: Date) -> Lot {
        assert!(quantity.is_sign_positive() && !quantity.is_zero());

        Lot {
            id,
            symbol: symbol.to_owned(),
            original_quantity: quantity,
            remaining_quantity: quantity,
            cost_basis: util::round(cost_basis, 6),
            acquisition_date,
            disallowed_loss: dec!(0),
            washed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.remaining_quantity.is_zero()
    }

    pub fn consume(&mut self, quantity: Decimal) {
        assert!(quantity.is_sign_positive() && !quantity.is_zero());
        assert!(self.remaining_quantity >= quantity);
        self.remaining_quantity -= quantity;
    }

    /// Spreads a disallowed wash-sale loss over the remaining shares of the lot.
    pub fn attribute_wash_sale(&mut self, disallowed: Decimal) {
        assert!(!self.is_closed());
        assert!(disallowed.is_sign_positive() && !disallowed.is_zero());

        self.disallowed_loss += disallowed;
        self.cost_basis = util::round(self.cost_basis + disallowed / self.remaining_quantity, 6);
        self.washed = true;
    }
}

pub fn total_shares(lots: &[Lot]) -> Decimal {
    lots.iter().map(|lot| lot.remaining_quantity).sum()
}

/// Indices of open lots in the order they should be consumed by a sell.
pub fn disposal_order(lots: &[Lot], method: LotMethod) -> Vec<usize> {
    let mut order = (0..lots.len()).filter(|&index| !lots[index].is_closed()).collect_vec();

    match method {
        // Oldest acquisition first. Lot ids grow monotonically, so they break date ties with
        // the creation order.
        LotMethod::FIFO => order.sort_by_key(|&index| (lots[index].acquisition_date, lots[index].id)),
        LotMethod::LIFO => order.sort_by_key(|&index| {
            (std::cmp::Reverse(lots[index].acquisition_date), std::cmp::Reverse(lots[index].id))
        }),
        // Highest cost basis first, older lots on basis ties
        LotMethod::HIFO => order.sort_by_key(|&index| {
            (std::cmp::Reverse(lots[index].cost_basis), lots[index].acquisition_date, lots[index].id)
        }),
    }

    order
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    fn lots() -> Vec<Lot> {
        vec![
            Lot::new(1, "SPY", dec!(10), dec!(100), date!(2020, 1, 2)),
            Lot::new(2, "SPY", dec!(10), dec!(120), date!(2020, 6, 1)),
            Lot::new(3, "SPY", dec!(10), dec!(120), date!(2020, 3, 2)),
            Lot::new(4, "SPY", dec!(10), dec!(80), date!(2020, 9, 1)),
        ]
    }

    #[rstest(method, expected,
        case(LotMethod::FIFO, vec![1, 3, 2, 4]),
        case(LotMethod::LIFO, vec![4, 2, 3, 1]),
        case(LotMethod::HIFO, vec![3, 2, 1, 4]),
    )]
    fn ordering(method: LotMethod, expected: Vec<LotId>) {
        let lots = lots();
        let order: Vec<LotId> = disposal_order(&lots, method).into_iter()
            .map(|index| lots[index].id)
            .collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn closed_lots_are_skipped() {
        let mut lots = lots();
        lots[0].consume(dec!(10));
        assert!(lots[0].is_closed());

        let order = disposal_order(&lots, LotMethod::FIFO);
        assert_eq!(order.len(), 3);
        assert!(!order.contains(&0));
    }

    #[test]
    fn wash_sale_attribution() {
        let mut lot = Lot::new(1, "SPY", dec!(100), dec!(92), date!(2020, 1, 25));
        lot.attribute_wash_sale(dec!(1000));

        assert_eq!(lot.cost_basis, dec!(102));
        assert_eq!(lot.disallowed_loss, dec!(1000));
        assert!(lot.washed);
    }
}
