use crate::config::TaxParamsConfig;
use crate::types::Decimal;
use crate::util;

/// Flat tax rates of the simulated household. Short-term gains, ordinary dividends and interest
/// are taxed at the ordinary rate, long-term gains and qualified dividends at the preferential
/// rate; the state taxes everything at its own flat rate on top.
#[derive(Clone, Copy)]
pub struct TaxRates {
    ordinary: Decimal,
    long_term: Decimal,
}

impl TaxRates {
    pub fn new(tax: &TaxParamsConfig) -> TaxRates {
        TaxRates {
            ordinary: tax.federal_ordinary + tax.state,
            long_term: tax.federal_ltcg + tax.state,
        }
    }

    // Incomes are rounded to cents before applying the rate and the tax is calculated with
    // cents precision first and then rounded to whole dollars.
    pub fn annual_tax(&self, ordinary_income: Decimal, long_term_income: Decimal) -> Decimal {
        let tax =
            tax_amount(ordinary_income, self.ordinary) +
            tax_amount(long_term_income, self.long_term);
        util::round(tax, 0)
    }
}

fn tax_amount(income: Decimal, rate: Decimal) -> Decimal {
    let income = util::round(income, 2);
    if income.is_sign_negative() || income.is_zero() {
        return dec!(0);
    }
    util::round(income * rate, 2)
}
