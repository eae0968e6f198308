mod loader;
mod static_provider;

use serde::{Deserialize, Serialize};

use crate::core::GenericResult;
use crate::time::{Date, Period};
use crate::types::Decimal;

pub use loader::load_price_data;
pub use static_provider::StaticPriceSource;

/// One trading day of one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: Date,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub adj_close: Decimal,
    pub volume: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DividendAction {
    pub symbol: String,
    pub ex_date: Date,
    pub amount: Decimal,
    #[serde(default = "default_qualified_fraction")]
    pub qualified_fraction: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitAction {
    pub symbol: String,
    pub date: Date,
    pub ratio: Decimal,
}

fn default_qualified_fraction() -> Decimal {
    dec!(1)
}

/// The interface the simulation core expects from the market data layer.
///
/// Implementations must return series in non-decreasing date order and be safe to read from
/// multiple threads: the host is allowed to run independent simulations in parallel over one
/// shared source.
pub trait PriceSource: Sync {
    fn bars(&self, symbol: &str, period: Period) -> GenericResult<Vec<Bar>>;
    fn dividends(&self, symbol: &str, period: Period) -> GenericResult<Vec<DividendAction>>;
    fn splits(&self, symbol: &str, period: Period) -> GenericResult<Vec<SplitAction>>;
    fn expense_ratio(&self, symbol: &str) -> GenericResult<Option<Decimal>>;
    fn is_delisted(&self, symbol: &str, date: Date) -> GenericResult<bool>;
}
