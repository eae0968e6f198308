use std::fs::File;
use std::path::Path;

use log::debug;
use serde::Deserialize;

use crate::core::{EmptyResult, GenericResult};
use crate::types::Decimal;
use crate::util::{self, DecimalRestrictions};

use super::{Bar, DividendAction, SplitAction, StaticPriceSource};

/// Loads market data for the CLI from a directory layout of `<symbol>.csv` bar files plus an
/// optional `actions.yaml` with dividends, splits, expense ratios and delistings.
pub fn load_price_data(path: &Path, symbols: &[String]) -> GenericResult<StaticPriceSource> {
    let mut source = StaticPriceSource::new();

    for symbol in symbols {
        let bars_path = path.join(format!("{symbol}.csv"));
        load_bars(&bars_path, symbol, &mut source).map_err(|e| format!(
            "Failed to load {}: {}", bars_path.display(), e))?;
    }

    let actions_path = path.join("actions.yaml");
    if actions_path.exists() {
        load_actions(&actions_path, &mut source).map_err(|e| format!(
            "Failed to load {}: {}", actions_path.display(), e))?;
    }

    Ok(source)
}

fn load_bars(path: &Path, symbol: &str, source: &mut StaticPriceSource) -> EmptyResult {
    let mut reader = csv::Reader::from_path(path)?;

    let mut count = 0;
    let mut last_date = None;

    for record in reader.deserialize() {
        let bar: Bar = record?;

        util::validate_named_decimal("open price", bar.open, DecimalRestrictions::StrictlyPositive)?;
        util::validate_named_decimal("close price", bar.close, DecimalRestrictions::StrictlyPositive)?;

        if let Some(last_date) = last_date {
            if bar.date <= last_date {
                return Err!("Got an unordered bar date: {}", crate::formatting::format_date(bar.date));
            }
        }
        last_date = Some(bar.date);

        source.add_bar(symbol, bar);
        count += 1;
    }

    debug!("Loaded {count} bars for {symbol}.");
    Ok(())
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ActionsFile {
    #[serde(default)]
    dividends: Vec<DividendAction>,
    #[serde(default)]
    splits: Vec<SplitAction>,
    #[serde(default)]
    expense_ratios: Vec<ExpenseRatioSpec>,
    #[serde(default)]
    delistings: Vec<DelistingSpec>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ExpenseRatioSpec {
    symbol: String,
    ratio: Decimal,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DelistingSpec {
    symbol: String,
    date: crate::time::Date,
}

fn load_actions(path: &Path, source: &mut StaticPriceSource) -> EmptyResult {
    let actions: ActionsFile = serde_yaml::from_reader(File::open(path)?)?;

    for dividend in actions.dividends {
        util::validate_named_decimal(
            "dividend amount", dividend.amount, DecimalRestrictions::StrictlyPositive)?;
        if dividend.qualified_fraction < dec!(0) || dividend.qualified_fraction > dec!(1) {
            return Err!("Invalid qualified dividend fraction: {}", dividend.qualified_fraction);
        }
        source.add_dividend(dividend);
    }

    for split in actions.splits {
        util::validate_named_decimal("split ratio", split.ratio, DecimalRestrictions::StrictlyPositive)?;
        source.add_split(split);
    }

    for spec in actions.expense_ratios {
        util::validate_named_decimal(
            "expense ratio", spec.ratio, DecimalRestrictions::PositiveOrZero)?;
        source.set_expense_ratio(&spec.symbol, spec.ratio);
    }

    for spec in actions.delistings {
        source.set_delisting(&spec.symbol, spec.date);
    }

    Ok(())
}
