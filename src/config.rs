use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calendar::{Cadence, MarketCalendar};
use crate::core::{EmptyResult, GenericResult};
use crate::time::{self, Date};
use crate::types::Decimal;
use crate::util::{self, DecimalRestrictions};

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyConfig {
    #[serde(default)]
    pub meta: MetaConfig,
    pub period: PeriodConfig,
    pub universe: UniverseConfig,
    pub initial_cash: Decimal,
    pub account: AccountConfig,
    #[serde(default)]
    pub deposits: Option<DepositsConfig>,
    #[serde(default)]
    pub dividends: DividendsConfig,
    pub rebalancing: RebalancingConfig,
    #[serde(default)]
    pub orders: OrdersConfig,
    #[serde(default)]
    pub lots: LotsConfig,
    #[serde(default)]
    pub frictions: FrictionsConfig,
    pub position_sizing: PositionSizingConfig,
    #[serde(default)]
    pub benchmark: Vec<String>,

    // Reserved by the configuration schema. The signal engine is not part of this version, so
    // only an empty list passes validation.
    #[serde(default)]
    pub signals: Vec<serde_json::Value>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetaConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeriodConfig {
    #[serde(deserialize_with = "time::deserialize_date")]
    pub start: Date,
    #[serde(deserialize_with = "time::deserialize_date")]
    pub end: Date,
    #[serde(default = "default_calendar")]
    pub calendar: String,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UniverseConfig {
    pub symbols: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum AccountType {
    Taxable,
    #[serde(rename = "Traditional-IRA")]
    TraditionalIra,
    #[serde(rename = "Roth-IRA")]
    RothIra,
    #[serde(rename = "529-Plan")]
    Plan529,
}

impl AccountType {
    /// Realized gains and dividends inside the account don't produce an annual tax liability.
    pub fn is_tax_deferred(self) -> bool {
        !matches!(self, AccountType::Taxable)
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountConfig {
    #[serde(rename = "type")]
    pub type_: AccountType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default)]
    pub catch_up: bool,
    pub tax: TaxParamsConfig,
    #[serde(default)]
    pub contribution_caps: ContributionCapsConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaxParamsConfig {
    pub federal_ordinary: Decimal,
    pub federal_ltcg: Decimal,
    #[serde(default)]
    pub state: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualified_dividend_pct: Option<Decimal>,
    #[serde(default = "default_true")]
    pub apply_wash_sale: bool,
    #[serde(default)]
    pub pay_taxes_from_external: bool,
    #[serde(default)]
    pub withdrawal_tax_rate_for_ira: Decimal,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContributionCapsConfig {
    #[serde(default)]
    pub enforce: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ira: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ira_catch_up: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roth: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roth_catch_up: Option<Decimal>,
    #[serde(default)]
    pub allow_partial: bool,
}

impl ContributionCapsConfig {
    /// The annual contribution limit to enforce for the account, if any.
    pub fn annual_cap(&self, account: AccountType, catch_up: bool) -> Option<Decimal> {
        if !self.enforce {
            return None;
        }

        let (cap, catch_up_allowance) = match account {
            AccountType::TraditionalIra => (self.ira, self.ira_catch_up),
            AccountType::RothIra => (self.roth, self.roth_catch_up),
            AccountType::Taxable | AccountType::Plan529 => return None,
        };

        cap.map(|cap| {
            if catch_up {
                cap + catch_up_allowance.unwrap_or_default()
            } else {
                cap
            }
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositCadence {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
    EveryMarketDay,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DepositsConfig {
    pub cadence: DepositCadence,
    pub amount: Decimal,
    #[serde(default = "default_day_rule")]
    pub day_rule: u32,
    #[serde(default)]
    pub market_day_everyday: bool,
}

impl DepositsConfig {
    pub fn cadence(&self) -> Cadence {
        match self.cadence {
            DepositCadence::Daily if self.market_day_everyday => Cadence::EveryMarketDay,
            DepositCadence::Daily => Cadence::Daily,
            DepositCadence::Weekly => Cadence::Weekly,
            DepositCadence::Monthly => Cadence::Monthly,
            DepositCadence::Quarterly => Cadence::Quarterly,
            DepositCadence::Yearly => Cadence::Annually,
            DepositCadence::EveryMarketDay => Cadence::EveryMarketDay,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum DividendMode {
    #[default]
    #[serde(rename = "DRIP")]
    Drip,
    #[serde(rename = "CASH")]
    Cash,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DividendsConfig {
    #[serde(default)]
    pub mode: DividendMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reinvest_threshold_pct: Option<Decimal>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalancingType {
    Calendar,
    Drift,
    Both,
    CashflowOnly,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum RebalancePeriod {
    D,
    W,
    M,
    Q,
    A,
}

impl RebalancePeriod {
    pub fn cadence(self) -> Cadence {
        match self {
            RebalancePeriod::D => Cadence::EveryMarketDay,
            RebalancePeriod::W => Cadence::Weekly,
            RebalancePeriod::M => Cadence::Monthly,
            RebalancePeriod::Q => Cadence::Quarterly,
            RebalancePeriod::A => Cadence::Annually,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalendarRebalancingConfig {
    pub period: RebalancePeriod,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriftRebalancingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abs_pct: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel_pct: Option<Decimal>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CashflowRebalancingConfig {
    #[serde(default)]
    pub min_cash: Decimal,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RebalancingConfig {
    #[serde(rename = "type")]
    pub type_: RebalancingType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar: Option<CalendarRebalancingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift: Option<DriftRebalancingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cashflow: Option<CashflowRebalancingConfig>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum OrderTiming {
    #[serde(rename = "MOO")]
    MarketOnOpen,
    #[default]
    #[serde(rename = "MOC")]
    MarketOnClose,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrdersConfig {
    #[serde(default)]
    pub timing: OrderTiming,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum LotMethod {
    #[default]
    FIFO,
    LIFO,
    HIFO,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LotsConfig {
    #[serde(default)]
    pub method: LotMethod,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrictionsConfig {
    #[serde(default)]
    pub commission_per_trade: Decimal,
    #[serde(default)]
    pub slippage_bps: Decimal,
    #[serde(default)]
    pub use_actual_etf_er: bool,
    #[serde(default)]
    pub equity_borrow_bps: Decimal,
    #[serde(default)]
    pub cash_yield_pct: Decimal,
}

impl FrictionsConfig {
    /// Slippage as a price fraction.
    pub fn slippage(&self) -> Decimal {
        self.slippage_bps / dec!(10000)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSizingMethod {
    EqualWeight,
    CustomWeights,
    VolTarget,
    MomentumTopN,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PositionSizingConfig {
    pub method: PositionSizingMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_weights: Option<BTreeMap<String, Decimal>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_n: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vol_target: Option<Decimal>,
}

impl StrategyConfig {
    pub fn validate(&self) -> EmptyResult {
        if self.period.start >= self.period.end {
            return Err!("Invalid simulation period: {} - {}",
                crate::formatting::format_date(self.period.start),
                crate::formatting::format_date(self.period.end));
        }
        MarketCalendar::new(&self.period.calendar)?;

        if self.universe.symbols.is_empty() {
            return Err!("An empty symbol universe");
        }
        for symbols in [&self.universe.symbols, &self.benchmark] {
            for (index, symbol) in symbols.iter().enumerate() {
                if symbol.is_empty() {
                    return Err!("Got an empty symbol name");
                }
                if symbols[..index].contains(symbol) {
                    return Err!("Duplicated symbol: {symbol}");
                }
            }
        }

        util::validate_named_decimal(
            "initial cash amount", self.initial_cash, DecimalRestrictions::PositiveOrZero)?;

        self.validate_account()?;
        self.validate_cashflows()?;
        self.validate_rebalancing()?;
        self.validate_frictions()?;
        self.validate_position_sizing()?;

        if !self.signals.is_empty() {
            return Err!("Trade signals aren't supported yet");
        }

        Ok(())
    }

    fn validate_account(&self) -> EmptyResult {
        let tax = &self.account.tax;

        for (name, rate) in [
            ("federal ordinary income tax rate", tax.federal_ordinary),
            ("federal long term capital gains tax rate", tax.federal_ltcg),
            ("state tax rate", tax.state),
            ("IRA withdrawal tax rate", tax.withdrawal_tax_rate_for_ira),
        ] {
            validate_rate(name, rate)?;
        }

        if let Some(qualified) = tax.qualified_dividend_pct {
            validate_rate("qualified dividend fraction", qualified)?;
        }

        let caps = &self.account.contribution_caps;
        if caps.enforce {
            let configured = match self.account.type_ {
                AccountType::TraditionalIra => caps.ira.is_some(),
                AccountType::RothIra => caps.roth.is_some(),
                AccountType::Taxable | AccountType::Plan529 => true,
            };
            if !configured {
                return Err!("Contribution cap enforcement is enabled, but no cap is configured for the account type");
            }
        }

        for cap in [caps.ira, caps.ira_catch_up, caps.roth, caps.roth_catch_up].into_iter().flatten() {
            util::validate_named_decimal("contribution cap", cap, DecimalRestrictions::StrictlyPositive)?;
        }

        Ok(())
    }

    fn validate_cashflows(&self) -> EmptyResult {
        if let Some(deposits) = &self.deposits {
            util::validate_named_decimal(
                "deposit amount", deposits.amount, DecimalRestrictions::StrictlyPositive)?;

            if !(1..=31).contains(&deposits.day_rule) {
                return Err!("Invalid deposit day: {}", deposits.day_rule);
            }
        }

        if let Some(threshold) = self.dividends.reinvest_threshold_pct {
            util::validate_named_decimal(
                "dividend reinvest threshold", threshold, DecimalRestrictions::PositiveOrZero)?;
        }

        Ok(())
    }

    fn validate_rebalancing(&self) -> EmptyResult {
        let rebalancing = &self.rebalancing;

        match rebalancing.type_ {
            RebalancingType::Calendar | RebalancingType::Both if rebalancing.calendar.is_none() => {
                return Err!("Calendar rebalancing is enabled, but its period is not configured");
            },
            _ => {},
        }

        if matches!(rebalancing.type_, RebalancingType::Drift | RebalancingType::Both) {
            let drift = rebalancing.drift.as_ref().ok_or(
                "Drift rebalancing is enabled, but its thresholds are not configured")?;

            if drift.abs_pct.is_none() && drift.rel_pct.is_none() {
                return Err!("Drift rebalancing requires an absolute or a relative threshold");
            }
        }

        if let Some(drift) = &rebalancing.drift {
            for threshold in [drift.abs_pct, drift.rel_pct].into_iter().flatten() {
                util::validate_named_decimal(
                    "drift threshold", threshold, DecimalRestrictions::PositiveOrZero)?;
            }
        }

        if let Some(cashflow) = &rebalancing.cashflow {
            util::validate_named_decimal(
                "cash deploy threshold", cashflow.min_cash, DecimalRestrictions::PositiveOrZero)?;
        }

        Ok(())
    }

    fn validate_frictions(&self) -> EmptyResult {
        let frictions = &self.frictions;

        util::validate_named_decimal(
            "commission", frictions.commission_per_trade, DecimalRestrictions::PositiveOrZero)?;
        util::validate_named_decimal(
            "slippage", frictions.slippage_bps, DecimalRestrictions::PositiveOrZero)?;
        util::validate_named_decimal(
            "cash yield", frictions.cash_yield_pct, DecimalRestrictions::PositiveOrZero)?;

        if !frictions.equity_borrow_bps.is_zero() {
            return Err!("Equity borrow rate is specified, but short selling is not supported");
        }

        Ok(())
    }

    fn validate_position_sizing(&self) -> EmptyResult {
        let sizing = &self.position_sizing;

        match sizing.method {
            PositionSizingMethod::EqualWeight => {},
            PositionSizingMethod::CustomWeights => {
                let weights = sizing.custom_weights.as_ref().ok_or(
                    "Custom position weights are not specified")?;

                let mut total = dec!(0);
                for (symbol, &weight) in weights {
                    if !self.universe.symbols.contains(symbol) {
                        return Err!("Got a position weight for {symbol} which is not in the universe");
                    }
                    util::validate_named_decimal(
                        "position weight", weight, DecimalRestrictions::PositiveOrZero)?;
                    total += weight;
                }

                if total.is_zero() {
                    return Err!("Position weights sum up to zero");
                }
            },
            PositionSizingMethod::VolTarget | PositionSizingMethod::MomentumTopN => {
                return Err!("The requested position sizing method is not supported yet");
            },
        }

        Ok(())
    }
}

pub fn load_strategy(path: &Path) -> GenericResult<StrategyConfig> {
    let config: StrategyConfig = match path.extension().and_then(|extension| extension.to_str()) {
        Some("json") => serde_json::from_reader(File::open(path)?)?,
        Some("yaml" | "yml") => serde_yaml::from_reader(File::open(path)?)?,
        _ => return Err!("Unsupported strategy config file extension: {}", path.display()),
    };

    config.validate().map_err(|e| format!("{}: {}", path.display(), e))?;
    Ok(config)
}

fn validate_rate(name: &str, rate: Decimal) -> EmptyResult {
    if rate < dec!(0) || rate > dec!(1) {
        return Err!("Invalid {name}: {rate}. Rates are specified as fractions");
    }
    Ok(())
}

fn default_calendar() -> String {
    "us".to_owned()
}

fn default_day_rule() -> u32 {
    1
}

fn default_true() -> bool {
    true
}
