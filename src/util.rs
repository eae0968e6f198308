use rust_decimal::RoundingStrategy;

use crate::core::GenericResult;
use crate::types::Decimal;

#[derive(Clone, Copy, Debug)]
pub enum DecimalRestrictions {
    No,
    Zero,
    NonZero,
    PositiveOrZero,
    StrictlyPositive,
}

pub fn validate_decimal(value: Decimal, restrictions: DecimalRestrictions) -> GenericResult<Decimal> {
    let valid = match restrictions {
        DecimalRestrictions::No => true,
        DecimalRestrictions::Zero => value.is_zero(),
        DecimalRestrictions::NonZero => !value.is_zero(),
        DecimalRestrictions::PositiveOrZero => !value.is_sign_negative() || value.is_zero(),
        DecimalRestrictions::StrictlyPositive => value.is_sign_positive() && !value.is_zero(),
    };

    if !valid {
        return Err!("The value doesn't comply to the specified restrictions: {value}");
    }

    Ok(value)
}

pub fn validate_named_decimal(name: &str, value: Decimal, restrictions: DecimalRestrictions) -> GenericResult<Decimal> {
    Ok(validate_decimal(value, restrictions).map_err(|_| format!(
        "Invalid {name}: {value}"))?)
}

#[derive(Clone, Copy, Debug)]
pub enum RoundingMethod {
    Round,
    Truncate,
}

pub fn round(value: Decimal, points: u32) -> Decimal {
    round_with(value, points, RoundingMethod::Round)
}

pub fn round_with(value: Decimal, points: u32, method: RoundingMethod) -> Decimal {
    let strategy = match method {
        RoundingMethod::Round => RoundingStrategy::MidpointAwayFromZero,
        RoundingMethod::Truncate => RoundingStrategy::ToZero,
    };
    value.round_dp_with_strategy(points, strategy).normalize()
}

pub fn decimal_precision(value: Decimal) -> u32 {
    value.normalize().scale()
}
