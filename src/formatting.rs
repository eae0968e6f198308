use num_traits::ToPrimitive;
use separator::Separatable;

use crate::time::Date;
use crate::types::Decimal;
use crate::util;

pub fn format_date(date: Date) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn format_cash(amount: Decimal) -> String {
    let rounded = util::round(amount, 2);
    match rounded.to_f64() {
        Some(value) => format!("${}", value.separated_string()),
        None => format!("${rounded}"),
    }
}

pub fn format_days(days: i64) -> String {
    let (duration, name) = if days >= 365 {
        (days / 365, "year")
    } else if days >= 30 {
        (days / 30, "month")
    } else {
        (days, "day")
    };

    if duration == 1 {
        format!("a {name}")
    } else {
        format!("{duration} {name}s")
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest(days, expected,
        case(1, "a day"),
        case(29, "29 days"),
        case(30, "a month"),
        case(363, "12 months"),
        case(365, "a year"),
        case(1095, "3 years"),
    )]
    fn days_formatting(days: i64, expected: &str) {
        assert_eq!(format_days(days), expected);
    }

    #[test]
    fn date_formatting() {
        assert_eq!(format_date(date!(2020, 1, 2)), "2020-01-02");
    }
}
