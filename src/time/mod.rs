mod parsing;
mod period;

pub use chrono::Datelike;
pub use crate::types::{Date, DateTime};

pub use parsing::*;
pub use period::*;

pub fn days_between(start: Date, end: Date) -> i64 {
    (end - start).num_days()
}

/// Inclusive holding period in days: the acquisition day itself counts.
pub fn holding_days(acquisition: Date, disposal: Date) -> i64 {
    assert!(acquisition <= disposal);
    (disposal - acquisition).num_days()
}

pub fn year_of(date: Date) -> i32 {
    date.year()
}

pub fn quarter_of(date: Date) -> u32 {
    (date.month() - 1) / 3 + 1
}

pub fn first_day_of_month(date: Date) -> Date {
    Date::from_ymd_opt(date.year(), date.month(), 1).unwrap()
}

pub fn first_day_of_quarter(date: Date) -> Date {
    let month = (quarter_of(date) - 1) * 3 + 1;
    Date::from_ymd_opt(date.year(), month, 1).unwrap()
}

pub fn first_day_of_year(date: Date) -> Date {
    Date::from_ymd_opt(date.year(), 1, 1).unwrap()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest(date, quarter, quarter_start,
        case(date!(2020,  1,  2), 1, date!(2020,  1, 1)),
        case(date!(2020,  3, 31), 1, date!(2020,  1, 1)),
        case(date!(2020,  4,  1), 2, date!(2020,  4, 1)),
        case(date!(2020, 12, 31), 4, date!(2020, 10, 1)),
    )]
    fn quarters(date: Date, quarter: u32, quarter_start: Date) {
        assert_eq!(quarter_of(date), quarter);
        assert_eq!(first_day_of_quarter(date), quarter_start);
    }

    #[test]
    fn holding_period() {
        assert_eq!(holding_days(date!(2020, 1, 1), date!(2020, 1, 1)), 0);
        assert_eq!(holding_days(date!(2020, 1, 1), date!(2021, 1, 1)), 366); // leap year
        assert_eq!(holding_days(date!(2021, 1, 1), date!(2022, 1, 1)), 365);
    }
}
