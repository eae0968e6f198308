mod holidays;

use std::fmt;

use chrono::{Datelike, Duration, Weekday};
use serde::Serialize;

use crate::time::{self, Date, Period};

// The holiday rules and the one-off closure table are checked against the official NYSE
// schedule for this range. Asking about dates outside of it is an error the caller decides on.
const FIRST_SUPPORTED: i32 = 1990;
const LAST_SUPPORTED: i32 = 2068;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    UnknownCalendar(String),
    OutOfRange(Date),
}

impl fmt::Display for CalendarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalendarError::UnknownCalendar(name) => write!(f, "Unknown market calendar: {name:?}"),
            CalendarError::OutOfRange(date) => write!(
                f, "The date is outside of the supported calendar range: {}",
                crate::formatting::format_date(*date)),
        }
    }
}

impl std::error::Error for CalendarError {
}

pub type CalendarResult<T> = Result<T, CalendarError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[derive(strum::Display, strum::EnumString, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Cadence {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annually,
    EveryMarketDay,
}

/// United States equity market calendar.
///
/// Weekends plus the observed NYSE holidays: New Year's Day, Martin Luther King Jr. Day,
/// Washington's Birthday, Good Friday, Memorial Day, Juneteenth (since 2022), Independence Day,
/// Labor Day, Thanksgiving and Christmas, along with the one-off closures listed in `holidays`.
#[derive(Clone, Copy)]
pub struct MarketCalendar {
    _name: &'static str,
}

impl MarketCalendar {
    pub fn new(name: &str) -> CalendarResult<MarketCalendar> {
        match name {
            "us" | "US" | "NYSE" => Ok(MarketCalendar {_name: "us"}),
            _ => Err(CalendarError::UnknownCalendar(name.to_owned())),
        }
    }

    pub fn is_trading(&self, date: Date) -> CalendarResult<bool> {
        if date.year() < FIRST_SUPPORTED || date.year() > LAST_SUPPORTED {
            return Err(CalendarError::OutOfRange(date));
        }

        Ok(!matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
            && !holidays::is_holiday(date)
            && !holidays::is_special_closure(date))
    }

    /// Returns all trading days inside the period in strictly increasing order.
    pub fn enumerate(&self, period: Period) -> CalendarResult<Vec<Date>> {
        let mut days = Vec::new();

        let mut date = period.first_date();
        while date <= period.last_date() {
            if self.is_trading(date)? {
                days.push(date);
            }
            date += Duration::days(1);
        }

        Ok(days)
    }

    /// The first trading day on or after the given date.
    pub fn next_trading_day(&self, mut date: Date) -> CalendarResult<Date> {
        while !self.is_trading(date)? {
            date += Duration::days(1);
        }
        Ok(date)
    }

    /// Maps a date to the first trading day on or after the logical scheduled date of its
    /// cadence period: weekly -> Monday of the week, monthly -> first day of the month,
    /// quarterly -> first day of the quarter, annually -> January 1st, daily -> the date itself.
    pub fn align(&self, date: Date, cadence: Cadence) -> CalendarResult<Date> {
        let scheduled = match cadence {
            Cadence::Daily | Cadence::EveryMarketDay => date,
            Cadence::Weekly => date - Duration::days(date.weekday().num_days_from_monday().into()),
            Cadence::Monthly => time::first_day_of_month(date),
            Cadence::Quarterly => time::first_day_of_quarter(date),
            Cadence::Annually => time::first_day_of_year(date),
        };
        self.next_trading_day(scheduled)
    }

    /// Enumerates (scheduled, posted) date pairs for a cadence over the period: the logical
    /// scheduled dates with the trading days they shift to. The first cadence boundary at or
    /// before the period start participates, so a schedule landing on a pre-period holiday
    /// still posts on the period's first trading days. Multiple scheduled dates may post on
    /// the same trading day.
    pub fn schedule(&self, period: Period, cadence: Cadence, day_rule: u32) -> CalendarResult<Vec<ScheduledDate>> {
        let mut result = Vec::new();

        if cadence == Cadence::EveryMarketDay {
            for date in self.enumerate(period)? {
                result.push(ScheduledDate {scheduled: date, posted: date});
            }
            return Ok(result);
        }

        let mut scheduled = match cadence {
            Cadence::Daily => period.first_date(),
            Cadence::Weekly => {
                let first = period.first_date();
                first - Duration::days(first.weekday().num_days_from_monday().into())
            },
            Cadence::Monthly => with_day_rule(time::first_day_of_month(period.first_date()), day_rule),
            Cadence::Quarterly => with_day_rule(time::first_day_of_quarter(period.first_date()), day_rule),
            Cadence::Annually => with_day_rule(time::first_day_of_year(period.first_date()), day_rule),
            Cadence::EveryMarketDay => unreachable!(),
        };

        while scheduled <= period.last_date() {
            let posted = self.next_trading_day(scheduled)?;
            if period.contains(posted) {
                result.push(ScheduledDate {scheduled, posted});
            }

            scheduled = match cadence {
                Cadence::Daily => scheduled + Duration::days(1),
                Cadence::Weekly => scheduled + Duration::days(7),
                Cadence::Monthly => with_day_rule(next_month(scheduled), day_rule),
                Cadence::Quarterly => with_day_rule(next_quarter(scheduled), day_rule),
                Cadence::Annually => with_day_rule(
                    Date::from_ymd_opt(scheduled.year() + 1, 1, 1).unwrap(), day_rule),
                Cadence::EveryMarketDay => unreachable!(),
            };
        }

        Ok(result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledDate {
    pub scheduled: Date,
    pub posted: Date,
}

fn with_day_rule(period_start: Date, day_rule: u32) -> Date {
    let last_day = days_in_month(period_start.year(), period_start.month());
    Date::from_ymd_opt(period_start.year(), period_start.month(), day_rule.clamp(1, last_day)).unwrap()
}

fn next_month(date: Date) -> Date {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    Date::from_ymd_opt(year, month, 1).unwrap()
}

fn next_quarter(date: Date) -> Date {
    let mut next = next_month(time::first_day_of_quarter(date));
    for _ in 0..2 {
        next = next_month(next);
    }
    next
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        Date::from_ymd_opt(year + 1, 1, 1).unwrap()
    } else {
        Date::from_ymd_opt(year, month + 1, 1).unwrap()
    };
    next.pred_opt().unwrap().day()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use super::*;

    fn calendar() -> MarketCalendar {
        MarketCalendar::new("us").unwrap()
    }

    #[test]
    fn unknown_calendar() {
        assert!(matches!(MarketCalendar::new("lse"), Err(CalendarError::UnknownCalendar(_))));
    }

    #[test]
    fn out_of_range() {
        assert!(matches!(calendar().is_trading(date!(1980, 1, 2)), Err(CalendarError::OutOfRange(_))));
        assert!(matches!(calendar().is_trading(date!(2070, 1, 2)), Err(CalendarError::OutOfRange(_))));
    }

    #[rstest(date, trading,
        case(date!(2020, 1, 1), false),  // New Year's Day
        case(date!(2020, 1, 2), true),
        case(date!(2020, 1, 4), false),  // Saturday
        case(date!(2020, 1, 20), false), // MLK day
        case(date!(2020, 2, 17), false), // Washington's birthday
        case(date!(2020, 4, 10), false), // Good Friday
        case(date!(2020, 5, 25), false), // Memorial day
        case(date!(2020, 7, 3), false),  // Independence day observed (July 4th is a Saturday)
        case(date!(2020, 9, 7), false),  // Labor day
        case(date!(2020, 11, 26), false), // Thanksgiving
        case(date!(2020, 12, 25), false), // Christmas
        case(date!(2020, 12, 31), true),
        case(date!(2021, 6, 18), true),  // Juneteenth wasn't observed before 2022
        case(date!(2022, 6, 20), false), // Juneteenth observed (June 19th is a Sunday)
        case(date!(2001, 9, 11), false), // September 11 attacks
        case(date!(2012, 10, 29), false), // Hurricane Sandy
        case(date!(2018, 12, 5), false), // George H. W. Bush mourning
    )]
    fn trading_days(date: Date, trading: bool) {
        assert_eq!(calendar().is_trading(date).unwrap(), trading);
    }

    #[test]
    fn enumeration() {
        let period = Period::new(date!(2020, 1, 1), date!(2020, 1, 10)).unwrap();
        assert_eq!(calendar().enumerate(period).unwrap(), vec![
            date!(2020, 1, 2), date!(2020, 1, 3), date!(2020, 1, 6), date!(2020, 1, 7),
            date!(2020, 1, 8), date!(2020, 1, 9), date!(2020, 1, 10),
        ]);
    }

    #[rstest(date, cadence, expected,
        case(date!(2020, 1, 1), Cadence::Daily, date!(2020, 1, 2)),
        case(date!(2020, 1, 2), Cadence::Daily, date!(2020, 1, 2)),
        case(date!(2020, 1, 15), Cadence::Weekly, date!(2020, 1, 13)),
        case(date!(2020, 1, 15), Cadence::Monthly, date!(2020, 1, 2)),
        case(date!(2020, 5, 15), Cadence::Quarterly, date!(2020, 4, 1)),
        case(date!(2020, 5, 15), Cadence::Annually, date!(2020, 1, 2)),
    )]
    fn alignment(date: Date, cadence: Cadence, expected: Date) {
        assert_eq!(calendar().align(date, cadence).unwrap(), expected);
    }

    #[test]
    fn monthly_schedule() {
        // The first scheduled date is a holiday and the period starts after it, but the
        // deposit still posts on the first trading day of the period.
        let period = Period::new(date!(2020, 1, 2), date!(2020, 12, 31)).unwrap();
        let schedule = calendar().schedule(period, Cadence::Monthly, 1).unwrap();

        assert_eq!(schedule.len(), 12);
        assert_eq!(schedule[0], ScheduledDate {scheduled: date!(2020, 1, 1), posted: date!(2020, 1, 2)});
        assert_eq!(schedule[1], ScheduledDate {scheduled: date!(2020, 2, 1), posted: date!(2020, 2, 3)});
        assert_eq!(schedule[10], ScheduledDate {scheduled: date!(2020, 11, 1), posted: date!(2020, 11, 2)});
    }

    #[test]
    fn quarterly_schedule() {
        let period = Period::new(date!(2020, 1, 2), date!(2020, 12, 31)).unwrap();
        let schedule = calendar().schedule(period, Cadence::Quarterly, 1).unwrap();

        assert_eq!(
            schedule.iter().map(|date| date.posted).collect::<Vec<_>>(),
            vec![date!(2020, 1, 2), date!(2020, 4, 1), date!(2020, 7, 1), date!(2020, 10, 1)],
        );
    }

    #[test]
    fn daily_schedule_accumulates_over_weekends() {
        let period = Period::new(date!(2020, 1, 6), date!(2020, 1, 13)).unwrap();
        let schedule = calendar().schedule(period, Cadence::Daily, 1).unwrap();

        // Monday the 13th receives the deposits scheduled on Saturday, Sunday and Monday
        let posted_on_monday = schedule.iter()
            .filter(|date| date.posted == date!(2020, 1, 13))
            .count();
        assert_eq!(posted_on_monday, 3);
        assert_eq!(schedule.len(), 8);
    }
}
