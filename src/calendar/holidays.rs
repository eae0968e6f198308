use chrono::{Datelike, Duration, Weekday};
use lazy_static::lazy_static;

use crate::time::Date;

pub fn is_holiday(date: Date) -> bool {
    let year = date.year();

    let mut holidays = vec![
        new_years_day(year),
        Some(nth_weekday(year, 2, Weekday::Mon, 3)), // Washington's birthday
        Some(good_friday(year)),
        Some(last_weekday(year, 5, Weekday::Mon)),   // Memorial day
        observed(Date::from_ymd_opt(year, 7, 4).unwrap()),
        Some(nth_weekday(year, 9, Weekday::Mon, 1)), // Labor day
        Some(nth_weekday(year, 11, Weekday::Thu, 4)), // Thanksgiving
        observed(Date::from_ymd_opt(year, 12, 25).unwrap()),
    ];

    // Observed by NYSE since 1998
    if year >= 1998 {
        holidays.push(Some(nth_weekday(year, 1, Weekday::Mon, 3))); // Martin Luther King Jr. day
    }

    // Federal holiday since 2021, observed by NYSE since 2022
    if year >= 2022 {
        holidays.push(observed(Date::from_ymd_opt(year, 6, 19).unwrap()));
    }

    holidays.into_iter().flatten().any(|holiday| holiday == date)
}

pub fn is_special_closure(date: Date) -> bool {
    lazy_static! {
        static ref CLOSURES: Vec<Date> = vec![
            date!(1994, 4, 27),  // Richard Nixon mourning
            date!(2001, 9, 11), date!(2001, 9, 12), date!(2001, 9, 13), date!(2001, 9, 14), // September 11 attacks
            date!(2004, 6, 11),  // Ronald Reagan mourning
            date!(2007, 1, 2),   // Gerald Ford mourning
            date!(2012, 10, 29), date!(2012, 10, 30), // Hurricane Sandy
            date!(2018, 12, 5),  // George H. W. Bush mourning
            date!(2025, 1, 9),   // Jimmy Carter mourning
        ];
    }

    CLOSURES.binary_search(&date).is_ok()
}

// When New Year's Day falls on a Saturday NYSE doesn't shift it to the preceding Friday -
// the market just stays open on December 31.
fn new_years_day(year: i32) -> Option<Date> {
    let date = Date::from_ymd_opt(year, 1, 1).unwrap();
    match date.weekday() {
        Weekday::Sat => None,
        Weekday::Sun => Some(date + Duration::days(1)),
        _ => Some(date),
    }
}

fn observed(date: Date) -> Option<Date> {
    Some(match date.weekday() {
        Weekday::Sat => date - Duration::days(1),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    })
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, nth: u32) -> Date {
    let first = Date::from_ymd_opt(year, month, 1).unwrap();
    let offset = (7 + weekday.num_days_from_monday() - first.weekday().num_days_from_monday()) % 7;
    first + Duration::days((offset + (nth - 1) * 7).into())
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> Date {
    let mut date = nth_weekday(year, month, weekday, 4);
    if date.month() == month && (date + Duration::days(7)).month() == month {
        date += Duration::days(7);
    }
    date
}

// Anonymous Gregorian computus (Meeus/Jones/Butcher)
fn good_friday(year: i32) -> Date {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;

    let easter = Date::from_ymd_opt(year, month.try_into().unwrap(), day.try_into().unwrap()).unwrap();
    easter - Duration::days(2)
}
