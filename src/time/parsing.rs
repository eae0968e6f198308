use serde::Deserialize;
use serde::de::{Deserializer, Error};

use crate::core::GenericResult;

use super::Date;

pub fn parse_date(date: &str, format: &str) -> GenericResult<Date> {
    Ok(Date::parse_from_str(date, format).map_err(|_| format!(
        "Invalid date: {date:?}"))?)
}

pub fn parse_user_date(date: &str) -> GenericResult<Date> {
    parse_date(date, "%Y-%m-%d").or_else(|_| parse_date(date, "%Y.%m.%d"))
}

pub fn deserialize_date<'de, D>(deserializer: D) -> Result<Date, D::Error>
    where D: Deserializer<'de>
{
    let date: String = Deserialize::deserialize(deserializer)?;
    parse_user_date(&date).map_err(D::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_parsing() {
        assert_eq!(parse_user_date("2020-01-02").unwrap(), date!(2020, 1, 2));
        assert_eq!(parse_user_date("2020.01.02").unwrap(), date!(2020, 1, 2));
        assert!(parse_user_date("02.01.2020").is_err());
        assert!(parse_user_date("2020-02-30").is_err());
    }
}
