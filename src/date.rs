use crate::error::Error;
use chrono::{Datelike, Duration, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;

/// Parses a `YYYYMMDD` timestamp into a calendar date.
///
/// Anything other than exactly eight ASCII digits forming a valid date is rejected
/// with [`Error::InvalidDate`].
pub fn parse_timestamp(s: &str) -> Result<NaiveDate, Error> {
    let invalid = || Error::InvalidDate {
        date: s.to_string(),
    };

    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let year = s[0..4].parse::<i32>().map_err(|_| invalid())?;
    let month = s[4..6].parse::<u32>().map_err(|_| invalid())?;
    let day = s[6..8].parse::<u32>().map_err(|_| invalid())?;

    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}

/// Integer form of [`parse_timestamp`]. Years below 1000 lose their leading zeros as
/// integers, so the value is padded back to eight digits first.
pub fn parse_timestamp_int(value: u32) -> Result<NaiveDate, Error> {
    parse_timestamp(&format!("{value:08}"))
}

pub fn format_timestamp(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// `YYYYMMDD` as an integer. Only meaningful for years 0 through 9999.
pub fn to_timestamp_int(date: NaiveDate) -> u32 {
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}

pub fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    date + Duration::days(days)
}

pub fn is_sunday(date: NaiveDate) -> bool {
    date.weekday() == Weekday::Sun
}

pub fn is_monday(date: NaiveDate) -> bool {
    date.weekday() == Weekday::Mon
}

/// The most recent Sunday strictly before `today`.
pub fn last_sunday_before(today: NaiveDate) -> NaiveDate {
    let days_back = match today.weekday().number_from_monday() % 7 {
        0 => 7,
        n => n,
    };
    add_days(today, -(days_back as i64))
}

pub fn parse_timezone(name: &str) -> Result<Tz, Error> {
    name.parse::<Tz>()
        .map_err(|_| Error::InvalidTimezone(name.to_string()))
}

/// Current calendar date in `tz`. This is the only place the system clock is read;
/// everything downstream takes the date as an argument.
pub fn today_in(tz: &Tz) -> NaiveDate {
    Utc::now().with_timezone(tz).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("20230601").unwrap(), ymd(2023, 6, 1));
        assert_eq!(parse_timestamp("20240229").unwrap(), ymd(2024, 2, 29));
    }

    #[test]
    fn test_parse_timestamp_rejects_malformed_input() {
        let inputs = [
            "",
            "2023061",
            "202306011",
            "2023-06-01",
            "20231301",
            "20230230",
            "2023O601",
        ];
        for input in inputs {
            match parse_timestamp(input) {
                Err(Error::InvalidDate { date }) => assert_eq!(date, input),
                other => panic!("expected InvalidDate for {input:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_timestamp_int_conversions() {
        let date = ymd(2023, 8, 1);
        assert_eq!(to_timestamp_int(date), 20230801);
        assert_eq!(parse_timestamp_int(20230801).unwrap(), date);
        assert!(parse_timestamp_int(0).is_err());
        assert!(parse_timestamp_int(123_456_789).is_err());
        assert_eq!(format_timestamp(date), "20230801");
    }

    #[test]
    fn test_timestamp_int_keeps_early_years() {
        let date = ymd(1, 1, 1);
        assert_eq!(to_timestamp_int(date), 10101);
        assert_eq!(parse_timestamp_int(10101).unwrap(), date);
        assert_eq!(format_timestamp(date), "00010101");

        let date = ymd(999, 12, 31);
        assert_eq!(parse_timestamp_int(to_timestamp_int(date)).unwrap(), date);
    }

    #[test]
    fn test_add_days_crosses_month_and_year() {
        assert_eq!(add_days(ymd(2023, 5, 31), 1), ymd(2023, 6, 1));
        assert_eq!(add_days(ymd(2024, 1, 1), -1), ymd(2023, 12, 31));
    }

    #[test]
    fn test_weekday_helpers() {
        // 2023-08-06 is a Sunday
        assert!(is_sunday(ymd(2023, 8, 6)));
        assert!(!is_sunday(ymd(2023, 8, 7)));
        assert!(is_monday(ymd(2023, 8, 7)));
    }

    #[test]
    fn test_last_sunday_before() {
        assert_eq!(last_sunday_before(ymd(2023, 8, 7)), ymd(2023, 8, 6));
        assert_eq!(last_sunday_before(ymd(2023, 8, 12)), ymd(2023, 8, 6));
        assert_eq!(last_sunday_before(ymd(2023, 8, 13)), ymd(2023, 8, 6));
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("Asia/Kolkata").unwrap(), chrono_tz::Asia::Kolkata);
        assert!(matches!(
            parse_timezone("Mars/Olympus"),
            Err(Error::InvalidTimezone(name)) if name == "Mars/Olympus"
        ));
    }
}
