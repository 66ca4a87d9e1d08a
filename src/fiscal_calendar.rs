//! Fiscal period arithmetic
//!
//! Periods are quarters in the Minguo (ROC) calendar used by the disclosure
//! portal: fiscal year = Gregorian year - 1911, Q1 = Jan-Mar ... Q4 = Oct-Dec.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CalendarError;

/// Offset between the Gregorian and Minguo year numbers
pub const MINGUO_YEAR_OFFSET: i32 = 1911;

/// First quarter reported under IFRS (2013 Q1)
pub const DEFAULT_EARLIEST_SUPPORTED: FiscalPeriod = FiscalPeriod { year: 102, quarter: 1 };

/// A fiscal quarter. Ordered by (year, quarter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FiscalPeriod {
    year: i32,
    quarter: u8,
}

impl FiscalPeriod {
    pub fn new(year: i32, quarter: u8) -> Result<Self, CalendarError> {
        if year <= 0 {
            return Err(CalendarError::OutOfRange { year });
        }
        if !(1..=4).contains(&quarter) {
            return Err(CalendarError::InvalidQuarter(quarter));
        }
        Ok(Self { year, quarter })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn quarter(&self) -> u8 {
        self.quarter
    }

    /// The period `n` quarters before this one, borrowing a year when the
    /// quarter underflows.
    pub fn quarters_before(&self, n: u32) -> Result<Self, CalendarError> {
        let index = i64::from(self.year) * 4 + i64::from(self.quarter - 1) - i64::from(n);
        let year = index.div_euclid(4);
        let quarter = index.rem_euclid(4) as u8 + 1;
        if year <= 0 {
            let year = i32::try_from(year).unwrap_or(i32::MIN);
            return Err(CalendarError::OutOfRange { year });
        }
        // year <= self.year here, so it fits in i32
        Self::new(year as i32, quarter)
    }

    pub fn previous(&self) -> Result<Self, CalendarError> {
        self.quarters_before(1)
    }

    /// Month and day the quarter's balance sheet is dated, e.g. (3, 31) for Q1
    pub fn closing_month_day(&self) -> (u32, u32) {
        match self.quarter {
            1 => (3, 31),
            2 => (6, 30),
            3 => (9, 30),
            _ => (12, 31),
        }
    }
}

impl fmt::Display for FiscalPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Q{}", self.year, self.quarter)
    }
}

impl FromStr for FiscalPeriod {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unparseable = || CalendarError::Unparseable(s.to_string());
        let (year, quarter) = s
            .trim()
            .split_once(['Q', 'q'])
            .ok_or_else(unparseable)?;
        let year = year.parse::<i32>().map_err(|_| unparseable())?;
        let quarter = quarter.parse::<u8>().map_err(|_| unparseable())?;
        FiscalPeriod::new(year, quarter)
    }
}

/// Maps calendar dates onto fiscal periods and knows the oldest period worth fetching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiscalCalendar {
    year_offset: i32,
    earliest_supported: FiscalPeriod,
}

impl Default for FiscalCalendar {
    fn default() -> Self {
        Self::new(MINGUO_YEAR_OFFSET, DEFAULT_EARLIEST_SUPPORTED)
    }
}

impl FiscalCalendar {
    pub fn new(year_offset: i32, earliest_supported: FiscalPeriod) -> Self {
        Self {
            year_offset,
            earliest_supported,
        }
    }

    /// The period containing `date`
    pub fn current_period(&self, date: NaiveDate) -> Result<FiscalPeriod, CalendarError> {
        let quarter = ((date.month() - 1) / 3 + 1) as u8;
        FiscalPeriod::new(date.year() - self.year_offset, quarter)
    }

    /// The period `n` quarters before the one containing `date`
    pub fn periods_back(&self, date: NaiveDate, n: u32) -> Result<FiscalPeriod, CalendarError> {
        self.current_period(date)?.quarters_before(n)
    }

    /// The most recent quarter that has closed as of `date`
    pub fn last_closed_period(&self, date: NaiveDate) -> Result<FiscalPeriod, CalendarError> {
        self.periods_back(date, 1)
    }

    /// Oldest period the extractor understands. Older filings predate IFRS.
    pub fn earliest_supported_period(&self) -> FiscalPeriod {
        self.earliest_supported
    }

    pub fn is_supported(&self, period: FiscalPeriod) -> bool {
        period >= self.earliest_supported
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    fn period(year: i32, quarter: u8) -> FiscalPeriod {
        FiscalPeriod::new(year, quarter).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_current_period_month_bands() {
        let calendar = FiscalCalendar::default();
        assert_eq!(calendar.current_period(date(2023, 1, 1)).unwrap(), period(112, 1));
        assert_eq!(calendar.current_period(date(2023, 3, 31)).unwrap(), period(112, 1));
        assert_eq!(calendar.current_period(date(2023, 4, 1)).unwrap(), period(112, 2));
        assert_eq!(calendar.current_period(date(2023, 9, 30)).unwrap(), period(112, 3));
        assert_eq!(calendar.current_period(date(2023, 12, 31)).unwrap(), period(112, 4));
    }

    #[test]
    fn test_quarter_borrowing() {
        assert_eq!(period(111, 1).quarters_before(4).unwrap(), period(110, 1));
        assert_eq!(period(111, 1).quarters_before(1).unwrap(), period(110, 4));
        assert_eq!(period(111, 3).quarters_before(2).unwrap(), period(111, 1));
        assert_eq!(period(111, 2).quarters_before(7).unwrap(), period(109, 3));
        assert_eq!(period(111, 2).quarters_before(0).unwrap(), period(111, 2));
    }

    #[test]
    fn test_periods_back_from_date() {
        let calendar = FiscalCalendar::default();
        // 2023-05-10 is 112Q2
        assert_eq!(calendar.periods_back(date(2023, 5, 10), 1).unwrap(), period(112, 1));
        assert_eq!(calendar.periods_back(date(2023, 5, 10), 2).unwrap(), period(111, 4));
        assert_eq!(calendar.last_closed_period(date(2023, 2, 1)).unwrap(), period(111, 4));
    }

    #[test]
    fn test_year_zero_is_out_of_range() {
        assert_matches!(period(1, 1).previous(), Err(CalendarError::OutOfRange { year: 0 }));
        assert_matches!(FiscalPeriod::new(0, 2), Err(CalendarError::OutOfRange { .. }));
        assert_matches!(FiscalPeriod::new(100, 5), Err(CalendarError::InvalidQuarter(5)));

        let calendar = FiscalCalendar::default();
        assert_matches!(
            calendar.current_period(date(1911, 6, 1)),
            Err(CalendarError::OutOfRange { year: 0 })
        );
    }

    #[test]
    fn test_period_ordering_and_parsing() {
        assert!(period(110, 4) < period(111, 1));
        assert!(period(111, 1) < period(111, 2));
        assert_eq!("111Q4".parse::<FiscalPeriod>().unwrap(), period(111, 4));
        assert_eq!(" 102q1 ".parse::<FiscalPeriod>().unwrap(), period(102, 1));
        assert_eq!(period(109, 3).to_string(), "109Q3");
        assert_matches!("2023".parse::<FiscalPeriod>(), Err(CalendarError::Unparseable(_)));
        assert_matches!("111Q0".parse::<FiscalPeriod>(), Err(CalendarError::InvalidQuarter(0)));
    }

    #[test]
    fn test_floor_is_inclusive() {
        let calendar = FiscalCalendar::default();
        assert!(calendar.is_supported(period(102, 1)));
        assert!(!calendar.is_supported(period(101, 4)));
        assert_eq!(period(102, 3).closing_month_day(), (9, 30));
    }
}
