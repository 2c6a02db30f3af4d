use std::collections::BTreeSet;

use chrono::{Datelike, Months, NaiveDate, Weekday};

/// Weekday business calendar with an explicit holiday list.
#[derive(Debug, Clone, Default)]
pub struct TradingCalendar {
    holidays: BTreeSet<NaiveDate>,
}

impl TradingCalendar {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.is_holiday(date)
    }

    /// True when no business day precedes `date` within its month.
    pub fn is_first_business_day_of_month(&self, date: NaiveDate) -> bool {
        if !self.is_business_day(date) {
            return false;
        }
        let Some(first) = date.with_day(1) else {
            return false;
        };
        first
            .iter_days()
            .take_while(|d| *d < date)
            .all(|d| !self.is_business_day(d))
    }
}

/// Start of the one-year history window ending at `end`.
pub fn history_window_start(end: NaiveDate) -> NaiveDate {
    months_back(end, 12)
}

/// `date` moved back by whole calendar months, clamping to month end.
pub fn months_back(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn weekends_and_holidays_are_not_business_days() {
        let cal = TradingCalendar::new([d("2020-10-08")]);
        assert!(cal.is_business_day(d("2020-10-09")));
        assert!(!cal.is_business_day(d("2020-10-10")));
        assert!(!cal.is_business_day(d("2020-10-11")));
        assert!(!cal.is_business_day(d("2020-10-08")));
    }

    #[test]
    fn first_business_day_skips_weekend_and_holiday() {
        // 2022-10-01 is a Saturday, 2022-10-03 a Monday.
        let cal = TradingCalendar::new([d("2022-10-03")]);
        assert!(!cal.is_first_business_day_of_month(d("2022-10-03")));
        assert!(cal.is_first_business_day_of_month(d("2022-10-04")));
        assert!(!cal.is_first_business_day_of_month(d("2022-10-05")));

        let plain = TradingCalendar::default();
        assert!(plain.is_first_business_day_of_month(d("2022-10-03")));
        assert!(plain.is_first_business_day_of_month(d("2022-11-01")));
    }

    #[test]
    fn history_window_clamps_leap_day() {
        assert_eq!(history_window_start(d("2024-02-29")), d("2023-02-28"));
        assert_eq!(history_window_start(d("2023-06-15")), d("2022-06-15"));
        assert_eq!(months_back(d("2023-08-31"), 6), d("2023-02-28"));
    }
}
