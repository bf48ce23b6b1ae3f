//! Ranking periods and their calendar boundaries.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Date codes are `YYYYMMDD`.
pub const DATE_CODE_FORMAT: &str = "%Y%m%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankPeriod {
    Day,
    Week,
    Month,
}

impl RankPeriod {
    pub const ALL: [RankPeriod; 3] = [RankPeriod::Day, RankPeriod::Week, RankPeriod::Month];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    /// Record type for raw rank pages of this period.
    pub fn data_type(self) -> &'static str {
        match self {
            Self::Day => "video_rank_day",
            Self::Week => "video_rank_week",
            Self::Month => "video_rank_month",
        }
    }

    pub fn from_data_type(data_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.data_type() == data_type)
    }
}

impl fmt::Display for RankPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RankPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            other => Err(format!("unknown rank period: {other}")),
        }
    }
}

/// Window covered by one rank list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodDates {
    pub start_date: String,
    pub end_date: String,
    pub rank_date: String,
}

/// Boundaries of the period containing `date_code`.
///
/// Day lists cover the day itself. Week lists run Monday to Sunday and are
/// keyed by the Monday. Month lists cover the calendar month and are keyed by
/// its first day. An unparseable code falls back to the code for all three.
pub fn period_dates(period: RankPeriod, date_code: &str) -> PeriodDates {
    let same = PeriodDates {
        start_date: date_code.to_string(),
        end_date: date_code.to_string(),
        rank_date: date_code.to_string(),
    };
    let Ok(date) = NaiveDate::parse_from_str(date_code, DATE_CODE_FORMAT) else {
        return same;
    };
    let fmt = |d: NaiveDate| d.format(DATE_CODE_FORMAT).to_string();

    match period {
        RankPeriod::Day => same,
        RankPeriod::Week => {
            let offset = i64::from(date.weekday().num_days_from_monday());
            let monday = date - Duration::days(offset);
            let sunday = monday + Duration::days(6);
            PeriodDates {
                start_date: fmt(monday),
                end_date: fmt(sunday),
                rank_date: fmt(monday),
            }
        }
        RankPeriod::Month => {
            let first = date.with_day(1).unwrap_or(date);
            let next_month = if first.month() == 12 {
                NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
            } else {
                NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
            };
            let last = next_month
                .and_then(|d| d.pred_opt())
                .unwrap_or(date);
            PeriodDates {
                start_date: fmt(first),
                end_date: fmt(last),
                rank_date: fmt(first),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_period_is_the_day() {
        let d = period_dates(RankPeriod::Day, "20250715");
        assert_eq!(d.start_date, "20250715");
        assert_eq!(d.end_date, "20250715");
        assert_eq!(d.rank_date, "20250715");
    }

    #[test]
    fn test_week_period_runs_monday_to_sunday() {
        // 2025-07-15 is a Tuesday.
        let d = period_dates(RankPeriod::Week, "20250715");
        assert_eq!(d.start_date, "20250714");
        assert_eq!(d.end_date, "20250720");
        assert_eq!(d.rank_date, "20250714");

        // A Sunday belongs to the week that started six days earlier.
        let d = period_dates(RankPeriod::Week, "20250720");
        assert_eq!(d.start_date, "20250714");
    }

    #[test]
    fn test_month_period_handles_year_end_and_leap_years() {
        let d = period_dates(RankPeriod::Month, "20241215");
        assert_eq!(d.start_date, "20241201");
        assert_eq!(d.end_date, "20241231");
        assert_eq!(d.rank_date, "20241201");

        let d = period_dates(RankPeriod::Month, "20240210");
        assert_eq!(d.end_date, "20240229");
    }

    #[test]
    fn test_bad_date_code_falls_back() {
        let d = period_dates(RankPeriod::Week, "yesterday");
        assert_eq!(d.start_date, "yesterday");
        assert_eq!(d.rank_date, "yesterday");
    }

    #[test]
    fn test_data_type_mapping() {
        for period in RankPeriod::ALL {
            assert_eq!(RankPeriod::from_data_type(period.data_type()), Some(period));
        }
        assert_eq!(RankPeriod::from_data_type("video_trend"), None);
        assert_eq!("Week".parse::<RankPeriod>(), Ok(RankPeriod::Week));
    }
}
