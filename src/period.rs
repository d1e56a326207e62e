//! Calendar bucketing of sale dates and period arithmetic between buckets

use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{AnalyticsError, AnalyticsResult};

/// Calendar bucket size used for cohorts and period offsets
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Week,
    Month,
    Quarter,
    Year,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::Year => "year",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Week => "Weekly",
            Self::Month => "Monthly",
            Self::Quarter => "Quarterly",
            Self::Year => "Yearly",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A calendar bucket at a given granularity.
///
/// Internally a bucket is a running ordinal (months since year 0, ISO weeks
/// since 0001-01-01, ...) so that ordering and subtraction are plain integer
/// operations. Weeks start on Monday, which makes the week offset between two
/// buckets equal to the number of whole weeks between their Mondays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    granularity: Granularity,
    ordinal: i64,
}

impl BucketKey {
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// First calendar day covered by this bucket
    pub fn start_date(&self) -> NaiveDate {
        let start = match self.granularity {
            Granularity::Week => i32::try_from(self.ordinal * 7 + 1)
                .ok()
                .and_then(NaiveDate::from_num_days_from_ce_opt),
            Granularity::Month => i32::try_from(self.ordinal.div_euclid(12))
                .ok()
                .and_then(|year| {
                    NaiveDate::from_ymd_opt(year, self.ordinal.rem_euclid(12) as u32 + 1, 1)
                }),
            Granularity::Quarter => i32::try_from(self.ordinal.div_euclid(4))
                .ok()
                .and_then(|year| {
                    NaiveDate::from_ymd_opt(year, self.ordinal.rem_euclid(4) as u32 * 3 + 1, 1)
                }),
            Granularity::Year => i32::try_from(self.ordinal)
                .ok()
                .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1)),
        };
        // Keys are only built from valid dates, so the round trip cannot fail.
        start.unwrap_or(NaiveDate::MIN)
    }

    /// Number of whole buckets from `cohort` to `self`.
    ///
    /// Fails when the buckets use different granularities or when `self`
    /// lies before `cohort`.
    pub fn periods_since(&self, cohort: &BucketKey) -> AnalyticsResult<u32> {
        if self.granularity != cohort.granularity {
            return Err(AnalyticsError::GranularityMismatch {
                left: self.granularity.as_str(),
                right: cohort.granularity.as_str(),
            });
        }

        let diff = self.ordinal - cohort.ordinal;
        u32::try_from(diff).map_err(|_| AnalyticsError::PeriodOrder {
            earlier: cohort.to_string(),
            later: self.to_string(),
        })
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.granularity {
            Granularity::Week => {
                let week = self.start_date().iso_week();
                write!(f, "{}-W{:02}", week.year(), week.week())
            }
            Granularity::Month => write!(
                f,
                "{}-{:02}",
                self.ordinal.div_euclid(12),
                self.ordinal.rem_euclid(12) + 1
            ),
            Granularity::Quarter => write!(
                f,
                "{}-Q{}",
                self.ordinal.div_euclid(4),
                self.ordinal.rem_euclid(4) + 1
            ),
            Granularity::Year => write!(f, "{}", self.ordinal),
        }
    }
}

impl Serialize for BucketKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Map a date to the calendar bucket containing it
pub fn bucket_period(date: NaiveDate, granularity: Granularity) -> BucketKey {
    let year = i64::from(date.year());
    let ordinal = match granularity {
        Granularity::Week => i64::from(date.num_days_from_ce() - 1).div_euclid(7),
        Granularity::Month => year * 12 + i64::from(date.month0()),
        Granularity::Quarter => year * 4 + i64::from(date.month0() / 3),
        Granularity::Year => year,
    };

    BucketKey {
        granularity,
        ordinal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_labels() {
        assert_eq!(bucket_period(date(2024, 1, 5), Granularity::Month).to_string(), "2024-01");
        assert_eq!(bucket_period(date(2024, 11, 30), Granularity::Quarter).to_string(), "2024-Q4");
        assert_eq!(bucket_period(date(2024, 2, 29), Granularity::Year).to_string(), "2024");
        // 2024-01-05 is a Friday in ISO week 1
        assert_eq!(bucket_period(date(2024, 1, 5), Granularity::Week).to_string(), "2024-W01");
        // 2021-01-01 belongs to the last ISO week of 2020
        assert_eq!(bucket_period(date(2021, 1, 1), Granularity::Week).to_string(), "2020-W53");
    }

    #[test]
    fn test_week_starts_on_monday() {
        let key = bucket_period(date(2024, 1, 7), Granularity::Week);
        assert_eq!(key.start_date(), date(2024, 1, 1));
        assert_eq!(bucket_period(date(2024, 1, 1), Granularity::Week), key);
        assert_ne!(bucket_period(date(2024, 1, 8), Granularity::Week), key);
    }

    #[test]
    fn test_start_dates() {
        assert_eq!(bucket_period(date(2023, 8, 17), Granularity::Month).start_date(), date(2023, 8, 1));
        assert_eq!(bucket_period(date(2023, 8, 17), Granularity::Quarter).start_date(), date(2023, 7, 1));
        assert_eq!(bucket_period(date(2023, 8, 17), Granularity::Year).start_date(), date(2023, 1, 1));
    }

    #[test]
    fn test_periods_since_across_year_boundary() {
        let cohort = bucket_period(date(2023, 11, 20), Granularity::Month);
        let later = bucket_period(date(2024, 2, 1), Granularity::Month);
        assert_eq!(later.periods_since(&cohort).unwrap(), 3);

        let cohort = bucket_period(date(2023, 12, 31), Granularity::Quarter);
        let later = bucket_period(date(2024, 1, 1), Granularity::Quarter);
        assert_eq!(later.periods_since(&cohort).unwrap(), 1);

        let cohort = bucket_period(date(2023, 12, 31), Granularity::Week);
        let later = bucket_period(date(2024, 1, 1), Granularity::Week);
        assert_eq!(later.periods_since(&cohort).unwrap(), 1);
        assert_eq!(cohort.periods_since(&cohort).unwrap(), 0);
    }

    #[test]
    fn test_periods_since_rejects_out_of_order() {
        let cohort = bucket_period(date(2024, 3, 1), Granularity::Month);
        let earlier = bucket_period(date(2024, 1, 1), Granularity::Month);
        assert!(matches!(
            earlier.periods_since(&cohort),
            Err(AnalyticsError::PeriodOrder { .. })
        ));
    }

    #[test]
    fn test_periods_since_rejects_mixed_granularity() {
        let month = bucket_period(date(2024, 3, 1), Granularity::Month);
        let year = bucket_period(date(2024, 3, 1), Granularity::Year);
        assert!(matches!(
            month.periods_since(&year),
            Err(AnalyticsError::GranularityMismatch { .. })
        ));
    }

    #[test]
    fn test_ordering_follows_calendar() {
        let a = bucket_period(date(2023, 12, 1), Granularity::Month);
        let b = bucket_period(date(2024, 1, 1), Granularity::Month);
        assert!(a < b);
    }
}
