use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, Time};

use super::buckets::{CounterColumn, DayBucket, HourBucket, MonthBucket, PeriodTotal, WeekBucket};
use crate::error::Error;

/// Granularity of a reset, and of a chart interval on the read side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl PeriodKind {
    pub const ALL: [PeriodKind; 4] = [Self::Daily, Self::Weekly, Self::Monthly, Self::Yearly];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    /// Start of the period that contains `now`, in `now`'s offset.
    ///
    /// Weeks start on Monday.
    pub fn boundary(self, now: OffsetDateTime) -> OffsetDateTime {
        let midnight = now.replace_time(Time::MIDNIGHT);
        match self {
            Self::Daily => midnight,
            Self::Weekly => {
                midnight - Duration::days(i64::from(now.weekday().number_days_from_monday()))
            }
            Self::Monthly => midnight - Duration::days(i64::from(now.day()) - 1),
            Self::Yearly => midnight - Duration::days(i64::from(now.ordinal()) - 1),
        }
    }

    /// Whether a reset last recorded at `last` leaves this kind due at `now`.
    /// No record at all counts as due.
    pub fn is_due(self, last: Option<OffsetDateTime>, now: OffsetDateTime) -> bool {
        match last {
            None => true,
            Some(last) => last < self.boundary(now),
        }
    }

    /// Bucket columns charted for this interval, in display order.
    pub fn bucket_columns(self) -> Vec<CounterColumn> {
        match self {
            Self::Daily => HourBucket::ALL.into_iter().map(CounterColumn::Hour).collect(),
            Self::Weekly => DayBucket::ALL.into_iter().map(CounterColumn::Day).collect(),
            Self::Monthly => WeekBucket::ALL.into_iter().map(CounterColumn::Week).collect(),
            Self::Yearly => MonthBucket::ALL.into_iter().map(CounterColumn::Month).collect(),
        }
    }

    /// Every column a reset of this kind zeroes.
    ///
    /// The sets are disjoint across kinds. Daily and monthly resets also own
    /// their pair of period totals.
    pub fn owned_columns(self) -> Vec<CounterColumn> {
        let mut columns = self.bucket_columns();
        match self {
            Self::Daily => columns.extend([
                CounterColumn::Total(PeriodTotal::EuDaily),
                CounterColumn::Total(PeriodTotal::EcDaily),
            ]),
            Self::Monthly => columns.extend([
                CounterColumn::Total(PeriodTotal::EuMonthly),
                CounterColumn::Total(PeriodTotal::EcMonthly),
            ]),
            Self::Weekly | Self::Yearly => {}
        }
        columns
    }

    /// Period total reported by the consumption summary for this interval.
    ///
    /// Only daily and monthly totals are tracked, so weekly and yearly
    /// summaries read the monthly total.
    pub fn summary_total(self) -> PeriodTotal {
        match self {
            Self::Daily => PeriodTotal::EuDaily,
            Self::Weekly | Self::Monthly | Self::Yearly => PeriodTotal::EuMonthly,
        }
    }

    /// Parse a chart interval selector.
    ///
    /// Accepts the kind names and the short `1D`/`1W`/`1M`/`1Y` forms, ignoring
    /// case.
    pub fn parse_interval(s: &str) -> Result<Self, Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1d" | "daily" => Ok(Self::Daily),
            "1w" | "weekly" => Ok(Self::Weekly),
            "1m" | "monthly" => Ok(Self::Monthly),
            "1y" | "yearly" => Ok(Self::Yearly),
            _ => Err(Error::InvalidInterval(s.to_string())),
        }
    }

    /// Like [`PeriodKind::parse_interval`] but never fails: unsupported or
    /// missing selectors fall back to daily.
    pub fn interval_or_default(s: Option<&str>) -> Self {
        match s.map(Self::parse_interval) {
            None => Self::Daily,
            Some(Ok(kind)) => kind,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "falling back to daily interval");
                Self::Daily
            }
        }
    }
}

impl fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PeriodKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidInterval(s.to_string()))
    }
}
