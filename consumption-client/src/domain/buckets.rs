use std::fmt;

use serde::Serialize;
use time::{Month, OffsetDateTime, Weekday};

/// Four-hour slot of the day. Each variant is named after the exclusive upper
/// hour of its slot, so `H4` covers 00:00–03:59.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HourBucket {
    H4,
    H8,
    H12,
    H16,
    H20,
    H24,
}

impl HourBucket {
    pub const ALL: [HourBucket; 6] = [Self::H4, Self::H8, Self::H12, Self::H16, Self::H20, Self::H24];

    pub fn for_hour(hour: u8) -> Self {
        match hour {
            0..=3 => Self::H4,
            4..=7 => Self::H8,
            8..=11 => Self::H12,
            12..=15 => Self::H16,
            16..=19 => Self::H20,
            _ => Self::H24,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Self::H4 => "h4",
            Self::H8 => "h8",
            Self::H12 => "h12",
            Self::H16 => "h16",
            Self::H20 => "h20",
            Self::H24 => "h24",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::H4 => "0h",
            Self::H8 => "4h",
            Self::H12 => "8h",
            Self::H16 => "12h",
            Self::H20 => "16h",
            Self::H24 => "20h",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DayBucket {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayBucket {
    pub const ALL: [DayBucket; 7] = [
        Self::Mon,
        Self::Tue,
        Self::Wed,
        Self::Thu,
        Self::Fri,
        Self::Sat,
        Self::Sun,
    ];

    pub fn for_weekday(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Monday => Self::Mon,
            Weekday::Tuesday => Self::Tue,
            Weekday::Wednesday => Self::Wed,
            Weekday::Thursday => Self::Thu,
            Weekday::Friday => Self::Fri,
            Weekday::Saturday => Self::Sat,
            Weekday::Sunday => Self::Sun,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Self::Mon => "mon",
            Self::Tue => "tue",
            Self::Wed => "wed",
            Self::Thu => "thu",
            Self::Fri => "fri",
            Self::Sat => "sat",
            Self::Sun => "sun",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Mon => "Mon",
            Self::Tue => "Tue",
            Self::Wed => "Wed",
            Self::Thu => "Thu",
            Self::Fri => "Fri",
            Self::Sat => "Sat",
            Self::Sun => "Sun",
        }
    }
}

/// Week-of-month slot.
///
/// Days 1–7, 8–14 and 15–21 map to the first three weeks. Everything from
/// day 22 onwards lands in `Week4`, so the last slot spans 7 to 10 days
/// depending on the month length. There is no fifth week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekBucket {
    Week1,
    Week2,
    Week3,
    Week4,
}

impl WeekBucket {
    pub const ALL: [WeekBucket; 4] = [Self::Week1, Self::Week2, Self::Week3, Self::Week4];

    pub fn for_day_of_month(day: u8) -> Self {
        match day {
            0..=7 => Self::Week1,
            8..=14 => Self::Week2,
            15..=21 => Self::Week3,
            _ => Self::Week4,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Self::Week1 => "week1",
            Self::Week2 => "week2",
            Self::Week3 => "week3",
            Self::Week4 => "week4",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Week1 => "Week 1",
            Self::Week2 => "Week 2",
            Self::Week3 => "Week 3",
            Self::Week4 => "Week 4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonthBucket {
    Jan,
    Feb,
    Mar,
    Apr,
    May,
    Jun,
    Jul,
    Aug,
    Sep,
    Oct,
    Nov,
    Dec,
}

impl MonthBucket {
    pub const ALL: [MonthBucket; 12] = [
        Self::Jan,
        Self::Feb,
        Self::Mar,
        Self::Apr,
        Self::May,
        Self::Jun,
        Self::Jul,
        Self::Aug,
        Self::Sep,
        Self::Oct,
        Self::Nov,
        Self::Dec,
    ];

    pub fn for_month(month: Month) -> Self {
        match month {
            Month::January => Self::Jan,
            Month::February => Self::Feb,
            Month::March => Self::Mar,
            Month::April => Self::Apr,
            Month::May => Self::May,
            Month::June => Self::Jun,
            Month::July => Self::Jul,
            Month::August => Self::Aug,
            Month::September => Self::Sep,
            Month::October => Self::Oct,
            Month::November => Self::Nov,
            Month::December => Self::Dec,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Self::Jan => "jan",
            Self::Feb => "feb",
            Self::Mar => "mar",
            Self::Apr => "apr",
            Self::May => "may",
            Self::Jun => "jun",
            Self::Jul => "jul",
            Self::Aug => "aug",
            Self::Sep => "sep",
            Self::Oct => "oct",
            Self::Nov => "nov",
            Self::Dec => "dec",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Jan => "Jan",
            Self::Feb => "Feb",
            Self::Mar => "Mar",
            Self::Apr => "Apr",
            Self::May => "May",
            Self::Jun => "Jun",
            Self::Jul => "Jul",
            Self::Aug => "Aug",
            Self::Sep => "Sep",
            Self::Oct => "Oct",
            Self::Nov => "Nov",
            Self::Dec => "Dec",
        }
    }
}

/// Cumulative-within-period counters that sit next to the bucket slots.
///
/// `Eu*` totals are fed by every ingest. `Ec*` totals are only ever zeroed
/// here; another producer owns their increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodTotal {
    EuDaily,
    EcDaily,
    EuMonthly,
    EcMonthly,
}

impl PeriodTotal {
    pub const ALL: [PeriodTotal; 4] = [Self::EuDaily, Self::EcDaily, Self::EuMonthly, Self::EcMonthly];

    pub fn column(self) -> &'static str {
        match self {
            Self::EuDaily => "eu_daily",
            Self::EcDaily => "ec_daily",
            Self::EuMonthly => "eu_monthly",
            Self::EcMonthly => "ec_monthly",
        }
    }
}

/// Every numeric column of a counter row.
///
/// Storage code only ever renders identifiers through [`CounterColumn::as_str`],
/// so the set of columns a statement can touch is closed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterColumn {
    Hour(HourBucket),
    Day(DayBucket),
    Week(WeekBucket),
    Month(MonthBucket),
    Total(PeriodTotal),
}

impl CounterColumn {
    pub const COUNT: usize = 6 + 7 + 4 + 12 + 4;

    pub fn all() -> impl Iterator<Item = CounterColumn> {
        HourBucket::ALL
            .into_iter()
            .map(Self::Hour)
            .chain(DayBucket::ALL.into_iter().map(Self::Day))
            .chain(WeekBucket::ALL.into_iter().map(Self::Week))
            .chain(MonthBucket::ALL.into_iter().map(Self::Month))
            .chain(PeriodTotal::ALL.into_iter().map(Self::Total))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hour(b) => b.column(),
            Self::Day(b) => b.column(),
            Self::Week(b) => b.column(),
            Self::Month(b) => b.column(),
            Self::Total(t) => t.column(),
        }
    }

    /// Dense position of the column in [`CounterColumn::all`] order.
    pub fn index(self) -> usize {
        match self {
            Self::Hour(b) => b as usize,
            Self::Day(b) => 6 + b as usize,
            Self::Week(b) => 13 + b as usize,
            Self::Month(b) => 17 + b as usize,
            Self::Total(t) => 29 + t as usize,
        }
    }

    /// Human readable chart label for bucket columns; totals have none.
    pub fn label(self) -> Option<&'static str> {
        match self {
            Self::Hour(b) => Some(b.label()),
            Self::Day(b) => Some(b.label()),
            Self::Week(b) => Some(b.label()),
            Self::Month(b) => Some(b.label()),
            Self::Total(_) => None,
        }
    }
}

impl fmt::Display for CounterColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The bucket slots that are active for writes at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketKeys {
    pub hour: HourBucket,
    pub day: DayBucket,
    pub week: WeekBucket,
    pub month: MonthBucket,
}

impl BucketKeys {
    /// Columns incremented by an ingest: the four active buckets plus the
    /// daily and monthly `eu` totals.
    pub fn increment_columns(&self) -> [CounterColumn; 6] {
        [
            CounterColumn::Hour(self.hour),
            CounterColumn::Day(self.day),
            CounterColumn::Week(self.week),
            CounterColumn::Month(self.month),
            CounterColumn::Total(PeriodTotal::EuDaily),
            CounterColumn::Total(PeriodTotal::EuMonthly),
        ]
    }
}

/// Derive the active buckets from a wall-clock instant.
///
/// The instant's own offset is taken as the tenant-local clock; callers are
/// expected to have converted it already.
pub fn derive_buckets(at: OffsetDateTime) -> BucketKeys {
    BucketKeys {
        hour: HourBucket::for_hour(at.hour()),
        day: DayBucket::for_weekday(at.weekday()),
        week: WeekBucket::for_day_of_month(at.day()),
        month: MonthBucket::for_month(at.month()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn hour_bucket_edges_are_lower_inclusive() {
        assert_eq!(HourBucket::for_hour(0), HourBucket::H4);
        assert_eq!(HourBucket::for_hour(3), HourBucket::H4);
        assert_eq!(HourBucket::for_hour(4), HourBucket::H8);
        assert_eq!(HourBucket::for_hour(11), HourBucket::H12);
        assert_eq!(HourBucket::for_hour(12), HourBucket::H16);
        assert_eq!(HourBucket::for_hour(19), HourBucket::H20);
        assert_eq!(HourBucket::for_hour(20), HourBucket::H24);
        assert_eq!(HourBucket::for_hour(23), HourBucket::H24);
    }

    #[test]
    fn week_bucket_folds_late_days_into_week4() {
        assert_eq!(WeekBucket::for_day_of_month(1), WeekBucket::Week1);
        assert_eq!(WeekBucket::for_day_of_month(7), WeekBucket::Week1);
        assert_eq!(WeekBucket::for_day_of_month(8), WeekBucket::Week2);
        assert_eq!(WeekBucket::for_day_of_month(14), WeekBucket::Week2);
        assert_eq!(WeekBucket::for_day_of_month(15), WeekBucket::Week3);
        assert_eq!(WeekBucket::for_day_of_month(21), WeekBucket::Week3);
        assert_eq!(WeekBucket::for_day_of_month(22), WeekBucket::Week4);
        assert_eq!(WeekBucket::for_day_of_month(29), WeekBucket::Week4);
        assert_eq!(WeekBucket::for_day_of_month(31), WeekBucket::Week4);
    }

    #[test]
    fn derive_buckets_for_friday_morning_mid_march() {
        let keys = derive_buckets(datetime!(2024-03-15 09:30:00 UTC));
        assert_eq!(
            keys,
            BucketKeys {
                hour: HourBucket::H12,
                day: DayBucket::Fri,
                week: WeekBucket::Week3,
                month: MonthBucket::Mar,
            }
        );
    }

    #[test]
    fn derive_buckets_uses_the_local_offset_of_the_instant() {
        // 23:30 UTC on a Sunday is already Monday morning at +02:00.
        let utc = datetime!(2024-03-31 23:30:00 UTC);
        let local = utc.to_offset(time::macros::offset!(+2));

        assert_eq!(derive_buckets(utc).day, DayBucket::Sun);
        assert_eq!(derive_buckets(utc).month, MonthBucket::Mar);

        let keys = derive_buckets(local);
        assert_eq!(keys.hour, HourBucket::H4);
        assert_eq!(keys.day, DayBucket::Mon);
        assert_eq!(keys.week, WeekBucket::Week1);
        assert_eq!(keys.month, MonthBucket::Apr);
    }

    #[test]
    fn derive_buckets_is_deterministic_across_a_day() {
        let start = datetime!(2024-02-29 00:00:00 UTC);
        for minutes in (0..24 * 60).step_by(17) {
            let at = start + time::Duration::minutes(minutes);
            assert_eq!(derive_buckets(at), derive_buckets(at));
            assert_eq!(derive_buckets(at).week, WeekBucket::Week4);
            assert_eq!(derive_buckets(at).day, DayBucket::Thu);
        }
    }

    #[test]
    fn counter_column_indexes_are_dense_and_ordered() {
        let columns: Vec<CounterColumn> = CounterColumn::all().collect();
        assert_eq!(columns.len(), CounterColumn::COUNT);
        for (i, col) in columns.iter().enumerate() {
            assert_eq!(col.index(), i, "column {col}");
        }
    }

    #[test]
    fn counter_column_names_are_unique() {
        let mut names: Vec<&str> = CounterColumn::all().map(CounterColumn::as_str).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), CounterColumn::COUNT);
    }
}
