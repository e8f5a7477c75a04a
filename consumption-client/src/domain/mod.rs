pub mod buckets;
pub mod counter_row;
pub mod energy;
pub mod load_class;
pub mod period;
pub mod reading;

pub use buckets::{
    derive_buckets, BucketKeys, CounterColumn, DayBucket, HourBucket, MonthBucket, PeriodTotal,
    WeekBucket,
};
pub use counter_row::CounterRow;
pub use energy::{to_milli_watt_hours, MilliWattHours};
pub use load_class::LoadClass;
pub use period::PeriodKind;
pub use reading::PowerReading;
