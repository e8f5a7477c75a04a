use std::{fmt, ops::Add};

use serde::Serialize;

/// Energy in milli-watt-hours, the storage unit of every counter column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct MilliWattHours(pub i64);

impl MilliWattHours {
    pub const ZERO: MilliWattHours = MilliWattHours(0);

    pub fn get(self) -> i64 {
        self.0
    }

    /// Display value only; never feed this back into a counter.
    pub fn as_watt_hours(self) -> f64 {
        self.0 as f64 / 1000.0
    }
}

impl Add for MilliWattHours {
    type Output = MilliWattHours;

    fn add(self, rhs: Self) -> Self::Output {
        MilliWattHours(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Display for MilliWattHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mWh", self.0)
    }
}

const MICRO: f64 = 1_000_000.0;
const MILLI: f64 = 1_000.0;
// micro-watt * milli-second -> milli-watt-hour
const UW_MS_PER_MWH: i128 = 3_600_000_000;

/// Convert an instantaneous power reading held for `duration_seconds` into
/// milli-watt-hours, rounding half away from zero.
///
/// Both inputs are quantised once (power to micro-watts, duration to
/// milliseconds) and the rest of the computation is integer, so the result is
/// exact for every input representable at that resolution. Negative power and
/// zero duration are passed through as negative or zero deltas. Non-finite
/// inputs quantise to zero.
pub fn to_milli_watt_hours(power_watts: f64, duration_seconds: f64) -> MilliWattHours {
    let micro_watts = quantise(power_watts, MICRO);
    let millis = quantise(duration_seconds, MILLI);

    let mwh = div_round(micro_watts * millis, UW_MS_PER_MWH);
    MilliWattHours(mwh.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
}

fn quantise(value: f64, scale: f64) -> i128 {
    if !value.is_finite() {
        return 0;
    }
    // `as` saturates for out-of-range floats.
    (value * scale).round() as i64 as i128
}

fn div_round(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder.abs() * 2 >= denominator {
        quotient + numerator.signum()
    } else {
        quotient
    }
}
