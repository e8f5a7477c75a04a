use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    db::TenantStore,
    domain::{derive_buckets, to_milli_watt_hours, BucketKeys, LoadClass, MilliWattHours, PowerReading},
    error::Error,
};

/// What an ingest did to the counter row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReceipt {
    pub delta: MilliWattHours,
    pub buckets: BucketKeys,
}

impl IngestReceipt {
    pub fn watt_hours(&self) -> f64 {
        self.delta.as_watt_hours()
    }
}

/// Add `delta_mwh` to the buckets active at `at` on exactly one counter row.
///
/// The four active bucket columns and the daily and monthly `eu` totals are
/// bumped by one in-place statement, so concurrent calls on the same row
/// serialize in storage and none is lost.
pub async fn apply(
    store: &dyn TenantStore,
    load_class: LoadClass,
    socket_id: &str,
    delta_mwh: i64,
    at: OffsetDateTime,
) -> Result<BucketKeys, Error> {
    let buckets = derive_buckets(at);
    let touched = store
        .increment(load_class, socket_id, &buckets.increment_columns(), delta_mwh)
        .await?;

    if touched == 0 {
        return Err(Error::UnknownSocket {
            load_class,
            socket_id: socket_id.to_string(),
        });
    }

    Ok(buckets)
}

/// Convert a reading to energy and accumulate it at `at`.
pub async fn ingest(store: &dyn TenantStore, reading: &PowerReading, at: OffsetDateTime) -> Result<IngestReceipt, Error> {
    let delta = to_milli_watt_hours(reading.power_watts, reading.duration_seconds);
    let buckets = apply(store, reading.load_class, &reading.socket_id, delta.get(), at).await?;

    tracing::debug!(
        tenant = %reading.tenant,
        load_class = %reading.load_class,
        socket_id = %reading.socket_id,
        delta_mwh = delta.get(),
        "reading accumulated"
    );

    Ok(IngestReceipt { delta, buckets })
}
