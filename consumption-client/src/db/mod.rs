use time::OffsetDateTime;

use crate::{
    domain::{CounterColumn, CounterRow, LoadClass, PeriodKind},
    error::Error,
};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryTenantResolver, MemoryTenantStore};
pub use postgres::{PgTenantResolver, PgTenantStore};

/// Storage of one tenant: the four counter tables and the reset ledger.
///
/// Every mutating method is a single in-place statement on the backend
/// (`col = col + delta`, `col = 0`, upsert). Implementations must never read a
/// counter, compute in application code, and write it back.
#[async_trait::async_trait]
pub trait TenantStore: Send + Sync {
    /// Add `delta` to each of `columns` on the row for `socket_id`.
    ///
    /// Returns the number of rows touched; zero means the socket has not been
    /// provisioned in that load class.
    async fn increment(
        &self,
        load_class: LoadClass,
        socket_id: &str,
        columns: &[CounterColumn],
        delta: i64,
    ) -> Result<u64, Error>;

    /// Set `columns` to zero on every row of the load class table.
    async fn zero_columns(&self, load_class: LoadClass, columns: &[CounterColumn]) -> Result<u64, Error>;

    /// Sum of each column over all rows of the table, in the order requested.
    async fn sum_columns(&self, load_class: LoadClass, columns: &[CounterColumn]) -> Result<Vec<i64>, Error>;

    async fn counter_row(&self, load_class: LoadClass, socket_id: &str) -> Result<Option<CounterRow>, Error>;

    /// Create the four counter tables if they are missing.
    async fn ensure_counter_tables(&self) -> Result<(), Error>;

    /// Insert a zeroed row for the socket. Existing rows are left untouched.
    ///
    /// Returns `true` when a new row was created.
    async fn provision_socket(&self, load_class: LoadClass, socket_id: &str) -> Result<bool, Error>;

    /// Create the reset ledger if absent. When this call creates it, every
    /// period kind is seeded with `now`.
    async fn ensure_ledger(&self, now: OffsetDateTime) -> Result<(), Error>;

    async fn last_reset_at(&self, period: PeriodKind) -> Result<Option<OffsetDateTime>, Error>;

    /// Upsert the ledger entry. The stored timestamp never moves backwards.
    async fn record_reset(&self, period: PeriodKind, at: OffsetDateTime) -> Result<(), Error>;

    /// Claim and perform the reset of `period` at `now` as one unit.
    ///
    /// The due-check, the zeroing of the period's owned columns in all four
    /// tables and the ledger update happen under a single lock on the ledger
    /// entry. Returns `false` when the period is not due. When any table
    /// fails, nothing is zeroed and the ledger is left as it was
    /// (`Error::ResetPartialFailure`).
    async fn reset_if_due(&self, period: PeriodKind, now: OffsetDateTime) -> Result<bool, Error>;
}
