//! Periodic zeroing of bucket columns.
//!
//! "Once per period" is never observed directly. It is inferred by comparing
//! the ledger's last reset instant against the start of the period that
//! contains `now`. Each period kind walks `NotDue -> Due -> ResetDone ->
//! NotDue` once per check cycle at most. The step out of `Due` is claimed in
//! storage together with the zeroing and the ledger write, so concurrent
//! cycles on any number of processes reset a boundary once, and only a
//! complete zeroing across all load-class tables moves the ledger forward.

use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    db::TenantStore,
    domain::{LoadClass, PeriodKind},
    error::{Error, TableFailure},
};

/// Reset state of one period kind within a check cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetState {
    NotDue,
    Due,
    ResetDone,
}

/// Reads and writes the per-tenant last-reset ledger.
pub struct ResetLedger<'a> {
    store: &'a dyn TenantStore,
}

impl<'a> ResetLedger<'a> {
    pub fn new(store: &'a dyn TenantStore) -> Self {
        Self { store }
    }

    /// True when no reset has been recorded for `period` or the last one
    /// happened before the start of the current period.
    pub async fn is_due(&self, period: PeriodKind, now: OffsetDateTime) -> Result<bool, Error> {
        let last = self.store.last_reset_at(period).await?;
        Ok(period.is_due(last, now))
    }

    pub async fn state(&self, period: PeriodKind, now: OffsetDateTime) -> Result<ResetState, Error> {
        if self.is_due(period, now).await? {
            Ok(ResetState::Due)
        } else {
            Ok(ResetState::NotDue)
        }
    }

    pub async fn mark_reset(&self, period: PeriodKind, now: OffsetDateTime) -> Result<(), Error> {
        self.store.record_reset(period, now).await
    }

    /// Lazily create the ledger, seeding every kind with `now`.
    pub async fn ensure(&self, now: OffsetDateTime) -> Result<(), Error> {
        self.store.ensure_ledger(now).await
    }
}

#[derive(Debug)]
pub struct ResetReport {
    pub checked_at: OffsetDateTime,
    pub performed: Vec<PeriodKind>,
    pub failures: Vec<(PeriodKind, Error)>,
}

impl ResetReport {
    fn new(checked_at: OffsetDateTime) -> Self {
        Self {
            checked_at,
            performed: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct ResetExecutor<'a> {
    store: &'a dyn TenantStore,
}

impl<'a> ResetExecutor<'a> {
    pub fn new(store: &'a dyn TenantStore) -> Self {
        Self { store }
    }

    fn ledger(&self) -> ResetLedger<'a> {
        ResetLedger::new(self.store)
    }

    /// Zero every column `period` owns in all four load-class tables.
    ///
    /// All tables are attempted even when one fails; zeroing is idempotent so
    /// a later retry over already-cleared tables is harmless.
    pub async fn execute(&self, period: PeriodKind) -> Result<(), Error> {
        let columns = period.owned_columns();
        let mut failures = Vec::new();

        for load_class in LoadClass::ALL {
            match self.store.zero_columns(load_class, &columns).await {
                Ok(rows) => {
                    tracing::debug!(period = %period, table = load_class.table(), rows, "zeroed counters");
                }
                Err(e) => {
                    tracing::warn!(period = %period, table = load_class.table(), error = %e, "failed to zero counters");
                    failures.push(TableFailure {
                        load_class,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::ResetPartialFailure { period, failures })
        }
    }

    /// Reset a single period kind if it is due, returning the state reached.
    ///
    /// The due-check, zeroing and ledger write are one storage claim, so a
    /// cycle that lost the race to another one sees `NotDue` here.
    pub async fn run_period(&self, period: PeriodKind, now: OffsetDateTime) -> Result<ResetState, Error> {
        if !self.store.reset_if_due(period, now).await? {
            return Ok(ResetState::NotDue);
        }

        tracing::info!(period = %period, at = %now, "period reset");
        Ok(ResetState::ResetDone)
    }

    /// Evaluate all four period kinds independently.
    ///
    /// A failure in one kind is recorded and the remaining kinds are still
    /// attempted.
    pub async fn run_check_cycle(&self, now: OffsetDateTime) -> ResetReport {
        let mut report = ResetReport::new(now);

        if let Err(e) = self.ledger().ensure(now).await {
            tracing::error!(error = %e, "reset ledger unavailable");
            for period in PeriodKind::ALL {
                report.failures.push((period, clone_for_report(&e)));
            }
            return report;
        }

        for period in PeriodKind::ALL {
            match self.run_period(period, now).await {
                Ok(ResetState::ResetDone) => report.performed.push(period),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(period = %period, error = %e, "reset left pending for next cycle");
                    report.failures.push((period, e));
                }
            }
        }

        report
    }
}

fn clone_for_report(e: &Error) -> Error {
    match e {
        Error::ConnectionFailure(msg) => Error::ConnectionFailure(msg.clone()),
        other => Error::Storage(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        accumulator,
        db::MemoryTenantStore,
        domain::{CounterColumn, CounterRow, DayBucket, HourBucket, MonthBucket, PeriodTotal, WeekBucket},
    };
    use time::macros::datetime;

    async fn row(store: &MemoryTenantStore, load_class: LoadClass) -> CounterRow {
        store
            .counter_row(load_class, "S1")
            .await
            .expect("store online")
            .expect("provisioned row")
    }

    /// Put a non-zero value into every column of every table.
    async fn fill(store: &MemoryTenantStore) {
        let all: Vec<CounterColumn> = CounterColumn::all().collect();
        for load_class in LoadClass::ALL {
            store
                .increment(load_class, "S1", &all, 10)
                .await
                .expect("store online");
        }
    }

    #[tokio::test]
    async fn missing_entry_is_due() -> Result<(), Error> {
        let store = MemoryTenantStore::new();
        let ledger = ResetLedger::new(&store);
        assert!(ledger.is_due(PeriodKind::Yearly, datetime!(2024-06-01 12:00:00 UTC)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn daily_due_check_is_monotonic_within_a_day() -> Result<(), Error> {
        let store = MemoryTenantStore::new();
        let ledger = ResetLedger::new(&store);

        let now = datetime!(2024-03-15 00:05:00 UTC);
        ledger.mark_reset(PeriodKind::Daily, now).await?;

        assert!(!ledger.is_due(PeriodKind::Daily, now).await?);
        assert!(!ledger.is_due(PeriodKind::Daily, datetime!(2024-03-15 12:00:00 UTC)).await?);
        assert!(!ledger.is_due(PeriodKind::Daily, datetime!(2024-03-15 23:59:59.999 UTC)).await?);
        assert!(ledger.is_due(PeriodKind::Daily, datetime!(2024-03-16 00:00:00 UTC)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn weekly_monthly_yearly_due_at_their_boundaries() -> Result<(), Error> {
        let store = MemoryTenantStore::new();
        let ledger = ResetLedger::new(&store);

        // Wednesday
        let marked = datetime!(2024-01-31 08:00:00 UTC);
        for period in [PeriodKind::Weekly, PeriodKind::Monthly, PeriodKind::Yearly] {
            ledger.mark_reset(period, marked).await?;
        }

        // Sunday night is still the same week; Monday is not.
        assert!(!ledger.is_due(PeriodKind::Weekly, datetime!(2024-02-04 23:59:00 UTC)).await?);
        assert!(ledger.is_due(PeriodKind::Weekly, datetime!(2024-02-05 00:00:00 UTC)).await?);

        assert!(ledger.is_due(PeriodKind::Monthly, datetime!(2024-02-01 00:00:00 UTC)).await?);
        assert!(!ledger.is_due(PeriodKind::Monthly, datetime!(2024-01-31 23:59:00 UTC)).await?);

        assert!(!ledger.is_due(PeriodKind::Yearly, datetime!(2024-12-31 23:59:00 UTC)).await?);
        assert!(ledger.is_due(PeriodKind::Yearly, datetime!(2025-01-01 00:00:00 UTC)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn daily_reset_isolation() -> Result<(), Error> {
        let store = MemoryTenantStore::with_sockets(["S1"]);
        fill(&store).await;

        ResetExecutor::new(&store).execute(PeriodKind::Daily).await?;

        let zeroed = PeriodKind::Daily.owned_columns();
        for load_class in LoadClass::ALL {
            let row = row(&store, load_class).await;
            for column in CounterColumn::all() {
                let want = if zeroed.contains(&column) { 0 } else { 10 };
                assert_eq!(row.get(column), want, "{load_class}/{column}");
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn each_kind_zeroes_only_what_it_owns() -> Result<(), Error> {
        let cases = [
            (PeriodKind::Weekly, CounterColumn::Day(DayBucket::Sun), CounterColumn::Hour(HourBucket::H4)),
            (
                PeriodKind::Monthly,
                CounterColumn::Total(PeriodTotal::EcMonthly),
                CounterColumn::Total(PeriodTotal::EcDaily),
            ),
            (PeriodKind::Monthly, CounterColumn::Week(WeekBucket::Week4), CounterColumn::Month(MonthBucket::Dec)),
            (PeriodKind::Yearly, CounterColumn::Month(MonthBucket::Dec), CounterColumn::Week(WeekBucket::Week1)),
        ];

        for (period, owned, foreign) in cases {
            let store = MemoryTenantStore::with_sockets(["S1"]);
            fill(&store).await;
            ResetExecutor::new(&store).execute(period).await?;

            let row = row(&store, LoadClass::Universal).await;
            assert_eq!(row.get(owned), 0, "{period} should zero {owned}");
            assert_eq!(row.get(foreign), 10, "{period} should keep {foreign}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn check_cycle_after_midnight_resets_daily_only() -> Result<(), Error> {
        let store = MemoryTenantStore::with_sockets(["S1"]);
        fill(&store).await;

        let marked = datetime!(2024-03-14 23:00:00 UTC);
        store.ensure_ledger(marked).await?;

        let now = datetime!(2024-03-15 00:05:00 UTC);
        let report = ResetExecutor::new(&store).run_check_cycle(now).await;

        assert_eq!(report.performed, vec![PeriodKind::Daily]);
        assert!(report.is_clean());
        assert_eq!(report.checked_at, now);
        assert_eq!(store.last_reset_at(PeriodKind::Daily).await?, Some(now));
        assert_eq!(store.last_reset_at(PeriodKind::Weekly).await?, Some(marked));

        for load_class in LoadClass::ALL {
            let row = row(&store, load_class).await;
            for column in PeriodKind::Daily.owned_columns() {
                assert_eq!(row.get(column), 0, "{load_class}/{column}");
            }
            assert_eq!(row.get(CounterColumn::Total(PeriodTotal::EuMonthly)), 10);
        }

        // Running again in the same day is a no-op.
        accumulator::apply(&store, LoadClass::Light, "S1", 5, now).await?;
        let report = ResetExecutor::new(&store).run_check_cycle(datetime!(2024-03-15 18:00:00 UTC)).await;
        assert!(report.performed.is_empty());
        assert_eq!(row(&store, LoadClass::Light).await.get(CounterColumn::Hour(HourBucket::H4)), 5);
        Ok(())
    }

    #[tokio::test]
    async fn fresh_ledger_is_seeded_and_nothing_is_due() -> Result<(), Error> {
        let store = MemoryTenantStore::with_sockets(["S1"]);
        fill(&store).await;

        let now = datetime!(2024-03-15 09:30:00 UTC);
        let report = ResetExecutor::new(&store).run_check_cycle(now).await;
        assert!(report.performed.is_empty());
        for period in PeriodKind::ALL {
            assert_eq!(store.last_reset_at(period).await?, Some(now));
        }
        assert_eq!(row(&store, LoadClass::Light).await.get(CounterColumn::Hour(HourBucket::H4)), 10);
        Ok(())
    }

    #[tokio::test]
    async fn missing_ledger_row_triggers_reset() -> Result<(), Error> {
        let store = MemoryTenantStore::with_sockets(["S1"]);
        fill(&store).await;
        let now = datetime!(2024-03-15 09:30:00 UTC);
        store.ensure_ledger(now).await?;
        store.forget_reset(PeriodKind::Yearly);

        let report = ResetExecutor::new(&store).run_check_cycle(now).await;
        assert_eq!(report.performed, vec![PeriodKind::Yearly]);
        assert_eq!(row(&store, LoadClass::Heavy).await.get(CounterColumn::Month(MonthBucket::Mar)), 0);
        Ok(())
    }

    #[tokio::test]
    async fn partial_failure_is_not_marked_and_does_not_block_other_kinds() -> Result<(), Error> {
        let store = MemoryTenantStore::with_sockets(["S1"]);
        fill(&store).await;
        store.ensure_ledger(datetime!(2023-12-31 12:00:00 UTC)).await?;
        store.fail_table(LoadClass::Medium);

        let now = datetime!(2024-01-01 00:10:00 UTC);
        let report = ResetExecutor::new(&store).run_check_cycle(now).await;

        assert!(report.performed.is_empty());
        assert_eq!(report.failures.len(), 4);
        for (period, e) in &report.failures {
            match e {
                Error::ResetPartialFailure { period: p, failures } => {
                    assert_eq!(p, period);
                    assert_eq!(failures.len(), 1);
                    assert_eq!(failures[0].load_class, LoadClass::Medium);
                }
                other => panic!("unexpected error {other}"),
            }
            // Not marked, so still due next cycle.
            assert!(ResetLedger::new(&store).is_due(*period, now).await?);
        }

        // Nothing is zeroed unless every table can be.
        assert_eq!(row(&store, LoadClass::Light).await.get(CounterColumn::Hour(HourBucket::H12)), 10);

        // Retry after recovery completes every kind.
        store.heal_table(LoadClass::Medium);
        let retry = ResetExecutor::new(&store).run_check_cycle(now).await;
        assert_eq!(retry.performed, PeriodKind::ALL.to_vec());
        assert!(retry.is_clean());
        for load_class in LoadClass::ALL {
            let row = row(&store, load_class).await;
            assert!(CounterColumn::all().all(|c| row.get(c) == 0), "{load_class} not cleared");
        }
        Ok(())
    }

    #[tokio::test]
    async fn run_period_reports_the_state_reached() -> Result<(), Error> {
        let store = MemoryTenantStore::with_sockets(["S1"]);
        store.ensure_ledger(datetime!(2024-03-14 23:00:00 UTC)).await?;
        let executor = ResetExecutor::new(&store);

        let now = datetime!(2024-03-15 00:05:00 UTC);
        assert_eq!(executor.run_period(PeriodKind::Daily, now).await?, ResetState::ResetDone);
        assert_eq!(executor.run_period(PeriodKind::Daily, now).await?, ResetState::NotDue);
        assert_eq!(executor.run_period(PeriodKind::Weekly, now).await?, ResetState::NotDue);
        Ok(())
    }

    #[tokio::test]
    async fn stale_due_check_does_not_wipe_later_increments() -> Result<(), Error> {
        let store = MemoryTenantStore::with_sockets(["S1"]);
        store.ensure_ledger(datetime!(2024-03-14 23:00:00 UTC)).await?;
        let first = ResetExecutor::new(&store);
        let second = ResetExecutor::new(&store);
        let now = datetime!(2024-03-15 00:05:00 UTC);

        // The first cycle sees the period as due...
        assert!(first.ledger().is_due(PeriodKind::Daily, now).await?);

        // ...while a second cycle completes the reset and a reading lands.
        let report = second.run_check_cycle(now).await;
        assert_eq!(report.performed, vec![PeriodKind::Daily]);
        accumulator::apply(&store, LoadClass::Light, "S1", 1667, now).await?;

        // The first cycle then acts on its stale view.
        assert_eq!(first.run_period(PeriodKind::Daily, now).await?, ResetState::NotDue);
        assert_eq!(first.run_check_cycle(now).await.performed, Vec::new());
        assert_eq!(row(&store, LoadClass::Light).await.get(CounterColumn::Hour(HourBucket::H4)), 1667);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_cycles_reset_once() -> Result<(), Error> {
        let store = MemoryTenantStore::with_sockets(["S1"]);
        store.ensure_ledger(datetime!(2024-03-14 23:00:00 UTC)).await?;
        let now = datetime!(2024-03-15 00:05:00 UTC);

        let a = ResetExecutor::new(&store);
        let b = ResetExecutor::new(&store);
        let (ra, rb) = tokio::join!(a.run_check_cycle(now), b.run_check_cycle(now));

        let mut performed = ra.performed;
        performed.extend(rb.performed);
        assert_eq!(performed, vec![PeriodKind::Daily]);
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_ledger_fails_every_kind() {
        let store = MemoryTenantStore::with_sockets(["S1"]);
        store.set_offline(true);

        let report = ResetExecutor::new(&store)
            .run_check_cycle(datetime!(2024-03-15 00:05:00 UTC))
            .await;
        assert!(report.performed.is_empty());
        assert_eq!(report.failures.len(), 4);
        assert!(report
            .failures
            .iter()
            .all(|(_, e)| matches!(e, Error::ConnectionFailure(_))));
    }
}
