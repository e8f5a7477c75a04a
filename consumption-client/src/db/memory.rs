use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use time::OffsetDateTime;

use super::TenantStore;
use crate::{
    domain::{CounterColumn, CounterRow, LoadClass, PeriodKind},
    error::{Error, TableFailure},
    tenant::{TenantId, TenantResolver},
};

#[derive(Default)]
struct Inner {
    tables: HashMap<LoadClass, BTreeMap<String, CounterRow>>,
    ledger: Option<HashMap<PeriodKind, OffsetDateTime>>,
    failing_tables: HashSet<LoadClass>,
    offline: bool,
}

/// In-process tenant storage.
///
/// All operations run under one mutex, which gives the same per-statement
/// atomicity as the database. Failures can be injected per table to exercise
/// partial reset handling.
#[derive(Default)]
pub struct MemoryTenantStore {
    inner: Mutex<Inner>,
}

impl MemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store with the counter tables in place and `sockets` provisioned in
    /// every load class.
    pub fn with_sockets<'a>(sockets: impl IntoIterator<Item = &'a str>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.lock();
            let sockets: Vec<&str> = sockets.into_iter().collect();
            for load_class in LoadClass::ALL {
                let table = inner.tables.entry(load_class).or_default();
                for socket in &sockets {
                    table.insert(socket.to_string(), CounterRow::new(*socket));
                }
            }
        }
        store
    }

    /// Make every statement against `load_class`'s table fail until cleared.
    pub fn fail_table(&self, load_class: LoadClass) {
        self.lock().failing_tables.insert(load_class);
    }

    pub fn heal_table(&self, load_class: LoadClass) {
        self.lock().failing_tables.remove(&load_class);
    }

    /// Simulate the whole database being unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Inner {
    fn check_online(&self) -> Result<(), Error> {
        if self.offline {
            return Err(Error::ConnectionFailure("store offline".to_string()));
        }
        Ok(())
    }

    fn table(&self, load_class: LoadClass) -> Result<Option<&BTreeMap<String, CounterRow>>, Error> {
        self.check_online()?;
        if self.failing_tables.contains(&load_class) {
            return Err(Error::Storage(format!("{} unavailable", load_class.table())));
        }
        Ok(self.tables.get(&load_class))
    }

    fn table_mut(&mut self, load_class: LoadClass) -> Result<&mut BTreeMap<String, CounterRow>, Error> {
        self.table(load_class)?;
        Ok(self.tables.entry(load_class).or_default())
    }
}

#[async_trait::async_trait]
impl TenantStore for MemoryTenantStore {
    async fn increment(
        &self,
        load_class: LoadClass,
        socket_id: &str,
        columns: &[CounterColumn],
        delta: i64,
    ) -> Result<u64, Error> {
        let mut inner = self.lock();
        let Some(row) = inner.table_mut(load_class)?.get_mut(socket_id) else {
            return Ok(0);
        };
        for column in columns {
            row.add(*column, delta);
        }
        Ok(1)
    }

    async fn zero_columns(&self, load_class: LoadClass, columns: &[CounterColumn]) -> Result<u64, Error> {
        let mut inner = self.lock();
        let table = inner.table_mut(load_class)?;
        for row in table.values_mut() {
            for column in columns {
                row.zero(*column);
            }
        }
        Ok(table.len() as u64)
    }

    async fn sum_columns(&self, load_class: LoadClass, columns: &[CounterColumn]) -> Result<Vec<i64>, Error> {
        let inner = self.lock();
        let rows = inner.table(load_class)?;
        Ok(columns
            .iter()
            .map(|column| {
                rows.into_iter()
                    .flat_map(|t| t.values())
                    .fold(0i64, |acc, row| acc.saturating_add(row.get(*column)))
            })
            .collect())
    }

    async fn counter_row(&self, load_class: LoadClass, socket_id: &str) -> Result<Option<CounterRow>, Error> {
        let inner = self.lock();
        Ok(inner
            .table(load_class)?
            .and_then(|t| t.get(socket_id))
            .cloned())
    }

    async fn ensure_counter_tables(&self) -> Result<(), Error> {
        let mut inner = self.lock();
        inner.check_online()?;
        for load_class in LoadClass::ALL {
            inner.tables.entry(load_class).or_default();
        }
        Ok(())
    }

    async fn provision_socket(&self, load_class: LoadClass, socket_id: &str) -> Result<bool, Error> {
        let mut inner = self.lock();
        let table = inner.table_mut(load_class)?;
        if table.contains_key(socket_id) {
            return Ok(false);
        }
        table.insert(socket_id.to_string(), CounterRow::new(socket_id));
        Ok(true)
    }

    async fn ensure_ledger(&self, now: OffsetDateTime) -> Result<(), Error> {
        let mut inner = self.lock();
        inner.check_online()?;
        if inner.ledger.is_none() {
            inner.ledger = Some(PeriodKind::ALL.into_iter().map(|p| (p, now)).collect());
        }
        Ok(())
    }

    async fn last_reset_at(&self, period: PeriodKind) -> Result<Option<OffsetDateTime>, Error> {
        let inner = self.lock();
        inner.check_online()?;
        Ok(inner.ledger.as_ref().and_then(|l| l.get(&period).copied()))
    }

    async fn record_reset(&self, period: PeriodKind, at: OffsetDateTime) -> Result<(), Error> {
        let mut inner = self.lock();
        inner.check_online()?;
        let entry = inner
            .ledger
            .get_or_insert_with(HashMap::new)
            .entry(period)
            .or_insert(at);
        if *entry < at {
            *entry = at;
        }
        Ok(())
    }

    async fn reset_if_due(&self, period: PeriodKind, now: OffsetDateTime) -> Result<bool, Error> {
        let mut inner = self.lock();
        inner.check_online()?;

        let last = inner.ledger.as_ref().and_then(|l| l.get(&period).copied());
        if !period.is_due(last, now) {
            return Ok(false);
        }

        let failures: Vec<TableFailure> = LoadClass::ALL
            .into_iter()
            .filter_map(|load_class| {
                inner.table(load_class).err().map(|e| TableFailure {
                    load_class,
                    reason: e.to_string(),
                })
            })
            .collect();
        if !failures.is_empty() {
            return Err(Error::ResetPartialFailure { period, failures });
        }

        let columns = period.owned_columns();
        for load_class in LoadClass::ALL {
            for row in inner.tables.entry(load_class).or_default().values_mut() {
                for column in &columns {
                    row.zero(*column);
                }
            }
        }

        let entry = inner
            .ledger
            .get_or_insert_with(HashMap::new)
            .entry(period)
            .or_insert(now);
        if *entry < now {
            *entry = now;
        }
        Ok(true)
    }
}

impl MemoryTenantStore {
    /// Drop a single ledger entry, as if it had never been written.
    pub fn forget_reset(&self, period: PeriodKind) {
        if let Some(ledger) = self.lock().ledger.as_mut() {
            ledger.remove(&period);
        }
    }
}

/// Resolver over a fixed set of in-memory tenants.
#[derive(Default, Clone)]
pub struct MemoryTenantResolver {
    tenants: Arc<Mutex<HashMap<TenantId, Arc<MemoryTenantStore>>>>,
}

impl MemoryTenantResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tenant: TenantId, store: Arc<MemoryTenantStore>) {
        self.tenants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(tenant, store);
    }

    pub fn store(&self, tenant: &TenantId) -> Option<Arc<MemoryTenantStore>> {
        self.tenants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(tenant)
            .cloned()
    }
}

#[async_trait::async_trait]
impl TenantResolver for MemoryTenantResolver {
    async fn resolve(&self, tenant: &TenantId) -> Result<Arc<dyn TenantStore>, Error> {
        match self.store(tenant) {
            Some(store) => Ok(store),
            None => Err(Error::ConnectionFailure(format!("no database for tenant '{tenant}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DayBucket, HourBucket};
    use time::macros::datetime;

    const H4: CounterColumn = CounterColumn::Hour(HourBucket::H4);
    const MON: CounterColumn = CounterColumn::Day(DayBucket::Mon);

    #[tokio::test]
    async fn increment_reports_missing_rows() -> Result<(), Error> {
        let store = MemoryTenantStore::with_sockets(["s1"]);
        assert_eq!(store.increment(LoadClass::Light, "s1", &[H4], 5).await?, 1);
        assert_eq!(store.increment(LoadClass::Light, "s2", &[H4], 5).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn zero_touches_only_requested_columns() -> Result<(), Error> {
        let store = MemoryTenantStore::with_sockets(["s1", "s2"]);
        store.increment(LoadClass::Heavy, "s1", &[H4, MON], 7).await?;
        store.increment(LoadClass::Heavy, "s2", &[H4, MON], 3).await?;

        assert_eq!(store.zero_columns(LoadClass::Heavy, &[H4]).await?, 2);
        assert_eq!(store.sum_columns(LoadClass::Heavy, &[H4, MON]).await?, vec![0, 10]);
        Ok(())
    }

    #[tokio::test]
    async fn failing_table_errors_until_healed() -> Result<(), Error> {
        let store = MemoryTenantStore::with_sockets(["s1"]);
        store.fail_table(LoadClass::Medium);
        assert!(matches!(
            store.zero_columns(LoadClass::Medium, &[H4]).await,
            Err(Error::Storage(_))
        ));
        assert!(store.zero_columns(LoadClass::Light, &[H4]).await.is_ok());

        store.heal_table(LoadClass::Medium);
        assert!(store.zero_columns(LoadClass::Medium, &[H4]).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn ledger_is_seeded_once_and_never_moves_back() -> Result<(), Error> {
        let store = MemoryTenantStore::new();
        assert_eq!(store.last_reset_at(PeriodKind::Weekly).await?, None);

        let first = datetime!(2024-03-15 09:30:00 UTC);
        store.ensure_ledger(first).await?;
        store.ensure_ledger(datetime!(2024-03-20 00:00:00 UTC)).await?;
        assert_eq!(store.last_reset_at(PeriodKind::Weekly).await?, Some(first));

        let later = datetime!(2024-03-18 00:01:00 UTC);
        store.record_reset(PeriodKind::Weekly, later).await?;
        store.record_reset(PeriodKind::Weekly, first).await?;
        assert_eq!(store.last_reset_at(PeriodKind::Weekly).await?, Some(later));
        Ok(())
    }

    #[tokio::test]
    async fn reset_claim_is_all_or_nothing() -> Result<(), Error> {
        let store = MemoryTenantStore::with_sockets(["s1"]);
        store.ensure_ledger(datetime!(2024-03-14 12:00:00 UTC)).await?;
        store.increment(LoadClass::Light, "s1", &[H4], 9).await?;
        store.fail_table(LoadClass::Heavy);

        let now = datetime!(2024-03-15 00:05:00 UTC);
        match store.reset_if_due(PeriodKind::Daily, now).await {
            Err(Error::ResetPartialFailure { failures, .. }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].load_class, LoadClass::Heavy);
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
        assert_eq!(store.sum_columns(LoadClass::Light, &[H4]).await?, vec![9]);
        assert_eq!(
            store.last_reset_at(PeriodKind::Daily).await?,
            Some(datetime!(2024-03-14 12:00:00 UTC))
        );

        store.heal_table(LoadClass::Heavy);
        assert!(store.reset_if_due(PeriodKind::Daily, now).await?);
        assert_eq!(store.sum_columns(LoadClass::Light, &[H4]).await?, vec![0]);
        assert!(!store.reset_if_due(PeriodKind::Daily, now).await?);
        Ok(())
    }

    #[tokio::test]
    async fn resolver_only_knows_registered_tenants() {
        let resolver = MemoryTenantResolver::new();
        let acme = TenantId::parse("acme").expect("valid tenant");
        resolver.insert(acme.clone(), Arc::new(MemoryTenantStore::new()));

        assert!(resolver.resolve(&acme).await.is_ok());
        let globex = TenantId::parse("globex").expect("valid tenant");
        assert!(matches!(
            resolver.resolve(&globex).await,
            Err(Error::ConnectionFailure(_))
        ));
    }
}
