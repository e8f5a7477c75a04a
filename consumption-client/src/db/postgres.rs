use std::{
    collections::HashMap,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use sqlx::{
    postgres::{PgConnectOptions, PgPool, PgPoolOptions},
    Postgres, QueryBuilder, Row,
};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::TenantStore;
use crate::{
    domain::{CounterColumn, CounterRow, LoadClass, PeriodKind},
    error::{Error, TableFailure},
    tenant::{TenantId, TenantResolver},
};

/// Identifiers are quoted because `dec` and friends collide with SQL keywords.
fn ident(name: &str) -> String {
    format!("\"{name}\"")
}

fn table(load_class: LoadClass) -> String {
    ident(load_class.table())
}

fn zero_sql(load_class: LoadClass, columns: &[CounterColumn]) -> String {
    let assignments = columns
        .iter()
        .map(|column| format!("{} = 0", ident(column.as_str())))
        .collect::<Vec<_>>()
        .join(", ");
    format!("UPDATE {} SET {assignments}", table(load_class))
}

/// Tenant storage backed by the tenant's own Postgres database.
pub struct PgTenantStore {
    pool: PgPool,
    ledger_ready: AtomicBool,
}

impl PgTenantStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            ledger_ready: AtomicBool::new(false),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl TenantStore for PgTenantStore {
    async fn increment(
        &self,
        load_class: LoadClass,
        socket_id: &str,
        columns: &[CounterColumn],
        delta: i64,
    ) -> Result<u64, Error> {
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE ");
        builder.push(table(load_class)).push(" SET ");

        let mut set = builder.separated(", ");
        for column in columns {
            let c = ident(column.as_str());
            set.push(format!("{c} = {c} + "));
            set.push_bind_unseparated(delta);
        }

        builder.push(" WHERE socket_id = ").push_bind(socket_id);

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn zero_columns(&self, load_class: LoadClass, columns: &[CounterColumn]) -> Result<u64, Error> {
        if columns.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(&zero_sql(load_class, columns))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn sum_columns(&self, load_class: LoadClass, columns: &[CounterColumn]) -> Result<Vec<i64>, Error> {
        if columns.is_empty() {
            return Ok(Vec::new());
        }

        let projections = columns
            .iter()
            .map(|column| {
                let c = ident(column.as_str());
                format!("COALESCE(SUM({c}), 0)::BIGINT AS {c}")
            })
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT {projections} FROM {}", table(load_class));

        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        (0..columns.len())
            .map(|i| row.try_get::<i64, _>(i).map_err(Error::from))
            .collect()
    }

    async fn counter_row(&self, load_class: LoadClass, socket_id: &str) -> Result<Option<CounterRow>, Error> {
        let columns = CounterColumn::all()
            .map(|column| ident(column.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT socket_id, {columns} FROM {} WHERE socket_id = $1",
            table(load_class)
        );

        let row = sqlx::query_as::<_, CounterRow>(&sql)
            .bind(socket_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn ensure_counter_tables(&self) -> Result<(), Error> {
        let counters = CounterColumn::all()
            .map(|column| format!("{} BIGINT NOT NULL DEFAULT 0", ident(column.as_str())))
            .collect::<Vec<_>>()
            .join(",\n    ");

        for load_class in LoadClass::ALL {
            let sql = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id BIGSERIAL PRIMARY KEY,
                    socket_id TEXT NOT NULL UNIQUE,
                    {counters}
                )
                "#,
                table(load_class)
            );
            sqlx::query(&sql).execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn provision_socket(&self, load_class: LoadClass, socket_id: &str) -> Result<bool, Error> {
        let sql = format!(
            "INSERT INTO {} (socket_id) VALUES ($1) ON CONFLICT (socket_id) DO NOTHING",
            table(load_class)
        );
        let result = sqlx::query(&sql).bind(socket_id).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn ensure_ledger(&self, now: OffsetDateTime) -> Result<(), Error> {
        if self.ledger_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        let exists: bool = sqlx::query_scalar("SELECT to_regclass('reset_logs') IS NOT NULL")
            .fetch_one(&mut *tx)
            .await?;

        if !exists {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS reset_logs (
                    id BIGSERIAL PRIMARY KEY,
                    reset_type TEXT NOT NULL UNIQUE,
                    last_reset_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )
                "#,
            )
            .execute(&mut *tx)
            .await?;

            let mut seed = QueryBuilder::<Postgres>::new("INSERT INTO reset_logs (reset_type, last_reset_at) ");
            seed.push_values(PeriodKind::ALL, |mut b, period| {
                b.push_bind(period.as_str()).push_bind(now);
            });
            seed.push(" ON CONFLICT (reset_type) DO NOTHING");
            seed.build().execute(&mut *tx).await?;

            tracing::info!(seeded_at = %now, "created reset ledger");
        }

        tx.commit().await?;
        self.ledger_ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn last_reset_at(&self, period: PeriodKind) -> Result<Option<OffsetDateTime>, Error> {
        let at = sqlx::query_scalar::<_, OffsetDateTime>(
            "SELECT last_reset_at FROM reset_logs WHERE reset_type = $1",
        )
        .bind(period.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(at)
    }

    async fn record_reset(&self, period: PeriodKind, at: OffsetDateTime) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO reset_logs (reset_type, last_reset_at)
            VALUES ($1, $2)
            ON CONFLICT (reset_type)
            DO UPDATE SET last_reset_at = GREATEST(reset_logs.last_reset_at, EXCLUDED.last_reset_at)
            "#,
        )
        .bind(period.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_if_due(&self, period: PeriodKind, now: OffsetDateTime) -> Result<bool, Error> {
        let mut tx = self.pool.begin().await?;

        // A missing row reads as due; the epoch placeholder gives the claim a
        // row to lock. It only becomes visible if the reset commits.
        sqlx::query(
            r#"
            INSERT INTO reset_logs (reset_type, last_reset_at)
            VALUES ($1, $2)
            ON CONFLICT (reset_type) DO NOTHING
            "#,
        )
        .bind(period.as_str())
        .bind(OffsetDateTime::UNIX_EPOCH)
        .execute(&mut *tx)
        .await?;

        let last: OffsetDateTime = sqlx::query_scalar(
            "SELECT last_reset_at FROM reset_logs WHERE reset_type = $1 FOR UPDATE",
        )
        .bind(period.as_str())
        .fetch_one(&mut *tx)
        .await?;

        if !period.is_due(Some(last), now) {
            tx.rollback().await?;
            return Ok(false);
        }

        let columns = period.owned_columns();
        let mut failures = Vec::new();
        for load_class in LoadClass::ALL {
            sqlx::query("SAVEPOINT zero_table").execute(&mut *tx).await?;
            match sqlx::query(&zero_sql(load_class, &columns)).execute(&mut *tx).await {
                Ok(_) => {
                    sqlx::query("RELEASE SAVEPOINT zero_table").execute(&mut *tx).await?;
                }
                Err(e) => {
                    sqlx::query("ROLLBACK TO SAVEPOINT zero_table")
                        .execute(&mut *tx)
                        .await?;
                    failures.push(TableFailure {
                        load_class,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !failures.is_empty() {
            tx.rollback().await?;
            return Err(Error::ResetPartialFailure { period, failures });
        }

        sqlx::query(
            "UPDATE reset_logs SET last_reset_at = GREATEST(last_reset_at, $2) WHERE reset_type = $1",
        )
        .bind(period.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }
}

/// Opens one pool per tenant database and keeps it for reuse.
///
/// The tenant id becomes the database name on top of a shared base URI, so
/// host and credentials are configured once.
pub struct PgTenantResolver {
    base: PgConnectOptions,
    max_connections: u32,
    stores: RwLock<HashMap<TenantId, Arc<PgTenantStore>>>,
}

impl PgTenantResolver {
    pub fn new(base_uri: &str, max_connections: u32) -> Result<Self, Error> {
        let base = PgConnectOptions::from_str(base_uri)
            .map_err(|e| Error::ConnectionFailure(format!("invalid database uri: {e}")))?;
        Ok(Self {
            base,
            max_connections: max_connections.max(1),
            stores: RwLock::new(HashMap::new()),
        })
    }

    async fn connect(&self, tenant: &TenantId) -> Result<PgPool, Error> {
        let options = self.base.clone().database(tenant.as_str());
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| Error::ConnectionFailure(format!("tenant '{tenant}': {e}")))
    }
}

#[async_trait::async_trait]
impl TenantResolver for PgTenantResolver {
    async fn resolve(&self, tenant: &TenantId) -> Result<Arc<dyn TenantStore>, Error> {
        if let Some(store) = self.stores.read().await.get(tenant) {
            return Ok(store.clone());
        }

        let pool = self.connect(tenant).await?;
        tracing::debug!(tenant = %tenant, "opened tenant pool");

        let mut stores = self.stores.write().await;
        let store = stores
            .entry(tenant.clone())
            .or_insert_with(|| Arc::new(PgTenantStore::new(pool)))
            .clone();
        Ok(store)
    }
}
