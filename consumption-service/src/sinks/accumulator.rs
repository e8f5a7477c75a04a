use std::{sync::Arc, time::Duration};

use consumption_client::{accumulator, domain::PowerReading, Error, TenantResolver};
use futures::StreamExt;
use time::OffsetDateTime;

use crate::pipeline::{Envelope, PipelineError, Sink};

/// Applies readings to their tenant's counter rows one at a time.
///
/// Lost connectivity is retried with linear backoff. A reading that still
/// fails, or fails permanently (unknown socket, rejected statement), is logged,
/// counted and dropped; the sink keeps draining its input.
#[derive(Clone)]
pub struct AccumulatorSink {
    resolver: Arc<dyn TenantResolver>,
    max_retries: u32,
    retry_backoff: Duration,
}

impl AccumulatorSink {
    pub fn new(resolver: Arc<dyn TenantResolver>, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            resolver,
            max_retries,
            retry_backoff,
        }
    }

    async fn apply_once(&self, env: &Envelope<PowerReading>) -> Result<(), Error> {
        let store = self.resolver.resolve(&env.payload.tenant).await?;
        accumulator::ingest(store.as_ref(), &env.payload, env.received_at).await?;
        Ok(())
    }

    async fn apply(&self, env: &Envelope<PowerReading>) -> Result<(), Error> {
        let mut attempt: u32 = 0;
        loop {
            match self.apply_once(env).await {
                Ok(()) => {
                    metrics::counter!("consumption_readings_applied_total").increment(1);
                    let latency = OffsetDateTime::now_utc() - env.received_at;
                    if latency.is_positive() {
                        metrics::histogram!("ingest_end_to_end_latency_seconds").record(latency.as_seconds_f64());
                    }
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        tenant = %env.payload.tenant,
                        socket_id = %env.payload.socket_id,
                        error = %e,
                        attempt,
                        "accumulate failed, retrying with backoff"
                    );
                    metrics::counter!("consumption_sink_retry_total").increment(1);
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn record_failure(env: &Envelope<PowerReading>, e: &Error) {
        let r = &env.payload;
        match e {
            Error::UnknownSocket { .. } => {
                tracing::warn!(
                    tenant = %r.tenant,
                    load_class = %r.load_class,
                    socket_id = %r.socket_id,
                    "reading for unprovisioned socket dropped"
                );
                metrics::counter!("consumption_unknown_socket_total").increment(1);
            }
            e => {
                tracing::error!(
                    tenant = %r.tenant,
                    load_class = %r.load_class,
                    socket_id = %r.socket_id,
                    error = %e,
                    "accumulate failed, giving up on reading"
                );
                metrics::counter!("consumption_sink_errors_total").increment(1);
            }
        }
    }
}

#[async_trait::async_trait]
impl Sink<PowerReading> for AccumulatorSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<PowerReading>, PipelineError>> + Send + Unpin + 'static,
    {
        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    tracing::error!(error = %e, "error in upstream pipeline for AccumulatorSink");
                    continue;
                }
            };

            if let Err(e) = self.apply(&env).await {
                Self::record_failure(&env, &e);
            }
        }

        Ok(())
    }
}

fn shard_index(env: &Envelope<PowerReading>, workers: usize) -> usize {
    use std::hash::{Hash, Hasher};

    let mut h = std::collections::hash_map::DefaultHasher::new();
    env.payload.tenant.hash(&mut h);
    env.payload.socket_id.hash(&mut h);
    (h.finish() as usize) % workers.max(1)
}

/// Fans readings out to `workers` accumulator tasks.
///
/// Readings for the same (tenant, socket) always land on the same worker, so
/// they are applied in arrival order.
pub struct ShardedAccumulatorSink {
    inner: AccumulatorSink,
    workers: usize,
    channel_capacity: usize,
}

impl ShardedAccumulatorSink {
    pub fn new(inner: AccumulatorSink, workers: usize, channel_capacity: usize) -> Self {
        Self {
            inner,
            workers: workers.max(1),
            channel_capacity: channel_capacity.max(1),
        }
    }
}

#[async_trait::async_trait]
impl Sink<PowerReading> for ShardedAccumulatorSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<PowerReading>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut txs = Vec::with_capacity(self.workers);
        let mut joins = Vec::with_capacity(self.workers);

        for _ in 0..self.workers {
            let (tx, rx) = tokio::sync::mpsc::channel::<Envelope<PowerReading>>(self.channel_capacity);
            txs.push(tx);

            let sink = self.inner.clone();
            let stream = tokio_stream::wrappers::ReceiverStream::new(rx).map(Ok);

            joins.push(tokio::spawn(async move { sink.run(stream).await }));
        }

        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    tracing::error!(error = %e, "error in upstream pipeline for ShardedAccumulatorSink");
                    continue;
                }
            };

            let idx = shard_index(&env, self.workers);
            if txs[idx].send(env).await.is_err() {
                return Err(PipelineError::Sink("accumulator worker channel closed".to_string()));
            }
        }

        drop(txs);

        for j in joins {
            match j.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(PipelineError::Sink(format!("accumulator worker join error: {e}"))),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consumption_client::{
        db::{MemoryTenantResolver, MemoryTenantStore},
        domain::{CounterColumn, LoadClass, PeriodTotal},
        TenantId, TenantStore,
    };
    use time::macros::datetime;

    fn tenant(name: &str) -> TenantId {
        TenantId::parse(name).expect("valid tenant")
    }

    fn env(tenant_name: &str, socket_id: &str, power_watts: f64) -> Result<Envelope<PowerReading>, PipelineError> {
        Ok(Envelope::new(
            PowerReading {
                tenant: tenant(tenant_name),
                load_class: LoadClass::Medium,
                socket_id: socket_id.to_string(),
                power_watts,
                duration_seconds: 3600.0,
            },
            datetime!(2024-03-15 09:30:00 UTC),
        ))
    }

    async fn eu_daily(store: &MemoryTenantStore, socket_id: &str) -> i64 {
        store
            .counter_row(LoadClass::Medium, socket_id)
            .await
            .expect("store online")
            .expect("provisioned row")
            .get(CounterColumn::Total(PeriodTotal::EuDaily))
    }

    fn resolver_with(name: &str, store: Arc<MemoryTenantStore>) -> Arc<MemoryTenantResolver> {
        let resolver = MemoryTenantResolver::new();
        resolver.insert(tenant(name), store);
        Arc::new(resolver)
    }

    #[tokio::test]
    async fn applies_readings_and_skips_bad_items() {
        let store = Arc::new(MemoryTenantStore::with_sockets(["S1"]));
        let sink = AccumulatorSink::new(resolver_with("acme", store.clone()), 0, Duration::from_millis(1));

        let items = vec![
            env("acme", "S1", 2.0),
            Err(PipelineError::Transform("rejected".to_string())),
            env("acme", "ghost", 5.0),
            env("globex", "S1", 7.0),
            env("acme", "S1", 3.0),
        ];
        sink.run(futures::stream::iter(items)).await.expect("sink drains input");

        // 2 W and 3 W for an hour each.
        assert_eq!(eu_daily(&store, "S1").await, 5_000);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_exhausted() {
        let store = Arc::new(MemoryTenantStore::with_sockets(["S1"]));
        store.set_offline(true);
        let sink = AccumulatorSink::new(resolver_with("acme", store.clone()), 2, Duration::from_millis(1));

        let res = sink.apply(&env("acme", "S1", 1.0).expect("ok")).await;
        assert!(matches!(res, Err(Error::ConnectionFailure(_))));

        store.set_offline(false);
        sink.apply(&env("acme", "S1", 1.0).expect("ok")).await.expect("store back online accepts reading");
        assert_eq!(eu_daily(&store, "S1").await, 1_000);
    }

    #[tokio::test]
    async fn reading_survives_a_short_outage() {
        let store = Arc::new(MemoryTenantStore::with_sockets(["S1"]));
        store.set_offline(true);
        let sink = AccumulatorSink::new(resolver_with("acme", store.clone()), 20, Duration::from_millis(5));

        let reconnect = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                store.set_offline(false);
            })
        };

        sink.apply(&env("acme", "S1", 1.0).expect("ok")).await.expect("retried past the outage");
        reconnect.await.expect("reconnect task");
        assert_eq!(eu_daily(&store, "S1").await, 1_000);
    }

    #[tokio::test]
    async fn rejected_statements_are_not_retried() {
        let store = Arc::new(MemoryTenantStore::with_sockets(["S1"]));
        store.fail_table(LoadClass::Medium);
        // A single backoff step would outlast the timeout below.
        let sink = AccumulatorSink::new(resolver_with("acme", store.clone()), 3, Duration::from_secs(60));

        let res = tokio::time::timeout(Duration::from_secs(5), sink.apply(&env("acme", "S1", 1.0).expect("ok")))
            .await
            .expect("storage errors fail fast");
        assert!(matches!(res, Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn sharded_sink_applies_every_reading_once() {
        let store = Arc::new(MemoryTenantStore::with_sockets(["S1", "S2", "S3"]));
        let sink = ShardedAccumulatorSink::new(
            AccumulatorSink::new(resolver_with("acme", store.clone()), 0, Duration::from_millis(1)),
            3,
            8,
        );

        let items: Vec<_> = (0..90)
            .map(|i| env("acme", ["S1", "S2", "S3"][i % 3], 1.0))
            .collect();
        sink.run(futures::stream::iter(items)).await.expect("sink drains input");

        for socket in ["S1", "S2", "S3"] {
            assert_eq!(eu_daily(&store, socket).await, 30 * 1_000, "{socket}");
        }
    }

    #[test]
    fn shard_is_stable_per_socket() {
        let a = env("acme", "S1", 1.0).expect("ok");
        let b = env("acme", "S1", 9.0).expect("ok");
        assert_eq!(shard_index(&a, 7), shard_index(&b, 7));
        assert_eq!(shard_index(&a, 0), 0);
    }
}
