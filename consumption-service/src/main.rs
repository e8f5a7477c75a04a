use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use consumption_client::{db::PgTenantResolver, domain::PowerReading, SystemClock};
use consumption_service::{
    api,
    config::AppConfig,
    metrics_server, observability,
    pipeline::Pipeline,
    sinks::{AccumulatorSink, ShardedAccumulatorSink},
    sources::ChannelSource,
    state::AppState,
    transform,
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let resolver = Arc::new(PgTenantResolver::new(
        &cfg.database.base_uri,
        cfg.database.max_connections_per_tenant,
    )?);
    let clock = Arc::new(
        SystemClock::from_offset_minutes(cfg.clock.utc_offset_minutes)
            .context("invalid clock.utc_offset_minutes")?,
    );

    // Batch ingest pipeline
    let (ingest_tx, source) = ChannelSource::new(cfg.pipeline.channel_capacity);
    let sink = ShardedAccumulatorSink::new(
        AccumulatorSink::new(
            resolver.clone(),
            cfg.pipeline.max_retries,
            Duration::from_millis(cfg.pipeline.retry_backoff_ms),
        ),
        cfg.pipeline.workers,
        cfg.pipeline.channel_capacity,
    );
    let pipeline: Pipeline<_, PowerReading, _> = Pipeline {
        source,
        transforms: vec![Arc::new(transform::ReadingValidation::new(cfg.validation.clone()))],
        sink,
    };

    let state = AppState::new(resolver, clock, ingest_tx, cfg.validation.clone());

    let _sweep = state.sweeper.clone().spawn(
        cfg.reset.tenants.clone(),
        Duration::from_secs(cfg.reset.sweep_interval_secs.max(1)),
    );
    tracing::info!(
        tenants = cfg.reset.tenants.len(),
        every_secs = cfg.reset.sweep_interval_secs,
        "reset sweep started"
    );

    tokio::try_join!(
        async { pipeline.run().await.map_err(anyhow::Error::from) },
        api::serve(&cfg.http.bind_addr, state),
    )?;

    Ok(())
}
