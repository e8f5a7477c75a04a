//! Create a tenant's counter tables and provision socket rows.
//!
//! Usage: `provision_sockets <tenant> <load_class|all> <socket_id>...`

use anyhow::{bail, Context, Result};
use consumption_client::{db::PgTenantResolver, domain::LoadClass, TenantId, TenantResolver};
use consumption_service::{config::AppConfig, observability};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let mut args = std::env::args().skip(1);
    let (Some(tenant), Some(class)) = (args.next(), args.next()) else {
        bail!("usage: provision_sockets <tenant> <load_class|all> <socket_id>...");
    };
    let sockets: Vec<String> = args.collect();
    if sockets.is_empty() {
        bail!("at least one socket id is required");
    }

    let tenant = TenantId::parse(&tenant)?;
    let classes: Vec<LoadClass> = if class.eq_ignore_ascii_case("all") {
        LoadClass::ALL.to_vec()
    } else {
        vec![class.parse()?]
    };

    let cfg = AppConfig::load()?;
    let resolver = PgTenantResolver::new(&cfg.database.base_uri, cfg.database.max_connections_per_tenant)?;
    let store = resolver
        .resolve(&tenant)
        .await
        .with_context(|| format!("connecting to tenant '{tenant}'"))?;

    store.ensure_counter_tables().await?;

    let mut created = 0usize;
    for load_class in &classes {
        for socket_id in &sockets {
            if store.provision_socket(*load_class, socket_id).await? {
                created += 1;
            } else {
                tracing::debug!(%tenant, %load_class, %socket_id, "socket already provisioned");
            }
        }
    }

    tracing::info!(
        %tenant,
        created,
        requested = classes.len() * sockets.len(),
        "socket provisioning complete"
    );
    Ok(())
}
