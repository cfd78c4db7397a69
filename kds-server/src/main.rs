use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use kds_server::commands::CommandContext;
use kds_server::db::tickets::PgStatusStore;
use kds_server::{ChangeRelay, Config, PushServer, RoomRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kds_server=info".into()),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env();
    tracing::info!(environment = %config.environment, "Starting kitchen ticket sync server");

    let pool = kds_server::db::connect(&config.database_url).await?;

    let shutdown = CancellationToken::new();

    let (registry_handle, registry) = RoomRegistry::new(config.channel_capacity);
    tokio::spawn(registry.run());

    let relay = Arc::new(ChangeRelay::new(
        &config.database_url,
        registry_handle.clone(),
        config.relay_reconnect_delay,
        config.relay_initial_retry_delay,
    ));
    tokio::spawn({
        let relay = relay.clone();
        let shutdown = shutdown.clone();
        async move { relay.run(shutdown).await }
    });

    let ctx = CommandContext {
        registry: registry_handle,
        store: Arc::new(PgStatusStore::new(pool)),
    };
    let server = PushServer::new(ctx, config.outbound_capacity, shutdown.clone());
    let listener = PushServer::bind(&config.bus_listen_addr).await?;

    let serve = tokio::spawn({
        let server = server.clone();
        async move { server.serve(listener).await }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
    serve.await?;

    Ok(())
}
