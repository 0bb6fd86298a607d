use std::time::Duration;

use neor_provision::{
    ConfigOrchestrator, CredentialProvisioner, ExpirySweeper, RemoteConfigStore, ServiceConfig,
    SshChannel,
    pg::{self, PgConfigCache, PgSubscriptionLedger},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServiceConfig::from_env()?;
    let servers = config.load_servers()?;
    // Single designated server; the rest of the file is ignored for now.
    let server = servers.into_iter().next().expect("validated non-empty");
    tracing::info!(server = %server.name, host = %server.host, "managing proxy server");

    let pool = sqlx::PgPool::connect(&config.database_url).await?;
    pg::ensure_schema(&pool).await?;

    let channel = SshChannel::new(Duration::from_secs(config.channel_timeout_secs));
    let provisioner = CredentialProvisioner::new(RemoteConfigStore::new(channel));
    let ledger = PgSubscriptionLedger::new(pool.clone());
    let orchestrator = ConfigOrchestrator::new(
        provisioner,
        ledger.clone(),
        PgConfigCache::new(pool),
        server,
        &config.email_domain,
    );

    ExpirySweeper::new(
        orchestrator,
        ledger,
        Duration::from_secs(config.sweep_interval_secs),
    )
    .run()
    .await;

    Ok(())
}
