use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use chm_core::{
    commands::{AdapterSettings, CommandAdapter},
    config::Config,
    directory::HttpDirectoryClient,
    registry::RegistryEngine,
    store::SqliteStore,
};

#[tokio::main]
async fn main() -> Result<(), chm_core::Error> {
    let cfg = Arc::new(Config::load()?);
    chm_core::logging::init("chm", cfg.debug)?;

    tracing::info!(
        database = %cfg.database_path.display(),
        directory = %cfg.directory_url,
        bot = %cfg.identity.display_name,
        "starting channel manager"
    );

    let store = Arc::new(SqliteStore::open(&cfg.database_path)?);
    let directory = Arc::new(HttpDirectoryClient::new(
        cfg.directory_url.clone(),
        cfg.directory_api_key.clone(),
        cfg.directory_timeout,
    )?);
    let engine = Arc::new(RegistryEngine::new(
        store,
        directory,
        cfg.identity.clone(),
    ));

    // Cancels in-flight refreshes on Ctrl-C while the dispatcher drains.
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }

    let commands = Arc::new(CommandAdapter::new(
        engine,
        cfg.identity.clone(),
        AdapterSettings {
            welcome_message: cfg.welcome_message.clone(),
            refresh_timeout: cfg.refresh_timeout,
        },
        shutdown.clone(),
    ));

    chm_telegram::router::run_polling(cfg, commands)
        .await
        .map_err(|e| chm_core::Error::External(format!("telegram bot failed: {e}")))?;

    shutdown.cancel();
    Ok(())
}
