use anyhow::Context;

use accountstore::{AppConfig, UserStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "accountstore=debug".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env().context("load configuration")?;
    let mut store = UserStore::from_config(&config, config.mode).context("build user store")?;

    store.initialize().await.context("initialize user store")?;
    let users = store.count().await.context("count users")?;
    tracing::info!(
        path = %store.path().display(),
        mode = ?config.mode,
        users,
        "user store ready"
    );

    store.close().await.context("close user store")?;
    Ok(())
}
