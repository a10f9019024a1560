use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use elkwatch_common::config::AppConfig;
use elkwatch_common::secrets::SecretCipher;
use elkwatch_storage::Store;
use elkwatch_worker::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("elkwatch=info".parse()?))
        .init();

    // 配置校验失败直接退出
    let config = AppConfig::from_env()?;

    tracing::info!(
        db_path = %config.database.path,
        es_url = %config.es.url,
        worker_enabled = config.worker.enabled,
        max_concurrency = config.worker.max_concurrency,
        "elkwatch-server starting"
    );

    let cipher = SecretCipher::new(config.security.encryption_key.clone())?;
    let store = Arc::new(
        Store::connect(
            Path::new(&config.database.path),
            cipher,
            Duration::from_secs(config.database.query_timeout_secs),
        )
        .await?,
    );

    let scheduler = if config.worker.enabled {
        let scheduler = Scheduler::new(store.clone(), &config);
        scheduler.start();
        // scheduler.handle() 是注入给 API 层的触发入口
        Some(scheduler)
    } else {
        tracing::info!("Worker disabled, rule evaluation will not run");
        None
    };

    signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully");

    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }

    tracing::info!("Server stopped");
    Ok(())
}
