//! 数据库连接与元数据管理服务
//!
//! 提供：
//! - 按数据库 ID 管理的连接（重试、过期回收、出错失效）
//! - 表结构内省与表选择
//! - 元数据持久化

use std::time::Duration;

use anyhow::Context;
use common::config::{AppConfig, DefaultDatabaseConfig};
use connection_service::state::AppState;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "connection-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置（含 .env）
    let config = AppConfig::load_with_service(SERVICE_NAME);

    // 初始化日志追踪
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // 创建应用状态
    let state = AppState::new(config.clone())
        .await
        .context("Failed to initialize application state (check DATABASE_URL)")?;
    let manager = state.manager.clone();

    if config.bootstrap_default_database {
        let defaults = DefaultDatabaseConfig::from_env()?;
        let database = manager.ensure_default_database(defaults).await?;
        info!(db_id = %database.db_id, name = %database.name, "Default database ready");
    }

    // 定期回收过期连接
    let sweeper = {
        let manager = manager.clone();
        let period = Duration::from_secs(config.eviction_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.evict_stale_connections().await;
            }
        })
    };

    info!(
        service = %config.service_name,
        work_dir = %config.work_dir.display(),
        engines = ?manager.available_engines().keys().collect::<Vec<_>>(),
        "服务已启动"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("收到退出信号，正在关闭");
    sweeper.abort();
    manager.shutdown().await;
    Ok(())
}
