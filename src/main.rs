// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;

use docvault::config::settings::Settings;
use docvault::domain::services::entity_service::EntityService;
use docvault::infrastructure::cache::Cache;
use docvault::infrastructure::database::connection::ConnectionRegistry;
use docvault::infrastructure::database::index_audit::IndexAuditor;
use docvault::infrastructure::database::region::RegionRouter;
use docvault::infrastructure::database::repository::RepositoryConfig;
use docvault::infrastructure::metrics;
use docvault::infrastructure::repositories::entity_repo_impl::EntityRepositoryImpl;
use docvault::presentation::routes;
use docvault::utils::telemetry;
use tokio::net::TcpListener;
use tracing::info;

/// 主函数
///
/// 应用程序入口点，负责初始化所有组件并启动服务
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    telemetry::init_telemetry();
    info!("Starting docvault...");

    // 2. Load configuration
    let settings = Arc::new(Settings::new()?);
    info!(environment = %settings.app.environment, "Configuration loaded");

    metrics::init_metrics(&settings.metrics);

    // 3. Connect to document stores, any failure is fatal
    let router = RegionRouter::with_overrides(&settings.region);
    let registry = ConnectionRegistry::connect(&settings.database, router).await?;
    registry.ping().await?;

    // 4. Cache, disabled when redis is unreachable
    let cache = Cache::connect(&settings.redis).await;
    info!(enabled = cache.is_enabled(), "Cache initialized");

    let auditor = settings
        .index_audit
        .enabled
        .then(|| IndexAuditor::start(&settings.index_audit));

    // 5. Repositories and services
    let entity_repo = EntityRepositoryImpl::new(
        &registry,
        RepositoryConfig::from_settings(&settings),
        auditor,
    )?;
    let entity_service = Arc::new(
        EntityService::new(Arc::new(entity_repo), cache)
            .with_cache_ttl(Duration::from_secs(settings.redis.default_ttl_secs)),
    );

    // 6. Start HTTP server
    let app = routes::app(entity_service);
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
