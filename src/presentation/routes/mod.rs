// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::domain::services::entity_service::EntityService;
use crate::presentation::handlers::entity_handler;

/// 创建应用路由
///
/// # 返回值
///
/// 返回配置好的路由
pub fn routes() -> Router {
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/v1/version", get(version));

    let entity_routes = Router::new()
        .route(
            "/v1/entities",
            get(entity_handler::find_entities).post(entity_handler::create_entity),
        )
        .route("/v1/entities/{id}", get(entity_handler::get_entity))
        .route(
            "/v1/entities/{id}/status",
            put(entity_handler::update_entity_status),
        );

    Router::new().merge(public_routes).merge(entity_routes)
}

/// 组装完整应用：路由、服务注入和请求追踪
pub fn app(entity_service: Arc<EntityService>) -> Router {
    routes()
        .layer(Extension(entity_service))
        .layer(TraceLayer::new_for_http())
}

/// 健康检查端点
///
/// # 返回值
///
/// 返回"OK"字符串
pub async fn health_check() -> &'static str {
    "OK"
}

/// 版本信息端点
pub async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
