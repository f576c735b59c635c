// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, Response};
use axum::Router;
use docvault::domain::services::entity_service::EntityService;
use docvault::infrastructure::cache::memory_backend::MemoryCacheBackend;
use docvault::infrastructure::cache::Cache;
use docvault::config::settings::RegionSettings;
use docvault::infrastructure::database::connection::ConnectionRegistry;
use docvault::infrastructure::database::memory_store::MemoryDocumentStore;
use docvault::infrastructure::database::region::RegionRouter;
use docvault::infrastructure::database::store::DocumentStore;
use docvault::infrastructure::database::repository::RepositoryConfig;
use docvault::infrastructure::repositories::entity_repo_impl::EntityRepositoryImpl;
use docvault::presentation::routes;
use serde_json::Value;

pub const TEST_KEY: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

pub fn repository_config() -> RepositoryConfig {
    RepositoryConfig {
        environment: "TEST".to_string(),
        encrypt_key: TEST_KEY.to_string(),
        measure_latency: true,
    }
}

/// TEST 环境下 `entities` 映射到 VN 和 SEA 两个区域
pub fn test_router() -> RegionRouter {
    let mut collections = HashMap::new();
    collections.insert(
        "TEST".to_string(),
        HashMap::from([(
            "entities".to_string(),
            vec!["VN::core_test".to_string(), "SEA::core_test".to_string()],
        )]),
    );
    RegionRouter::with_overrides(&RegionSettings {
        collections,
        countries: HashMap::new(),
    })
}

/// 两个区域的内存存储
pub fn sharded_registry() -> (Arc<MemoryDocumentStore>, Arc<MemoryDocumentStore>, ConnectionRegistry) {
    let vn = Arc::new(MemoryDocumentStore::new("VN::core_test"));
    let sea = Arc::new(MemoryDocumentStore::new("SEA::core_test"));
    let mut stores: HashMap<String, Arc<dyn DocumentStore>> = HashMap::new();
    stores.insert("VN::core_test".to_string(), vn.clone());
    stores.insert("SEA::core_test".to_string(), sea.clone());
    (vn, sea, ConnectionRegistry::multi(stores, test_router()))
}

/// 多区域内存存储 + 内存缓存组装出的应用，返回 VN 区域的存储
pub fn test_app() -> (Arc<MemoryDocumentStore>, Router) {
    let (store, _sea, registry) = sharded_registry();
    let repo = EntityRepositoryImpl::new(&registry, repository_config(), None).unwrap();
    let cache = Cache::new(Arc::new(MemoryCacheBackend::new()));
    let service = Arc::new(EntityService::new(Arc::new(repo), cache));
    (store, routes::app(service))
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn get(uri: &str, country: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri).method("GET");
    if let Some(country) = country {
        builder = builder.header("X-Client-Region", country);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn send_json(method: &str, uri: &str, country: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(uri)
        .method(method)
        .header("Content-Type", "application/json");
    if let Some(country) = country {
        builder = builder.header("X-Client-Region", country);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}
