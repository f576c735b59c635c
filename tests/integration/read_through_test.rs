// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docvault::config::settings::RedisSettings;
use docvault::domain::models::entity::{Contact, Entity, EntityStatus};
use docvault::domain::repositories::entity_repository::EntityRepository;
use docvault::domain::services::entity_service::EntityService;
use docvault::infrastructure::cache::{Cache, CacheError};
use docvault::infrastructure::database::repository::RepositoryError;
use docvault::infrastructure::repositories::entity_repo_impl::EntityRepositoryImpl;
use docvault::utils::context::RequestContext;

use super::helpers::{repository_config, sharded_registry};

/// 统计读取次数的仓库包装
struct CountingRepository {
    inner: EntityRepositoryImpl,
    gets: AtomicUsize,
}

#[async_trait]
impl EntityRepository for CountingRepository {
    async fn create(&self, ctx: &RequestContext, entity: &Entity) -> Result<Entity, RepositoryError> {
        self.inner.create(ctx, entity).await
    }

    async fn get(&self, ctx: &RequestContext, id: &str) -> Result<Option<Entity>, RepositoryError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.inner.get(ctx, id).await
    }

    async fn update_status(
        &self,
        ctx: &RequestContext,
        id: &str,
        status: EntityStatus,
    ) -> Result<Option<Entity>, RepositoryError> {
        self.inner.update_status(ctx, id, status).await
    }

    async fn find_by_phone(
        &self,
        ctx: &RequestContext,
        phone_number: &str,
    ) -> Result<Vec<Entity>, RepositoryError> {
        self.inner.find_by_phone(ctx, phone_number).await
    }
}

fn memory_settings(url: Option<&str>) -> RedisSettings {
    RedisSettings {
        url: url.map(str::to_string),
        default_ttl_secs: 30,
        lock_ttl_secs: 5,
    }
}

#[tokio::test]
async fn concurrent_reads_hit_the_store_once() {
    let (_vn, _sea, registry) = sharded_registry();
    let repo = Arc::new(CountingRepository {
        inner: EntityRepositoryImpl::new(&registry, repository_config(), None).unwrap(),
        gets: AtomicUsize::new(0),
    });
    let cache = Cache::connect(&memory_settings(Some("memory://"))).await;
    assert!(cache.is_enabled());
    let service = Arc::new(EntityService::new(repo.clone(), cache));

    let ctx = RequestContext::new().with_country("VN");
    let id = service
        .create(
            &ctx,
            Contact {
                phone_number: "0901234567".to_string(),
                email: None,
            },
        )
        .await
        .unwrap()
        .id
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let service = service.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            let ctx = RequestContext::new().with_country("VN");
            service.get(&ctx, &id).await
        }));
    }
    for handle in handles {
        let entity = handle.await.unwrap().unwrap();
        assert_eq!(entity.id.as_deref(), Some(id.as_str()));
    }
    assert_eq!(repo.gets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cache_without_url_is_disabled() {
    let cache = Cache::connect(&memory_settings(None)).await;
    assert!(!cache.is_enabled());

    let ctx = RequestContext::new();
    assert!(matches!(
        cache.set_string(&ctx, "k", "v", Duration::ZERO).await,
        Err(CacheError::ClientNil)
    ));
}

#[tokio::test]
async fn counters_and_pattern_delete() {
    let cache = Cache::connect(&memory_settings(Some("memory://"))).await;
    let ctx = RequestContext::new();

    cache.increment(&ctx, "counter:a").await.unwrap();
    cache.increment(&ctx, "counter:a").await.unwrap();
    // decrement on a non-negative value adds one
    cache.decrement(&ctx, "counter:a").await.unwrap();
    assert_eq!(cache.get_string(&ctx, "counter:a").await.unwrap().as_deref(), Some("3"));

    cache.increment(&ctx, "counter:b").await.unwrap();
    cache
        .set_string(&ctx, "other", "x", Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(cache.delete_with_pattern(&ctx, "counter:*").await.unwrap(), 2);
    assert_eq!(cache.get_string(&ctx, "counter:a").await.unwrap(), None);
    assert_eq!(cache.get_string(&ctx, "other").await.unwrap().as_deref(), Some("x"));
}
