// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::models::entity::{Contact, Entity, EntityStatus};
use crate::domain::repositories::entity_repository::EntityRepository;
use crate::infrastructure::cache::{Cache, CacheError};
use crate::infrastructure::database::repository::RepositoryError;
use crate::utils::context::RequestContext;

/// 实体服务错误
#[derive(Error, Debug)]
pub enum EntityServiceError {
    #[error("invalid entity id: {0}")]
    InvalidId(String),

    #[error("entity {0} not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// 实体服务
///
/// 读取走读穿缓存；缓存未配置时直接访问仓库。写入后使缓存失效。
pub struct EntityService {
    repository: Arc<dyn EntityRepository>,
    cache: Cache,
    cache_ttl: Duration,
}

impl EntityService {
    pub fn new(repository: Arc<dyn EntityRepository>, cache: Cache) -> Self {
        Self {
            repository,
            cache,
            cache_ttl: Duration::ZERO,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// 缓存键包含国家，同一ID在不同区域互不干扰
    fn cache_key(ctx: &RequestContext, id: &str) -> String {
        format!("entity:{}:{}", ctx.country().unwrap_or("-"), id)
    }

    fn validate_id(id: &str) -> Result<(), EntityServiceError> {
        Uuid::try_parse(id)
            .map(|_| ())
            .map_err(|_| EntityServiceError::InvalidId(id.to_string()))
    }

    pub async fn create(&self, ctx: &RequestContext, contact: Contact) -> Result<Entity, EntityServiceError> {
        if contact.phone_number.trim().is_empty() {
            return Err(EntityServiceError::Validation(
                "phone_number must not be empty".to_string(),
            ));
        }
        let entity = self.repository.create(ctx, &Entity::new(contact)).await?;
        debug!(request_id = ctx.trace_label(), "Entity created: {:?}", entity.id);
        Ok(entity)
    }

    pub async fn get(&self, ctx: &RequestContext, id: &str) -> Result<Entity, EntityServiceError> {
        Self::validate_id(id)?;

        let key = Self::cache_key(ctx, id);
        let repository = self.repository.clone();
        let loaded = self
            .cache
            .get_or_load::<Entity, Entity, _, _>(
                ctx,
                &key,
                self.cache_ttl,
                || async move { Ok::<_, anyhow::Error>(repository.get(ctx, id).await?) },
                true,
            )
            .await;

        let found = match loaded {
            Ok(found) => found,
            Err(CacheError::ClientNil) => self.repository.get(ctx, id).await?,
            Err(CacheError::Origin(err)) => {
                return Err(match err.downcast::<RepositoryError>() {
                    Ok(repo_err) => EntityServiceError::Repository(repo_err),
                    Err(other) => EntityServiceError::Cache(CacheError::Origin(other)),
                })
            }
            Err(err) => return Err(err.into()),
        };

        found.ok_or_else(|| EntityServiceError::NotFound(id.to_string()))
    }

    pub async fn update_status(
        &self,
        ctx: &RequestContext,
        id: &str,
        status: EntityStatus,
    ) -> Result<Entity, EntityServiceError> {
        Self::validate_id(id)?;
        let updated = self
            .repository
            .update_status(ctx, id, status)
            .await?
            .ok_or_else(|| EntityServiceError::NotFound(id.to_string()))?;

        if self.cache.is_enabled() {
            if let Err(e) = self.cache.delete(ctx, &Self::cache_key(ctx, id)).await {
                warn!(request_id = ctx.trace_label(), "Invalidate entity cache failed: {}", e);
            }
        }
        Ok(updated)
    }

    pub async fn find_by_phone(
        &self,
        ctx: &RequestContext,
        phone_number: &str,
    ) -> Result<Vec<Entity>, EntityServiceError> {
        Ok(self.repository.find_by_phone(ctx, phone_number).await?)
    }
}

#[cfg(test)]
#[path = "entity_service_test.rs"]
mod tests;
