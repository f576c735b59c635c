// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use super::backend::{BackendError, CacheBackend};
use super::lock::{DistributedMutex, LockError};
use super::memory_backend::MemoryCacheBackend;
use super::redis_client::RedisClient;
use crate::config::settings::RedisSettings;
use crate::infrastructure::metrics::CACHE_ORIGIN_LOADS;
use crate::utils::context::{ContextError, RequestContext};

const MEMORY_SCHEME: &str = "memory://";
const LOCK_SUFFIX: &str = ":lock";
const DEFAULT_TTL: Duration = Duration::from_secs(60);
const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache client is nil")]
    ClientNil,

    #[error("cache key `{0}` not found")]
    KeyNotFound(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("origin load failed: {0}")]
    Origin(#[source] anyhow::Error),

    #[error(transparent)]
    Cancelled(#[from] ContextError),
}

/// 读穿缓存
///
/// 未配置后端时所有操作返回 [`CacheError::ClientNil`]。
#[derive(Clone)]
pub struct Cache {
    backend: Option<Arc<dyn CacheBackend>>,
    default_ttl: Duration,
    lock_ttl: Duration,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend: Some(backend),
            default_ttl: DEFAULT_TTL,
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }

    pub fn disabled() -> Self {
        Self {
            backend: None,
            default_ttl: DEFAULT_TTL,
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }

    pub fn with_ttls(mut self, default_ttl: Duration, lock_ttl: Duration) -> Self {
        if !default_ttl.is_zero() {
            self.default_ttl = default_ttl;
        }
        if !lock_ttl.is_zero() {
            self.lock_ttl = lock_ttl;
        }
        self
    }

    /// 按配置建立缓存
    ///
    /// 未设置 url 时禁用；`memory://` 使用进程内后端；Redis 连接失败时记录错误并禁用缓存。
    pub async fn connect(settings: &RedisSettings) -> Self {
        let ttls = (
            Duration::from_secs(settings.default_ttl_secs),
            Duration::from_secs(settings.lock_ttl_secs),
        );
        let Some(url) = settings.url.as_deref().filter(|u| !u.is_empty()) else {
            info!("Cache disabled: redis.url not set");
            return Self::disabled();
        };

        if url.starts_with(MEMORY_SCHEME) {
            info!("Using in-process cache backend");
            return Self::new(Arc::new(MemoryCacheBackend::new())).with_ttls(ttls.0, ttls.1);
        }

        match RedisClient::connect(url).await {
            Ok(client) => Self::new(Arc::new(client)).with_ttls(ttls.0, ttls.1),
            Err(e) => {
                error!("ping redis failed: {}", e);
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    fn backend(&self) -> Result<&Arc<dyn CacheBackend>, CacheError> {
        self.backend.as_ref().ok_or(CacheError::ClientNil)
    }

    fn ttl_or_default(&self, ttl: Duration) -> Duration {
        if ttl.is_zero() {
            self.default_ttl
        } else {
            ttl
        }
    }

    /// 读取 JSON 值；键不存在返回 [`CacheError::KeyNotFound`]
    pub async fn get_data<T: DeserializeOwned>(&self, ctx: &RequestContext, key: &str) -> Result<T, CacheError> {
        let backend = self.backend()?;
        let raw = ctx
            .run(backend.get(key))
            .await??
            .ok_or_else(|| CacheError::KeyNotFound(key.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// 写入 JSON 值，`ttl` 为 0 时使用默认过期时间
    pub async fn set_data<T: Serialize + ?Sized>(
        &self,
        ctx: &RequestContext,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let backend = self.backend()?;
        let raw = serde_json::to_string(value)?;
        ctx.run(backend.set(key, &raw, self.ttl_or_default(ttl)))
            .await??;
        Ok(())
    }

    pub async fn get_string(&self, ctx: &RequestContext, key: &str) -> Result<Option<String>, CacheError> {
        let backend = self.backend()?;
        Ok(ctx.run(backend.get(key)).await??)
    }

    pub async fn set_string(
        &self,
        ctx: &RequestContext,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let backend = self.backend()?;
        ctx.run(backend.set(key, value, self.ttl_or_default(ttl)))
            .await??;
        Ok(())
    }

    /// 读取结构体，键不存在返回 `None`
    pub async fn get_struct<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        match self.get_string(ctx, key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_struct<T: Serialize + ?Sized>(
        &self,
        ctx: &RequestContext,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.set_data(ctx, key, value, ttl).await
    }

    pub async fn increment(&self, ctx: &RequestContext, key: &str) -> Result<(), CacheError> {
        let backend = self.backend()?;
        ctx.run(backend.incr_by(key, 1)).await??;
        Ok(())
    }

    /// 当前值可解析且不小于 0 时执行的是加一，否则什么都不做
    pub async fn decrement(&self, ctx: &RequestContext, key: &str) -> Result<(), CacheError> {
        let backend = self.backend()?;
        let current = ctx.run(backend.get(key)).await??;
        match current.and_then(|raw| raw.parse::<i64>().ok()) {
            Some(value) if value >= 0 => {
                ctx.run(backend.incr_by(key, 1)).await??;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub async fn delete(&self, ctx: &RequestContext, key: &str) -> Result<(), CacheError> {
        let backend = self.backend()?;
        ctx.run(backend.delete(&[key.to_string()])).await??;
        Ok(())
    }

    /// 删除匹配模式的全部键，返回删除数量
    pub async fn delete_with_pattern(&self, ctx: &RequestContext, pattern: &str) -> Result<u64, CacheError> {
        let backend = self.backend()?;
        let keys = ctx.run(backend.scan_match(pattern)).await??;
        let mut deleted = 0;
        for key in keys {
            deleted += ctx.run(backend.delete(&[key])).await??;
        }
        Ok(deleted)
    }

    /// 新建分布式互斥锁，`expiry` 为 0 时使用默认锁过期时间
    pub fn new_mutex(&self, key: &str, expiry: Duration) -> Result<DistributedMutex, CacheError> {
        let backend = self.backend()?;
        let expiry = if expiry.is_zero() { self.lock_ttl } else { expiry };
        Ok(DistributedMutex::new(backend.clone(), key, expiry))
    }

    /// 简单锁：SET NX 加过期时间
    pub async fn acquire_lock(
        &self,
        ctx: &RequestContext,
        lock_key: &str,
        lock_timeout: Duration,
    ) -> Result<bool, CacheError> {
        let backend = self.backend()?;
        Ok(ctx.run(backend.set_nx(lock_key, "1", lock_timeout)).await??)
    }

    pub async fn release_lock(&self, ctx: &RequestContext, lock_key: &str) -> Result<(), CacheError> {
        self.delete(ctx, lock_key).await
    }

    /// 读穿缓存
    ///
    /// 命中直接返回；未命中时可选地持有 `key:lock` 锁，加锁后再读一次，
    /// 仍未命中则回源。回源结果为 `Some` 时写回缓存（失败只记录日志），
    /// 为 `None` 时不写入。加锁失败退化为无锁回源。
    pub async fn get_or_load<T, V, F, Fut>(
        &self,
        ctx: &RequestContext,
        key: &str,
        ttl: Duration,
        origin: F,
        use_lock: bool,
    ) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned,
        V: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<V>>>,
    {
        let backend = self.backend()?;

        if let Some(hit) = self.read_cached::<T>(ctx, backend.as_ref(), key).await? {
            return Ok(Some(hit));
        }

        let mutex = if use_lock {
            let lock_key = format!("{}{}", key, LOCK_SUFFIX);
            let mutex = DistributedMutex::new(backend.clone(), lock_key.as_str(), self.lock_ttl);
            match mutex.lock(ctx).await {
                Ok(()) => Some(mutex),
                Err(LockError::Cancelled(e)) => return Err(CacheError::Cancelled(e)),
                Err(e) => {
                    warn!(request_id = ctx.trace_label(), "redis mutex lock key={} error: {}", lock_key, e);
                    None
                }
            }
        } else {
            None
        };

        let result = self
            .load_locked(ctx, backend.as_ref(), key, ttl, origin, mutex.is_some())
            .await;

        if let Some(mutex) = mutex {
            if let Err(e) = mutex.unlock().await {
                warn!(
                    request_id = ctx.trace_label(),
                    "redis mutex unlock key={} error: {}",
                    mutex.key(),
                    e
                );
            }
        }
        result
    }

    /// 读取缓存；后端错误和解码错误视为未命中
    async fn read_cached<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        backend: &dyn CacheBackend,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        match ctx.run(backend.get(key)).await? {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    warn!(request_id = ctx.trace_label(), key, "cache unmarshal error: {}", e);
                    Ok(None)
                }
            },
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(request_id = ctx.trace_label(), key, "cache read error: {}", e);
                Ok(None)
            }
        }
    }

    async fn load_locked<T, V, F, Fut>(
        &self,
        ctx: &RequestContext,
        backend: &dyn CacheBackend,
        key: &str,
        ttl: Duration,
        origin: F,
        locked: bool,
    ) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned,
        V: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<V>>>,
    {
        if locked {
            if let Some(hit) = self.read_cached::<T>(ctx, backend, key).await? {
                return Ok(Some(hit));
            }
        }

        counter!(CACHE_ORIGIN_LOADS).increment(1);
        let loaded = ctx.run(origin()).await?.map_err(CacheError::Origin)?;
        let Some(value) = loaded else {
            return Ok(None);
        };

        let raw = serde_json::to_string(&value)?;
        match ctx.run(backend.set(key, &raw, self.ttl_or_default(ttl))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(request_id = ctx.trace_label(), key, "cache set error: {}", e),
            Err(e) => warn!(request_id = ctx.trace_label(), key, "cache set skipped: {}", e),
        }

        Ok(Some(serde_json::from_str(&raw)?))
    }
}
