// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::backend::{BackendError, CacheBackend};
use crate::utils::context::{ContextError, RequestContext};

/// 默认最大尝试次数
pub const DEFAULT_LOCK_TRIES: u32 = 32;
const RETRY_DELAY_MIN_MS: u64 = 50;
const RETRY_DELAY_MAX_MS: u64 = 250;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock `{key}` not acquired after {attempts} attempts")]
    Exhausted { key: String, attempts: u32 },

    #[error("lock `{0}` is not held by this mutex")]
    NotHeld(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Cancelled(#[from] ContextError),
}

/// 分布式互斥锁
///
/// 加锁写入随机令牌并设置过期时间；解锁时只有令牌一致才删除，
/// 不会误删其他持有者的锁。锁是建议性的，过期后自动失效。
pub struct DistributedMutex {
    backend: Arc<dyn CacheBackend>,
    key: String,
    token: String,
    expiry: Duration,
    tries: u32,
}

impl DistributedMutex {
    pub fn new(backend: Arc<dyn CacheBackend>, key: impl Into<String>, expiry: Duration) -> Self {
        Self {
            backend,
            key: key.into(),
            token: Uuid::new_v4().simple().to_string(),
            expiry,
            tries: DEFAULT_LOCK_TRIES,
        }
    }

    pub fn with_tries(mut self, tries: u32) -> Self {
        self.tries = tries.max(1);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// 尝试一次加锁
    pub async fn try_lock(&self) -> Result<bool, BackendError> {
        self.backend.set_nx(&self.key, &self.token, self.expiry).await
    }

    /// 加锁，失败后按随机间隔重试
    ///
    /// 上下文取消或截止时间到达时立即返回 [`LockError::Cancelled`]。
    pub async fn lock(&self, ctx: &RequestContext) -> Result<(), LockError> {
        let mut last_err = None;
        for attempt in 1..=self.tries {
            match ctx.run(self.try_lock()).await? {
                Ok(true) => {
                    debug!("Lock {} acquired on attempt {}", self.key, attempt);
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => last_err = Some(e),
            }

            if attempt < self.tries {
                let delay = rand::rng().random_range(RETRY_DELAY_MIN_MS..RETRY_DELAY_MAX_MS);
                ctx.run(tokio::time::sleep(Duration::from_millis(delay)))
                    .await?;
            }
        }

        match last_err {
            Some(e) => Err(LockError::Backend(e)),
            None => Err(LockError::Exhausted {
                key: self.key.clone(),
                attempts: self.tries,
            }),
        }
    }

    /// 解锁；不受请求上下文取消影响
    pub async fn unlock(&self) -> Result<(), LockError> {
        if self.backend.compare_and_delete(&self.key, &self.token).await? {
            Ok(())
        } else {
            Err(LockError::NotHeld(self.key.clone()))
        }
    }
}
