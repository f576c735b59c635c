// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// 缓存后端错误
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("value at `{0}` is not an integer")]
    NotInteger(String),

    #[error("increment or decrement at `{0}` would overflow")]
    Overflow(String),

    #[error("invalid key pattern `{0}`")]
    Pattern(String),
}

/// 缓存后端
///
/// 键值均为字符串；序列化由上层的 [`super::Cache`] 完成。
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// 后端名称，用于日志
    fn name(&self) -> &'static str;

    async fn ping(&self) -> Result<(), BackendError>;

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BackendError>;

    /// 键不存在时按 0 处理；保留原有过期时间
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, BackendError>;

    /// 返回实际删除的键数
    async fn delete(&self, keys: &[String]) -> Result<u64, BackendError>;

    /// 按 glob 模式列出键（`*`、`?`）
    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, BackendError>;

    /// 仅在键不存在时写入，返回是否写入成功
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BackendError>;

    /// 值等于 `value` 时删除，返回是否删除
    async fn compare_and_delete(&self, key: &str, value: &str) -> Result<bool, BackendError>;
}
