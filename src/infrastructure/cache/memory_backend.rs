// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use regex::Regex;
use tracing::debug;

use super::backend::{BackendError, CacheBackend};

/// 缓存条目
#[derive(Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: &str, ttl: Duration) -> Self {
        Self {
            value: value.to_string(),
            expires_at: (!ttl.is_zero()).then(|| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// 进程内缓存后端
///
/// 过期条目在访问时惰性清除。适用于测试和单实例部署。
#[derive(Clone, Default)]
pub struct MemoryCacheBackend {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前未过期的键数量
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// glob 转正则：`*` 任意长度，`?` 单个字符，其余字符按字面匹配
fn glob_to_regex(pattern: &str) -> Result<Regex, BackendError> {
    let mut expr = String::with_capacity(pattern.len() + 2);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|_| BackendError::Pattern(pattern.to_string()))
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if entry.is_expired() {
            drop(entry);
            self.entries.remove_if(key, |_, e| e.is_expired());
            return Ok(None);
        }
        Ok(Some(entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BackendError> {
        self.entries
            .insert(key.to_string(), CacheEntry::new(value, ttl));
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, BackendError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(CacheEntry::new(&delta.to_string(), Duration::ZERO));
                    return Ok(delta);
                }
                let current: i64 = occupied
                    .get()
                    .value
                    .parse()
                    .map_err(|_| BackendError::NotInteger(key.to_string()))?;
                let next = current
                    .checked_add(delta)
                    .ok_or_else(|| BackendError::Overflow(key.to_string()))?;
                occupied.get_mut().value = next.to_string();
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::new(&delta.to_string(), Duration::ZERO));
                Ok(delta)
            }
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, BackendError> {
        let mut deleted = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(key) {
                if !entry.is_expired() {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, BackendError> {
        let matcher = glob_to_regex(pattern)?;
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.is_expired() && matcher.is_match(e.key()))
            .map(|e| e.key().clone())
            .collect();
        debug!("Memory cache scan `{}` matched {} keys", pattern, keys.len());
        Ok(keys)
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BackendError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(CacheEntry::new(value, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::new(value, ttl));
                Ok(true)
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, value: &str) -> Result<bool, BackendError> {
        Ok(self
            .entries
            .remove_if(key, |_, e| !e.is_expired() && e.value == value)
            .is_some())
    }
}
