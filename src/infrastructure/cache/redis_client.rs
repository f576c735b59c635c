// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::info;

use super::backend::{BackendError, CacheBackend};

const SCAN_BATCH: usize = 100;

const COMPARE_AND_DELETE: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        return redis.call("DEL", KEYS[1])
    else
        return 0
    end
"#;

/// Redis客户端
///
/// 连接时建立一条多路复用连接，之后每次操作克隆使用。
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
    connection: MultiplexedConnection,
}

impl RedisClient {
    /// 连接并 PING 一次，失败直接返回错误
    pub async fn connect(redis_url: &str) -> Result<Self, BackendError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        let redis_client = Self { client, connection };
        redis_client.ping().await?;
        info!("Connected to redis");
        Ok(redis_client)
    }

    /// 获取一条连接
    pub fn get_connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    pub fn client(&self) -> &redis::Client {
        &self.client
    }
}

#[async_trait]
impl CacheBackend for RedisClient {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let mut con = self.get_connection();
        redis::cmd("PING").query_async::<String>(&mut con).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let mut con = self.get_connection();
        let value: Option<String> = con.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BackendError> {
        let mut con = self.get_connection();
        if ttl.is_zero() {
            con.set::<_, _, ()>(key, value).await?;
        } else {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl.as_millis() as u64)
                .query_async::<()>(&mut con)
                .await?;
        }
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, BackendError> {
        let mut con = self.get_connection();
        let value: i64 = con.incr(key, delta).await?;
        Ok(value)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, BackendError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut con = self.get_connection();
        let deleted: u64 = con.del(keys.to_vec()).await?;
        Ok(deleted)
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, BackendError> {
        let mut con = self.get_connection();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut con)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BackendError> {
        let mut con = self.get_connection();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut con)
            .await?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, value: &str) -> Result<bool, BackendError> {
        let mut con = self.get_connection();
        let deleted: i64 = redis::Script::new(COMPARE_AND_DELETE)
            .key(key)
            .arg(value)
            .invoke_async(&mut con)
            .await?;
        Ok(deleted == 1)
    }
}
