// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::HashMap;

use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

/// 应用程序配置设置
///
/// 包含应用、服务器、数据库、Redis、索引审计和指标等配置项
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// 应用配置
    pub app: AppSettings,
    /// 服务器配置
    pub server: ServerSettings,
    /// 数据库配置
    pub database: DatabaseSettings,
    /// Redis配置
    pub redis: RedisSettings,
    /// 索引审计配置
    pub index_audit: IndexAuditSettings,
    /// 指标配置
    pub metrics: MetricsSettings,
    /// 区域映射覆盖
    #[serde(default)]
    pub region: RegionSettings,
}

/// 应用配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    /// 部署环境（DEFAULT、TEST ...），决定使用哪张区域映射表
    pub environment: String,
    /// 字段加密密钥（十六进制），为空时不加密
    #[serde(default)]
    pub encrypt_key: String,
}

/// 服务器配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// 服务器监听主机地址
    pub host: String,
    /// 服务器监听端口
    pub port: u16,
}

/// 数据库配置设置
///
/// `url` 与 `multi_conn` 二选一：前者为单连接模式，后者为 base64 编码的
/// `{REGION: {db: url}}` JSON，用于多区域模式。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseSettings {
    /// 数据库连接URL（`memory://name`、`postgres://...`、`sqlite:...`）
    pub url: Option<String>,
    /// 单连接模式下的数据库名称
    pub name: Option<String>,
    /// 多区域连接配置
    pub multi_conn: Option<String>,
    /// 最大连接数
    pub max_connections: Option<u32>,
    /// 最小连接数
    pub min_connections: Option<u32>,
    /// 连接超时时间（秒）
    pub connect_timeout: Option<u64>,
    /// 空闲连接超时时间（秒）
    pub idle_timeout: Option<u64>,
    /// 是否记录每次操作的耗时
    #[serde(default)]
    pub should_measure_latency: bool,
    /// 是否输出 SQL 日志
    #[serde(default)]
    pub enable_debug_logger: bool,
}

/// Redis配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Redis连接URL，`memory://` 使用进程内缓存，未设置时禁用缓存
    pub url: Option<String>,
    /// 默认缓存时间（秒）
    pub default_ttl_secs: u64,
    /// 分布式锁过期时间（秒）
    pub lock_ttl_secs: u64,
}

/// 索引审计配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct IndexAuditSettings {
    pub enabled: bool,
    /// 工作协程数量
    pub workers: usize,
    /// 队列容量，队列满时丢弃审计
    pub queue_capacity: usize,
}

/// 指标配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    pub enabled: bool,
    /// Prometheus 监听地址
    pub listen_addr: String,
}

/// 区域映射覆盖，与内置映射表合并
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegionSettings {
    /// 环境 -> 集合 -> 连接名称列表（`REGION::db`）
    #[serde(default)]
    pub collections: HashMap<String, HashMap<String, Vec<String>>>,
    /// 国家代码 -> 区域
    #[serde(default)]
    pub countries: HashMap<String, String>,
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 依次加载默认值、`config/default`、`config/{APP_ENVIRONMENT}` 和
    /// `DOCVAULT__` 前缀的环境变量
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(ConfigError)` - 配置加载失败
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        Self::builder()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(Environment::with_prefix("DOCVAULT").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// 只包含默认值的构建器
    pub fn builder() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("app.environment", "DEFAULT")?
            .set_default("app.encrypt_key", "")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            // Default DB pool settings
            .set_default("database.max_connections", 100)?
            .set_default("database.min_connections", 1)?
            .set_default("database.connect_timeout", 30)?
            .set_default("database.idle_timeout", 300)?
            .set_default("database.should_measure_latency", false)?
            .set_default("database.enable_debug_logger", false)?
            .set_default("redis.default_ttl_secs", 60)?
            .set_default("redis.lock_ttl_secs", 10)?
            .set_default("index_audit.enabled", true)?
            .set_default("index_audit.workers", 2)?
            .set_default("index_audit.queue_capacity", 1024)?
            .set_default("metrics.enabled", true)?
            .set_default("metrics.listen_addr", "0.0.0.0:9000")
    }
}
