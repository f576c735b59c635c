// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;
use tracing::{error, info, warn};

use super::memory_store::MemoryDocumentStore;
use super::region::{conn_name, split_conn_name, RegionRouter};
use super::sql_store::SqlDocumentStore;
use super::store::{DocumentStore, StoreError, TransactionOptions};
use crate::config::settings::DatabaseSettings;
use crate::utils::context::RequestContext;

const MEMORY_SCHEME: &str = "memory://";
const DEFAULT_STORE_NAME: &str = "default";

/// 启动期配置错误，调用方应视为致命错误
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("database connection not configured: set database.url or database.multi_conn")]
    MissingConnectionConfig,

    #[error("invalid multi connection config: {0}")]
    InvalidMultiConnConfig(String),

    #[error("connect `{name}` failed: {source}")]
    Connect {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("no connection mapped for collection `{0}`")]
    MissingMapping(String),

    #[error("connection name `{0}` is invalid, expected REGION::db")]
    MalformedConnName(String),

    #[error("connection `{0}` not found in registry")]
    MissingConnection(String),
}

/// 事务执行错误
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("transaction needs a single connection registry")]
    SingleModeRequired,

    #[error("multi connection session needs a multi connection registry")]
    MultiModeRequired,

    #[error("multi connection session needs at least one database name")]
    EmptyDbNames,

    #[error("connection name `{0}` is invalid, expected REGION::db")]
    MalformedConnName(String),

    #[error("request context has no client region")]
    MissingRegion,

    #[error("no connection for region of country `{0}`")]
    RegionNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("transaction aborted: {0}")]
    Callback(#[source] anyhow::Error),
}

/// 已打开的连接
#[derive(Clone)]
pub enum Connections {
    /// 单连接模式
    Single(Arc<dyn DocumentStore>),
    /// 多区域模式，键为 `REGION::db`
    Multi(HashMap<String, Arc<dyn DocumentStore>>),
}

/// 连接注册表
///
/// 启动时构造一次，之后只读；同时持有区域路由。
#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: Connections,
    router: Arc<RegionRouter>,
}

/// 按 URL 打开存储：`memory://` 为进程内存储，其他交给 SeaORM
pub async fn open_store(
    name: &str,
    url: &str,
    settings: &DatabaseSettings,
) -> Result<Arc<dyn DocumentStore>, StoreError> {
    if url.starts_with(MEMORY_SCHEME) {
        return Ok(Arc::new(MemoryDocumentStore::new(name)));
    }
    let store = SqlDocumentStore::connect(name, url, settings).await?;
    Ok(Arc::new(store))
}

fn decode_multi_conn(encoded: &str) -> Result<BTreeMap<String, BTreeMap<String, String>>, ConfigurationError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ConfigurationError::InvalidMultiConnConfig(format!("base64: {}", e)))?;
    let config: BTreeMap<String, BTreeMap<String, String>> = serde_json::from_slice(&bytes)
        .map_err(|e| ConfigurationError::InvalidMultiConnConfig(format!("json: {}", e)))?;
    if config.values().all(BTreeMap::is_empty) {
        return Err(ConfigurationError::InvalidMultiConnConfig(
            "no connections listed".to_string(),
        ));
    }
    Ok(config)
}

impl ConnectionRegistry {
    pub fn new(connections: Connections, router: RegionRouter) -> Self {
        Self {
            connections,
            router: Arc::new(router),
        }
    }

    pub fn single(store: Arc<dyn DocumentStore>) -> Self {
        Self::new(Connections::Single(store), RegionRouter::default())
    }

    pub fn multi(stores: HashMap<String, Arc<dyn DocumentStore>>, router: RegionRouter) -> Self {
        Self::new(Connections::Multi(stores), router)
    }

    /// 根据配置建立全部连接
    ///
    /// `database.url` 优先；否则解析 `database.multi_conn`。任何一个连接失败都返回错误。
    pub async fn connect(
        settings: &DatabaseSettings,
        router: RegionRouter,
    ) -> Result<Self, ConfigurationError> {
        if let Some(url) = settings.url.as_deref().filter(|u| !u.is_empty()) {
            let name = settings.name.as_deref().unwrap_or(DEFAULT_STORE_NAME);
            let store = open_store(name, url, settings).await.map_err(|source| {
                error!("Connect database failed: name={}", name);
                ConfigurationError::Connect {
                    name: name.to_string(),
                    source,
                }
            })?;
            info!("Database connection established: name={}", name);
            return Ok(Self::new(Connections::Single(store), router));
        }

        let encoded = settings
            .multi_conn
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(ConfigurationError::MissingConnectionConfig)?;

        let mut stores = HashMap::new();
        for (region, dbs) in decode_multi_conn(encoded)? {
            for (db, url) in dbs {
                let name = conn_name(&region, &db);
                let store = open_store(&name, &url, settings).await.map_err(|source| {
                    error!("Connect database failed: region={}, db_name={}", region, db);
                    ConfigurationError::Connect {
                        name: name.clone(),
                        source,
                    }
                })?;
                info!("Database connection established: name={}", name);
                stores.insert(name, store);
            }
        }

        Ok(Self::new(Connections::Multi(stores), router))
    }

    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    pub fn router(&self) -> &RegionRouter {
        &self.router
    }

    pub fn shared_router(&self) -> Arc<RegionRouter> {
        self.router.clone()
    }

    pub fn single_store(&self) -> Option<&Arc<dyn DocumentStore>> {
        match &self.connections {
            Connections::Single(store) => Some(store),
            Connections::Multi(_) => None,
        }
    }

    /// 多区域模式下按 `REGION::db` 取连接
    pub fn store(&self, name: &str) -> Option<&Arc<dyn DocumentStore>> {
        match &self.connections {
            Connections::Single(_) => None,
            Connections::Multi(stores) => stores.get(name),
        }
    }

    pub fn conn_names(&self) -> Vec<String> {
        match &self.connections {
            Connections::Single(store) => vec![store.store_name().to_string()],
            Connections::Multi(stores) => {
                let mut names: Vec<String> = stores.keys().cloned().collect();
                names.sort();
                names
            }
        }
    }

    /// 检查全部连接
    pub async fn ping(&self) -> Result<(), StoreError> {
        match &self.connections {
            Connections::Single(store) => store.ping().await,
            Connections::Multi(stores) => {
                for store in stores.values() {
                    store.ping().await?;
                }
                Ok(())
            }
        }
    }

    /// 在单连接上执行事务，写入多数确认
    pub async fn exec_transaction<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        callback: F,
    ) -> Result<T, TransactionError>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let store = self
            .single_store()
            .ok_or(TransactionError::SingleModeRequired)?;
        run_transaction(store.as_ref(), TransactionOptions::majority(), ctx, callback).await
    }

    /// 在单连接上执行快照读事务
    pub async fn exec_trans_snapshot<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        callback: F,
    ) -> Result<T, TransactionError>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let store = self
            .single_store()
            .ok_or(TransactionError::SingleModeRequired)?;
        run_transaction(store.as_ref(), TransactionOptions::snapshot(), ctx, callback).await
    }

    /// 为指定数据库名称准备多区域会话
    ///
    /// 每个区域取 `db_names` 中第一个存在的数据库连接。
    pub fn session_multi_conn(&self, db_names: &[&str]) -> Result<MultiConnSession, TransactionError> {
        if db_names.is_empty() {
            return Err(TransactionError::EmptyDbNames);
        }
        let Connections::Multi(stores) = &self.connections else {
            return Err(TransactionError::MultiModeRequired);
        };

        let mut names: Vec<&String> = stores.keys().collect();
        names.sort();
        let mut parsed = Vec::with_capacity(names.len());
        for name in names {
            let (region, db) = split_conn_name(name)
                .ok_or_else(|| TransactionError::MalformedConnName(name.clone()))?;
            parsed.push((region, db, &stores[name]));
        }

        let mut by_region: HashMap<String, Arc<dyn DocumentStore>> = HashMap::new();
        for db_name in db_names {
            for (region, db, store) in &parsed {
                if db == db_name && !by_region.contains_key(*region) {
                    by_region.insert(region.to_string(), Arc::clone(*store));
                }
            }
        }

        Ok(MultiConnSession {
            stores: by_region,
            router: self.router.clone(),
        })
    }
}

/// 多区域事务会话，按请求上下文中的国家选择区域连接
pub struct MultiConnSession {
    stores: HashMap<String, Arc<dyn DocumentStore>>,
    router: Arc<RegionRouter>,
}

impl MultiConnSession {
    pub fn regions(&self) -> Vec<&str> {
        let mut regions: Vec<&str> = self.stores.keys().map(String::as_str).collect();
        regions.sort();
        regions
    }

    pub async fn exec_transaction<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        callback: F,
    ) -> Result<T, TransactionError>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let country = ctx.country().ok_or(TransactionError::MissingRegion)?;
        let store = self
            .router
            .country_to_region(country)
            .and_then(|region| self.stores.get(region))
            .ok_or_else(|| TransactionError::RegionNotFound(country.to_string()))?;

        run_transaction(store.as_ref(), TransactionOptions::majority(), ctx, callback).await
    }
}

/// 开启会话，执行回调，成功提交、失败回滚
async fn run_transaction<T, F, Fut>(
    store: &dyn DocumentStore,
    options: TransactionOptions,
    ctx: &RequestContext,
    callback: F,
) -> Result<T, TransactionError>
where
    F: FnOnce(RequestContext) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let session = ctx
        .run(store.start_session(options))
        .await
        .map_err(StoreError::from)??;

    let tx_ctx = ctx.clone().with_session(session.clone());
    match callback(tx_ctx).await {
        Ok(value) => {
            session.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(abort_err) = session.abort().await {
                warn!(
                    "Abort transaction on {} failed: {}",
                    store.store_name(),
                    abort_err
                );
            }
            Err(TransactionError::Callback(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(json: &str) -> String {
        STANDARD.encode(json)
    }

    #[tokio::test]
    async fn test_connect_single_memory_store() {
        let settings = DatabaseSettings {
            url: Some("memory://main".to_string()),
            name: Some("main".to_string()),
            ..DatabaseSettings::default()
        };
        let registry = ConnectionRegistry::connect(&settings, RegionRouter::default())
            .await
            .unwrap();
        assert_eq!(registry.conn_names(), vec!["main"]);
        assert!(registry.single_store().is_some());
        assert!(registry.store("VN::main").is_none());
    }

    #[tokio::test]
    async fn test_connect_multi_memory_stores() {
        let settings = DatabaseSettings {
            multi_conn: Some(encode(
                r#"{"VN":{"vgr":"memory://vn"},"SEA":{"vgr":"memory://sea","loyalty":"memory://l"}}"#,
            )),
            ..DatabaseSettings::default()
        };
        let registry = ConnectionRegistry::connect(&settings, RegionRouter::default())
            .await
            .unwrap();
        assert_eq!(
            registry.conn_names(),
            vec!["SEA::loyalty", "SEA::vgr", "VN::vgr"]
        );
        assert!(registry.single_store().is_none());
        assert_eq!(registry.store("VN::vgr").unwrap().store_name(), "VN::vgr");
    }

    #[tokio::test]
    async fn test_missing_or_broken_config_is_an_error() {
        let err = ConnectionRegistry::connect(&DatabaseSettings::default(), RegionRouter::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConfigurationError::MissingConnectionConfig));

        let settings = DatabaseSettings {
            multi_conn: Some("%%%".to_string()),
            ..DatabaseSettings::default()
        };
        let err = ConnectionRegistry::connect(&settings, RegionRouter::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConfigurationError::InvalidMultiConnConfig(_)));
    }

    #[tokio::test]
    async fn test_unreachable_database_fails_fast() {
        let settings = DatabaseSettings {
            url: Some("sqlite:///nonexistent-dir/for/sure/db.sqlite".to_string()),
            connect_timeout: Some(1),
            ..DatabaseSettings::default()
        };
        let err = ConnectionRegistry::connect(&settings, RegionRouter::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConfigurationError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_session_multi_conn_guards() {
        let single = ConnectionRegistry::single(Arc::new(MemoryDocumentStore::new("x")));
        assert!(matches!(
            single.session_multi_conn(&["vgr"]),
            Err(TransactionError::MultiModeRequired)
        ));
        assert!(matches!(
            single.session_multi_conn(&[]),
            Err(TransactionError::EmptyDbNames)
        ));

        let mut stores: HashMap<String, Arc<dyn DocumentStore>> = HashMap::new();
        stores.insert("VN::vgr".into(), Arc::new(MemoryDocumentStore::new("VN::vgr")));
        stores.insert("SEA::vgr".into(), Arc::new(MemoryDocumentStore::new("SEA::vgr")));
        stores.insert("SEA::other".into(), Arc::new(MemoryDocumentStore::new("SEA::other")));
        let multi = ConnectionRegistry::multi(stores, RegionRouter::default());

        let session = multi.session_multi_conn(&["vgr"]).unwrap();
        assert_eq!(session.regions(), vec!["SEA", "VN"]);

        let ctx = RequestContext::new();
        let err = session
            .exec_transaction(&ctx, |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, TransactionError::MissingRegion));

        let ctx = RequestContext::new().with_country("US");
        let err = session
            .exec_transaction(&ctx, |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, TransactionError::RegionNotFound(_)));

        let ctx = RequestContext::new().with_country("TH");
        let store_name = session
            .exec_transaction(&ctx, |tx| async move {
                Ok(tx.session().map(|s| s.store_name().to_string()))
            })
            .await
            .unwrap();
        assert_eq!(store_name.as_deref(), Some("SEA::vgr"));
    }

    #[tokio::test]
    async fn test_session_multi_conn_rejects_malformed_names() {
        let mut stores: HashMap<String, Arc<dyn DocumentStore>> = HashMap::new();
        stores.insert("VN::vgr".into(), Arc::new(MemoryDocumentStore::new("VN::vgr")));
        stores.insert("legacy".into(), Arc::new(MemoryDocumentStore::new("legacy")));
        let multi = ConnectionRegistry::multi(stores, RegionRouter::default());

        assert!(matches!(
            multi.session_multi_conn(&["vgr"]),
            Err(TransactionError::MalformedConnName(name)) if name == "legacy"
        ));
    }

    #[tokio::test]
    async fn test_transaction_requires_single_mode() {
        let multi = ConnectionRegistry::multi(HashMap::new(), RegionRouter::default());
        let err = multi
            .exec_transaction(&RequestContext::new(), |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, TransactionError::SingleModeRequired));
    }
}
