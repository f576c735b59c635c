// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use super::batch::{run_blocking_batch, BatchError};
use super::connection::{ConfigurationError, Connections, ConnectionRegistry};
use super::filter::{FilterError, FilterInput, FilterState};
use super::query;
use super::region::{split_conn_name, RegionRouter};
use super::store::{
    DeleteResult, Document, DocumentStore, FindOneAndUpdateOptions, IndexModel, ReturnDocument,
    StoreError, StoreSession, UpdateOptions, UpdateResult,
};
use crate::config::settings::Settings;
use crate::infrastructure::crypto::cipher;
use crate::infrastructure::crypto::field_codec::{
    decrypt_value, encrypt_filter, encrypt_update, encrypt_value, tag_map_for,
};
use crate::infrastructure::crypto::{CodecError, FieldTag, TagMap};
use crate::infrastructure::metrics::observe_store_query;
use crate::utils::context::{ContextError, RequestContext};

use super::index_audit::IndexAuditor;

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

/// 可持久化的模型
///
/// 集合名称、需要创建的索引和敏感字段都在这里显式声明。
pub trait Model: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: &'static str;

    fn index_models() -> Vec<IndexModel> {
        Vec::new()
    }

    fn encrypted_fields() -> Vec<FieldTag> {
        Vec::new()
    }
}

/// 仓库错误，全部可恢复，原样返回给调用方
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("request context has no client region")]
    MissingRegion,

    #[error("no connection for country `{0}`")]
    RegionNotFound(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid query: {0}")]
    Filter(#[from] FilterError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<ContextError> for RepositoryError {
    fn from(err: ContextError) -> Self {
        RepositoryError::Store(StoreError::from(err))
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

impl From<BatchError<RepositoryError>> for RepositoryError {
    fn from(err: BatchError<RepositoryError>) -> Self {
        match err {
            BatchError::Task(err) => err,
            BatchError::Join(msg) => RepositoryError::Serialization(msg),
        }
    }
}

/// 仓库运行参数
#[derive(Debug, Clone, Default)]
pub struct RepositoryConfig {
    /// 区域映射使用的环境
    pub environment: String,
    /// 字段加密密钥，空字符串表示不加密
    pub encrypt_key: String,
    pub measure_latency: bool,
}

impl RepositoryConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            environment: settings.app.environment.clone(),
            encrypt_key: settings.app.encrypt_key.clone(),
            measure_latency: settings.database.should_measure_latency,
        }
    }
}

#[derive(Clone)]
enum Backend {
    Single(Arc<dyn DocumentStore>),
    /// 区域 -> 连接
    Sharded {
        stores: HashMap<String, Arc<dyn DocumentStore>>,
        router: Arc<RegionRouter>,
    },
}

/// 泛型仓库
///
/// 构造时确定后端：单连接模式直接使用注册表中的连接；多区域模式按集合解析
/// 出 `REGION::db` 列表并逐个从注册表取连接，任何一个缺失都是配置错误。
#[derive(Clone)]
pub struct Repository<T: Model> {
    backend: Backend,
    config: RepositoryConfig,
    tags: Arc<TagMap>,
    auditor: Option<IndexAuditor>,
    _model: PhantomData<fn() -> T>,
}

impl<T: Model> Repository<T> {
    pub fn new(
        registry: &ConnectionRegistry,
        config: RepositoryConfig,
        auditor: Option<IndexAuditor>,
    ) -> Result<Self, ConfigurationError> {
        let backend = match registry.connections() {
            Connections::Single(store) => Backend::Single(store.clone()),
            Connections::Multi(_) => {
                let names = registry.router().resolve(T::COLLECTION, &config.environment);
                if names.is_empty() {
                    return Err(ConfigurationError::MissingMapping(T::COLLECTION.to_string()));
                }

                let mut stores = HashMap::new();
                for name in names {
                    let (region, _) = split_conn_name(&name)
                        .ok_or_else(|| ConfigurationError::MalformedConnName(name.clone()))?;
                    let store = registry
                        .store(&name)
                        .ok_or_else(|| ConfigurationError::MissingConnection(name.clone()))?;
                    // 同一区域出现多个数据库时以最后一个为准
                    stores.insert(region.to_string(), store.clone());
                }
                Backend::Sharded {
                    stores,
                    router: registry.shared_router(),
                }
            }
        };

        let repo = Self {
            backend,
            config,
            tags: tag_map_for::<T>(T::encrypted_fields),
            auditor,
            _model: PhantomData,
        };
        repo.spawn_index_creation();
        Ok(repo)
    }

    pub fn collection_name(&self) -> &'static str {
        T::COLLECTION
    }

    pub fn query(&self) -> Query<'_, T> {
        Query {
            repo: self,
            state: FilterState::new(),
            return_document: ReturnDocument::default(),
            upsert: false,
        }
    }

    pub async fn find_by_id(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<Option<T>, RepositoryError> {
        self.query()
            .filter(("_id", Value::String(id.to_string())))
            .find_one(ctx)
            .await
    }

    fn stores(&self) -> Vec<Arc<dyn DocumentStore>> {
        match &self.backend {
            Backend::Single(store) => vec![store.clone()],
            Backend::Sharded { stores, .. } => stores.values().cloned().collect(),
        }
    }

    /// 在全部连接上创建模型声明的索引
    pub async fn ensure_indexes(&self) -> Result<(), RepositoryError> {
        let indexes = T::index_models();
        if indexes.is_empty() {
            return Ok(());
        }
        for store in self.stores() {
            store.create_indexes(T::COLLECTION, &indexes).await?;
        }
        Ok(())
    }

    fn spawn_index_creation(&self) {
        let indexes = T::index_models();
        if indexes.is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(collection = T::COLLECTION, "No runtime available, index creation skipped");
            return;
        };

        let stores = self.stores();
        handle.spawn(async move {
            for store in stores {
                match store.create_indexes(T::COLLECTION, &indexes).await {
                    Ok(names) => info!(
                        collection = T::COLLECTION,
                        store = store.store_name(),
                        "Indexes ensured: {}",
                        names.join(",")
                    ),
                    Err(e) => error!(
                        collection = T::COLLECTION,
                        store = store.store_name(),
                        "Create indexes failed: {}",
                        e
                    ),
                }
            }
        });
    }

    /// 按请求上下文选择连接
    fn store_for(&self, ctx: &RequestContext) -> Result<Arc<dyn DocumentStore>, RepositoryError> {
        match &self.backend {
            Backend::Single(store) => Ok(store.clone()),
            Backend::Sharded { stores, router } => {
                let country = ctx.country().ok_or(RepositoryError::MissingRegion)?;
                router
                    .country_to_region(country)
                    .and_then(|region| stores.get(region))
                    .cloned()
                    .ok_or_else(|| RepositoryError::RegionNotFound(country.to_string()))
            }
        }
    }

    /// 检查构造器状态、选择连接、加密过滤条件并提交索引审计
    fn prepare(
        &self,
        ctx: &RequestContext,
        state: &mut FilterState,
    ) -> Result<(Arc<dyn DocumentStore>, Document), RepositoryError> {
        state.check()?;
        let store = self.store_for(ctx)?;
        encrypt_filter(state.entries_mut(), &self.config.encrypt_key, &self.tags)?;

        if let Some(auditor) = &self.auditor {
            auditor.submit(store.clone(), T::COLLECTION, state.keys());
        }
        Ok((store, state.to_document()))
    }

    fn encode(&self, model: &T, now: &str) -> Result<Document, RepositoryError> {
        let mut value = serde_json::to_value(model)?;
        let Value::Object(map) = &mut value else {
            return Err(RepositoryError::Serialization(format!(
                "{} does not serialize to an object",
                T::COLLECTION
            )));
        };
        map.insert(CREATED_AT.to_string(), Value::String(now.to_string()));
        map.insert(UPDATED_AT.to_string(), Value::String(now.to_string()));

        match encrypt_value(&value, &self.config.encrypt_key, &self.tags)? {
            Value::Object(mut doc) => {
                query::ensure_id(&mut doc);
                Ok(doc)
            }
            _ => Err(RepositoryError::Serialization(
                "encrypted document is not an object".to_string(),
            )),
        }
    }

    fn decode(&self, doc: Document) -> Result<T, RepositoryError> {
        decode_document(doc, &self.config.encrypt_key, &self.tags)
    }

    async fn decode_many(&self, docs: Vec<Document>) -> Result<Vec<T>, RepositoryError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let key = self.config.encrypt_key.clone();
        let tags = self.tags.clone();
        let models = run_blocking_batch(docs, move |doc| decode_document::<T>(doc, &key, &tags)).await?;
        Ok(models)
    }

    /// 记录存储调用本身的耗时
    async fn timed<R, F>(&self, op: &'static str, fut: F) -> Result<R, StoreError>
    where
        F: Future<Output = Result<R, StoreError>>,
    {
        if !self.config.measure_latency {
            return fut.await;
        }
        let start = Instant::now();
        let result = fut.await;
        info!(
            collection = T::COLLECTION,
            op,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "store call latency"
        );
        result
    }

    /// 在上下文约束下执行一次仓库调用，按需记录耗时与指标
    async fn instrument<R, F>(
        &self,
        ctx: &RequestContext,
        op: &'static str,
        metric_method: Option<String>,
        fut: F,
    ) -> Result<R, RepositoryError>
    where
        F: Future<Output = Result<R, RepositoryError>>,
    {
        let start = Instant::now();
        let guarded = async {
            match ctx.run(fut).await {
                Ok(result) => result,
                Err(e) => Err(RepositoryError::from(e)),
            }
        };

        let result = match metric_method {
            Some(method) => observe_store_query(T::COLLECTION, &method, guarded).await,
            None => guarded.await,
        };

        if self.config.measure_latency {
            info!(
                collection = T::COLLECTION,
                op,
                request_id = ctx.trace_label(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "repository call latency"
            );
        }
        if let Err(e) = &result {
            warn!(
                collection = T::COLLECTION,
                op,
                request_id = ctx.trace_label(),
                "repository call failed: {}",
                e
            );
        }
        result
    }
}

fn decode_document<T: Model>(doc: Document, key: &str, tags: &TagMap) -> Result<T, RepositoryError> {
    let plain = decrypt_value(&Value::Object(doc), key, tags)?;
    Ok(serde_json::from_value(plain)?)
}

/// 上下文中的会话必须属于目标连接，否则拒绝执行
fn session_for<'a>(
    ctx: &'a RequestContext,
    store: &dyn DocumentStore,
) -> Result<Option<&'a dyn StoreSession>, RepositoryError> {
    match ctx.session() {
        None => Ok(None),
        Some(session) if session.store_id() == store.store_id() => Ok(Some(session.as_ref())),
        Some(session) => Err(RepositoryError::Store(StoreError::Session(format!(
            "transaction opened on `{}` cannot run on `{}`",
            session.store_name(),
            store.store_name()
        )))),
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// 单次调用的查询
///
/// 通过 [`Repository::query`] 获得，链式追加条件后由执行方法消费。
/// 追加过程中的第一个错误会被保留，执行时直接返回。
pub struct Query<'r, T: Model> {
    repo: &'r Repository<T>,
    state: FilterState,
    return_document: ReturnDocument,
    upsert: bool,
}

impl<'r, T: Model> Query<'r, T> {
    pub fn filter(mut self, input: impl Into<FilterInput>) -> Self {
        self.state.append(input);
        self
    }

    pub fn sort(mut self, field: &str, direction: i32) -> Self {
        self.state.append_sort(field, direction);
        self
    }

    pub fn sort_one(mut self, field: &str, direction: i32) -> Self {
        self.state.append_sort_one(field, direction);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.state.set_limit(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.state.set_skip(skip);
        self
    }

    pub fn skip_one(mut self, skip: u64) -> Self {
        self.state.set_skip_one(skip);
        self
    }

    pub fn projection(mut self, projection: Document) -> Self {
        self.state.set_projection(projection);
        self
    }

    pub fn projection_one(mut self, projection: Document) -> Self {
        self.state.set_projection_one(projection);
        self
    }

    pub fn hint(mut self, hint: Document) -> Self {
        self.state.set_hint(hint);
        self
    }

    pub fn hint_one(mut self, hint: Document) -> Self {
        self.state.set_hint_one(hint);
        self
    }

    /// 设置后记录查询耗时直方图
    pub fn metric(mut self, method: impl Into<String>) -> Self {
        self.state.set_metric_method(method);
        self
    }

    pub fn return_document(mut self, return_document: ReturnDocument) -> Self {
        self.return_document = return_document;
        self
    }

    /// `find_one_and_update` 未命中时插入
    pub fn with_upsert(mut self) -> Self {
        self.upsert = true;
        self
    }

    fn metric_method(&self) -> Option<String> {
        self.state.metric_method().map(str::to_string)
    }

    pub async fn find_one(self, ctx: &RequestContext) -> Result<Option<T>, RepositoryError> {
        let metric = self.metric_method();
        let Query { repo, mut state, .. } = self;
        repo.instrument(ctx, "find_one", metric, async move {
            let (store, filter) = repo.prepare(ctx, &mut state)?;
            let options = state.find_one_options();
            let docs = repo
                .timed(
                    "find",
                    store.find(T::COLLECTION, &filter, &options, session_for(ctx, store.as_ref())?),
                )
                .await?;
            docs.into_iter().next().map(|doc| repo.decode(doc)).transpose()
        })
        .await
    }

    pub async fn find_many(self, ctx: &RequestContext) -> Result<Vec<T>, RepositoryError> {
        let metric = self.metric_method();
        let Query { repo, mut state, .. } = self;
        repo.instrument(ctx, "find_many", metric, async move {
            let (store, filter) = repo.prepare(ctx, &mut state)?;
            let docs = repo
                .timed(
                    "find",
                    store.find(
                        T::COLLECTION,
                        &filter,
                        state.find_options(),
                        session_for(ctx, store.as_ref())?,
                    ),
                )
                .await?;
            repo.decode_many(docs).await
        })
        .await
    }

    pub async fn count(self, ctx: &RequestContext) -> Result<u64, RepositoryError> {
        let metric = self.metric_method();
        let Query { repo, mut state, .. } = self;
        repo.instrument(ctx, "count", metric, async move {
            let (store, filter) = repo.prepare(ctx, &mut state)?;
            let count = repo
                .timed(
                    "count",
                    store.count(
                        T::COLLECTION,
                        &filter,
                        state.find_options(),
                        session_for(ctx, store.as_ref())?,
                    ),
                )
                .await?;
            Ok::<_, RepositoryError>(count)
        })
        .await
    }

    /// 字段的去重取值；敏感字段返回解密后的值
    pub async fn distinct(self, ctx: &RequestContext, field: &str) -> Result<Vec<Value>, RepositoryError> {
        let metric = self.metric_method();
        let Query { repo, mut state, .. } = self;
        repo.instrument(ctx, "distinct", metric, async move {
            let (store, filter) = repo.prepare(ctx, &mut state)?;
            let values = repo
                .timed(
                    "distinct",
                    store.distinct(T::COLLECTION, field, &filter, session_for(ctx, store.as_ref())?),
                )
                .await?;

            let key = &repo.config.encrypt_key;
            if key.is_empty() || !repo.tags.contains(field) {
                return Ok(values);
            }
            let decrypted: Result<Vec<Value>, RepositoryError> = values
                .into_iter()
                .map(|value| match value {
                    Value::String(s) => cipher::decrypt(&s, key).map(Value::String).map_err(|source| {
                        RepositoryError::Codec(CodecError::Field {
                            path: field.to_string(),
                            source,
                        })
                    }),
                    other => Ok(other),
                })
                .collect();
            decrypted
        })
        .await
    }

    /// 插入一个文档，返回落库后的模型（已解密）
    pub async fn create_one(self, ctx: &RequestContext, model: &T) -> Result<T, RepositoryError> {
        let metric = self.metric_method();
        let Query { repo, state, .. } = self;
        repo.instrument(ctx, "create_one", metric, async move {
            state.check()?;
            let store = repo.store_for(ctx)?;
            let doc = repo.encode(model, &now_rfc3339())?;
            repo.timed(
                "insert",
                store.insert_many(T::COLLECTION, vec![doc.clone()], session_for(ctx, store.as_ref())?),
            )
            .await?;
            repo.decode(doc)
        })
        .await
    }

    /// 批量插入，同一批文档使用相同的时间戳
    pub async fn create_many(self, ctx: &RequestContext, models: &[T]) -> Result<Vec<T>, RepositoryError> {
        let metric = self.metric_method();
        let Query { repo, state, .. } = self;
        repo.instrument(ctx, "create_many", metric, async move {
            state.check()?;
            if models.is_empty() {
                return Ok(Vec::new());
            }
            let store = repo.store_for(ctx)?;
            let now = now_rfc3339();
            let docs = models
                .iter()
                .map(|model| repo.encode(model, &now))
                .collect::<Result<Vec<_>, _>>()?;
            repo.timed(
                "insert_many",
                store.insert_many(T::COLLECTION, docs.clone(), session_for(ctx, store.as_ref())?),
            )
            .await?;
            repo.decode_many(docs).await
        })
        .await
    }

    async fn run_update(
        self,
        ctx: &RequestContext,
        op: &'static str,
        update: &Value,
        options: UpdateOptions,
    ) -> Result<UpdateResult, RepositoryError> {
        let metric = self.metric_method();
        let Query { repo, mut state, .. } = self;
        repo.instrument(ctx, op, metric, async move {
            let (store, filter) = repo.prepare(ctx, &mut state)?;
            let update = encrypt_update(update, &repo.config.encrypt_key, &repo.tags)?;
            let result = repo
                .timed(
                    "update",
                    store.update(
                        T::COLLECTION,
                        &filter,
                        &update,
                        options,
                        session_for(ctx, store.as_ref())?,
                    ),
                )
                .await?;
            Ok::<_, RepositoryError>(result)
        })
        .await
    }

    pub async fn update_one(self, ctx: &RequestContext, update: &Value) -> Result<UpdateResult, RepositoryError> {
        self.run_update(ctx, "update_one", update, UpdateOptions::default())
            .await
    }

    pub async fn upsert(self, ctx: &RequestContext, update: &Value) -> Result<UpdateResult, RepositoryError> {
        let options = UpdateOptions {
            multi: false,
            upsert: true,
        };
        self.run_update(ctx, "upsert", update, options).await
    }

    pub async fn update_many(self, ctx: &RequestContext, update: &Value) -> Result<UpdateResult, RepositoryError> {
        let options = UpdateOptions {
            multi: true,
            upsert: false,
        };
        self.run_update(ctx, "update_many", update, options).await
    }

    /// 未命中且未设置 upsert 时返回 `Ok(None)`
    pub async fn find_one_and_update(
        self,
        ctx: &RequestContext,
        update: &Value,
    ) -> Result<Option<T>, RepositoryError> {
        let metric = self.metric_method();
        let Query {
            repo,
            mut state,
            return_document,
            upsert,
        } = self;
        repo.instrument(ctx, "find_one_and_update", metric, async move {
            let (store, filter) = repo.prepare(ctx, &mut state)?;
            let update = encrypt_update(update, &repo.config.encrypt_key, &repo.tags)?;
            let one = state.find_one_options();
            let options = FindOneAndUpdateOptions {
                sort: one.sort,
                projection: one.projection,
                upsert,
                return_document,
            };
            let doc = repo
                .timed(
                    "find_one_and_update",
                    store.find_one_and_update(
                        T::COLLECTION,
                        &filter,
                        &update,
                        &options,
                        session_for(ctx, store.as_ref())?,
                    ),
                )
                .await?;
            doc.map(|doc| repo.decode(doc)).transpose()
        })
        .await
    }

    async fn run_delete(self, ctx: &RequestContext, op: &'static str, multi: bool) -> Result<DeleteResult, RepositoryError> {
        let metric = self.metric_method();
        let Query { repo, mut state, .. } = self;
        repo.instrument(ctx, op, metric, async move {
            let (store, filter) = repo.prepare(ctx, &mut state)?;
            let result = repo
                .timed(
                    "delete",
                    store.delete(T::COLLECTION, &filter, multi, session_for(ctx, store.as_ref())?),
                )
                .await?;
            Ok::<_, RepositoryError>(result)
        })
        .await
    }

    pub async fn delete_one(self, ctx: &RequestContext) -> Result<DeleteResult, RepositoryError> {
        self.run_delete(ctx, "delete_one", false).await
    }

    pub async fn delete_many(self, ctx: &RequestContext) -> Result<DeleteResult, RepositoryError> {
        self.run_delete(ctx, "delete_many", true).await
    }
}
