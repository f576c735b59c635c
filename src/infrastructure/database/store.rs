// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::query;
use crate::utils::context::ContextError;

/// 存储中的文档（JSON 对象）
pub type Document = serde_json::Map<String, Value>;

/// 存储层错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("duplicate key in `{collection}` on index `{index}`")]
    DuplicateKey { collection: String, index: String },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,
}

impl From<ContextError> for StoreError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => StoreError::Cancelled,
            ContextError::DeadlineExceeded => StoreError::DeadlineExceeded,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// 索引定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexModel {
    pub name: Option<String>,
    /// 有序的键，方向为 1 或 -1
    pub keys: Vec<(String, i32)>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexModel {
    pub fn new(keys: &[(&str, i32)]) -> Self {
        Self {
            name: None,
            keys: keys.iter().map(|(k, d)| (k.to_string(), *d)).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 索引名称，未指定时为 `field_1_other_-1`
    pub fn resolved_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self
                .keys
                .iter()
                .map(|(k, d)| format!("{}_{}", k, d))
                .collect::<Vec<_>>()
                .join("_"),
        }
    }

    /// 每个集合都存在的 `_id` 唯一索引
    pub fn primary() -> Self {
        Self::new(&[("_id", 1)]).unique().named("_id_")
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.keys.iter().map(|(k, _)| k.as_str()).collect()
    }
}

/// 查询选项
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Vec<(String, i32)>,
    pub skip: Option<u64>,
    /// 0 表示不限制，负数按绝对值处理
    pub limit: Option<i64>,
    pub projection: Option<Document>,
    /// 引擎接受但不使用
    pub hint: Option<Document>,
}

impl FindOptions {
    pub fn one() -> Self {
        Self {
            limit: Some(1),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub multi: bool,
    pub upsert: bool,
}

/// findOneAndUpdate 返回更新前还是更新后的文档
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnDocument {
    #[default]
    Before,
    After,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneAndUpdateOptions {
    pub sort: Vec<(String, i32)>,
    pub projection: Option<Document>,
    pub upsert: bool,
    pub return_document: ReturnDocument,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadConcern {
    #[default]
    Local,
    Majority,
    Snapshot,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteConcern {
    #[default]
    Acknowledged,
    Majority,
}

/// 事务选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    pub read_concern: ReadConcern,
    pub write_concern: WriteConcern,
}

impl TransactionOptions {
    pub fn majority() -> Self {
        Self {
            read_concern: ReadConcern::Local,
            write_concern: WriteConcern::Majority,
        }
    }

    pub fn snapshot() -> Self {
        Self {
            read_concern: ReadConcern::Snapshot,
            write_concern: WriteConcern::Acknowledged,
        }
    }
}

/// 存储会话（事务）
///
/// 会话只属于开启它的存储实例；提交或回滚之后不可再使用。
#[async_trait]
pub trait StoreSession: Send + Sync {
    /// 开启会话的存储名称
    fn store_name(&self) -> &str;

    /// 开启会话的存储实例标识
    fn store_id(&self) -> Uuid;

    fn options(&self) -> TransactionOptions;

    async fn commit(&self) -> Result<(), StoreError>;

    async fn abort(&self) -> Result<(), StoreError>;

    fn as_any(&self) -> &dyn Any;
}

/// 文档存储
///
/// 实现者只需提供按集合读写整文档的原语，过滤、更新、排序、投影和唯一索引
/// 由 [`query`] 引擎在这些原语之上完成。所有写操作经由 `write_gate` 串行化。
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 存储名称（多连接模式下为 `REGION::db`）
    fn store_name(&self) -> &str;

    fn store_id(&self) -> Uuid;

    fn write_gate(&self) -> &tokio::sync::Mutex<()>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// 按插入顺序读取集合内的全部文档
    async fn load(
        &self,
        collection: &str,
        session: Option<&dyn StoreSession>,
    ) -> Result<Vec<Document>, StoreError>;

    async fn insert(
        &self,
        collection: &str,
        doc: Document,
        session: Option<&dyn StoreSession>,
    ) -> Result<(), StoreError>;

    async fn replace(
        &self,
        collection: &str,
        id: &Value,
        doc: Document,
        session: Option<&dyn StoreSession>,
    ) -> Result<(), StoreError>;

    async fn remove(
        &self,
        collection: &str,
        id: &Value,
        session: Option<&dyn StoreSession>,
    ) -> Result<(), StoreError>;

    /// 列出索引，包含 `_id_`
    async fn list_indexes(
        &self,
        collection: &str,
        session: Option<&dyn StoreSession>,
    ) -> Result<Vec<IndexModel>, StoreError>;

    /// 创建索引，已存在的同名索引跳过，返回索引名称
    async fn create_indexes(
        &self,
        collection: &str,
        indexes: &[IndexModel],
    ) -> Result<Vec<String>, StoreError>;

    async fn start_session(
        &self,
        options: TransactionOptions,
    ) -> Result<Arc<dyn StoreSession>, StoreError>;

    async fn find(
        &self,
        collection: &str,
        filter: &Document,
        options: &FindOptions,
        session: Option<&dyn StoreSession>,
    ) -> Result<Vec<Document>, StoreError> {
        let docs = self.load(collection, session).await?;
        query::find(docs, filter, options)
    }

    async fn count(
        &self,
        collection: &str,
        filter: &Document,
        options: &FindOptions,
        session: Option<&dyn StoreSession>,
    ) -> Result<u64, StoreError> {
        let docs = self.load(collection, session).await?;
        let counted = FindOptions {
            skip: options.skip,
            limit: options.limit,
            ..FindOptions::default()
        };
        Ok(query::find(docs, filter, &counted)?.len() as u64)
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: &Document,
        session: Option<&dyn StoreSession>,
    ) -> Result<Vec<Value>, StoreError> {
        let docs = self.load(collection, session).await?;
        query::distinct(&docs, field, filter)
    }

    /// 插入多个文档，返回 `_id` 列表；遇到唯一索引冲突时停止，已插入的保留
    async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Document>,
        session: Option<&dyn StoreSession>,
    ) -> Result<Vec<Value>, StoreError> {
        let _gate = self.write_gate().lock().await;
        let indexes = self.list_indexes(collection, session).await?;
        let mut existing = self.load(collection, session).await?;

        let mut ids = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let id = query::ensure_id(&mut doc);
            query::check_unique(collection, &indexes, &existing, &doc, None)?;
            self.insert(collection, doc.clone(), session).await?;
            existing.push(doc);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Document,
        update: &Value,
        options: UpdateOptions,
        session: Option<&dyn StoreSession>,
    ) -> Result<UpdateResult, StoreError> {
        query::validate_update(update)?;

        let _gate = self.write_gate().lock().await;
        let indexes = self.list_indexes(collection, session).await?;
        let mut docs = self.load(collection, session).await?;

        let mut targets = Vec::new();
        for (pos, doc) in docs.iter().enumerate() {
            if query::matches(doc, filter)? {
                targets.push(pos);
                if !options.multi {
                    break;
                }
            }
        }

        let mut result = UpdateResult::default();
        for pos in targets {
            result.matched_count += 1;
            let mut updated = docs[pos].clone();
            query::apply_update(&mut updated, update, false)?;
            if updated == docs[pos] {
                continue;
            }
            let id = query::id_of(&updated);
            query::check_unique(collection, &indexes, &docs, &updated, Some(&id))?;
            self.replace(collection, &id, updated.clone(), session).await?;
            docs[pos] = updated;
            result.modified_count += 1;
        }

        if result.matched_count == 0 && options.upsert {
            let mut doc = query::seed_from_filter(filter)?;
            query::apply_update(&mut doc, update, true)?;
            let id = query::ensure_id(&mut doc);
            query::check_unique(collection, &indexes, &docs, &doc, None)?;
            self.insert(collection, doc, session).await?;
            result.upserted_id = Some(id);
        }

        Ok(result)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Document,
        update: &Value,
        options: &FindOneAndUpdateOptions,
        session: Option<&dyn StoreSession>,
    ) -> Result<Option<Document>, StoreError> {
        query::validate_update(update)?;

        let _gate = self.write_gate().lock().await;
        let indexes = self.list_indexes(collection, session).await?;
        let docs = self.load(collection, session).await?;

        let find_options = FindOptions {
            sort: options.sort.clone(),
            limit: Some(1),
            ..FindOptions::default()
        };
        let current = query::find(docs.clone(), filter, &find_options)?
            .into_iter()
            .next();

        let (before, after) = match current {
            Some(before) => {
                let mut after = before.clone();
                query::apply_update(&mut after, update, false)?;
                if after != before {
                    let id = query::id_of(&after);
                    query::check_unique(collection, &indexes, &docs, &after, Some(&id))?;
                    self.replace(collection, &id, after.clone(), session).await?;
                }
                (Some(before), after)
            }
            None if options.upsert => {
                let mut doc = query::seed_from_filter(filter)?;
                query::apply_update(&mut doc, update, true)?;
                query::ensure_id(&mut doc);
                query::check_unique(collection, &indexes, &docs, &doc, None)?;
                self.insert(collection, doc.clone(), session).await?;
                (None, doc)
            }
            None => return Ok(None),
        };

        let returned = match options.return_document {
            ReturnDocument::Before => before,
            ReturnDocument::After => Some(after),
        };
        Ok(returned.map(|doc| match &options.projection {
            Some(projection) => query::project(doc, projection),
            None => doc,
        }))
    }

    async fn delete(
        &self,
        collection: &str,
        filter: &Document,
        multi: bool,
        session: Option<&dyn StoreSession>,
    ) -> Result<DeleteResult, StoreError> {
        let _gate = self.write_gate().lock().await;
        let docs = self.load(collection, session).await?;

        let mut result = DeleteResult::default();
        for doc in &docs {
            if !query::matches(doc, filter)? {
                continue;
            }
            self.remove(collection, &query::id_of(doc), session).await?;
            result.deleted_count += 1;
            if !multi {
                break;
            }
        }
        Ok(result)
    }
}
