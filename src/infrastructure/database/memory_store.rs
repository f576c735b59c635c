// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use uuid::Uuid;

use super::query::values_equal;
use super::store::{
    Document, DocumentStore, IndexModel, StoreError, StoreSession, TransactionOptions,
};

#[derive(Debug, Clone, Default)]
struct CollectionData {
    docs: Vec<Document>,
    indexes: Vec<IndexModel>,
}

struct MemoryInner {
    name: String,
    id: Uuid,
    collections: RwLock<HashMap<String, CollectionData>>,
    gate: tokio::sync::Mutex<()>,
}

/// 进程内文档存储
///
/// 用于 `memory://` 连接和测试。会话在开启时对全部集合做快照，
/// 会话内的写操作同时记入日志，提交时逐条重放到主数据上。
#[derive(Clone)]
pub struct MemoryDocumentStore {
    inner: Arc<MemoryInner>,
}

impl MemoryDocumentStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                name: name.into(),
                id: Uuid::new_v4(),
                collections: RwLock::new(HashMap::new()),
                gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    fn session_of<'a>(
        &self,
        session: Option<&'a dyn StoreSession>,
    ) -> Result<Option<&'a MemorySession>, StoreError> {
        let Some(session) = session else {
            return Ok(None);
        };
        match session.as_any().downcast_ref::<MemorySession>() {
            Some(s) if s.store.id == self.inner.id => Ok(Some(s)),
            _ => Err(StoreError::Session(format!(
                "session from `{}` used on `{}`",
                session.store_name(),
                self.inner.name
            ))),
        }
    }

    /// 在主数据或会话工作区上执行修改
    fn mutate(
        &self,
        collection: &str,
        session: Option<&dyn StoreSession>,
        write: PendingWrite,
    ) -> Result<(), StoreError> {
        match self.session_of(session)? {
            Some(s) => s.record(collection, write),
            None => {
                let mut collections = self.inner.collections.write();
                write.apply(&mut collections.entry(collection.to_string()).or_default().docs);
                Ok(())
            }
        }
    }
}

/// 单条文档级写操作
#[derive(Debug, Clone)]
enum PendingWrite {
    Insert(Document),
    Replace(Value, Document),
    Remove(Value),
}

impl PendingWrite {
    /// 按 `_id` 定位；目标已不存在时替换和删除不生效
    fn apply(self, docs: &mut Vec<Document>) {
        match self {
            PendingWrite::Insert(doc) => docs.push(doc),
            PendingWrite::Replace(id, doc) => {
                if let Some(pos) = position_of(docs, &id) {
                    docs[pos] = doc;
                }
            }
            PendingWrite::Remove(id) => {
                if let Some(pos) = position_of(docs, &id) {
                    docs.remove(pos);
                }
            }
        }
    }
}

fn position_of(docs: &[Document], id: &Value) -> Option<usize> {
    docs.iter()
        .position(|doc| doc.get("_id").is_some_and(|v| values_equal(v, id)))
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn store_name(&self) -> &str {
        &self.inner.name
    }

    fn store_id(&self) -> Uuid {
        self.inner.id
    }

    fn write_gate(&self) -> &tokio::sync::Mutex<()> {
        &self.inner.gate
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load(
        &self,
        collection: &str,
        session: Option<&dyn StoreSession>,
    ) -> Result<Vec<Document>, StoreError> {
        match self.session_of(session)? {
            Some(s) => s.snapshot_of(collection),
            None => Ok(self
                .inner
                .collections
                .read()
                .get(collection)
                .map(|data| data.docs.clone())
                .unwrap_or_default()),
        }
    }

    async fn insert(
        &self,
        collection: &str,
        doc: Document,
        session: Option<&dyn StoreSession>,
    ) -> Result<(), StoreError> {
        self.mutate(collection, session, PendingWrite::Insert(doc))
    }

    async fn replace(
        &self,
        collection: &str,
        id: &Value,
        doc: Document,
        session: Option<&dyn StoreSession>,
    ) -> Result<(), StoreError> {
        self.mutate(collection, session, PendingWrite::Replace(id.clone(), doc))
    }

    async fn remove(
        &self,
        collection: &str,
        id: &Value,
        session: Option<&dyn StoreSession>,
    ) -> Result<(), StoreError> {
        self.mutate(collection, session, PendingWrite::Remove(id.clone()))
    }

    async fn list_indexes(
        &self,
        collection: &str,
        _session: Option<&dyn StoreSession>,
    ) -> Result<Vec<IndexModel>, StoreError> {
        let mut indexes = vec![IndexModel::primary()];
        if let Some(data) = self.inner.collections.read().get(collection) {
            indexes.extend(data.indexes.iter().cloned());
        }
        Ok(indexes)
    }

    async fn create_indexes(
        &self,
        collection: &str,
        indexes: &[IndexModel],
    ) -> Result<Vec<String>, StoreError> {
        let mut collections = self.inner.collections.write();
        let data = collections.entry(collection.to_string()).or_default();

        let mut names = Vec::with_capacity(indexes.len());
        for index in indexes {
            let name = index.resolved_name();
            if !data.indexes.iter().any(|i| i.resolved_name() == name) {
                data.indexes.push(index.clone().named(name.clone()));
            }
            names.push(name);
        }
        Ok(names)
    }

    async fn start_session(
        &self,
        options: TransactionOptions,
    ) -> Result<Arc<dyn StoreSession>, StoreError> {
        let snapshot = self
            .inner
            .collections
            .read()
            .iter()
            .map(|(name, data)| (name.clone(), data.docs.clone()))
            .collect();

        Ok(Arc::new(MemorySession {
            store: self.inner.clone(),
            options,
            state: Mutex::new(Some(Workspace {
                docs: snapshot,
                log: Vec::new(),
            })),
        }))
    }
}

struct Workspace {
    docs: HashMap<String, Vec<Document>>,
    log: Vec<(String, PendingWrite)>,
}

/// 进程内存储的会话
pub struct MemorySession {
    store: Arc<MemoryInner>,
    options: TransactionOptions,
    state: Mutex<Option<Workspace>>,
}

impl MemorySession {
    fn snapshot_of(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let state = self.state.lock();
        let workspace = state.as_ref().ok_or_else(session_ended)?;
        Ok(workspace.docs.get(collection).cloned().unwrap_or_default())
    }

    fn record(&self, collection: &str, write: PendingWrite) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let workspace = state.as_mut().ok_or_else(session_ended)?;
        write
            .clone()
            .apply(workspace.docs.entry(collection.to_string()).or_default());
        workspace.log.push((collection.to_string(), write));
        Ok(())
    }
}

fn session_ended() -> StoreError {
    StoreError::Session("session already ended".to_string())
}

#[async_trait]
impl StoreSession for MemorySession {
    fn store_name(&self) -> &str {
        &self.store.name
    }

    fn store_id(&self) -> Uuid {
        self.store.id
    }

    fn options(&self) -> TransactionOptions {
        self.options
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let workspace = self.state.lock().take().ok_or_else(session_ended)?;

        let mut collections = self.store.collections.write();
        for (name, write) in workspace.log {
            write.apply(&mut collections.entry(name).or_default().docs);
        }
        Ok(())
    }

    async fn abort(&self) -> Result<(), StoreError> {
        self.state.lock().take();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
