// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::any::Any;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DatabaseTransaction, EntityTrait, IsolationLevel, QueryFilter, QueryOrder, Schema, Set,
    TransactionTrait,
};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::entities::{document, document_index};
use super::query::id_key;
use super::store::{
    Document, DocumentStore, IndexModel, ReadConcern, StoreError, StoreSession,
    TransactionOptions,
};
use crate::config::settings::DatabaseSettings;

/// 基于 SeaORM 的文档存储
///
/// 文档以 JSON 形式保存在 `documents` 表中，索引定义保存在
/// `document_indexes` 表中。表结构在连接时按实体定义创建。
pub struct SqlDocumentStore {
    name: String,
    id: Uuid,
    db: DatabaseConnection,
    seq: AtomicI64,
    gate: tokio::sync::Mutex<()>,
}

fn session_ended() -> StoreError {
    StoreError::Session("session already ended".to_string())
}

/// 在会话事务或连接池上执行同一段代码
macro_rules! on_conn {
    ($store:expr, $session:expr, $conn:ident => $body:expr) => {
        match $store.session_of($session)? {
            Some(session) => {
                let guard = session.txn.lock().await;
                let $conn = guard.as_ref().ok_or_else(session_ended)?;
                $body
            }
            None => {
                let $conn = &$store.db;
                $body
            }
        }
    };
}

fn is_sqlite_memory(url: &str) -> bool {
    url.starts_with("sqlite") && url.contains(":memory:")
}

impl SqlDocumentStore {
    /// 创建连接池并初始化表结构
    pub async fn connect(
        name: impl Into<String>,
        url: &str,
        settings: &DatabaseSettings,
    ) -> Result<Self, StoreError> {
        let mut opt = ConnectOptions::new(url.to_owned());

        if is_sqlite_memory(url) {
            // every pooled connection would open its own in-memory database
            opt.max_connections(1).min_connections(1);
        } else {
            if let Some(max) = settings.max_connections {
                opt.max_connections(max);
            }
            if let Some(min) = settings.min_connections {
                opt.min_connections(min);
            }
            if let Some(idle) = settings.idle_timeout {
                opt.idle_timeout(Duration::from_secs(idle));
            }
            opt.max_lifetime(Duration::from_secs(3600));
        }

        if let Some(timeout) = settings.connect_timeout {
            opt.connect_timeout(Duration::from_secs(timeout));
            opt.acquire_timeout(Duration::from_secs(timeout));
        }

        opt.sqlx_logging(settings.enable_debug_logger);

        let db = Database::connect(opt).await?;
        Self::from_connection(name, db).await
    }

    /// 使用已有连接
    pub async fn from_connection(
        name: impl Into<String>,
        db: DatabaseConnection,
    ) -> Result<Self, StoreError> {
        let name = name.into();
        db.ping().await?;
        create_schema(&db).await?;
        info!("SQL document store ready: {}", name);

        Ok(Self {
            name,
            id: Uuid::new_v4(),
            db,
            seq: AtomicI64::new(Utc::now().timestamp_micros()),
            gate: tokio::sync::Mutex::new(()),
        })
    }

    fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    fn session_of<'a>(
        &self,
        session: Option<&'a dyn StoreSession>,
    ) -> Result<Option<&'a SqlSession>, StoreError> {
        let Some(session) = session else {
            return Ok(None);
        };
        match session.as_any().downcast_ref::<SqlSession>() {
            Some(s) if s.store_id == self.id => Ok(Some(s)),
            _ => Err(StoreError::Session(format!(
                "session from `{}` used on `{}`",
                session.store_name(),
                self.name
            ))),
        }
    }
}

async fn create_schema(db: &DatabaseConnection) -> Result<(), StoreError> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut documents = schema.create_table_from_entity(document::Entity);
    documents.if_not_exists();
    db.execute(backend.build(&documents)).await?;

    let mut indexes = schema.create_table_from_entity(document_index::Entity);
    indexes.if_not_exists();
    db.execute(backend.build(&indexes)).await?;

    Ok(())
}

async fn load_rows<C: ConnectionTrait>(
    conn: &C,
    collection: &str,
) -> Result<Vec<Document>, StoreError> {
    let rows = document::Entity::find()
        .filter(document::Column::Collection.eq(collection))
        .order_by_asc(document::Column::Seq)
        .all(conn)
        .await?;

    rows.into_iter()
        .map(|row| match row.body {
            Value::Object(map) => Ok(map),
            other => Err(StoreError::Serialization(format!(
                "document {} in `{}` is not an object: {}",
                row.doc_id, collection, other
            ))),
        })
        .collect()
}

async fn insert_row<C: ConnectionTrait>(
    conn: &C,
    collection: &str,
    seq: i64,
    doc: Document,
) -> Result<(), StoreError> {
    let now = Utc::now();
    let doc_id = id_key(doc.get("_id").unwrap_or(&Value::Null));
    let row = document::ActiveModel {
        collection: Set(collection.to_string()),
        doc_id: Set(doc_id),
        seq: Set(seq),
        body: Set(Value::Object(doc)),
        created_at: Set(now),
        updated_at: Set(now),
    };
    document::Entity::insert(row).exec_without_returning(conn).await?;
    Ok(())
}

async fn replace_row<C: ConnectionTrait>(
    conn: &C,
    collection: &str,
    id: &Value,
    doc: Document,
) -> Result<(), StoreError> {
    document::Entity::update_many()
        .col_expr(document::Column::Body, Expr::value(Value::Object(doc)))
        .col_expr(document::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(document::Column::Collection.eq(collection))
        .filter(document::Column::DocId.eq(id_key(id)))
        .exec(conn)
        .await?;
    Ok(())
}

async fn remove_row<C: ConnectionTrait>(
    conn: &C,
    collection: &str,
    id: &Value,
) -> Result<(), StoreError> {
    document::Entity::delete_many()
        .filter(document::Column::Collection.eq(collection))
        .filter(document::Column::DocId.eq(id_key(id)))
        .exec(conn)
        .await?;
    Ok(())
}

async fn index_rows<C: ConnectionTrait>(
    conn: &C,
    collection: &str,
) -> Result<Vec<IndexModel>, StoreError> {
    let rows = document_index::Entity::find()
        .filter(document_index::Column::Collection.eq(collection))
        .order_by_asc(document_index::Column::CreatedAt)
        .all(conn)
        .await?;

    let mut indexes = vec![IndexModel::primary()];
    for row in rows {
        let keys: Vec<(String, i32)> = serde_json::from_value(row.keys)?;
        indexes.push(IndexModel {
            name: Some(row.name),
            keys,
            unique: row.is_unique,
        });
    }
    Ok(indexes)
}

#[async_trait]
impl DocumentStore for SqlDocumentStore {
    fn store_name(&self) -> &str {
        &self.name
    }

    fn store_id(&self) -> Uuid {
        self.id
    }

    fn write_gate(&self) -> &tokio::sync::Mutex<()> {
        &self.gate
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.db.ping().await?;
        Ok(())
    }

    async fn load(
        &self,
        collection: &str,
        session: Option<&dyn StoreSession>,
    ) -> Result<Vec<Document>, StoreError> {
        on_conn!(self, session, conn => load_rows(conn, collection).await)
    }

    async fn insert(
        &self,
        collection: &str,
        doc: Document,
        session: Option<&dyn StoreSession>,
    ) -> Result<(), StoreError> {
        let seq = self.next_seq();
        on_conn!(self, session, conn => insert_row(conn, collection, seq, doc).await)
    }

    async fn replace(
        &self,
        collection: &str,
        id: &Value,
        doc: Document,
        session: Option<&dyn StoreSession>,
    ) -> Result<(), StoreError> {
        on_conn!(self, session, conn => replace_row(conn, collection, id, doc).await)
    }

    async fn remove(
        &self,
        collection: &str,
        id: &Value,
        session: Option<&dyn StoreSession>,
    ) -> Result<(), StoreError> {
        on_conn!(self, session, conn => remove_row(conn, collection, id).await)
    }

    async fn list_indexes(
        &self,
        collection: &str,
        session: Option<&dyn StoreSession>,
    ) -> Result<Vec<IndexModel>, StoreError> {
        on_conn!(self, session, conn => index_rows(conn, collection).await)
    }

    async fn create_indexes(
        &self,
        collection: &str,
        indexes: &[IndexModel],
    ) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::with_capacity(indexes.len());
        for index in indexes {
            let name = index.resolved_name();
            let existing = document_index::Entity::find_by_id((collection.to_string(), name.clone()))
                .one(&self.db)
                .await?;

            if existing.is_none() {
                let row = document_index::ActiveModel {
                    collection: Set(collection.to_string()),
                    name: Set(name.clone()),
                    keys: Set(serde_json::to_value(&index.keys)?),
                    is_unique: Set(index.unique),
                    created_at: Set(Utc::now()),
                };
                document_index::Entity::insert(row)
                    .exec_without_returning(&self.db)
                    .await?;
                debug!("Created index {} on {}", name, collection);
            }
            names.push(name);
        }
        Ok(names)
    }

    async fn start_session(
        &self,
        options: TransactionOptions,
    ) -> Result<Arc<dyn StoreSession>, StoreError> {
        let isolation = match options.read_concern {
            ReadConcern::Snapshot => Some(IsolationLevel::RepeatableRead),
            ReadConcern::Majority | ReadConcern::Local => None,
        };
        let txn = self.db.begin_with_config(isolation, None).await?;

        Ok(Arc::new(SqlSession {
            store_name: self.name.clone(),
            store_id: self.id,
            options,
            txn: tokio::sync::Mutex::new(Some(txn)),
        }))
    }
}

/// SQL 存储的会话，包装一个数据库事务
pub struct SqlSession {
    store_name: String,
    store_id: Uuid,
    options: TransactionOptions,
    txn: tokio::sync::Mutex<Option<DatabaseTransaction>>,
}

#[async_trait]
impl StoreSession for SqlSession {
    fn store_name(&self) -> &str {
        &self.store_name
    }

    fn store_id(&self) -> Uuid {
        self.store_id
    }

    fn options(&self) -> TransactionOptions {
        self.options
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let txn = self.txn.lock().await.take().ok_or_else(session_ended)?;
        txn.commit().await?;
        Ok(())
    }

    async fn abort(&self) -> Result<(), StoreError> {
        let txn = self.txn.lock().await.take().ok_or_else(session_ended)?;
        txn.rollback().await?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::store::{FindOptions, UpdateOptions};
    use serde_json::json;

    async fn sqlite_store() -> SqlDocumentStore {
        SqlDocumentStore::connect("sqlite", "sqlite::memory:", &DatabaseSettings::default())
            .await
            .unwrap()
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_sqlite_round_trip() {
        let store = sqlite_store().await;
        store
            .insert_many(
                "entities",
                vec![
                    doc(json!({ "_id": "1", "status": "active", "n": 1 })),
                    doc(json!({ "_id": "2", "status": "inactive", "n": 2 })),
                ],
                None,
            )
            .await
            .unwrap();

        let found = store
            .find("entities", &doc(json!({ "status": "active" })), &FindOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["_id"], "1");

        store
            .update(
                "entities",
                &doc(json!({ "_id": "2" })),
                &json!({ "$set": { "status": "active" } }),
                UpdateOptions::default(),
                None,
            )
            .await
            .unwrap();
        let count = store
            .count("entities", &doc(json!({ "status": "active" })), &FindOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_sqlite_indexes_persist() {
        let store = sqlite_store().await;
        let names = store
            .create_indexes("entities", &[IndexModel::new(&[("status", 1), ("n", -1)])])
            .await
            .unwrap();
        assert_eq!(names, vec!["status_1_n_-1".to_string()]);

        // creating again is a no-op
        store
            .create_indexes("entities", &[IndexModel::new(&[("status", 1), ("n", -1)])])
            .await
            .unwrap();

        let indexes = store.list_indexes("entities", None).await.unwrap();
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0].resolved_name(), "_id_");
        assert_eq!(indexes[1].field_names(), vec!["status", "n"]);
    }

    #[tokio::test]
    async fn test_sqlite_transaction_rollback() {
        let store = sqlite_store().await;
        let session = store.start_session(TransactionOptions::majority()).await.unwrap();
        store
            .insert_many("entities", vec![doc(json!({ "_id": "t" }))], Some(session.as_ref()))
            .await
            .unwrap();
        session.abort().await.unwrap();

        assert!(store.load("entities", None).await.unwrap().is_empty());
    }
}
