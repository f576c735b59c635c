// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::store::{DocumentStore, IndexModel};
use crate::config::settings::IndexAuditSettings;
use crate::infrastructure::metrics::INDEX_AUDIT_DROPPED;

const AUDIT_TARGET: &str = "docvault::index_audit";

/// 审计结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditOutcome {
    /// 集合上除 `_id` 外没有任何索引
    NoIndexes,
    /// 没有索引的前缀与过滤键按位置匹配
    Missing,
    /// 最佳索引只匹配了部分过滤键
    Partial { score: usize, wanted: usize },
    /// 存在完全匹配的索引
    Full,
}

/// 按位置比较索引键与过滤键，返回相同位置上相等的个数
pub fn calc_index(index: &[String], keys: &[String]) -> usize {
    index
        .iter()
        .zip(keys)
        .filter(|(index_key, filter_key)| index_key == filter_key)
        .count()
}

/// 索引的键名列表，遇到 `_id` 截止，空列表被丢弃
pub fn index_key_names(indexes: &[IndexModel]) -> Vec<Vec<String>> {
    indexes
        .iter()
        .map(|index| {
            index
                .keys
                .iter()
                .map(|(key, _)| key.clone())
                .take_while(|key| key != "_id")
                .collect::<Vec<_>>()
        })
        .filter(|keys| !keys.is_empty())
        .collect()
}

pub fn evaluate(indexes: &[Vec<String>], keys: &[String]) -> AuditOutcome {
    if indexes.is_empty() {
        return AuditOutcome::NoIndexes;
    }

    let best = indexes
        .iter()
        .map(|index| calc_index(index, keys))
        .max()
        .unwrap_or(0);

    match best {
        0 => AuditOutcome::Missing,
        score if score < keys.len() => AuditOutcome::Partial {
            score,
            wanted: keys.len(),
        },
        _ => AuditOutcome::Full,
    }
}

/// 对一个集合执行一次审计并记录日志
pub async fn audit(store: &dyn DocumentStore, collection: &str, keys: &[String]) -> Option<AuditOutcome> {
    let filter = keys.join("|");
    let indexes = match store.list_indexes(collection, None).await {
        Ok(indexes) => index_key_names(&indexes),
        Err(e) => {
            error!(target: AUDIT_TARGET, collection, filter = %filter, "get indexes error: {}", e);
            return None;
        }
    };

    let outcome = evaluate(&indexes, keys);
    let declared: Vec<String> = indexes.iter().map(|index| index.join("|")).collect();
    match &outcome {
        AuditOutcome::NoIndexes => {
            warn!(target: AUDIT_TARGET, collection, filter = %filter, "database indexes warning: indexes empty");
        }
        AuditOutcome::Missing => {
            warn!(target: AUDIT_TARGET, collection, filter = %filter, indexes = ?declared, "database indexes warning: not found index");
        }
        AuditOutcome::Partial { score, wanted } => {
            warn!(
                target: AUDIT_TARGET,
                collection,
                filter = %filter,
                indexes = ?declared,
                score,
                wanted,
                "database indexes warning: found index, but may not be effective"
            );
        }
        AuditOutcome::Full => {
            info!(target: AUDIT_TARGET, collection, filter = %filter, "query covered by index");
        }
    }
    Some(outcome)
}

struct AuditJob {
    store: Arc<dyn DocumentStore>,
    collection: String,
    keys: Vec<String>,
}

/// 索引审计器
///
/// 有界队列加固定数量的工作协程。提交永不阻塞调用方：队列满时丢弃。
#[derive(Clone)]
pub struct IndexAuditor {
    sender: mpsc::Sender<AuditJob>,
    handles: Arc<Vec<JoinHandle<()>>>,
}

impl IndexAuditor {
    pub fn start(settings: &IndexAuditSettings) -> Self {
        let (sender, receiver) = mpsc::channel::<AuditJob>(settings.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = settings.workers.max(1);
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let receiver = receiver.clone();
            handles.push(tokio::spawn(async move {
                debug!(target: AUDIT_TARGET, "Index audit worker {} started", id);
                loop {
                    let job = receiver.lock().await.recv().await;
                    let Some(job) = job else {
                        break;
                    };
                    audit(job.store.as_ref(), &job.collection, &job.keys).await;
                }
                debug!(target: AUDIT_TARGET, "Index audit worker {} stopped", id);
            }));
        }

        info!("Index auditor started with {} workers", workers);
        Self {
            sender,
            handles: Arc::new(handles),
        }
    }

    /// 提交审计；过滤键为空时跳过
    pub fn submit(&self, store: Arc<dyn DocumentStore>, collection: &str, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }

        let job = AuditJob {
            store,
            collection: collection.to_string(),
            keys,
        };
        match self.sender.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                debug!(target: AUDIT_TARGET, collection = %job.collection, "audit queue full, dropping");
                counter!(INDEX_AUDIT_DROPPED).increment(1);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(target: AUDIT_TARGET, "audit queue closed");
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }
}
