// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;

/// 达到该数量后批处理并发度提升
pub const BATCH_CONCURRENCY_THRESHOLD: usize = 200;
const SMALL_BATCH_CONCURRENCY: usize = 1;
const LARGE_BATCH_CONCURRENCY: usize = 10;

#[derive(Error, Debug)]
pub enum BatchError<E> {
    #[error(transparent)]
    Task(E),

    #[error("batch task panicked: {0}")]
    Join(String),
}

/// 批量大小对应的最大并发数
pub fn concurrency_for(len: usize) -> usize {
    if len < BATCH_CONCURRENCY_THRESHOLD {
        SMALL_BATCH_CONCURRENCY
    } else {
        LARGE_BATCH_CONCURRENCY
    }
}

/// 在阻塞线程池上并发处理每个元素，保持输入顺序
///
/// 每个任务在生成前先获取信号量许可，因此同时运行的任务数不会超过
/// [`concurrency_for`] 给出的上限。任一任务失败则整体失败，返回按顺序
/// 的第一个错误；其余已生成的任务仍会运行完毕。
pub async fn run_blocking_batch<I, O, E, F>(items: Vec<I>, f: F) -> Result<Vec<O>, BatchError<E>>
where
    I: Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
    F: Fn(I) -> Result<O, E> + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency_for(items.len())));
    let f = Arc::new(f);

    let mut handles = Vec::with_capacity(items.len());
    for item in items {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| BatchError::Join(e.to_string()))?;
        let f = f.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f(item)
        }));
    }

    let mut output = Vec::with_capacity(handles.len());
    let mut first_error = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(value)) => output.push(value),
            Ok(Err(e)) => {
                first_error.get_or_insert(BatchError::Task(e));
            }
            Err(e) => {
                first_error.get_or_insert(BatchError::Join(e.to_string()));
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn max_in_flight(n: usize) -> usize {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (c, p) = (current.clone(), peak.clone());

        let out = run_blocking_batch((0..n).collect(), move |i: usize| {
            let now = c.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
            c.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, ()>(i * 2)
        })
        .await
        .unwrap();

        assert_eq!(out.len(), n);
        assert!(out.iter().enumerate().all(|(i, v)| *v == i * 2));
        peak.load(Ordering::SeqCst)
    }

    #[test]
    fn test_concurrency_threshold() {
        assert_eq!(concurrency_for(0), 1);
        assert_eq!(concurrency_for(199), 1);
        assert_eq!(concurrency_for(200), 10);
        assert_eq!(concurrency_for(5000), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_small_batch_runs_one_at_a_time() {
        assert_eq!(max_in_flight(50).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_large_batch_is_capped_at_ten() {
        let peak = max_in_flight(200).await;
        assert!(peak <= 10, "peak was {}", peak);
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn test_first_error_fails_the_batch() {
        let result = run_blocking_batch(vec![1, 2, 3, 4], |i: i32| {
            if i % 2 == 0 {
                Err(format!("bad {}", i))
            } else {
                Ok(i)
            }
        })
        .await;
        match result {
            Err(BatchError::Task(msg)) => assert_eq!(msg, "bad 2"),
            other => panic!("unexpected {:?}", other.map(|v| v.len())),
        }
    }
}
