// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 缓存模块
///
/// 读穿缓存、分布式互斥锁，以及 Redis 与进程内两种后端
pub mod backend;
pub mod lock;
pub mod memory_backend;
pub mod read_through;
pub mod redis_client;

pub use backend::{BackendError, CacheBackend};
pub use lock::{DistributedMutex, LockError};
pub use read_through::{Cache, CacheError};
