// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 基础设施层模块
///
/// 该模块包含系统的技术实现细节，提供对具体技术的抽象和封装。
///
/// 包含的子模块：
/// - 缓存（cache）：读穿缓存、分布式锁，Redis 与进程内后端
/// - 加密（crypto）：AES 字段加密
/// - 数据库（database）：区域路由、文档存储、泛型仓库
/// - 指标（metrics）：Prometheus 指标
/// - 仓库实现（repositories）：领域仓库接口的具体实现
pub mod cache;
pub mod crypto;
pub mod database;
pub mod metrics;
pub mod repositories;
