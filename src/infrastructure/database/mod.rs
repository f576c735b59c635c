// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 数据库模块
///
/// 文档存储抽象（进程内实现与 SeaORM 实现）、区域路由与连接注册表、
/// 泛型仓库及其过滤构造器、批量解密和索引审计。
pub mod batch;
pub mod connection;
pub mod entities;
pub mod filter;
pub mod index_audit;
pub mod memory_store;
pub mod query;
pub mod region;
pub mod repository;
pub mod sql_store;
pub mod store;
