// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 数据库实体模块
///
/// SQL 文档存储使用的表：文档表与索引定义表
pub mod document;
pub mod document_index;
