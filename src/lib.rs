// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 示例实体的模型、仓库接口和服务
pub mod domain;

/// 基础设施模块
///
/// 字段加密、区域路由、文档存储、泛型仓库和读穿缓存
pub mod infrastructure;

/// 表示层模块
///
/// 处理HTTP请求和响应，包括路由、处理器和提取器
pub mod presentation;

/// 工具模块
///
/// 请求上下文和日志初始化
pub mod utils;
