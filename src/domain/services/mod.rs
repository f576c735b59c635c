// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域服务模块
///
/// 实体服务（entity_service）：读穿缓存加仓库访问
pub mod entity_service;
