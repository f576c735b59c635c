// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;

use crate::domain::models::entity::{Entity, EntityStatus};
use crate::infrastructure::database::repository::RepositoryError;
use crate::utils::context::RequestContext;

/// 实体仓库特质
///
/// 定义实体数据访问接口；多区域部署时按上下文中的国家选择连接
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// 创建实体，返回落库后的实体
    async fn create(&self, ctx: &RequestContext, entity: &Entity) -> Result<Entity, RepositoryError>;
    /// 根据ID查找实体
    async fn get(&self, ctx: &RequestContext, id: &str) -> Result<Option<Entity>, RepositoryError>;
    /// 更新状态，返回更新后的实体
    async fn update_status(
        &self,
        ctx: &RequestContext,
        id: &str,
        status: EntityStatus,
    ) -> Result<Option<Entity>, RepositoryError>;
    /// 按手机号查找
    async fn find_by_phone(
        &self,
        ctx: &RequestContext,
        phone_number: &str,
    ) -> Result<Vec<Entity>, RepositoryError>;
}
