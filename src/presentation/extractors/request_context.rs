// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::utils::context::{RequestContext, HEADER_CLIENT_REGION, HEADER_REQUEST_ID};

/// 从请求头构造 [`RequestContext`]
///
/// `X-Client-Region` 缺失时上下文不带国家，由仓库返回缺少区域错误；
/// `X-Request-Id` 缺失时生成一个。
#[derive(Clone)]
pub struct ClientContext(pub RequestContext);

fn header_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

impl<S> FromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = header_value(parts, HEADER_REQUEST_ID)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut ctx = RequestContext::new().with_request_id(request_id);
        if let Some(country) = header_value(parts, HEADER_CLIENT_REGION) {
            ctx = ctx.with_country(country.to_uppercase());
        }
        Ok(ClientContext(ctx))
    }
}
