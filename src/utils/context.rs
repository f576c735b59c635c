// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::database::store::StoreSession;

/// 客户端国家/地区请求头
pub const HEADER_CLIENT_REGION: &str = "X-Client-Region";
/// 请求ID请求头
pub const HEADER_REQUEST_ID: &str = "X-Request-Id";

/// 上下文错误
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context cancelled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// 请求上下文
///
/// 由传输层在调用仓库之前填充：客户端国家代码、请求/追踪ID、
/// 以及取消令牌和截止时间。事务回调收到的上下文还携带打开的存储会话。
///
/// 仓库只从这里读取区域，不会从其他来源推断。
#[derive(Clone, Default)]
pub struct RequestContext {
    country: Option<String>,
    request_id: Option<String>,
    trace_id: Option<String>,
    session: Option<Arc<dyn StoreSession>>,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置客户端国家代码（例如 `TH`、`VN`）
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// 使用外部取消令牌
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// 从现在起的超时时间
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub(crate) fn with_session(mut self, session: Arc<dyn StoreSession>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn session(&self) -> Option<&Arc<dyn StoreSession>> {
        self.session.as_ref()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// 用于日志的请求标识
    pub fn trace_label(&self) -> &str {
        self.request_id
            .as_deref()
            .or(self.trace_id.as_deref())
            .unwrap_or("-")
    }

    /// 在上下文约束下执行 future
    ///
    /// 令牌被取消或截止时间到达时立即返回，不等待底层调用超时。
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        if self.cancellation.is_cancelled() {
            return Err(ContextError::Cancelled);
        }

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.cancellation.cancelled() => Err(ContextError::Cancelled),
                    _ = tokio::time::sleep_until(deadline) => Err(ContextError::DeadlineExceeded),
                    out = fut => Ok(out),
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = self.cancellation.cancelled() => Err(ContextError::Cancelled),
                    out = fut => Ok(out),
                }
            }
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("country", &self.country)
            .field("request_id", &self.request_id)
            .field("trace_id", &self.trace_id)
            .field("session", &self.session.as_ref().map(|s| s.store_name().to_string()))
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}
