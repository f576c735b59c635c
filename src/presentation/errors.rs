// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::domain::services::entity_service::EntityServiceError;
use crate::infrastructure::database::repository::RepositoryError;

/// 应用错误类型
///
/// 封装所有可能的应用层错误，提供统一的错误处理接口
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        let repository_status = |err: &RepositoryError| match err {
            RepositoryError::MissingRegion
            | RepositoryError::RegionNotFound(_)
            | RepositoryError::Filter(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if let Some(err) = self.0.downcast_ref::<EntityServiceError>() {
            return match err {
                EntityServiceError::InvalidId(_) | EntityServiceError::Validation(_) => {
                    StatusCode::BAD_REQUEST
                }
                EntityServiceError::NotFound(_) => StatusCode::NOT_FOUND,
                EntityServiceError::Repository(err) => repository_status(err),
                EntityServiceError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
        }
        match self.0.downcast_ref::<RepositoryError>() {
            Some(err) => repository_status(err),
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {:#}", self.0);
        }

        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
