use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::logic::context::TxOutcome;

/// Errors surfaced by use cases and rendered by the API layer.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("permission '{permission}' is required")]
    Forbidden { permission: String },

    #[error("{message}")]
    Validation {
        message: String,
        detail: BTreeMap<String, String>,
    },

    #[error("{0}")]
    BadRequest(String),

    #[error("{endpoint} with {key} '{id}' not found")]
    NotFound {
        endpoint: String,
        key: String,
        id: String,
    },

    #[error("{0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn forbidden(permission: impl Into<String>) -> Self {
        AppError::Forbidden {
            permission: permission.into(),
        }
    }

    pub fn not_found(endpoint: &str, key: &str, id: impl ToString) -> Self {
        AppError::NotFound {
            endpoint: endpoint.to_string(),
            key: key.to_string(),
            id: id.to_string(),
        }
    }

    /// Validation failure on a single field.
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        AppError::Validation {
            message: format!("{}: {}", field, message),
            detail: BTreeMap::from([(field.to_string(), message)]),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::Validation { .. } | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<BTreeMap<String, String>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("request failed: {}", self);
        }
        let detail = match &self {
            AppError::Validation { detail, .. } if !detail.is_empty() => Some(detail.clone()),
            _ => None,
        };
        let body = ErrorResponse {
            code: status.as_u16(),
            message: self.to_string(),
            detail,
        };
        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(TxOutcome::Rollback);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::forbidden("surveys.create").status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::not_found("surveys", "id", "x").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::invalid_field("title", "is required").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_response_marks_rollback() {
        let response = AppError::invalid_field("title", "is required").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.extensions().get::<TxOutcome>(),
            Some(&TxOutcome::Rollback)
        );
    }

    #[test]
    fn test_not_found_message_names_key() {
        let err = AppError::not_found("surveys", "code", "abc");
        assert_eq!(err.to_string(), "surveys with code 'abc' not found");
    }
}
