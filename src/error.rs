use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use twilio::TwilioError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Provider(#[from] TwilioError),

    #[error("Timed out after {0:?} waiting for Twilio")]
    ProviderTimeout(Duration),

    #[error("Failed to sign capability token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    /// A failure shared by every request that waited on the same operation.
    #[error(transparent)]
    Shared(Arc<AppError>),
}

impl AppError {
    /// The underlying error, looking through shared failures.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::Shared(inner) => inner.root(),
            other => other,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.root() {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ProviderTimeout(_) | AppError::Provider(TwilioError::Timeout) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            AppError::Provider(_) | AppError::Signing(_) | AppError::Shared(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed: {self}");
        }

        (
            status,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
