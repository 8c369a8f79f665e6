//! JSON response envelope.
//!
//! Every HTTP reply has the shape
//! `{code, message, data, errors, isRetryable}` and is sent with the status
//! of its [`ErrorKind`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{from_error, AppError, BoxError, ErrorKind, UNKNOWN_MESSAGE};

pub const SUCCESS_MESSAGE: &str = "success";
pub const ABORT_MESSAGE: &str = "request abort with unknown error";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: ErrorKind,
    pub message: String,
    pub data: Option<T>,
    pub errors: Option<String>,
    #[serde(rename = "isRetryable")]
    pub is_retryable: bool,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: ErrorKind::Success,
            message: SUCCESS_MESSAGE.to_string(),
            data: Some(data),
            errors: None,
            is_retryable: false,
        }
    }

    /// The message is the user-facing one; `errors` carries the full error text.
    pub fn failure(err: &AppError) -> Self {
        Self {
            code: err.kind(),
            message: err.message().to_string(),
            data: None,
            errors: Some(err.error_text()),
            is_retryable: err.is_retryable(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.code.status()
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        ApiResponse::<()>::failure(&self).into_response()
    }
}

/// Maps a handler result onto the envelope.
pub fn respond<T: Serialize>(result: Result<T, AppError>) -> Response {
    match result {
        Ok(data) => ApiResponse::success(data).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Like [`respond`] for arbitrary errors. Anything that is not an
/// [`AppError`] becomes `UNKNOWN_ERROR`.
pub fn respond_any<T: Serialize>(result: Result<T, BoxError>) -> Response {
    match result {
        Ok(data) => ApiResponse::success(data).into_response(),
        Err(err) => match from_error(Some(err)) {
            Some(app) => app.into_response(),
            None => abort(None),
        },
    }
}

/// Terminal reply for a request that cannot continue.
///
/// Unlike [`respond`], the error text goes in `message` and the user message
/// in `errors`, and the reply is never marked retryable. A missing error
/// becomes `UNKNOWN_ERROR` with [`ABORT_MESSAGE`] and the cause
/// [`UNKNOWN_MESSAGE`].
pub fn abort(err: Option<AppError>) -> Response {
    let err = err.unwrap_or_else(|| {
        AppError::new(ErrorKind::Unknown, ABORT_MESSAGE, None).with_cause(UNKNOWN_MESSAGE)
    });
    let body = ApiResponse::<()> {
        code: err.kind(),
        message: err.error_text(),
        data: None,
        errors: Some(err.message().to_string()),
        is_retryable: false,
    };
    body.into_response()
}
