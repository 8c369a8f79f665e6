//! Structured application errors
//!
//! [`AppError`] is the one error shape that reaches callers. Raw failures are
//! normalized through [`wrap`] (or [`from_error`] at the response boundary),
//! which also applies the busy-message policy for anything tagged
//! [`Retryable`].

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use super::ErrorKind;

/// Boxed error used for causes.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// User-facing message for every retryable failure.
pub const BUSY_MESSAGE: &str = "The system is busy, please try again later.";

/// Message used by [`from_error`] for unclassified failures.
pub const UNKNOWN_MESSAGE: &str = "unknown error";

/// Marks a failure as transient.
///
/// Carries no kind or message. [`wrap`] turns it into an `Unavailable`
/// [`AppError`] with `retryable = true`. There is no way to build a
/// non-retryable instance.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct Retryable {
    source: BoxError,
}

impl Retryable {
    pub fn new(err: impl Into<BoxError>) -> Self {
        Self { source: err.into() }
    }

    /// Always true.
    pub fn is_retryable(&self) -> bool {
        true
    }

    pub fn into_inner(self) -> BoxError {
        self.source
    }
}

/// Placeholder cause for a wrap call that received no error.
#[derive(Debug, Error)]
#[error("error is nil")]
struct MissingCause;

/// A normalized failure: kind, user-facing message, optional cause and a
/// retryability flag.
#[derive(Debug)]
pub struct AppError {
    kind: ErrorKind,
    message: String,
    cause: Option<BoxError>,
    retryable: bool,
}

impl AppError {
    /// Creates a non-retryable error.
    pub fn new(kind: ErrorKind, message: impl Into<String>, cause: Option<BoxError>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause,
            retryable: false,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message, None)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DataNotFound, message, None)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message, None)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message, None)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message, None)
    }

    /// Attaches a cause, replacing any existing one.
    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Diagnostic text: the cause's text when present, otherwise a line
    /// composed of the code, message and retryable flag.
    pub fn error_text(&self) -> String {
        match &self.cause {
            Some(cause) => cause.to_string(),
            None => format!(
                "apperror is nil with code {} and message {} | retryable: {}",
                self.kind.code(),
                self.message,
                self.retryable
            ),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.error_text())
    }
}

impl StdError for AppError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

/// Normalizes `err` into an [`AppError`].
///
/// - `None` yields `Unknown` with an "error is nil" cause.
/// - A [`Retryable`] yields `Unavailable` with [`BUSY_MESSAGE`], ignoring
///   `kind` and `message`.
/// - An existing [`AppError`] is returned unchanged.
/// - Anything else is wrapped as a non-retryable error of `kind`.
pub fn wrap(kind: ErrorKind, message: impl Into<String>, err: Option<BoxError>) -> AppError {
    let Some(err) = err else {
        return AppError {
            kind: ErrorKind::Unknown,
            message: message.into(),
            cause: Some(Box::new(MissingCause)),
            retryable: false,
        };
    };

    let err = match err.downcast::<AppError>() {
        Ok(app) => return *app,
        Err(other) => other,
    };

    if err.is::<Retryable>() {
        return AppError {
            kind: ErrorKind::Unavailable,
            message: BUSY_MESSAGE.to_string(),
            cause: Some(err),
            retryable: true,
        };
    }

    AppError {
        kind,
        message: message.into(),
        cause: Some(err),
        retryable: false,
    }
}

/// Converts any error into an [`AppError`] for the response boundary.
pub fn from_error(err: Option<BoxError>) -> Option<AppError> {
    let err = err?;
    match err.downcast::<AppError>() {
        Ok(app) => Some(*app),
        Err(other) => Some(AppError::new(ErrorKind::Unknown, UNKNOWN_MESSAGE, Some(other))),
    }
}

/// True only for an [`AppError`] flagged retryable or a [`Retryable`] marker.
pub fn is_retryable(err: Option<&(dyn StdError + 'static)>) -> bool {
    let Some(err) = err else {
        return false;
    };
    if let Some(app) = err.downcast_ref::<AppError>() {
        return app.retryable;
    }
    err.downcast_ref::<Retryable>()
        .is_some_and(Retryable::is_retryable)
}

/// Extension for turning any `Result` into one carrying an [`AppError`].
pub trait ResultExt<T> {
    fn wrap_err<M: Into<String>>(self, kind: ErrorKind, message: M) -> Result<T, AppError>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<BoxError>,
{
    fn wrap_err<M: Into<String>>(self, kind: ErrorKind, message: M) -> Result<T, AppError> {
        self.map_err(|err| wrap(kind, message, Some(err.into())))
    }
}
