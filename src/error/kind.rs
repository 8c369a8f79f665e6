//! Error kinds and their status codes
//!
//! Every structured error carries exactly one [`ErrorKind`]. A kind has a stable
//! wire code (`"DATA_CONFLICT"`, `"UNAVAILABLE"`, ...) and a single HTTP status.

use std::fmt;
use std::str::FromStr;

use axum::http::StatusCode;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The closed set of application error kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ErrorKind {
    /// Not an error. Used for the success envelope.
    Success,
    /// The request was malformed or failed validation.
    BadRequest,
    /// Credentials were missing or invalid.
    Unauthorized,
    /// The caller is authenticated but not allowed to do this.
    PermissionDenied,
    /// A record the caller asked for does not exist.
    DataNotFound,
    /// No route matched the requested path.
    PathNotFound,
    /// The route exists but not for this method.
    MethodNotFound,
    /// The operation conflicts with current state.
    Conflict,
    /// An internal failure the caller cannot fix.
    Internal,
    /// A dependency is temporarily unavailable; retrying may succeed.
    Unavailable,
    /// Anything that could not be classified.
    #[default]
    Unknown,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 11] = [
        ErrorKind::Success,
        ErrorKind::BadRequest,
        ErrorKind::Unauthorized,
        ErrorKind::PermissionDenied,
        ErrorKind::DataNotFound,
        ErrorKind::PathNotFound,
        ErrorKind::MethodNotFound,
        ErrorKind::Conflict,
        ErrorKind::Internal,
        ErrorKind::Unavailable,
        ErrorKind::Unknown,
    ];

    /// The wire code used in response bodies.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Success => "SUCCESS",
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::DataNotFound => "DATA_NOT_FOUND",
            ErrorKind::PathNotFound => "PATH_NOT_FOUND",
            ErrorKind::MethodNotFound => "METHOD_NOT_FOUND",
            ErrorKind::Conflict => "DATA_CONFLICT",
            ErrorKind::Internal => "INTERNAL_ERROR",
            ErrorKind::Unavailable => "UNAVAILABLE",
            ErrorKind::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Parses a wire code. Unrecognized codes become [`ErrorKind::Unknown`].
    pub fn from_code(code: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|kind| kind.code() == code)
            .unwrap_or(ErrorKind::Unknown)
    }

    /// The HTTP status this kind is reported with.
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Success => StatusCode::OK,
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorKind::DataNotFound | ErrorKind::PathNotFound => StatusCode::NOT_FOUND,
            ErrorKind::MethodNotFound => StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal | ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ErrorKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_code(s))
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for ErrorKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(Self::from_code(&code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorKind::Success.status(), StatusCode::OK);
        assert_eq!(ErrorKind::BadRequest.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::PermissionDenied.status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::DataNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::PathNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::MethodNotFound.status().as_u16(), 405);
        assert_eq!(ErrorKind::Conflict.status().as_u16(), 409);
        assert_eq!(ErrorKind::Unavailable.status().as_u16(), 503);
        assert_eq!(ErrorKind::Internal.status().as_u16(), 500);
        assert_eq!(ErrorKind::Unknown.status().as_u16(), 500);
    }

    #[test]
    fn test_unrecognized_code_falls_back_to_500() {
        let kind = ErrorKind::from_code("TEAPOT");
        assert_eq!(kind, ErrorKind::Unknown);
        assert_eq!(kind.status().as_u16(), 500);
    }

    #[test]
    fn test_codes_are_unique_and_parse_back() {
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::from_code(kind.code()), kind);
        }
        assert_eq!(ErrorKind::Conflict.to_string(), "DATA_CONFLICT");
    }

    #[test]
    fn test_serde_uses_wire_code() {
        let json = serde_json::to_string(&ErrorKind::Unavailable).unwrap();
        assert_eq!(json, "\"UNAVAILABLE\"");

        let kind: ErrorKind = serde_json::from_str("\"PATH_NOT_FOUND\"").unwrap();
        assert_eq!(kind, ErrorKind::PathNotFound);
    }
}
