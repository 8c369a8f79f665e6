//! Error taxonomy and transient fault classification
//!
//! Raw store failures are classified for retryability, tagged, and then
//! normalized into [`AppError`] values that carry a kind, a user-facing message
//! and a retryable flag.

pub mod classification;
pub mod kind;
pub mod taxonomy;

// Re-export main types for convenient access
pub use classification::{
    RetryableCodes, StoreFault, TransientFaultClassifier, WriteConcernError, WriteItemError,
};
pub use kind::ErrorKind;
pub use taxonomy::{
    from_error, is_retryable, wrap, AppError, BoxError, ResultExt, Retryable, BUSY_MESSAGE,
    UNKNOWN_MESSAGE,
};
