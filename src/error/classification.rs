//! Transient fault classification for remote store failures
//!
//! Store clients report failures as a [`StoreFault`]. The
//! [`TransientFaultClassifier`] decides whether retrying the same operation is
//! safe, using a [`RetryableCodes`] table that is data rather than control flow.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::taxonomy::{wrap, AppError, BoxError, Retryable};
use super::ErrorKind;

/// A single failed item inside a multi-document write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteItemError {
    /// Position of the failed item in the batch.
    pub index: usize,
    pub code: i32,
    pub message: String,
}

/// The aggregate write-concern failure of a write batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteConcernError {
    pub code: i32,
    pub message: String,
}

/// The raw failure shapes a store client can return.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreFault {
    /// Connection could not be established or was dropped.
    Network(String),
    /// The operation did not complete in time.
    Timeout(String),
    /// A command was rejected with a single server code.
    Command {
        code: i32,
        name: Option<String>,
        message: String,
    },
    /// A write batch reported per-item errors and/or a write-concern error.
    Write {
        write_errors: Vec<WriteItemError>,
        write_concern: Option<WriteConcernError>,
    },
    /// Anything the client could not map to a known shape.
    Other(String),
}

impl fmt::Display for StoreFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreFault::Network(msg) => write!(f, "network error: {}", msg),
            StoreFault::Timeout(msg) => write!(f, "operation timed out: {}", msg),
            StoreFault::Command {
                code,
                name: Some(name),
                message,
            } => write!(f, "command failed ({} {}): {}", code, name, message),
            StoreFault::Command { code, message, .. } => {
                write!(f, "command failed ({}): {}", code, message)
            }
            StoreFault::Write {
                write_errors,
                write_concern,
            } => {
                write!(f, "write failed: {} item error(s)", write_errors.len())?;
                if write_concern.is_some() {
                    write!(f, ", write concern error")?;
                }
                Ok(())
            }
            StoreFault::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for StoreFault {}

impl StoreFault {
    pub fn command(code: i32, message: impl Into<String>) -> Self {
        StoreFault::Command {
            code,
            name: None,
            message: message.into(),
        }
    }

    /// Builds a write fault from bare per-item codes and an optional
    /// write-concern code.
    pub fn write(item_codes: &[i32], write_concern: Option<i32>) -> Self {
        StoreFault::Write {
            write_errors: item_codes
                .iter()
                .enumerate()
                .map(|(index, &code)| WriteItemError {
                    index,
                    code,
                    message: format!("write error {code}"),
                })
                .collect(),
            write_concern: write_concern.map(|code| WriteConcernError {
                code,
                message: format!("write concern error {code}"),
            }),
        }
    }
}

/// Server codes considered safe to retry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetryableCodes {
    codes: BTreeSet<i32>,
}

impl RetryableCodes {
    /// The documented retryable-write error codes.
    pub const DEFAULT: [(i32, &'static str); 12] = [
        (6, "HostUnreachable"),
        (7, "HostNotFound"),
        (89, "NetworkTimeout"),
        (91, "ShutdownInProgress"),
        (189, "PrimarySteppedDown"),
        (262, "ExceededTimeLimit"),
        (9001, "SocketException"),
        (10107, "NotWritablePrimary"),
        (11600, "InterruptedAtShutdown"),
        (11602, "InterruptedDueToReplStateChange"),
        (13435, "NotPrimaryNoSecondaryOk"),
        (13436, "NotPrimaryOrSecondary"),
    ];

    /// An empty table. Only transport faults will classify as transient.
    pub fn empty() -> Self {
        Self {
            codes: BTreeSet::new(),
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.codes.insert(code);
        self
    }

    pub fn without_code(mut self, code: i32) -> Self {
        self.codes.remove(&code);
        self
    }

    pub fn extend(&mut self, codes: impl IntoIterator<Item = i32>) {
        self.codes.extend(codes);
    }

    pub fn contains(&self, code: i32) -> bool {
        self.codes.contains(&code)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.codes.iter().copied()
    }
}

impl Default for RetryableCodes {
    fn default() -> Self {
        Self {
            codes: Self::DEFAULT.iter().map(|(code, _)| *code).collect(),
        }
    }
}

impl FromIterator<i32> for RetryableCodes {
    fn from_iter<I: IntoIterator<Item = i32>>(iter: I) -> Self {
        Self {
            codes: iter.into_iter().collect(),
        }
    }
}

/// Decides whether a store failure is transient.
#[derive(Clone, Debug, Default)]
pub struct TransientFaultClassifier {
    codes: RetryableCodes,
}

impl TransientFaultClassifier {
    /// Creates a classifier with the default code table.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_codes(codes: RetryableCodes) -> Self {
        Self { codes }
    }

    pub fn codes(&self) -> &RetryableCodes {
        &self.codes
    }

    /// Returns true when retrying the failed operation is safe. `None` is
    /// never transient.
    pub fn classify(&self, fault: Option<&StoreFault>) -> bool {
        fault.is_some_and(|fault| self.is_transient(fault))
    }

    pub fn is_transient(&self, fault: &StoreFault) -> bool {
        match fault {
            StoreFault::Network(_) | StoreFault::Timeout(_) => true,
            StoreFault::Command { code, .. } => self.codes.contains(*code),
            StoreFault::Write {
                write_errors,
                write_concern,
            } => {
                write_errors.iter().any(|item| self.codes.contains(item.code))
                    || write_concern
                        .as_ref()
                        .is_some_and(|wc| self.codes.contains(wc.code))
            }
            StoreFault::Other(_) => false,
        }
    }

    /// Tags a transient fault with [`Retryable`]; other faults pass through.
    pub fn mark(&self, fault: StoreFault) -> BoxError {
        if self.is_transient(&fault) {
            Box::new(Retryable::new(fault))
        } else {
            Box::new(fault)
        }
    }

    /// Classifies, marks and wraps a fault in one step.
    pub fn to_app_error(
        &self,
        kind: ErrorKind,
        message: impl Into<String>,
        fault: StoreFault,
    ) -> AppError {
        wrap(kind, message, Some(self.mark(fault)))
    }
}
