// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Error types used throughout the crate.
//!
//! [`InternalError`] is what every fallible operation returns. Mistakes made
//! by the calling application (wrong byte lengths, off-curve points, blank
//! arguments) are reported as [`CallerError`]s wrapped in
//! [`InternalError::CallingApplicationMistake`].

use thiserror::Error;

/// Default result type of the crate.
pub type Result<T> = std::result::Result<T, InternalError>;

/// Errors raised by the library.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InternalError {
    /// The calling application handed us something malformed.
    #[error("caller error: {0}")]
    CallingApplicationMistake(#[from] CallerError),
    /// The requested resource or session does not exist on the ledger.
    #[error("not found: {0}")]
    NotFound(String),
    /// The caller is not authorized to perform this operation.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// The ledger backend does not implement this operation.
    #[error("not implemented: {0}")]
    NotImplemented(String),
    /// The collector deadline elapsed before enough valid shares arrived.
    #[error("gateway timeout: received {received} of {expected} shares")]
    GatewayTimeout {
        /// Number of shares the caller asked for.
        expected: usize,
        /// Number of distinct valid shares collected before the deadline.
        received: usize,
    },
    /// A proof or an authentication tag did not verify.
    #[error("cryptographic verification failed")]
    CryptoVerificationFailed,
    /// Authenticated symmetric decryption failed.
    #[error("authentication failed")]
    AuthenticationFailed,
    /// Point decryption was handed malformed inputs.
    #[error("decryption error")]
    DecryptionError,
    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,
    /// The ledger or event transport failed in an unclassified way.
    #[error("transport failure: {0}")]
    Transport(String),
    /// JSON or byte encoding failed.
    #[error("serialization error")]
    Serialization,
    /// Represents some code assumption that was checked at runtime but failed
    /// to be true.
    #[error("internal invariant failed")]
    InternalInvariantFailed,
}

/// Errors caused by the calling application.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CallerError {
    /// A fixed-width encoding had the wrong length.
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// The only accepted length.
        expected: usize,
        /// The length we were given.
        actual: usize,
    },
    /// A decoded point does not lie on the configured curve.
    #[error("point is not on the configured curve")]
    InvalidPoint,
    /// A decoded scalar is out of range.
    #[error("scalar is not canonical")]
    InvalidScalar,
    /// Malformed arguments: non-positive counts, blank required fields, and
    /// the like.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Failed to deserialize a structured value.
    #[error("deserialization failed")]
    DeserializationFailed,
    /// Sampling a value from a transcript did not succeed within the retry
    /// budget.
    #[error("retry budget exhausted")]
    RetryFailed,
}

impl InternalError {
    /// Shorthand for an [`CallerError::InvalidInput`] error.
    pub(crate) fn invalid_input(msg: impl Into<String>) -> Self {
        InternalError::CallingApplicationMistake(CallerError::InvalidInput(msg.into()))
    }

    /// Whether retrying the same request later could succeed.
    ///
    /// Only a timed-out collection is retryable; every other error is
    /// permanent for the given inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InternalError::GatewayTimeout { .. })
    }

    /// HTTP status code used by the key-switch REST surface.
    pub fn http_status(&self) -> u16 {
        match self {
            InternalError::CallingApplicationMistake(_) => 400,
            InternalError::Forbidden(_) => 403,
            InternalError::NotFound(_) => 404,
            InternalError::NotImplemented(_) => 501,
            InternalError::GatewayTimeout { .. } => 504,
            _ => 500,
        }
    }
}

impl From<serde_json::Error> for InternalError {
    fn from(_: serde_json::Error) -> Self {
        InternalError::Serialization
    }
}

/// Serialize a value to JSON bytes, mapping failures to
/// [`InternalError::Serialization`].
macro_rules! serialize {
    ($x:expr) => {{
        serde_json::to_vec($x).map_err(|_| $crate::errors::InternalError::Serialization)
    }};
}

/// Deserialize a value from JSON bytes, mapping failures to
/// [`CallerError::DeserializationFailed`].
macro_rules! deserialize {
    ($x:expr) => {{
        serde_json::from_slice($x).map_err(|_| {
            $crate::errors::InternalError::CallingApplicationMistake(
                $crate::errors::CallerError::DeserializationFailed,
            )
        })
    }};
}
