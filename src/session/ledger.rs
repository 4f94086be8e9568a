// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! The ledger capability consumed by the key-switch session layer.

use crate::errors::InternalError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Publishes a [`KeySwitchTrigger`](super::KeySwitchTrigger). Returns the
/// session id.
pub const CREATE_KEY_SWITCH_TRIGGER: &str = "CreateKeySwitchTrigger";
/// Publishes a [`KeySwitchResult`](super::KeySwitchResult).
pub const CREATE_KEY_SWITCH_RESULT: &str = "CreateKeySwitchResult";
/// Returns the 128-byte encrypted key of a resource.
pub const GET_ENCRYPTED_KEY: &str = "GetEncryptedKey";
/// Returns the sealed resource as JSON.
pub const GET_RESOURCE: &str = "GetResource";
/// Returns every result stored for a session as a JSON array.
pub const LIST_KEY_SWITCH_RESULTS: &str = "ListKeySwitchResults";

const NOT_FOUND_SENTINEL: &str = "~NOTFOUND~";
const FORBIDDEN_SENTINEL: &str = "~FORBIDDEN~";
const NOT_IMPLEMENTED_SENTINEL: &str = "~NOTIMPLEMENTED~";

/// Identifier the ledger assigns to an executed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Classified ledger failure.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    /// Any failure that does not fall in one of the classes above.
    #[error("ledger failure: {0}")]
    Other(String),
}

impl LedgerError {
    /// Classify an error message from a backend that can only report
    /// failures as text, by the sentinel code it ends with.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let trimmed = message.trim_end();
        if let Some(rest) = trimmed.strip_suffix(NOT_FOUND_SENTINEL) {
            LedgerError::NotFound(rest.trim().to_string())
        } else if let Some(rest) = trimmed.strip_suffix(FORBIDDEN_SENTINEL) {
            LedgerError::Forbidden(rest.trim().to_string())
        } else if let Some(rest) = trimmed.strip_suffix(NOT_IMPLEMENTED_SENTINEL) {
            LedgerError::NotImplemented(rest.trim().to_string())
        } else {
            LedgerError::Other(message)
        }
    }

    /// The message a text-only backend would report for this error.
    pub fn to_message(&self) -> String {
        match self {
            LedgerError::NotFound(m) => format!("{m} {NOT_FOUND_SENTINEL}"),
            LedgerError::Forbidden(m) => format!("{m} {FORBIDDEN_SENTINEL}"),
            LedgerError::NotImplemented(m) => format!("{m} {NOT_IMPLEMENTED_SENTINEL}"),
            LedgerError::Other(m) => m.clone(),
        }
    }
}

impl From<LedgerError> for InternalError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(m) => InternalError::NotFound(m),
            LedgerError::Forbidden(m) => InternalError::Forbidden(m),
            LedgerError::NotImplemented(m) => InternalError::NotImplemented(m),
            LedgerError::Other(m) => InternalError::Transport(m),
        }
    }
}

/// Transaction and query access to the shared ledger.
///
/// Arguments and results are opaque bytes; the session layer encodes them as
/// JSON or fixed-width binary.
pub trait Ledger: Send + Sync {
    /// Submit a transaction and return its id.
    fn execute(&self, function: &str, args: &[&[u8]]) -> Result<TransactionId, LedgerError>;

    /// Evaluate a read-only query.
    fn query(&self, function: &str, args: &[&[u8]]) -> Result<Vec<u8>, LedgerError>;
}
