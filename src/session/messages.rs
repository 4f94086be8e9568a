// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! JSON objects exchanged through the ledger.
//!
//! Byte fields (keys, shares, proofs) are carried as base64 strings of their
//! fixed-width encodings.

use crate::{
    ciphertext::Share,
    curve::CurveTrait,
    errors::{InternalError, Result},
    keys::PublicKey,
    keyswitch::ShareProof,
    session::ledger::TransactionId,
};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    time::Duration,
};
use tracing::error;

/// Event carrying every newly published trigger.
pub const TRIGGER_EVENT_ID: &str = "keyswitch_trigger";

/// Event carrying the results of one session.
pub fn result_event_id(session: &SessionId) -> String {
    format!("keyswitch_result_{session}")
}

/// Identifies one key-switch session. It is the id of the transaction that
/// published the session's trigger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<TransactionId> for SessionId {
    fn from(tx: TransactionId) -> Self {
        Self(tx.as_str().to_string())
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A requester's intent to decrypt one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "C: CurveTrait")]
pub struct KeySwitchTrigger<C: CurveTrait> {
    #[serde(rename = "resourceID")]
    pub resource_id: String,
    #[serde(
        rename = "authSessionID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub auth_session_id: Option<String>,
    /// One-time public key the resource key is switched to.
    #[serde(rename = "keySwitchPK")]
    pub key_switch_pk: PublicKey<C>,
}

impl<C: CurveTrait> KeySwitchTrigger<C> {
    pub fn new(
        resource_id: impl Into<String>,
        auth_session_id: Option<String>,
        key_switch_pk: PublicKey<C>,
    ) -> Result<Self> {
        let trigger = Self {
            resource_id: resource_id.into(),
            auth_session_id,
            key_switch_pk,
        };
        trigger.validate()?;
        Ok(trigger)
    }

    /// Reject blank identifiers.
    pub fn validate(&self) -> Result<()> {
        if self.resource_id.trim().is_empty() {
            error!("Key-switch trigger has a blank resource id");
            Err(InternalError::invalid_input("resourceID must not be blank"))?;
        }
        if matches!(&self.auth_session_id, Some(id) if id.trim().is_empty()) {
            error!("Key-switch trigger has a blank auth session id");
            Err(InternalError::invalid_input(
                "authSessionID must not be blank when present",
            ))?;
        }
        Ok(())
    }
}

/// A published trigger as delivered on [`TRIGGER_EVENT_ID`]: the trigger
/// plus the session id the ledger assigned to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "C: CurveTrait")]
pub struct TriggerEvent<C: CurveTrait> {
    #[serde(rename = "keySwitchSessionID")]
    pub session_id: SessionId,
    #[serde(flatten)]
    pub trigger: KeySwitchTrigger<C>,
}

/// One participant's answer to a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "C: CurveTrait")]
pub struct KeySwitchResult<C: CurveTrait> {
    #[serde(rename = "keySwitchSessionID")]
    pub session_id: SessionId,
    pub share: Share<C>,
    #[serde(rename = "zkProof")]
    pub zk_proof: ShareProof<C>,
    #[serde(rename = "participantPK")]
    pub participant_pk: PublicKey<C>,
}

/// Parameters of the `list-await` query: how many shares to wait for and
/// for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListAwaitQuery {
    pub num_expected: usize,
    /// `None` selects the collector's default timeout.
    pub timeout: Option<Duration>,
}

impl ListAwaitQuery {
    /// Validate raw `numExpected` and `timeout` (milliseconds) parameters.
    pub fn parse(num_expected: Option<&str>, timeout_ms: Option<&str>) -> Result<Self> {
        let num_expected = match num_expected.map(str::trim) {
            Some(raw) if !raw.is_empty() => raw.parse::<usize>().map_err(|_| {
                error!("numExpected is not a non-negative integer: {raw}");
                InternalError::invalid_input("numExpected must be a positive integer")
            })?,
            _ => {
                error!("numExpected is missing");
                Err(InternalError::invalid_input("numExpected is required"))?
            }
        };
        if num_expected == 0 {
            error!("numExpected must be positive");
            Err(InternalError::invalid_input(
                "numExpected must be a positive integer",
            ))?;
        }

        let timeout = match timeout_ms.map(str::trim) {
            None | Some("") => None,
            Some(raw) => match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
                _ => {
                    error!("timeout is not a positive number of milliseconds: {raw}");
                    Err(InternalError::invalid_input(
                        "timeout must be a positive number of milliseconds",
                    ))?
                }
            },
        };

        Ok(Self {
            num_expected,
            timeout,
        })
    }

    /// Parse a query string such as `numExpected=3&timeout=100`. Values are
    /// percent-decoded and unknown parameters are ignored.
    pub fn from_query_string(query: &str) -> Result<Self> {
        let raw: RawListAwaitQuery =
            serde_urlencoded::from_str(query.trim_start_matches('?')).map_err(|e| {
                error!("Malformed list-await query {query:?}: {e}");
                InternalError::invalid_input("malformed query string")
            })?;
        Self::parse(raw.num_expected.as_deref(), raw.timeout.as_deref())
    }
}

#[derive(Deserialize)]
struct RawListAwaitQuery {
    #[serde(rename = "numExpected")]
    num_expected: Option<String>,
    timeout: Option<String>,
}
