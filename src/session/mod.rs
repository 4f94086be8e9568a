// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Key-switch sessions over a shared ledger.
//!
//! # High-level protocol description
//! A session runs in three steps, and the parties only ever talk through the
//! ledger and its event feed:
//! - The requester publishes a [`KeySwitchTrigger`] naming a resource and a
//!   one-time target key. The ledger assigns the session id and emits the
//!   trigger on [`TRIGGER_EVENT_ID`].
//! - Every participant running a [`KeySwitchServer`] observes the trigger,
//!   fetches the resource's encrypted key, computes its share and share
//!   proof, and publishes a [`KeySwitchResult`].
//! - The requester's [`KeySwitchClient`] collects one valid result per
//!   participant, combines the shares and decrypts the resource key with the
//!   target's private key.
//!
//! Results may arrive in any order and more than once. Decryption needs
//! every configured participant to be live and honest within the collector's
//! timeout; a participant that never answers surfaces as a
//! [`GatewayTimeout`](crate::errors::InternalError::GatewayTimeout).

mod cancel;
mod collector;
mod ledger;
mod memory;
mod messages;
mod participant;
mod polling;
mod transport;

pub use cancel::{CancelRegistration, CancellationToken};
pub use collector::{KeySwitchClient, KeySwitchRequest};
pub use ledger::{
    Ledger, LedgerError, TransactionId, CREATE_KEY_SWITCH_RESULT, CREATE_KEY_SWITCH_TRIGGER,
    GET_ENCRYPTED_KEY, GET_RESOURCE, LIST_KEY_SWITCH_RESULTS,
};
pub use memory::InMemoryLedger;
pub use messages::{
    result_event_id, KeySwitchResult, KeySwitchTrigger, ListAwaitQuery, SessionId, TriggerEvent,
    TRIGGER_EVENT_ID,
};
pub use participant::KeySwitchServer;
pub use polling::{EventBatch, EventSource, PollingTransport, DEFAULT_POLL_INTERVAL};
pub use transport::{EventTransport, RegistrationHandle, Subscription};
