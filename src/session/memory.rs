// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! An in-process ledger.
//!
//! [`InMemoryLedger`] stores sealed resources, key-switch triggers and
//! results, and emits the same events a real ledger backend would. It serves
//! as the backend of the demo and the integration tests, and as the
//! [`EventSource`] of a [`PollingTransport`](super::PollingTransport).

use crate::{
    ciphertext::CIPHERTEXT_BYTES,
    errors::Result,
    session::{
        ledger::{
            Ledger, LedgerError, TransactionId, CREATE_KEY_SWITCH_RESULT,
            CREATE_KEY_SWITCH_TRIGGER, GET_ENCRYPTED_KEY, GET_RESOURCE, LIST_KEY_SWITCH_RESULTS,
        },
        messages::{result_event_id, SessionId, TRIGGER_EVENT_ID},
        polling::{EventBatch, EventSource},
        transport::{EventTransport, RegistrationHandle},
    },
};
use serde::Deserialize;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        mpsc::{channel, Receiver, Sender},
        Mutex, MutexGuard,
    },
};
use tracing::{debug, info, trace};
use uuid::Uuid;

struct StoredResource {
    encrypted_key: [u8; CIPHERTEXT_BYTES],
    sealed: Vec<u8>,
    /// Auth sessions allowed to trigger a key switch. `None` means anyone.
    authorized: Option<HashSet<String>>,
}

struct StoredEvent {
    event_id: String,
    payload: Vec<u8>,
}

#[derive(Default)]
struct State {
    resources: HashMap<String, StoredResource>,
    results: HashMap<SessionId, Vec<Vec<u8>>>,
    events: Vec<StoredEvent>,
    subscribers: HashMap<String, Vec<(u64, Sender<Vec<u8>>)>>,
    next_subscription: u64,
}

/// The routing fields the ledger reads from a trigger.
#[derive(Deserialize)]
struct TriggerEnvelope {
    #[serde(rename = "resourceID")]
    resource_id: String,
    #[serde(rename = "authSessionID", default)]
    auth_session_id: Option<String>,
}

/// The routing field the ledger reads from a result.
#[derive(Deserialize)]
struct ResultEnvelope {
    #[serde(rename = "keySwitchSessionID")]
    session_id: SessionId,
}

/// Ledger and event feed held in process memory.
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<State>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a sealed resource whose key is encrypted as `encrypted_key`.
    /// Replaces any resource stored under the same id.
    pub fn put_resource(
        &self,
        resource_id: &str,
        encrypted_key: [u8; CIPHERTEXT_BYTES],
        sealed: Vec<u8>,
    ) {
        info!("Storing resource {resource_id}");
        self.state().resources.insert(
            resource_id.to_string(),
            StoredResource {
                encrypted_key,
                sealed,
                authorized: None,
            },
        );
    }

    /// Restrict key switches of `resource_id` to triggers that present one
    /// of the approved auth sessions.
    pub fn approve_auth_session(
        &self,
        resource_id: &str,
        auth_session_id: &str,
    ) -> std::result::Result<(), LedgerError> {
        let mut state = self.state();
        let resource = state
            .resources
            .get_mut(resource_id)
            .ok_or_else(|| LedgerError::NotFound(format!("resource {resource_id}")))?;
        resource
            .authorized
            .get_or_insert_with(HashSet::new)
            .insert(auth_session_id.to_string());
        Ok(())
    }

    /// Number of events emitted so far under `event_id`.
    pub fn event_count(&self, event_id: &str) -> usize {
        self.state()
            .events
            .iter()
            .filter(|e| e.event_id == event_id)
            .count()
    }

    /// Number of live subscriptions to `event_id`.
    pub fn subscriber_count(&self, event_id: &str) -> usize {
        self.state()
            .subscribers
            .get(event_id)
            .map_or(0, Vec::len)
    }

    fn emit(state: &mut State, event_id: &str, payload: Vec<u8>) {
        if let Some(subscribers) = state.subscribers.get_mut(event_id) {
            // Receivers that went away without unsubscribing are dropped here.
            subscribers.retain(|(_, tx)| tx.send(payload.clone()).is_ok());
        }
        trace!("Emitted {event_id}");
        state.events.push(StoredEvent {
            event_id: event_id.to_string(),
            payload,
        });
    }

    fn create_trigger(&self, args: &[&[u8]]) -> std::result::Result<TransactionId, LedgerError> {
        let raw = single_arg(CREATE_KEY_SWITCH_TRIGGER, args)?;
        let envelope: TriggerEnvelope = serde_json::from_slice(raw)
            .map_err(|e| LedgerError::Other(format!("malformed trigger: {e}")))?;
        let mut fields: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(raw)
            .map_err(|e| LedgerError::Other(format!("malformed trigger: {e}")))?;

        let mut state = self.state();
        let resource = state.resources.get(&envelope.resource_id).ok_or_else(|| {
            LedgerError::NotFound(format!("resource {}", envelope.resource_id))
        })?;
        if let Some(authorized) = &resource.authorized {
            let approved = envelope
                .auth_session_id
                .as_ref()
                .is_some_and(|id| authorized.contains(id));
            if !approved {
                return Err(LedgerError::Forbidden(format!(
                    "no approved auth session for resource {}",
                    envelope.resource_id
                )));
            }
        }

        let tx = TransactionId::new(Uuid::new_v4().to_string());
        let session = SessionId::from(tx.clone());
        fields.insert(
            "keySwitchSessionID".to_string(),
            serde_json::Value::String(session.to_string()),
        );
        let event = serde_json::to_vec(&fields)
            .map_err(|e| LedgerError::Other(format!("cannot encode trigger event: {e}")))?;

        state.results.insert(session.clone(), Vec::new());
        Self::emit(&mut state, TRIGGER_EVENT_ID, event);
        debug!(
            "Created key-switch session {session} for resource {}",
            envelope.resource_id
        );
        Ok(tx)
    }

    fn create_result(&self, args: &[&[u8]]) -> std::result::Result<TransactionId, LedgerError> {
        let raw = single_arg(CREATE_KEY_SWITCH_RESULT, args)?;
        let envelope: ResultEnvelope = serde_json::from_slice(raw)
            .map_err(|e| LedgerError::Other(format!("malformed result: {e}")))?;

        let mut state = self.state();
        let results = state
            .results
            .get_mut(&envelope.session_id)
            .ok_or_else(|| LedgerError::NotFound(format!("session {}", envelope.session_id)))?;
        results.push(raw.to_vec());
        Self::emit(&mut state, &result_event_id(&envelope.session_id), raw.to_vec());
        Ok(TransactionId::new(Uuid::new_v4().to_string()))
    }

    fn list_results(&self, args: &[&[u8]]) -> std::result::Result<Vec<u8>, LedgerError> {
        let session = SessionId::new(utf8_arg(single_arg(LIST_KEY_SWITCH_RESULTS, args)?)?);
        let state = self.state();
        let results = state
            .results
            .get(&session)
            .ok_or_else(|| LedgerError::NotFound(format!("session {session}")))?;
        let values = results
            .iter()
            .map(|r| serde_json::from_slice::<serde_json::Value>(r))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| LedgerError::Other(format!("stored result is corrupt: {e}")))?;
        serde_json::to_vec(&values).map_err(|e| LedgerError::Other(e.to_string()))
    }

    fn resource_field<T>(
        &self,
        function: &str,
        args: &[&[u8]],
        field: impl FnOnce(&StoredResource) -> T,
    ) -> std::result::Result<T, LedgerError> {
        let resource_id = utf8_arg(single_arg(function, args)?)?;
        let state = self.state();
        state
            .resources
            .get(resource_id)
            .map(field)
            .ok_or_else(|| LedgerError::NotFound(format!("resource {resource_id}")))
    }
}

fn single_arg<'a>(
    function: &str,
    args: &[&'a [u8]],
) -> std::result::Result<&'a [u8], LedgerError> {
    match args {
        [arg] => Ok(*arg),
        _ => Err(LedgerError::Other(format!(
            "{function} takes exactly one argument, got {}",
            args.len()
        ))),
    }
}

fn utf8_arg(arg: &[u8]) -> std::result::Result<&str, LedgerError> {
    std::str::from_utf8(arg).map_err(|_| LedgerError::Other("argument is not UTF-8".into()))
}

impl Ledger for InMemoryLedger {
    fn execute(
        &self,
        function: &str,
        args: &[&[u8]],
    ) -> std::result::Result<TransactionId, LedgerError> {
        match function {
            CREATE_KEY_SWITCH_TRIGGER => self.create_trigger(args),
            CREATE_KEY_SWITCH_RESULT => self.create_result(args),
            _ => Err(LedgerError::NotImplemented(function.to_string())),
        }
    }

    fn query(&self, function: &str, args: &[&[u8]]) -> std::result::Result<Vec<u8>, LedgerError> {
        match function {
            GET_ENCRYPTED_KEY => self.resource_field(function, args, |r| r.encrypted_key.to_vec()),
            GET_RESOURCE => self.resource_field(function, args, |r| r.sealed.clone()),
            LIST_KEY_SWITCH_RESULTS => self.list_results(args),
            _ => Err(LedgerError::NotImplemented(function.to_string())),
        }
    }
}

impl EventTransport for InMemoryLedger {
    fn subscribe(&self, event_id: &str) -> Result<(RegistrationHandle, Receiver<Vec<u8>>)> {
        let (tx, rx) = channel();
        let mut state = self.state();
        let id = state.next_subscription;
        state.next_subscription += 1;
        state
            .subscribers
            .entry(event_id.to_string())
            .or_default()
            .push((id, tx));
        Ok((RegistrationHandle::new(id, event_id), rx))
    }

    fn unsubscribe(&self, handle: &RegistrationHandle) {
        let mut state = self.state();
        if let Some(subscribers) = state.subscribers.get_mut(handle.event_id()) {
            // Dropping the sender closes the subscriber's stream.
            subscribers.retain(|(id, _)| *id != handle.id());
            if subscribers.is_empty() {
                state.subscribers.remove(handle.event_id());
            }
        }
    }
}

impl EventSource for InMemoryLedger {
    fn poll(&self, event_id: &str, cursor: u64) -> Result<EventBatch> {
        let state = self.state();
        let start = usize::try_from(cursor).unwrap_or(usize::MAX);
        let events = state
            .events
            .iter()
            .skip(start)
            .filter(|e| e.event_id == event_id)
            .map(|e| e.payload.clone())
            .collect();
        Ok(EventBatch {
            events,
            next_cursor: state.events.len() as u64,
        })
    }

    fn head(&self) -> Result<u64> {
        Ok(self.state().events.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::mpsc::TryRecvError, time::Duration};

    fn ledger_with_resource() -> InMemoryLedger {
        let ledger = InMemoryLedger::new();
        ledger.put_resource("r1", [7u8; CIPHERTEXT_BYTES], b"sealed".to_vec());
        ledger
    }

    fn trigger_json(resource: &str, auth: Option<&str>) -> Vec<u8> {
        let mut json = serde_json::json!({ "resourceID": resource, "keySwitchPK": "AAAA" });
        if let Some(auth) = auth {
            json["authSessionID"] = auth.into();
        }
        serde_json::to_vec(&json).unwrap()
    }

    #[test]
    fn triggers_create_sessions_and_events() {
        let ledger = ledger_with_resource();
        let (_handle, rx) = ledger.subscribe(TRIGGER_EVENT_ID).unwrap();

        let tx = ledger
            .execute(CREATE_KEY_SWITCH_TRIGGER, &[trigger_json("r1", None).as_slice()])
            .unwrap();
        let event: serde_json::Value =
            serde_json::from_slice(&rx.recv_timeout(Duration::from_secs(1)).unwrap()).unwrap();
        assert_eq!(event["keySwitchSessionID"], tx.as_str());
        assert_eq!(event["resourceID"], "r1");

        let list = ledger
            .query(LIST_KEY_SWITCH_RESULTS, &[tx.as_str().as_bytes()])
            .unwrap();
        assert_eq!(list, b"[]");
    }

    #[test]
    fn results_are_routed_by_session() {
        let ledger = ledger_with_resource();
        let tx = ledger
            .execute(CREATE_KEY_SWITCH_TRIGGER, &[trigger_json("r1", None).as_slice()])
            .unwrap();
        let session = SessionId::from(tx);
        let (_handle, rx) = ledger.subscribe(&result_event_id(&session)).unwrap();

        let result = serde_json::to_vec(&serde_json::json!({
            "keySwitchSessionID": session.as_str(),
            "share": "x",
        }))
        .unwrap();
        ledger.execute(CREATE_KEY_SWITCH_RESULT, &[result.as_slice()]).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), result);
        assert_eq!(ledger.event_count(&result_event_id(&session)), 1);

        let orphan = serde_json::to_vec(&serde_json::json!({ "keySwitchSessionID": "nope" }))
            .unwrap();
        assert!(matches!(
            ledger.execute(CREATE_KEY_SWITCH_RESULT, &[orphan.as_slice()]),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn unknown_resources_and_functions_are_classified() {
        let ledger = ledger_with_resource();
        assert!(matches!(
            ledger.execute(
                CREATE_KEY_SWITCH_TRIGGER,
                &[trigger_json("r2", None).as_slice()]
            ),
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            ledger.query(GET_ENCRYPTED_KEY, &[b"r2".as_slice()]),
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            ledger.execute("DeleteEverything", &[]),
            Err(LedgerError::NotImplemented(_))
        ));
        assert_eq!(
            ledger.query(GET_ENCRYPTED_KEY, &[b"r1".as_slice()]).unwrap(),
            vec![7u8; CIPHERTEXT_BYTES]
        );
    }

    #[test]
    fn restricted_resources_need_an_approved_auth_session() {
        let ledger = ledger_with_resource();
        ledger.approve_auth_session("r1", "auth-1").unwrap();
        for auth in [None, Some("auth-2")] {
            assert!(matches!(
                ledger.execute(
                    CREATE_KEY_SWITCH_TRIGGER,
                    &[trigger_json("r1", auth).as_slice()]
                ),
                Err(LedgerError::Forbidden(_))
            ));
        }
        assert!(ledger
            .execute(CREATE_KEY_SWITCH_TRIGGER, &[trigger_json("r1", Some("auth-1")).as_slice()])
            .is_ok());
    }

    #[test]
    fn unsubscribe_closes_the_stream() {
        let ledger = ledger_with_resource();
        let (handle, rx) = ledger.subscribe(TRIGGER_EVENT_ID).unwrap();
        assert_eq!(ledger.subscriber_count(TRIGGER_EVENT_ID), 1);
        ledger.unsubscribe(&handle);
        ledger.unsubscribe(&handle);
        assert_eq!(ledger.subscriber_count(TRIGGER_EVENT_ID), 0);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn polling_returns_events_after_the_cursor() {
        let ledger = ledger_with_resource();
        let start = ledger.head().unwrap();
        ledger
            .execute(CREATE_KEY_SWITCH_TRIGGER, &[trigger_json("r1", None).as_slice()])
            .unwrap();
        let batch = ledger.poll(TRIGGER_EVENT_ID, start).unwrap();
        assert_eq!(batch.events.len(), 1);
        let again = ledger.poll(TRIGGER_EVENT_ID, batch.next_cursor).unwrap();
        assert!(again.events.is_empty());
    }
}
