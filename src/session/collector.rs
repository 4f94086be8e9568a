// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Requester side of a key-switch session.
//!
//! A requester publishes a trigger with [`KeySwitchClient::trigger`] and then
//! collects the participants' results with
//! [`KeySwitchClient::await_results`]. Collection subscribes to the
//! session's result event, catches up on results already stored on the
//! ledger, and then waits for new ones until enough distinct valid shares
//! are in hand, the deadline passes, or the caller cancels. The subscription
//! is released on every one of those exits.
//!
//! Results are accepted only if they belong to the session, come from a
//! rostered participant that has not answered yet (first one wins), and
//! carry a valid share proof. Anything else is logged and dropped.

use crate::{
    ciphertext::{CipherText, Share},
    config::CollectorConfig,
    curve::CurveTrait,
    elgamal::point_decrypt,
    errors::{InternalError, Result},
    keys::{CollectivePublicKey, PrivateKey, PublicKey},
    keyswitch::{share_proof_verify, share_replace},
    resource::SealedResource,
    session::{
        cancel::CancellationToken,
        ledger::{
            Ledger, CREATE_KEY_SWITCH_TRIGGER, GET_ENCRYPTED_KEY, GET_RESOURCE,
            LIST_KEY_SWITCH_RESULTS,
        },
        messages::{result_event_id, KeySwitchResult, KeySwitchTrigger, ListAwaitQuery, SessionId},
        transport::{EventTransport, Subscription},
    },
};
use itertools::Itertools;
use std::{
    collections::HashSet,
    sync::{mpsc::RecvTimeoutError, Arc},
    time::{Duration, Instant},
};
use tracing::{debug, error, info, instrument, warn};

/// A published key-switch session, as seen by the requester that
/// triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySwitchRequest<C: CurveTrait> {
    session_id: SessionId,
    resource_id: String,
    target: PublicKey<C>,
}

impl<C: CurveTrait> KeySwitchRequest<C> {
    /// Describe a session that was triggered elsewhere.
    pub fn new(session_id: SessionId, resource_id: impl Into<String>, target: PublicKey<C>) -> Self {
        Self {
            session_id,
            resource_id: resource_id.into(),
            target,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn target(&self) -> &PublicKey<C> {
        &self.target
    }
}

/// Accumulates the distinct valid results of one session.
struct ShareCollector<'a, C: CurveTrait> {
    request: &'a KeySwitchRequest<C>,
    encrypted_k: &'a C,
    roster: &'a CollectivePublicKey<C>,
    seen: HashSet<PublicKey<C>>,
    accepted: Vec<KeySwitchResult<C>>,
}

impl<'a, C: CurveTrait> ShareCollector<'a, C> {
    fn new(
        request: &'a KeySwitchRequest<C>,
        encrypted_key: &'a CipherText<C>,
        roster: &'a CollectivePublicKey<C>,
    ) -> Self {
        Self {
            request,
            encrypted_k: encrypted_key.k(),
            roster,
            seen: HashSet::new(),
            accepted: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.accepted.len()
    }

    fn offer_bytes(&mut self, payload: &[u8]) -> bool {
        match serde_json::from_slice::<KeySwitchResult<C>>(payload) {
            Ok(result) => self.offer(result),
            Err(e) => {
                warn!("Dropping malformed key-switch result: {e}");
                false
            }
        }
    }

    /// Returns whether `result` was accepted.
    fn offer(&mut self, result: KeySwitchResult<C>) -> bool {
        let participant = result.participant_pk;
        if result.session_id != self.request.session_id {
            warn!(
                "Dropping result for session {} while collecting {}",
                result.session_id, self.request.session_id
            );
            return false;
        }
        if !self.roster.contains(&participant) {
            warn!(
                "Dropping result from {}, which is not a participant",
                participant.fingerprint()
            );
            return false;
        }
        if self.seen.contains(&participant) {
            debug!(
                "Ignoring duplicate result from {}",
                participant.fingerprint()
            );
            return false;
        }
        if !share_proof_verify(
            &result.zk_proof,
            &result.share,
            &participant,
            &self.request.target,
            self.encrypted_k,
        ) {
            warn!(
                "Dropping result from {}: {}",
                participant.fingerprint(),
                InternalError::CryptoVerificationFailed
            );
            return false;
        }
        self.seen.insert(participant);
        self.accepted.push(result);
        debug!(
            "Accepted share {} for session {}",
            self.accepted.len(),
            self.request.session_id
        );
        true
    }

    /// The first `limit` accepted results, in arrival order.
    fn into_results(mut self, limit: usize) -> Vec<KeySwitchResult<C>> {
        self.accepted.truncate(limit);
        self.accepted
    }
}

/// A requester's handle on the ledger.
pub struct KeySwitchClient<C: CurveTrait> {
    config: CollectorConfig<C>,
    ledger: Arc<dyn Ledger>,
    transport: Arc<dyn EventTransport>,
}

impl<C: CurveTrait> KeySwitchClient<C> {
    pub fn new(
        config: CollectorConfig<C>,
        ledger: Arc<dyn Ledger>,
        transport: Arc<dyn EventTransport>,
    ) -> Self {
        Self {
            config,
            ledger,
            transport,
        }
    }

    pub fn config(&self) -> &CollectorConfig<C> {
        &self.config
    }

    /// Publish a trigger asking the participants to switch `resource_id`'s
    /// key to `target`.
    #[instrument(skip_all, err(Debug))]
    pub fn trigger(
        &self,
        resource_id: &str,
        auth_session_id: Option<String>,
        target: &PublicKey<C>,
    ) -> Result<KeySwitchRequest<C>> {
        let trigger = KeySwitchTrigger::new(resource_id, auth_session_id, *target)?;
        let json = serialize!(&trigger)?;
        let tx = self
            .ledger
            .execute(CREATE_KEY_SWITCH_TRIGGER, &[json.as_slice()])?;
        let session_id = SessionId::from(tx);
        info!("Triggered key-switch session {session_id} for resource {resource_id}");
        Ok(KeySwitchRequest::new(session_id, resource_id, *target))
    }

    /// Fetch the encrypted key of a resource.
    pub fn encrypted_key(&self, resource_id: &str) -> Result<CipherText<C>> {
        let bytes = self.ledger.query(GET_ENCRYPTED_KEY, &[resource_id.as_bytes()])?;
        CipherText::try_from_bytes(&bytes)
    }

    /// Every result stored on the ledger for `session_id`, unverified.
    pub fn list_results(&self, session_id: &SessionId) -> Result<Vec<KeySwitchResult<C>>> {
        let json = self
            .ledger
            .query(LIST_KEY_SWITCH_RESULTS, &[session_id.as_str().as_bytes()])?;
        deserialize!(&json)
    }

    /// Wait for `num_expected` distinct valid results of `request`.
    ///
    /// `timeout` defaults to the configured one. Fails with
    /// [`InternalError::GatewayTimeout`] when the deadline passes first and
    /// with [`InternalError::Cancelled`] when `cancel` fires.
    #[instrument(skip_all, err(Debug))]
    pub fn await_results(
        &self,
        request: &KeySwitchRequest<C>,
        num_expected: usize,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Vec<KeySwitchResult<C>>> {
        let encrypted_key = self.encrypted_key(request.resource_id())?;
        self.collect(request, &encrypted_key, num_expected, timeout, cancel)
    }

    /// The list-await query: the shares of the first `numExpected` valid
    /// results. They serialize as a JSON array of base64 strings.
    pub fn list_await(
        &self,
        request: &KeySwitchRequest<C>,
        query: &ListAwaitQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Share<C>>> {
        let results = self.await_results(request, query.num_expected, query.timeout, cancel)?;
        Ok(results.into_iter().map(|r| r.share).collect())
    }

    fn collect(
        &self,
        request: &KeySwitchRequest<C>,
        encrypted_key: &CipherText<C>,
        num_expected: usize,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Vec<KeySwitchResult<C>>> {
        let roster = self.config.roster();
        if num_expected == 0 || num_expected > roster.participants() {
            error!(
                "Cannot wait for {num_expected} shares from {} participants",
                roster.participants()
            );
            Err(InternalError::invalid_input(
                "numExpected must be between 1 and the number of participants",
            ))?;
        }
        let timeout = timeout.unwrap_or(self.config.default_timeout());
        let deadline = Instant::now() + timeout;

        let subscription =
            Subscription::open(self.transport.clone(), &result_event_id(request.session_id()))?;
        let _release = subscription.release_on_cancel(cancel);
        let mut collector = ShareCollector::new(request, encrypted_key, roster);

        // Results published before we subscribed are only on the ledger.
        let stored: Result<Vec<serde_json::Value>> = self
            .ledger
            .query(LIST_KEY_SWITCH_RESULTS, &[request.session_id().as_str().as_bytes()])
            .map_err(InternalError::from)
            .and_then(|json| deserialize!(&json));
        match stored {
            Ok(stored) => {
                for value in stored {
                    if collector.len() == num_expected {
                        break;
                    }
                    match serde_json::from_value(value) {
                        Ok(result) => {
                            collector.offer(result);
                        }
                        Err(e) => warn!("Dropping malformed stored result: {e}"),
                    }
                }
            }
            Err(InternalError::NotImplemented(_)) => {
                debug!("Ledger cannot list results; relying on events only");
            }
            Err(e) => return Err(e),
        }

        while collector.len() < num_expected {
            if cancel.is_cancelled() {
                info!("Key-switch session {} cancelled", request.session_id());
                return Err(InternalError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let timed_out = InternalError::GatewayTimeout {
                expected: num_expected,
                received: collector.len(),
            };
            if remaining.is_zero() {
                warn!("Key-switch session {} timed out", request.session_id());
                return Err(timed_out);
            }
            match subscription.recv_timeout(remaining) {
                Ok(payload) => {
                    collector.offer_bytes(&payload);
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!("Key-switch session {} timed out", request.session_id());
                    return Err(timed_out);
                }
                Err(RecvTimeoutError::Disconnected) if cancel.is_cancelled() => {
                    info!("Key-switch session {} cancelled", request.session_id());
                    return Err(InternalError::Cancelled);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    error!("Result stream of {} closed", request.session_id());
                    return Err(InternalError::Transport("result stream closed".into()));
                }
            }
        }

        info!(
            "Collected {num_expected} shares for session {}",
            request.session_id()
        );
        Ok(collector.into_results(num_expected))
    }

    /// Fold one result from every participant into `encrypted_key` and
    /// decrypt it with the target's private key.
    pub fn recover_key_point(
        &self,
        encrypted_key: &CipherText<C>,
        results: &[KeySwitchResult<C>],
        target_sk: &PrivateKey<C>,
    ) -> Result<C> {
        let roster = self.config.roster();
        let complete = results.len() == roster.participants()
            && results.iter().map(|r| r.participant_pk).all_unique()
            && results.iter().all(|r| roster.contains(&r.participant_pk));
        if !complete {
            error!(
                "Recovering a key point needs one share from each of the {} participants",
                roster.participants()
            );
            Err(InternalError::invalid_input(
                "results must hold one share per participant",
            ))?;
        }
        let shares: Vec<Share<C>> = results.iter().map(|r| r.share).collect();
        let switched = share_replace(&shares, encrypted_key)?;
        Ok(point_decrypt(&switched, target_sk))
    }

    /// Run the rest of a session end to end: collect every participant's
    /// share, recover the resource key point and open the sealed resource.
    #[instrument(skip_all, err(Debug))]
    pub fn decrypt_resource(
        &self,
        request: &KeySwitchRequest<C>,
        target_sk: &PrivateKey<C>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        if &target_sk.public_key() != request.target() {
            error!("The private key does not belong to the session's target");
            Err(InternalError::invalid_input(
                "target private key does not match the request",
            ))?;
        }
        let encrypted_key = self.encrypted_key(request.resource_id())?;
        let participants = self.config.roster().participants();
        let results = self.collect(request, &encrypted_key, participants, timeout, cancel)?;
        let key_point = self.recover_key_point(&encrypted_key, &results, target_sk)?;

        let sealed = self
            .ledger
            .query(GET_RESOURCE, &[request.resource_id().as_bytes()])?;
        SealedResource::<C>::from_json(&sealed)?.open_with_key_point(&key_point)
    }
}
