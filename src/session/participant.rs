// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Participant side of a key-switch session.
//!
//! A [`KeySwitchServer`] runs one dispatcher thread and a pool of worker
//! threads:
//!
//! ```text
//!   ledger ──trigger events──▶ dispatcher ──bounded queue──▶ worker 1..n
//!                                                              │
//!   ledger ◀────────────── CreateKeySwitchResult ──────────────┘
//! ```
//!
//! The dispatcher owns the trigger subscription. Each worker fetches the
//! resource's encrypted key, computes its share and proof, and publishes a
//! [`KeySwitchResult`]. A failure to handle one trigger is logged and the
//! worker moves on to the next one.

use crate::{
    ciphertext::CipherText,
    config::ParticipantConfig,
    curve::CurveTrait,
    errors::{InternalError, Result},
    keys::KeyPair,
    keyswitch::{share_cal, share_proof_gen},
    session::{
        cancel::CancellationToken,
        ledger::{Ledger, TransactionId, CREATE_KEY_SWITCH_RESULT, GET_ENCRYPTED_KEY},
        messages::{KeySwitchResult, TriggerEvent, TRIGGER_EVENT_ID},
        transport::{EventTransport, Subscription},
    },
};
use rand::{rngs::StdRng, CryptoRng, RngCore, SeedableRng};
use std::{
    sync::{
        mpsc::{sync_channel, Receiver, SyncSender},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};
use tracing::{debug, error, info, instrument, warn};

/// Compute and publish this participant's answer to one trigger event.
#[instrument(skip_all, err(Debug))]
pub(crate) fn respond_to_trigger<C: CurveTrait, R: RngCore + CryptoRng>(
    key_pair: &KeyPair<C>,
    ledger: &dyn Ledger,
    payload: &[u8],
    rng: &mut R,
) -> Result<TransactionId> {
    let event: TriggerEvent<C> = deserialize!(payload)?;
    event.trigger.validate()?;
    debug!(
        "Answering key-switch session {} for resource {}",
        event.session_id, event.trigger.resource_id
    );

    let encrypted_key = ledger.query(GET_ENCRYPTED_KEY, &[event.trigger.resource_id.as_bytes()])?;
    let encrypted_key = CipherText::<C>::try_from_bytes(&encrypted_key)?;
    let target = &event.trigger.key_switch_pk;

    let (share, randomness) = share_cal(target, encrypted_key.k(), key_pair.private(), rng);
    let zk_proof = share_proof_gen(
        &randomness,
        key_pair.private(),
        &share,
        target,
        encrypted_key.k(),
        rng,
    )?;
    drop(randomness);

    let result = KeySwitchResult {
        session_id: event.session_id,
        share,
        zk_proof,
        participant_pk: *key_pair.public(),
    };
    let json = serialize!(&result)?;
    let tx = ledger.execute(CREATE_KEY_SWITCH_RESULT, &[json.as_slice()])?;
    info!(
        "Published key-switch share for session {} as {tx}",
        result.session_id
    );
    Ok(tx)
}

/// A participant's running key-switch service.
///
/// Dropping the server stops it.
#[derive(Debug)]
pub struct KeySwitchServer {
    cancel: CancellationToken,
    dispatcher: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

type JobQueue = Arc<Mutex<Receiver<Vec<u8>>>>;

impl KeySwitchServer {
    /// Subscribe to trigger events and start the dispatcher and worker
    /// threads. Triggers published after this returns are answered.
    #[instrument(skip_all, err(Debug))]
    pub fn start<C: CurveTrait>(
        config: ParticipantConfig<C>,
        ledger: Arc<dyn Ledger>,
        transport: Arc<dyn EventTransport>,
    ) -> Result<Self> {
        let cancel = CancellationToken::new();
        // Declared before the queue so that, on a failed spawn, the sender is
        // dropped before `server` joins the workers already started.
        let mut server = Self {
            cancel: cancel.clone(),
            dispatcher: None,
            workers: Vec::with_capacity(config.workers()),
        };
        let subscription = Subscription::open(transport, TRIGGER_EVENT_ID)?;
        let (job_tx, job_rx) = sync_channel::<Vec<u8>>(config.queue_capacity());
        let jobs: JobQueue = Arc::new(Mutex::new(job_rx));
        let key_pair = Arc::new(config.key_pair().clone());

        for index in 0..config.workers() {
            let jobs = jobs.clone();
            let key_pair = key_pair.clone();
            let ledger = ledger.clone();
            let cancel = cancel.clone();
            let worker = thread::Builder::new()
                .name(format!("keyswitch-worker-{index}"))
                .spawn(move || worker_loop(index, key_pair, ledger, jobs, cancel))
                .map_err(|e| {
                    error!("Failed to spawn key-switch worker: {e}");
                    InternalError::InternalInvariantFailed
                })?;
            server.workers.push(worker);
        }

        let dispatcher = thread::Builder::new()
            .name("keyswitch-dispatcher".into())
            .spawn(move || dispatch_loop(subscription, job_tx, cancel))
            .map_err(|e| {
                error!("Failed to spawn key-switch dispatcher: {e}");
                InternalError::InternalInvariantFailed
            })?;
        server.dispatcher = Some(dispatcher);

        info!(
            "Key-switch server for {} started with {} workers",
            key_pair.public().fingerprint(),
            config.workers()
        );
        Ok(server)
    }

    /// A token that stops the server when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop accepting triggers, let in-flight work finish, and join every
    /// thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                error!("Key-switch dispatcher panicked");
            }
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Key-switch worker panicked");
            }
        }
    }
}

impl Drop for KeySwitchServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_loop(subscription: Subscription, jobs: SyncSender<Vec<u8>>, cancel: CancellationToken) {
    let _release = subscription.release_on_cancel(&cancel);
    // The stream closes once the subscription is released.
    while let Ok(payload) = subscription.recv() {
        if cancel.is_cancelled() {
            break;
        }
        if jobs.send(payload).is_err() {
            warn!("Every key-switch worker has exited");
            break;
        }
    }
    debug!("Key-switch dispatcher stopped");
}

fn worker_loop<C: CurveTrait>(
    index: usize,
    key_pair: Arc<KeyPair<C>>,
    ledger: Arc<dyn Ledger>,
    jobs: JobQueue,
    cancel: CancellationToken,
) {
    let mut rng = StdRng::from_entropy();
    loop {
        // Hold the lock only while waiting for a job, not while working on it.
        let job = {
            let queue = jobs.lock().unwrap_or_else(|e| e.into_inner());
            queue.recv()
        };
        let Ok(payload) = job else {
            break;
        };
        if cancel.is_cancelled() {
            debug!("Worker {index} dropping a queued trigger during shutdown");
            continue;
        }
        if let Err(e) = respond_to_trigger(&key_pair, ledger.as_ref(), &payload, &mut rng) {
            error!("Worker {index} failed to answer a trigger: {e}");
        }
    }
    debug!("Key-switch worker {index} stopped");
}
