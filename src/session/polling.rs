// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! An [`EventTransport`] for backends that can only be polled.

use crate::{
    errors::{InternalError, Result},
    session::transport::{EventTransport, RegistrationHandle},
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::{channel, Receiver, RecvTimeoutError, Sender},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, error, warn};

/// Default time between two polls of the same subscription.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Events returned by one [`EventSource::poll`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBatch {
    pub events: Vec<Vec<u8>>,
    /// Cursor to pass to the next poll.
    pub next_cursor: u64,
}

/// A feed of named events addressed by a monotonic cursor, such as an HTTP
/// event log.
pub trait EventSource: Send + Sync + 'static {
    /// Events named `event_id` recorded at or after `cursor`.
    fn poll(&self, event_id: &str, cursor: u64) -> Result<EventBatch>;

    /// A cursor positioned after every event recorded so far.
    fn head(&self) -> Result<u64>;
}

struct Poller {
    // Dropping this wakes the polling thread and makes it exit.
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// Delivers events of an [`EventSource`] by polling it from one thread per
/// subscription. New subscriptions only see events recorded after they were
/// made.
pub struct PollingTransport<S: EventSource> {
    source: Arc<S>,
    interval: Duration,
    next_id: AtomicU64,
    pollers: Mutex<HashMap<u64, Poller>>,
}

impl<S: EventSource> PollingTransport<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self::with_interval(source, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_interval(source: Arc<S>, interval: Duration) -> Self {
        Self {
            source,
            interval,
            next_id: AtomicU64::new(0),
            pollers: Mutex::new(HashMap::new()),
        }
    }

    fn pollers(&self) -> MutexGuard<'_, HashMap<u64, Poller>> {
        self.pollers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of subscriptions that still have a polling thread.
    pub fn active_subscriptions(&self) -> usize {
        self.pollers().len()
    }
}

fn poll_loop<S: EventSource>(
    source: Arc<S>,
    event_id: String,
    mut cursor: u64,
    interval: Duration,
    events: Sender<Vec<u8>>,
    stop: Receiver<()>,
) {
    loop {
        match source.poll(&event_id, cursor) {
            Ok(batch) => {
                for event in batch.events {
                    if events.send(event).is_err() {
                        debug!("Subscriber to {event_id} went away");
                        return;
                    }
                }
                cursor = batch.next_cursor;
            }
            Err(e) => warn!("Polling {event_id} failed: {e}"),
        }
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            _ => return,
        }
    }
}

impl<S: EventSource> EventTransport for PollingTransport<S> {
    fn subscribe(&self, event_id: &str) -> Result<(RegistrationHandle, Receiver<Vec<u8>>)> {
        let cursor = self.source.head()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (events_tx, events_rx) = channel();
        let (stop_tx, stop_rx) = channel();

        let source = self.source.clone();
        let name = event_id.to_string();
        let interval = self.interval;
        let thread = thread::Builder::new()
            .name(format!("poll-{event_id}"))
            .spawn(move || poll_loop(source, name, cursor, interval, events_tx, stop_rx))
            .map_err(|e| {
                error!("Failed to spawn polling thread: {e}");
                InternalError::Transport(e.to_string())
            })?;

        self.pollers().insert(
            id,
            Poller {
                stop: stop_tx,
                thread,
            },
        );
        Ok((RegistrationHandle::new(id, event_id), events_rx))
    }

    fn unsubscribe(&self, handle: &RegistrationHandle) {
        let poller = self.pollers().remove(&handle.id());
        if let Some(Poller { stop, thread }) = poller {
            drop(stop);
            if thread.join().is_err() {
                warn!("Polling thread for {} panicked", handle.event_id());
            }
        }
    }
}

impl<S: EventSource> Drop for PollingTransport<S> {
    fn drop(&mut self) {
        let pollers: Vec<Poller> = self.pollers().drain().map(|(_, p)| p).collect();
        for Poller { stop, thread } in pollers {
            drop(stop);
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{
        ledger::{Ledger, CREATE_KEY_SWITCH_TRIGGER},
        memory::InMemoryLedger,
        messages::TRIGGER_EVENT_ID,
    };
    use std::sync::mpsc::TryRecvError;

    fn trigger(ledger: &InMemoryLedger) {
        let json = serde_json::to_vec(&serde_json::json!({
            "resourceID": "r1",
            "keySwitchPK": "AAAA",
        }))
        .unwrap();
        ledger
            .execute(CREATE_KEY_SWITCH_TRIGGER, &[json.as_slice()])
            .unwrap();
    }

    #[test]
    fn polled_events_are_delivered_once() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.put_resource("r1", [0u8; 128], Vec::new());
        trigger(&ledger);

        let transport = PollingTransport::with_interval(ledger.clone(), Duration::from_millis(5));
        let (handle, rx) = transport.subscribe(TRIGGER_EVENT_ID).unwrap();
        trigger(&ledger);
        trigger(&ledger);

        // Only the two triggers published after subscribing arrive.
        for _ in 0..2 {
            rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        transport.unsubscribe(&handle);
        assert_eq!(transport.active_subscriptions(), 0);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
        transport.unsubscribe(&handle);
    }
}
