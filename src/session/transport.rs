// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Named ledger events delivered as streams of opaque payloads.

use crate::{
    errors::Result,
    session::cancel::{CancelRegistration, CancellationToken},
};
use std::{
    sync::{
        mpsc::{Receiver, RecvError, RecvTimeoutError},
        Arc,
    },
    time::Duration,
};
use tracing::trace;

/// Identifies one subscription of an [`EventTransport`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrationHandle {
    id: u64,
    event_id: String,
}

impl RegistrationHandle {
    pub fn new(id: u64, event_id: impl Into<String>) -> Self {
        Self {
            id,
            event_id: event_id.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }
}

/// Subscribe to named events.
///
/// Implementations may push events from a direct ledger feed or pull them by
/// polling; consumers cannot tell the difference.
pub trait EventTransport: Send + Sync {
    /// Start receiving payloads of events named `event_id`.
    fn subscribe(&self, event_id: &str) -> Result<(RegistrationHandle, Receiver<Vec<u8>>)>;

    /// Stop the subscription and close its stream. Unknown or already
    /// released handles are ignored.
    fn unsubscribe(&self, handle: &RegistrationHandle);
}

/// A subscription that is released when dropped.
pub struct Subscription {
    transport: Arc<dyn EventTransport>,
    handle: RegistrationHandle,
    events: Receiver<Vec<u8>>,
}

impl Subscription {
    pub fn open(transport: Arc<dyn EventTransport>, event_id: &str) -> Result<Self> {
        let (handle, events) = transport.subscribe(event_id)?;
        trace!("Subscribed to {event_id} as #{}", handle.id());
        Ok(Self {
            transport,
            handle,
            events,
        })
    }

    pub fn handle(&self) -> &RegistrationHandle {
        &self.handle
    }

    /// Release this subscription when `token` is cancelled, which wakes any
    /// thread blocked on it.
    pub fn release_on_cancel(&self, token: &CancellationToken) -> CancelRegistration {
        let transport = self.transport.clone();
        let handle = self.handle.clone();
        token.on_cancel(move || transport.unsubscribe(&handle))
    }

    /// Block until the next payload arrives or the stream closes.
    pub fn recv(&self) -> std::result::Result<Vec<u8>, RecvError> {
        self.events.recv()
    }

    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<Vec<u8>, RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        trace!(
            "Releasing subscription #{} to {}",
            self.handle.id(),
            self.handle.event_id()
        );
        self.transport.unsubscribe(&self.handle);
    }
}
