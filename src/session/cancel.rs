// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, Weak,
    },
};

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    callbacks: Mutex<HashMap<u64, Callback>>,
}

impl Inner {
    fn callbacks(&self) -> MutexGuard<'_, HashMap<u64, Callback>> {
        // Callbacks never panic while the lock is held, but recover anyway.
        self.callbacks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Cooperative cancellation shared between a controller and any number of
/// blocked tasks.
///
/// Blocking waits register a callback with [`CancellationToken::on_cancel`]
/// that unblocks them, typically by releasing the event subscription they
/// are reading from.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the token and run every registered callback. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let callbacks: Vec<Callback> = self.inner.callbacks().drain().map(|(_, f)| f).collect();
        for callback in callbacks {
            callback();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Run `callback` once when the token is cancelled, or right away if it
    /// already is. Dropping the returned registration forgets the callback.
    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) -> CancelRegistration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut callbacks = self.inner.callbacks();
            if !self.is_cancelled() {
                callbacks.insert(id, Box::new(callback));
                return CancelRegistration {
                    inner: Arc::downgrade(&self.inner),
                    id,
                };
            }
        }
        callback();
        CancelRegistration {
            inner: Weak::new(),
            id,
        }
    }
}

/// Keeps a [`CancellationToken::on_cancel`] callback registered while alive.
#[must_use = "dropping the registration forgets the callback"]
pub struct CancelRegistration {
    inner: Weak<Inner>,
    id: u64,
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.callbacks().remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn callbacks_run_once() {
        let token = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let _registration = token.on_cancel(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!token.is_cancelled());
        token.cancel();
        token.clone().cancel();
        assert!(token.is_cancelled());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_registrations_run_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let _registration = token.on_cancel(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_registrations_do_not_run() {
        let token = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        drop(token.on_cancel(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        token.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
