// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Rendezvous between the OBEX worker and the loop for password challenges.
//!
//! The worker opens a challenge, posts `ObexAuthChallenge` and blocks in
//! [`AuthGate::await_reply`]. The loop ends the challenge with exactly one of
//! [`AuthGate::deliver`] or [`AuthGate::cancel`]; whichever comes first wins
//! and later calls for the same challenge are ignored. Every challenge gets a
//! fresh id, and replies naming any other id are dropped.

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// Outcome of a password challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthReply {
    /// The user answered, possibly without a key.
    Accepted { session_key: Option<String> },
    /// Cancelled by the user, the timeout, or session teardown.
    Cancelled,
}

#[derive(Debug, Default)]
struct Challenge {
    id: u64,
    open: bool,
    session_key: Option<String>,
    challenged: bool,
    cancelled: bool,
    closed: bool,
}

impl Challenge {
    fn is_terminal(&self) -> bool {
        self.challenged || self.cancelled
    }

    fn accepts_terminal(&self) -> bool {
        self.open && !self.is_terminal()
    }
}

/// One-slot mailbox guarded by a single mutex and condition variable.
#[derive(Debug, Default)]
pub struct AuthGate {
    slot: Mutex<Challenge>,
    signal: Condvar,
}

impl AuthGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new challenge instance and return its id. `None` once the
    /// gate is closed.
    pub fn open_challenge(&self) -> Option<u64> {
        let mut slot = self.slot.lock();
        if slot.closed {
            return None;
        }
        slot.id += 1;
        slot.open = true;
        slot.session_key = None;
        slot.challenged = false;
        slot.cancelled = false;
        Some(slot.id)
    }

    /// Block until the open challenge is answered or cancelled.
    ///
    /// Returns `Cancelled` immediately if no challenge is open or the gate
    /// has been closed.
    pub fn await_reply(&self) -> AuthReply {
        let mut slot = self.slot.lock();
        while !slot.is_terminal() {
            if !slot.open || slot.closed {
                slot.open = false;
                return AuthReply::Cancelled;
            }
            self.signal.wait(&mut slot);
        }

        let reply = if slot.challenged {
            AuthReply::Accepted {
                session_key: slot.session_key.take(),
            }
        } else {
            AuthReply::Cancelled
        };
        slot.open = false;
        slot.challenged = false;
        slot.cancelled = false;
        reply
    }

    /// Answer challenge `id`. No-op unless it is the open one and has not
    /// ended.
    pub fn deliver(&self, id: u64, session_key: Option<String>) -> bool {
        let mut slot = self.slot.lock();
        if slot.id != id || !slot.accepts_terminal() {
            debug!("Ignoring session key for challenge {}", id);
            return false;
        }
        if session_key.is_some() {
            slot.session_key = session_key;
        }
        slot.challenged = true;
        self.signal.notify_all();
        true
    }

    /// Cancel challenge `id`. Same rules as [`AuthGate::deliver`].
    pub fn cancel(&self, id: u64) -> bool {
        let mut slot = self.slot.lock();
        if slot.id != id || !slot.accepts_terminal() {
            return false;
        }
        slot.cancelled = true;
        self.signal.notify_all();
        true
    }

    /// Cancel any open challenge and refuse all future ones.
    pub fn close(&self) {
        let mut slot = self.slot.lock();
        if slot.accepts_terminal() {
            slot.cancelled = true;
        }
        slot.closed = true;
        self.signal.notify_all();
    }

    /// Whether a challenge is open and unanswered.
    pub fn is_pending(&self) -> bool {
        self.slot.lock().accepts_terminal()
    }
}
