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

//! Messages accepted by the service event loop.
//!
//! Every input (accepts, user replies, timers, adapter and link events, the
//! OBEX worker) is turned into a [`ServiceMessage`] and posted through an
//! [`EventSender`]. The loop processes them one at a time, in arrival order.

use tokio::sync::mpsc;
use tracing::debug;

use crate::bluetooth::{BoxedSocket, RemoteDevice};
use crate::obex::TransportHandle;
use crate::policy::{AccessDecision, RequestType};

/// Single-shot timers owned by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// No reply to an access request.
    UserTimeout,
    /// No session key entered for an OBEX password challenge.
    AuthTimeout,
    /// Trailing release of the power resource.
    ReleasePower,
}

/// Local adapter power transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    On,
    TurningOff,
    Off,
}

/// Why a session is being stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Transport closed or the peer disconnected.
    Normal,
    /// Access refused: policy, user reply, timeout, link loss or open failure.
    Refused,
    /// Disconnect requested by the host.
    HostRequest,
    /// Service teardown.
    Shutdown,
}

/// Input to the service event loop.
#[derive(Debug)]
pub enum ServiceMessage {
    /// Begin or resume accepting connections.
    StartListener,
    /// A connection was accepted by the listener.
    Incoming {
        device: RemoteDevice,
        socket: BoxedSocket,
    },
    /// The accept loop failed and the listener is gone.
    AcceptFailed,
    /// Reply from the external authority to an access request.
    AccessReply {
        decision: AccessDecision,
        persist: bool,
        request_type: RequestType,
    },
    /// The baseband link to a remote device went down.
    AclDisconnected(RemoteDevice),
    /// The local adapter changed power state.
    AdapterState(AdapterState),
    /// The OBEX worker is blocked on password challenge `challenge`.
    ObexAuthChallenge { challenge: u64 },
    /// The user entered a session key for `challenge`.
    AuthResponse {
        challenge: u64,
        session_key: Option<String>,
    },
    /// The user dismissed the session key prompt for `challenge`.
    AuthCancelled { challenge: u64 },
    /// A scheduled timer fired.
    Timer { kind: TimerKind, generation: u64 },
    /// The OBEX session served on this transport ended.
    SessionClose(TransportHandle),
    /// OBEX CONNECT completed. Observability only.
    SessionEstablished,
    /// OBEX DISCONNECT received. Observability only.
    SessionDisconnected,
    /// The transport is busy; hold power and push back the trailing release.
    AcquirePower(TransportHandle),
    /// Host-initiated disconnect of the connected session.
    Disconnect,
    /// Tear everything down and stop the loop.
    Shutdown,
}

impl ServiceMessage {
    /// Short tag for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartListener => "START_LISTENER",
            Self::Incoming { .. } => "INCOMING",
            Self::AcceptFailed => "ACCEPT_FAILED",
            Self::AccessReply { .. } => "ACCESS_REPLY",
            Self::AclDisconnected(_) => "ACL_DISCONNECTED",
            Self::AdapterState(_) => "ADAPTER_STATE",
            Self::ObexAuthChallenge { .. } => "OBEX_AUTH_CHALL",
            Self::AuthResponse { .. } => "AUTH_RESPONSE",
            Self::AuthCancelled { .. } => "AUTH_CANCELLED",
            Self::Timer {
                kind: TimerKind::UserTimeout,
                ..
            } => "USER_TIMEOUT",
            Self::Timer {
                kind: TimerKind::AuthTimeout,
                ..
            } => "AUTH_TIMEOUT",
            Self::Timer {
                kind: TimerKind::ReleasePower,
                ..
            } => "RELEASE_POWER",
            Self::SessionClose(_) => "SESSION_CLOSE",
            Self::SessionEstablished => "SESSION_ESTABLISHED",
            Self::SessionDisconnected => "SESSION_DISCONNECTED",
            Self::AcquirePower(_) => "ACQUIRE_POWER",
            Self::Disconnect => "DISCONNECT",
            Self::Shutdown => "SHUTDOWN",
        }
    }
}

/// Cloneable handle for posting messages to the loop from any thread.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ServiceMessage>,
}

impl EventSender {
    /// Create a sender and the receiver the loop reads from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServiceMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Post a message. Returns false if the loop has stopped.
    pub fn post(&self, message: ServiceMessage) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(e) => {
                debug!("Service loop stopped, dropping {}", e.0.name());
                false
            }
        }
    }

    /// Whether the loop is still receiving.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
