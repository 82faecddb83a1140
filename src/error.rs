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

//! Error types surfaced by the session manager collaborators.
//!
//! None of these escape the event loop: each one is handled where it occurs
//! (refusal, relisten, or a logged warning).

use thiserror::Error;

/// Errors raised by the session manager and its collaborators.
#[derive(Debug, Error)]
pub enum PbapError {
    /// The OBEX transport could not be brought up on the accepted socket.
    #[error("transport open failed: {0}")]
    TransportOpen(#[source] std::io::Error),

    /// The connection listener could not be created.
    #[error("listener start failed: {0}")]
    ListenerStart(String),

    /// The accept loop died.
    #[error("listener accept failed: {0}")]
    ListenerAccept(String),

    /// The service discovery subsystem refused or is not reachable.
    #[error("service discovery unavailable: {0}")]
    RegistryUnavailable(String),

    /// The persistent access policy could not be written.
    #[error("policy store error: {0}")]
    PolicyStore(String),

    /// The session has no socket to hand to the transport.
    #[error("no socket attached to the session")]
    NoSocket,
}

pub type Result<T, E = PbapError> = std::result::Result<T, E>;
