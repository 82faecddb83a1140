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

//! OBEX transport session.

pub mod packet;
mod server;

pub use server::ObexServer;

use std::sync::Arc;

use crate::bluetooth::{RemoteDevice, RemoteSocket};
use crate::error::Result;
use crate::events::EventSender;
use crate::session::AuthGate;

/// Identifies an open transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportHandle(pub u64);

/// What the transport gets when a session opens.
#[derive(Debug, Clone)]
pub struct ObexSessionParams {
    pub device: RemoteDevice,
    pub gate: Arc<AuthGate>,
    pub events: EventSender,
    pub local_name: String,
    pub capability_version: u64,
}

/// Runs the OBEX session over an accepted socket.
pub trait TransportSession: Send {
    /// Take over the socket's stream and start serving it.
    fn open(
        &mut self,
        socket: &mut dyn RemoteSocket,
        params: ObexSessionParams,
    ) -> Result<TransportHandle>;

    /// Stop serving. Unknown or already closed handles are ignored.
    fn close(&mut self, handle: TransportHandle);
}
