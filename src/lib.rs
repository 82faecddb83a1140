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

//! Bluetooth Phonebook Access Profile server.
//!
//! Accepts incoming PBAP clients, decides per device whether they may
//! connect, and runs one OBEX session at a time while holding the host
//! awake. All decisions are made on a single event loop; see [`service`].

pub mod bluetooth;
pub mod config;
pub mod error;
pub mod events;
pub mod obex;
pub mod policy;
pub mod service;
pub mod session;
pub mod state;

pub use error::{PbapError, Result};
pub use events::{AdapterState, EventSender, ServiceMessage, StopReason, TimerKind};
pub use service::{spawn, Collaborators, ServiceHandle, ServiceOptions};
pub use state::{PbapState, SessionStatus, StateListener};
