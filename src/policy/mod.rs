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

//! Access policy: the per-device decision store and the external authority
//! that asks the user.

mod prompt;
mod store;

pub use prompt::ConsolePrompt;
pub use store::JsonPolicyStore;

use serde::{Deserialize, Serialize};

use crate::bluetooth::RemoteDevice;
use crate::error::Result;

/// Per-device phonebook access decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDecision {
    Allowed,
    Rejected,
    #[default]
    Unknown,
}

impl AccessDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Rejected => "rejected",
            Self::Unknown => "unknown",
        }
    }
}

/// Tag carried by access requests so replies for other profiles are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    PhonebookAccess,
    MessageAccess,
    SimAccess,
}

/// Persistent per-device access decisions.
pub trait PolicyStore: Send {
    /// Stored decision, `Unknown` if none.
    fn get(&self, device: &RemoteDevice) -> AccessDecision;

    /// Persist a decision for the device.
    fn set(&mut self, device: &RemoteDevice, decision: AccessDecision) -> Result<()>;
}

/// The user-facing authority that answers access requests.
///
/// All calls are fire-and-forget; answers come back to the loop as
/// [`crate::events::ServiceMessage`]s.
pub trait AccessAuthority: Send {
    /// Ask whether `device` may access the phonebook.
    fn request_access(&mut self, device: &RemoteDevice, request_type: RequestType);

    /// Withdraw an outstanding access request.
    fn cancel_access_request(&mut self, device: &RemoteDevice, request_type: RequestType);

    /// Ask for the session key of OBEX password challenge `challenge`. The
    /// answer must name the same challenge.
    fn request_session_key(&mut self, device: &RemoteDevice, challenge: u64);

    /// Withdraw the session key prompt.
    fn dismiss_session_key_request(&mut self);
}
