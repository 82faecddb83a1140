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

//! Profile state and its observers.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use crate::bluetooth::RemoteDevice;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PbapState {
    #[default]
    Disconnected,
    AwaitingAuthorization,
    Connected,
}

impl PbapState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PbapState::Disconnected => "Disconnected",
            PbapState::AwaitingAuthorization => "Awaiting authorization",
            PbapState::Connected => "Connected",
        }
    }
}

/// Observer of session state transitions.
///
/// Called on the loop, synchronously with the transition, and only when the
/// state actually changed.
pub trait StateListener: Send + Sync {
    fn on_state_changed(
        &self,
        device: Option<&RemoteDevice>,
        previous: PbapState,
        current: PbapState,
    );
}

/// Shared snapshot of the session, readable from any thread.
#[derive(Debug, Default)]
pub struct SessionStatus {
    state: RwLock<PbapState>,
    device: RwLock<Option<RemoteDevice>>,
    sessions_completed: RwLock<u64>,
}

impl SessionStatus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> PbapState {
        *self.state.read()
    }

    /// Device of the current session, if any.
    pub fn client(&self) -> Option<RemoteDevice> {
        self.device.read().clone()
    }

    /// Connected sessions that have since ended.
    pub fn sessions_completed(&self) -> u64 {
        *self.sessions_completed.read()
    }
}

impl StateListener for SessionStatus {
    fn on_state_changed(
        &self,
        device: Option<&RemoteDevice>,
        previous: PbapState,
        current: PbapState,
    ) {
        *self.state.write() = current;
        *self.device.write() = match current {
            PbapState::Disconnected => None,
            _ => device.cloned(),
        };
        if previous == PbapState::Connected && current == PbapState::Disconnected {
            *self.sessions_completed.write() += 1;
        }

        match device {
            Some(device) => info!(
                "{} ({}): {} -> {}",
                device.display_name(),
                device,
                previous.as_str(),
                current.as_str()
            ),
            None => info!("{} -> {}", previous.as_str(), current.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_tracks_transitions() {
        let status = SessionStatus::new();
        let device = RemoteDevice::new("aa:bb:cc:dd:ee:ff").with_name("Phone");

        status.on_state_changed(Some(&device), PbapState::Disconnected, PbapState::Connected);
        assert_eq!(status.state(), PbapState::Connected);
        assert_eq!(status.client(), Some(device.clone()));

        status.on_state_changed(Some(&device), PbapState::Connected, PbapState::Disconnected);
        assert_eq!(status.state(), PbapState::Disconnected);
        assert_eq!(status.client(), None);
        assert_eq!(status.sessions_completed(), 1);
    }

    #[test]
    fn test_refused_request_is_not_a_completed_session() {
        let status = SessionStatus::new();
        let device = RemoteDevice::new("11:22:33:44:55:66");

        status.on_state_changed(
            Some(&device),
            PbapState::Disconnected,
            PbapState::AwaitingAuthorization,
        );
        assert_eq!(status.client(), Some(device.clone()));
        status.on_state_changed(
            Some(&device),
            PbapState::AwaitingAuthorization,
            PbapState::Disconnected,
        );
        assert_eq!(status.sessions_completed(), 0);
    }
}
