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

//! Session coordinator.
//!
//! Owns the single session, the transport, the power lock, the listener and
//! the discovery record. Everything here runs on the service loop.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::auth::AuthGate;
use super::power::{PowerLock, PowerResource};
use super::timer::Scheduler;
use crate::bluetooth::{
    BoxedSocket, CapabilityVersion, ConnectionListener, RecordBackend, RecordProfile,
    RemoteDevice, ServiceRegistry,
};
use crate::error::{PbapError, Result};
use crate::events::{EventSender, ServiceMessage, StopReason, TimerKind};
use crate::obex::{ObexSessionParams, TransportHandle, TransportSession};
use crate::service::ServiceOptions;
use crate::state::{PbapState, SessionStatus, StateListener};

/// Identifiers shared with the transport for the lifetime of the service.
///
/// Created fresh each time the service starts. The remote name is cleared
/// whenever a session stops.
#[derive(Debug)]
pub struct SessionContext {
    capability_version: Arc<CapabilityVersion>,
    local_name: String,
    remote_name: Option<String>,
}

impl SessionContext {
    pub fn new(capability_version: Arc<CapabilityVersion>, local_name: impl Into<String>) -> Self {
        Self {
            capability_version,
            local_name: local_name.into(),
            remote_name: None,
        }
    }

    pub fn capability_version(&self) -> u64 {
        self.capability_version.get()
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn remote_name(&self) -> Option<&str> {
        self.remote_name.as_deref()
    }

    fn set_remote_name(&mut self, name: &str) {
        self.remote_name = Some(name.to_string());
    }

    fn clear_remote_name(&mut self) {
        self.remote_name = None;
    }
}

/// Collaborators owned by the coordinator, handed back when the loop stops.
pub struct CoordinatorParts {
    pub listener: Box<dyn ConnectionListener>,
    pub transport: Box<dyn TransportSession>,
    pub power: Box<dyn PowerResource>,
    pub records: Box<dyn RecordBackend>,
    pub state_listener: Option<Arc<dyn StateListener>>,
}

struct Session {
    id: u64,
    device: RemoteDevice,
    socket: BoxedSocket,
    transport: Option<TransportHandle>,
    gate: Option<Arc<AuthGate>>,
}

pub struct Coordinator {
    events: EventSender,
    state: PbapState,
    session: Option<Session>,
    next_session_id: u64,
    transport: Box<dyn TransportSession>,
    power: PowerLock,
    listener: Box<dyn ConnectionListener>,
    registry: ServiceRegistry,
    status: Arc<SessionStatus>,
    state_listener: Option<Arc<dyn StateListener>>,
    context: SessionContext,
    service_name: String,
    record_profile: RecordProfile,
    release_power_delay: Duration,
    adapter_enabled: bool,
    interrupted: bool,
}

impl Coordinator {
    pub fn new(
        parts: CoordinatorParts,
        options: &ServiceOptions,
        events: EventSender,
        status: Arc<SessionStatus>,
    ) -> Self {
        Self {
            events,
            state: PbapState::Disconnected,
            session: None,
            next_session_id: 1,
            transport: parts.transport,
            power: PowerLock::new(parts.power),
            listener: parts.listener,
            registry: ServiceRegistry::new(parts.records, options.capability_version.clone()),
            status,
            state_listener: parts.state_listener,
            context: SessionContext::new(
                options.capability_version.clone(),
                options.local_name.clone(),
            ),
            service_name: options.service_name.clone(),
            record_profile: options.record_profile,
            release_power_delay: options.release_power_delay,
            adapter_enabled: options.adapter_enabled,
            interrupted: false,
        }
    }

    pub fn state(&self) -> PbapState {
        self.state
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Device of the current session.
    pub fn device(&self) -> Option<&RemoteDevice> {
        self.session.as_ref().map(|s| &s.device)
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn adapter_enabled(&self) -> bool {
        self.adapter_enabled
    }

    pub fn set_adapter_enabled(&mut self, enabled: bool) {
        self.adapter_enabled = enabled;
    }

    fn set_state(&mut self, device: Option<&RemoteDevice>, state: PbapState) {
        let previous = self.state;
        if previous == state {
            return;
        }
        self.state = state;

        self.status.on_state_changed(device, previous, state);
        if let Some(listener) = &self.state_listener {
            listener.on_state_changed(device, previous, state);
        }
    }

    /// Take ownership of an accepted socket. Hands it back if a session
    /// already exists.
    pub fn attach(
        &mut self,
        device: RemoteDevice,
        socket: BoxedSocket,
    ) -> std::result::Result<(), BoxedSocket> {
        if self.session.is_some() {
            return Err(socket);
        }

        let id = self.next_session_id;
        self.next_session_id += 1;
        debug!("Session {} attached for {}", id, device);
        self.session = Some(Session {
            id,
            device,
            socket,
            transport: None,
            gate: None,
        });
        Ok(())
    }

    /// Mark the attached session as waiting for the user.
    pub fn await_authorization(&mut self) {
        let device = self.session.as_ref().map(|s| s.device.clone());
        self.set_state(device.as_ref(), PbapState::AwaitingAuthorization);
    }

    /// Open the transport over the attached socket.
    ///
    /// On failure the session stays attached; the caller refuses it with
    /// [`Coordinator::stop`].
    pub fn start(&mut self, scheduler: &mut Scheduler) -> Result<()> {
        let session = self.session.as_mut().ok_or(PbapError::NoSocket)?;
        if session.transport.is_some() {
            warn!("Session {} already started", session.id);
            return Ok(());
        }

        let gate = Arc::new(AuthGate::new());
        let params = ObexSessionParams {
            device: session.device.clone(),
            gate: gate.clone(),
            events: self.events.clone(),
            local_name: self.context.local_name().to_string(),
            capability_version: self.context.capability_version(),
        };

        let handle = self.transport.open(session.socket.as_mut(), params)?;
        session.transport = Some(handle);
        session.gate = Some(gate);

        let device = session.device.clone();
        info!("Session {} connected to {}", session.id, device);
        self.context.set_remote_name(device.display_name());

        self.power.acquire();
        self.set_state(Some(&device), PbapState::Connected);
        scheduler.arm_once(TimerKind::ReleasePower, self.release_power_delay);
        Ok(())
    }

    /// Tear down the session and listen again. No-op when there is none.
    pub async fn stop(&mut self, reason: StopReason, scheduler: &mut Scheduler) {
        if self.session.is_none() && self.state == PbapState::Disconnected {
            debug!("Stop ({:?}) with no session", reason);
            return;
        }

        scheduler.cancel(TimerKind::ReleasePower);
        scheduler.cancel(TimerKind::AuthTimeout);
        self.power.release();

        let mut device = None;
        if let Some(mut session) = self.session.take() {
            info!(
                "Stopping session {} with {} ({:?})",
                session.id,
                self.context.remote_name().unwrap_or("unnamed device"),
                reason
            );
            if let Some(gate) = session.gate.take() {
                gate.close();
            }
            if let Some(handle) = session.transport.take() {
                self.transport.close(handle);
            }
            if let Err(e) = session.socket.close() {
                warn!("Failed to close socket: {}", e);
            }
            device = Some(session.device);
        }

        self.context.clear_remote_name();
        self.set_state(device.as_ref(), PbapState::Disconnected);
        self.relisten().await;
    }

    /// Accept the next connection, or shut down if the adapter is off.
    pub async fn relisten(&mut self) {
        if self.interrupted {
            debug!("Not listening again, service is stopping");
            return;
        }
        if !self.adapter_enabled {
            info!("Adapter disabled, shutting down");
            self.events.post(ServiceMessage::Shutdown);
            return;
        }

        if self.listener.is_running() {
            self.listener.prepare_for_new_connect();
        } else {
            self.start_listener().await;
        }
    }

    /// Create the listener and its discovery record if not running.
    pub async fn start_listener(&mut self) {
        if self.listener.is_running() {
            debug!("Listener already running");
            return;
        }

        let channels = match self.listener.start(self.events.clone()).await {
            Ok(channels) => channels,
            Err(e) => {
                error!("Failed to start listener: {}", e);
                return;
            }
        };

        let record = self.record_profile.record(
            &self.service_name,
            channels.rfcomm_channel,
            channels.l2cap_psm,
        );
        if let Err(e) = self.registry.register(record).await {
            warn!("Continuing without a discovery record: {}", e);
        }
    }

    /// The accept loop died; recreate it unless shutting down.
    pub async fn accept_failed(&mut self) {
        self.listener.shutdown(true);
        if self.interrupted {
            debug!("Accept failure during shutdown ignored");
            return;
        }
        warn!("Listener failed, restarting");
        self.relisten().await;
    }

    /// Hold power and push back the trailing release.
    pub fn acquire_power(&mut self, scheduler: &mut Scheduler) {
        if self.state == PbapState::Disconnected {
            debug!("Ignoring power request with no session");
            return;
        }
        self.power.acquire();
        scheduler.arm_once(TimerKind::ReleasePower, self.release_power_delay);
    }

    pub fn release_power(&mut self) {
        self.power.release();
    }

    /// Whether `handle` is the transport of the current session.
    pub fn is_current_transport(&self, handle: TransportHandle) -> bool {
        self.session
            .as_ref()
            .and_then(|s| s.transport)
            .is_some_and(|current| current == handle)
    }

    /// Answer the session's password challenge `challenge`.
    pub fn deliver_session_key(&mut self, challenge: u64, key: Option<String>) -> bool {
        match self.session.as_ref().and_then(|s| s.gate.as_ref()) {
            Some(gate) => gate.deliver(challenge, key),
            None => false,
        }
    }

    /// Cancel the session's password challenge `challenge`.
    pub fn cancel_challenge(&mut self, challenge: u64) -> bool {
        match self.session.as_ref().and_then(|s| s.gate.as_ref()) {
            Some(gate) => gate.cancel(challenge),
            None => false,
        }
    }

    /// Stop everything and refuse to listen again.
    pub async fn shutdown(&mut self, scheduler: &mut Scheduler) {
        self.interrupted = true;
        self.stop(StopReason::Shutdown, scheduler).await;

        self.registry.deregister().await;
        self.power.release();
        self.listener.shutdown(false);
        self.context.clear_remote_name();
    }

    pub fn into_parts(self) -> CoordinatorParts {
        CoordinatorParts {
            listener: self.listener,
            transport: self.transport,
            power: self.power.into_inner(),
            records: self.registry.into_backend(),
            state_listener: self.state_listener,
        }
    }
}
