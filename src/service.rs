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

//! The service event loop.
//!
//! One task owns admission, the coordinator and the timers, and handles
//! [`ServiceMessage`]s one at a time. Nothing else touches that state, so
//! every transition is ordered by the queue. The loop never sleeps; waits
//! are timers that post back into the queue.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::bluetooth::{CapabilityVersion, ConnectionListener, RecordBackend, RecordProfile};
use crate::events::{AdapterState, EventSender, ServiceMessage, StopReason, TimerKind};
use crate::obex::TransportSession;
use crate::policy::{AccessAuthority, PolicyStore};
use crate::session::{Admission, Coordinator, CoordinatorParts, PowerResource, Scheduler};
use crate::state::{PbapState, SessionStatus, StateListener};

/// Default time the user has to answer a prompt.
pub const DEFAULT_USER_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Default delay before power is released after the last activity.
pub const DEFAULT_RELEASE_POWER_DELAY: Duration = Duration::from_millis(10_000);

/// Library-facing service settings.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Name advertised in the discovery record.
    pub service_name: String,
    /// Local host name handed to the transport.
    pub local_name: String,
    pub record_profile: RecordProfile,
    /// Applies to access requests and password challenges.
    pub user_timeout: Duration,
    pub release_power_delay: Duration,
    /// Adapter power state when the service starts.
    pub adapter_enabled: bool,
    /// Shared across restarts of the service within one process.
    pub capability_version: Arc<CapabilityVersion>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            service_name: "OBEX Phonebook Access Server".to_string(),
            local_name: "localhost".to_string(),
            record_profile: RecordProfile::Full,
            user_timeout: DEFAULT_USER_TIMEOUT,
            release_power_delay: DEFAULT_RELEASE_POWER_DELAY,
            adapter_enabled: true,
            capability_version: Arc::new(CapabilityVersion::default()),
        }
    }
}

/// Everything the service needs from the outside world.
pub struct Collaborators {
    pub listener: Box<dyn ConnectionListener>,
    pub transport: Box<dyn TransportSession>,
    pub power: Box<dyn PowerResource>,
    pub records: Box<dyn RecordBackend>,
    pub policy: Box<dyn PolicyStore>,
    pub authority: Box<dyn AccessAuthority>,
    pub state_listener: Option<Arc<dyn StateListener>>,
}

/// Handle to a running service.
pub struct ServiceHandle {
    events: EventSender,
    status: Arc<SessionStatus>,
    join: JoinHandle<Collaborators>,
}

impl ServiceHandle {
    /// Sender for posting messages to the loop.
    pub fn events(&self) -> &EventSender {
        &self.events
    }

    pub fn status(&self) -> Arc<SessionStatus> {
        self.status.clone()
    }

    pub fn state(&self) -> PbapState {
        self.status.state()
    }

    /// Request shutdown and wait for the loop to hand back its collaborators.
    pub async fn shutdown(self) -> Result<Collaborators, JoinError> {
        self.events.post(ServiceMessage::Shutdown);
        self.join.await
    }

    /// Wait for the loop to stop on its own.
    pub async fn join(self) -> Result<Collaborators, JoinError> {
        self.join.await
    }
}

/// Start the service loop on the current runtime.
///
/// The listener is started by the first message the loop handles.
pub fn spawn(options: ServiceOptions, collaborators: Collaborators) -> ServiceHandle {
    let (events, rx) = EventSender::channel();
    let status = SessionStatus::new();

    let service = PbapService::new(options, collaborators, events.clone(), status.clone());
    events.post(ServiceMessage::StartListener);
    let join = tokio::spawn(service.run(rx));

    ServiceHandle {
        events,
        status,
        join,
    }
}

struct PbapService {
    options: ServiceOptions,
    admission: Admission,
    coordinator: Coordinator,
    scheduler: Scheduler,
    /// Password challenge the user was last asked to answer.
    key_challenge: Option<u64>,
}

impl PbapService {
    fn new(
        options: ServiceOptions,
        collaborators: Collaborators,
        events: EventSender,
        status: Arc<SessionStatus>,
    ) -> Self {
        let parts = CoordinatorParts {
            listener: collaborators.listener,
            transport: collaborators.transport,
            power: collaborators.power,
            records: collaborators.records,
            state_listener: collaborators.state_listener,
        };

        Self {
            admission: Admission::new(
                collaborators.policy,
                collaborators.authority,
                options.user_timeout,
            ),
            coordinator: Coordinator::new(parts, &options, events.clone(), status),
            scheduler: Scheduler::new(events),
            key_challenge: None,
            options,
        }
    }

    async fn run(mut self, mut rx: UnboundedReceiver<ServiceMessage>) -> Collaborators {
        info!(
            "PBAP service started (capability version {})",
            self.coordinator.context().capability_version()
        );

        while let Some(message) = rx.recv().await {
            debug!("Handling {}", message.name());
            if !self.handle(message).await {
                break;
            }
        }

        info!("PBAP service stopped");
        self.into_collaborators()
    }

    /// Returns false once the loop should stop.
    async fn handle(&mut self, message: ServiceMessage) -> bool {
        match message {
            ServiceMessage::StartListener => {
                if !self.coordinator.adapter_enabled() {
                    info!("Adapter disabled, not listening");
                    self.shutdown().await;
                    return false;
                }
                if self.coordinator.is_interrupted() {
                    return true;
                }
                self.coordinator.start_listener().await;
            }
            ServiceMessage::Incoming { device, socket } => {
                self.admission
                    .on_incoming(device, socket, &mut self.coordinator, &mut self.scheduler)
                    .await;
            }
            ServiceMessage::AcceptFailed => {
                self.coordinator.accept_failed().await;
            }
            ServiceMessage::AccessReply {
                decision,
                persist,
                request_type,
            } => {
                self.admission
                    .on_reply(
                        decision,
                        persist,
                        request_type,
                        &mut self.coordinator,
                        &mut self.scheduler,
                    )
                    .await;
            }
            ServiceMessage::AclDisconnected(device) => {
                self.admission
                    .on_link_loss(&device, &mut self.coordinator, &mut self.scheduler)
                    .await;
            }
            ServiceMessage::AdapterState(AdapterState::On) => {
                self.coordinator.set_adapter_enabled(true);
            }
            ServiceMessage::AdapterState(state) => {
                info!("Adapter {:?}, shutting down", state);
                self.coordinator.set_adapter_enabled(false);
                self.shutdown().await;
                return false;
            }
            ServiceMessage::ObexAuthChallenge { challenge } => self.on_auth_challenge(challenge),
            ServiceMessage::AuthResponse {
                challenge,
                session_key,
            } => {
                if self.take_key_challenge(challenge)
                    && !self.coordinator.deliver_session_key(challenge, session_key)
                {
                    debug!("Challenge {} ended before the session key arrived", challenge);
                }
            }
            ServiceMessage::AuthCancelled { challenge } => {
                if self.take_key_challenge(challenge) {
                    self.coordinator.cancel_challenge(challenge);
                }
            }
            ServiceMessage::Timer { kind, generation } => {
                if !self.scheduler.claim(kind, generation) {
                    debug!("Dropping stale {:?} (generation {})", kind, generation);
                    return true;
                }
                self.on_timer(kind).await;
            }
            ServiceMessage::SessionClose(transport) => {
                if self.coordinator.state() == PbapState::Connected
                    && self.coordinator.is_current_transport(transport)
                {
                    self.stop_session(StopReason::Normal).await;
                } else {
                    debug!("Session close for inactive transport {:?}", transport);
                }
            }
            ServiceMessage::SessionEstablished => info!("OBEX session established"),
            ServiceMessage::SessionDisconnected => info!("OBEX session disconnected"),
            ServiceMessage::AcquirePower(transport) => {
                if self.coordinator.is_current_transport(transport) {
                    self.coordinator.acquire_power(&mut self.scheduler);
                } else {
                    debug!("Power request from inactive transport {:?}", transport);
                }
            }
            ServiceMessage::Disconnect => {
                if self.coordinator.state() == PbapState::Connected {
                    self.stop_session(StopReason::HostRequest).await;
                } else {
                    debug!("Disconnect with no connected session");
                }
            }
            ServiceMessage::Shutdown => {
                self.shutdown().await;
                return false;
            }
        }
        true
    }

    fn on_auth_challenge(&mut self, challenge: u64) {
        let Some(device) = self.coordinator.device().cloned() else {
            warn!("Password challenge {} with no session", challenge);
            return;
        };
        info!("{} requires a session key (challenge {})", device, challenge);
        self.key_challenge = Some(challenge);
        self.admission.authority().request_session_key(&device, challenge);
        self.scheduler.arm_once(TimerKind::AuthTimeout, self.options.user_timeout);
    }

    /// Consume the prompted challenge if `challenge` names it.
    fn take_key_challenge(&mut self, challenge: u64) -> bool {
        if self.key_challenge != Some(challenge) {
            debug!("Dropping reply for challenge {}", challenge);
            return false;
        }
        self.key_challenge = None;
        self.scheduler.cancel(TimerKind::AuthTimeout);
        true
    }

    fn dismiss_key_request(&mut self) {
        if self.key_challenge.take().is_some() {
            self.admission.authority().dismiss_session_key_request();
        }
    }

    async fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::UserTimeout => {
                self.admission
                    .on_timeout(&mut self.coordinator, &mut self.scheduler)
                    .await;
            }
            TimerKind::AuthTimeout => {
                info!("Session key not entered in time");
                if let Some(challenge) = self.key_challenge {
                    self.dismiss_key_request();
                    self.coordinator.cancel_challenge(challenge);
                }
            }
            TimerKind::ReleasePower => {
                self.coordinator.release_power();
            }
        }
    }

    async fn stop_session(&mut self, reason: StopReason) {
        self.dismiss_key_request();
        self.coordinator.stop(reason, &mut self.scheduler).await;
    }

    /// Best-effort teardown. Never waits on the OBEX worker.
    async fn shutdown(&mut self) {
        info!("Shutting down PBAP service");
        self.admission.abandon(&mut self.scheduler);
        self.dismiss_key_request();
        self.coordinator.shutdown(&mut self.scheduler).await;
        self.scheduler.cancel_all();
    }

    fn into_collaborators(self) -> Collaborators {
        let parts = self.coordinator.into_parts();
        let (policy, authority) = self.admission.into_parts();
        Collaborators {
            listener: parts.listener,
            transport: parts.transport,
            power: parts.power,
            records: parts.records,
            policy,
            authority,
            state_listener: parts.state_listener,
        }
    }
}
