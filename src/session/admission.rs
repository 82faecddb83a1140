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

//! Admission control for incoming connections.
//!
//! A connection is started, refused, or held while the user is asked. A
//! held connection ends on the first of: a matching reply, the user
//! timeout, or loss of the link to the device. Whichever comes first takes
//! the [`PendingAuthorization`]; the others find nothing and do nothing.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::coordinator::Coordinator;
use super::timer::Scheduler;
use crate::bluetooth::{BoxedSocket, RemoteDevice};
use crate::events::{StopReason, TimerKind};
use crate::policy::{AccessAuthority, AccessDecision, PolicyStore, RequestType};

/// An access request waiting for the user.
#[derive(Debug)]
struct PendingAuthorization {
    device: RemoteDevice,
    request_type: RequestType,
}

pub struct Admission {
    pending: Option<PendingAuthorization>,
    policy: Box<dyn PolicyStore>,
    authority: Box<dyn AccessAuthority>,
    user_timeout: Duration,
}

impl Admission {
    pub fn new(
        policy: Box<dyn PolicyStore>,
        authority: Box<dyn AccessAuthority>,
        user_timeout: Duration,
    ) -> Self {
        Self {
            pending: None,
            policy,
            authority,
            user_timeout,
        }
    }

    pub fn authority(&mut self) -> &mut dyn AccessAuthority {
        self.authority.as_mut()
    }

    /// Decide what to do with an accepted connection.
    pub async fn on_incoming(
        &mut self,
        device: RemoteDevice,
        mut socket: BoxedSocket,
        coordinator: &mut Coordinator,
        scheduler: &mut Scheduler,
    ) {
        if coordinator.has_session() {
            warn!("Refusing {}: a session is already active", device);
            close_socket(&mut socket);
            return;
        }

        let decision = self.policy.get(&device);
        info!(
            "Incoming connection from {} ({}), policy {}",
            device.display_name(),
            device,
            decision.as_str()
        );

        match decision {
            AccessDecision::Allowed => {
                if let Err(mut socket) = coordinator.attach(device, socket) {
                    close_socket(&mut socket);
                    return;
                }
                self.start_or_refuse(coordinator, scheduler).await;
            }
            AccessDecision::Rejected => {
                close_socket(&mut socket);
                coordinator.relisten().await;
            }
            AccessDecision::Unknown => {
                if let Err(mut socket) = coordinator.attach(device.clone(), socket) {
                    close_socket(&mut socket);
                    return;
                }
                let request_type = RequestType::PhonebookAccess;
                self.authority.request_access(&device, request_type);
                scheduler.arm_once(TimerKind::UserTimeout, self.user_timeout);
                self.pending = Some(PendingAuthorization {
                    device,
                    request_type,
                });
                coordinator.await_authorization();
            }
        }
    }

    /// Apply the user's answer to the outstanding request.
    pub async fn on_reply(
        &mut self,
        decision: AccessDecision,
        persist: bool,
        request_type: RequestType,
        coordinator: &mut Coordinator,
        scheduler: &mut Scheduler,
    ) {
        match &self.pending {
            Some(pending) if pending.request_type == request_type => {}
            Some(pending) => {
                debug!(
                    "Dropping reply for {:?}, waiting for {:?}",
                    request_type, pending.request_type
                );
                return;
            }
            None => {
                debug!("Dropping access reply with no request outstanding");
                return;
            }
        }
        let Some(pending) = self.pending.take() else {
            return;
        };
        scheduler.cancel(TimerKind::UserTimeout);

        if persist && decision != AccessDecision::Unknown {
            if let Err(e) = self.policy.set(&pending.device, decision) {
                warn!("Failed to store decision for {}: {}", pending.device, e);
            }
        }

        if decision == AccessDecision::Allowed {
            info!("Access granted to {}", pending.device);
            self.start_or_refuse(coordinator, scheduler).await;
        } else {
            info!("Access refused to {}", pending.device);
            coordinator.stop(StopReason::Refused, scheduler).await;
        }
    }

    /// The user did not answer in time. Call only for a claimed timer.
    pub async fn on_timeout(&mut self, coordinator: &mut Coordinator, scheduler: &mut Scheduler) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        info!("No answer for {}, refusing", pending.device);
        self.authority
            .cancel_access_request(&pending.device, pending.request_type);
        coordinator.stop(StopReason::Refused, scheduler).await;
    }

    /// The link to `device` went down.
    pub async fn on_link_loss(
        &mut self,
        device: &RemoteDevice,
        coordinator: &mut Coordinator,
        scheduler: &mut Scheduler,
    ) {
        if self.pending.as_ref().map(|p| &p.device) != Some(device) {
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };
        info!("{} disconnected while waiting for the user", device);
        scheduler.cancel(TimerKind::UserTimeout);
        self.authority
            .cancel_access_request(&pending.device, pending.request_type);
        coordinator.stop(StopReason::Refused, scheduler).await;
    }

    /// Withdraw any outstanding request without touching the session.
    pub fn abandon(&mut self, scheduler: &mut Scheduler) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };
        scheduler.cancel(TimerKind::UserTimeout);
        self.authority
            .cancel_access_request(&pending.device, pending.request_type);
        true
    }

    async fn start_or_refuse(&mut self, coordinator: &mut Coordinator, scheduler: &mut Scheduler) {
        if let Err(e) = coordinator.start(scheduler) {
            warn!("Failed to open session: {}", e);
            coordinator.stop(StopReason::Refused, scheduler).await;
        }
    }

    pub fn into_parts(self) -> (Box<dyn PolicyStore>, Box<dyn AccessAuthority>) {
        (self.policy, self.authority)
    }
}

fn close_socket(socket: &mut BoxedSocket) {
    if let Err(e) = socket.close() {
        warn!("Failed to close socket: {}", e);
    }
}
