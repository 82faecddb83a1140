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

//! Recording fakes for driving the service loop in tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use pbap_server::bluetooth::{
    ConnectionListener, ListenerChannels, ObexIo, RecordBackend, RecordHandle, RemoteDevice,
    RemoteSocket, ServiceRecord,
};
use pbap_server::obex::{ObexSessionParams, TransportHandle, TransportSession};
use pbap_server::policy::{AccessAuthority, AccessDecision, PolicyStore, RequestType};
use pbap_server::session::{AuthGate, PowerResource};
use pbap_server::{
    Collaborators, EventSender, PbapError, PbapState, ServiceHandle, ServiceMessage,
    ServiceOptions, StateListener,
};

pub const DEVICE_A: &str = "00:00:00:00:00:0A";
pub const DEVICE_B: &str = "00:00:00:00:00:0B";
pub const DEVICE_C: &str = "00:00:00:00:00:0C";

/// Everything the fakes observed.
#[derive(Default)]
pub struct Log {
    pub listener_starts: usize,
    pub prepares: usize,
    pub listener_shutdowns: Vec<bool>,
    pub transport_opens: Vec<String>,
    pub transports: Vec<TransportHandle>,
    pub transport_closes: usize,
    pub gate: Option<Arc<AuthGate>>,
    pub power_acquires: usize,
    pub power_releases: usize,
    pub records_created: Vec<ServiceRecord>,
    pub records_removed: usize,
    pub sockets_closed: Vec<String>,
    pub access_requests: Vec<String>,
    pub access_cancels: Vec<String>,
    pub key_requests: Vec<u64>,
    pub key_dismissals: usize,
    pub policy_sets: Vec<(String, AccessDecision)>,
    pub transitions: Vec<(Option<String>, PbapState, PbapState)>,
}

pub type SharedLog = Arc<Mutex<Log>>;

pub struct FakeSocket {
    id: String,
    closed: bool,
    log: SharedLog,
}

impl FakeSocket {
    pub fn boxed(id: &str, log: &SharedLog) -> Box<dyn RemoteSocket> {
        Box::new(Self {
            id: id.to_string(),
            closed: false,
            log: log.clone(),
        })
    }
}

impl fmt::Debug for FakeSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl RemoteSocket for FakeSocket {
    fn take_stream(&mut self) -> Option<Box<dyn ObexIo>> {
        None
    }

    fn close(&mut self) -> io::Result<()> {
        if !self.closed {
            self.closed = true;
            self.log.lock().sockets_closed.push(self.id.clone());
        }
        Ok(())
    }
}

pub struct FakeListener {
    log: SharedLog,
    running: bool,
}

#[async_trait]
impl ConnectionListener for FakeListener {
    async fn start(&mut self, _events: EventSender) -> pbap_server::Result<ListenerChannels> {
        self.running = true;
        self.log.lock().listener_starts += 1;
        Ok(ListenerChannels {
            rfcomm_channel: 19,
            l2cap_psm: Some(0x1025),
        })
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn prepare_for_new_connect(&mut self) {
        self.log.lock().prepares += 1;
    }

    fn shutdown(&mut self, immediate: bool) {
        self.running = false;
        self.log.lock().listener_shutdowns.push(immediate);
    }
}

pub struct FakeTransport {
    log: SharedLog,
    fail_open: bool,
    next: u64,
}

impl TransportSession for FakeTransport {
    fn open(
        &mut self,
        socket: &mut dyn RemoteSocket,
        params: ObexSessionParams,
    ) -> pbap_server::Result<TransportHandle> {
        if self.fail_open {
            return Err(PbapError::TransportOpen(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "peer went away",
            )));
        }
        self.next += 1;
        let handle = TransportHandle(self.next);
        let mut log = self.log.lock();
        log.transport_opens.push(format!("{:?}", socket));
        log.transports.push(handle);
        log.gate = Some(params.gate);
        Ok(handle)
    }

    fn close(&mut self, _handle: TransportHandle) {
        self.log.lock().transport_closes += 1;
    }
}

pub struct FakePower(SharedLog);

impl PowerResource for FakePower {
    fn acquire(&mut self) -> anyhow::Result<()> {
        self.0.lock().power_acquires += 1;
        Ok(())
    }

    fn release(&mut self) -> anyhow::Result<()> {
        self.0.lock().power_releases += 1;
        Ok(())
    }
}

pub struct FakeRecords {
    log: SharedLog,
    next: u32,
}

#[async_trait]
impl RecordBackend for FakeRecords {
    async fn create_record(&mut self, record: &ServiceRecord) -> pbap_server::Result<RecordHandle> {
        self.next += 1;
        self.log.lock().records_created.push(record.clone());
        Ok(RecordHandle(self.next))
    }

    async fn remove_record(&mut self, _handle: RecordHandle) -> pbap_server::Result<()> {
        self.log.lock().records_removed += 1;
        Ok(())
    }
}

pub struct FakePolicy {
    log: SharedLog,
    decisions: HashMap<String, AccessDecision>,
}

impl PolicyStore for FakePolicy {
    fn get(&self, device: &RemoteDevice) -> AccessDecision {
        self.decisions
            .get(&device.address)
            .copied()
            .unwrap_or_default()
    }

    fn set(&mut self, device: &RemoteDevice, decision: AccessDecision) -> pbap_server::Result<()> {
        self.decisions.insert(device.address.clone(), decision);
        self.log
            .lock()
            .policy_sets
            .push((device.address.clone(), decision));
        Ok(())
    }
}

pub struct FakeAuthority(SharedLog);

impl AccessAuthority for FakeAuthority {
    fn request_access(&mut self, device: &RemoteDevice, _request_type: RequestType) {
        self.0.lock().access_requests.push(device.address.clone());
    }

    fn cancel_access_request(&mut self, device: &RemoteDevice, _request_type: RequestType) {
        self.0.lock().access_cancels.push(device.address.clone());
    }

    fn request_session_key(&mut self, _device: &RemoteDevice, challenge: u64) {
        self.0.lock().key_requests.push(challenge);
    }

    fn dismiss_session_key_request(&mut self) {
        self.0.lock().key_dismissals += 1;
    }
}

pub struct RecordingStateListener(SharedLog);

impl StateListener for RecordingStateListener {
    fn on_state_changed(
        &self,
        device: Option<&RemoteDevice>,
        previous: PbapState,
        current: PbapState,
    ) {
        self.0.lock().transitions.push((
            device.map(|d| d.address.clone()),
            previous,
            current,
        ));
    }
}

/// Knobs for building the fakes.
#[derive(Default)]
pub struct Setup {
    pub policy: Vec<(&'static str, AccessDecision)>,
    pub fail_open: bool,
    pub options: Option<ServiceOptions>,
}

pub struct Harness {
    pub handle: ServiceHandle,
    pub log: SharedLog,
}

impl Harness {
    pub fn start(setup: Setup) -> Self {
        let log: SharedLog = Arc::new(Mutex::new(Log::default()));
        let decisions = setup
            .policy
            .iter()
            .map(|(address, decision)| (address.to_string(), *decision))
            .collect();

        let collaborators = Collaborators {
            listener: Box::new(FakeListener {
                log: log.clone(),
                running: false,
            }),
            transport: Box::new(FakeTransport {
                log: log.clone(),
                fail_open: setup.fail_open,
                next: 0,
            }),
            power: Box::new(FakePower(log.clone())),
            records: Box::new(FakeRecords {
                log: log.clone(),
                next: 0,
            }),
            policy: Box::new(FakePolicy {
                log: log.clone(),
                decisions,
            }),
            authority: Box::new(FakeAuthority(log.clone())),
            state_listener: Some(Arc::new(RecordingStateListener(log.clone()))),
        };

        let options = setup.options.unwrap_or_default();
        Self {
            handle: pbap_server::spawn(options, collaborators),
            log,
        }
    }

    pub fn with_policy(policy: &[(&'static str, AccessDecision)]) -> Self {
        Self::start(Setup {
            policy: policy.to_vec(),
            ..Default::default()
        })
    }

    pub fn post(&self, message: ServiceMessage) {
        assert!(self.handle.events().post(message));
    }

    pub fn incoming(&self, address: &str, socket_id: &str) {
        self.post(ServiceMessage::Incoming {
            device: RemoteDevice::new(address),
            socket: FakeSocket::boxed(socket_id, &self.log),
        });
    }

    pub fn reply(&self, decision: AccessDecision, persist: bool) {
        self.post(ServiceMessage::AccessReply {
            decision,
            persist,
            request_type: RequestType::PhonebookAccess,
        });
    }

    pub fn state(&self) -> PbapState {
        self.handle.state()
    }

    /// Most recently opened transport.
    pub fn transport(&self) -> TransportHandle {
        self.log(|p| p.transports.last().copied())
            .expect("no transport opened")
    }

    /// Read the log.
    pub fn log<T>(&self, f: impl FnOnce(&Log) -> T) -> T {
        f(&self.log.lock())
    }
}

/// Let the loop drain everything already posted.
///
/// Runs under paused time: the runtime only advances the clock once every
/// task is idle, so this returns after the loop has caught up.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
