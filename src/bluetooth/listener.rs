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

//! Connection listener for incoming phonebook clients.

use async_trait::async_trait;
use bluer::rfcomm::{Listener, Socket, SocketAddr};
use bluer::{Adapter, Address, Device, DeviceEvent, DeviceProperty};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::device::RemoteDevice;
use super::socket::RfcommSocket;
use crate::error::{PbapError, Result};
use crate::events::{EventSender, ServiceMessage};

/// Where the listener ended up bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerChannels {
    pub rfcomm_channel: u8,
    pub l2cap_psm: Option<u16>,
}

/// Accepts incoming connections and posts them to the loop.
///
/// A listener hands over one connection at a time: after posting
/// `Incoming` it waits for [`ConnectionListener::prepare_for_new_connect`]
/// before accepting the next one. A fatal accept error is reported with
/// `AcceptFailed`, after which the listener is no longer running.
#[async_trait]
pub trait ConnectionListener: Send {
    /// Create the listening sockets and start accepting.
    async fn start(&mut self, events: EventSender) -> Result<ListenerChannels>;

    /// Whether the listening sockets exist.
    fn is_running(&self) -> bool;

    /// Allow the next connection to be accepted.
    fn prepare_for_new_connect(&mut self);

    /// Close the listening sockets.
    fn shutdown(&mut self, immediate: bool);
}

/// Link-loss watcher for the most recently accepted device. Aborted when
/// dropped, so it never outlives the accept loop or the next accept.
struct LinkWatch(JoinHandle<()>);

impl LinkWatch {
    fn spawn<F>(watch: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(watch))
    }
}

impl Drop for LinkWatch {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// RFCOMM listener on the local adapter.
pub struct RfcommListener {
    adapter: Adapter,
    channel: u8,
    ready: Arc<Notify>,
    accept_task: Option<JoinHandle<()>>,
}

impl RfcommListener {
    /// Create a listener for `channel`. Nothing is bound until `start`.
    pub fn new(adapter: Adapter, channel: u8) -> Self {
        Self {
            adapter,
            channel,
            ready: Arc::new(Notify::new()),
            accept_task: None,
        }
    }

    async fn accept_loop(
        listener: Listener,
        adapter: Adapter,
        events: EventSender,
        ready: Arc<Notify>,
    ) {
        info!("Waiting for connections...");
        let mut link_watch: Option<LinkWatch> = None;

        loop {
            match listener.accept().await {
                Ok((stream, remote_addr)) => {
                    info!("Connection from: {}", remote_addr.addr);

                    // The previous session ended before this accept.
                    drop(link_watch.take());

                    let mut device = RemoteDevice::from(remote_addr.addr);
                    if let Ok(remote) = adapter.device(remote_addr.addr) {
                        if let Ok(Some(name)) = remote.name().await {
                            device = device.with_name(name);
                        }
                        let watch = Self::watch_link(remote, device.clone(), events.clone());
                        link_watch = Some(LinkWatch::spawn(watch));
                    }

                    let socket = RfcommSocket::new(stream, remote_addr.addr.to_string());
                    if !events.post(ServiceMessage::Incoming {
                        device,
                        socket: Box::new(socket),
                    }) {
                        break;
                    }

                    ready.notified().await;
                    debug!("Listener ready for a new connection");
                }
                Err(e) => {
                    error!("{}", PbapError::ListenerAccept(e.to_string()));
                    events.post(ServiceMessage::AcceptFailed);
                    break;
                }
            }
        }
    }

    /// Report when the baseband link to `remote` goes down.
    async fn watch_link(remote: Device, device: RemoteDevice, events: EventSender) {
        let stream = match remote.events().await {
            Ok(stream) => stream,
            Err(e) => {
                debug!("Cannot watch link to {}: {}", device, e);
                return;
            }
        };
        futures::pin_mut!(stream);

        while let Some(event) = stream.next().await {
            if events.is_closed() {
                return;
            }
            if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
                events.post(ServiceMessage::AclDisconnected(device));
                return;
            }
        }
    }
}

#[async_trait]
impl ConnectionListener for RfcommListener {
    async fn start(&mut self, events: EventSender) -> Result<ListenerChannels> {
        let local_addr = SocketAddr::new(Address::any(), self.channel);
        let listener = Listener::bind(local_addr)
            .await
            .map_err(|e| PbapError::ListenerStart(e.to_string()))?;
        let bound = AsRef::<Socket>::as_ref(&listener)
            .local_addr()
            .map_err(|e| PbapError::ListenerStart(e.to_string()))?;
        info!("RFCOMM server listening on channel {}", bound.channel);

        // A fresh listener must not inherit a permit from the previous one.
        self.ready = Arc::new(Notify::new());
        let task = tokio::spawn(Self::accept_loop(
            listener,
            self.adapter.clone(),
            events,
            self.ready.clone(),
        ));
        self.accept_task = Some(task);

        Ok(ListenerChannels {
            rfcomm_channel: bound.channel,
            l2cap_psm: None,
        })
    }

    fn is_running(&self) -> bool {
        self.accept_task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    fn prepare_for_new_connect(&mut self) {
        self.ready.notify_one();
    }

    fn shutdown(&mut self, immediate: bool) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
            info!("RFCOMM listener closed (immediate: {})", immediate);
        }
    }
}
