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

//! OBEX session worker.
//!
//! Each session runs on its own OS thread so that a password challenge can
//! block on the [`AuthGate`] without stalling the runtime. The thread drives
//! the socket I/O through the runtime handle.

use std::collections::HashMap;
use std::io;
use std::thread;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::packet::{
    read_packet, Header, HeaderValue, Request, Response, HI_AUTH_CHALLENGE, HI_CONNECTION_ID,
    HI_TARGET, HI_WHO, OP_ABORT, OP_CONNECT, OP_DISCONNECT, PBAP_TARGET, RSP_BAD_REQUEST,
    RSP_NOT_IMPLEMENTED, RSP_SERVICE_UNAVAILABLE, RSP_SUCCESS, RSP_UNAUTHORIZED,
};
use super::{ObexSessionParams, TransportHandle, TransportSession};
use crate::bluetooth::RemoteSocket;
use crate::error::{PbapError, Result};
use crate::events::ServiceMessage;
use crate::session::AuthReply;

/// Serves one OBEX connection.
struct ObexConnection {
    params: ObexSessionParams,
    handle: TransportHandle,
    connected: bool,
}

impl ObexConnection {
    fn new(params: ObexSessionParams, handle: TransportHandle) -> Self {
        Self {
            params,
            handle,
            connected: false,
        }
    }

    fn post(&self, message: ServiceMessage) {
        self.params.events.post(message);
    }

    /// Run until EOF, a read error, or `shutdown`.
    async fn run<S>(mut self, mut stream: S, mut shutdown: oneshot::Receiver<()>) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        info!(
            "OBEX session started for {} (server {}, capability version {})",
            self.params.device, self.params.local_name, self.params.capability_version
        );

        loop {
            let packet = tokio::select! {
                _ = &mut shutdown => {
                    debug!("OBEX session closed by host");
                    return Ok(());
                }
                read = read_packet(&mut stream) => read,
            };

            match packet {
                Ok(Some(packet)) => {
                    let response = match Request::parse(&packet) {
                        Ok(request) => self.handle(&request),
                        Err(e) => {
                            warn!("Malformed OBEX packet: {}", e);
                            Response::new(RSP_BAD_REQUEST)
                        }
                    };
                    stream.write_all(&response.encode()).await?;
                    stream.flush().await?;
                }
                Ok(None) => {
                    info!("Connection closed by remote");
                    self.post(ServiceMessage::SessionClose(self.handle));
                    return Ok(());
                }
                Err(e) => {
                    error!("Read error: {}", e);
                    self.post(ServiceMessage::SessionClose(self.handle));
                    return Err(e);
                }
            }
        }
    }

    fn handle(&mut self, request: &Request) -> Response {
        match request.opcode {
            OP_CONNECT => self.handle_connect(request),
            OP_DISCONNECT => {
                self.connected = false;
                self.post(ServiceMessage::SessionDisconnected);
                Response::new(RSP_SUCCESS)
            }
            OP_ABORT => Response::new(RSP_SUCCESS),
            opcode => {
                // Transfers keep the host awake even though no object store
                // backs them.
                self.post(ServiceMessage::AcquirePower(self.handle));
                debug!("Unsupported OBEX request {:#04x}", opcode);
                Response::new(RSP_NOT_IMPLEMENTED)
            }
        }
    }

    fn handle_connect(&mut self, request: &Request) -> Response {
        if let Some(target) = request.header(HI_TARGET) {
            if target != &HeaderValue::Bytes(PBAP_TARGET.to_vec()) {
                warn!("CONNECT for an unknown target");
                return Response::connect(RSP_SERVICE_UNAVAILABLE);
            }
        }

        if request.has_header(HI_AUTH_CHALLENGE) && !self.authenticate() {
            return Response::connect(RSP_UNAUTHORIZED);
        }

        self.connected = true;
        self.post(ServiceMessage::SessionEstablished);
        info!("OBEX CONNECT from {}", self.params.device);

        Response::connect(RSP_SUCCESS)
            .with_header(Header::u32(HI_CONNECTION_ID, self.handle.0 as u32))
            .with_header(Header::bytes(HI_WHO, PBAP_TARGET))
    }

    /// Block until the user answers the password challenge.
    fn authenticate(&self) -> bool {
        let gate = &self.params.gate;
        let Some(challenge) = gate.open_challenge() else {
            return false;
        };
        self.post(ServiceMessage::ObexAuthChallenge { challenge });

        match gate.await_reply() {
            AuthReply::Accepted { session_key } => {
                debug!(
                    "Password challenge answered ({})",
                    if session_key.is_some() { "with key" } else { "no key" }
                );
                true
            }
            AuthReply::Cancelled => {
                info!("Password challenge cancelled");
                false
            }
        }
    }
}

/// [`TransportSession`] running one worker thread per session.
pub struct ObexServer {
    runtime: Handle,
    sessions: HashMap<TransportHandle, oneshot::Sender<()>>,
    next_handle: u64,
}

impl ObexServer {
    /// Must be called from within the tokio runtime.
    pub fn new() -> Self {
        Self {
            runtime: Handle::current(),
            sessions: HashMap::new(),
            next_handle: 1,
        }
    }
}

impl TransportSession for ObexServer {
    fn open(
        &mut self,
        socket: &mut dyn RemoteSocket,
        params: ObexSessionParams,
    ) -> Result<TransportHandle> {
        let stream = socket.take_stream().ok_or(PbapError::NoSocket)?;

        let handle = TransportHandle(self.next_handle);
        self.next_handle += 1;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let runtime = self.runtime.clone();
        let connection = ObexConnection::new(params, handle);

        thread::Builder::new()
            .name(format!("pbap-obex-{}", handle.0))
            .spawn(move || {
                if let Err(e) = runtime.block_on(connection.run(stream, shutdown_rx)) {
                    warn!("OBEX session ended with error: {}", e);
                }
            })
            .map_err(PbapError::TransportOpen)?;

        self.sessions.insert(handle, shutdown_tx);
        Ok(handle)
    }

    fn close(&mut self, handle: TransportHandle) {
        if let Some(shutdown) = self.sessions.remove(&handle) {
            // The worker may already be gone.
            let _ = shutdown.send(());
            debug!("Closed OBEX session {:?}", handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::RemoteDevice;
    use crate::events::EventSender;
    use crate::obex::packet::OBEX_VERSION;
    use crate::session::AuthGate;
    use std::sync::Arc;
    use tokio::io::{duplex, AsyncReadExt};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn params() -> (ObexSessionParams, UnboundedReceiver<ServiceMessage>) {
        let (events, rx) = EventSender::channel();
        let params = ObexSessionParams {
            device: RemoteDevice::new("00:11:22:33:44:55"),
            gate: Arc::new(AuthGate::new()),
            events,
            local_name: "host".to_string(),
            capability_version: 1,
        };
        (params, rx)
    }

    fn connect_packet(extra: &[u8]) -> Vec<u8> {
        let mut packet = vec![OP_CONNECT, 0, 0, OBEX_VERSION, 0x00, 0x04, 0x00];
        packet.push(HI_TARGET);
        packet.extend_from_slice(&19u16.to_be_bytes());
        packet.extend_from_slice(&PBAP_TARGET);
        packet.extend_from_slice(extra);
        let len = (packet.len() as u16).to_be_bytes();
        packet[1] = len[0];
        packet[2] = len[1];
        packet
    }

    async fn response_code<S: AsyncRead + Unpin>(stream: &mut S) -> u8 {
        read_packet(stream).await.unwrap().unwrap()[0]
    }

    #[tokio::test]
    async fn test_connect_get_disconnect() {
        let (params, mut rx) = params();
        let (mut client, server) = duplex(1024);
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();
        let connection = ObexConnection::new(params, TransportHandle(1));
        let worker = tokio::spawn(connection.run(server, shutdown_rx));

        client.write_all(&connect_packet(&[])).await.unwrap();
        let reply = read_packet(&mut client).await.unwrap().unwrap();
        assert_eq!(reply[0], RSP_SUCCESS);
        assert!(matches!(rx.recv().await, Some(ServiceMessage::SessionEstablished)));

        client.write_all(&[0x83, 0x00, 0x03]).await.unwrap();
        assert_eq!(response_code(&mut client).await, RSP_NOT_IMPLEMENTED);
        assert!(matches!(
            rx.recv().await,
            Some(ServiceMessage::AcquirePower(TransportHandle(1)))
        ));

        client.write_all(&[OP_DISCONNECT, 0x00, 0x03]).await.unwrap();
        assert_eq!(response_code(&mut client).await, RSP_SUCCESS);
        assert!(matches!(rx.recv().await, Some(ServiceMessage::SessionDisconnected)));

        drop(client);
        worker.await.unwrap().unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(ServiceMessage::SessionClose(TransportHandle(1)))
        ));
    }

    #[tokio::test]
    async fn test_challenge_on_closed_gate_is_unauthorized() {
        let (params, mut rx) = params();
        params.gate.close();
        let (mut client, server) = duplex(1024);
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();
        let connection = ObexConnection::new(params, TransportHandle(1));
        tokio::spawn(connection.run(server, shutdown_rx));

        let challenge = [HI_AUTH_CHALLENGE, 0x00, 0x03];
        client.write_all(&connect_packet(&challenge)).await.unwrap();

        assert_eq!(response_code(&mut client).await, RSP_UNAUTHORIZED);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_stops_without_session_close() {
        let (params, mut rx) = params();
        let (mut client, server) = duplex(1024);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let connection = ObexConnection::new(params, TransportHandle(1));
        let worker = tokio::spawn(connection.run(server, shutdown_rx));

        shutdown_tx.send(()).unwrap();
        worker.await.unwrap().unwrap();
        assert!(rx.try_recv().is_err());

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }
}
