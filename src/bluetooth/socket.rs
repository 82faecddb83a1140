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

//! Accepted connection sockets.

use bluer::rfcomm::Stream;
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Byte stream the OBEX transport runs over.
pub trait ObexIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> ObexIo for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// An accepted connection, exclusively owned by the active session.
pub trait RemoteSocket: Send + fmt::Debug {
    /// Hand the byte stream over to the transport. Returns `None` once taken
    /// or after close.
    fn take_stream(&mut self) -> Option<Box<dyn ObexIo>>;

    /// Close the socket. Must be idempotent.
    fn close(&mut self) -> io::Result<()>;
}

pub type BoxedSocket = Box<dyn RemoteSocket>;

/// RFCOMM socket accepted by [`super::RfcommListener`].
pub struct RfcommSocket {
    stream: Option<Stream>,
    peer: String,
}

impl RfcommSocket {
    pub fn new(stream: Stream, peer: String) -> Self {
        Self {
            stream: Some(stream),
            peer,
        }
    }
}

impl fmt::Debug for RfcommSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RfcommSocket")
            .field("peer", &self.peer)
            .field("owned", &self.stream.is_some())
            .finish()
    }
}

impl RemoteSocket for RfcommSocket {
    fn take_stream(&mut self) -> Option<Box<dyn ObexIo>> {
        self.stream.take().map(|s| Box::new(s) as Box<dyn ObexIo>)
    }

    fn close(&mut self) -> io::Result<()> {
        // Once the transport owns the stream, closing the transport drops it.
        if self.stream.take().is_some() {
            debug!("Closed RFCOMM socket to {}", self.peer);
        }
        Ok(())
    }
}
