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

//! Bluetooth side of the server.
//!
//! RFCOMM listener and sockets for incoming phonebook clients, and the
//! discovery record that advertises the server.

mod device;
mod listener;
mod sdp;
mod socket;

pub use device::{RemoteDevice, DEFAULT_DEVICE_NAME};
pub use listener::{ConnectionListener, ListenerChannels, RfcommListener};
pub use sdp::{
    BluezRecordBackend, CapabilityVersion, RecordBackend, RecordHandle, RecordProfile,
    ServiceRecord, ServiceRegistry, PBAP_PSE_UUID,
};
pub use socket::{BoxedSocket, ObexIo, RemoteSocket, RfcommSocket};
