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

//! Remote device identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Name used when the remote did not report one.
pub const DEFAULT_DEVICE_NAME: &str = "Unknown device";

/// A remote Bluetooth peer.
///
/// Identity is the address alone; the name is a display hint that may be
/// missing on link events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteDevice {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl RemoteDevice {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into().to_uppercase(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.name = if name.trim().is_empty() { None } else { Some(name) };
        self
    }

    /// Name to show to the user, falling back to a fixed label.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_DEVICE_NAME)
    }
}

impl From<bluer::Address> for RemoteDevice {
    fn from(address: bluer::Address) -> Self {
        Self::new(address.to_string())
    }
}

impl PartialEq for RemoteDevice {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for RemoteDevice {}

impl Hash for RemoteDevice {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for RemoteDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_name() {
        let a = RemoteDevice::new("aa:bb:cc:dd:ee:ff").with_name("Carkit");
        let b = RemoteDevice::new("AA:BB:CC:DD:EE:FF");
        assert_eq!(a, b);
        assert_eq!(b.display_name(), DEFAULT_DEVICE_NAME);
        assert_eq!(a.display_name(), "Carkit");
    }

    #[test]
    fn test_blank_name_is_dropped() {
        let device = RemoteDevice::new("00:11:22:33:44:55").with_name("  ");
        assert!(device.name.is_none());
    }
}
