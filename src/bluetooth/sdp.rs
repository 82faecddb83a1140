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

//! Service discovery record for the phonebook server.

use async_trait::async_trait;
use bluer::rfcomm::{Profile, ProfileHandle, Role};
use bluer::Session;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{PbapError, Result};

/// PBAP server equipment service class.
pub const PBAP_PSE_UUID: Uuid = Uuid::from_u128(0x0000112F_0000_1000_8000_00805F9B34FB);

/// PBAP profile descriptor.
const PBAP_PROFILE_ID: u16 = 0x1130;

/// Which capability set to advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordProfile {
    /// PBAP 1.2 with the full feature set and GOEP over L2CAP.
    #[default]
    Full,
    /// PBAP 1.1, local phonebook only.
    AospOnly,
}

impl RecordProfile {
    pub fn version(&self) -> u16 {
        match self {
            Self::Full => 0x0102,
            Self::AospOnly => 0x0101,
        }
    }

    pub fn repositories(&self) -> u8 {
        match self {
            Self::Full => 0x03,
            Self::AospOnly => 0x01,
        }
    }

    pub fn features(&self) -> u32 {
        match self {
            Self::Full => 0x0000_021F,
            Self::AospOnly => 0x0000_0003,
        }
    }

    /// Build the record for a listener bound to `channel` / `psm`.
    pub fn record(&self, name: &str, channel: u8, psm: Option<u16>) -> ServiceRecord {
        ServiceRecord {
            name: name.to_string(),
            rfcomm_channel: channel,
            l2cap_psm: match self {
                Self::Full => psm,
                Self::AospOnly => None,
            },
            version: self.version(),
            repositories: self.repositories(),
            features: self.features(),
        }
    }
}

/// Discovery record contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub name: String,
    pub rfcomm_channel: u8,
    pub l2cap_psm: Option<u16>,
    pub version: u16,
    pub repositories: u8,
    pub features: u32,
}

impl ServiceRecord {
    /// Render as a BlueZ SDP XML record.
    pub fn to_sdp_xml(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\" ?>\n<record>\n");
        xml.push_str("  <attribute id=\"0x0001\"><sequence><uuid value=\"0x112f\" /></sequence></attribute>\n");
        xml.push_str(&format!(
            "  <attribute id=\"0x0004\"><sequence>\
             <sequence><uuid value=\"0x0100\" /></sequence>\
             <sequence><uuid value=\"0x0003\" /><uint8 value=\"0x{:02x}\" /></sequence>\
             <sequence><uuid value=\"0x0008\" /></sequence>\
             </sequence></attribute>\n",
            self.rfcomm_channel
        ));
        xml.push_str("  <attribute id=\"0x0005\"><sequence><uuid value=\"0x1002\" /></sequence></attribute>\n");
        xml.push_str(&format!(
            "  <attribute id=\"0x0009\"><sequence><sequence><uuid value=\"0x{:04x}\" /><uint16 value=\"0x{:04x}\" /></sequence></sequence></attribute>\n",
            PBAP_PROFILE_ID, self.version
        ));
        xml.push_str(&format!(
            "  <attribute id=\"0x0100\"><text value=\"{}\" /></attribute>\n",
            escape_xml(&self.name)
        ));
        if let Some(psm) = self.l2cap_psm {
            xml.push_str(&format!(
                "  <attribute id=\"0x0200\"><uint16 value=\"0x{:04x}\" /></attribute>\n",
                psm
            ));
        }
        xml.push_str(&format!(
            "  <attribute id=\"0x0314\"><uint8 value=\"0x{:02x}\" /></attribute>\n",
            self.repositories
        ));
        xml.push_str(&format!(
            "  <attribute id=\"0x0317\"><uint32 value=\"0x{:08x}\" /></attribute>\n",
            self.features
        ));
        xml.push_str("</record>\n");
        xml
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Handle of a live discovery record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordHandle(pub u32);

/// The discovery subsystem.
#[async_trait]
pub trait RecordBackend: Send {
    async fn create_record(&mut self, record: &ServiceRecord) -> Result<RecordHandle>;
    async fn remove_record(&mut self, handle: RecordHandle) -> Result<()>;
}

#[derive(Debug, Default)]
struct Advertised {
    version: u64,
    features: Option<u32>,
}

/// Process-wide counter of advertised capability changes. Never decreases.
///
/// Remembers the last advertised feature set, so restarting the service
/// with the same features leaves the version alone.
#[derive(Debug, Default)]
pub struct CapabilityVersion(Mutex<Advertised>);

impl CapabilityVersion {
    pub fn get(&self) -> u64 {
        self.0.lock().version
    }

    /// Record `features` as advertised. Returns the new version if it moved.
    fn advertise(&self, features: u32) -> Option<u64> {
        let mut advertised = self.0.lock();
        if advertised.features == Some(features) {
            return None;
        }
        advertised.features = Some(features);
        advertised.version += 1;
        Some(advertised.version)
    }
}

/// Owns the single live discovery record.
pub struct ServiceRegistry {
    backend: Box<dyn RecordBackend>,
    handle: Option<RecordHandle>,
    version: Arc<CapabilityVersion>,
}

impl ServiceRegistry {
    pub fn new(backend: Box<dyn RecordBackend>, version: Arc<CapabilityVersion>) -> Self {
        Self {
            backend,
            handle: None,
            version,
        }
    }

    /// Replace the live record with `record`.
    pub async fn register(&mut self, record: ServiceRecord) -> Result<RecordHandle> {
        self.deregister().await;

        let handle = self.backend.create_record(&record).await?;
        self.handle = Some(handle);
        info!(
            "Created discovery record {:?} on RFCOMM channel {} (version {:#06x})",
            handle, record.rfcomm_channel, record.version
        );

        if let Some(version) = self.version.advertise(record.features) {
            info!(
                "Advertised features now {:#010x}, capability version {}",
                record.features, version
            );
        }

        Ok(handle)
    }

    /// Remove the live record, if any. Returns whether one was removed.
    pub async fn deregister(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return false;
        };
        match self.backend.remove_record(handle).await {
            Ok(()) => info!("Removed discovery record {:?}", handle),
            Err(e) => warn!("Failed to remove discovery record {:?}: {}", handle, e),
        }
        true
    }

    pub fn handle(&self) -> Option<RecordHandle> {
        self.handle
    }

    pub fn capability_version(&self) -> u64 {
        self.version.get()
    }

    pub fn into_backend(self) -> Box<dyn RecordBackend> {
        self.backend
    }
}

/// Registers the record as a BlueZ external profile.
pub struct BluezRecordBackend {
    session: Session,
    profiles: HashMap<RecordHandle, ProfileHandle>,
    next_handle: u32,
}

impl BluezRecordBackend {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            profiles: HashMap::new(),
            next_handle: 1,
        }
    }
}

#[async_trait]
impl RecordBackend for BluezRecordBackend {
    async fn create_record(&mut self, record: &ServiceRecord) -> Result<RecordHandle> {
        let profile = Profile {
            uuid: PBAP_PSE_UUID,
            name: Some(record.name.clone()),
            role: Some(Role::Server),
            service_record: Some(record.to_sdp_xml()),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };

        let profile_handle = self
            .session
            .register_profile(profile)
            .await
            .map_err(|e| PbapError::RegistryUnavailable(e.to_string()))?;

        let handle = RecordHandle(self.next_handle);
        self.next_handle += 1;
        self.profiles.insert(handle, profile_handle);
        Ok(handle)
    }

    async fn remove_record(&mut self, handle: RecordHandle) -> Result<()> {
        // Dropping the profile handle unregisters it from BlueZ.
        self.profiles.remove(&handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Default)]
    struct Calls {
        created: Vec<ServiceRecord>,
        removed: Vec<RecordHandle>,
    }

    struct FakeBackend {
        calls: Arc<Mutex<Calls>>,
        available: bool,
        next: u32,
    }

    impl FakeBackend {
        fn new(calls: Arc<Mutex<Calls>>) -> Self {
            Self {
                calls,
                available: true,
                next: 0,
            }
        }
    }

    #[async_trait]
    impl RecordBackend for FakeBackend {
        async fn create_record(&mut self, record: &ServiceRecord) -> Result<RecordHandle> {
            if !self.available {
                return Err(PbapError::RegistryUnavailable("sdp down".to_string()));
            }
            self.next += 1;
            self.calls.lock().created.push(record.clone());
            Ok(RecordHandle(self.next))
        }

        async fn remove_record(&mut self, handle: RecordHandle) -> Result<()> {
            self.calls.lock().removed.push(handle);
            Ok(())
        }
    }

    fn registry(calls: Arc<Mutex<Calls>>) -> ServiceRegistry {
        ServiceRegistry::new(
            Box::new(FakeBackend::new(calls)),
            Arc::new(CapabilityVersion::default()),
        )
    }

    #[tokio::test]
    async fn test_register_replaces_previous_record() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let mut registry = registry(calls.clone());

        let first = registry
            .register(RecordProfile::Full.record("PBAP", 19, Some(0x1025)))
            .await
            .unwrap();
        let second = registry
            .register(RecordProfile::Full.record("PBAP", 20, Some(0x1025)))
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(registry.handle(), Some(second));
        assert_eq!(calls.lock().removed, vec![first]);
    }

    #[tokio::test]
    async fn test_version_only_bumps_on_feature_change() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let mut registry = registry(calls);

        registry
            .register(RecordProfile::Full.record("PBAP", 19, None))
            .await
            .unwrap();
        assert_eq!(registry.capability_version(), 1);

        registry
            .register(RecordProfile::Full.record("PBAP", 19, None))
            .await
            .unwrap();
        assert_eq!(registry.capability_version(), 1);

        registry
            .register(RecordProfile::AospOnly.record("PBAP", 19, None))
            .await
            .unwrap();
        assert_eq!(registry.capability_version(), 2);
    }

    #[tokio::test]
    async fn test_version_shared_across_registries() {
        let version = Arc::new(CapabilityVersion::default());
        let calls = Arc::new(Mutex::new(Calls::default()));

        let mut first =
            ServiceRegistry::new(Box::new(FakeBackend::new(calls.clone())), version.clone());
        first
            .register(RecordProfile::Full.record("PBAP", 19, None))
            .await
            .unwrap();
        first.deregister().await;

        let mut second = ServiceRegistry::new(Box::new(FakeBackend::new(calls)), version.clone());
        second
            .register(RecordProfile::Full.record("PBAP", 19, None))
            .await
            .unwrap();
        assert_eq!(version.get(), 1);
    }

    #[tokio::test]
    async fn test_deregister_is_idempotent() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let mut registry = registry(calls.clone());

        assert!(!registry.deregister().await);
        registry
            .register(RecordProfile::Full.record("PBAP", 19, None))
            .await
            .unwrap();
        assert!(registry.deregister().await);
        assert!(!registry.deregister().await);
        assert_eq!(calls.lock().removed.len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_backend_leaves_no_handle() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let mut backend = FakeBackend::new(calls);
        backend.available = false;
        let mut registry =
            ServiceRegistry::new(Box::new(backend), Arc::new(CapabilityVersion::default()));

        let result = registry
            .register(RecordProfile::Full.record("PBAP", 19, None))
            .await;
        assert!(matches!(result, Err(PbapError::RegistryUnavailable(_))));
        assert_eq!(registry.handle(), None);
        assert_eq!(registry.capability_version(), 0);
    }

    #[test]
    fn test_aosp_record_has_no_psm() {
        let record = RecordProfile::AospOnly.record("PBAP", 19, Some(0x1025));
        assert_eq!(record.l2cap_psm, None);
        assert_eq!(record.version, 0x0101);
        assert_eq!(record.repositories, 0x01);
        assert_eq!(record.features, 0x0003);
    }

    #[test]
    fn test_sdp_xml() {
        let record = RecordProfile::Full.record("Phone & Book", 19, Some(0x1025));
        let xml = record.to_sdp_xml();
        assert!(xml.contains("<uint8 value=\"0x13\" />"));
        assert!(xml.contains("<uint16 value=\"0x0102\" />"));
        assert!(xml.contains("<attribute id=\"0x0200\"><uint16 value=\"0x1025\" />"));
        assert!(xml.contains("<uint32 value=\"0x0000021f\" />"));
        assert!(xml.contains("Phone &amp; Book"));
    }

    proptest! {
        /// Any sequence of registrations leaves the version non-decreasing.
        #[test]
        fn capability_version_never_decreases(
            steps in proptest::collection::vec((any::<bool>(), 1u8..30, any::<bool>()), 1..40)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let calls = Arc::new(Mutex::new(Calls::default()));
                let mut registry = registry(calls);
                let mut last = registry.capability_version();

                for (aosp, channel, deregister) in steps {
                    let profile = if aosp { RecordProfile::AospOnly } else { RecordProfile::Full };
                    registry.register(profile.record("PBAP", channel, None)).await.unwrap();
                    if deregister {
                        registry.deregister().await;
                    }
                    let now = registry.capability_version();
                    prop_assert!(now >= last);
                    last = now;
                }
                Ok::<(), proptest::test_runner::TestCaseError>(())
            })?;
        }
    }
}
