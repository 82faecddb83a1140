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

//! File-backed access policy.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{AccessDecision, PolicyStore};
use crate::bluetooth::RemoteDevice;
use crate::error::PbapError;

/// Stored decision for one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PolicyEntry {
    address: String,
    name: Option<String>,
    decision: AccessDecision,
    updated_at: chrono::DateTime<chrono::Local>,
}

/// Access decisions persisted as JSON, keyed by device address.
pub struct JsonPolicyStore {
    path: PathBuf,
    entries: HashMap<String, PolicyEntry>,
}

impl JsonPolicyStore {
    /// Create or open the store in `data_dir`.
    pub fn new(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("phonebook_access.json");
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            HashMap::new()
        };

        info!("Loaded {} phonebook access entries", entries.len());
        Ok(Self { path, entries })
    }

    fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl PolicyStore for JsonPolicyStore {
    fn get(&self, device: &RemoteDevice) -> AccessDecision {
        self.entries
            .get(&device.address)
            .map(|e| e.decision)
            .unwrap_or_default()
    }

    fn set(&mut self, device: &RemoteDevice, decision: AccessDecision) -> crate::error::Result<()> {
        let entry = PolicyEntry {
            address: device.address.clone(),
            name: device.name.clone(),
            decision,
            updated_at: chrono::Local::now(),
        };
        self.entries.insert(device.address.clone(), entry);
        self.save()
            .map_err(|e| PbapError::PolicyStore(e.to_string()))?;
        info!("Phonebook access for {} set to {}", device, decision.as_str());
        Ok(())
    }
}
