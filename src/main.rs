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

//! PBAP server daemon

use anyhow::Result;
use bluer::{AdapterEvent, AdapterProperty};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pbap_server::bluetooth::{BluezRecordBackend, CapabilityVersion, RfcommListener};
use pbap_server::config::Config;
use pbap_server::obex::ObexServer;
use pbap_server::policy::{ConsolePrompt, JsonPolicyStore};
use pbap_server::session::{NoopPower, PowerResource, SleepInhibitor};
use pbap_server::{AdapterState, Collaborators, EventSender, ServiceHandle, ServiceMessage};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pbap_server=info".parse()?),
        )
        .init();

    info!("Starting PBAP server v{}...", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!("Configuration loaded");

    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    info!("Using Bluetooth adapter: {}", adapter.name());

    // The prompt outlives service restarts, so its replies go through a
    // relay that always forwards to the current loop.
    let (relay, mut relay_rx) = EventSender::channel();
    let prompt = ConsolePrompt::spawn(relay)?;

    let power: Box<dyn PowerResource> = if config.power.inhibit_sleep {
        Box::new(SleepInhibitor::new("Phonebook transfer in progress"))
    } else {
        Box::new(NoopPower)
    };

    let mut collaborators = Some(Collaborators {
        listener: Box::new(RfcommListener::new(
            adapter.clone(),
            config.server.rfcomm_channel,
        )),
        transport: Box::new(ObexServer::new()),
        power,
        records: Box::new(BluezRecordBackend::new(session.clone())),
        policy: Box::new(JsonPolicyStore::new(&config.data_dir)?),
        authority: Box::new(prompt),
        state_listener: None,
    });

    let capability_version = Arc::new(CapabilityVersion::default());
    let start = |collaborators: Collaborators| -> ServiceHandle {
        let options = config.service_options(true, capability_version.clone());
        pbap_server::spawn(options, collaborators)
    };

    let mut handle = None;
    if adapter.is_powered().await? {
        handle = collaborators.take().map(start);
    } else {
        info!("Adapter is off, waiting for it to power on");
    }

    let adapter_events = adapter.events().await?;
    futures::pin_mut!(adapter_events);

    info!("Ready.");

    loop {
        tokio::select! {
            Some(message) = relay_rx.recv() => {
                if let Some(handle) = &handle {
                    handle.events().post(message);
                }
            }
            Some(event) = adapter_events.next() => {
                let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event else {
                    continue;
                };
                if powered {
                    info!("Adapter powered on");
                    if handle.is_none() {
                        handle = collaborators.take().map(start);
                    }
                } else if let Some(running) = handle.take() {
                    info!("Adapter powered off");
                    running
                        .events()
                        .post(ServiceMessage::AdapterState(AdapterState::Off));
                    collaborators = Some(running.join().await?);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    if let Some(running) = handle.take() {
        if let Err(e) = running.shutdown().await {
            warn!("Service did not stop cleanly: {}", e);
        }
    }

    info!("PBAP server stopped");
    Ok(())
}
