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

//! Terminal prompt acting as the access authority.
//!
//! Questions are printed to stdout; a reader thread turns the answers typed
//! on stdin into loop messages. Only one question is open at a time and an
//! answer with no open question is ignored.

use anyhow::Result;
use parking_lot::Mutex;
use std::io::BufRead;
use std::sync::Arc;
use tracing::{debug, info};

use super::{AccessAuthority, AccessDecision, RequestType};
use crate::bluetooth::RemoteDevice;
use crate::events::{EventSender, ServiceMessage};

/// Question currently shown to the user.
#[derive(Debug, Clone)]
enum Question {
    Access {
        device: RemoteDevice,
        request_type: RequestType,
    },
    SessionKey {
        device: RemoteDevice,
        challenge: u64,
    },
}

/// Access authority backed by the controlling terminal.
pub struct ConsolePrompt {
    question: Arc<Mutex<Option<Question>>>,
}

impl ConsolePrompt {
    /// Start the stdin reader and return the authority.
    pub fn spawn(events: EventSender) -> Result<Self> {
        let question: Arc<Mutex<Option<Question>>> = Arc::new(Mutex::new(None));
        let shared = question.clone();

        std::thread::Builder::new()
            .name("pbap-prompt".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    let Some(open) = shared.lock().take() else {
                        debug!("Ignoring input with no open question");
                        continue;
                    };
                    match answer(&open, &line) {
                        Some(message) => {
                            if !events.post(message) {
                                break;
                            }
                        }
                        None => {
                            println!("Please answer y, n, always or never.");
                            *shared.lock() = Some(open);
                        }
                    }
                }
                debug!("Prompt reader exiting");
            })?;

        Ok(Self { question })
    }

    fn ask(&self, question: Question) {
        match &question {
            Question::Access { device, .. } => {
                println!(
                    "\"{}\" wants to access the phonebook. Allow? [y]es / [n]o / [a]lways / ne[v]er",
                    device.display_name()
                );
            }
            Question::SessionKey { device, .. } => {
                println!(
                    "\"{}\" requires a session key. Enter it (empty to cancel):",
                    device.display_name()
                );
            }
        }
        *self.question.lock() = Some(question);
    }
}

/// Turn a typed line into the reply for the open question.
fn answer(question: &Question, line: &str) -> Option<ServiceMessage> {
    match question {
        Question::Access { request_type, .. } => {
            let (decision, persist) = parse_access_answer(line)?;
            Some(ServiceMessage::AccessReply {
                decision,
                persist,
                request_type: *request_type,
            })
        }
        Question::SessionKey { challenge, .. } => {
            let key = line.trim();
            if key.is_empty() {
                Some(ServiceMessage::AuthCancelled {
                    challenge: *challenge,
                })
            } else {
                Some(ServiceMessage::AuthResponse {
                    challenge: *challenge,
                    session_key: Some(key.to_string()),
                })
            }
        }
    }
}

/// Parse an access answer into (decision, persist).
fn parse_access_answer(line: &str) -> Option<(AccessDecision, bool)> {
    match line.trim().to_lowercase().as_str() {
        "y" | "yes" => Some((AccessDecision::Allowed, false)),
        "n" | "no" => Some((AccessDecision::Rejected, false)),
        "a" | "always" => Some((AccessDecision::Allowed, true)),
        "v" | "never" => Some((AccessDecision::Rejected, true)),
        _ => None,
    }
}

impl AccessAuthority for ConsolePrompt {
    fn request_access(&mut self, device: &RemoteDevice, request_type: RequestType) {
        info!("Waiting for authorization for connection from {}", device);
        self.ask(Question::Access {
            device: device.clone(),
            request_type,
        });
    }

    fn cancel_access_request(&mut self, device: &RemoteDevice, request_type: RequestType) {
        let mut question = self.question.lock();
        let asked = matches!(
            question.as_ref(),
            Some(Question::Access { device: asked, request_type: asked_type })
                if asked == device && *asked_type == request_type
        );
        if asked {
            *question = None;
            println!("Access request from \"{}\" withdrawn.", device.display_name());
        }
    }

    fn request_session_key(&mut self, device: &RemoteDevice, challenge: u64) {
        self.ask(Question::SessionKey {
            device: device.clone(),
            challenge,
        });
    }

    fn dismiss_session_key_request(&mut self) {
        let mut question = self.question.lock();
        if matches!(question.as_ref(), Some(Question::SessionKey { .. })) {
            *question = None;
            println!("Session key request timed out.");
        }
    }
}
