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

//! Session lifecycle: admission control, the session coordinator and the
//! resources a session holds.

mod admission;
mod auth;
mod coordinator;
mod power;
mod timer;

pub use admission::Admission;
pub use auth::{AuthGate, AuthReply};
pub use coordinator::{Coordinator, CoordinatorParts, SessionContext};
pub use power::{NoopPower, PowerLock, PowerResource, SleepInhibitor};
pub use timer::Scheduler;
