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

//! Single-shot timers delivered as loop messages.

use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::events::{EventSender, ServiceMessage, TimerKind};

struct ArmedTimer {
    generation: u64,
    task: JoinHandle<()>,
}

/// Arms and cancels [`TimerKind`] timers.
///
/// At most one timer per kind is armed. A firing is only honoured by
/// [`Scheduler::claim`] if its generation is still the armed one, so a
/// message already queued when the timer was cancelled is dropped.
pub struct Scheduler {
    events: EventSender,
    armed: HashMap<TimerKind, ArmedTimer>,
    next_generation: u64,
}

impl Scheduler {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            armed: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Arm `kind` to fire once after `delay`, replacing any armed one.
    pub fn arm_once(&mut self, kind: TimerKind, delay: Duration) {
        self.cancel(kind);

        self.next_generation += 1;
        let generation = self.next_generation;
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            events.post(ServiceMessage::Timer { kind, generation });
        });

        debug!("Armed {:?} for {:?} (generation {})", kind, delay, generation);
        self.armed.insert(kind, ArmedTimer { generation, task });
    }

    /// Cancel `kind` if armed.
    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some(timer) = self.armed.remove(&kind) {
            timer.task.abort();
            debug!("Cancelled {:?} (generation {})", kind, timer.generation);
        }
    }

    /// Cancel every armed timer.
    pub fn cancel_all(&mut self) {
        for (_, timer) in self.armed.drain() {
            timer.task.abort();
        }
    }

    /// Accept a firing. Returns false for stale generations.
    pub fn claim(&mut self, kind: TimerKind, generation: u64) -> bool {
        match self.armed.get(&kind) {
            Some(timer) if timer.generation == generation => {
                self.armed.remove(&kind);
                true
            }
            _ => false,
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_timer(
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<ServiceMessage>,
    ) -> (TimerKind, u64) {
        match rx.recv().await {
            Some(ServiceMessage::Timer { kind, generation }) => (kind, generation),
            other => panic!("expected a timer message, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let (events, mut rx) = EventSender::channel();
        let mut scheduler = Scheduler::new(events);

        let start = tokio::time::Instant::now();
        scheduler.arm_once(TimerKind::UserTimeout, Duration::from_millis(30_000));
        let (kind, generation) = next_timer(&mut rx).await;

        assert_eq!(kind, TimerKind::UserTimeout);
        assert!(start.elapsed() >= Duration::from_millis(30_000));
        assert!(scheduler.claim(kind, generation));
        assert!(!scheduler.claim(kind, generation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_makes_previous_generation_stale() {
        let (events, mut rx) = EventSender::channel();
        let mut scheduler = Scheduler::new(events);

        scheduler.arm_once(TimerKind::ReleasePower, Duration::from_millis(10));
        scheduler.arm_once(TimerKind::ReleasePower, Duration::from_millis(20));
        let (kind, generation) = next_timer(&mut rx).await;

        assert!(!scheduler.claim(kind, generation - 1));
        assert!(scheduler.claim(kind, generation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fire_drops_message() {
        let (events, mut rx) = EventSender::channel();
        let mut scheduler = Scheduler::new(events);

        scheduler.arm_once(TimerKind::AuthTimeout, Duration::from_millis(5));
        let (kind, generation) = next_timer(&mut rx).await;

        // The message was already queued when the cancel happened.
        scheduler.cancel(TimerKind::AuthTimeout);
        assert!(!scheduler.claim(kind, generation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (events, mut rx) = EventSender::channel();
        let mut scheduler = Scheduler::new(events);

        scheduler.arm_once(TimerKind::UserTimeout, Duration::from_millis(5));
        scheduler.cancel(TimerKind::UserTimeout);
        scheduler.cancel(TimerKind::UserTimeout);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
