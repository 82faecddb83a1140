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

//! Power resource held while a session transfers data.

use anyhow::{anyhow, Result};
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

/// A resource that keeps the host awake while held.
pub trait PowerResource: Send {
    fn acquire(&mut self) -> Result<()>;
    fn release(&mut self) -> Result<()>;
}

/// Single-holder wrapper around a [`PowerResource`].
///
/// Repeated acquires or releases never reach the backend.
pub struct PowerLock {
    backend: Box<dyn PowerResource>,
    held: bool,
}

impl PowerLock {
    pub fn new(backend: Box<dyn PowerResource>) -> Self {
        Self {
            backend,
            held: false,
        }
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn acquire(&mut self) {
        if self.is_held() {
            return;
        }
        match self.backend.acquire() {
            Ok(()) => {
                self.held = true;
                debug!("Power resource acquired");
            }
            Err(e) => warn!("Failed to acquire power resource: {}", e),
        }
    }

    pub fn release(&mut self) {
        if !self.is_held() {
            return;
        }
        // Considered released even on error; the next acquire starts clean.
        self.held = false;
        match self.backend.release() {
            Ok(()) => debug!("Power resource released"),
            Err(e) => warn!("Failed to release power resource: {}", e),
        }
    }

    pub fn into_inner(self) -> Box<dyn PowerResource> {
        self.backend
    }
}

/// Blocks system sleep with a `systemd-inhibit` child process.
pub struct SleepInhibitor {
    why: String,
    child: Option<Child>,
}

impl SleepInhibitor {
    pub fn new(why: impl Into<String>) -> Self {
        Self {
            why: why.into(),
            child: None,
        }
    }
}

impl PowerResource for SleepInhibitor {
    fn acquire(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Ok(());
        }

        let child = Command::new("systemd-inhibit")
            .args([
                "--what=sleep:idle",
                "--who=pbap-server",
                "--mode=block",
            ])
            .arg(format!("--why={}", self.why))
            .args(["sleep", "infinity"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| anyhow!("Failed to run systemd-inhibit: {}", e))?;

        info!("Sleep inhibitor started (pid {})", child.id());
        self.child = Some(child);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            child.kill()?;
            let _ = child.wait();
            info!("Sleep inhibitor stopped");
        }
        Ok(())
    }
}

impl Drop for SleepInhibitor {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// Power resource that holds nothing, for hosts without logind.
pub struct NoopPower;

impl PowerResource for NoopPower {
    fn acquire(&mut self) -> Result<()> {
        debug!("[NOOP] Would inhibit sleep");
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        debug!("[NOOP] Would allow sleep");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counts {
        acquires: AtomicUsize,
        releases: AtomicUsize,
    }

    struct CountingPower(Arc<Counts>);

    impl PowerResource for CountingPower {
        fn acquire(&mut self) -> Result<()> {
            self.0.acquires.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn release(&mut self) -> Result<()> {
            self.0.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingPower;

    impl PowerResource for FailingPower {
        fn acquire(&mut self) -> Result<()> {
            Err(anyhow!("no logind"))
        }

        fn release(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_double_release_is_noop() {
        let counts = Arc::new(Counts::default());
        let mut lock = PowerLock::new(Box::new(CountingPower(counts.clone())));

        lock.acquire();
        lock.release();
        assert!(!lock.is_held());
        lock.release();
        assert!(!lock.is_held());

        assert_eq!(counts.acquires.load(Ordering::SeqCst), 1);
        assert_eq!(counts.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_double_acquire_is_noop() {
        let counts = Arc::new(Counts::default());
        let mut lock = PowerLock::new(Box::new(CountingPower(counts.clone())));

        lock.acquire();
        lock.acquire();
        assert!(lock.is_held());
        assert_eq!(counts.acquires.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_acquire_is_not_held() {
        let mut lock = PowerLock::new(Box::new(FailingPower));
        lock.acquire();
        assert!(!lock.is_held());
    }
}
