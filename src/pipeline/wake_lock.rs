//! Keeps the machine awake while streaming.
//!
//! Held as a `systemd-inhibit` child process; releasing the lock kills it.

use std::process::{Child, Command, Stdio};
use tracing::{debug, warn};

pub struct WakeLock {
    child: Child,
}

impl WakeLock {
    /// Inhibit idle and sleep. `None` when the inhibitor is unavailable.
    pub fn acquire(why: &str) -> Option<Self> {
        let why = format!("--why={}", why);
        Self::spawn(
            "systemd-inhibit",
            &["--what=idle:sleep", "--who=camstream", &why, "sleep", "infinity"],
        )
    }

    fn spawn(program: &str, args: &[&str]) -> Option<Self> {
        match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => {
                debug!(pid = child.id(), "wake lock acquired");
                Some(Self { child })
            }
            Err(e) => {
                warn!(program, error = %e, "wake lock unavailable");
                None
            }
        }
    }

    #[cfg(test)]
    pub fn id(&self) -> u32 {
        self.child.id()
    }
}

impl Drop for WakeLock {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        debug!(pid = self.child.id(), "wake lock released");
    }
}
