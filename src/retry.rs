//! Caller-side reconnect loop with bounded exponential backoff.

use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::error::{CameraError, Result};
use crate::traits::Camera;

/// Delays and attempt ceiling of the reconnect loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reopen attempt.
    pub initial_delay: Duration,
    /// Upper bound of any single delay.
    pub max_delay: Duration,
    /// Reopen attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reopen attempt `attempt` (0-based): `initial * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Make sure `camera` is usable, reopening it if the device went away.
///
/// Returns `Ok(true)` if a reopen was needed, so the caller can restore
/// state that does not survive one (such as control values).
pub fn ensure_ready<C: Camera + ?Sized>(camera: &mut C, policy: &ReconnectPolicy) -> Result<bool> {
    ensure_ready_with(camera, policy, thread::sleep)
}

/// [`ensure_ready`] with an injectable sleep.
pub fn ensure_ready_with<C, F>(camera: &mut C, policy: &ReconnectPolicy, mut sleep: F) -> Result<bool>
where
    C: Camera + ?Sized,
    F: FnMut(Duration),
{
    let mut last = match camera.check_ready() {
        Ok(()) => return Ok(false),
        Err(err) => err,
    };
    warn!("device not ready: {last}");

    for attempt in 0..policy.max_attempts {
        let delay = policy.delay_for(attempt);
        warn!(
            "reopen attempt {}/{} in {delay:?}",
            attempt + 1,
            policy.max_attempts
        );
        sleep(delay);

        match camera.reopen().and_then(|()| camera.check_ready()) {
            Ok(()) => {
                info!("device reopened after {} attempt(s)", attempt + 1);
                return Ok(true);
            }
            Err(err) => {
                warn!("reopen failed: {err}");
                last = err;
            }
        }
    }

    Err(CameraError::ReopenExhausted {
        attempts: policy.max_attempts,
        last: Box::new(last),
    })
}
