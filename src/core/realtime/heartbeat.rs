//! Connection liveness probing.
//!
//! A [`HeartbeatMonitor`] runs as its own task for the lifetime of one
//! connection. It asks the connection writer to send a probe every interval and
//! declares the connection dead when no acknowledgment has been seen for the
//! configured timeout.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::base::HeartbeatConfig;

/// Acknowledgment bookkeeping shared between the reader and the monitor.
#[derive(Debug)]
pub struct Liveness {
    last_ack: Mutex<Instant>,
    acks: AtomicU64,
    probes: AtomicU64,
}

impl Liveness {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            last_ack: Mutex::new(Instant::now()),
            acks: AtomicU64::new(0),
            probes: AtomicU64::new(0),
        })
    }

    /// Record an acknowledgment from the remote side.
    pub fn ack(&self) {
        *self.last_ack.lock() = Instant::now();
        self.acks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_ack(&self) -> Instant {
        *self.last_ack.lock()
    }

    pub fn acks(&self) -> u64 {
        self.acks.load(Ordering::Relaxed)
    }

    pub fn probes(&self) -> u64 {
        self.probes.load(Ordering::Relaxed)
    }
}

/// Why a monitor stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The connection was torn down
    Cancelled,
    /// No acknowledgment within the timeout
    TimedOut { silent_for: Duration },
    /// The writer stopped accepting probes
    WriterGone,
}

pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    liveness: Arc<Liveness>,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig, liveness: Arc<Liveness>) -> Self {
        Self { config, liveness }
    }

    /// Probe until cancelled or the connection is found dead.
    ///
    /// Probes are handed to `probe_tx`; the connection writer turns them into
    /// transport pings.
    pub async fn run(
        self,
        probe_tx: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> HeartbeatOutcome {
        let interval = self.config.interval();
        let timeout = self.config.timeout();
        let mut next_probe = Instant::now() + interval;

        loop {
            let deadline = self.liveness.last_ack() + timeout;
            let wake = next_probe.min(deadline);

            tokio::select! {
                _ = cancel.cancelled() => return HeartbeatOutcome::Cancelled,
                _ = sleep_until(wake) => {}
            }

            let now = Instant::now();
            let silent_for = now.saturating_duration_since(self.liveness.last_ack());
            if silent_for >= timeout {
                warn!(
                    silent_ms = silent_for.as_millis() as u64,
                    timeout_ms = timeout.as_millis() as u64,
                    "Heartbeat timed out"
                );
                return HeartbeatOutcome::TimedOut { silent_for };
            }

            if now >= next_probe {
                let n = self.liveness.probes.fetch_add(1, Ordering::Relaxed);
                debug!(probe = n, "Sending heartbeat probe");
                if probe_tx
                    .send(Bytes::copy_from_slice(&n.to_be_bytes()))
                    .await
                    .is_err()
                {
                    return HeartbeatOutcome::WriterGone;
                }
                next_probe = now + interval;
            }
        }
    }
}
