//! Emergency fallback state
//!
//! [`EmergencyState`] exists only while the engine is in Emergency mode. It
//! holds the backup playlist, the wrap-around cursor, the fallback error
//! count and the recovery probe timer. Dropping it cancels the probe, so
//! leaving Emergency for any reason (recovery, manual override, exhaustion,
//! shutdown) stops probing in the same step.

use playout_common::{FallbackEntry, Track};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Internal signals fed back into the engine loop
#[derive(Debug, Clone, PartialEq)]
pub enum EngineSignal {
    /// Recovery probe period elapsed
    ProbeDue { epoch: u64 },
    /// Outcome of an availability check against the normal queue head
    ProbeResult {
        epoch: u64,
        track_id: String,
        available: bool,
    },
    /// The provider's queue, fetched off the engine task
    ///
    /// `revision` is the local queue revision when the fetch was requested;
    /// `tracks` is None when the fetch failed.
    QueueFetched {
        purpose: RefreshPurpose,
        revision: u64,
        tracks: Option<Vec<Track>>,
    },
}

/// Why a queue fetch was requested, and so what follows it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPurpose {
    /// Operator asked for a refresh
    Requested,
    /// Error retry found the local queue empty
    ErrorRetry,
    /// Recovery probe found the local queue empty
    Probe { epoch: u64 },
}

/// Periodic probe trigger; aborted on drop
#[derive(Debug)]
pub struct ProbeTimer {
    handle: JoinHandle<()>,
}

impl ProbeTimer {
    /// Send `ProbeDue` every `interval`, first one after a full interval
    pub fn start(interval: Duration, epoch: u64, signals: mpsc::UnboundedSender<EngineSignal>) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                if signals.send(EngineSignal::ProbeDue { epoch }).is_err() {
                    break;
                }
            }
        });
        debug!("Recovery probe armed (every {}s)", interval.as_secs());
        Self { handle }
    }
}

impl Drop for ProbeTimer {
    fn drop(&mut self) {
        self.handle.abort();
        debug!("Recovery probe cancelled");
    }
}

/// Backup playlist playback state
#[derive(Debug)]
pub struct EmergencyState {
    playlist: Vec<FallbackEntry>,
    cursor: usize,
    consecutive_fallback_errors: u32,
    /// Identifies this emergency episode in probe signals
    epoch: u64,
    probe_in_flight: bool,
    _probe: ProbeTimer,
}

impl EmergencyState {
    /// `playlist` must not be empty
    pub fn new(playlist: Vec<FallbackEntry>, epoch: u64, probe: ProbeTimer) -> Self {
        Self {
            playlist,
            cursor: 0,
            consecutive_fallback_errors: 0,
            epoch,
            probe_in_flight: false,
            _probe: probe,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn playlist_len(&self) -> usize {
        self.playlist.len()
    }

    pub fn current_entry(&self) -> Option<&FallbackEntry> {
        self.playlist.get(self.cursor)
    }

    /// `cursor = (cursor + 1) mod len`
    pub fn advance(&mut self) {
        if !self.playlist.is_empty() {
            self.cursor = (self.cursor + 1) % self.playlist.len();
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn consecutive_fallback_errors(&self) -> u32 {
        self.consecutive_fallback_errors
    }

    /// Count one more fallback failure; returns the new count
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_fallback_errors += 1;
        self.consecutive_fallback_errors
    }

    pub fn record_success(&mut self) {
        self.consecutive_fallback_errors = 0;
    }

    pub fn probe_in_flight(&self) -> bool {
        self.probe_in_flight
    }

    pub fn set_probe_in_flight(&mut self, in_flight: bool) {
        self.probe_in_flight = in_flight;
    }
}

/// Minimum spacing between user-facing notices of one category
#[derive(Debug)]
pub struct NoticeThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl NoticeThrottle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// True if a notice may go out at `now` (and records it)
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
