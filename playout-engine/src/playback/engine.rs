//! Playout State Machine
//!
//! [`PlayoutEngine`] owns the [`PlayoutSession`], both channels (through the
//! transport), the envelope controller and the queue. It is driven from a
//! single task: user intents, periodic ticks, output events and probe
//! signals all arrive one at a time, so nothing here needs a lock.
//!
//! **Responsibilities:**
//! - Mode transitions (Idle, Loading, Playing, Crossfading, Paused, Error,
//!   Emergency)
//! - Start crossfades and solo fades from the end-of-track window
//! - Count consecutive failures and escalate to Emergency
//! - Run the emergency playlist and recover from it via the probe
//!
//! Ordering rules kept throughout:
//! - The queue head is popped before `TrackEnded` goes out for the track
//!   it replaced
//! - At most one crossfade exists at a time (`crossfade` is the guard)
//! - Loading a channel cancels its envelope first

use super::emergency::{EmergencyState, EngineSignal, NoticeThrottle, ProbeTimer, RefreshPurpose};
use super::envelope::{EnvelopeController, RampPurpose};
use super::output::{AudioOutput, OutputEvent};
use super::queue::{spawn_sync_worker, QueueManager};
use super::transport::DualTransport;
use crate::collaborators::{Collaborators, TrackResolver};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::state::{EmergencySnapshot, PlayoutSnapshot, SharedState};
use playout_common::events::{
    ChannelLabel, ErrorKind, NoticeSeverity, PlayoutEvent, PlayoutMode, TelemetryEvent,
};
use playout_common::time::{self, format_clock};
use playout_common::{FadeCurve, Track};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Upper bound on output event drain rounds per step
const MAX_EVENT_ROUNDS: usize = 8;

/// The aggregate playout state
#[derive(Debug)]
pub struct PlayoutSession {
    pub current_track: Option<Track>,
    pub queue: QueueManager,
    pub mode: PlayoutMode,
    /// User volume (0-100), separate from the per-channel envelope volume
    pub volume_target: u8,
    pub consecutive_error_count: u32,
    pub emergency: Option<EmergencyState>,
}

/// What a channel load is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadRole {
    Solo,
    Fallback,
    CrossfadeIncoming,
}

/// A load waiting for the output's Ready report
#[derive(Debug, Clone, Copy)]
struct PendingLoad {
    label: ChannelLabel,
    role: LoadRole,
    /// Output refused to start; waiting for a user resume
    blocked: bool,
}

/// Where the incoming track of a crossfade came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrossfadeSource {
    /// Queue head; popped when the crossfade completes
    QueueHead,
    /// Passed in directly (play-now, skip-previous)
    ///
    /// `requeue` puts the outgoing track back at the queue front, and
    /// `from_history` marks a track taken off the history. Both only take
    /// effect once the crossfade completes.
    Direct { requeue: bool, from_history: bool },
}

impl CrossfadeSource {
    /// Whether the outgoing track belongs in the history on completion
    fn records_history(self) -> bool {
        match self {
            CrossfadeSource::QueueHead => true,
            CrossfadeSource::Direct { requeue, .. } => !requeue,
        }
    }
}

#[derive(Debug)]
struct CrossfadeState {
    incoming: ChannelLabel,
    track: Track,
    duration: Duration,
    source: CrossfadeSource,
}

pub struct PlayoutEngine {
    config: EngineConfig,
    session: PlayoutSession,
    transport: DualTransport,
    envelope: EnvelopeController,
    collaborators: Collaborators,
    shared: Arc<SharedState>,
    signals: mpsc::UnboundedSender<EngineSignal>,
    pending: Option<PendingLoad>,
    crossfade: Option<CrossfadeState>,
    /// Per-track guard against re-triggering a crossfade on later ticks
    crossfade_triggered: bool,
    fade_out_started: bool,
    /// The current track has become audible
    current_on_air: bool,
    /// The current track is a fallback entry
    playing_fallback: bool,
    retry_at: Option<Instant>,
    history: VecDeque<Track>,
    notices: NoticeThrottle,
    emergency_epoch: u64,
}

impl PlayoutEngine {
    /// Create an idle engine
    ///
    /// Returns the receiving end of the engine's internal signal channel;
    /// whoever drives the engine feeds it back through
    /// [`PlayoutEngine::handle_signal`].
    pub fn new(
        config: EngineConfig,
        output: Box<dyn AudioOutput>,
        collaborators: Collaborators,
        shared: Arc<SharedState>,
    ) -> (Self, mpsc::UnboundedReceiver<EngineSignal>) {
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let (sync_tx, _worker) = spawn_sync_worker(
            collaborators.queue_provider.clone(),
            collaborators.telemetry.clone(),
        );

        let session = PlayoutSession {
            current_track: None,
            queue: QueueManager::new(sync_tx),
            mode: PlayoutMode::Idle,
            volume_target: config.initial_volume.min(100),
            consecutive_error_count: 0,
            emergency: None,
        };

        let engine = Self {
            notices: NoticeThrottle::new(config.notice_interval()),
            history: VecDeque::with_capacity(config.history_limit),
            config,
            session,
            transport: DualTransport::new(output),
            envelope: EnvelopeController::new(),
            collaborators,
            shared,
            signals,
            pending: None,
            crossfade: None,
            crossfade_triggered: false,
            fade_out_started: false,
            current_on_air: false,
            playing_fallback: false,
            retry_at: None,
            emergency_epoch: 0,
        };
        (engine, signal_rx)
    }

    // ========================================================================
    // Observers
    // ========================================================================

    pub fn mode(&self) -> PlayoutMode {
        self.session.mode
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.session.current_track.as_ref()
    }

    pub fn queue_snapshot(&self) -> Vec<Track> {
        self.session.queue.snapshot()
    }

    pub fn volume_target(&self) -> u8 {
        self.session.volume_target
    }

    pub fn consecutive_error_count(&self) -> u32 {
        self.session.consecutive_error_count
    }

    pub fn emergency(&self) -> Option<&EmergencyState> {
        self.session.emergency.as_ref()
    }

    pub fn is_crossfading(&self) -> bool {
        self.crossfade.is_some()
    }

    pub fn transport(&self) -> &DualTransport {
        &self.transport
    }

    pub fn history(&self) -> impl Iterator<Item = &Track> {
        self.history.iter()
    }

    /// Seconds into the current track
    pub fn elapsed(&self) -> f64 {
        if self.current_on_air {
            self.transport.position(self.transport.active())
        } else {
            0.0
        }
    }

    pub fn duration(&self) -> Option<f64> {
        self.session
            .current_track
            .as_ref()
            .and_then(|t| t.duration_seconds)
            .or_else(|| self.transport.active_channel().duration_seconds)
    }

    pub fn snapshot(&self) -> PlayoutSnapshot {
        PlayoutSnapshot {
            mode: self.session.mode,
            current_track: self.session.current_track.clone(),
            queue: self.session.queue.snapshot(),
            elapsed_seconds: self.elapsed(),
            duration_seconds: self.duration(),
            volume: self.session.volume_target,
            consecutive_errors: self.session.consecutive_error_count,
            active_channel: self.transport.active(),
            crossfade_in_progress: self.crossfade.is_some(),
            emergency: self.session.emergency.as_ref().map(|em| EmergencySnapshot {
                cursor: em.cursor(),
                playlist_len: em.playlist_len(),
                entry_name: em.current_entry().map(|e| e.name.clone()),
                consecutive_fallback_errors: em.consecutive_fallback_errors(),
            }),
        }
    }

    // ========================================================================
    // User intents
    // ========================================================================

    /// Start `track`, or interrupt the current one with it
    pub async fn play(&mut self, track: Track) -> Result<()> {
        match self.session.mode {
            PlayoutMode::Idle | PlayoutMode::Paused | PlayoutMode::Error | PlayoutMode::Loading => {
                self.take_if_head(&track);
                self.retry_at = None;
                self.retire_current(true);
                self.start_solo(track).await;
            }
            PlayoutMode::Playing | PlayoutMode::Crossfading | PlayoutMode::Emergency => {
                return self.play_now(track, false).await;
            }
        }
        self.pump_events().await;
        Ok(())
    }

    /// Interrupt whatever is on air with `track`
    ///
    /// With `requeue`, the interrupted track goes back to the queue front.
    pub async fn play_now(&mut self, track: Track, requeue: bool) -> Result<()> {
        self.take_if_head(&track);
        info!("Play now: '{}' (requeue: {})", track.display_name(), requeue);

        match self.session.mode {
            PlayoutMode::Playing => {
                self.crossfade_triggered = true;
                let quick = self.config.quick_crossfade();
                let source = CrossfadeSource::Direct {
                    requeue,
                    from_history: false,
                };
                self.begin_crossfade(track, quick, source).await;
            }
            PlayoutMode::Emergency => {
                self.exit_emergency(false).await;
                self.start_solo(track).await;
            }
            PlayoutMode::Crossfading
            | PlayoutMode::Idle
            | PlayoutMode::Paused
            | PlayoutMode::Error
            | PlayoutMode::Loading => {
                self.requeue_current(requeue);
                self.retry_at = None;
                self.retire_current(!requeue);
                self.start_solo(track).await;
            }
        }
        self.pump_events().await;
        Ok(())
    }

    pub fn enqueue(&mut self, track: Track) {
        debug!("Enqueue '{}'", track.id);
        self.session.queue.append(track);
        self.queue_changed();
    }

    pub fn queue_next(&mut self, track: Track) {
        debug!("Queue next '{}'", track.id);
        self.session.queue.insert_front(track);
        self.queue_changed();
    }

    pub fn remove_at(&mut self, index: usize) -> Result<Track> {
        let result = self.session.queue.remove_at(index);
        self.after_queue_op(result)
    }

    pub fn move_entry(&mut self, from: usize, to: usize) -> Result<()> {
        let result = self.session.queue.move_entry(from, to);
        self.after_queue_op(result)
    }

    pub fn clear_queue(&mut self) {
        self.session.queue.clear();
        self.queue_changed();
    }

    pub async fn skip_next(&mut self) -> Result<()> {
        match self.session.mode {
            PlayoutMode::Crossfading => {
                info!("Skip ignored: crossfade in progress");
            }
            PlayoutMode::Playing => match self.session.queue.head().cloned() {
                Some(head) => {
                    info!("Skip to '{}'", head.display_name());
                    self.crossfade_triggered = true;
                    let quick = self.config.quick_crossfade();
                    self.begin_crossfade(head, quick, CrossfadeSource::QueueHead)
                        .await;
                }
                None => {
                    info!("Skip with empty queue: stopping");
                    self.retire_current(true);
                    self.set_mode(PlayoutMode::Idle);
                }
            },
            PlayoutMode::Paused | PlayoutMode::Loading | PlayoutMode::Error => {
                self.retry_at = None;
                self.play_next().await;
            }
            PlayoutMode::Emergency => {
                self.retire_current(false);
                if let Some(em) = self.session.emergency.as_mut() {
                    em.advance();
                }
                self.play_fallback().await;
            }
            PlayoutMode::Idle => {
                if !self.session.queue.is_empty() {
                    self.play_next().await;
                }
            }
        }
        self.pump_events().await;
        Ok(())
    }

    /// Go back to the last finished track, or to the start of this one
    pub async fn skip_previous(&mut self) -> Result<()> {
        match self.session.mode {
            PlayoutMode::Crossfading => {
                info!("Skip previous ignored: crossfade in progress");
            }
            PlayoutMode::Playing => match self.history.pop_back() {
                Some(previous) => {
                    info!("Back to '{}'", previous.display_name());
                    self.crossfade_triggered = true;
                    let quick = self.config.quick_crossfade();
                    let source = CrossfadeSource::Direct {
                        requeue: true,
                        from_history: true,
                    };
                    self.begin_crossfade(previous, quick, source).await;
                }
                None => self.restart_current(),
            },
            PlayoutMode::Paused => match self.history.pop_back() {
                Some(previous) => {
                    self.requeue_current(true);
                    self.retire_current(false);
                    self.start_solo(previous).await;
                }
                None => self.restart_current(),
            },
            PlayoutMode::Idle => {
                if let Some(previous) = self.history.pop_back() {
                    self.start_solo(previous).await;
                }
            }
            PlayoutMode::Loading | PlayoutMode::Error | PlayoutMode::Emergency => {
                debug!("Skip previous ignored in {}", self.session.mode);
            }
        }
        self.pump_events().await;
        Ok(())
    }

    /// Idempotent: pausing while paused changes nothing
    pub fn pause(&mut self) {
        if self.session.mode != PlayoutMode::Playing {
            debug!("Pause ignored in {}", self.session.mode);
            return;
        }
        let active = self.transport.active();
        self.envelope.cancel_all();
        self.transport.pause(active);
        self.fade_out_started = false;
        self.set_mode(PlayoutMode::Paused);
    }

    pub async fn resume(&mut self) -> Result<()> {
        match self.session.mode {
            PlayoutMode::Paused => {
                let blocked = self.pending.as_ref().is_some_and(|p| p.blocked);
                if blocked {
                    if let Some(pending) = self.pending.as_mut() {
                        pending.blocked = false;
                    }
                    self.activate_pending().await;
                } else {
                    let active = self.transport.active();
                    match self.transport.play(active) {
                        Ok(()) => {
                            self.transport.set_volume(active, self.target_level());
                            let mode = if self.session.emergency.is_some() {
                                PlayoutMode::Emergency
                            } else {
                                PlayoutMode::Playing
                            };
                            self.set_mode(mode);
                        }
                        Err(e) => {
                            let track_id = self.current_track_id();
                            self.on_channel_failure(active, track_id, e).await;
                        }
                    }
                }
            }
            PlayoutMode::Idle => {
                if !self.session.queue.is_empty() {
                    self.play_next().await;
                }
            }
            _ => debug!("Resume ignored in {}", self.session.mode),
        }
        self.pump_events().await;
        Ok(())
    }

    pub async fn toggle(&mut self) -> Result<()> {
        match self.session.mode {
            PlayoutMode::Playing => {
                self.pause();
                Ok(())
            }
            PlayoutMode::Paused => self.resume().await,
            _ => Ok(()),
        }
    }

    /// Store the user volume; applied now only if no ramp is in flight
    pub fn set_volume(&mut self, volume: u8) {
        let volume = volume.min(100);
        self.session.volume_target = volume;

        let active = self.transport.active();
        if self.current_on_air && self.crossfade.is_none() && !self.envelope.is_ramping(active) {
            self.transport.set_volume(active, self.target_level());
        } else {
            debug!("Volume {} deferred until the running fade completes", volume);
        }

        self.shared.broadcast_event(PlayoutEvent::VolumeChanged {
            volume,
            timestamp: time::now(),
        });
    }

    /// Reposition the current track; returns the clamped position
    pub fn seek(&mut self, seconds: f64) -> Result<f64> {
        if !matches!(self.session.mode, PlayoutMode::Playing | PlayoutMode::Paused) {
            return Err(Error::InvalidState(format!(
                "cannot seek while {}",
                self.session.mode
            )));
        }

        let active = self.transport.active();
        let position = self.transport.seek(active, seconds);
        info!("Seek to {}", format_clock(position));

        let outside_window = self
            .transport
            .remaining(active)
            .map_or(true, |r| r > self.config.crossfade_lead_seconds);
        if outside_window {
            self.crossfade_triggered = false;
            if self.fade_out_started {
                self.fade_out_started = false;
                if self.envelope.purpose(active) == Some(RampPurpose::FadeOut) {
                    self.envelope.cancel(active);
                    self.transport.set_volume(active, self.target_level());
                }
            }
        }
        Ok(position)
    }

    /// Stop everything and cancel the recovery probe
    pub async fn shutdown(&mut self) {
        info!("Playout engine shutting down");
        self.session.emergency = None;
        self.retire_current(false);
        self.retry_at = None;
        self.set_mode(PlayoutMode::Idle);
    }

    /// Replace the local queue with the provider's copy, waiting for it
    ///
    /// Waits for earlier mutations to reach the provider first, so a
    /// refresh never resurrects a popped or removed entry. This holds the
    /// engine until the provider answers; a running engine uses
    /// [`PlayoutEngine::request_refresh`] instead.
    pub async fn refresh_queue(&mut self) -> Result<()> {
        self.session.queue.flushed().await;
        let tracks = self.collaborators.queue_provider.fetch_all().await?;
        debug!("Queue refreshed from provider: {} tracks", tracks.len());
        self.session.queue.replace_all(tracks);
        self.queue_changed();
        Ok(())
    }

    /// Fetch the provider's queue on a separate task
    ///
    /// The result comes back as [`EngineSignal::QueueFetched`] and is
    /// dropped if the local queue changed in the meantime.
    pub fn request_refresh(&self, purpose: RefreshPurpose) {
        let flushed = self.session.queue.flushed();
        let revision = self.session.queue.revision();
        let provider = self.collaborators.queue_provider.clone();
        let signals = self.signals.clone();
        tokio::spawn(async move {
            flushed.await;
            let tracks = match provider.fetch_all().await {
                Ok(tracks) => Some(tracks),
                Err(e) => {
                    warn!("Queue refresh failed: {}", e);
                    None
                }
            };
            let _ = signals.send(EngineSignal::QueueFetched {
                purpose,
                revision,
                tracks,
            });
        });
    }

    async fn on_queue_fetched(
        &mut self,
        purpose: RefreshPurpose,
        revision: u64,
        tracks: Option<Vec<Track>>,
    ) {
        match tracks {
            Some(tracks) if revision == self.session.queue.revision() => {
                debug!("Queue refreshed from provider: {} tracks", tracks.len());
                self.session.queue.replace_all(tracks);
                self.queue_changed();
            }
            Some(_) => debug!("Queue changed locally during refresh; provider copy dropped"),
            None => {}
        }

        match purpose {
            RefreshPurpose::Requested => {}
            RefreshPurpose::ErrorRetry => {
                let idle = self.session.mode == PlayoutMode::Idle
                    && self.session.current_track.is_none();
                if idle && !self.session.queue.is_empty() {
                    self.play_next().await;
                    self.pump_events().await;
                }
            }
            RefreshPurpose::Probe { epoch } => {
                let Some(em) = self.session.emergency.as_mut() else {
                    return;
                };
                if em.epoch() != epoch {
                    return;
                }
                match self.session.queue.head().map(|t| t.id.clone()) {
                    Some(head) => self.check_availability(epoch, head),
                    None => {
                        em.set_probe_in_flight(false);
                        debug!("Probe: normal queue is empty");
                    }
                }
            }
        }
    }

    // ========================================================================
    // Clock and signals
    // ========================================================================

    /// One engine step: sample ramps, drain output events, fire timed
    /// transitions
    pub async fn tick(&mut self) {
        let now = Instant::now();
        self.apply_envelope(now);
        self.pump_events().await;

        if self.session.mode == PlayoutMode::Error && self.retry_at.is_some_and(|at| now >= at) {
            self.retry_at = None;
            let exhausted = self.session.queue.is_empty();
            self.play_next().await;
            if exhausted {
                debug!("Nothing left to retry with; asking the queue provider");
                self.request_refresh(RefreshPurpose::ErrorRetry);
            }
        }

        if self.session.mode == PlayoutMode::Playing {
            self.check_end_window().await;
        }
        self.pump_events().await;
    }

    pub async fn handle_signal(&mut self, signal: EngineSignal) {
        match signal {
            EngineSignal::ProbeDue { epoch } => self.run_probe(epoch).await,
            EngineSignal::ProbeResult {
                epoch,
                track_id,
                available,
            } => {
                let Some(em) = self.session.emergency.as_mut() else {
                    return;
                };
                if em.epoch() != epoch {
                    return;
                }
                em.set_probe_in_flight(false);
                if available {
                    info!("Probe: '{}' is available again; leaving emergency", track_id);
                    self.exit_emergency(true).await;
                    self.pump_events().await;
                } else {
                    debug!("Probe: '{}' still unavailable", track_id);
                }
            }
            EngineSignal::QueueFetched {
                purpose,
                revision,
                tracks,
            } => self.on_queue_fetched(purpose, revision, tracks).await,
        }
    }

    // ========================================================================
    // Loading and activation
    // ========================================================================

    /// Resolve the stream, and fill in a missing duration from metadata
    async fn resolve(resolver: Arc<dyn TrackResolver>, track: Track) -> Result<(Track, String)> {
        let uri = match resolver.resolve_stream_url(&track.id).await {
            Ok(uri) => uri,
            Err(Error::ResourceUnavailable(msg)) => return Err(Error::ResourceUnavailable(msg)),
            Err(e) => {
                return Err(Error::ResourceUnavailable(format!(
                    "cannot resolve '{}': {}",
                    track.id, e
                )))
            }
        };

        if track.duration_seconds.is_some() {
            return Ok((track, uri));
        }
        match resolver.resolve_metadata(&track.id).await {
            Ok(meta) => Ok((
                Track {
                    duration_seconds: meta.duration_seconds,
                    ..track
                },
                uri,
            )),
            Err(e) => {
                debug!("No metadata for '{}': {}", track.id, e);
                Ok((track, uri))
            }
        }
    }

    /// Idle/Paused/Error -> Loading
    async fn start_solo(&mut self, track: Track) {
        self.stop_channels();
        let track_id = track.id.clone();

        let (track, uri) = match Self::resolve(self.collaborators.resolver.clone(), track).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.on_track_failure(Some(track_id), &e).await;
                return;
            }
        };

        let label = self.transport.inactive();
        self.transport.set_volume(label, 0.0);
        if let Err(e) = self.transport.load(label, &track, &uri) {
            self.on_track_failure(Some(track_id), &e).await;
            return;
        }

        info!("Loading '{}' on channel {}", track.display_name(), label);
        self.session.current_track = Some(track);
        self.playing_fallback = false;
        self.pending = Some(PendingLoad {
            label,
            role: LoadRole::Solo,
            blocked: false,
        });
        self.set_mode(PlayoutMode::Loading);
    }

    /// Start audible playback of the pending load
    async fn activate_pending(&mut self) {
        let Some(pending) = self.pending else {
            return;
        };
        let label = pending.label;

        self.transport.set_volume(label, 0.0);
        if let Err(e) = self.transport.play(label) {
            let track_id = self.transport.channel(label).bound_track_id().map(str::to_string);
            self.on_channel_failure(label, track_id, e).await;
            return;
        }
        self.pending = None;
        let now = Instant::now();

        match pending.role {
            LoadRole::Solo | LoadRole::Fallback => {
                let other = label.other();
                if self.transport.channel(other).bound_track.is_some() {
                    self.envelope.cancel(other);
                    self.transport.stop(other);
                }
                self.transport.set_active(label);
                self.envelope.ramp_volume(
                    label,
                    0.0,
                    self.target_level(),
                    self.config.fade_in(),
                    FadeCurve::EaseOutCubic,
                    RampPurpose::FadeIn,
                    now,
                );
                self.current_on_air = true;
                self.crossfade_triggered = false;
                self.fade_out_started = false;
                self.retry_at = None;

                if pending.role == LoadRole::Solo {
                    self.session.consecutive_error_count = 0;
                    self.set_mode(PlayoutMode::Playing);
                } else {
                    if let Some(em) = self.session.emergency.as_mut() {
                        em.record_success();
                    }
                    self.set_mode(PlayoutMode::Emergency);
                }

                if let Some(track) = &self.session.current_track {
                    info!("Now playing '{}' on channel {}", track.display_name(), label);
                    self.emit(TelemetryEvent::PlayStarted {
                        track_id: track.id.clone(),
                    });
                }
            }
            LoadRole::CrossfadeIncoming => {
                let Some((duration, track_id)) = self
                    .crossfade
                    .as_ref()
                    .map(|xf| (xf.duration, xf.track.id.clone()))
                else {
                    return;
                };
                let outgoing = self.transport.active();
                let outgoing_level = self.transport.volume(outgoing);

                self.envelope.ramp_volume(
                    label,
                    0.0,
                    self.target_level(),
                    duration,
                    FadeCurve::Linear,
                    RampPurpose::CrossfadeIn,
                    now,
                );
                self.envelope.ramp_volume(
                    outgoing,
                    outgoing_level,
                    0.0,
                    duration,
                    FadeCurve::Linear,
                    RampPurpose::CrossfadeOut,
                    now,
                );
                info!(
                    "Crossfade {} -> {} over {}ms",
                    outgoing,
                    label,
                    duration.as_millis()
                );
                self.emit(TelemetryEvent::PlayStarted { track_id });
            }
        }
    }

    // ========================================================================
    // Crossfade and end-of-track
    // ========================================================================

    /// Playing: crossfade or solo fade-out once inside the lead window
    async fn check_end_window(&mut self) {
        if self.crossfade.is_some() || self.pending.is_some() {
            return;
        }
        let active = self.transport.active();
        let Some(remaining) = self.transport.remaining(active) else {
            return;
        };
        if remaining > self.config.crossfade_lead_seconds {
            return;
        }

        if let Some(head) = self.session.queue.head().cloned() {
            // Short tracks hand over at their natural end instead
            let long_enough =
                self.config.allows_crossfade(self.transport.channel(active).duration_seconds);
            if long_enough && !self.crossfade_triggered {
                self.crossfade_triggered = true;
                info!(
                    "{:.1}s left: crossfading into '{}'",
                    remaining,
                    head.display_name()
                );
                let duration = self.config.crossfade();
                self.begin_crossfade(head, duration, CrossfadeSource::QueueHead)
                    .await;
            }
        } else if !self.fade_out_started {
            self.fade_out_started = true;
            debug!("{:.1}s left and nothing queued: fading out", remaining);
            let level = self.transport.volume(active);
            self.envelope.ramp_volume(
                active,
                level,
                0.0,
                self.config.fade_out(),
                FadeCurve::EaseInCubic,
                RampPurpose::FadeOut,
                Instant::now(),
            );
        }
    }

    /// Playing -> Crossfading: load `track` on the inactive channel
    async fn begin_crossfade(
        &mut self,
        track: Track,
        duration: Duration,
        source: CrossfadeSource,
    ) {
        if self.crossfade.is_some() {
            warn!("Crossfade already in progress; '{}' not started", track.id);
            return;
        }
        let incoming = self.transport.inactive();
        self.crossfade = Some(CrossfadeState {
            incoming,
            track: track.clone(),
            duration,
            source,
        });
        self.set_mode(PlayoutMode::Crossfading);

        let (track, uri) = match Self::resolve(self.collaborators.resolver.clone(), track).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.on_crossfade_failure(&e).await;
                return;
            }
        };
        if let Some(xf) = self.crossfade.as_mut() {
            xf.track = track.clone();
        }

        self.envelope.cancel(incoming);
        self.transport.set_volume(incoming, 0.0);
        if let Err(e) = self.transport.load(incoming, &track, &uri) {
            self.on_crossfade_failure(&e).await;
            return;
        }
        self.pending = Some(PendingLoad {
            label: incoming,
            role: LoadRole::CrossfadeIncoming,
            blocked: false,
        });
    }

    /// Crossfading -> Playing: swap channels, pop the head, end the old track
    fn finish_crossfade(&mut self) {
        let Some(xf) = self.crossfade.take() else {
            return;
        };
        self.pending = None;

        let outgoing = self.transport.active();
        self.envelope.cancel(outgoing);
        self.transport.stop(outgoing);
        self.transport.set_active(xf.incoming);
        self.envelope.cancel(xf.incoming);
        self.transport.set_volume(xf.incoming, self.target_level());

        match xf.source {
            CrossfadeSource::QueueHead => {
                if self.session.queue.head().is_some_and(|h| h.id == xf.track.id) {
                    self.session.queue.pop_front();
                    self.queue_changed();
                } else {
                    warn!("Queue head changed during crossfade; '{}' not popped", xf.track.id);
                }
            }
            CrossfadeSource::Direct { requeue, .. } => self.requeue_current(requeue),
        }

        let finished = self.session.current_track.replace(xf.track);
        self.crossfade_triggered = false;
        self.fade_out_started = false;
        self.current_on_air = true;
        self.playing_fallback = false;

        if let Some(old) = finished {
            self.emit(TelemetryEvent::TrackEnded {
                track_id: old.id.clone(),
            });
            if xf.source.records_history() {
                self.remember(old);
            }
        }
        self.set_mode(PlayoutMode::Playing);
    }

    /// Current track done: start the queue head, or go Idle
    async fn play_next(&mut self) {
        let next = self.session.queue.pop_front();
        if next.is_some() {
            self.queue_changed();
        }
        self.retire_current(true);

        match next {
            Some(track) => self.start_solo(track).await,
            None => {
                info!("Queue empty; idle");
                self.set_mode(PlayoutMode::Idle);
            }
        }
    }

    async fn on_natural_end(&mut self) {
        if let Some(track) = &self.session.current_track {
            debug!("'{}' reached its end", track.id);
        }
        if self.session.emergency.is_some() {
            self.retire_current(false);
            if let Some(em) = self.session.emergency.as_mut() {
                em.advance();
            }
            self.play_fallback().await;
        } else {
            self.play_next().await;
        }
    }

    // ========================================================================
    // Failures
    // ========================================================================

    /// Route a channel failure to the handler for what that channel is doing
    async fn on_channel_failure(
        &mut self,
        label: ChannelLabel,
        track_id: Option<String>,
        err: Error,
    ) {
        if self.crossfade.as_ref().is_some_and(|xf| xf.incoming == label) {
            self.on_crossfade_failure(&err).await;
        } else if matches!(err, Error::PlaybackBlocked(_)) {
            self.on_blocked(label, track_id, &err);
        } else if self.session.emergency.is_some() {
            self.on_fallback_failure(track_id, &err).await;
        } else {
            self.on_track_failure(track_id, &err).await;
        }
    }

    /// Any playing state -> Error (or Emergency at the threshold)
    async fn on_track_failure(&mut self, track_id: Option<String>, err: &Error) {
        self.session.consecutive_error_count += 1;
        let count = self.session.consecutive_error_count;
        let max = self.config.max_consecutive_errors;
        warn!("Playback failure {}/{}: {}", count, max, err);

        self.emit(TelemetryEvent::Error {
            track_id: track_id.clone(),
            kind: err.kind().unwrap_or(ErrorKind::ResourceUnavailable),
        });
        self.stop_channels();
        self.session.current_track = None;
        self.current_on_air = false;

        if count >= max {
            self.enter_emergency().await;
            return;
        }

        self.set_mode(PlayoutMode::Error);
        self.retry_at = Some(Instant::now() + self.config.error_retry_delay());
        self.notify(
            NoticeSeverity::Warning,
            format!(
                "Could not play {}; skipping ({}/{})",
                track_id.as_deref().unwrap_or("track"),
                count,
                max
            ),
        );
    }

    /// Incoming channel failed: keep the outgoing track on air
    async fn on_crossfade_failure(&mut self, err: &Error) {
        let Some(xf) = self.crossfade.take() else {
            return;
        };
        let blocked = matches!(err, Error::PlaybackBlocked(_));
        warn!("Crossfade into '{}' failed: {}", xf.track.id, err);

        self.pending = None;
        self.envelope.cancel(xf.incoming);
        self.transport.stop(xf.incoming);
        self.emit(TelemetryEvent::Error {
            track_id: Some(xf.track.id.clone()),
            kind: err.kind().unwrap_or(ErrorKind::ResourceUnavailable),
        });

        match xf.source {
            CrossfadeSource::QueueHead => {
                if !blocked && self.session.queue.head().is_some_and(|h| h.id == xf.track.id) {
                    self.session.queue.pop_front();
                    self.queue_changed();
                }
            }
            // The outgoing track was never requeued; give the history entry back
            CrossfadeSource::Direct { from_history, .. } => {
                if from_history {
                    self.history.push_back(xf.track.clone());
                }
            }
        }

        let active = self.transport.active();
        if self.current_on_air {
            let level = self.transport.volume(active);
            self.envelope.ramp_volume(
                active,
                level,
                self.target_level(),
                self.config.quick_crossfade(),
                FadeCurve::Linear,
                RampPurpose::Restore,
                Instant::now(),
            );
            self.set_mode(PlayoutMode::Playing);
        } else {
            self.set_mode(PlayoutMode::Idle);
        }

        if blocked {
            self.notify(
                NoticeSeverity::Warning,
                format!("Playback of {} was blocked by the output", xf.track.id),
            );
            return;
        }

        self.session.consecutive_error_count += 1;
        let count = self.session.consecutive_error_count;
        if count >= self.config.max_consecutive_errors {
            self.stop_channels();
            self.session.current_track = None;
            self.current_on_air = false;
            self.enter_emergency().await;
        } else {
            self.notify(
                NoticeSeverity::Warning,
                format!(
                    "Could not load {}; skipped ({}/{})",
                    xf.track.id, count, self.config.max_consecutive_errors
                ),
            );
        }
    }

    /// Output refused to start: wait for the user, never auto-skip
    fn on_blocked(&mut self, label: ChannelLabel, track_id: Option<String>, err: &Error) {
        warn!("Channel {}: {}", label, err);
        self.emit(TelemetryEvent::Error {
            track_id,
            kind: ErrorKind::PlaybackBlocked,
        });
        if let Some(pending) = self.pending.as_mut() {
            if pending.label == label {
                pending.blocked = true;
            }
        }
        self.set_mode(PlayoutMode::Paused);
        self.notify(
            NoticeSeverity::Warning,
            "Playback was blocked by the output; resume to start".to_string(),
        );
    }

    // ========================================================================
    // Emergency
    // ========================================================================

    /// Error escalation: switch to the backup playlist
    async fn enter_emergency(&mut self) {
        if self.session.emergency.is_some() {
            return;
        }
        self.retry_at = None;
        self.stop_channels();

        let playlist = match self.collaborators.fallback.fetch_emergency_playlist().await {
            Ok(playlist) => playlist,
            Err(e) => {
                warn!("Emergency playlist fetch failed: {}", e);
                Vec::new()
            }
        };
        if playlist.is_empty() {
            error!("No emergency playlist available; playout stays idle");
            self.emit(TelemetryEvent::Error {
                track_id: None,
                kind: ErrorKind::FallbackUnavailable,
            });
            self.notify(
                NoticeSeverity::Fatal,
                "Playout stopped: no emergency playlist available".to_string(),
            );
            self.set_mode(PlayoutMode::Idle);
            return;
        }

        self.emergency_epoch += 1;
        let probe = ProbeTimer::start(
            self.config.recovery_probe_interval(),
            self.emergency_epoch,
            self.signals.clone(),
        );
        warn!(
            "Entering emergency mode after {} consecutive errors ({} fallback entries)",
            self.session.consecutive_error_count,
            playlist.len()
        );
        self.session.emergency = Some(EmergencyState::new(playlist, self.emergency_epoch, probe));
        self.emit(TelemetryEvent::EmergencyEntered);
        self.notify_emergency(
            NoticeSeverity::Warning,
            "Playout switched to the emergency playlist".to_string(),
        );
        self.set_mode(PlayoutMode::Emergency);
        self.play_fallback().await;
    }

    /// Load the fallback entry at the cursor, moving on past entries that fail
    async fn play_fallback(&mut self) {
        loop {
            let Some(em) = self.session.emergency.as_ref() else {
                return;
            };
            let Some(entry) = em.current_entry().cloned() else {
                return;
            };
            let track = Track::from_fallback(&entry, em.cursor());

            self.stop_channels();
            let label = self.transport.inactive();
            self.transport.set_volume(label, 0.0);
            match self.transport.load(label, &track, &entry.uri) {
                Ok(()) => {
                    info!("Emergency: loading '{}' on channel {}", entry.name, label);
                    self.session.current_track = Some(track);
                    self.playing_fallback = true;
                    self.pending = Some(PendingLoad {
                        label,
                        role: LoadRole::Fallback,
                        blocked: false,
                    });
                    return;
                }
                Err(e) => {
                    if !self.record_fallback_failure(Some(track.id), &e) {
                        return;
                    }
                }
            }
        }
    }

    async fn on_fallback_failure(&mut self, track_id: Option<String>, err: &Error) {
        if self.record_fallback_failure(track_id, err) {
            self.play_fallback().await;
        }
    }

    /// Count a fallback failure and move the cursor on
    ///
    /// Returns false once the fallback threshold is reached (emergency has
    /// been abandoned).
    fn record_fallback_failure(&mut self, track_id: Option<String>, err: &Error) -> bool {
        let Some(em) = self.session.emergency.as_mut() else {
            return false;
        };
        let count = em.record_failure();
        em.advance();
        let max = self.config.max_fallback_errors;
        warn!("Fallback failure {}/{}: {}", count, max, err);

        self.stop_channels();
        self.session.current_track = None;
        self.current_on_air = false;
        self.emit(TelemetryEvent::Error {
            track_id,
            kind: err.kind().unwrap_or(ErrorKind::ResourceUnavailable),
        });

        if count >= max {
            self.abandon_emergency();
            return false;
        }
        self.notify_emergency(
            NoticeSeverity::Warning,
            format!("Emergency playlist entry failed ({}/{})", count, max),
        );
        true
    }

    /// Fallback exhausted: stop and require an operator
    fn abandon_emergency(&mut self) {
        self.session.emergency = None;
        self.stop_channels();
        self.session.current_track = None;
        self.current_on_air = false;
        self.playing_fallback = false;

        error!("Emergency playlist exhausted; playout stopped");
        self.emit(TelemetryEvent::Error {
            track_id: None,
            kind: ErrorKind::FallbackExhausted,
        });
        self.notify(
            NoticeSeverity::Fatal,
            "Emergency playlist exhausted; operator action required".to_string(),
        );
        self.set_mode(PlayoutMode::Idle);
    }

    async fn run_probe(&mut self, epoch: u64) {
        match self.session.emergency.as_ref() {
            Some(em) if em.epoch() == epoch && !em.probe_in_flight() => {}
            _ => return,
        }

        if let Some(em) = self.session.emergency.as_mut() {
            em.set_probe_in_flight(true);
        }
        match self.session.queue.head().map(|t| t.id.clone()) {
            Some(head) => self.check_availability(epoch, head),
            None => self.request_refresh(RefreshPurpose::Probe { epoch }),
        }
    }

    /// Ask the resolver about `head` off the engine task
    fn check_availability(&self, epoch: u64, head: String) {
        debug!("Probe: checking '{}'", head);
        let resolver = self.collaborators.resolver.clone();
        let signals = self.signals.clone();
        tokio::spawn(async move {
            let available = match resolver.probe_availability(&head).await {
                Ok(available) => available,
                Err(e) => {
                    debug!("Probe of '{}' failed: {}", head, e);
                    false
                }
            };
            let _ = signals.send(EngineSignal::ProbeResult {
                epoch,
                track_id: head,
                available,
            });
        });
    }

    /// Leave Emergency; the probe is cancelled with the emergency state
    async fn exit_emergency(&mut self, resume_queue: bool) {
        if self.session.emergency.take().is_none() {
            return;
        }
        self.session.consecutive_error_count = 0;
        info!("Leaving emergency mode");
        self.emit(TelemetryEvent::EmergencyExited);
        self.notify_emergency(NoticeSeverity::Info, "Normal playout resumed".to_string());

        if resume_queue {
            self.play_next().await;
        } else {
            self.retire_current(false);
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn target_level(&self) -> f32 {
        f32::from(self.session.volume_target) / 100.0
    }

    fn current_track_id(&self) -> Option<String> {
        self.session.current_track.as_ref().map(|t| t.id.clone())
    }

    /// Sample ramps into channel volumes; completes a crossfade when its
    /// incoming ramp lands
    fn apply_envelope(&mut self, now: Instant) {
        let mut crossfade_done = false;
        for step in self.envelope.advance(now) {
            self.transport.set_volume(step.label, step.volume);
            match step.completed {
                Some(RampPurpose::CrossfadeIn) => {
                    if self.crossfade.as_ref().is_some_and(|xf| xf.incoming == step.label) {
                        crossfade_done = true;
                    }
                }
                Some(RampPurpose::FadeIn) | Some(RampPurpose::Restore) => {
                    // User volume may have moved while the ramp ran
                    if self.transport.is_active(step.label) {
                        self.transport.set_volume(step.label, self.target_level());
                    }
                }
                _ => {}
            }
        }
        if crossfade_done {
            self.finish_crossfade();
        }
    }

    async fn pump_events(&mut self) {
        for _ in 0..MAX_EVENT_ROUNDS {
            let events = self.transport.poll_events();
            if events.is_empty() {
                return;
            }
            for event in events {
                self.handle_output_event(event).await;
            }
        }
        warn!("Output events still pending after {} rounds", MAX_EVENT_ROUNDS);
    }

    async fn handle_output_event(&mut self, event: OutputEvent) {
        match event {
            OutputEvent::Ready { label, duration } => {
                if !self.pending.is_some_and(|p| p.label == label && !p.blocked) {
                    debug!("Ignoring stale ready on channel {}", label);
                    return;
                }
                if self.transport.mark_ready(label, duration) {
                    self.activate_pending().await;
                }
            }
            OutputEvent::Ended { label } => {
                if let Some(incoming) = self.crossfade.as_ref().map(|xf| xf.incoming) {
                    if incoming == label {
                        self.finish_crossfade();
                        self.on_natural_end().await;
                    }
                    // Outgoing ending early: the running ramps finish the handover
                    return;
                }
                if self.transport.is_active(label) && self.pending.is_none() && self.current_on_air {
                    self.on_natural_end().await;
                }
            }
            OutputEvent::Error { label, kind } => {
                let relevant = self.pending.is_some_and(|p| p.label == label)
                    || self.crossfade.as_ref().is_some_and(|xf| xf.incoming == label)
                    || (self.transport.is_active(label) && self.current_on_air);
                if !relevant {
                    debug!("Ignoring {} on idle channel {}", kind, label);
                    return;
                }
                let track_id = self
                    .transport
                    .channel(label)
                    .bound_track_id()
                    .map(str::to_string)
                    .or_else(|| self.current_track_id());
                let err = match kind {
                    ErrorKind::PlaybackBlocked => {
                        Error::PlaybackBlocked(format!("channel {} refused playback", label))
                    }
                    _ => Error::ResourceUnavailable(format!("channel {} stream failed", label)),
                };
                self.on_channel_failure(label, track_id, err).await;
            }
        }
    }

    /// Stop both channels and forget any load or crossfade in progress
    fn stop_channels(&mut self) {
        self.envelope.cancel_all();
        self.transport.stop_all();
        self.pending = None;
        self.crossfade = None;
        self.crossfade_triggered = false;
        self.fade_out_started = false;
    }

    /// Take the current track off air
    ///
    /// `TrackEnded` goes out only for a track that actually started.
    fn retire_current(&mut self, record_history: bool) {
        self.stop_channels();
        let was_fallback = std::mem::take(&mut self.playing_fallback);
        let was_on_air = std::mem::take(&mut self.current_on_air);

        if let Some(track) = self.session.current_track.take() {
            if was_on_air {
                self.emit(TelemetryEvent::TrackEnded {
                    track_id: track.id.clone(),
                });
                if record_history && !was_fallback {
                    self.remember(track);
                }
            }
        }
    }

    fn requeue_current(&mut self, requeue: bool) {
        if !requeue || self.playing_fallback {
            return;
        }
        if let Some(current) = self.session.current_track.clone() {
            self.session.queue.insert_front(current);
            self.queue_changed();
        }
    }

    /// Drop `track` from the queue head if it is there
    fn take_if_head(&mut self, track: &Track) {
        if self.session.queue.head().is_some_and(|h| h.id == track.id) {
            self.session.queue.pop_front();
            self.queue_changed();
        }
    }

    fn restart_current(&mut self) {
        if self.session.current_track.is_none() {
            return;
        }
        let active = self.transport.active();
        self.transport.seek(active, 0.0);
        self.crossfade_triggered = false;
        if self.fade_out_started {
            self.fade_out_started = false;
            self.envelope.cancel(active);
            if self.session.mode == PlayoutMode::Playing {
                self.transport.set_volume(active, self.target_level());
            }
        }
        info!("Restarted current track");
    }

    fn remember(&mut self, track: Track) {
        if self.config.history_limit == 0 {
            return;
        }
        while self.history.len() >= self.config.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(track);
    }

    fn after_queue_op<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.queue_changed();
                Ok(value)
            }
            Err(e) => {
                if let Some(kind) = e.kind() {
                    self.emit(TelemetryEvent::Error { track_id: None, kind });
                }
                Err(e)
            }
        }
    }

    fn set_mode(&mut self, mode: PlayoutMode) {
        let old = self.session.mode;
        if old == mode {
            return;
        }
        debug!("Mode {} -> {}", old, mode);
        self.session.mode = mode;
        self.shared.broadcast_event(PlayoutEvent::ModeChanged {
            old_mode: old,
            new_mode: mode,
            timestamp: time::now(),
        });
    }

    fn queue_changed(&self) {
        self.shared.broadcast_event(PlayoutEvent::QueueChanged {
            length: self.session.queue.len(),
            timestamp: time::now(),
        });
    }

    fn emit(&self, event: TelemetryEvent) {
        if let Err(e) = self.collaborators.telemetry.emit(event) {
            warn!("Telemetry emit failed: {}", e);
        }
    }

    fn notify(&self, severity: NoticeSeverity, message: String) {
        match severity {
            NoticeSeverity::Info => info!("Notice: {}", message),
            NoticeSeverity::Warning => warn!("Notice: {}", message),
            NoticeSeverity::Fatal => error!("Notice: {}", message),
        }
        self.shared.broadcast_event(PlayoutEvent::Notice {
            severity,
            message,
            timestamp: time::now(),
        });
    }

    /// Emergency notices share one rate limit; fatal ones always go out
    fn notify_emergency(&mut self, severity: NoticeSeverity, message: String) {
        if severity != NoticeSeverity::Fatal && !self.notices.allow(Instant::now()) {
            debug!("Notice suppressed (rate limit): {}", message);
            return;
        }
        self.notify(severity, message);
    }
}
