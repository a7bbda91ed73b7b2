//! Test helpers for playout-engine integration tests
//!
//! Provides in-process stand-ins for every collaborator plus a harness that
//! drives a [`PlayoutEngine`] on the paused tokio clock:
//! - MockOutput: ClockOutput with failure injection and a volume log
//! - RecordingTelemetry: keeps every telemetry event in order
//! - MemoryQueueProvider: remote queue held in memory, optionally failing
//!   or slow to answer fetches
//! - StaticResolver: catalogue with switchable availability
//! - StaticFallback: fixed emergency playlist

#![allow(dead_code)]

use async_trait::async_trait;
use playout_common::events::{ChannelLabel, PlayoutMode, TelemetryEvent};
use playout_common::{FallbackEntry, Track};
use playout_engine::collaborators::{
    Collaborators, FallbackProvider, QueueProvider, Telemetry, TrackResolver,
};
use playout_engine::config::EngineConfig;
use playout_engine::error::{Error, Result};
use playout_engine::playback::{AudioOutput, ClockOutput, EngineSignal, OutputEvent, PlayoutEngine};
use playout_engine::state::SharedState;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================================
// Audio output
// ============================================================================

/// Knobs and observations shared between a test and its MockOutput
#[derive(Debug, Default)]
pub struct OutputControl {
    /// Opening any of these uris fails with ResourceUnavailable
    pub failing_uris: HashSet<String>,
    /// `play` fails with PlaybackBlocked while set
    pub block_play: bool,
    /// Delivered ahead of the clock's own events on the next poll
    pub injected: Vec<OutputEvent>,
    /// Every uri opened, in order
    pub opened: Vec<(ChannelLabel, String)>,
    pub volumes: HashMap<ChannelLabel, f32>,
}

pub struct MockOutput {
    inner: ClockOutput,
    control: Arc<Mutex<OutputControl>>,
}

impl MockOutput {
    pub fn new() -> (Self, Arc<Mutex<OutputControl>>) {
        let control = Arc::new(Mutex::new(OutputControl::default()));
        (
            Self {
                inner: ClockOutput::new(),
                control: control.clone(),
            },
            control,
        )
    }
}

impl AudioOutput for MockOutput {
    fn open(&mut self, label: ChannelLabel, uri: &str, duration_hint: Option<f64>) -> Result<()> {
        {
            let mut control = self.control.lock().unwrap();
            control.opened.push((label, uri.to_string()));
            if control.failing_uris.contains(uri) {
                return Err(Error::ResourceUnavailable(format!("cannot open {}", uri)));
            }
        }
        self.inner.open(label, uri, duration_hint)
    }

    fn play(&mut self, label: ChannelLabel) -> Result<()> {
        if self.control.lock().unwrap().block_play {
            return Err(Error::PlaybackBlocked("autoplay refused".to_string()));
        }
        self.inner.play(label)
    }

    fn pause(&mut self, label: ChannelLabel) {
        self.inner.pause(label)
    }

    fn stop(&mut self, label: ChannelLabel) {
        self.inner.stop(label)
    }

    fn seek(&mut self, label: ChannelLabel, seconds: f64) {
        self.inner.seek(label, seconds)
    }

    fn set_volume(&mut self, label: ChannelLabel, volume: f32) {
        self.control.lock().unwrap().volumes.insert(label, volume);
        self.inner.set_volume(label, volume)
    }

    fn position(&self, label: ChannelLabel) -> f64 {
        self.inner.position(label)
    }

    fn poll_events(&mut self) -> Vec<OutputEvent> {
        let mut events = std::mem::take(&mut self.control.lock().unwrap().injected);
        events.extend(self.inner.poll_events());
        events
    }
}

// ============================================================================
// Telemetry
// ============================================================================

#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&TelemetryEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl Telemetry for RecordingTelemetry {
    fn emit(&self, event: TelemetryEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

// ============================================================================
// Queue provider
// ============================================================================

/// One recorded provider call
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCall {
    Append(String),
    InsertFront(String),
    RemoveAt(usize),
    Move(usize, usize),
    Clear,
}

#[derive(Default)]
pub struct MemoryQueueProvider {
    tracks: Mutex<Vec<Track>>,
    calls: Mutex<Vec<ProviderCall>>,
    fail: Mutex<bool>,
    fetch_delay: Mutex<Option<Duration>>,
}

impl MemoryQueueProvider {
    pub fn with_tracks(tracks: Vec<Track>) -> Self {
        Self {
            tracks: Mutex::new(tracks),
            ..Self::default()
        }
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.tracks.lock().unwrap().clone()
    }

    pub fn track_ids(&self) -> Vec<String> {
        self.tracks().into_iter().map(|t| t.id).collect()
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    /// `fetch_all` sleeps this long before answering
    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = Some(delay);
    }

    /// Change the remote queue behind the engine's back (scheduler insert)
    pub fn push_external(&self, track: Track) {
        self.tracks.lock().unwrap().push(track);
    }

    fn record(&self, call: ProviderCall) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if *self.fail.lock().unwrap() {
            return Err(Error::Internal("queue store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueProvider for MemoryQueueProvider {
    async fn append(&self, track: &Track) -> Result<()> {
        self.record(ProviderCall::Append(track.id.clone()))?;
        self.tracks.lock().unwrap().push(track.clone());
        Ok(())
    }

    async fn insert_front(&self, track: &Track) -> Result<()> {
        self.record(ProviderCall::InsertFront(track.id.clone()))?;
        self.tracks.lock().unwrap().insert(0, track.clone());
        Ok(())
    }

    async fn remove_at(&self, index: usize) -> Result<()> {
        self.record(ProviderCall::RemoveAt(index))?;
        let mut tracks = self.tracks.lock().unwrap();
        if index >= tracks.len() {
            return Err(Error::QueueOperationOutOfRange {
                index,
                len: tracks.len(),
            });
        }
        tracks.remove(index);
        Ok(())
    }

    async fn move_entry(&self, from: usize, to: usize) -> Result<()> {
        self.record(ProviderCall::Move(from, to))?;
        let mut tracks = self.tracks.lock().unwrap();
        let track = tracks.remove(from);
        tracks.insert(to, track);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.record(ProviderCall::Clear)?;
        self.tracks.lock().unwrap().clear();
        Ok(())
    }

    async fn fetch_all(&self) -> Result<Vec<Track>> {
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.tracks())
    }
}

// ============================================================================
// Resolver and fallback
// ============================================================================

/// Catalogue keyed by track id; streams are `http://test/<id>`
#[derive(Default)]
pub struct StaticResolver {
    tracks: Mutex<HashMap<String, Track>>,
    unavailable: Mutex<HashSet<String>>,
}

impl StaticResolver {
    pub fn add(&self, track: Track) {
        self.tracks.lock().unwrap().insert(track.id.clone(), track);
    }

    pub fn set_unavailable(&self, track_id: &str, unavailable: bool) {
        let mut set = self.unavailable.lock().unwrap();
        if unavailable {
            set.insert(track_id.to_string());
        } else {
            set.remove(track_id);
        }
    }

    pub fn set_all_available(&self) {
        self.unavailable.lock().unwrap().clear();
    }

    fn is_available(&self, track_id: &str) -> bool {
        self.tracks.lock().unwrap().contains_key(track_id)
            && !self.unavailable.lock().unwrap().contains(track_id)
    }
}

#[async_trait]
impl TrackResolver for StaticResolver {
    async fn resolve_stream_url(&self, track_id: &str) -> Result<String> {
        if self.is_available(track_id) {
            Ok(stream_uri(track_id))
        } else {
            Err(Error::ResourceUnavailable(format!("no stream for {}", track_id)))
        }
    }

    async fn resolve_metadata(&self, track_id: &str) -> Result<Track> {
        self.tracks
            .lock()
            .unwrap()
            .get(track_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("track {}", track_id)))
    }

    async fn probe_availability(&self, track_id: &str) -> Result<bool> {
        Ok(self.is_available(track_id))
    }
}

pub struct StaticFallback {
    playlist: Vec<FallbackEntry>,
}

impl StaticFallback {
    pub fn new(playlist: Vec<FallbackEntry>) -> Self {
        Self { playlist }
    }
}

#[async_trait]
impl FallbackProvider for StaticFallback {
    async fn fetch_emergency_playlist(&self) -> Result<Vec<FallbackEntry>> {
        Ok(self.playlist.clone())
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn stream_uri(track_id: &str) -> String {
    format!("http://test/{}", track_id)
}

pub fn create_test_track(id: &str, duration_seconds: f64) -> Track {
    Track::new(id, format!("Track {}", id))
        .with_artist("Test Artist")
        .with_duration(duration_seconds)
}

pub fn fallback_playlist(n: usize) -> Vec<FallbackEntry> {
    (0..n)
        .map(|i| FallbackEntry::new(format!("Backup {}", i), format!("http://fallback/{}", i)))
        .collect()
}

/// Engine timings used by the scenarios
pub fn test_config() -> EngineConfig {
    EngineConfig {
        crossfade_ms: 1000,
        crossfade_lead_seconds: 4.0,
        quick_crossfade_ms: 500,
        fade_in_ms: 2000,
        fade_out_ms: 3000,
        max_consecutive_errors: 5,
        error_retry_delay_ms: 1000,
        max_fallback_errors: 3,
        recovery_probe_interval_secs: 300,
        notice_interval_secs: 10,
        tick_interval_ms: 50,
        initial_volume: 80,
        history_limit: 10,
    }
}

// ============================================================================
// Harness
// ============================================================================

/// An engine wired to in-memory collaborators, stepped by hand
pub struct TestEngine {
    pub engine: PlayoutEngine,
    pub signals: mpsc::UnboundedReceiver<EngineSignal>,
    pub output: Arc<Mutex<OutputControl>>,
    pub telemetry: Arc<RecordingTelemetry>,
    pub provider: Arc<MemoryQueueProvider>,
    pub resolver: Arc<StaticResolver>,
    pub shared: Arc<SharedState>,
    tick: Duration,
}

impl TestEngine {
    pub fn new(config: EngineConfig, fallback: Vec<FallbackEntry>) -> Self {
        let tick = config.tick_interval();
        let (output, control) = MockOutput::new();
        let telemetry = Arc::new(RecordingTelemetry::default());
        let provider = Arc::new(MemoryQueueProvider::default());
        let resolver = Arc::new(StaticResolver::default());
        let shared = Arc::new(SharedState::new());

        let collaborators = Collaborators {
            queue_provider: provider.clone(),
            resolver: resolver.clone(),
            fallback: Arc::new(StaticFallback::new(fallback)),
            telemetry: telemetry.clone(),
        };
        let (engine, signals) =
            PlayoutEngine::new(config, Box::new(output), collaborators, shared.clone());

        Self {
            engine,
            signals,
            output: control,
            telemetry,
            provider,
            resolver,
            shared,
            tick,
        }
    }

    /// Default timings and a three-entry emergency playlist
    pub fn standard() -> Self {
        Self::new(test_config(), fallback_playlist(3))
    }

    /// Register `track` with the resolver and return it
    pub fn track(&self, id: &str, duration_seconds: f64) -> Track {
        let track = create_test_track(id, duration_seconds);
        self.resolver.add(track.clone());
        track
    }

    /// Let spawned tasks (sync worker, probe timer, probe checks) run, and
    /// feed their signals into the engine
    pub async fn settle(&mut self) {
        for _ in 0..5 {
            tokio::task::yield_now().await;
            while let Ok(signal) = self.signals.try_recv() {
                self.engine.handle_signal(signal).await;
            }
        }
    }

    /// Advance the paused clock by `duration`, one engine tick at a time
    pub async fn step(&mut self, duration: Duration) {
        let mut remaining = duration;
        while !remaining.is_zero() {
            let slice = remaining.min(self.tick);
            tokio::time::advance(slice).await;
            remaining -= slice;
            self.settle().await;
            self.engine.tick().await;
        }
        self.settle().await;
    }

    pub async fn step_secs(&mut self, seconds: f64) {
        self.step(Duration::from_secs_f64(seconds)).await;
    }

    pub fn mode(&self) -> PlayoutMode {
        self.engine.mode()
    }

    pub fn current_id(&self) -> Option<String> {
        self.engine.current_track().map(|t| t.id.clone())
    }

    pub fn queue_ids(&self) -> Vec<String> {
        self.engine.queue_snapshot().into_iter().map(|t| t.id).collect()
    }

    pub fn fail_uri(&self, uri: impl Into<String>) {
        self.output.lock().unwrap().failing_uris.insert(uri.into());
    }

    pub fn set_block_play(&self, blocked: bool) {
        self.output.lock().unwrap().block_play = blocked;
    }

    pub fn inject(&self, event: OutputEvent) {
        self.output.lock().unwrap().injected.push(event);
    }

    pub fn opened_uris(&self) -> Vec<String> {
        self.output
            .lock()
            .unwrap()
            .opened
            .iter()
            .map(|(_, uri)| uri.clone())
            .collect()
    }

    pub fn output_volume(&self, label: ChannelLabel) -> f32 {
        self.output
            .lock()
            .unwrap()
            .volumes
            .get(&label)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Short name of each telemetry event, for order assertions
pub fn event_names(events: &[TelemetryEvent]) -> Vec<String> {
    events
        .iter()
        .map(|e| match e {
            TelemetryEvent::PlayStarted { track_id } => format!("PlayStarted({})", track_id),
            TelemetryEvent::TrackEnded { track_id } => format!("TrackEnded({})", track_id),
            TelemetryEvent::Error { kind, .. } => format!("Error({})", kind),
            other => other.name().to_string(),
        })
        .collect()
}
