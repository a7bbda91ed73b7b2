//! Engine actor and its command handle
//!
//! The engine is single-writer: one spawned task owns the [`PlayoutEngine`]
//! and serializes user intents, ticks and internal signals through one
//! `select!` loop. Everything else talks to it through a [`PlayoutHandle`].

use super::emergency::RefreshPurpose;
use super::engine::PlayoutEngine;
use super::output::AudioOutput;
use crate::collaborators::Collaborators;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::state::{PlayoutSnapshot, SharedState};
use playout_common::Track;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Command channel depth
const COMMAND_CAPACITY: usize = 64;

type Reply<T> = oneshot::Sender<Result<T>>;

/// A user intent, with its reply slot
#[derive(Debug)]
enum Command {
    Play(Track, Reply<()>),
    PlayNow {
        track: Track,
        requeue: bool,
        reply: Reply<()>,
    },
    Enqueue(Track, Reply<()>),
    QueueNext(Track, Reply<()>),
    RemoveAt(usize, Reply<Track>),
    MoveEntry {
        from: usize,
        to: usize,
        reply: Reply<()>,
    },
    ClearQueue(Reply<()>),
    RefreshQueue(Reply<()>),
    SkipNext(Reply<()>),
    SkipPrevious(Reply<()>),
    Pause(Reply<()>),
    Resume(Reply<()>),
    Toggle(Reply<()>),
    SetVolume(u8, Reply<()>),
    Seek(f64, Reply<f64>),
    Status(Reply<PlayoutSnapshot>),
    Shutdown(Reply<()>),
}

/// Spawns and owns the engine task
pub struct PlayoutService;

impl PlayoutService {
    /// Build the engine, load the queue from the provider and start the loop
    pub async fn start(
        config: EngineConfig,
        output: Box<dyn AudioOutput>,
        collaborators: Collaborators,
        shared: Arc<SharedState>,
    ) -> (PlayoutHandle, JoinHandle<()>) {
        let tick_interval = config.tick_interval();
        let (mut engine, mut signals) =
            PlayoutEngine::new(config, output, collaborators, shared.clone());

        if let Err(e) = engine.refresh_queue().await {
            warn!("Initial queue load failed; starting with an empty queue: {}", e);
        }
        let snapshot = engine.snapshot();
        shared.publish(snapshot).await;

        let (tx, mut rx) = mpsc::channel::<Command>(COMMAND_CAPACITY);
        let state = shared.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Playout engine started (tick {}ms)", tick_interval.as_millis());

            loop {
                tokio::select! {
                    command = rx.recv() => {
                        let Some(command) = command else {
                            debug!("All playout handles dropped");
                            engine.shutdown().await;
                            let snapshot = engine.snapshot();
                            state.publish(snapshot).await;
                            break;
                        };
                        let stop = matches!(command, Command::Shutdown(_));
                        let respond = dispatch(&mut engine, command).await;
                        // Callers see the state their command produced
                        let snapshot = engine.snapshot();
                        state.publish(snapshot).await;
                        respond();
                        if stop {
                            break;
                        }
                    }
                    Some(signal) = signals.recv() => {
                        engine.handle_signal(signal).await;
                        let snapshot = engine.snapshot();
                        state.publish(snapshot).await;
                    }
                    _ = ticker.tick() => {
                        engine.tick().await;
                        let snapshot = engine.snapshot();
                        state.publish(snapshot).await;
                    }
                }
            }
            info!("Playout engine stopped");
        });

        (PlayoutHandle { tx, shared }, task)
    }
}

type Responder = Box<dyn FnOnce() + Send>;

fn answer<T: Send + 'static>(reply: Reply<T>, result: Result<T>) -> Responder {
    Box::new(move || {
        // A dropped receiver means the caller gave up
        let _ = reply.send(result);
    })
}

/// Run one command; the reply is held back until the caller publishes
async fn dispatch(engine: &mut PlayoutEngine, command: Command) -> Responder {
    match command {
        Command::Play(track, reply) => answer(reply, engine.play(track).await),
        Command::PlayNow {
            track,
            requeue,
            reply,
        } => answer(reply, engine.play_now(track, requeue).await),
        Command::Enqueue(track, reply) => {
            engine.enqueue(track);
            answer(reply, Ok(()))
        }
        Command::QueueNext(track, reply) => {
            engine.queue_next(track);
            answer(reply, Ok(()))
        }
        Command::RemoveAt(index, reply) => answer(reply, engine.remove_at(index)),
        Command::MoveEntry { from, to, reply } => answer(reply, engine.move_entry(from, to)),
        Command::ClearQueue(reply) => {
            engine.clear_queue();
            answer(reply, Ok(()))
        }
        Command::RefreshQueue(reply) => {
            engine.request_refresh(RefreshPurpose::Requested);
            answer(reply, Ok(()))
        }
        Command::SkipNext(reply) => answer(reply, engine.skip_next().await),
        Command::SkipPrevious(reply) => answer(reply, engine.skip_previous().await),
        Command::Pause(reply) => {
            engine.pause();
            answer(reply, Ok(()))
        }
        Command::Resume(reply) => answer(reply, engine.resume().await),
        Command::Toggle(reply) => answer(reply, engine.toggle().await),
        Command::SetVolume(volume, reply) => {
            engine.set_volume(volume);
            answer(reply, Ok(()))
        }
        Command::Seek(seconds, reply) => answer(reply, engine.seek(seconds)),
        Command::Status(reply) => answer(reply, Ok(engine.snapshot())),
        Command::Shutdown(reply) => {
            engine.shutdown().await;
            answer(reply, Ok(()))
        }
    }
}

/// Cloneable front door to the engine task
#[derive(Clone)]
pub struct PlayoutHandle {
    tx: mpsc::Sender<Command>,
    shared: Arc<SharedState>,
}

impl PlayoutHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| Error::ChannelClosed("command channel closed".to_string()))?;
        reply_rx
            .await
            .map_err(|_| Error::ChannelClosed("engine dropped the reply".to_string()))?
    }

    /// Observer state published by the engine after every step
    pub fn state(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub async fn play(&self, track: Track) -> Result<()> {
        self.request(|reply| Command::Play(track, reply)).await
    }

    pub async fn play_now(&self, track: Track, requeue: bool) -> Result<()> {
        self.request(|reply| Command::PlayNow {
            track,
            requeue,
            reply,
        })
        .await
    }

    pub async fn enqueue(&self, track: Track) -> Result<()> {
        self.request(|reply| Command::Enqueue(track, reply)).await
    }

    pub async fn queue_next(&self, track: Track) -> Result<()> {
        self.request(|reply| Command::QueueNext(track, reply)).await
    }

    pub async fn remove_at(&self, index: usize) -> Result<Track> {
        self.request(|reply| Command::RemoveAt(index, reply)).await
    }

    pub async fn move_entry(&self, from: usize, to: usize) -> Result<()> {
        self.request(|reply| Command::MoveEntry { from, to, reply })
            .await
    }

    pub async fn clear_queue(&self) -> Result<()> {
        self.request(Command::ClearQueue).await
    }

    /// Reload the local queue from the provider
    ///
    /// Returns once the fetch is under way; the new queue shows up in the
    /// published state when the provider answers.
    pub async fn refresh_queue(&self) -> Result<()> {
        self.request(Command::RefreshQueue).await
    }

    pub async fn skip_next(&self) -> Result<()> {
        self.request(Command::SkipNext).await
    }

    pub async fn skip_previous(&self) -> Result<()> {
        self.request(Command::SkipPrevious).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(Command::Resume).await
    }

    pub async fn toggle(&self) -> Result<()> {
        self.request(Command::Toggle).await
    }

    pub async fn set_volume(&self, volume: u8) -> Result<()> {
        self.request(|reply| Command::SetVolume(volume, reply)).await
    }

    /// Returns the position actually reached
    pub async fn seek(&self, seconds: f64) -> Result<f64> {
        self.request(|reply| Command::Seek(seconds, reply)).await
    }

    /// Fresh snapshot straight from the engine
    pub async fn status(&self) -> Result<PlayoutSnapshot> {
        self.request(Command::Status).await
    }

    /// Stop playback and end the engine task
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown).await
    }
}

