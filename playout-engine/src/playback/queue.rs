//! Queue Manager
//!
//! In-memory play queue plus its bridge to the external [`QueueProvider`].
//!
//! **Responsibilities:**
//! - Ordered local sequence of upcoming tracks (the current track is not in it)
//! - Reject out-of-range indexes locally, before anything reaches the provider
//! - Mirror every accepted mutation to the provider, in order, after the
//!   local change has been made
//!
//! Remote sync is optimistic and fire-and-forget: a failed provider call is
//! reported through telemetry (`QueueSyncFailed`) and the local change stays.
//! Playout never waits on the backing store.

use crate::collaborators::{QueueProvider, Telemetry};
use crate::error::{Error, Result};
use playout_common::events::{ErrorKind, TelemetryEvent};
use playout_common::Track;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One provider call, queued behind every earlier one
#[derive(Debug, Clone, PartialEq)]
pub enum QueueSyncOp {
    Append(Track),
    InsertFront(Track),
    RemoveAt(usize),
    Move { from: usize, to: usize },
    Clear,
}

impl QueueSyncOp {
    fn track_id(&self) -> Option<String> {
        match self {
            QueueSyncOp::Append(t) | QueueSyncOp::InsertFront(t) => Some(t.id.clone()),
            _ => None,
        }
    }
}

/// What the sync worker receives: a mutation, or a flush barrier
#[derive(Debug)]
pub enum SyncMessage {
    Op(QueueSyncOp),
    /// Answered once every earlier op has been applied
    Flush(oneshot::Sender<()>),
}

/// Start the worker that replays local mutations against `provider`
///
/// One worker per queue: ops run strictly in submission order. The worker
/// exits once every sender is dropped.
pub fn spawn_sync_worker(
    provider: Arc<dyn QueueProvider>,
    telemetry: Arc<dyn Telemetry>,
) -> (mpsc::UnboundedSender<SyncMessage>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<SyncMessage>();

    let handle = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let op = match message {
                SyncMessage::Op(op) => op,
                SyncMessage::Flush(done) => {
                    let _ = done.send(());
                    continue;
                }
            };
            let result = match &op {
                QueueSyncOp::Append(track) => provider.append(track).await,
                QueueSyncOp::InsertFront(track) => provider.insert_front(track).await,
                QueueSyncOp::RemoveAt(index) => provider.remove_at(*index).await,
                QueueSyncOp::Move { from, to } => provider.move_entry(*from, *to).await,
                QueueSyncOp::Clear => provider.clear().await,
            };

            if let Err(e) = result {
                warn!("Queue sync failed for {:?}: {} (local queue kept)", op, e);
                let event = TelemetryEvent::Error {
                    track_id: op.track_id(),
                    kind: ErrorKind::QueueSyncFailed,
                };
                if let Err(e) = telemetry.emit(event) {
                    warn!("Telemetry emit failed: {}", e);
                }
            }
        }
        debug!("Queue sync worker stopped");
    });

    (tx, handle)
}

/// Local queue with ordered remote mirroring
#[derive(Debug, Default)]
pub struct QueueManager {
    entries: Vec<Track>,
    /// None when running without a provider
    sync: Option<mpsc::UnboundedSender<SyncMessage>>,
    /// Bumped on every local mutation
    revision: u64,
}

impl QueueManager {
    /// Queue that mirrors to the given sync worker
    pub fn new(sync: mpsc::UnboundedSender<SyncMessage>) -> Self {
        Self {
            entries: Vec::new(),
            sync: Some(sync),
            revision: 0,
        }
    }

    /// Queue with no remote copy
    pub fn local() -> Self {
        Self::default()
    }

    fn mirror(&mut self, op: QueueSyncOp) {
        self.revision += 1;
        if let Some(sync) = &self.sync {
            if sync.send(SyncMessage::Op(op)).is_err() {
                warn!("Queue sync worker is gone; remote queue will drift");
            }
        }
    }

    /// Resolves once every mutation made so far has reached the provider
    ///
    /// Resolves at once for a local queue or a stopped worker.
    pub fn flushed(&self) -> impl Future<Output = ()> + Send + 'static {
        let (done, wait) = oneshot::channel();
        if let Some(sync) = &self.sync {
            let _ = sync.send(SyncMessage::Flush(done));
        }
        async move {
            let _ = wait.await;
        }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.entries.len() {
            warn!(
                "Queue index {} out of range (length {}); ignored",
                index,
                self.entries.len()
            );
            return Err(Error::QueueOperationOutOfRange {
                index,
                len: self.entries.len(),
            });
        }
        Ok(())
    }

    pub fn append(&mut self, track: Track) {
        self.entries.push(track.clone());
        self.mirror(QueueSyncOp::Append(track));
    }

    pub fn insert_front(&mut self, track: Track) {
        self.entries.insert(0, track.clone());
        self.mirror(QueueSyncOp::InsertFront(track));
    }

    pub fn remove_at(&mut self, index: usize) -> Result<Track> {
        self.check_index(index)?;
        let removed = self.entries.remove(index);
        self.mirror(QueueSyncOp::RemoveAt(index));
        Ok(removed)
    }

    pub fn move_entry(&mut self, from: usize, to: usize) -> Result<()> {
        self.check_index(from)?;
        self.check_index(to)?;
        if from == to {
            return Ok(());
        }
        let track = self.entries.remove(from);
        self.entries.insert(to, track);
        self.mirror(QueueSyncOp::Move { from, to });
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.mirror(QueueSyncOp::Clear);
    }

    /// Take the head for playback (mirrored as `remove_at(0)`)
    pub fn pop_front(&mut self) -> Option<Track> {
        if self.entries.is_empty() {
            return None;
        }
        self.remove_at(0).ok()
    }

    /// Replace the local copy with the provider's; nothing is mirrored
    pub fn replace_all(&mut self, tracks: Vec<Track>) {
        self.entries = tracks;
    }

    /// Changes whenever the local queue is mutated; a provider copy fetched
    /// at an older revision no longer describes this queue
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn head(&self) -> Option<&Track> {
        self.entries.first()
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.entries.get(index)
    }

    pub fn snapshot(&self) -> Vec<Track> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_track(n: u8) -> Track {
        Track::new(format!("t{}", n), format!("Track {}", n)).with_duration(180.0)
    }

    fn ids(queue: &QueueManager) -> Vec<String> {
        queue.snapshot().into_iter().map(|t| t.id).collect()
    }

    fn drain_ops(rx: &mut mpsc::UnboundedReceiver<SyncMessage>) -> Vec<QueueSyncOp> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|m| match m {
                SyncMessage::Op(op) => Some(op),
                SyncMessage::Flush(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_queue_manager_creation() {
        let queue = QueueManager::local();
        assert!(queue.is_empty());
        assert!(queue.head().is_none());
    }

    #[test]
    fn test_append_insert_and_pop() {
        let mut queue = QueueManager::local();
        queue.append(create_test_track(1));
        queue.append(create_test_track(2));
        queue.insert_front(create_test_track(3));
        assert_eq!(ids(&queue), vec!["t3", "t1", "t2"]);

        assert_eq!(queue.pop_front().map(|t| t.id), Some("t3".to_string()));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_insert_front_remove_head_round_trip() {
        let mut queue = QueueManager::local();
        queue.append(create_test_track(1));
        queue.append(create_test_track(2));
        let before = queue.snapshot();

        queue.insert_front(create_test_track(9));
        queue.remove_at(0).unwrap();
        assert_eq!(queue.snapshot(), before);
    }

    #[test]
    fn test_out_of_range_is_rejected_without_sync() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut queue = QueueManager::new(tx);
        queue.append(create_test_track(1));
        assert_eq!(drain_ops(&mut rx), vec![QueueSyncOp::Append(create_test_track(1))]);

        assert!(matches!(
            queue.remove_at(5),
            Err(Error::QueueOperationOutOfRange { index: 5, len: 1 })
        ));
        assert!(queue.move_entry(0, 1).is_err());
        assert_eq!(queue.len(), 1);
        assert!(drain_ops(&mut rx).is_empty());
    }

    #[test]
    fn test_move_entry() {
        let mut queue = QueueManager::local();
        for n in 1..=4 {
            queue.append(create_test_track(n));
        }
        queue.move_entry(3, 0).unwrap();
        assert_eq!(ids(&queue), vec!["t4", "t1", "t2", "t3"]);
        queue.move_entry(1, 2).unwrap();
        assert_eq!(ids(&queue), vec!["t4", "t2", "t1", "t3"]);
    }

    #[test]
    fn test_sync_ops_follow_local_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut queue = QueueManager::new(tx);
        queue.append(create_test_track(1));
        queue.insert_front(create_test_track(2));
        queue.pop_front();
        queue.clear();

        assert_eq!(
            drain_ops(&mut rx),
            vec![
                QueueSyncOp::Append(create_test_track(1)),
                QueueSyncOp::InsertFront(create_test_track(2)),
                QueueSyncOp::RemoveAt(0),
                QueueSyncOp::Clear,
            ]
        );
    }

    #[test]
    fn test_revision_tracks_local_mutations() {
        let mut queue = QueueManager::local();
        let start = queue.revision();
        queue.append(create_test_track(1));
        queue.pop_front();
        assert_eq!(queue.revision(), start + 2);

        // Rejected and refreshed changes leave it alone
        assert!(queue.remove_at(3).is_err());
        queue.replace_all(vec![create_test_track(2)]);
        assert_eq!(queue.revision(), start + 2);
    }

    #[test]
    fn test_replace_all_is_not_mirrored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut queue = QueueManager::new(tx);
        queue.replace_all(vec![create_test_track(1), create_test_track(2)]);
        assert_eq!(queue.len(), 2);
        assert!(drain_ops(&mut rx).is_empty());
    }
}
