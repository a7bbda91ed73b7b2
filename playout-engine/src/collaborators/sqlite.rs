//! SQLite-backed library
//!
//! One collaborator covering both the persisted queue and the catalogue:
//! [`QueueProvider`] over the `queue` table, [`TrackResolver`] over the
//! `tracks` table.

use super::{QueueProvider, TrackResolver};
use crate::db;
use crate::error::{Error, Result};
use async_trait::async_trait;
use playout_common::Track;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for remote availability checks
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SqliteLibrary {
    pool: SqlitePool,
    http: reqwest::Client,
}

impl SqliteLibrary {
    pub fn new(pool: SqlitePool) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
        Ok(Self { pool, http })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Add or update a catalogue entry
    pub async fn add_track(&self, track: &Track, stream_uri: &str) -> Result<()> {
        db::tracks::upsert_track(&self.pool, track, stream_uri).await
    }

    /// Whether the stream behind `uri` can be reached without fetching it
    async fn stream_reachable(&self, uri: &str) -> bool {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            match self.http.head(uri).send().await {
                Ok(response) => response.status().is_success(),
                Err(e) => {
                    debug!("HEAD {} failed: {}", uri, e);
                    false
                }
            }
        } else {
            let path = uri.strip_prefix("file://").unwrap_or(uri);
            tokio::fs::metadata(path).await.is_ok()
        }
    }
}

#[async_trait]
impl QueueProvider for SqliteLibrary {
    async fn append(&self, track: &Track) -> Result<()> {
        db::queue::append(&self.pool, &track.id).await
    }

    async fn insert_front(&self, track: &Track) -> Result<()> {
        db::queue::insert_front(&self.pool, &track.id).await
    }

    async fn remove_at(&self, index: usize) -> Result<()> {
        db::queue::remove_at(&self.pool, index).await
    }

    async fn move_entry(&self, from: usize, to: usize) -> Result<()> {
        db::queue::move_entry(&self.pool, from, to).await
    }

    async fn clear(&self) -> Result<()> {
        db::queue::clear(&self.pool).await
    }

    async fn fetch_all(&self) -> Result<Vec<Track>> {
        db::queue::get_queue(&self.pool).await
    }
}

#[async_trait]
impl TrackResolver for SqliteLibrary {
    async fn resolve_stream_url(&self, track_id: &str) -> Result<String> {
        match db::tracks::get_track(&self.pool, track_id).await {
            Ok(record) => Ok(record.stream_uri),
            Err(Error::NotFound(msg)) => Err(Error::ResourceUnavailable(msg)),
            Err(e) => Err(e),
        }
    }

    async fn resolve_metadata(&self, track_id: &str) -> Result<Track> {
        Ok(db::tracks::get_track(&self.pool, track_id).await?.track)
    }

    async fn probe_availability(&self, track_id: &str) -> Result<bool> {
        let record = match db::tracks::get_track(&self.pool, track_id).await {
            Ok(record) => record,
            Err(Error::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        let reachable = self.stream_reachable(&record.stream_uri).await;
        if !reachable {
            warn!("Probe: stream for '{}' not reachable ({})", track_id, record.stream_uri);
        }
        Ok(reachable)
    }
}
