//! Track catalogue queries

use crate::error::{Error, Result};
use playout_common::{Track, TrackKind};
use sqlx::{Row, SqlitePool};

/// A catalogue row: track metadata plus where to stream it from
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRecord {
    pub track: Track,
    pub stream_uri: String,
}

pub(crate) fn track_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Track> {
    let kind: String = row.try_get("kind")?;
    Ok(Track {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        artist: row.try_get("artist")?,
        kind: TrackKind::parse(&kind),
        duration_seconds: row.try_get("duration_seconds")?,
    })
}

/// Insert or replace a catalogue row
pub async fn upsert_track(pool: &SqlitePool, track: &Track, stream_uri: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tracks (id, title, artist, kind, duration_seconds, stream_uri)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            artist = excluded.artist,
            kind = excluded.kind,
            duration_seconds = excluded.duration_seconds,
            stream_uri = excluded.stream_uri
        "#,
    )
    .bind(&track.id)
    .bind(&track.title)
    .bind(&track.artist)
    .bind(track.kind.as_str())
    .bind(track.duration_seconds)
    .bind(stream_uri)
    .execute(pool)
    .await?;
    Ok(())
}

/// Look up a catalogue row by id
pub async fn get_track(pool: &SqlitePool, track_id: &str) -> Result<TrackRecord> {
    let row = sqlx::query(
        "SELECT id, title, artist, kind, duration_seconds, stream_uri FROM tracks WHERE id = ?",
    )
    .bind(track_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("Track not found: {}", track_id)))?;

    Ok(TrackRecord {
        track: track_from_row(&row)?,
        stream_uri: row.try_get("stream_uri")?,
    })
}

pub async fn track_exists(pool: &SqlitePool, track_id: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tracks WHERE id = ?)")
        .bind(track_id)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}
