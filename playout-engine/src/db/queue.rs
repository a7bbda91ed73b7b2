//! Persisted play queue
//!
//! Order lives in `play_order`; positions seen by callers are 0-based ranks
//! in that order. Appends take `max + 1`, front inserts `min - 1`, and
//! moves renumber the whole queue inside one transaction.

use super::tracks::track_from_row;
use crate::error::{Error, Result};
use playout_common::Track;
use sqlx::SqlitePool;

pub async fn get_queue(pool: &SqlitePool) -> Result<Vec<Track>> {
    let rows = sqlx::query(
        r#"
        SELECT t.id, t.title, t.artist, t.kind, t.duration_seconds
        FROM queue q
        JOIN tracks t ON t.id = q.track_id
        ORDER BY q.play_order, q.entry_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(track_from_row).collect()
}

pub async fn append(pool: &SqlitePool, track_id: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO queue (track_id, play_order) SELECT ?, COALESCE(MAX(play_order), 0) + 1 FROM queue",
    )
    .bind(track_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_front(pool: &SqlitePool, track_id: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO queue (track_id, play_order) SELECT ?, COALESCE(MIN(play_order), 0) - 1 FROM queue",
    )
    .bind(track_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Entry ids in play order
async fn ordered_entry_ids(
    conn: &mut sqlx::SqliteConnection,
) -> Result<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT entry_id FROM queue ORDER BY play_order, entry_id")
        .fetch_all(conn)
        .await?;
    Ok(ids)
}

pub async fn remove_at(pool: &SqlitePool, index: usize) -> Result<()> {
    let mut tx = pool.begin().await?;
    let ids = ordered_entry_ids(&mut tx).await?;
    let entry_id = *ids
        .get(index)
        .ok_or(Error::QueueOperationOutOfRange { index, len: ids.len() })?;

    sqlx::query("DELETE FROM queue WHERE entry_id = ?")
        .bind(entry_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

pub async fn move_entry(pool: &SqlitePool, from: usize, to: usize) -> Result<()> {
    let mut tx = pool.begin().await?;
    let mut ids = ordered_entry_ids(&mut tx).await?;
    let len = ids.len();
    if from >= len {
        return Err(Error::QueueOperationOutOfRange { index: from, len });
    }
    if to >= len {
        return Err(Error::QueueOperationOutOfRange { index: to, len });
    }

    let moved = ids.remove(from);
    ids.insert(to, moved);
    for (order, entry_id) in ids.iter().enumerate() {
        sqlx::query("UPDATE queue SET play_order = ? WHERE entry_id = ?")
            .bind(order as i64)
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn clear(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DELETE FROM queue").execute(pool).await?;
    Ok(())
}
