//! Database access layer
//!
//! Runtime-checked sqlx queries over the library database: the track
//! catalogue and the persisted play queue.

pub mod init;
pub mod queue;
pub mod tracks;

pub use init::{connect, connect_in_memory, init_schema};
