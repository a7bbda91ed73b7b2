//! Emergency playlist from configuration

use super::FallbackProvider;
use crate::error::Result;
use async_trait::async_trait;
use playout_common::FallbackEntry;

/// Serves the `[[emergency.playlist]]` entries of the config file
#[derive(Debug, Clone, Default)]
pub struct ConfigFallbackProvider {
    playlist: Vec<FallbackEntry>,
}

impl ConfigFallbackProvider {
    pub fn new(playlist: Vec<FallbackEntry>) -> Self {
        Self { playlist }
    }
}

#[async_trait]
impl FallbackProvider for ConfigFallbackProvider {
    async fn fetch_emergency_playlist(&self) -> Result<Vec<FallbackEntry>> {
        Ok(self.playlist.clone())
    }
}
