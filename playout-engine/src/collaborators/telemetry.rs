//! Default telemetry sink: structured log line plus SSE broadcast

use super::Telemetry;
use crate::error::Result;
use playout_common::events::{EventBus, PlayoutEvent, TelemetryEvent};
use tracing::{info, warn};

pub struct EventBusTelemetry {
    bus: EventBus,
}

impl EventBusTelemetry {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl Telemetry for EventBusTelemetry {
    fn emit(&self, event: TelemetryEvent) -> Result<()> {
        match &event {
            TelemetryEvent::PlayStarted { track_id } => info!(track_id = %track_id, "PlayStarted"),
            TelemetryEvent::TrackEnded { track_id } => info!(track_id = %track_id, "TrackEnded"),
            TelemetryEvent::Error { track_id, kind } => warn!(
                track_id = track_id.as_deref().unwrap_or("-"),
                kind = %kind,
                "Playout error"
            ),
            TelemetryEvent::EmergencyEntered => warn!("EmergencyEntered"),
            TelemetryEvent::EmergencyExited => info!("EmergencyExited"),
        }

        self.bus.emit_lossy(PlayoutEvent::from(&event));
        Ok(())
    }
}
