//! Playout core: envelope, transport, queue, emergency fallback and the
//! state machine that ties them together

pub mod emergency;
pub mod engine;
pub mod envelope;
pub mod output;
pub mod queue;
pub mod service;
pub mod transport;

pub use emergency::{EmergencyState, EngineSignal, RefreshPurpose};
pub use engine::{PlayoutEngine, PlayoutSession};
pub use envelope::{EnvelopeController, RampPurpose};
pub use output::{AudioOutput, ClockOutput, OutputEvent};
pub use queue::QueueManager;
pub use service::{PlayoutHandle, PlayoutService};
pub use transport::DualTransport;
