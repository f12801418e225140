// Per-step status messages for an optional external sink

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Terminal state of one mission step, as reported outward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    TimedOut,
    Cancelled,
}

/// Status emitted after each mission step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStatus {
    pub index: usize,
    pub step: String,
    pub outcome: StepOutcome,
    pub elapsed_ms: u64,
}

/// Write-only status consumer. Control behavior never depends on whether a
/// sink is attached.
pub trait TelemetrySink {
    fn publish(&mut self, status: &StepStatus);
}

/// Sink that emits each status as a JSON line through the log
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn publish(&mut self, status: &StepStatus) {
        match serde_json::to_string(status) {
            Ok(line) => info!(target: "telemetry", "{}", line),
            Err(e) => warn!("Failed to encode step status: {}", e),
        }
    }
}
