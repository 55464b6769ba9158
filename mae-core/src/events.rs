use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::model::{ExportFailure, ExportKind, ScanLifecycle, ScanPhase};

pub const SCAN_PROGRESS_CHANNEL: &str = "scan://progress";
pub const SCAN_COMPLETED_CHANNEL: &str = "scan://completed";
pub const SCAN_ERROR_CHANNEL: &str = "scan://error";
pub const EXPORT_PROGRESS_CHANNEL: &str = "export://progress";
pub const EXPORT_COMPLETED_CHANNEL: &str = "export://completed";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgressEvent {
    pub scan_id: String,
    pub scanned_containers: usize,
    pub total_containers: usize,
    pub asset_count: usize,
    pub phase: ScanPhase,
    pub current_source: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanCompletedEvent {
    pub scan_id: String,
    pub lifecycle: ScanLifecycle,
    pub asset_count: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanErrorEvent {
    pub scan_id: String,
    pub kind: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportProgressEvent {
    pub operation_id: String,
    pub kind: ExportKind,
    pub requested_count: usize,
    pub processed_count: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportCompletedEvent {
    pub operation_id: String,
    pub kind: ExportKind,
    pub requested_count: usize,
    pub processed_count: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub cancelled: bool,
    pub failures: Vec<ExportFailure>,
}

/// Everything the engine publishes. Payloads carry their owning id so
/// clients can filter superseded streams.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    ScanProgress(ScanProgressEvent),
    ScanCompleted(ScanCompletedEvent),
    ScanError(ScanErrorEvent),
    ExportProgress(ExportProgressEvent),
    ExportCompleted(ExportCompletedEvent),
}

impl EngineEvent {
    pub fn channel(&self) -> &'static str {
        match self {
            EngineEvent::ScanProgress(_) => SCAN_PROGRESS_CHANNEL,
            EngineEvent::ScanCompleted(_) => SCAN_COMPLETED_CHANNEL,
            EngineEvent::ScanError(_) => SCAN_ERROR_CHANNEL,
            EngineEvent::ExportProgress(_) => EXPORT_PROGRESS_CHANNEL,
            EngineEvent::ExportCompleted(_) => EXPORT_COMPLETED_CHANNEL,
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        let result = match self {
            EngineEvent::ScanProgress(event) => serde_json::to_value(event),
            EngineEvent::ScanCompleted(event) => serde_json::to_value(event),
            EngineEvent::ScanError(event) => serde_json::to_value(event),
            EngineEvent::ExportProgress(event) => serde_json::to_value(event),
            EngineEvent::ExportCompleted(event) => serde_json::to_value(event),
        };
        result.unwrap_or(serde_json::Value::Null)
    }
}

/// Bridge to the presentation layer. The desktop shell forwards events to
/// the webview; tests record them.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Coalesces high-frequency progress frames. `ready` returns true at most
/// once per interval unless forced (terminal frames are always emitted).
#[derive(Debug)]
pub struct ProgressGate {
    interval: Duration,
    last_emit: Mutex<Option<Instant>>,
}

impl ProgressGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: Mutex::new(None),
        }
    }

    pub fn ready(&self, force: bool) -> bool {
        let Ok(mut last) = self.last_emit.lock() else {
            return true;
        };

        let now = Instant::now();
        let due = match *last {
            Some(previous) => now.saturating_duration_since(previous) >= self.interval,
            None => true,
        };

        if force || due {
            *last = Some(now);
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_coalesces_until_interval_elapses() {
        let gate = ProgressGate::new(Duration::from_secs(3600));
        assert!(gate.ready(false));
        assert!(!gate.ready(false));
        assert!(gate.ready(true));
        assert!(!gate.ready(false));
    }

    #[test]
    fn channels_match_event_payload_ids() {
        let event = EngineEvent::ScanProgress(ScanProgressEvent {
            scan_id: "scan-1".into(),
            scanned_containers: 1,
            total_containers: 2,
            asset_count: 3,
            phase: ScanPhase::Scanning,
            current_source: None,
        });

        assert_eq!(event.channel(), "scan://progress");
        assert_eq!(event.payload()["scanId"], "scan-1");
        assert_eq!(event.payload()["phase"], "scanning");
    }
}
