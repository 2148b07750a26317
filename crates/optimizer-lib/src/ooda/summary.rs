//! Per-cycle reporting

use crate::error::{Error, ErrorKind};
use serde::Serialize;

/// Counters for one cycle, logged as `cycle_completed`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleSummary {
    pub cycle: u64,
    pub scanned: usize,
    pub analysed: usize,
    pub committed: usize,
    pub duplicates: usize,
    /// Pending actions from earlier cycles picked up again
    pub resumed: usize,
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Applied actions whose completion could not be written
    pub unrecorded: usize,
    /// Decision spend during this cycle
    pub cost_usd: f64,
    /// Realised savings of actions applied during this cycle
    pub savings_usd: f64,
    pub roi_percent: f64,
    pub duration_ms: u64,
    pub dry_run: bool,
}

impl std::fmt::Display for CycleSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cycle {}{}: scanned {}, analysed {}, committed {}, applied {}, failed {}, \
             cost ${:.4}, savings ${:.2}, ROI {:.1}%",
            self.cycle,
            if self.dry_run { " (dry run)" } else { "" },
            self.scanned,
            self.analysed,
            self.committed,
            self.applied,
            self.failed,
            self.cost_usd,
            self.savings_usd,
            self.roi_percent
        )
    }
}

/// A resource that dropped out of the cycle, and why
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceError {
    pub resource_id: String,
    #[serde(serialize_with = "kind_name")]
    pub kind: ErrorKind,
    pub message: String,
}

fn kind_name<S: serde::Serializer>(kind: &ErrorKind, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(kind)
}

impl ResourceError {
    pub fn new(resource_id: impl Into<String>, error: &Error) -> Self {
        Self {
            resource_id: resource_id.into(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Everything a caller learns from one synchronous cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub summary: CycleSummary,
    /// Ids of actions newly staged by this cycle
    pub recorded: Vec<String>,
    pub errors: Vec<ResourceError>,
}

/// Actions resolved by crash recovery
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryReport {
    pub examined: usize,
    pub reapplied: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Actions left for the next start: resource unreadable, or applied
    /// without the completion being written
    pub deferred: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_renders_one_line() {
        let summary = CycleSummary {
            cycle: 2,
            scanned: 3,
            analysed: 3,
            committed: 1,
            applied: 1,
            cost_usd: 0.002,
            savings_usd: 40.0,
            roi_percent: 1_999_900.0,
            dry_run: false,
            ..Default::default()
        };
        let line = summary.to_string();
        assert!(line.starts_with("cycle 2: scanned 3"));
        assert!(line.contains("savings $40.00"));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_resource_error_keeps_kind() {
        let err = ResourceError::new("vm-1", &Error::Invalid("cpu out of range".into()));
        assert_eq!(err.kind, ErrorKind::Invalid);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "invalid");
    }
}
