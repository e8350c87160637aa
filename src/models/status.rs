use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Rebuilding,
    Resyncing,
}

/// Progress record for a long-running rebuild/resync, persisted as JSON.
/// Absence of the file means idle. `total == -1` means the total is not
/// known yet (the walk is still running).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: Phase,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total: i64,
    pub current: i64,
    pub progress: f64,
}

impl StatusRecord {
    pub fn progress_of(current: i64, total: i64) -> f64 {
        if total <= 0 {
            return 0.0;
        }
        (current as f64 / total as f64).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_guards_degenerate_totals() {
        assert_eq!(StatusRecord::progress_of(0, 0), 0.0);
        assert_eq!(StatusRecord::progress_of(5, 0), 0.0);
        assert_eq!(StatusRecord::progress_of(5, -1), 0.0);
    }

    #[test]
    fn progress_is_ratio_clamped_to_one() {
        assert_eq!(StatusRecord::progress_of(50, 100), 0.5);
        assert_eq!(StatusRecord::progress_of(100, 100), 1.0);
        assert_eq!(StatusRecord::progress_of(120, 100), 1.0);
    }

    #[test]
    fn phase_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Phase::Rebuilding).unwrap(),
            "\"rebuilding\""
        );
        assert_eq!(
            serde_json::from_str::<Phase>("\"resyncing\"").unwrap(),
            Phase::Resyncing
        );
    }
}
