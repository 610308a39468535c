//! Admission control and reconciliation helpers.
//!
//! This library holds the pure decision logic used by the fleet agent:
//!
//! - **Admission control**: whether one more instance of an image may be
//!   started, given per-image and profile-wide limits.
//! - **Failure streaks**: consecutive failed reconciliation passes per image,
//!   so the scheduler can escalate log severity.
//!
//! # Invariants
//!
//! - Decisions are deterministic given the same inputs
//! - Nothing here performs I/O or locking

use std::collections::BTreeMap;
use std::time::Duration;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// A new instance may be started.
    Allowed,

    /// The image already runs as many instances as it may.
    ImageLimitReached { count: usize, limit: u32 },

    /// The whole profile already runs as many instances as it may.
    ProfileLimitReached { total: usize, limit: u32 },
}

impl AdmissionDecision {
    /// Returns true if a new instance may be started.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Short code for logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::ImageLimitReached { .. } => "image_limit_reached",
            Self::ProfileLimitReached { .. } => "profile_limit_reached",
        }
    }
}

/// Instance counts observed for one admission check.
///
/// Counts come from independent registries and need not be a consistent
/// snapshot; a brief overshoot is corrected by the next reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacitySnapshot {
    /// Instances currently tracked for the target image.
    pub image_count: usize,

    /// Per-image instance limit.
    pub image_limit: u32,

    /// Instances tracked across every image of the profile.
    pub fleet_count: usize,
}

/// Normalize a configured profile limit. Absent or non-positive means unlimited.
pub fn effective_profile_limit(configured: Option<i64>) -> Option<u32> {
    configured
        .filter(|limit| *limit > 0)
        .map(|limit| u32::try_from(limit).unwrap_or(u32::MAX))
}

/// Decide whether one more instance may start.
///
/// The image limit is checked first, then the profile limit.
pub fn evaluate(snapshot: &CapacitySnapshot, profile_limit: Option<i64>) -> AdmissionDecision {
    if snapshot.image_count >= snapshot.image_limit as usize {
        return AdmissionDecision::ImageLimitReached {
            count: snapshot.image_count,
            limit: snapshot.image_limit,
        };
    }

    if let Some(limit) = effective_profile_limit(profile_limit) {
        if snapshot.fleet_count >= limit as usize {
            return AdmissionDecision::ProfileLimitReached {
                total: snapshot.fleet_count,
                limit,
            };
        }
    }

    AdmissionDecision::Allowed
}

/// Consecutive failure counts per key.
#[derive(Debug, Clone, Default)]
pub struct FailureStreak {
    threshold: u32,
    streaks: BTreeMap<String, u32>,
}

impl FailureStreak {
    /// Create a tracker that escalates after `threshold` consecutive failures.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            streaks: BTreeMap::new(),
        }
    }

    /// Record a failure. Returns the streak length including this failure.
    pub fn record_failure(&mut self, key: &str) -> u32 {
        let count = self.streaks.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Record a success, ending any streak. Returns the streak that ended.
    pub fn record_success(&mut self, key: &str) -> Option<u32> {
        self.streaks.remove(key)
    }

    /// Current streak length for a key.
    pub fn current(&self, key: &str) -> u32 {
        self.streaks.get(key).copied().unwrap_or(0)
    }

    /// Whether a streak of this length should be reported as an error.
    pub fn is_escalated(&self, count: u32) -> bool {
        count > self.threshold
    }
}

/// Default reconciliation interval.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Consecutive failed passes tolerated before logging at error level.
pub const DEFAULT_ESCALATION_THRESHOLD: u32 = 3;
