//! Lifecycle events reported by the runtime.

use crate::types::{ManifestId, UnitId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle phase of a unit as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitPhase {
    /// Created but not yet running.
    Pending,
    /// Running; may or may not be ready.
    Running,
    /// Exited abnormally and will not restart under the same instance ID.
    Failed,
    /// Gone; no restart is scheduled.
    Terminated,
}

impl UnitPhase {
    /// Whether a unit in this phase counts toward the active replica set.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Whether this phase is terminal for the instance.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for UnitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        };
        write!(f, "{}", s)
    }
}

/// One observation from the runtime's event feed.
///
/// `sequence` increases monotonically per unit. The cache drops any event
/// whose sequence is at or below the last applied one, which makes delivery
/// safe under reordering and duplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// The unit this event describes.
    pub unit_id: UnitId,
    /// Identity of the owning manifest record.
    pub owner: ManifestId,
    /// The reported phase.
    pub phase: UnitPhase,
    /// Per-unit monotonically increasing observation sequence number.
    pub sequence: u64,
    /// The image the unit was observed running.
    pub image: String,
    /// Whether the unit passed its readiness check at observation time.
    pub ready: bool,
}
