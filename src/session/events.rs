use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::use_cases::UseCaseKind;
use crate::capability::CapabilityDowngrade;
use crate::types::Sensor;

/// Broadcast to session observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Bound {
        binding_id: Uuid,
        sensors: Vec<Sensor>,
        use_cases: Vec<Vec<UseCaseKind>>,
    },
    Unbound {
        binding_id: Uuid,
    },
    CapabilityDowngrade {
        downgrade: CapabilityDowngrade,
    },
    BindFailed {
        message: String,
    },
    AnalysisError {
        sequence: u64,
        message: String,
    },
    RecordingStopped {
        recording_id: Uuid,
        success: bool,
    },
}

/// Capacity of the session event broadcast
pub const EVENT_CAPACITY: usize = 64;
