use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use super::interaction::InteractionRequest;
use super::state::{CourseRef, LessonRef, Role};

/// Wire message exchanged between the hub and its peers.
///
/// One JSON record with a `type` discriminator; optional fields are elided
/// when absent. Unknown types fail to decode and the receiver drops them,
/// which is the forward-compatibility story: an old node simply ignores
/// traffic it does not understand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Envelope {
    /// Hub -> client: the role assigned at admission.
    Role { role: Role },

    /// Hub -> peers: current student nicknames.
    Students { students: Vec<String> },

    /// Peer -> hub: ask for the current student list.
    RequestStudents,

    /// Ask the hub to drop a device, or tell a device to drop itself.
    Disconnect { target: String },

    /// Debounced convergence broadcast carrying the canonical tuple.
    #[serde(rename_all = "camelCase")]
    State {
        #[serde(skip_serializing_if = "Option::is_none")]
        course: Option<CourseRef>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lesson: Option<LessonRef>,
        #[serde(skip_serializing_if = "Option::is_none")]
        interaction: Option<InteractionRequest>,
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining_seconds: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage_index: Option<usize>,
    },

    /// Class begins at `timestamp` on the hub's wall clock.
    StartClass { timestamp: DateTime<Utc> },

    #[serde(rename_all = "camelCase")]
    StartInteraction {
        interaction: InteractionRequest,
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining_seconds: Option<u32>,
    },

    ForceStartInteraction { interaction: InteractionRequest },

    StopInteraction,

    #[serde(rename_all = "camelCase")]
    NextStage { stage_index: usize },

    EndClass,

    /// Pull-based reconciliation, independent of the debounced push path.
    RequestInteractionStatus,

    #[serde(rename_all = "camelCase")]
    InteractionStatus {
        #[serde(skip_serializing_if = "Option::is_none")]
        interaction: Option<InteractionRequest>,
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining_seconds: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage_index: Option<usize>,
    },

    /// Conflict notice echoing the request that is currently active.
    InteractionInProgress { interaction: InteractionRequest },

    /// Clock-sync round trip; both the request and the reply carry the
    /// sender's current wall clock.
    SyncTime { timestamp: DateTime<Utc> },
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
