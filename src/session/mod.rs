pub mod admission;
pub mod clock;
pub mod coordinator;
pub mod envelope;
pub mod interaction;
pub mod router;
pub mod state;
pub mod sync;

pub use admission::{AccessCodes, RoleAdmission};
pub use clock::ClockSync;
pub use coordinator::{SessionCoordinator, SessionEvent, SessionNotification};
pub use envelope::Envelope;
pub use interaction::{
    ApplyOutcome, ChoiceOption, Interaction, InteractionRequest, InteractionStateMachine,
    Lifecycle, MultipleChoiceQuestion, Stage, StageContent, Template,
};
pub use router::{MessageRouter, PeerRecord};
pub use state::{ClassroomState, CourseRef, LessonRef, Role};
pub use sync::StateSyncEngine;
