//! Session coordination and message relay for a classroom of peers.
//!
//! One host node (the hub) and many clients keep a single consistent view
//! of classroom state over a star topology: which course and lesson are
//! active, who is connected in what role, and what interactive activity is
//! running. Clients never talk to each other directly; the hub relays.
//! Correctness under dropped, duplicated, and reordered delivery comes
//! from idempotent state application, not ordering guarantees.

pub mod config;
pub mod error;
pub mod link;
pub mod roster;
pub mod session;

pub use config::Config;
pub use error::{RelayError, Result};
pub use link::{InviteContext, LinkState, PeerChannel};
pub use roster::{MemoryRoster, RosterStore};
pub use session::{
    AccessCodes, ClassroomState, CourseRef, Envelope, InteractionRequest, LessonRef, Role,
    SessionCoordinator, SessionEvent, SessionNotification,
};
