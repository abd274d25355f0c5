use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;

use super::envelope::Envelope;
use super::router::MessageRouter;
use super::state::{ClassroomState, CourseRef, LessonRef};

/// Who the pending debounced broadcast should reach.
#[derive(Debug, Clone, PartialEq)]
enum Targets {
    All,
    Peers(HashSet<String>),
}

impl Targets {
    /// Any unrestricted request widens the pending set to everyone.
    fn merge(&mut self, additional: Option<&[String]>) {
        match additional {
            None => *self = Targets::All,
            Some(devices) => {
                if let Targets::Peers(set) = self {
                    set.extend(devices.iter().cloned());
                }
            }
        }
    }

    fn from_request(request: Option<&[String]>) -> Self {
        match request {
            None => Targets::All,
            Some(devices) => Targets::Peers(devices.iter().cloned().collect()),
        }
    }
}

/// Owns convergence of the canonical classroom tuple.
///
/// Course, lesson, and interaction fields change via independent writes
/// that each request a broadcast; requests landing inside the debounce
/// window collapse into a single `state` envelope reflecting whatever the
/// state is when the window elapses, never a stale intermediate.
pub struct StateSyncEngine {
    state: Arc<RwLock<ClassroomState>>,
    router: Arc<MessageRouter>,
    pending: Arc<Mutex<Option<Targets>>>,
    window: Duration,
    is_hub: bool,
}

impl StateSyncEngine {
    pub fn new(
        state: Arc<RwLock<ClassroomState>>,
        router: Arc<MessageRouter>,
        window: Duration,
        is_hub: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            router,
            pending: Arc::new(Mutex::new(None)),
            window,
            is_hub,
        })
    }

    /// Snapshot of the canonical tuple as a wire envelope, with remaining
    /// seconds computed for finite lifecycles.
    pub fn snapshot(state: &ClassroomState) -> Envelope {
        let active = state.active_interaction.as_ref();
        Envelope::State {
            course: state.course.clone(),
            lesson: state.lesson.clone(),
            interaction: active.map(|i| i.request.clone()),
            remaining_seconds: active.and_then(|i| i.remaining_seconds()),
            stage_index: active.map(|i| i.current_stage_index),
        }
    }

    /// Records the request and schedules one debounced broadcast. On a
    /// client this degrades to forwarding the snapshot to the hub, since
    /// clients cannot broadcast directly.
    pub async fn request_broadcast(&self, targets: Option<Vec<String>>) {
        if !self.is_hub {
            let envelope = {
                let state = self.state.read().await;
                Self::snapshot(&state)
            };
            self.router.send_to_hub(&envelope).await;
            return;
        }

        let should_schedule = {
            let mut pending = self.pending.lock().await;
            match pending.as_mut() {
                Some(existing) => {
                    existing.merge(targets.as_deref());
                    false
                }
                None => {
                    *pending = Some(Targets::from_request(targets.as_deref()));
                    true
                }
            }
        };

        if should_schedule {
            tracing::debug!(window_ms = self.window.as_millis() as u64, "Scheduling state broadcast");
            let state = self.state.clone();
            let router = self.router.clone();
            let pending = self.pending.clone();
            let window = self.window;
            tokio::spawn(async move {
                sleep(window).await;
                Self::flush(state, router, pending).await;
            });
        }
    }

    /// Targeted, non-debounced broadcast for a peer whose connection just
    /// completed, so a late joiner converges without waiting for an
    /// unrelated future change.
    pub async fn send_now_to(&self, device_name: &str) {
        let envelope = {
            let state = self.state.read().await;
            Self::snapshot(&state)
        };
        self.router.send_to(device_name, &envelope).await;
    }

    /// Applies the course/lesson portion of an inbound `state` envelope to
    /// the local mirror. Applying the same envelope twice converges to the
    /// same state.
    pub async fn apply_remote(&self, course: Option<CourseRef>, lesson: Option<LessonRef>) {
        let mut state = self.state.write().await;
        state.course = course;
        state.lesson = lesson;
    }

    async fn flush(
        state: Arc<RwLock<ClassroomState>>,
        router: Arc<MessageRouter>,
        pending: Arc<Mutex<Option<Targets>>>,
    ) {
        let targets = {
            let mut pending = pending.lock().await;
            pending.take()
        };

        let Some(targets) = targets else { return };

        // Snapshot taken at flush time: always the latest state.
        let envelope = {
            let state = state.read().await;
            Self::snapshot(&state)
        };

        match targets {
            Targets::All => router.relay(&envelope, None, None).await,
            Targets::Peers(devices) => {
                for device in devices {
                    router.send_to(&device, &envelope).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::PeerChannel;
    use crate::session::state::Role;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn lesson(title: &str) -> LessonRef {
        LessonRef {
            title: title.to_string(),
            intro: String::new(),
            scheduled_at: None,
        }
    }

    async fn engine_with_peer() -> (
        Arc<StateSyncEngine>,
        Arc<RwLock<ClassroomState>>,
        UnboundedReceiver<Vec<u8>>,
    ) {
        let state = Arc::new(RwLock::new(ClassroomState::default()));
        let router = MessageRouter::new();
        let (channel, rx) = PeerChannel::pair("student-pad");
        router
            .add_peer(
                "student-pad".to_string(),
                Role::Student,
                "Ana".to_string(),
                channel,
            )
            .await;
        let engine = StateSyncEngine::new(
            state.clone(),
            router,
            Duration::from_millis(50),
            true,
        );
        (engine, state, rx)
    }

    #[tokio::test]
    async fn test_debounce_coalesces_to_latest_state() {
        let (engine, state, mut rx) = engine_with_peer().await;

        for i in 0..5 {
            {
                let mut state = state.write().await;
                state.lesson = Some(lesson(&format!("lesson-{}", i)));
            }
            engine.request_broadcast(None).await;
        }

        sleep(Duration::from_millis(120)).await;

        let bytes = rx.try_recv().expect("expected one broadcast");
        match Envelope::decode(&bytes).unwrap() {
            Envelope::State { lesson, .. } => {
                assert_eq!(lesson.unwrap().title, "lesson-4");
            }
            other => panic!("expected state envelope, got {:?}", other),
        }
        // Exactly one envelope for the whole burst.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unrestricted_request_widens_targets() {
        let mut targets = Targets::Peers(HashSet::from(["a".to_string()]));
        targets.merge(None);
        assert_eq!(targets, Targets::All);
    }

    #[tokio::test]
    async fn test_targeted_requests_accumulate() {
        let mut targets = Targets::Peers(HashSet::from(["a".to_string()]));
        targets.merge(Some(&["b".to_string()]));
        assert_eq!(
            targets,
            Targets::Peers(HashSet::from(["a".to_string(), "b".to_string()]))
        );
    }

    #[tokio::test]
    async fn test_send_now_to_is_immediate() {
        let (engine, state, mut rx) = engine_with_peer().await;
        {
            let mut state = state.write().await;
            state.lesson = Some(lesson("photosynthesis"));
        }

        engine.send_now_to("student-pad").await;

        let bytes = rx.try_recv().expect("late joiner state should not wait");
        match Envelope::decode(&bytes).unwrap() {
            Envelope::State { lesson, .. } => {
                assert_eq!(lesson.unwrap().title, "photosynthesis")
            }
            other => panic!("expected state envelope, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_request_forwards_to_hub() {
        let state = Arc::new(RwLock::new(ClassroomState::default()));
        let router = MessageRouter::new();
        let (hub_channel, mut hub_rx) = PeerChannel::pair("hub");
        router.set_hub_channel(Some(hub_channel)).await;
        let engine = StateSyncEngine::new(
            state.clone(),
            router,
            Duration::from_millis(50),
            false,
        );

        {
            let mut state = state.write().await;
            state.lesson = Some(lesson("osmosis"));
        }
        engine.request_broadcast(None).await;

        // No debounce on the client forward path.
        let bytes = hub_rx.try_recv().unwrap();
        assert!(matches!(
            Envelope::decode(&bytes).unwrap(),
            Envelope::State { .. }
        ));
    }

    #[tokio::test]
    async fn test_apply_remote_is_idempotent() {
        let (engine, state, _rx) = engine_with_peer().await;

        engine
            .apply_remote(None, Some(lesson("mitosis")))
            .await;
        let first = state.read().await.lesson.clone();

        engine
            .apply_remote(None, Some(lesson("mitosis")))
            .await;
        let second = state.read().await.lesson.clone();

        assert_eq!(first, second);
    }
}
