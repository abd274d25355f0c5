use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::sleep;

use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::link::{InviteContext, LinkState, PeerChannel};
use crate::roster::RosterStore;

use super::admission::{AccessCodes, RoleAdmission};
use super::clock::ClockSync;
use super::envelope::Envelope;
use super::interaction::{
    ApplyOutcome, InteractionRequest, InteractionStateMachine, TimerHandle,
};
use super::router::MessageRouter;
use super::state::{ClassroomState, CourseRef, LessonRef, Role};
use super::sync::StateSyncEngine;

/// Everything that may mutate a node's session state arrives here: inbound
/// bytes, link-state changes, and timer firings all enqueue, and one loop
/// consumes. Transport callbacks never touch state directly.
#[derive(Debug)]
pub enum SessionEvent {
    Inbound { from: String, bytes: Vec<u8> },
    PeerDisconnected { device_name: String },
    HubLink { state: LinkState },
    InteractionExpired,
    ClassStarted,
}

/// What the embedding application observes. This stands in for the UI
/// collaborator: presentation and alerts are decided by the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotification {
    RoleAssigned(Role),
    RosterUpdated(Vec<String>),
    InteractionPresented(InteractionRequest),
    InteractionCleared,
    ConflictingInteraction(InteractionRequest),
    ClassStarted,
    ClassEnded,
    ServerDisconnected,
}

/// Top-level facade for one node, hub or client.
///
/// The hub exclusively owns the peer table, access codes, and the canonical
/// classroom tuple; clients hold a mirror converged by relayed envelopes.
/// Hub and client share one dispatch table; the hub's extra behavior is
/// fanning relayed types out to the rest of the room.
pub struct SessionCoordinator {
    is_hub: bool,
    device_name: String,
    config: Config,
    state: Arc<RwLock<ClassroomState>>,
    router: Arc<MessageRouter>,
    sync: Arc<StateSyncEngine>,
    interactions: InteractionStateMachine,
    admission: RwLock<Option<RoleAdmission>>,
    clock: RwLock<ClockSync>,
    own_role: RwLock<Option<Role>>,
    roster: Arc<dyn RosterStore>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    notifications: mpsc::UnboundedSender<SessionNotification>,
    class_timer: Mutex<Option<TimerHandle>>,
    /// Distinguishes a user-initiated disconnect from losing the server,
    /// so no spurious "server disconnected" alert fires.
    intentional_disconnect: AtomicBool,
}

impl SessionCoordinator {
    pub fn new_hub(
        device_name: impl Into<String>,
        roster: Arc<dyn RosterStore>,
        config: Config,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionNotification>) {
        Self::build(true, device_name.into(), roster, config)
    }

    pub fn new_client(
        device_name: impl Into<String>,
        roster: Arc<dyn RosterStore>,
        config: Config,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionNotification>) {
        Self::build(false, device_name.into(), roster, config)
    }

    fn build(
        is_hub: bool,
        device_name: String,
        roster: Arc<dyn RosterStore>,
        config: Config,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionNotification>) {
        let state = Arc::new(RwLock::new(ClassroomState::default()));
        let router = MessageRouter::new();
        let sync = StateSyncEngine::new(
            state.clone(),
            router.clone(),
            config.sync.debounce_window,
            is_hub,
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notifications_tx, notifications_rx) = mpsc::unbounded_channel();
        let interactions = InteractionStateMachine::new(
            state.clone(),
            router.clone(),
            sync.clone(),
            events_tx.clone(),
            notifications_tx.clone(),
            is_hub,
            config.session.countdown_tick,
        );

        let coordinator = Arc::new(Self {
            is_hub,
            device_name,
            config,
            state,
            router,
            sync,
            interactions,
            admission: RwLock::new(None),
            clock: RwLock::new(ClockSync::new()),
            own_role: RwLock::new(if is_hub { Some(Role::Host) } else { None }),
            roster,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            notifications: notifications_tx,
            class_timer: Mutex::new(None),
            intentional_disconnect: AtomicBool::new(false),
        });

        (coordinator, notifications_rx)
    }

    /// Sender half of the event queue, for the transport integration.
    pub fn events(&self) -> mpsc::UnboundedSender<SessionEvent> {
        self.events_tx.clone()
    }

    pub fn is_hub(&self) -> bool {
        self.is_hub
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Spawns the single consumer of the event queue.
    pub fn start_event_loop(self: &Arc<Self>) {
        let coordinator = self.clone();

        tokio::spawn(async move {
            let receiver = {
                let mut receiver_guard = coordinator.events_rx.lock().await;
                receiver_guard.take()
            };

            if let Some(mut rx) = receiver {
                while let Some(event) = rx.recv().await {
                    coordinator.handle_event(event).await;
                }
            }
        });
    }

    pub async fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Inbound { from, bytes } => self.handle_inbound(&from, &bytes).await,
            SessionEvent::PeerDisconnected { device_name } => {
                self.handle_peer_disconnected(&device_name).await
            }
            SessionEvent::HubLink { state } => {
                if state == LinkState::NotConnected {
                    self.handle_hub_lost().await;
                }
            }
            SessionEvent::InteractionExpired => {
                // Every node ran its own countdown; expiry ends locally and
                // the hub reconverges the room.
                self.interactions.end(false, self.is_hub).await;
            }
            SessionEvent::ClassStarted => {
                let _ = self.notifications.send(SessionNotification::ClassStarted);
            }
        }
    }

    pub async fn handle_inbound(&self, from: &str, bytes: &[u8]) {
        match Envelope::decode(bytes) {
            Ok(envelope) => self.handle_envelope(from, envelope).await,
            Err(e) => {
                tracing::debug!(peer = %from, error = %e, "Dropping undecodable envelope");
            }
        }
    }

    /// The dispatch table, shared by hub and client. Relay-vs-terminal is
    /// the only difference: the hub additionally fans relayed types out,
    /// always excluding the logical sender.
    pub async fn handle_envelope(&self, from: &str, envelope: Envelope) {
        match envelope {
            Envelope::Role { role } => {
                if !self.is_hub {
                    *self.own_role.write().await = Some(role);
                    let _ = self
                        .notifications
                        .send(SessionNotification::RoleAssigned(role));
                }
            }

            Envelope::Students { students } => {
                if !self.is_hub {
                    let _ = self
                        .notifications
                        .send(SessionNotification::RosterUpdated(students));
                }
            }

            Envelope::RequestStudents => {
                if self.is_hub {
                    let students = self.router.student_nicknames().await;
                    self.router
                        .send_to(from, &Envelope::Students { students })
                        .await;
                }
            }

            Envelope::Disconnect { target } => {
                if self.is_hub {
                    self.router
                        .send_to(&target, &Envelope::Disconnect { target: target.clone() })
                        .await;
                    self.handle_peer_disconnected(&target).await;
                } else if target == self.device_name {
                    self.intentional_disconnect.store(true, Ordering::SeqCst);
                    self.teardown_local(false).await;
                }
            }

            Envelope::State {
                course,
                lesson,
                interaction,
                remaining_seconds,
                stage_index,
            } => {
                self.sync.apply_remote(course, lesson).await;
                if self.is_hub {
                    // A client forwarded its view; the hub's interaction
                    // authority is the state machine, so only course and
                    // lesson are adopted before reconverging the room.
                    self.sync.request_broadcast(None).await;
                } else {
                    self.interactions
                        .apply_status(interaction, remaining_seconds, stage_index)
                        .await;
                }
            }

            Envelope::StartClass { timestamp } => {
                if self.is_hub {
                    self.router
                        .relay(&Envelope::StartClass { timestamp }, Some(from), None)
                        .await;
                }
                self.arm_class_timer(timestamp).await;
            }

            Envelope::StartInteraction {
                interaction,
                remaining_seconds,
            } => {
                let outcome = self
                    .interactions
                    .apply_remote_start(interaction.clone(), remaining_seconds)
                    .await;
                match outcome {
                    ApplyOutcome::Applied => {
                        if self.is_hub {
                            self.router
                                .relay(
                                    &Envelope::StartInteraction {
                                        interaction,
                                        remaining_seconds,
                                    },
                                    Some(from),
                                    None,
                                )
                                .await;
                        }
                    }
                    ApplyOutcome::Duplicate => {}
                    ApplyOutcome::Conflict(active) => {
                        let notice = Envelope::InteractionInProgress {
                            interaction: active,
                        };
                        if self.is_hub {
                            self.router.send_to(from, &notice).await;
                        } else {
                            self.router.send_to_hub(&notice).await;
                        }
                    }
                }
            }

            Envelope::ForceStartInteraction { interaction } => {
                if self.is_hub {
                    let _ = self.interactions.force_start(interaction).await;
                } else {
                    tracing::debug!("Ignoring forceStartInteraction on a client node");
                }
            }

            Envelope::StopInteraction => {
                self.interactions.end(false, false).await;
                if self.is_hub {
                    self.router
                        .relay(&Envelope::StopInteraction, Some(from), None)
                        .await;
                }
            }

            Envelope::NextStage { stage_index } => {
                self.interactions.apply_stage_index(stage_index).await;
                if self.is_hub {
                    self.router
                        .relay(&Envelope::NextStage { stage_index }, Some(from), None)
                        .await;
                }
            }

            Envelope::EndClass => {
                if self.is_hub {
                    self.end_class().await;
                } else {
                    self.teardown_local(true).await;
                }
            }

            Envelope::RequestInteractionStatus => {
                let status = self.interactions.status_envelope().await;
                if self.is_hub {
                    self.router.send_to(from, &status).await;
                } else {
                    self.router.send_to_hub(&status).await;
                }
            }

            Envelope::InteractionStatus {
                interaction,
                remaining_seconds,
                stage_index,
            } => {
                self.interactions
                    .apply_status(interaction, remaining_seconds, stage_index)
                    .await;
            }

            Envelope::InteractionInProgress { interaction } => {
                if !self.is_hub {
                    let _ = self
                        .notifications
                        .send(SessionNotification::ConflictingInteraction(interaction));
                }
            }

            Envelope::SyncTime { timestamp } => {
                if self.is_hub {
                    self.router
                        .send_to(from, &Envelope::SyncTime { timestamp: Utc::now() })
                        .await;
                } else {
                    self.clock.write().await.complete_round_trip(timestamp);
                }
            }
        }
    }

    // ---- hub lifecycle ----

    /// Opens a classroom: fresh state, fresh codes. Codes are regenerated
    /// on every open and live only until `end_class`.
    pub async fn open_classroom(&self, course: CourseRef) -> Result<AccessCodes> {
        if !self.is_hub {
            return Err(RelayError::NotHub);
        }

        let codes = AccessCodes::generate();
        *self.admission.write().await = Some(RoleAdmission::new(codes.clone()));
        {
            let mut state = self.state.write().await;
            state.clear();
            state.course = Some(course);
        }

        tracing::info!("Classroom opened");
        Ok(codes)
    }

    pub async fn access_codes(&self) -> Option<AccessCodes> {
        let admission = self.admission.read().await;
        admission.as_ref().map(|a| a.codes().clone())
    }

    /// Accept path for an inbound connection. Rejection returns None and
    /// sends nothing; the connecting peer infers failure by timeout.
    pub async fn admit(&self, context: &InviteContext, channel: PeerChannel) -> Option<Role> {
        if !self.is_hub {
            return None;
        }

        let role = {
            let admission = self.admission.read().await;
            let admission = admission.as_ref()?;
            admission.evaluate(&context.passcode, self.router.has_teacher().await)?
        };

        let device = channel.device_name().to_string();
        self.router
            .add_peer(device.clone(), role, context.nickname.clone(), channel)
            .await;
        self.router.send_to(&device, &Envelope::Role { role }).await;

        // Targeted, non-debounced state so the late joiner converges
        // without waiting for an unrelated future change.
        self.sync.send_now_to(&device).await;

        let course = {
            let state = self.state.read().await;
            state.course_name().to_string()
        };
        self.roster
            .upsert(&device, &context.nickname, role, &course, true, Utc::now());

        let students = self.router.student_nicknames().await;
        self.router
            .relay(
                &Envelope::Students {
                    students: students.clone(),
                },
                None,
                None,
            )
            .await;
        let _ = self
            .notifications
            .send(SessionNotification::RosterUpdated(students));

        tracing::info!(peer = %device, ?role, "Peer admitted");
        Some(role)
    }

    /// Schedules class start at an instant on the hub's wall clock. Each
    /// peer converts it through its learned offset, so countdowns land
    /// together despite clock drift.
    pub async fn start_class_at(&self, hub_instant: DateTime<Utc>) {
        let envelope = Envelope::StartClass {
            timestamp: hub_instant,
        };
        if self.is_hub {
            self.router.relay(&envelope, None, None).await;
        } else {
            self.router.send_to_hub(&envelope).await;
        }
        self.arm_class_timer(hub_instant).await;
    }

    /// Full session teardown on the hub; on a client, forwards the request
    /// to the hub.
    pub async fn end_class(&self) {
        if !self.is_hub {
            self.router.send_to_hub(&Envelope::EndClass).await;
            return;
        }

        tracing::info!("Ending class");
        self.router.relay(&Envelope::EndClass, None, None).await;
        self.interactions.end(false, false).await;
        self.class_timer.lock().await.take();

        // Grace so the farewell leaves the wire before channels drop.
        sleep(self.config.session.teardown_grace).await;

        let course = {
            let state = self.state.read().await;
            state.course_name().to_string()
        };
        self.roster.mark_disconnected_except(&[], &course);
        self.router.clear().await;
        *self.admission.write().await = None;
        {
            let mut state = self.state.write().await;
            state.clear();
        }
        let _ = self.notifications.send(SessionNotification::ClassEnded);
    }

    pub async fn set_course(&self, course: Option<CourseRef>) {
        {
            let mut state = self.state.write().await;
            state.course = course;
        }
        self.sync.request_broadcast(None).await;
    }

    pub async fn set_lesson(&self, lesson: Option<LessonRef>) {
        {
            let mut state = self.state.write().await;
            state.lesson = lesson;
        }
        self.sync.request_broadcast(None).await;
    }

    // ---- interaction commands ----

    pub async fn start_interaction(&self, request: InteractionRequest) -> Result<()> {
        self.interactions.start(request, true, None).await
    }

    pub async fn force_start_interaction(&self, request: InteractionRequest) -> Result<()> {
        if self.is_hub {
            self.interactions.force_start(request).await
        } else {
            self.router
                .send_to_hub(&Envelope::ForceStartInteraction {
                    interaction: request,
                })
                .await;
            Ok(())
        }
    }

    pub async fn stop_interaction(&self) {
        self.interactions.end(true, self.is_hub).await;
    }

    pub async fn advance_stage(&self) {
        self.interactions.advance_stage().await;
    }

    /// Pull-based reconciliation for a client that suspects it missed an
    /// update, independent of the debounced push path.
    pub async fn request_interaction_status(&self) {
        self.router
            .send_to_hub(&Envelope::RequestInteractionStatus)
            .await;
    }

    // ---- client link management ----

    pub async fn attach_hub(&self, channel: PeerChannel) {
        self.intentional_disconnect.store(false, Ordering::SeqCst);
        self.router.set_hub_channel(Some(channel)).await;
    }

    pub async fn disconnect_from_hub(&self) {
        self.intentional_disconnect.store(true, Ordering::SeqCst);
        self.router.set_hub_channel(None).await;
    }

    /// One timestamped round trip to the hub; the reply teaches this node
    /// its clock offset for the session.
    pub async fn sync_clock(&self) {
        let sent_at = self.clock.write().await.begin_round_trip();
        self.router
            .send_to_hub(&Envelope::SyncTime { timestamp: sent_at })
            .await;
    }

    // ---- accessors ----

    pub async fn state_snapshot(&self) -> ClassroomState {
        self.state.read().await.clone()
    }

    pub async fn own_role(&self) -> Option<Role> {
        *self.own_role.read().await
    }

    pub async fn active_interaction(&self) -> Option<InteractionRequest> {
        self.interactions.active_request().await
    }

    pub async fn clock_offset(&self) -> chrono::Duration {
        self.clock.read().await.offset()
    }

    pub async fn connected_peer_count(&self) -> usize {
        self.router.peer_count().await
    }

    // ---- internals ----

    async fn handle_peer_disconnected(&self, device_name: &str) {
        let Some(record) = self.router.remove_peer(device_name).await else {
            return;
        };

        let course = {
            let state = self.state.read().await;
            state.course_name().to_string()
        };
        self.roster.upsert(
            device_name,
            &record.nickname,
            record.role,
            &course,
            false,
            Utc::now(),
        );

        let students = self.router.student_nicknames().await;
        self.router
            .relay(
                &Envelope::Students {
                    students: students.clone(),
                },
                None,
                None,
            )
            .await;
        let _ = self
            .notifications
            .send(SessionNotification::RosterUpdated(students));
    }

    async fn handle_hub_lost(&self) {
        self.router.set_hub_channel(None).await;
        self.interactions.cancel_countdown().await;
        self.class_timer.lock().await.take();

        if !self.intentional_disconnect.swap(false, Ordering::SeqCst) {
            tracing::warn!("Lost connection to the hub");
            let _ = self
                .notifications
                .send(SessionNotification::ServerDisconnected);
        }
    }

    /// Client-side teardown on `endClass` or a remote disconnect order.
    async fn teardown_local(&self, class_ended: bool) {
        self.interactions.end(false, false).await;
        self.class_timer.lock().await.take();
        {
            let mut state = self.state.write().await;
            state.clear();
        }
        *self.own_role.write().await = None;
        self.intentional_disconnect.store(true, Ordering::SeqCst);
        self.router.set_hub_channel(None).await;

        if class_ended {
            let _ = self.notifications.send(SessionNotification::ClassEnded);
        }
    }

    /// Arms the shared-instant class timer, converting the hub's wall
    /// clock through the learned offset. cancel-then-create, like every
    /// timer-owning transition.
    async fn arm_class_timer(&self, hub_instant: DateTime<Utc>) {
        let local_instant = {
            let clock = self.clock.read().await;
            clock.local_instant(hub_instant)
        };
        let delay = (local_instant - Utc::now())
            .to_std()
            .unwrap_or(StdDuration::ZERO);

        let mut slot = self.class_timer.lock().await;
        slot.take();

        let events = self.events_tx.clone();
        let task = tokio::spawn(async move {
            sleep(delay).await;
            let _ = events.send(SessionEvent::ClassStarted);
        });
        *slot = Some(TimerHandle::new(task));
    }
}
