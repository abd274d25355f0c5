use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::error::{RelayError, Result};
use super::coordinator::{SessionEvent, SessionNotification};
use super::envelope::Envelope;
use super::router::MessageRouter;
use super::state::ClassroomState;
use super::sync::StateSyncEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Template {
    FullScreen,
    FloatingCorner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Lifecycle {
    Infinite,
    Finite { seconds: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub id: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipleChoiceQuestion {
    pub options: Vec<ChoiceOption>,
    pub correct_option_ids: BTreeSet<u32>,
    pub allows_multiple_selection: bool,
}

impl MultipleChoiceQuestion {
    /// Builds a question, enforcing that every correct id names an option.
    pub fn new(
        options: Vec<ChoiceOption>,
        correct_option_ids: BTreeSet<u32>,
        allows_multiple_selection: bool,
    ) -> Result<Self> {
        for id in &correct_option_ids {
            if !options.iter().any(|o| o.id == *id) {
                return Err(RelayError::invalid_question(format!(
                    "correct option id {} has no matching option",
                    id
                )));
            }
        }
        Ok(Self {
            options,
            correct_option_ids,
            allows_multiple_selection,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageContent {
    Text(String),
    Countdown,
    MultipleChoice(MultipleChoiceQuestion),
}

/// One ordered step within a multi-part interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: u32,
    pub content: StageContent,
}

/// What a peer asks to run. Equality on the whole value is the idempotency
/// key for duplicate suppression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRequest {
    pub template: Template,
    pub lifecycle: Lifecycle,
    pub content: StageContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_stages: Vec<Stage>,
}

/// A live activity. Stage 0 is always the request's own content; extra
/// stages follow, sorted by id ascending.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub request: InteractionRequest,
    pub stages: Vec<Stage>,
    pub current_stage_index: usize,
    pub started_at: DateTime<Utc>,
    initial_remaining: Option<u32>,
}

impl Interaction {
    pub fn new(request: InteractionRequest, remaining_override: Option<u32>) -> Self {
        let mut stages = vec![Stage {
            id: 0,
            content: request.content.clone(),
        }];
        stages.extend(request.extra_stages.iter().cloned());
        stages.sort_by_key(|s| s.id);

        let initial_remaining = match request.lifecycle {
            Lifecycle::Finite { seconds } => Some(remaining_override.unwrap_or(seconds)),
            Lifecycle::Infinite => None,
        };

        Self {
            request,
            stages,
            current_stage_index: 0,
            started_at: Utc::now(),
            initial_remaining,
        }
    }

    /// Seconds left on a finite lifecycle, None when infinite.
    pub fn remaining_seconds(&self) -> Option<u32> {
        self.remaining_seconds_at(Utc::now())
    }

    pub fn remaining_seconds_at(&self, now: DateTime<Utc>) -> Option<u32> {
        self.initial_remaining.map(|initial| {
            let elapsed = (now - self.started_at).num_seconds().max(0) as u64;
            initial.saturating_sub(elapsed.min(u32::MAX as u64) as u32)
        })
    }

    /// Moves to the next stage if one exists. Advancing past the last
    /// stage is a no-op and returns None.
    pub fn advance_stage(&mut self) -> Option<usize> {
        if self.current_stage_index + 1 < self.stages.len() {
            self.current_stage_index += 1;
            Some(self.current_stage_index)
        } else {
            None
        }
    }

    /// Applies an inbound stage index, clamped to the valid range.
    pub fn set_stage_index(&mut self, index: usize) {
        self.current_stage_index = index.min(self.stages.len().saturating_sub(1));
    }
}

/// Abortable timer owned by whoever armed it. Dropping the handle cancels
/// the underlying task, which is what makes cancel-then-create safe.
#[derive(Debug)]
pub(crate) struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Outcome of applying an inbound start request.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied,
    Duplicate,
    Conflict(InteractionRequest),
}

/// Owns the lifecycle of at most one concurrent activity.
///
/// `Idle -> Active -> Idle`, with force-preemption and natural countdown
/// expiry. All countdown transitions follow cancel-then-create so a stale
/// timer can never resurrect a finished interaction.
pub struct InteractionStateMachine {
    state: Arc<RwLock<ClassroomState>>,
    router: Arc<MessageRouter>,
    sync: Arc<StateSyncEngine>,
    events: mpsc::UnboundedSender<SessionEvent>,
    notifications: mpsc::UnboundedSender<SessionNotification>,
    countdown: Mutex<Option<TimerHandle>>,
    is_hub: bool,
    tick: Duration,
}

impl InteractionStateMachine {
    pub fn new(
        state: Arc<RwLock<ClassroomState>>,
        router: Arc<MessageRouter>,
        sync: Arc<StateSyncEngine>,
        events: mpsc::UnboundedSender<SessionEvent>,
        notifications: mpsc::UnboundedSender<SessionNotification>,
        is_hub: bool,
        tick: Duration,
    ) -> Self {
        Self {
            state,
            router,
            sync,
            events,
            notifications,
            countdown: Mutex::new(None),
            is_hub,
            tick,
        }
    }

    /// Starts an activity. Only valid while idle; a call while another
    /// activity is active is rejected, though on a client with `broadcast`
    /// the envelope is still forwarded so the hub can answer
    /// `interactionInProgress`.
    pub async fn start(
        &self,
        request: InteractionRequest,
        broadcast: bool,
        remaining_override: Option<u32>,
    ) -> Result<()> {
        let remaining = {
            let mut state = self.state.write().await;
            if state.active_interaction.is_some() {
                drop(state);
                // Courtesy forward so the hub can answer with the conflict
                // notice. Only meaningful client -> hub; relaying a rejected
                // start from the hub would make every client reject it too.
                if broadcast && !self.is_hub {
                    self.router
                        .send_to_hub(&Envelope::StartInteraction {
                            interaction: request,
                            remaining_seconds: remaining_override,
                        })
                        .await;
                }
                return Err(RelayError::InteractionActive);
            }
            let interaction = Interaction::new(request.clone(), remaining_override);
            let remaining = interaction.remaining_seconds();
            state.active_interaction = Some(interaction);
            remaining
        };

        tracing::info!(lifecycle = ?request.lifecycle, "Interaction started");
        let _ = self
            .notifications
            .send(SessionNotification::InteractionPresented(request.clone()));

        if let Some(seconds) = remaining {
            self.arm_countdown(seconds).await;
        }

        if broadcast {
            self.outbound(&Envelope::StartInteraction {
                interaction: request,
                remaining_seconds: remaining,
            })
            .await;
        }

        Ok(())
    }

    /// Teacher override: ends whatever is active, relays an explicit stop,
    /// then starts the new request and relays it.
    pub async fn force_start(&self, request: InteractionRequest) -> Result<()> {
        self.end(false, false).await;
        self.outbound(&Envelope::StopInteraction).await;
        self.start(request, true, None).await
    }

    /// Ends the active activity; no-op from idle.
    pub async fn end(&self, broadcast: bool, broadcast_state: bool) {
        self.cancel_countdown().await;

        let was_active = {
            let mut state = self.state.write().await;
            state.active_interaction.take().is_some()
        };
        if !was_active {
            return;
        }

        tracing::info!("Interaction ended");
        let _ = self.notifications.send(SessionNotification::InteractionCleared);

        if broadcast {
            self.outbound(&Envelope::StopInteraction).await;
        }
        if broadcast_state {
            self.sync.request_broadcast(None).await;
        }
    }

    /// Moves to the next stage and relays the new index so peers stay in
    /// lockstep. At the last stage this is a no-op and nothing is sent.
    pub async fn advance_stage(&self) {
        let advanced = {
            let mut state = self.state.write().await;
            state
                .active_interaction
                .as_mut()
                .and_then(|i| i.advance_stage())
        };

        if let Some(stage_index) = advanced {
            self.outbound(&Envelope::NextStage { stage_index }).await;
        }
    }

    /// Applies an inbound stage index locally, clamped. No relay here; the
    /// hub fans inbound `nextStage` envelopes out itself.
    pub async fn apply_stage_index(&self, index: usize) {
        let mut state = self.state.write().await;
        if let Some(interaction) = state.active_interaction.as_mut() {
            interaction.set_stage_index(index);
        }
    }

    /// Applies an inbound `startInteraction`. Duplicates of the active
    /// request are ignored; a different request while active is a conflict
    /// reported back to the sender; from idle the request is applied
    /// locally without echoing anything back.
    pub async fn apply_remote_start(
        &self,
        request: InteractionRequest,
        remaining: Option<u32>,
    ) -> ApplyOutcome {
        {
            let state = self.state.read().await;
            if let Some(active) = &state.active_interaction {
                if active.request == request {
                    tracing::debug!("Ignoring duplicate start for the active interaction");
                    return ApplyOutcome::Duplicate;
                }
                return ApplyOutcome::Conflict(active.request.clone());
            }
        }

        let _ = self.start(request, false, remaining).await;
        ApplyOutcome::Applied
    }

    /// Reconciliation path for `interactionStatus` and the interaction
    /// portion of `state`: equal requests are left alone, a differing
    /// snapshot is adopted authoritatively, None ends the local activity.
    pub async fn apply_status(
        &self,
        interaction: Option<InteractionRequest>,
        remaining: Option<u32>,
        stage_index: Option<usize>,
    ) {
        match interaction {
            None => self.end(false, false).await,
            Some(request) => {
                let same = {
                    let state = self.state.read().await;
                    state
                        .active_interaction
                        .as_ref()
                        .map(|a| a.request == request)
                        .unwrap_or(false)
                };
                if !same {
                    self.end(false, false).await;
                    let _ = self.start(request, false, remaining).await;
                }
                if let Some(index) = stage_index {
                    self.apply_stage_index(index).await;
                }
            }
        }
    }

    /// Snapshot for the pull-based status exchange.
    pub async fn status_envelope(&self) -> Envelope {
        let state = self.state.read().await;
        let active = state.active_interaction.as_ref();
        Envelope::InteractionStatus {
            interaction: active.map(|i| i.request.clone()),
            remaining_seconds: active.and_then(|i| i.remaining_seconds()),
            stage_index: active.map(|i| i.current_stage_index),
        }
    }

    pub async fn active_request(&self) -> Option<InteractionRequest> {
        let state = self.state.read().await;
        state.active_interaction.as_ref().map(|i| i.request.clone())
    }

    pub async fn cancel_countdown(&self) {
        self.countdown.lock().await.take();
    }

    async fn arm_countdown(&self, seconds: u32) {
        let mut slot = self.countdown.lock().await;
        // cancel-then-create: never leave a previous timer running
        slot.take();

        let events = self.events.clone();
        let tick = self.tick;
        let task = tokio::spawn(async move {
            let mut remaining = seconds;
            let mut ticker = tokio::time::interval(tick);
            ticker.tick().await; // interval fires immediately once
            while remaining > 0 {
                ticker.tick().await;
                remaining -= 1;
            }
            let _ = events.send(SessionEvent::InteractionExpired);
        });
        *slot = Some(TimerHandle::new(task));
    }

    async fn outbound(&self, envelope: &Envelope) {
        if self.is_hub {
            self.router.relay(envelope, None, None).await;
        } else {
            self.router.send_to_hub(envelope).await;
        }
    }
}
