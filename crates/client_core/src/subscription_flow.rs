//! Three-step subscription wizard: collect an email, pick teams, confirm.
//!
//! [`SubscriptionFlow`] owns the whole UI state. Front ends read it through
//! [`SubscriptionFlow::state`] and change it only through the operations on the
//! controller; every change is also published as a [`FlowEvent`].

use std::{collections::BTreeSet, future::Future, sync::Arc};

use shared::domain::{Team, TeamId, User};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::{ApiCallError, NewsletterApi};

pub const SUBSCRIBE_FALLBACK: &str = "Something went wrong. Please try again.";
pub const TEAMS_LOAD_FAILED: &str = "Failed to load teams data";
pub const SAVE_TEAMS_FALLBACK: &str = "Failed to save team preferences. Please try again.";

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowStep {
    #[default]
    Subscribe,
    SelectTeams,
    Confirmed,
}

#[derive(Debug, Clone, Default)]
pub struct FlowState {
    pub step: FlowStep,
    pub email: String,
    pub loading: bool,
    pub error: Option<String>,
    pub teams: Vec<Team>,
    pub selection: BTreeSet<TeamId>,
    pub user: Option<User>,
}

impl FlowState {
    pub fn is_selected(&self, team_id: TeamId) -> bool {
        self.selection.contains(&team_id)
    }

    fn in_catalog(&self, team_id: TeamId) -> bool {
        self.teams.iter().any(|team| team.id == team_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    StepChanged(FlowStep),
    LoadingChanged(bool),
    ErrorChanged(Option<String>),
    SelectionChanged(Vec<TeamId>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("operation requires step {expected:?}, flow is at {actual:?}")]
    WrongStep { expected: FlowStep, actual: FlowStep },
    #[error("email is required")]
    EmptyEmail,
    #[error("team {0} is not in the catalog")]
    UnknownTeam(TeamId),
    #[error("operation cancelled")]
    Cancelled,
    /// The attempt failed; the message is also shown as the flow's error.
    #[error("{0}")]
    Rejected(String),
}

/// Aborts whatever operation the owning flow has in flight.
///
/// The pending call's result is discarded and the flow stays where it was.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<u64>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }
}

pub struct SubscriptionFlow {
    api: Arc<dyn NewsletterApi>,
    state: FlowState,
    events: broadcast::Sender<FlowEvent>,
    cancel_tx: Arc<watch::Sender<u64>>,
    cancel_rx: watch::Receiver<u64>,
}

struct LoadedSubscription {
    user: Option<User>,
    teams: Vec<Team>,
}

impl SubscriptionFlow {
    pub fn new(api: Arc<dyn NewsletterApi>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (cancel_tx, cancel_rx) = watch::channel(0);
        Self {
            api,
            state: FlowState::default(),
            events,
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn step(&self) -> FlowStep {
        self.state.step
    }

    /// Whether the "save teams" control should be enabled.
    pub fn can_submit_teams(&self) -> bool {
        self.state.step == FlowStep::SelectTeams
            && !self.state.selection.is_empty()
            && !self.state.loading
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<FlowEvent> {
        self.events.subscribe()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    /// Subscribes `email`, then loads the subscriber record and the team catalog.
    ///
    /// User, selection and catalog are only replaced when all three calls succeed.
    pub async fn submit_email(&mut self, email: &str) -> Result<FlowStep, FlowError> {
        self.expect_step(FlowStep::Subscribe)?;
        self.set_error(None);
        let email = email.trim();
        if email.is_empty() {
            return Err(FlowError::EmptyEmail);
        }

        self.state.email = email.to_string();
        let mut cancel = self.begin_attempt();
        let outcome = load_subscription(Arc::clone(&self.api), email, &mut cancel).await;
        let loaded = self.settle("submit_email", outcome)?;

        self.state.selection = loaded
            .user
            .as_ref()
            .map(|user| user.team_ids().collect())
            .unwrap_or_default();
        self.state.user = loaded.user;
        self.state.teams = loaded.teams;
        info!(
            "flow: subscribed email={} catalog={} preselected={}",
            self.state.email,
            self.state.teams.len(),
            self.state.selection.len()
        );
        self.publish(FlowEvent::SelectionChanged(self.selection_vec()));
        self.advance(FlowStep::SelectTeams);
        Ok(FlowStep::SelectTeams)
    }

    /// Flips `team_id` in the selection and returns whether it is now selected.
    ///
    /// Ids outside the catalog can only be removed, never added.
    pub fn toggle_team(&mut self, team_id: TeamId) -> Result<bool, FlowError> {
        self.expect_step(FlowStep::SelectTeams)?;

        let selected = if self.state.selection.remove(&team_id) {
            false
        } else if self.state.in_catalog(team_id) {
            self.state.selection.insert(team_id);
            true
        } else {
            return Err(FlowError::UnknownTeam(team_id));
        };

        debug!("flow: toggled team={team_id} selected={selected}");
        self.publish(FlowEvent::SelectionChanged(self.selection_vec()));
        Ok(selected)
    }

    /// Sends the complete selection to the backend.
    ///
    /// An empty selection is not refused here; gate the control with
    /// [`SubscriptionFlow::can_submit_teams`].
    pub async fn submit_teams(&mut self) -> Result<FlowStep, FlowError> {
        self.expect_step(FlowStep::SelectTeams)?;

        let team_ids = self.selection_vec();
        let email = self.state.email.clone();
        let mut cancel = self.begin_attempt();
        let outcome = save_teams(Arc::clone(&self.api), &email, &team_ids, &mut cancel).await;
        self.settle("submit_teams", outcome)?;

        info!("flow: saved teams email={} teams={}", email, team_ids.len());
        self.advance(FlowStep::Confirmed);
        Ok(FlowStep::Confirmed)
    }

    fn expect_step(&self, expected: FlowStep) -> Result<(), FlowError> {
        if self.state.step == expected {
            Ok(())
        } else {
            Err(FlowError::WrongStep {
                expected,
                actual: self.state.step,
            })
        }
    }

    /// Clears the previous error, raises `loading` and arms cancellation for this attempt.
    fn begin_attempt(&mut self) -> watch::Receiver<u64> {
        self.set_error(None);
        self.set_loading(true);
        let mut cancel = self.cancel_rx.clone();
        cancel.borrow_and_update();
        cancel
    }

    fn settle<T>(
        &mut self,
        operation: &'static str,
        outcome: Result<T, FlowError>,
    ) -> Result<T, FlowError> {
        self.set_loading(false);
        match &outcome {
            Err(FlowError::Rejected(message)) => {
                warn!("flow: {operation} failed step={:?} error={message}", self.state.step);
                self.set_error(Some(message.clone()));
            }
            Err(FlowError::Cancelled) => {
                info!("flow: {operation} cancelled step={:?}", self.state.step);
            }
            _ => {}
        }
        outcome
    }

    fn advance(&mut self, step: FlowStep) {
        self.state.step = step;
        self.publish(FlowEvent::StepChanged(step));
    }

    fn set_loading(&mut self, loading: bool) {
        if self.state.loading != loading {
            self.state.loading = loading;
            self.publish(FlowEvent::LoadingChanged(loading));
        }
    }

    fn set_error(&mut self, error: Option<String>) {
        if self.state.error != error {
            self.state.error = error.clone();
            self.publish(FlowEvent::ErrorChanged(error));
        }
    }

    fn selection_vec(&self) -> Vec<TeamId> {
        self.state.selection.iter().copied().collect()
    }

    fn publish(&self, event: FlowEvent) {
        let _ = self.events.send(event);
    }
}

/// Resolves `call` unless the attempt is cancelled first.
async fn guarded<T>(
    cancel: &mut watch::Receiver<u64>,
    call: impl Future<Output = T>,
) -> Result<T, FlowError> {
    tokio::select! {
        biased;
        _ = cancel.changed() => Err(FlowError::Cancelled),
        out = call => Ok(out),
    }
}

fn rejected(err: &ApiCallError, fallback: &str) -> FlowError {
    warn!("flow: api call failed: {err}");
    FlowError::Rejected(err.detail().unwrap_or(fallback).to_string())
}

async fn load_subscription(
    api: Arc<dyn NewsletterApi>,
    email: &str,
    cancel: &mut watch::Receiver<u64>,
) -> Result<LoadedSubscription, FlowError> {
    let ack = guarded(cancel, api.subscribe(email))
        .await?
        .map_err(|err| rejected(&err, SUBSCRIBE_FALLBACK))?;
    if !ack.success {
        return Err(FlowError::Rejected(ack.failure_message(SUBSCRIBE_FALLBACK)));
    }

    let envelope = guarded(cancel, api.get_user(email))
        .await?
        .map_err(|err| rejected(&err, SUBSCRIBE_FALLBACK))?;
    let user = if envelope.success {
        envelope.data
    } else {
        debug!("flow: no subscriber record for email={email}, starting with empty selection");
        None
    };

    let teams = guarded(cancel, api.list_teams())
        .await?
        .map_err(|err| rejected(&err, SUBSCRIBE_FALLBACK))?
        .data
        .filter(|teams| !teams.is_empty())
        .ok_or_else(|| FlowError::Rejected(TEAMS_LOAD_FAILED.to_string()))?;

    Ok(LoadedSubscription { user, teams })
}

async fn save_teams(
    api: Arc<dyn NewsletterApi>,
    email: &str,
    team_ids: &[TeamId],
    cancel: &mut watch::Receiver<u64>,
) -> Result<(), FlowError> {
    let ack = guarded(cancel, api.update_teams(email, team_ids))
        .await?
        .map_err(|err| rejected(&err, SAVE_TEAMS_FALLBACK))?;
    if !ack.success {
        return Err(FlowError::Rejected(ack.failure_message(SAVE_TEAMS_FALLBACK)));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/subscription_flow_tests.rs"]
mod tests;
