//! Per-action lifecycle: `Unstarted → Previewing → Previewed → Applying →
//! Applied`, with `Error` reachable from either network step.
//!
//! [`ActionStore`] holds the state machine and is purely synchronous so that
//! callers can keep it behind a lock; the network halves live in
//! [`fetch_preview`] and [`run_apply`] and never touch the store.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::ActionError;
use super::descriptor::{ActionDescriptor, ActionFamily, PreviewPlan};
use crate::rpc::{CreationPreview, DeletionPreview, DeskRpc, FailedRow, SkippedRow, UpdatePreview};

// =============================================================================
// KEY / PHASE
// =============================================================================

/// Stable identity of one action: the message it came from and its position
/// among that message's action blocks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionKey {
    pub message_id: String,
    pub index: usize,
}

impl ActionKey {
    #[must_use]
    pub fn new(message_id: impl Into<String>, index: usize) -> Self {
        Self { message_id: message_id.into(), index }
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.message_id, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPhase {
    Unstarted,
    Previewing,
    Previewed,
    Applying,
    Applied,
    Error,
}

impl ActionPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Previewing => "previewing",
            Self::Previewed => "previewed",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Error => "error",
        }
    }
}

// =============================================================================
// PREVIEW / OUTCOME
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Preview {
    Creation(CreationPreview),
    Deletion(DeletionPreview),
    Update(UpdatePreview),
}

impl Preview {
    /// Rows the apply step would act on.
    #[must_use]
    pub fn actionable_count(&self) -> usize {
        match self {
            Self::Creation(p) => p.accepted_rows().len(),
            Self::Deletion(p) => p.accepted_codes().len(),
            Self::Update(p) => p.accepted_codes().len(),
        }
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        match self {
            Self::Creation(p) => p.items.len(),
            Self::Deletion(p) => p.items.len(),
            Self::Update(p) => p.items.len(),
        }
    }

    #[must_use]
    pub fn warnings(&self) -> &[String] {
        match self {
            Self::Creation(p) => &p.warnings,
            Self::Deletion(p) => &p.warnings,
            Self::Update(p) => &p.warnings,
        }
    }
}

/// Counts and per-row details of a finished apply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyOutcome {
    pub family: ActionFamily,
    pub done: Vec<String>,
    pub skipped: Vec<SkippedRow>,
    pub failed: Vec<FailedRow>,
}

impl ApplyOutcome {
    /// Assistant-facing summary appended to the conversation.
    #[must_use]
    pub fn summary_text(&self) -> String {
        let mut lines = vec![format!("Items {}: {}", self.family.done_verb(), self.done.len())];
        if !self.skipped.is_empty() {
            lines.push(format!("Skipped: {}", self.skipped.len()));
            lines.extend(self.skipped.iter().map(|r| format!("- {}: {}", r.item_code, r.reason)));
        }
        if !self.failed.is_empty() {
            lines.push(format!("Failed: {}", self.failed.len()));
            lines.extend(self.failed.iter().map(|r| format!("- {}: {}", r.item_code, r.error)));
        }
        lines.join("\n")
    }

    /// Context payload stored alongside the summary message.
    #[must_use]
    pub fn to_context_json(&self) -> String {
        json!({ "erpnext_ai_action_result": self }).to_string()
    }
}

// =============================================================================
// STATE / STORE
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ActionState {
    pub descriptor: ActionDescriptor,
    pub phase: ActionPhase,
    pub preview: Option<Preview>,
    pub outcome: Option<ApplyOutcome>,
    pub error: Option<String>,
    pub auto_applied: bool,
}

impl ActionState {
    fn new(descriptor: ActionDescriptor) -> Self {
        Self {
            descriptor,
            phase: ActionPhase::Unstarted,
            preview: None,
            outcome: None,
            error: None,
            auto_applied: false,
        }
    }

    #[must_use]
    pub fn actionable_count(&self) -> usize {
        self.preview.as_ref().map_or(0, Preview::actionable_count)
    }
}

/// Everything an apply call needs, detached from the store.
#[derive(Debug, Clone)]
pub struct ApplyTicket {
    pub descriptor: ActionDescriptor,
    pub preview: Preview,
}

/// Action state for one session, keyed by [`ActionKey`]. Registration order
/// is kept so pending actions are driven in transcript order.
#[derive(Debug, Default)]
pub struct ActionStore {
    states: HashMap<ActionKey, ActionState>,
    order: Vec<ActionKey>,
}

impl ActionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `descriptor` under `key`. Returns `false` when the key is already
    /// known; existing state is never reset.
    pub fn register(&mut self, key: ActionKey, descriptor: ActionDescriptor) -> bool {
        if self.states.contains_key(&key) {
            return false;
        }
        self.order.push(key.clone());
        self.states.insert(key, ActionState::new(descriptor));
        true
    }

    /// Like [`ActionStore::register`], for actions from a transcript that was
    /// loaded rather than received live. They preview but never auto-apply.
    pub fn register_settled(&mut self, key: ActionKey, descriptor: ActionDescriptor) -> bool {
        let fresh = self.register(key.clone(), descriptor);
        if let Some(state) = self.states.get_mut(&key) {
            state.auto_applied |= fresh;
        }
        fresh
    }

    #[must_use]
    pub fn get(&self, key: &ActionKey) -> Option<&ActionState> {
        self.states.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.order.clear();
    }

    /// Keys that have not started previewing, in registration order.
    #[must_use]
    pub fn pending_keys(&self) -> Vec<ActionKey> {
        self.order
            .iter()
            .filter(|key| self.states.get(*key).is_some_and(|s| s.phase == ActionPhase::Unstarted))
            .cloned()
            .collect()
    }

    /// Move `key` to `Previewing` and hand back its descriptor. `None` if the
    /// key is unknown or already past `Unstarted`.
    pub fn begin_preview(&mut self, key: &ActionKey) -> Option<ActionDescriptor> {
        let state = self.states.get_mut(key)?;
        if state.phase != ActionPhase::Unstarted {
            return None;
        }
        state.phase = ActionPhase::Previewing;
        Some(state.descriptor.clone())
    }

    pub fn finish_preview(&mut self, key: &ActionKey, result: Result<Preview, ActionError>) {
        let Some(state) = self.states.get_mut(key) else {
            return;
        };
        match result {
            Ok(preview) => {
                info!(action = %key, kind = state.descriptor.kind.tag(), rows = preview.row_count(), actionable = preview.actionable_count(), "action: preview ok");
                state.phase = ActionPhase::Previewed;
                state.preview = Some(preview);
                state.error = None;
            }
            Err(e) => {
                warn!(action = %key, kind = state.descriptor.kind.tag(), error = %e, code = e.error_code(), "action: preview failed");
                state.phase = ActionPhase::Error;
                state.error = Some(e.to_string());
            }
        }
    }

    /// Claim the one automatic apply for `key`.
    ///
    /// Succeeds only for a previewed, auto-applying action with at least one
    /// actionable row that has never been auto-applied.
    pub fn claim_auto_apply(&mut self, key: &ActionKey) -> Option<ApplyTicket> {
        let state = self.states.get_mut(key)?;
        if state.auto_applied || state.phase != ActionPhase::Previewed || !state.descriptor.auto_apply() {
            return None;
        }
        let preview = state.preview.clone()?;
        if preview.actionable_count() == 0 {
            return None;
        }
        state.auto_applied = true;
        state.phase = ActionPhase::Applying;
        Some(ApplyTicket { descriptor: state.descriptor.clone(), preview })
    }

    /// Start a user-triggered apply, or a retry after a failed apply.
    ///
    /// # Errors
    ///
    /// [`ActionError::InProgress`] while previewing or applying,
    /// [`ActionError::AlreadyApplied`] after success,
    /// [`ActionError::NotPreviewed`] without a preview and
    /// [`ActionError::NothingToApply`] when no row is actionable.
    pub fn begin_manual_apply(&mut self, key: &ActionKey) -> Result<ApplyTicket, ActionError> {
        let state = self.states.get_mut(key).ok_or(ActionError::NotPreviewed)?;
        match state.phase {
            ActionPhase::Previewing | ActionPhase::Applying => return Err(ActionError::InProgress),
            ActionPhase::Applied => return Err(ActionError::AlreadyApplied),
            ActionPhase::Unstarted => return Err(ActionError::NotPreviewed),
            ActionPhase::Previewed | ActionPhase::Error => {}
        }
        let preview = state.preview.clone().ok_or(ActionError::NotPreviewed)?;
        if preview.actionable_count() == 0 {
            return Err(ActionError::NothingToApply);
        }
        state.phase = ActionPhase::Applying;
        state.error = None;
        Ok(ApplyTicket { descriptor: state.descriptor.clone(), preview })
    }

    /// Record an apply result on `key`.
    pub fn finish_apply(&mut self, key: &ActionKey, result: &Result<ApplyOutcome, ActionError>) {
        let Some(state) = self.states.get_mut(key) else {
            return;
        };
        match result {
            Ok(outcome) => {
                info!(action = %key, done = outcome.done.len(), skipped = outcome.skipped.len(), failed = outcome.failed.len(), "action: apply ok");
                state.phase = ActionPhase::Applied;
                state.error = None;
                state.outcome = Some(outcome.clone());
            }
            Err(e) => {
                warn!(action = %key, error = %e, code = e.error_code(), "action: apply failed");
                state.phase = ActionPhase::Error;
                state.error = Some(e.to_string());
            }
        }
    }
}

// =============================================================================
// NETWORK STEPS
// =============================================================================

/// Validate `descriptor` and run its preview call.
///
/// # Errors
///
/// Validation errors from [`ActionDescriptor::plan`] and RPC failures.
pub async fn fetch_preview(rpc: &dyn DeskRpc, descriptor: &ActionDescriptor) -> Result<Preview, ActionError> {
    let preview = match descriptor.plan()? {
        PreviewPlan::Creation(request) => Preview::Creation(rpc.preview_item_creation(&request).await?),
        PreviewPlan::CreationSeries(request) => Preview::Creation(rpc.preview_item_creation_series(&request).await?),
        PreviewPlan::DeletionCodes(codes) => Preview::Deletion(rpc.preview_item_deletion(&codes).await?),
        PreviewPlan::DeletionSeries(series) => Preview::Deletion(rpc.preview_item_deletion_series(&series).await?),
        PreviewPlan::UpdateCodes { item_codes, updates } => {
            Preview::Update(rpc.preview_item_update(&item_codes, &updates).await?)
        }
        PreviewPlan::UpdateSeries { series, updates } => {
            Preview::Update(rpc.preview_item_update_series(&series, &updates).await?)
        }
    };
    Ok(preview)
}

/// Run the apply call for a claimed ticket against its accepted rows only.
///
/// # Errors
///
/// [`ActionError::NothingToApply`] with no accepted rows,
/// [`ActionError::NoUpdates`] for an update without fields, and RPC failures.
pub async fn run_apply(rpc: &dyn DeskRpc, ticket: &ApplyTicket) -> Result<ApplyOutcome, ActionError> {
    match &ticket.preview {
        Preview::Creation(preview) => {
            let rows = preview.accepted_rows();
            if rows.is_empty() {
                return Err(ActionError::NothingToApply);
            }
            let result = rpc.create_items(&rows, ticket.descriptor.create_disabled()).await?;
            Ok(ApplyOutcome {
                family: ActionFamily::Creation,
                done: result.created,
                skipped: result.skipped,
                failed: result.failed,
            })
        }
        Preview::Deletion(preview) => {
            let codes = preview.accepted_codes();
            if codes.is_empty() {
                return Err(ActionError::NothingToApply);
            }
            let result = rpc.delete_items(&codes).await?;
            Ok(ApplyOutcome {
                family: ActionFamily::Deletion,
                done: result.deleted,
                skipped: result.skipped,
                failed: result.failed,
            })
        }
        Preview::Update(preview) => {
            let codes = preview.accepted_codes();
            if codes.is_empty() {
                return Err(ActionError::NothingToApply);
            }
            let updates = if preview.updates.is_empty() { ticket.descriptor.updates() } else { preview.updates.clone() };
            if updates.is_empty() {
                return Err(ActionError::NoUpdates);
            }
            let result = rpc.apply_item_update(&codes, &updates).await?;
            Ok(ApplyOutcome {
                family: ActionFamily::Update,
                done: result.updated,
                skipped: result.skipped,
                failed: result.failed,
            })
        }
    }
}

/// Preview `key` and, if it qualifies, auto-apply it. For callers that own
/// the store outright.
pub async fn drive_action(rpc: &dyn DeskRpc, store: &mut ActionStore, key: &ActionKey) -> Option<ApplyOutcome> {
    if let Some(descriptor) = store.begin_preview(key) {
        let result = fetch_preview(rpc, &descriptor).await;
        store.finish_preview(key, result);
    }
    let ticket = store.claim_auto_apply(key)?;
    let result = run_apply(rpc, &ticket).await;
    store.finish_apply(key, &result);
    result.ok()
}

/// Manual apply for callers that own the store outright.
///
/// # Errors
///
/// See [`ActionStore::begin_manual_apply`]. Apply failures are recorded on
/// the action and also returned.
pub async fn apply_now(rpc: &dyn DeskRpc, store: &mut ActionStore, key: &ActionKey) -> Result<ApplyOutcome, ActionError> {
    let ticket = store.begin_manual_apply(key)?;
    let result = run_apply(rpc, &ticket).await;
    store.finish_apply(key, &result);
    result
}

#[cfg(test)]
#[path = "resolver_test.rs"]
mod tests;
