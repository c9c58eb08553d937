//! Conversation view: the single source of truth for one desk session.
//!
//! The persisted [`Conversation`] is authoritative. Everything else held here
//! is an overlay on top of it: optimistic echoes, local error bubbles, action
//! state and the draft. Every server response replaces the transcript
//! wholesale; responses for a conversation that is no longer current are
//! dropped.
//!
//! LOCKING
//! =======
//! View state sits behind a `std::sync::Mutex` that is only ever held for
//! synchronous bookkeeping. Every network call happens with the lock released.

pub mod render;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::action::resolver::{fetch_preview, run_apply};
use crate::action::{ActionError, ActionKey, ActionState, ActionStore, ApplyOutcome, ApplyTicket};
use crate::config::DeskConfig;
use crate::rpc::{Conversation, DeskRpc, Role, RpcError};

pub use render::{ActionCard, FeedOrigin, LocalMessage, RenderedMessage, message_actions, message_id, render_feed};

/// In-flight key used while a conversation is being created for a send.
const CREATING: &str = "";

// =============================================================================
// SETTINGS / OUTCOMES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSettings {
    pub lookback_days: u32,
    pub include_context: bool,
    pub title: String,
}

impl From<&DeskConfig> for ViewSettings {
    fn from(config: &DeskConfig) -> Self {
        Self {
            lookback_days: config.lookback_days,
            include_context: config.include_context,
            title: config.conversation_title.clone(),
        }
    }
}

/// Result of [`ConversationView::send_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input; nothing was sent.
    Empty,
    /// A send for this conversation is already in flight.
    Busy,
    Sent,
    /// The send failed; the text is back in the draft.
    Failed(String),
    /// The conversation changed while the send was in flight.
    Stale,
    /// Another conversation became current before the message left; the
    /// text is back in the draft.
    Unsent,
}

/// Failure of one step of [`ConversationView::request_summary`].
#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("Could not start a conversation: {}", .0.user_message())]
    Start(RpcError),

    #[error("Could not generate the summary: {}", .0.user_message())]
    Generate(RpcError),

    #[error("Could not save the summary: {}", .0.user_message())]
    Append(RpcError),

    #[error("Could not refresh the conversation: {}", .0.user_message())]
    Refresh(RpcError),

    #[error("Conversation changed while the summary was running")]
    Stale,
}

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Default)]
struct ViewState {
    conversation: Option<Conversation>,
    local: Vec<LocalMessage>,
    actions: ActionStore,
    /// Conversations with a send in flight.
    in_flight: HashSet<String>,
    include_context: bool,
    draft: String,
    notice: Option<String>,
}

impl ViewState {
    fn current_id(&self) -> Option<&str> {
        self.conversation.as_ref().map(|c| c.name.as_str())
    }

    fn is_current(&self, conversation: &str) -> bool {
        self.current_id() == Some(conversation)
    }

    /// Switch to a different conversation, dropping every overlay.
    fn switch_to(&mut self, conv: Conversation, settled: bool) {
        self.local.clear();
        self.actions.clear();
        self.include_context = conv.include_context;
        self.conversation = None;
        self.adopt(conv, settled);
    }

    /// Refresh the current conversation from the server. Pending echoes of
    /// other in-flight sends survive; error bubbles do not.
    fn replace(&mut self, conv: Conversation) {
        self.local.retain(|m| m.origin == FeedOrigin::Pending);
        self.include_context = conv.include_context;
        self.adopt(conv, false);
    }

    /// Make `conv` the transcript and register any new actions in it.
    fn adopt(&mut self, conv: Conversation, settled: bool) {
        for (position, message) in conv.messages.iter().enumerate() {
            if message.role != Role::Assistant {
                continue;
            }
            let id = message_id(&conv.name, position, message);
            let (_, actions) = message_actions(&id, &message.content);
            for (key, descriptor) in actions {
                if settled {
                    self.actions.register_settled(key, descriptor);
                } else {
                    self.actions.register(key, descriptor);
                }
            }
        }
        self.conversation = Some(conv);
    }

    fn push_error(&mut self, text: &str) {
        self.local.push(LocalMessage::error(text));
    }
}

// =============================================================================
// VIEW
// =============================================================================

/// Cloneable handle over shared view state.
#[derive(Clone)]
pub struct ConversationView {
    rpc: Arc<dyn DeskRpc>,
    settings: ViewSettings,
    state: Arc<Mutex<ViewState>>,
}

impl ConversationView {
    #[must_use]
    pub fn new(rpc: Arc<dyn DeskRpc>, settings: ViewSettings) -> Self {
        let state = ViewState { include_context: settings.include_context, ..ViewState::default() };
        Self { rpc, settings, state: Arc::new(Mutex::new(state)) }
    }

    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn conversation_id(&self) -> Option<String> {
        self.lock().current_id().map(str::to_string)
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<Conversation> {
        self.lock().conversation.clone()
    }

    #[must_use]
    pub fn draft(&self) -> String {
        self.lock().draft.clone()
    }

    pub fn set_draft(&self, text: &str) {
        self.lock().draft = text.to_string();
    }

    #[must_use]
    pub fn include_context(&self) -> bool {
        self.lock().include_context
    }

    /// Whether a send is in flight for the current conversation.
    #[must_use]
    pub fn is_sending(&self) -> bool {
        let state = self.lock();
        let key = state.current_id().unwrap_or(CREATING);
        state.in_flight.contains(key)
    }

    /// Take the pending notice, if any.
    pub fn take_notice(&self) -> Option<String> {
        self.lock().notice.take()
    }

    #[must_use]
    pub fn action_state(&self, key: &ActionKey) -> Option<ActionState> {
        self.lock().actions.get(key).cloned()
    }

    #[must_use]
    pub fn render(&self) -> Vec<RenderedMessage> {
        let state = self.lock();
        render_feed(state.conversation.as_ref(), &state.local, &state.actions)
    }

    // -------------------------------------------------------------------------
    // Conversation lifecycle
    // -------------------------------------------------------------------------

    /// Start a fresh conversation. Without `force`, a conversation that
    /// already has messages is kept and `Ok(false)` is returned.
    ///
    /// # Errors
    ///
    /// Returns the RPC error if the conversation cannot be created.
    pub async fn start_new_conversation(&self, force: bool) -> Result<bool, RpcError> {
        let include_context = {
            let state = self.lock();
            let has_messages = state.conversation.as_ref().is_some_and(|c| !c.messages.is_empty());
            if has_messages && !force {
                return Ok(false);
            }
            state.include_context
        };

        let conv = self
            .rpc
            .create_conversation(include_context, Some(&self.settings.title))
            .await?;
        info!(conversation = %conv.name, include_context, "chat: conversation started");
        self.lock().switch_to(conv, false);
        Ok(true)
    }

    /// Reopen an existing conversation. Actions already in its transcript
    /// are previewed but never auto-applied.
    ///
    /// # Errors
    ///
    /// Returns the RPC error if the conversation cannot be fetched.
    pub async fn load_conversation(&self, conversation: &str) -> Result<(), RpcError> {
        let conv = self.rpc.get_conversation(conversation).await?;
        info!(conversation = %conv.name, messages = conv.messages.len(), "chat: conversation loaded");
        self.lock().switch_to(conv, true);
        self.drive_pending().await;
        Ok(())
    }

    /// Send `text` as the user's next message.
    pub async fn send_message(&self, text: &str) -> SendOutcome {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return SendOutcome::Empty;
        }

        let (existing, echo_id) = {
            let mut state = self.lock();
            let existing = state.current_id().map(str::to_string);
            let guard = existing.clone().unwrap_or_else(|| CREATING.to_string());
            if !state.in_flight.insert(guard) {
                return SendOutcome::Busy;
            }
            let echo = LocalMessage::pending(trimmed);
            let echo_id = echo.id.clone();
            state.local.push(echo);
            state.draft.clear();
            (existing, echo_id)
        };

        let conversation = match existing {
            Some(id) => id,
            None => match self.create_for_send().await {
                Ok(Some(id)) => id,
                Ok(None) => {
                    let mut state = self.lock();
                    state.local.retain(|m| m.id != echo_id);
                    state.draft = text.to_string();
                    state.notice = Some("Message not sent: another conversation was opened.".to_string());
                    return SendOutcome::Unsent;
                }
                Err(err) => {
                    let message = err.user_message();
                    warn!(error = %err, code = err.error_code(), "chat: conversation create failed");
                    let mut state = self.lock();
                    state.in_flight.remove(CREATING);
                    state.local.retain(|m| m.id != echo_id);
                    state.push_error(&message);
                    state.draft = text.to_string();
                    return SendOutcome::Failed(message);
                }
            },
        };

        info!(%conversation, chars = trimmed.len(), "chat: send");
        let result = self
            .rpc
            .send_message(&conversation, trimmed, self.settings.lookback_days)
            .await;

        match result {
            Ok(conv) => {
                {
                    let mut state = self.lock();
                    state.in_flight.remove(&conversation);
                    state.local.retain(|m| m.id != echo_id);
                    if !state.is_current(&conversation) {
                        info!(%conversation, "chat: stale send response discarded");
                        return SendOutcome::Stale;
                    }
                    state.replace(conv);
                }
                self.drive_pending().await;
                SendOutcome::Sent
            }
            Err(err) => self.send_failed(&conversation, &echo_id, text, &err).await,
        }
    }

    /// Create the conversation a first send goes to. `None` if another
    /// conversation became current meanwhile.
    async fn create_for_send(&self) -> Result<Option<String>, RpcError> {
        let include_context = self.lock().include_context;
        let conv = self
            .rpc
            .create_conversation(include_context, Some(&self.settings.title))
            .await?;
        info!(conversation = %conv.name, "chat: conversation started for send");

        let mut state = self.lock();
        state.in_flight.remove(CREATING);
        if state.conversation.is_some() {
            info!(conversation = %conv.name, "chat: created conversation left unused");
            return Ok(None);
        }
        let id = conv.name.clone();
        state.in_flight.insert(id.clone());
        state.include_context = conv.include_context;
        state.adopt(conv, false);
        Ok(Some(id))
    }

    async fn send_failed(&self, conversation: &str, echo_id: &str, text: &str, err: &RpcError) -> SendOutcome {
        let message = err.user_message();
        warn!(%conversation, error = %err, code = err.error_code(), retryable = err.retryable(), "chat: send failed");
        self.lock().local.retain(|m| m.id != echo_id);

        let refreshed = self.rpc.get_conversation(conversation).await;

        let mut state = self.lock();
        state.in_flight.remove(conversation);
        if !state.is_current(conversation) {
            info!(%conversation, "chat: stale send failure discarded");
            return SendOutcome::Stale;
        }
        match refreshed {
            Ok(conv) => state.replace(conv),
            Err(e) => warn!(%conversation, error = %e, "chat: refresh after failed send failed"),
        }
        state.push_error(&message);
        state.draft = text.to_string();
        SendOutcome::Failed(message)
    }

    /// Update the include-context flag locally and persist it in the
    /// background. The returned handle resolves once the save finishes.
    pub fn set_include_context(&self, include: bool) -> Option<JoinHandle<()>> {
        let conversation = {
            let mut state = self.lock();
            state.include_context = include;
            let conv = state.conversation.as_mut()?;
            conv.include_context = include;
            conv.name.clone()
        };

        let rpc = Arc::clone(&self.rpc);
        let state = Arc::clone(&self.state);
        Some(tokio::spawn(async move {
            match rpc.set_include_context(&conversation, include).await {
                Ok(()) => info!(%conversation, include, "chat: include_context saved"),
                Err(e) => {
                    warn!(%conversation, include, error = %e, code = e.error_code(), "chat: include_context save failed");
                    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                    state.notice = Some(format!("Could not save the context setting: {}", e.user_message()));
                }
            }
        }))
    }

    // -------------------------------------------------------------------------
    // Actions
    // -------------------------------------------------------------------------

    /// Preview every registered action that has not started, auto-applying
    /// the ones that qualify.
    pub async fn drive_pending(&self) {
        let Some(conversation) = self.conversation_id() else {
            return;
        };
        let pending = self.lock().actions.pending_keys();
        for key in pending {
            let descriptor = self.lock().actions.begin_preview(&key);
            let Some(descriptor) = descriptor else {
                continue;
            };
            let result = fetch_preview(self.rpc.as_ref(), &descriptor).await;
            let ticket = {
                let mut state = self.lock();
                state.actions.finish_preview(&key, result);
                state.actions.claim_auto_apply(&key)
            };
            if let Some(ticket) = ticket {
                info!(action = %key, kind = ticket.descriptor.kind.tag(), "action: auto-apply");
                let _ = self.execute_apply(&conversation, &key, &ticket).await;
            }
        }
    }

    /// User-triggered apply for the action card at `key`.
    ///
    /// # Errors
    ///
    /// Returns why the apply could not start or why it failed. Either way the
    /// action card carries the same message.
    pub async fn apply_action(&self, key: &ActionKey) -> Result<ApplyOutcome, ActionError> {
        let (conversation, ticket) = {
            let mut state = self.lock();
            let conversation = state.current_id().map(str::to_string).ok_or(ActionError::NotPreviewed)?;
            (conversation, state.actions.begin_manual_apply(key)?)
        };
        info!(action = %key, kind = ticket.descriptor.kind.tag(), "action: manual apply");
        self.execute_apply(&conversation, key, &ticket).await
    }

    async fn execute_apply(&self, conversation: &str, key: &ActionKey, ticket: &ApplyTicket) -> Result<ApplyOutcome, ActionError> {
        let result = run_apply(self.rpc.as_ref(), ticket).await;
        self.lock().actions.finish_apply(key, &result);
        if let Ok(outcome) = &result {
            self.record_outcome(conversation, outcome).await;
        }
        result
    }

    /// Persist an apply outcome as an assistant message, then refresh.
    async fn record_outcome(&self, conversation: &str, outcome: &ApplyOutcome) {
        let appended = self
            .rpc
            .append_message(conversation, Role::Assistant, &outcome.summary_text(), Some(&outcome.to_context_json()))
            .await;
        if let Err(e) = appended {
            warn!(%conversation, error = %e, "action: outcome append failed");
            self.error_if_current(conversation, &format!("Could not save the action result: {}", e.user_message()));
            return;
        }

        match self.rpc.get_conversation(conversation).await {
            Ok(conv) => {
                let mut state = self.lock();
                if state.is_current(conversation) {
                    state.replace(conv);
                } else {
                    info!(%conversation, "action: stale refresh discarded");
                }
            }
            Err(e) => {
                warn!(%conversation, error = %e, "action: refresh failed");
                self.error_if_current(conversation, &format!("Could not refresh the conversation: {}", e.user_message()));
            }
        }
    }

    fn error_if_current(&self, conversation: &str, text: &str) {
        let mut state = self.lock();
        if state.is_current(conversation) {
            state.push_error(text);
        }
    }

    // -------------------------------------------------------------------------
    // Admin summary
    // -------------------------------------------------------------------------

    /// Generate an admin summary for the last `days` days and append it to
    /// the current conversation, starting one if needed.
    ///
    /// # Errors
    ///
    /// Each step fails with its own [`SummaryError`] variant; the failure is
    /// also shown as an error bubble.
    pub async fn request_summary(&self, days: u32) -> Result<(), SummaryError> {
        let conversation = match self.conversation_id() {
            Some(id) => id,
            None => {
                self.start_new_conversation(true)
                    .await
                    .map_err(SummaryError::Start)?;
                self.conversation_id().ok_or(SummaryError::Stale)?
            }
        };
        info!(%conversation, days, "summary: requested");

        let report = self
            .rpc
            .generate_admin_summary(None, None, days)
            .await
            .map_err(|e| self.summary_failed(&conversation, SummaryError::Generate(e)))?;

        let context = report.context.to_string();
        self.rpc
            .append_message(&conversation, Role::Assistant, &report.output, Some(&context))
            .await
            .map_err(|e| self.summary_failed(&conversation, SummaryError::Append(e)))?;

        let conv = self
            .rpc
            .get_conversation(&conversation)
            .await
            .map_err(|e| self.summary_failed(&conversation, SummaryError::Refresh(e)))?;

        let mut state = self.lock();
        if !state.is_current(&conversation) {
            info!(%conversation, "summary: stale result discarded");
            return Err(SummaryError::Stale);
        }
        state.replace(conv);
        info!(%conversation, report = %report.report_name, "summary: appended");
        Ok(())
    }

    fn summary_failed(&self, conversation: &str, err: SummaryError) -> SummaryError {
        warn!(%conversation, error = %err, "summary: failed");
        self.error_if_current(conversation, &err.to_string());
        err
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
