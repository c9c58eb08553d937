//! Feed rendering. A pure function of the transcript, the local overlay and
//! the action store, recomputed in full on every call.

use serde::Serialize;
use uuid::Uuid;

use crate::action::{ActionDescriptor, ActionKey, ActionKind, ActionPhase, ActionStore, parse_actions};
use crate::rpc::{Conversation, Message, Role};

/// Where a feed entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedOrigin {
    Server,
    /// Optimistic echo of a message still being sent.
    Pending,
    /// Error bubble that exists only in this session.
    LocalError,
}

/// Entry rendered after the persisted transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub origin: FeedOrigin,
}

impl LocalMessage {
    #[must_use]
    pub fn pending(content: &str) -> Self {
        Self { id: local_id(), role: Role::User, content: content.to_string(), origin: FeedOrigin::Pending }
    }

    #[must_use]
    pub fn error(content: &str) -> Self {
        Self { id: local_id(), role: Role::Assistant, content: content.to_string(), origin: FeedOrigin::LocalError }
    }
}

fn local_id() -> String {
    format!("local-{}", Uuid::new_v4())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionCard {
    pub key: String,
    pub kind: &'static str,
    pub phase: ActionPhase,
    pub auto_apply: bool,
    pub rows: usize,
    pub actionable: usize,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    /// Set when the card offers a manual apply control.
    pub apply_label: Option<String>,
    pub note: Option<String>,
    pub outcome: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedMessage {
    pub id: String,
    pub role: Role,
    pub origin: FeedOrigin,
    pub text: String,
    pub cards: Vec<ActionCard>,
    /// Only the newest entry animates in.
    pub animate: bool,
}

/// Identifier of a persisted message: its server name, or a positional
/// fallback when the server omitted one.
#[must_use]
pub fn message_id(conversation: &str, position: usize, message: &Message) -> String {
    match message.name.as_deref() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("{conversation}#{position}"),
    }
}

/// Resolvable actions in `content`, keyed by their block position.
#[must_use]
pub fn message_actions(message_id: &str, content: &str) -> (String, Vec<(ActionKey, ActionDescriptor)>) {
    let parsed = parse_actions(content);
    let actions = parsed
        .actions
        .into_iter()
        .enumerate()
        .filter_map(|(index, obj)| {
            ActionDescriptor::from_map(obj).map(|d| (ActionKey::new(message_id, index), d))
        })
        .collect();
    (parsed.cleaned_text, actions)
}

#[must_use]
pub fn render_feed(conversation: Option<&Conversation>, local: &[LocalMessage], actions: &ActionStore) -> Vec<RenderedMessage> {
    let mut feed = Vec::new();

    if let Some(conv) = conversation {
        for (position, message) in conv.messages.iter().enumerate() {
            if !matches!(message.role, Role::User | Role::Assistant) {
                continue;
            }
            let id = message_id(&conv.name, position, message);
            let (text, cards) = if message.role == Role::Assistant {
                render_assistant(&id, &message.content, actions)
            } else {
                (message.content.clone(), Vec::new())
            };
            feed.push(RenderedMessage { id, role: message.role, origin: FeedOrigin::Server, text, cards, animate: false });
        }
    }

    feed.extend(local.iter().map(|m| RenderedMessage {
        id: m.id.clone(),
        role: m.role,
        origin: m.origin,
        text: m.content.clone(),
        cards: Vec::new(),
        animate: false,
    }));

    if let Some(last) = feed.last_mut() {
        last.animate = true;
    }
    feed
}

fn render_assistant(id: &str, content: &str, store: &ActionStore) -> (String, Vec<ActionCard>) {
    let (cleaned, actions) = message_actions(id, content);
    let silent = actions.iter().any(|(_, d)| d.auto_apply());
    let cards = actions
        .into_iter()
        .map(|(key, descriptor)| render_card(&key, &descriptor, store))
        .collect();
    (if silent { String::new() } else { cleaned }, cards)
}

fn render_card(key: &ActionKey, descriptor: &ActionDescriptor, store: &ActionStore) -> ActionCard {
    let kind: ActionKind = descriptor.kind;
    let auto_apply = descriptor.auto_apply();
    let Some(state) = store.get(key) else {
        return ActionCard {
            key: key.to_string(),
            kind: kind.tag(),
            phase: ActionPhase::Unstarted,
            auto_apply,
            rows: 0,
            actionable: 0,
            warnings: Vec::new(),
            error: None,
            apply_label: None,
            note: None,
            outcome: None,
        };
    };

    let actionable = state.actionable_count();
    let offers_apply = match state.phase {
        ActionPhase::Previewed => actionable > 0 && (!auto_apply || state.auto_applied),
        ActionPhase::Error => state.preview.is_some() && actionable > 0,
        _ => false,
    };
    let nothing_to_apply = state.phase == ActionPhase::Previewed && actionable == 0;

    ActionCard {
        key: key.to_string(),
        kind: kind.tag(),
        phase: state.phase,
        auto_apply,
        rows: state.preview.as_ref().map_or(0, |p| p.row_count()),
        actionable,
        warnings: state.preview.as_ref().map(|p| p.warnings().to_vec()).unwrap_or_default(),
        error: state.error.clone(),
        apply_label: offers_apply.then(|| kind.family().apply_label(actionable)),
        note: nothing_to_apply.then(|| "Nothing to apply".to_string()),
        outcome: state.outcome.as_ref().map(|o| o.summary_text()),
    }
}

#[cfg(test)]
#[path = "render_test.rs"]
mod tests;
