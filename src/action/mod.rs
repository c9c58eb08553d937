//! Action blocks: parsing, validation and the preview/apply lifecycle.
//!
//! `parse` pulls fenced JSON out of assistant text, `descriptor` turns each
//! object into a typed preview request, and `resolver` tracks every action
//! through preview and apply by a stable [`ActionKey`].

pub mod descriptor;
pub mod parse;
pub mod resolver;

pub use descriptor::{ActionDescriptor, ActionFamily, ActionKind, PreviewPlan};
pub use parse::{ACTION_FENCE_TAG, ParsedReply, parse_actions};
pub use resolver::{ActionKey, ActionPhase, ActionState, ActionStore, ApplyOutcome, ApplyTicket, Preview};

use crate::rpc::RpcError;

/// Errors local to a single action. Shown on that action's card.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Provide item_codes or a code_prefix")]
    MissingItems,

    #[error("No supported fields to update (allowed: item_name, item_group, stock_uom, disabled, description)")]
    NoUpdates,

    #[error("Preview has not completed")]
    NotPreviewed,

    #[error("Nothing to apply")]
    NothingToApply,

    #[error("Action is already running")]
    InProgress,

    #[error("Action was already applied")]
    AlreadyApplied,

    #[error("{}", .0.user_message())]
    Rpc(#[from] RpcError),
}

impl ActionError {
    /// Grepable error code.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "E_ACTION_MISSING_FIELD",
            Self::MissingItems => "E_ACTION_MISSING_ITEMS",
            Self::NoUpdates => "E_ACTION_NO_UPDATES",
            Self::NotPreviewed => "E_ACTION_NOT_PREVIEWED",
            Self::NothingToApply => "E_ACTION_NOTHING_TO_APPLY",
            Self::InProgress => "E_ACTION_IN_PROGRESS",
            Self::AlreadyApplied => "E_ACTION_ALREADY_APPLIED",
            Self::Rpc(err) => err.error_code(),
        }
    }
}
