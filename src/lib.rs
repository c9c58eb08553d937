//! ERPNext AI desk engine.
//!
//! ARCHITECTURE
//! ============
//! Assistant replies from the ERP can embed fenced `erpnext_ai_action` JSON
//! blocks. The engine parses those blocks (`action::parse`), resolves each one
//! against a preview/apply RPC pair (`action::resolver`), and reconciles the
//! outcomes back into the persisted conversation (`conversation`).
//!
//! All backend access goes through the [`rpc::DeskRpc`] trait; the production
//! implementation is [`rpc::FrappeClient`], which calls Frappe whitelisted
//! methods over HTTP.

pub mod action;
pub mod config;
pub mod conversation;
pub mod rpc;

pub use action::{ActionDescriptor, ActionKey, ActionKind, ActionPhase, parse_actions};
pub use config::DeskConfig;
pub use conversation::{ConversationView, SendOutcome};
pub use rpc::{DeskRpc, FrappeClient, RpcError};
