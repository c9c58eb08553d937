//! Backend access for the desk.
//!
//! [`DeskRpc`] is the seam between the engine and the ERP. Production code
//! uses [`FrappeClient`]; tests swap in `test_helpers::MockRpc`.

pub mod frappe;
pub mod types;

use async_trait::async_trait;
use serde_json::Value;

pub use frappe::FrappeClient;
pub use types::*;

/// Whitelisted desk methods, one async call per endpoint.
#[async_trait]
pub trait DeskRpc: Send + Sync {
    async fn create_conversation(&self, include_context: bool, title: Option<&str>) -> Result<Conversation, RpcError>;

    async fn get_conversation(&self, conversation: &str) -> Result<Conversation, RpcError>;

    /// Persist a user message and let the server generate the assistant reply.
    async fn send_message(&self, conversation: &str, text: &str, days: u32) -> Result<Conversation, RpcError>;

    /// Persist a message verbatim, without generating a reply.
    async fn append_message(
        &self,
        conversation: &str,
        role: Role,
        content: &str,
        context_json: Option<&str>,
    ) -> Result<Conversation, RpcError>;

    async fn set_include_context(&self, conversation: &str, include: bool) -> Result<(), RpcError>;

    async fn preview_item_creation(&self, request: &CreationRequest) -> Result<CreationPreview, RpcError>;

    async fn preview_item_creation_series(&self, request: &CreationSeriesRequest) -> Result<CreationPreview, RpcError>;

    async fn preview_item_deletion(&self, item_codes: &[String]) -> Result<DeletionPreview, RpcError>;

    async fn preview_item_deletion_series(&self, series: &SeriesSpec) -> Result<DeletionPreview, RpcError>;

    async fn preview_item_update(&self, item_codes: &[String], updates: &FieldUpdates) -> Result<UpdatePreview, RpcError>;

    async fn preview_item_update_series(&self, series: &SeriesSpec, updates: &FieldUpdates) -> Result<UpdatePreview, RpcError>;

    async fn create_items(&self, rows: &[CreationRow], create_disabled: bool) -> Result<CreateResult, RpcError>;

    async fn delete_items(&self, item_codes: &[String]) -> Result<DeleteResult, RpcError>;

    async fn apply_item_update(&self, item_codes: &[String], updates: &FieldUpdates) -> Result<UpdateResult, RpcError>;

    async fn get_admin_context(&self, days: u32) -> Result<Value, RpcError>;

    async fn generate_admin_summary(&self, title: Option<&str>, prompt: Option<&str>, days: u32) -> Result<AdminReport, RpcError>;

    /// User id the credentials authenticate as.
    async fn logged_user(&self) -> Result<String, RpcError>;
}
