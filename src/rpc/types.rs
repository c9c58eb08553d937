//! Desk RPC types: conversation, preview and apply payloads plus errors.
//!
//! Field names mirror the JSON returned by the `erpnext_ai.api` whitelisted
//! methods. Frappe serializes check fields as `0`/`1`, so boolean flags are
//! decoded leniently through [`de_flag`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by desk RPC operations.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// A configuration value could not be parsed.
    #[error("config parse failed: {0}")]
    ConfigParse(String),

    /// A required site setting or credential is not set.
    #[error("missing credentials: {var} not set")]
    MissingCredentials { var: String },

    /// The HTTP request never produced a response.
    #[error("request failed: {0}")]
    Request(String),

    /// The ERP answered with a non-success status.
    #[error("server error (status {status}): {message}")]
    Server { status: u16, message: String },

    /// The response body could not be deserialized.
    #[error("response parse failed: {0}")]
    Parse(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl RpcError {
    /// Grepable error code.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigParse(_) => "E_CONFIG_PARSE",
            Self::MissingCredentials { .. } => "E_MISSING_CREDENTIALS",
            Self::Request(_) => "E_RPC_REQUEST",
            Self::Server { .. } => "E_RPC_SERVER",
            Self::Parse(_) => "E_RPC_PARSE",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
        }
    }

    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Server { status: 429 | 500..=599, .. })
    }

    /// Human-readable text for error bubbles and action cards.
    ///
    /// Server errors already carry the message extracted from the ERP error
    /// payload; everything else falls back to the display string.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Server { message, .. } => message.clone(),
            Self::Request(_) => "Could not reach the ERP server. Please try again.".into(),
            other => other.to_string(),
        }
    }
}

// =============================================================================
// CONVERSATION
// =============================================================================

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Any role this client does not know about. Never rendered.
    #[serde(other)]
    Other,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConversationStatus {
    #[default]
    Open,
    Closed,
}

/// A persisted message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Server row identifier.
    #[serde(default)]
    pub name: Option<String>,
    pub role: Role,
    #[serde(default, deserialize_with = "de_text")]
    pub content: String,
    /// Structured context payload attached to the message, as a JSON string.
    #[serde(default)]
    pub context_json: Option<String>,
    #[serde(default)]
    pub creation: Option<String>,
}

/// A conversation as returned by every conversation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: ConversationStatus,
    #[serde(default, deserialize_with = "de_flag")]
    pub include_context: bool,
    #[serde(default)]
    pub last_interaction: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

// =============================================================================
// PREVIEW REQUESTS
// =============================================================================

/// Generator for a range of item codes: `{prefix}{start..start+count}`,
/// zero-padded to `pad` digits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesSpec {
    pub code_prefix: String,
    pub count: i64,
    pub start: i64,
    pub pad: i64,
}

/// Field updates restricted to the update allow-list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldUpdates(pub Map<String, Value>);

impl FieldUpdates {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreationRequest {
    pub raw_text: String,
    pub item_group: String,
    pub stock_uom: String,
    pub use_ai: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreationSeriesRequest {
    pub item_group: String,
    pub stock_uom: String,
    pub name_prefix: String,
    pub code_prefix: String,
    pub count: i64,
    pub start: i64,
    pub pad: i64,
}

// =============================================================================
// PREVIEW RESULTS
// =============================================================================

/// One proposed Item from a creation preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreationRow {
    #[serde(default)]
    pub idx: i64,
    #[serde(default, deserialize_with = "de_text")]
    pub item_code: String,
    #[serde(default, deserialize_with = "de_text")]
    pub item_name: String,
    #[serde(default, deserialize_with = "de_text")]
    pub item_group: String,
    #[serde(default, deserialize_with = "de_text")]
    pub stock_uom: String,
    #[serde(default, deserialize_with = "de_flag")]
    pub exists: bool,
    #[serde(default)]
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreationPreview {
    #[serde(default)]
    pub items: Vec<CreationRow>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl CreationPreview {
    /// Rows the create call should receive: not yet existing, with a code.
    #[must_use]
    pub fn accepted_rows(&self) -> Vec<CreationRow> {
        self.items
            .iter()
            .filter(|row| !row.exists && !row.item_code.trim().is_empty())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionRow {
    #[serde(default, deserialize_with = "de_text")]
    pub item_code: String,
    #[serde(default, deserialize_with = "de_text")]
    pub item_name: String,
    #[serde(default, deserialize_with = "de_flag")]
    pub exists: bool,
    #[serde(default, deserialize_with = "de_flag")]
    pub can_delete: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeletionPreview {
    #[serde(default)]
    pub items: Vec<DeletionRow>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl DeletionPreview {
    #[must_use]
    pub fn accepted_codes(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|row| row.can_delete)
            .map(|row| row.item_code.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRow {
    #[serde(default, deserialize_with = "de_text")]
    pub item_code: String,
    #[serde(default, deserialize_with = "de_text")]
    pub item_name: String,
    #[serde(default, deserialize_with = "de_flag")]
    pub exists: bool,
    #[serde(default, deserialize_with = "de_flag")]
    pub can_update: bool,
    /// Per-field `{ "from": .., "to": .. }` pairs, as reported by the server.
    #[serde(default)]
    pub changes: Map<String, Value>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdatePreview {
    #[serde(default)]
    pub items: Vec<UpdateRow>,
    /// Updates the server accepted; may be narrower than the request.
    #[serde(default)]
    pub updates: FieldUpdates,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl UpdatePreview {
    #[must_use]
    pub fn accepted_codes(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|row| row.can_update)
            .map(|row| row.item_code.clone())
            .collect()
    }
}

// =============================================================================
// APPLY RESULTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRow {
    #[serde(default, deserialize_with = "de_text")]
    pub item_code: String,
    #[serde(default, deserialize_with = "de_text")]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRow {
    #[serde(default, deserialize_with = "de_text")]
    pub item_code: String,
    #[serde(default, deserialize_with = "de_text")]
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateResult {
    #[serde(default)]
    pub created: Vec<String>,
    #[serde(default)]
    pub skipped: Vec<SkippedRow>,
    #[serde(default)]
    pub failed: Vec<FailedRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteResult {
    #[serde(default)]
    pub deleted: Vec<String>,
    #[serde(default)]
    pub skipped: Vec<SkippedRow>,
    #[serde(default)]
    pub failed: Vec<FailedRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateResult {
    #[serde(default)]
    pub updated: Vec<String>,
    #[serde(default)]
    pub skipped: Vec<SkippedRow>,
    #[serde(default)]
    pub failed: Vec<FailedRow>,
}

// =============================================================================
// ADMIN DASHBOARD
// =============================================================================

/// Result of `generate_admin_summary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminReport {
    #[serde(default, deserialize_with = "de_text")]
    pub report_name: String,
    #[serde(default, deserialize_with = "de_text")]
    pub output: String,
    #[serde(default)]
    pub context: Value,
}

// =============================================================================
// LENIENT DECODERS
// =============================================================================

/// Interpret a Frappe-style flag: `true`, non-zero numbers, `"1"`/`"true"`/`"yes"`.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        _ => false,
    }
}

fn de_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(is_truthy(&value))
}

/// Strings that may arrive as `null` or as numbers (numeric item codes).
fn de_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
