//! Frappe whitelisted-method client.
//!
//! Every call is `POST {base}/api/method/{dotted.path}` with a JSON body and
//! token auth. Successful responses wrap their payload as `{"message": ..}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::DeskRpc;
use super::types::{
    AdminReport, Conversation, CreateResult, CreationPreview, CreationRequest, CreationRow, CreationSeriesRequest,
    DeleteResult, DeletionPreview, FieldUpdates, Role, RpcError, SeriesSpec, UpdatePreview, UpdateResult,
};
use crate::config::DeskConfig;

const API_PREFIX: &str = "erpnext_ai.api";
const CONVERSATION_DOCTYPE: &str = "AI Conversation";

pub struct FrappeClient {
    http: reqwest::Client,
    base_url: String,
    auth_header: String,
}

impl FrappeClient {
    /// Build a client for the site in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::HttpClientBuild`] if the HTTP client cannot be built.
    pub fn new(config: &DeskConfig) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| RpcError::HttpClientBuild(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_header: format!("token {}:{}", config.api_key, config.api_secret),
        })
    }

    /// Call a whitelisted method and decode its `message` payload.
    ///
    /// # Errors
    ///
    /// Transport failures, non-success statuses and undecodable bodies.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, args: &Value) -> Result<T, RpcError> {
        let url = method_url(&self.base_url, method);
        debug!(%method, "rpc: call");
        let response = self
            .http
            .post(url)
            .header(reqwest::header::AUTHORIZATION, &self.auth_header)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(args)
            .send()
            .await
            .map_err(|e| RpcError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| RpcError::Request(e.to_string()))?;
        if !(200..300).contains(&status) {
            let message = server_error_message(status, &text);
            warn!(%method, status, %message, "rpc: server error");
            return Err(RpcError::Server { status, message });
        }
        parse_message(&text)
    }

    async fn api<T: DeserializeOwned>(&self, name: &str, args: Value) -> Result<T, RpcError> {
        self.call(&format!("{API_PREFIX}.{name}"), &args).await
    }
}

#[async_trait]
impl DeskRpc for FrappeClient {
    async fn create_conversation(&self, include_context: bool, title: Option<&str>) -> Result<Conversation, RpcError> {
        let mut args = json!({ "include_context": i32::from(include_context) });
        if let Some(title) = title {
            args["title"] = json!(title);
        }
        self.api("create_ai_conversation", args).await
    }

    async fn get_conversation(&self, conversation: &str) -> Result<Conversation, RpcError> {
        self.api("get_ai_conversation", json!({ "conversation_name": conversation }))
            .await
    }

    async fn send_message(&self, conversation: &str, text: &str, days: u32) -> Result<Conversation, RpcError> {
        self.api(
            "send_ai_message",
            json!({ "conversation_name": conversation, "message": text, "days": days }),
        )
        .await
    }

    async fn append_message(
        &self,
        conversation: &str,
        role: Role,
        content: &str,
        context_json: Option<&str>,
    ) -> Result<Conversation, RpcError> {
        let mut args = json!({ "conversation_name": conversation, "role": role.as_str(), "content": content });
        if let Some(context) = context_json {
            args["context_json"] = json!(context);
        }
        self.api("append_ai_message", args).await
    }

    async fn set_include_context(&self, conversation: &str, include: bool) -> Result<(), RpcError> {
        let args = json!({
            "doctype": CONVERSATION_DOCTYPE,
            "name": conversation,
            "fieldname": "include_context",
            "value": i32::from(include),
        });
        let _: Value = self.call("frappe.client.set_value", &args).await?;
        Ok(())
    }

    async fn preview_item_creation(&self, request: &CreationRequest) -> Result<CreationPreview, RpcError> {
        let mut args = to_args(request)?;
        args["use_ai"] = json!(i32::from(request.use_ai));
        self.api("preview_item_creation", args).await
    }

    async fn preview_item_creation_series(&self, request: &CreationSeriesRequest) -> Result<CreationPreview, RpcError> {
        self.api("preview_item_creation_series", to_args(request)?).await
    }

    async fn preview_item_deletion(&self, item_codes: &[String]) -> Result<DeletionPreview, RpcError> {
        self.api("preview_item_deletion", json!({ "item_codes": item_codes }))
            .await
    }

    async fn preview_item_deletion_series(&self, series: &SeriesSpec) -> Result<DeletionPreview, RpcError> {
        self.api("preview_item_deletion_series", to_args(series)?).await
    }

    async fn preview_item_update(&self, item_codes: &[String], updates: &FieldUpdates) -> Result<UpdatePreview, RpcError> {
        self.api("preview_item_update", json!({ "item_codes": item_codes, "updates": updates }))
            .await
    }

    async fn preview_item_update_series(&self, series: &SeriesSpec, updates: &FieldUpdates) -> Result<UpdatePreview, RpcError> {
        let mut args = to_args(series)?;
        args["updates"] = json!(updates);
        self.api("preview_item_update_series", args).await
    }

    async fn create_items(&self, rows: &[CreationRow], create_disabled: bool) -> Result<CreateResult, RpcError> {
        self.api(
            "create_items_from_preview",
            json!({ "items": rows, "create_disabled": i32::from(create_disabled) }),
        )
        .await
    }

    async fn delete_items(&self, item_codes: &[String]) -> Result<DeleteResult, RpcError> {
        self.api("delete_items", json!({ "item_codes": item_codes })).await
    }

    async fn apply_item_update(&self, item_codes: &[String], updates: &FieldUpdates) -> Result<UpdateResult, RpcError> {
        self.api("apply_item_update", json!({ "item_codes": item_codes, "updates": updates }))
            .await
    }

    async fn get_admin_context(&self, days: u32) -> Result<Value, RpcError> {
        self.api("get_admin_context", json!({ "days": days })).await
    }

    async fn generate_admin_summary(&self, title: Option<&str>, prompt: Option<&str>, days: u32) -> Result<AdminReport, RpcError> {
        let mut args = json!({ "days": days });
        if let Some(title) = title {
            args["title"] = json!(title);
        }
        if let Some(prompt) = prompt {
            args["custom_prompt"] = json!(prompt);
        }
        self.api("generate_admin_summary", args).await
    }

    async fn logged_user(&self) -> Result<String, RpcError> {
        self.call("frappe.auth.get_logged_user", &json!({})).await
    }
}

// =============================================================================
// WIRE HELPERS
// =============================================================================

pub(crate) fn method_url(base_url: &str, method: &str) -> String {
    format!("{}/api/method/{}", base_url.trim_end_matches('/'), method)
}

fn to_args(value: &impl serde::Serialize) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::Parse(e.to_string()))
}

/// Decode the `message` envelope of a successful response.
pub(crate) fn parse_message<T: DeserializeOwned>(body: &str) -> Result<T, RpcError> {
    let mut envelope: Value = serde_json::from_str(body).map_err(|e| RpcError::Parse(e.to_string()))?;
    let message = envelope
        .get_mut("message")
        .map(Value::take)
        .unwrap_or(Value::Null);
    serde_json::from_value(message).map_err(|e| RpcError::Parse(e.to_string()))
}

/// Reduce a Frappe error body to one human-readable line.
///
/// Order: first `_server_messages` entry, then the tail of `exception`, then
/// a string `message`, then a generic fallback.
pub(crate) fn server_error_message(status: u16, body: &str) -> String {
    let fallback = || format!("Request failed (HTTP {status})");
    let Ok(payload) = serde_json::from_str::<Value>(body) else {
        return fallback();
    };

    if let Some(text) = payload
        .get("_server_messages")
        .and_then(Value::as_str)
        .and_then(first_server_message)
    {
        return text;
    }

    if let Some(exception) = payload.get("exception").and_then(Value::as_str) {
        let tail = exception
            .rsplit_once(": ")
            .map_or(exception, |(_, tail)| tail)
            .trim();
        if !tail.is_empty() {
            return tail.to_string();
        }
    }

    if let Some(message) = payload.get("message").and_then(Value::as_str) {
        if !message.trim().is_empty() {
            return message.trim().to_string();
        }
    }

    fallback()
}

/// `_server_messages` is a JSON string holding a list of JSON strings.
fn first_server_message(raw: &str) -> Option<String> {
    let entries: Vec<String> = serde_json::from_str(raw).ok()?;
    let first = entries.first()?;
    let text = match serde_json::from_str::<Value>(first) {
        Ok(Value::Object(obj)) => obj.get("message")?.as_str()?.to_string(),
        Ok(Value::String(s)) => s,
        _ => first.clone(),
    };
    let text = strip_html(&text);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn strip_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
#[path = "frappe_test.rs"]
mod tests;
