//! Desk configuration parsed from environment variables.

use crate::rpc::RpcError;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_LOOKBACK_DAYS: u32 = 30;
pub const DEFAULT_CONVERSATION_TITLE: &str = "ERPNext AI Assistant";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for RpcTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeskConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub timeouts: RpcTimeouts,
    /// Lookback window (days) passed with every send-message call.
    pub lookback_days: u32,
    /// Include-context flag used when creating a new conversation.
    pub include_context: bool,
    pub conversation_title: String,
}

impl DeskConfig {
    /// Config with defaults for everything except the site and credentials.
    #[must_use]
    pub fn new(base_url: &str, api_key: &str, api_secret: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            timeouts: RpcTimeouts::default(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            include_context: true,
            conversation_title: DEFAULT_CONVERSATION_TITLE.to_string(),
        }
    }

    /// Build typed desk config from environment variables.
    ///
    /// Required:
    /// - `FRAPPE_BASE_URL`
    /// - `FRAPPE_API_KEY`, `FRAPPE_API_SECRET`
    ///
    /// Optional:
    /// - `ERP_REQUEST_TIMEOUT_SECS`: default 120
    /// - `ERP_CONNECT_TIMEOUT_SECS`: default 10
    /// - `DESK_LOOKBACK_DAYS`: default 30
    /// - `DESK_INCLUDE_CONTEXT`: default `true`
    /// - `DESK_CONVERSATION_TITLE`: default `ERPNext AI Assistant`
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or the base URL is
    /// not an http(s) URL.
    pub fn from_env() -> Result<Self, RpcError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`DeskConfig::from_env`], reading values through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`DeskConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RpcError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| RpcError::MissingCredentials { var: key.into() })
        };

        let base_url = required("FRAPPE_BASE_URL")?;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(RpcError::ConfigParse(format!("FRAPPE_BASE_URL must be an http(s) URL, got '{base_url}'")));
        }
        let api_key = required("FRAPPE_API_KEY")?;
        let api_secret = required("FRAPPE_API_SECRET")?;

        let mut config = Self::new(&base_url, &api_key, &api_secret);
        config.timeouts = RpcTimeouts {
            request_secs: parse_or(lookup("ERP_REQUEST_TIMEOUT_SECS"), DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: parse_or(lookup("ERP_CONNECT_TIMEOUT_SECS"), DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        config.lookback_days = parse_or(lookup("DESK_LOOKBACK_DAYS"), DEFAULT_LOOKBACK_DAYS);
        config.include_context = parse_flag(lookup("DESK_INCLUDE_CONTEXT").as_deref(), true);
        if let Some(title) = lookup("DESK_CONVERSATION_TITLE").filter(|t| !t.trim().is_empty()) {
            config.conversation_title = title.trim().to_string();
        }
        Ok(config)
    }
}

fn parse_or<T>(raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    raw.and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_flag(raw: Option<&str>, default: bool) -> bool {
    match raw.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
