use std::collections::HashMap;

use super::*;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

fn site_env() -> Vec<(&'static str, &'static str)> {
    vec![
        ("FRAPPE_BASE_URL", "https://erp.example.test/"),
        ("FRAPPE_API_KEY", "key"),
        ("FRAPPE_API_SECRET", "secret"),
    ]
}

#[test]
fn from_lookup_applies_defaults() {
    let cfg = DeskConfig::from_lookup(lookup_from(&site_env())).unwrap();
    assert_eq!(cfg.base_url, "https://erp.example.test");
    assert_eq!(cfg.api_key, "key");
    assert_eq!(cfg.api_secret, "secret");
    assert_eq!(cfg.timeouts, RpcTimeouts::default());
    assert_eq!(cfg.lookback_days, DEFAULT_LOOKBACK_DAYS);
    assert!(cfg.include_context);
    assert_eq!(cfg.conversation_title, DEFAULT_CONVERSATION_TITLE);
}

#[test]
fn from_lookup_parses_overrides() {
    let mut env = site_env();
    env.extend([
        ("ERP_REQUEST_TIMEOUT_SECS", "42"),
        ("ERP_CONNECT_TIMEOUT_SECS", "7"),
        ("DESK_LOOKBACK_DAYS", "90"),
        ("DESK_INCLUDE_CONTEXT", "off"),
        ("DESK_CONVERSATION_TITLE", "Stock review"),
    ]);

    let cfg = DeskConfig::from_lookup(lookup_from(&env)).unwrap();
    assert_eq!(cfg.timeouts, RpcTimeouts { request_secs: 42, connect_secs: 7 });
    assert_eq!(cfg.lookback_days, 90);
    assert!(!cfg.include_context);
    assert_eq!(cfg.conversation_title, "Stock review");
}

#[test]
fn from_lookup_invalid_numbers_fall_back() {
    let mut env = site_env();
    env.extend([("ERP_REQUEST_TIMEOUT_SECS", "soon"), ("DESK_LOOKBACK_DAYS", "-3")]);

    let cfg = DeskConfig::from_lookup(lookup_from(&env)).unwrap();
    assert_eq!(cfg.timeouts.request_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    assert_eq!(cfg.lookback_days, DEFAULT_LOOKBACK_DAYS);
}

#[test]
fn from_lookup_missing_secret_errors() {
    let env = [("FRAPPE_BASE_URL", "https://erp.example.test"), ("FRAPPE_API_KEY", "key")];
    let err = DeskConfig::from_lookup(lookup_from(&env)).unwrap_err();
    assert!(matches!(err, RpcError::MissingCredentials { ref var } if var == "FRAPPE_API_SECRET"));
}

#[test]
fn from_lookup_rejects_non_http_base_url() {
    let env = [("FRAPPE_BASE_URL", "erp.example.test"), ("FRAPPE_API_KEY", "k"), ("FRAPPE_API_SECRET", "s")];
    let err = DeskConfig::from_lookup(lookup_from(&env)).unwrap_err().to_string();
    assert!(err.contains("http(s) URL"));
}

#[test]
fn parse_flag_keeps_default_for_unknown_values() {
    assert!(parse_flag(Some("maybe"), true));
    assert!(!parse_flag(None, false));
    assert!(parse_flag(Some(" YES "), false));
}
