use serde_json::{Value, json};

use super::*;
use crate::rpc::test_helpers::{MockRpc, creation_row, deletion_row, update_row};
use crate::rpc::{CreationPreview, DeletionPreview, FieldUpdates, UpdatePreview};

fn descriptor(value: Value) -> ActionDescriptor {
    let Value::Object(map) = value else { panic!("descriptor must be an object") };
    ActionDescriptor::from_map(map).expect("resolvable action")
}

fn key(index: usize) -> ActionKey {
    ActionKey::new("m1", index)
}

fn deletion_preview(rows: &[(&str, bool)]) -> DeletionPreview {
    DeletionPreview {
        items: rows.iter().map(|(code, ok)| deletion_row(code, *ok)).collect(),
        warnings: Vec::new(),
    }
}

fn mock_with_deletions(rows: &[(&str, bool)]) -> MockRpc {
    let mock = MockRpc::default();
    mock.state().deletion_preview = deletion_preview(rows);
    mock
}

// =============================================================================
// ActionKey / ApplyOutcome
// =============================================================================

#[test]
fn key_display_joins_message_and_index() {
    assert_eq!(ActionKey::new("AIC-MSG-9", 2).to_string(), "AIC-MSG-9:2");
}

#[test]
fn outcome_summary_lists_problem_rows() {
    let outcome = ApplyOutcome {
        family: ActionFamily::Creation,
        done: vec!["A".into(), "B".into()],
        skipped: vec![SkippedRow { item_code: "C".into(), reason: "exists".into() }],
        failed: vec![FailedRow { item_code: "D".into(), error: "bad UOM".into() }],
    };
    assert_eq!(
        outcome.summary_text(),
        "Items created: 2\nSkipped: 1\n- C: exists\nFailed: 1\n- D: bad UOM"
    );
    let ctx: Value = serde_json::from_str(&outcome.to_context_json()).unwrap();
    assert_eq!(ctx["erpnext_ai_action_result"]["family"], json!("creation"));
    assert_eq!(ctx["erpnext_ai_action_result"]["done"], json!(["A", "B"]));
}

// =============================================================================
// ActionStore transitions
// =============================================================================

#[test]
fn register_is_idempotent() {
    let mut store = ActionStore::new();
    let d = descriptor(json!({ "action": "preview_item_deletion", "item_codes": ["A"] }));
    assert!(store.register(key(0), d.clone()));
    store.begin_preview(&key(0));
    assert!(!store.register(key(0), d));
    assert_eq!(store.len(), 1);
    assert_eq!(store.get(&key(0)).unwrap().phase, ActionPhase::Previewing);
}

#[test]
fn pending_keys_follow_registration_order() {
    let mut store = ActionStore::new();
    let d = descriptor(json!({ "action": "preview_item_deletion", "item_codes": ["A"] }));
    store.register(ActionKey::new("m2", 0), d.clone());
    store.register(ActionKey::new("m1", 1), d.clone());
    store.register(ActionKey::new("m1", 0), d);
    store.begin_preview(&ActionKey::new("m1", 1));
    assert_eq!(store.pending_keys(), vec![ActionKey::new("m2", 0), ActionKey::new("m1", 0)]);
}

#[test]
fn begin_preview_only_once() {
    let mut store = ActionStore::new();
    store.register(key(0), descriptor(json!({ "action": "preview_item_deletion", "item_codes": ["A"] })));
    assert!(store.begin_preview(&key(0)).is_some());
    assert!(store.begin_preview(&key(0)).is_none());
    assert!(store.begin_preview(&key(9)).is_none());
}

#[test]
fn manual_apply_requires_preview() {
    let mut store = ActionStore::new();
    store.register(key(0), descriptor(json!({ "action": "preview_item_deletion", "item_codes": ["A"] })));
    assert!(matches!(store.begin_manual_apply(&key(0)), Err(ActionError::NotPreviewed)));
    store.begin_preview(&key(0));
    assert!(matches!(store.begin_manual_apply(&key(0)), Err(ActionError::InProgress)));
}

#[test]
fn manual_apply_with_no_actionable_rows() {
    let mut store = ActionStore::new();
    store.register(key(0), descriptor(json!({ "action": "preview_item_deletion", "item_codes": ["A"], "auto_apply": 0 })));
    store.begin_preview(&key(0));
    store.finish_preview(&key(0), Ok(Preview::Deletion(deletion_preview(&[("A", false)]))));
    assert!(matches!(store.begin_manual_apply(&key(0)), Err(ActionError::NothingToApply)));
}

#[test]
fn manual_apply_blocks_double_invocation() {
    let mut store = ActionStore::new();
    store.register(key(0), descriptor(json!({ "action": "preview_item_deletion", "item_codes": ["A"], "auto_apply": 0 })));
    store.begin_preview(&key(0));
    store.finish_preview(&key(0), Ok(Preview::Deletion(deletion_preview(&[("A", true)]))));
    assert!(store.begin_manual_apply(&key(0)).is_ok());
    assert!(matches!(store.begin_manual_apply(&key(0)), Err(ActionError::InProgress)));
}

#[test]
fn claim_auto_apply_respects_opt_out() {
    let mut store = ActionStore::new();
    store.register(key(0), descriptor(json!({ "action": "preview_item_deletion", "item_codes": ["A"], "auto_apply": "false" })));
    store.begin_preview(&key(0));
    store.finish_preview(&key(0), Ok(Preview::Deletion(deletion_preview(&[("A", true)]))));
    assert!(store.claim_auto_apply(&key(0)).is_none());
    assert_eq!(store.get(&key(0)).unwrap().phase, ActionPhase::Previewed);
}

#[test]
fn claim_auto_apply_needs_actionable_rows() {
    let mut store = ActionStore::new();
    store.register(key(0), descriptor(json!({ "action": "preview_item_deletion", "item_codes": ["A"] })));
    store.begin_preview(&key(0));
    store.finish_preview(&key(0), Ok(Preview::Deletion(deletion_preview(&[("A", false)]))));
    assert!(store.claim_auto_apply(&key(0)).is_none());
    assert_eq!(store.get(&key(0)).unwrap().phase, ActionPhase::Previewed);
}

#[test]
fn claim_auto_apply_fires_once_even_after_failure() {
    let mut store = ActionStore::new();
    store.register(key(0), descriptor(json!({ "action": "preview_item_deletion", "item_codes": ["A"] })));
    store.begin_preview(&key(0));
    store.finish_preview(&key(0), Ok(Preview::Deletion(deletion_preview(&[("A", true)]))));
    assert!(store.claim_auto_apply(&key(0)).is_some());
    store.finish_apply(&key(0), &Err(ActionError::NothingToApply));
    assert!(store.claim_auto_apply(&key(0)).is_none());

    let state = store.get(&key(0)).unwrap();
    assert!(state.auto_applied);
    assert_eq!(state.phase, ActionPhase::Error);
    assert_eq!(state.error.as_deref(), Some("Nothing to apply"));
}

#[test]
fn settled_actions_never_auto_apply() {
    let mut store = ActionStore::new();
    store.register_settled(key(0), descriptor(json!({ "action": "preview_item_deletion", "item_codes": ["A"] })));
    store.begin_preview(&key(0));
    store.finish_preview(&key(0), Ok(Preview::Deletion(deletion_preview(&[("A", true)]))));
    assert!(store.claim_auto_apply(&key(0)).is_none());
    assert!(store.begin_manual_apply(&key(0)).is_ok());
}

#[test]
fn clear_forgets_everything() {
    let mut store = ActionStore::new();
    store.register(key(0), descriptor(json!({ "action": "preview_item_deletion", "item_codes": ["A"] })));
    store.clear();
    assert!(store.is_empty());
    assert!(store.pending_keys().is_empty());
}

// =============================================================================
// fetch_preview / run_apply
// =============================================================================

#[tokio::test]
async fn validation_error_skips_network() {
    let mock = MockRpc::default();
    let d = descriptor(json!({ "action": "preview_item_creation", "item_group": "Products", "stock_uom": "Nos" }));
    let err = fetch_preview(&mock, &d).await.unwrap_err();
    assert!(matches!(err, ActionError::MissingField("raw_text")));
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn series_descriptor_uses_series_endpoint() {
    let mock = mock_with_deletions(&[("SKU-1", true)]);
    let d = descriptor(json!({ "action": "preview_item_deletion", "code_prefix": "SKU-", "count": 1 }));
    let preview = fetch_preview(&mock, &d).await.unwrap();
    assert_eq!(preview.actionable_count(), 1);
    assert_eq!(mock.calls(), vec!["preview_item_deletion_series".to_string()]);
}

#[tokio::test]
async fn creation_apply_sends_only_new_rows() {
    let mock = MockRpc::default();
    let ticket = ApplyTicket {
        descriptor: descriptor(json!({ "action": "preview_item_creation" })),
        preview: Preview::Creation(CreationPreview {
            items: vec![creation_row("NEW-1", false), creation_row("OLD-1", true), creation_row("", false)],
            warnings: Vec::new(),
        }),
    };
    let outcome = run_apply(&mock, &ticket).await.unwrap();
    assert_eq!(outcome.family, ActionFamily::Creation);
    assert_eq!(outcome.done, vec!["NEW-1".to_string()]);
    assert_eq!(mock.state().applied_codes, vec!["NEW-1".to_string()]);
}

#[tokio::test]
async fn update_apply_prefers_server_accepted_updates() {
    let mock = MockRpc::default();
    let mut server_updates = serde_json::Map::new();
    server_updates.insert("item_group".into(), json!("Products"));
    let ticket = ApplyTicket {
        descriptor: descriptor(json!({
            "action": "preview_item_update",
            "item_codes": ["A", "B"],
            "updates": { "group": "Products", "uom": "Kg" }
        })),
        preview: Preview::Update(UpdatePreview {
            items: vec![update_row("A", true), update_row("B", false)],
            updates: FieldUpdates(server_updates.clone()),
            warnings: Vec::new(),
        }),
    };
    run_apply(&mock, &ticket).await.unwrap();
    let state = mock.state();
    assert_eq!(state.applied_codes, vec!["A".to_string()]);
    assert_eq!(state.applied_updates, Some(FieldUpdates(server_updates)));
}

#[tokio::test]
async fn update_apply_falls_back_to_descriptor_updates() {
    let mock = MockRpc::default();
    let ticket = ApplyTicket {
        descriptor: descriptor(json!({ "action": "preview_item_update", "item_codes": ["A"], "updates": { "disabled": true } })),
        preview: Preview::Update(UpdatePreview { items: vec![update_row("A", true)], ..UpdatePreview::default() }),
    };
    run_apply(&mock, &ticket).await.unwrap();
    let updates = mock.state().applied_updates.clone().unwrap();
    assert_eq!(updates.0.get("disabled"), Some(&json!(1)));
}

// =============================================================================
// drive_action / apply_now
// =============================================================================

#[tokio::test]
async fn drive_action_auto_applies_once() {
    let mock = mock_with_deletions(&[("A", true), ("B", true)]);
    let mut store = ActionStore::new();
    store.register(key(0), descriptor(json!({ "action": "preview_item_deletion", "item_codes": ["A", "B"] })));

    let outcome = drive_action(&mock, &mut store, &key(0)).await.unwrap();
    assert_eq!(outcome.done.len(), 2);
    assert!(drive_action(&mock, &mut store, &key(0)).await.is_none());
    assert!(drive_action(&mock, &mut store, &key(0)).await.is_none());

    assert_eq!(mock.count("preview_item_deletion"), 1);
    assert_eq!(mock.count("delete_items"), 1);
    assert_eq!(store.get(&key(0)).unwrap().phase, ActionPhase::Applied);
}

#[tokio::test]
async fn drive_action_without_auto_apply_stops_at_preview() {
    let mock = mock_with_deletions(&[("A", true), ("B", true), ("C", true), ("D", true), ("E", true)]);
    let mut store = ActionStore::new();
    store.register(key(0), descriptor(json!({ "action": "preview_item_deletion", "code_prefix": "X", "count": 5, "auto_apply": 0 })));

    assert!(drive_action(&mock, &mut store, &key(0)).await.is_none());
    let state = store.get(&key(0)).unwrap();
    assert_eq!(state.phase, ActionPhase::Previewed);
    assert_eq!(state.actionable_count(), 5);
    assert_eq!(mock.count("delete_items"), 0);
}

#[tokio::test]
async fn preview_failure_is_local_to_the_action() {
    let mock = MockRpc::default();
    mock.state().fail_preview = true;
    let mut store = ActionStore::new();
    store.register(key(0), descriptor(json!({ "action": "preview_item_deletion", "item_codes": ["A"] })));

    assert!(drive_action(&mock, &mut store, &key(0)).await.is_none());
    let state = store.get(&key(0)).unwrap();
    assert_eq!(state.phase, ActionPhase::Error);
    assert_eq!(state.error.as_deref(), Some("preview failed"));
    assert!(state.preview.is_none());
}

#[tokio::test]
async fn apply_now_retries_after_failed_apply() {
    let mock = mock_with_deletions(&[("A", true)]);
    mock.state().fail_apply = true;
    let mut store = ActionStore::new();
    store.register(key(0), descriptor(json!({ "action": "preview_item_deletion", "item_codes": ["A"], "auto_apply": 0 })));
    drive_action(&mock, &mut store, &key(0)).await;

    let err = apply_now(&mock, &mut store, &key(0)).await.unwrap_err();
    assert_eq!(err.to_string(), "delete items failed");
    assert_eq!(store.get(&key(0)).unwrap().phase, ActionPhase::Error);

    mock.state().fail_apply = false;
    let outcome = apply_now(&mock, &mut store, &key(0)).await.unwrap();
    assert_eq!(outcome.done, vec!["A".to_string()]);
    assert!(matches!(apply_now(&mock, &mut store, &key(0)).await, Err(ActionError::AlreadyApplied)));
}
