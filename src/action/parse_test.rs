use serde_json::json;

use super::*;

fn block(body: &str) -> String {
    format!("```{ACTION_FENCE_TAG}\n{body}\n```")
}

#[test]
fn plain_text_is_returned_unchanged() {
    let text = "  Sales are up 4% this week.\n";
    let parsed = parse_actions(text);
    assert_eq!(parsed.cleaned_text, text);
    assert!(parsed.actions.is_empty());
}

#[test]
fn single_block_is_stripped_and_trimmed() {
    let text = format!(
        "Sure.\n{}",
        block(r#"{"action":"preview_item_creation","raw_text":"Widget","item_group":"Products","stock_uom":"Nos","auto_apply":1}"#)
    );
    let parsed = parse_actions(&text);
    assert_eq!(parsed.cleaned_text, "Sure.");
    assert_eq!(parsed.actions.len(), 1);
    assert_eq!(parsed.actions[0]["action"], json!("preview_item_creation"));
    assert_eq!(parsed.actions[0]["auto_apply"], json!(1));
}

#[test]
fn multiple_blocks_keep_source_order() {
    let text = format!(
        "{}\nbetween\n{}",
        block(r#"{"action":"preview_item_deletion","item_codes":["A"]}"#),
        block(r#"{"action":"preview_item_update","item_codes":["B"],"updates":{"disabled":1}}"#)
    );
    let parsed = parse_actions(&text);
    let tags: Vec<&Value> = parsed.actions.iter().map(|a| &a["action"]).collect();
    assert_eq!(tags, vec![&json!("preview_item_deletion"), &json!("preview_item_update")]);
    assert_eq!(parsed.cleaned_text, "between");
}

#[test]
fn malformed_blocks_stay_verbatim() {
    let good = block(r#"{"action":"preview_item_deletion_series","code_prefix":"SKU-"}"#);
    let invalid = block("{not json");
    let array = block("[1, 2]");
    let text = format!("Intro\n{good}\n{invalid}\n{array}\nOutro");

    let parsed = parse_actions(&text);
    assert_eq!(parsed.actions.len(), 1);
    assert!(parsed.cleaned_text.contains(&invalid));
    assert!(parsed.cleaned_text.contains(&array));
    assert!(!parsed.cleaned_text.contains("preview_item_deletion_series"));
    assert_eq!(parsed.cleaned_text.matches("```").count(), 4);
}

#[test]
fn only_malformed_blocks_return_text_unchanged() {
    let text = format!("  {}  ", block("{oops"));
    let parsed = parse_actions(&text);
    assert!(parsed.actions.is_empty());
    assert_eq!(parsed.cleaned_text, text);
}

#[test]
fn other_fence_languages_are_not_actions() {
    let text = "Here:\n```json\n{\"action\":\"preview_item_deletion\"}\n```";
    let parsed = parse_actions(text);
    assert!(parsed.actions.is_empty());
    assert_eq!(parsed.cleaned_text, text);
}

#[test]
fn info_string_whitespace_is_ignored() {
    let text = "```  erpnext_ai_action  \n{\"action\":\"preview_item_deletion\"}\n```";
    let parsed = parse_actions(text);
    assert_eq!(parsed.actions.len(), 1);
    assert_eq!(parsed.cleaned_text, "");
}

#[test]
fn non_action_block_is_skipped_as_a_unit() {
    let text = format!("```text\nuse erpnext_ai_action blocks\n```\n{}", block(r#"{"action":"preview_item_deletion"}"#));
    let parsed = parse_actions(&text);
    assert_eq!(parsed.actions.len(), 1);
    assert_eq!(parsed.cleaned_text, "```text\nuse erpnext_ai_action blocks\n```");
}

#[test]
fn unclosed_fence_is_visible_text() {
    let text = format!("{}\nTrailing ```erpnext_ai_action\n{{\"action\":\"x\"}}", block(r#"{"action":"preview_item_deletion"}"#));
    let parsed = parse_actions(&text);
    assert_eq!(parsed.actions.len(), 1);
    assert_eq!(parsed.cleaned_text, "Trailing ```erpnext_ai_action\n{\"action\":\"x\"}");
}

#[test]
fn parsing_is_repeatable() {
    let text = format!("Done.\n{}", block(r#"{"action":"preview_item_update_series","code_prefix":"SKU-"}"#));
    assert_eq!(parse_actions(&text), parse_actions(&text));
}

#[test]
fn backticks_inside_prose_do_not_open_a_fence() {
    let text = format!("Wrap code in ``` fences.\n{}", block(r#"{"action":"preview_item_deletion","item_codes":["A"]}"#));
    let parsed = parse_actions(&text);
    assert_eq!(parsed.actions.len(), 1);
    assert_eq!(parsed.actions[0]["item_codes"], json!(["A"]));
    assert_eq!(parsed.cleaned_text, "Wrap code in ``` fences.");
}

#[test]
fn backticks_inside_json_strings_do_not_close_the_block() {
    let text = format!(
        "Updating.\n{}",
        block(r#"{"action":"preview_item_update","item_codes":["A"],"updates":{"description":"use ``` here"}}"#)
    );
    let parsed = parse_actions(&text);
    assert_eq!(parsed.actions.len(), 1);
    assert_eq!(parsed.actions[0]["updates"]["description"], json!("use ``` here"));
    assert_eq!(parsed.cleaned_text, "Updating.");
}

#[test]
fn indented_fences_are_recognised() {
    let text = format!("Done.\n  ```{ACTION_FENCE_TAG}\n  {{\"action\":\"preview_item_deletion\"}}\n  ```");
    let parsed = parse_actions(&text);
    assert_eq!(parsed.actions.len(), 1);
    assert_eq!(parsed.cleaned_text, "Done.");
}
