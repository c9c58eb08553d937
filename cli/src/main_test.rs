use super::*;

#[tokio::test]
async fn finished_save_task_is_ok() {
    let handle = tokio::spawn(async {});
    assert!(await_save("AIC-1", handle).await.is_ok());
}

#[tokio::test]
async fn panicked_save_task_is_reported() {
    let handle = tokio::spawn(async { panic!("save crashed") });
    let err = await_save("AIC-1", handle).await.unwrap_err();
    assert!(matches!(err, CliError::Task(_)));
    assert!(err.to_string().starts_with("background task failed"));
}

#[test]
fn card_key_splits_into_message_and_index() {
    assert_eq!(message_part("AIC-1-m2:0"), "AIC-1-m2");
    assert_eq!(index_part("AIC-1-m2:3"), "3");
    assert_eq!(message_part("AIC-1#4:1"), "AIC-1#4");
    assert_eq!(index_part("bare"), "0");
}
