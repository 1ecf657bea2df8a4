mod support;

use companion_schemas::MessageRole;
use support::{rig, MARGARET};

#[tokio::test]
async fn test_summary_with_no_history_skips_the_provider() {
    let rig = rig();

    let report = rig.engine.get_summary(MARGARET).await.unwrap();
    assert!(report.insufficient_data);
    assert_eq!(report.message_count, 0);
    assert!(report.summary.contains("Margaret"));

    // No provider call was made.
    assert_eq!(rig.completions.call_count(), 0);
}

#[tokio::test]
async fn test_summary_uses_active_exchanges_only() {
    let rig = rig();

    rig.engine
        .send_message(MARGARET, "I have been feeling quite lonely lately")
        .await
        .unwrap();
    rig.engine.soft_delete_history(MARGARET).await.unwrap();
    rig.engine
        .send_message(MARGARET, "The garden club made my week wonderful")
        .await
        .unwrap();

    rig.completions
        .set_reply("Margaret appears content. She is socially engaged. Her outlook is positive.");
    let report = rig.engine.get_summary(MARGARET).await.unwrap();

    assert!(!report.insufficient_data);
    assert_eq!(report.message_count, 1);

    // The summarisation prompt saw the active exchange but not the
    // soft-deleted one.
    let prompt = rig.completions.last_call();
    assert_eq!(prompt.len(), 1);
    assert_eq!(prompt[0].role, MessageRole::User);
    assert!(prompt[0].content.contains("The garden club made my week wonderful"));
    assert!(!prompt[0].content.contains("feeling quite lonely"));
}

#[tokio::test]
async fn test_summary_prompt_demands_synthesis_not_quotes() {
    let rig = rig();
    rig.engine.send_message(MARGARET, "hello").await.unwrap();

    rig.engine.get_summary(MARGARET).await.unwrap();

    let prompt = rig.completions.last_call();
    let content = &prompt[0].content;
    assert!(content.contains("exactly three sentences"));
    assert!(content.contains("do not quote"));
    assert!(content.contains("Margaret"));
}

#[tokio::test]
async fn test_summary_is_fresh_each_call() {
    let rig = rig();
    rig.engine.send_message(MARGARET, "hello").await.unwrap();
    let chat_calls = rig.completions.call_count();

    rig.engine.get_summary(MARGARET).await.unwrap();
    rig.engine.get_summary(MARGARET).await.unwrap();

    // Two summary requests, two provider calls: no caching.
    assert_eq!(rig.completions.call_count(), chat_calls + 2);
}

#[tokio::test]
async fn test_summary_reports_generation_time_and_count() {
    let rig = rig();
    for i in 0..3 {
        rig.engine
            .send_message(MARGARET, &format!("day {}", i))
            .await
            .unwrap();
    }

    let report = rig.engine.get_summary(MARGARET).await.unwrap();
    assert_eq!(report.message_count, 3);
    assert!(!report.generated_at.is_empty());
    assert_eq!(report.user_id, MARGARET);
}
