//! An op that exhausts `maxAttempts` against an unreachable server archives
//! to the Failed-Ops Archive and rolls back its optimistic UI entry (§4.1,
//! §4.9, §4.13).

use syncd_schemas::{new_uuid_v4, EntityType, OpType, TxnToken};
use syncd_testkit::advance;

#[tokio::test]
async fn exhausted_op_is_archived_and_optimistic_entry_rolls_back() {
    let harness = syncd_testkit::build_harness(3).await;
    let token = TxnToken::new(new_uuid_v4());

    let mut payload = serde_json::Map::new();
    payload.insert("id".to_string(), serde_json::json!("fall-event-1"));
    payload.insert("severity".to_string(), serde_json::json!("high"));

    harness
        .engine
        .enqueue(OpType::Create, EntityType::new("fall-event"), payload, Some(token.clone()))
        .await
        .expect("enqueue fall event");

    let mut clock = syncd_testkit::now();
    for _ in 0..3 {
        harness.engine.dispatch_once(clock).await.expect("dispatch_once should not itself error");
        clock = advance(clock, 10);
    }

    let failed = harness.pending_store.all_failed().await.expect("list failed");
    assert_eq!(failed.len(), 1, "op should have been archived after exhausting retries");
    assert_eq!(failed[0].op.attempts, 3);

    assert_eq!(harness.pending_store.count().await.unwrap(), 0, "nothing should remain queued");
}
