//! Two UPDATEs to the same room queued before either ships merge into one
//! op instead of sending twice (§4.10).

use syncd_schemas::{EntityType, IdempotencyKey, OpType, TraceId};

#[tokio::test]
async fn merges_second_update_into_first() {
    let harness = syncd_testkit::build_harness(3).await;

    let mut first_payload = serde_json::Map::new();
    first_payload.insert("id".to_string(), serde_json::json!("room-1"));
    first_payload.insert("name".to_string(), serde_json::json!("Living Room"));

    harness
        .pending_store
        .enqueue(
            OpType::Update,
            EntityType::new("room"),
            first_payload,
            IdempotencyKey::new("idem-1"),
            TraceId::new("trace-1"),
            None,
            syncd_testkit::now(),
        )
        .await
        .expect("enqueue first update");

    let mut second_payload = serde_json::Map::new();
    second_payload.insert("id".to_string(), serde_json::json!("room-1"));
    second_payload.insert("brightness".to_string(), serde_json::json!(80));

    harness
        .engine
        .enqueue(OpType::Update, EntityType::new("room"), second_payload, None)
        .await
        .expect("enqueue second update");

    let queued = harness.pending_store.all_queued().await.expect("list queued");
    assert_eq!(queued.len(), 1, "second update should merge into the first, not queue separately");

    let merged = &queued[0];
    assert_eq!(merged.payload.get("name").and_then(|v| v.as_str()), Some("Living Room"));
    assert_eq!(merged.payload.get("brightness").and_then(|v| v.as_i64()), Some(80));
}
