use futures::StreamExt;
use serde_json::json;

use super::*;

#[test]
fn received_payloads_pass_through_and_lag_gaps_are_skipped() {
    assert_eq!(
        received_payload("LOG", Ok(json!({ "message": "hi" }))),
        Some(json!({ "message": "hi" }))
    );
    assert_eq!(
        received_payload("LOG", Err(BroadcastStreamRecvError::Lagged(3))),
        None
    );
}

#[tokio::test]
async fn lagging_subscriber_resumes_at_the_oldest_retained_payload() {
    let transport = LoopbackTransport::new();
    let mut stream = transport.subscribe("progress").await.expect("subscribe");

    let overflow = 6;
    let total = CHANNEL_CAPACITY + overflow;
    for index in 0..total {
        transport
            .emit("progress", json!(index))
            .await
            .expect("emit");
    }

    let first = stream.next().await.expect("stream open");
    assert_eq!(first, json!(overflow));
    let rest = stream.take(CHANNEL_CAPACITY - 1).collect::<Vec<_>>().await;
    assert_eq!(rest.last(), Some(&json!(total - 1)));
}
