use std::{sync::Arc, time::Duration};

use bridge_core::{
    commands::{Empty, FilterPayload, GetLocalMods, RefreshLocalDb},
    Bridge, BridgeSettings, LoadState, LogNotifier, ProcessTransport, Query, Transport,
};
use futures::StreamExt;
use serde_json::json;
use shared::{
    error::{BridgeError, ErrorKind},
    protocol::{Event, EventKind, Frame, ReplyResult, EVENT_CHANNEL},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream},
    task::JoinHandle,
};

/// A scripted backend on the far end of an in-memory pipe.
fn fake_backend(pipe: DuplexStream, hang_up_after_first_frame: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(pipe);
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if hang_up_after_first_frame {
                return;
            }
            let mut replies = Vec::new();
            match Frame::decode_line(&line).expect("frontend sent a valid frame") {
                Frame::Invoke {
                    id,
                    command,
                    payload,
                } => match command.as_str() {
                    "get_local_mods" => {
                        let filter = payload["filter"].as_str().unwrap_or_default();
                        let mods = ["Bwc9876.TimeSaver", "Raicuparta.NomaiVR"]
                            .into_iter()
                            .filter(|name| name.contains(filter))
                            .collect::<Vec<_>>();
                        replies.push(Frame::Reply {
                            id,
                            result: ReplyResult::Ok(json!(mods)),
                        });
                    }
                    "refresh_local_db" => {
                        replies.push(Frame::Reply {
                            id,
                            result: ReplyResult::Ok(serde_json::Value::Null),
                        });
                        replies.push(Frame::Event {
                            channel: EVENT_CHANNEL.to_string(),
                            payload: Event::LocalRefresh.to_envelope().expect("envelope"),
                        });
                    }
                    "never_answers" => {}
                    other => replies.push(Frame::Reply {
                        id,
                        result: ReplyResult::Err(format!("Unknown command {other}")),
                    }),
                },
                // Frontend emits are broadcast back like the desktop shell does.
                event @ Frame::Event { .. } => replies.push(event),
                Frame::Reply { .. } => {}
            }
            for reply in replies {
                let line = reply.encode_line().expect("encode");
                if write.write_all(line.as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    })
}

fn connect(timeout: Duration, hang_up: bool) -> (ProcessTransport, JoinHandle<()>) {
    let (frontend, backend) = tokio::io::duplex(64 * 1024);
    let backend = fake_backend(backend, hang_up);
    let (read, write) = tokio::io::split(frontend);
    (ProcessTransport::from_io(read, write, timeout), backend)
}

#[tokio::test]
async fn replies_are_matched_to_their_requests() {
    let (transport, _backend) = connect(Duration::from_secs(2), false);

    let (time, nomai) = futures::join!(
        transport.invoke("get_local_mods", json!({ "filter": "Time" })),
        transport.invoke("get_local_mods", json!({ "filter": "Nomai" })),
    );
    assert_eq!(time.expect("time"), json!(["Bwc9876.TimeSaver"]));
    assert_eq!(nomai.expect("nomai"), json!(["Raicuparta.NomaiVR"]));
}

#[tokio::test]
async fn backend_errors_carry_the_command_and_message() {
    let (transport, _backend) = connect(Duration::from_secs(2), false);

    let err = transport
        .invoke("get_widgets", json!({}))
        .await
        .expect_err("unknown command");
    assert_eq!(
        err,
        BridgeError::Backend {
            command: "get_widgets".into(),
            message: "Unknown command get_widgets".into(),
        }
    );
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let (transport, _backend) = connect(Duration::from_millis(50), false);

    let err = transport
        .invoke("never_answers", json!({}))
        .await
        .expect_err("should time out");
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(!transport.is_closed());

    // The pipe is still usable afterwards.
    assert!(transport
        .invoke("get_local_mods", json!({ "filter": "" }))
        .await
        .is_ok());
}

#[tokio::test]
async fn backend_exit_fails_pending_and_later_requests() {
    let (transport, backend) = connect(Duration::from_secs(2), true);

    let err = transport
        .invoke("get_local_mods", json!({ "filter": "" }))
        .await
        .expect_err("backend hung up");
    assert_eq!(err, BridgeError::Closed);
    backend.await.expect("backend task");

    assert!(transport.is_closed());
    assert_eq!(
        transport.invoke("get_local_mods", json!({})).await,
        Err(BridgeError::Closed)
    );
    assert_eq!(
        transport.subscribe(EVENT_CHANNEL).await.err(),
        Some(BridgeError::Closed)
    );
}

#[tokio::test]
async fn emitted_events_come_back_on_the_channel() {
    let (transport, _backend) = connect(Duration::from_secs(2), false);
    let mut stream = transport.subscribe("custom").await.expect("subscribe");

    transport
        .emit("custom", json!({ "hello": "world" }))
        .await
        .expect("emit");
    let received = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("event in time");
    assert_eq!(received, Some(json!({ "hello": "world" })));
}

#[tokio::test]
async fn backend_event_refreshes_a_mounted_query() {
    let (transport, _backend) = connect(Duration::from_secs(2), false);
    let bridge = Bridge::new(
        Arc::new(transport),
        BridgeSettings::default(),
        Arc::new(LogNotifier),
    );

    let query = Query::<GetLocalMods>::mount(
        &bridge,
        &[EventKind::LocalRefresh],
        FilterPayload::new("Time"),
    )
    .await
    .expect("mount");
    let mut states = query.watch();
    let first = tokio::time::timeout(
        Duration::from_secs(2),
        states.wait_for(|s| s.fetches_applied == 1),
    )
    .await
    .expect("first fetch in time")
    .expect("query alive")
    .clone();
    assert_eq!(first.state, LoadState::Done);

    bridge
        .invoke::<RefreshLocalDb>(Empty {})
        .await
        .expect("refresh");
    let second = tokio::time::timeout(
        Duration::from_secs(2),
        states.wait_for(|s| s.fetches_applied == 2),
    )
    .await
    .expect("refetch in time")
    .expect("query alive")
    .clone();
    assert_eq!(
        second.value.as_deref(),
        Some(&vec!["Bwc9876.TimeSaver".to_string()])
    );
}
