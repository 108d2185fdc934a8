use std::{sync::atomic::AtomicUsize, time::Duration};

use serde_json::json;
use shared::{
    error::{ErrorKind, ErrorNotice},
    protocol::Event,
};
use tokio::sync::{mpsc, Semaphore};

use super::*;
use crate::{
    commands::{FilterPayload, GetLocalMods},
    invoke::ChannelNotifier,
    settings::BridgeSettings,
    transport::LoopbackTransport,
};

const WAIT: Duration = Duration::from_secs(2);

fn bridge(
    transport: &Arc<LoopbackTransport>,
    policy: RacePolicy,
) -> (Bridge, mpsc::UnboundedReceiver<ErrorNotice>) {
    let (notifier, notices) = ChannelNotifier::new();
    let settings = BridgeSettings {
        race_policy: policy,
        ..BridgeSettings::default()
    };
    (
        Bridge::new(transport.clone(), settings, Arc::new(notifier)),
        notices,
    )
}

/// Answers `get_local_mods` with the request's filter after a delay chosen
/// by that filter.
fn echo_filter_with_delays(transport: &LoopbackTransport) {
    transport.handle("get_local_mods", |payload| async move {
        let filter = payload["filter"].as_str().unwrap_or_default().to_string();
        let delay = if filter == "slow" { 120 } else { 5 };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(json!([filter]))
    });
}

/// Answers `get_local_mods` with `value`, one call per permit on `gate`.
fn gated_handler(
    transport: &LoopbackTransport,
    gate: &Arc<Semaphore>,
    value: serde_json::Value,
) {
    let gate = Arc::clone(gate);
    transport.handle("get_local_mods", move |_| {
        let gate = Arc::clone(&gate);
        let value = value.clone();
        async move {
            match gate.acquire().await {
                Ok(permit) => {
                    permit.forget();
                    Ok(value)
                }
                Err(err) => Err(err.to_string()),
            }
        }
    });
}

async fn wait_for_invocations(transport: &LoopbackTransport, count: usize) {
    tokio::time::timeout(WAIT, async {
        while transport.invocation_count("get_local_mods") < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("fetches were not issued in time");
}

async fn wait_for_applied(
    query: &Query<GetLocalMods>,
    count: u64,
) -> QuerySnapshot<Vec<String>> {
    let mut rx = query.watch();
    let applied = tokio::time::timeout(WAIT, rx.wait_for(|s| s.fetches_applied >= count))
        .await
        .expect("query did not settle in time")
        .expect("query state channel closed");
    applied.clone()
}

fn names(snapshot: &QuerySnapshot<Vec<String>>) -> Vec<String> {
    snapshot
        .value
        .as_deref()
        .cloned()
        .expect("value present")
}

#[test]
fn race_policy_parses_from_config_names() {
    assert_eq!("latest_issued".parse::<RacePolicy>(), Ok(RacePolicy::LatestIssued));
    assert_eq!("last_resolved".parse::<RacePolicy>(), Ok(RacePolicy::LastResolved));
    assert!("first_wins".parse::<RacePolicy>().is_err());
    assert_eq!(RacePolicy::default(), RacePolicy::LatestIssued);
}

#[tokio::test]
async fn mount_is_loading_until_the_first_fetch_resolves() {
    let transport = Arc::new(LoopbackTransport::new());
    let gate = Arc::new(Semaphore::new(0));
    gated_handler(&transport, &gate, json!(["Bwc9876.TimeSaver"]));
    let (bridge, _notices) = bridge(&transport, RacePolicy::LatestIssued);

    let mut query = Query::<GetLocalMods>::mount(
        &bridge,
        &[EventKind::LocalRefresh],
        FilterPayload::default(),
    )
    .await
    .expect("mount");
    assert_eq!(query.state(), LoadState::Loading);
    assert!(query.value().is_none());
    assert!(query.snapshot().result().is_none());

    gate.add_permits(1);
    let snapshot = tokio::time::timeout(WAIT, query.settled())
        .await
        .expect("settled in time")
        .expect("settled");
    assert_eq!(snapshot.state, LoadState::Done);
    assert_eq!(names(&snapshot), vec!["Bwc9876.TimeSaver".to_string()]);
    assert_eq!(snapshot.fetches_applied, 1);
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn event_triggers_exactly_one_refetch() {
    let transport = Arc::new(LoopbackTransport::new());
    transport.handle_value("get_local_mods", json!(["a", "b"]));
    let (bridge, _notices) = bridge(&transport, RacePolicy::LatestIssued);

    let query = bridge
        .query::<GetLocalMods>(&[EventKind::LocalRefresh], FilterPayload::default())
        .await
        .expect("mount");
    let first = wait_for_applied(&query, 1).await;
    assert_eq!(names(&first), vec!["a".to_string(), "b".to_string()]);

    bridge.emit(&Event::LocalRefresh).await.expect("emit");
    let second = wait_for_applied(&query, 2).await;
    assert_eq!(second.state, LoadState::Done);
    assert_eq!(names(&second), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(transport.invocation_count("get_local_mods"), 2);

    // Other events leave the query alone.
    bridge.emit(&Event::RemoteRefresh).await.expect("emit");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.invocation_count("get_local_mods"), 2);
}

#[tokio::test]
async fn subscribed_event_reenters_loading_until_the_refetch_lands() {
    let transport = Arc::new(LoopbackTransport::new());
    // The mount fetch passes; the refetch waits for a second permit.
    let gate = Arc::new(Semaphore::new(1));
    gated_handler(&transport, &gate, json!(["a", "b"]));
    let (bridge, _notices) = bridge(&transport, RacePolicy::LatestIssued);

    let query = Query::<GetLocalMods>::mount(
        &bridge,
        &[EventKind::LocalRefresh],
        FilterPayload::default(),
    )
    .await
    .expect("mount");
    let first = wait_for_applied(&query, 1).await;
    assert_eq!(first.state, LoadState::Done);

    let mut states = query.watch();
    bridge.emit(&Event::LocalRefresh).await.expect("emit");
    let loading = tokio::time::timeout(
        WAIT,
        states.wait_for(|s| s.state == LoadState::Loading),
    )
    .await
    .expect("event did not restart the query")
    .expect("query state channel closed")
    .clone();
    assert_eq!(loading.fetches_applied, 1);
    assert_eq!(names(&loading), vec!["a".to_string(), "b".to_string()]);
    wait_for_invocations(&transport, 2).await;
    assert_eq!(query.state(), LoadState::Loading);

    gate.add_permits(1);
    let done = wait_for_applied(&query, 2).await;
    assert_eq!(done.state, LoadState::Done);
    assert_eq!(names(&done), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(transport.invocation_count("get_local_mods"), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_triggers_never_leave_the_query_loading() {
    let transport = Arc::new(LoopbackTransport::new());
    transport.handle_value("get_local_mods", json!(["a"]));
    let (bridge, _notices) = bridge(&transport, RacePolicy::LatestIssued);

    let query = Arc::new(
        Query::<GetLocalMods>::mount(
            &bridge,
            &[EventKind::LocalRefresh],
            FilterPayload::default(),
        )
        .await
        .expect("mount"),
    );
    let mut states = query.watch();
    let mut expected = 1;

    for round in 0..50 {
        let refreshers = (0..8)
            .map(|_| {
                let query = Arc::clone(&query);
                tokio::task::spawn_blocking(move || query.refresh())
            })
            .collect::<Vec<_>>();
        bridge.emit(&Event::LocalRefresh).await.expect("emit");
        for refresher in refreshers {
            refresher.await.expect("refresh task");
        }
        expected += 9;
        wait_for_invocations(&transport, expected).await;

        let settled = tokio::time::timeout(
            WAIT,
            states.wait_for(|s| s.state == LoadState::Done),
        )
        .await
        .unwrap_or_else(|_| panic!("query stuck in Loading after round {round}"))
        .expect("query state channel closed")
        .clone();
        assert_eq!(names(&settled), vec!["a".to_string()]);
    }
}

#[tokio::test]
async fn payload_change_refetches_once_and_equal_payload_does_nothing() {
    let transport = Arc::new(LoopbackTransport::new());
    echo_filter_with_delays(&transport);
    let (bridge, _notices) = bridge(&transport, RacePolicy::LatestIssued);

    let query = Query::<GetLocalMods>::mount(&bridge, &[], FilterPayload::new("time"))
        .await
        .expect("mount");
    wait_for_applied(&query, 1).await;

    assert!(!query.set_payload(FilterPayload::new("time")));
    assert_eq!(query.state(), LoadState::Done);

    assert!(query.set_payload(FilterPayload::new("nomai")));
    assert_eq!(query.state(), LoadState::Loading);
    assert_eq!(query.payload(), FilterPayload::new("nomai"));
    let snapshot = wait_for_applied(&query, 2).await;
    assert_eq!(names(&snapshot), vec!["nomai".to_string()]);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(
        transport.invocations("get_local_mods"),
        vec![json!({ "filter": "time" }), json!({ "filter": "nomai" })]
    );
}

#[tokio::test]
async fn failed_fetch_is_recorded_silently_and_not_retried() {
    let transport = Arc::new(LoopbackTransport::new());
    transport.handle_error("get_local_mods", "database unreachable");
    let (bridge, mut notices) = bridge(&transport, RacePolicy::LatestIssued);

    let query = Query::<GetLocalMods>::mount(
        &bridge,
        &[EventKind::LocalRefresh],
        FilterPayload::default(),
    )
    .await
    .expect("mount");
    let snapshot = wait_for_applied(&query, 1).await;
    assert_eq!(snapshot.state, LoadState::Done);
    assert!(snapshot.value.is_none());
    let err = snapshot.error.clone().expect("error recorded");
    assert_eq!(err.kind(), ErrorKind::Backend);
    assert!(matches!(snapshot.result(), Some(Err(_))));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.invocation_count("get_local_mods"), 1);
    assert!(notices.try_recv().is_err());
}

#[tokio::test]
async fn failure_keeps_the_previous_value_and_success_clears_the_error() {
    let transport = Arc::new(LoopbackTransport::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let handler_calls = Arc::clone(&calls);
    transport.handle("get_local_mods", move |_| {
        let call = handler_calls.fetch_add(1, Ordering::SeqCst);
        async move {
            match call {
                1 => Err("disk full".to_string()),
                _ => Ok(json!([format!("call-{call}")])),
            }
        }
    });
    let (bridge, _notices) = bridge(&transport, RacePolicy::LatestIssued);

    let query = Query::<GetLocalMods>::mount(&bridge, &[], FilterPayload::default())
        .await
        .expect("mount");
    wait_for_applied(&query, 1).await;

    query.refresh();
    let failed = wait_for_applied(&query, 2).await;
    assert_eq!(names(&failed), vec!["call-0".to_string()]);
    assert!(failed.error.is_some());

    query.refresh();
    let recovered = wait_for_applied(&query, 3).await;
    assert_eq!(names(&recovered), vec!["call-2".to_string()]);
    assert!(recovered.error.is_none());
}

#[tokio::test]
async fn latest_issued_discards_a_slow_superseded_fetch() {
    let transport = Arc::new(LoopbackTransport::new());
    echo_filter_with_delays(&transport);
    let (bridge, _notices) = bridge(&transport, RacePolicy::LatestIssued);

    let query = Query::<GetLocalMods>::mount(&bridge, &[], FilterPayload::new("slow"))
        .await
        .expect("mount");
    query.set_payload(FilterPayload::new("fast"));

    let snapshot = wait_for_applied(&query, 1).await;
    assert_eq!(names(&snapshot), vec!["fast".to_string()]);

    // Let the slow fetch land; it must not overwrite the newer result.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let snapshot = query.snapshot();
    assert_eq!(names(&snapshot), vec!["fast".to_string()]);
    assert_eq!(snapshot.fetches_applied, 1);
    assert_eq!(snapshot.state, LoadState::Done);
    assert_eq!(transport.invocation_count("get_local_mods"), 2);
}

#[tokio::test]
async fn last_resolved_applies_every_result() {
    let transport = Arc::new(LoopbackTransport::new());
    echo_filter_with_delays(&transport);
    let (bridge, _notices) = bridge(&transport, RacePolicy::LastResolved);

    let query = Query::<GetLocalMods>::mount(&bridge, &[], FilterPayload::new("slow"))
        .await
        .expect("mount");
    query.set_payload(FilterPayload::new("fast"));

    let snapshot = wait_for_applied(&query, 2).await;
    assert_eq!(names(&snapshot), vec!["slow".to_string()]);
}

#[tokio::test]
async fn dropping_the_query_unsubscribes_it() {
    let transport = Arc::new(LoopbackTransport::new());
    transport.handle_value("get_local_mods", json!([]));
    let (bridge, _notices) = bridge(&transport, RacePolicy::LatestIssued);

    let query = Query::<GetLocalMods>::mount(
        &bridge,
        &[EventKind::LocalRefresh, EventKind::ModBusy],
        FilterPayload::default(),
    )
    .await
    .expect("mount");
    assert_eq!(bridge.events().subscriber_count(EventKind::LocalRefresh), 1);
    assert_eq!(bridge.events().subscriber_count(EventKind::ModBusy), 1);
    wait_for_applied(&query, 1).await;
    drop(query);

    assert_eq!(bridge.events().subscriber_count(EventKind::LocalRefresh), 0);
    assert_eq!(bridge.events().subscriber_count(EventKind::ModBusy), 0);
    bridge.emit(&Event::LocalRefresh).await.expect("emit");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.invocation_count("get_local_mods"), 1);
}

#[tokio::test]
async fn subscription_failure_fails_the_mount_without_fetching() {
    let transport = Arc::new(LoopbackTransport::new());
    transport.handle_value("get_local_mods", json!([]));
    transport.set_fail_subscribe(true);
    let (bridge, _notices) = bridge(&transport, RacePolicy::LatestIssued);

    let err = Query::<GetLocalMods>::mount(
        &bridge,
        &[EventKind::LocalRefresh],
        FilterPayload::default(),
    )
    .await
    .err()
    .expect("mount should fail");
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(transport.invocation_count("get_local_mods"), 0);
}
