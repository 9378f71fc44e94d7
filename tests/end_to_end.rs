//! End-to-end scenarios driving real bindings over the in-process broker
//! (§8 "End-to-end scenarios").

#![expect(clippy::unwrap_used, reason = "test code can panic")]

use std::sync::Arc;
use std::time::{Duration, Instant};

use flowbridge::binding::Binding;
use flowbridge::broker::Broker;
use flowbridge::envelope::Request;
use flowbridge::metadata::Metadata;
use flowbridge::metrics::MetricsStore;
use flowbridge::middleware;
use flowbridge::service::BindingService;
use flowbridge::sources;
use flowbridge::targets;

fn props(pairs: &[(&str, &str)]) -> Metadata {
    let mut m = Metadata::empty();
    for (k, v) in pairs {
        m.set(*k, *v);
    }
    m
}

#[tokio::test]
async fn events_to_null_delivers_the_published_payload() {
    let broker = Broker::new();
    let metrics = MetricsStore::new();

    let target_meta = props(&[]);
    let base = targets::build("null", broker.clone(), &target_meta).unwrap();
    let chain = middleware::build_chain(base, &Metadata::empty(), metrics, "b1", "events", "null").unwrap();

    let source_meta = props(&[("channel", "orders")]);
    let source = sources::build("src", "events", broker.clone(), &source_meta).unwrap();

    let binding = Arc::new(Binding::new("b1", "events", vec![chain], vec![source]));
    binding.start().unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    broker.publish_event("orders", Request::new(b"order-1".to_vec()));
    tokio::time::sleep(Duration::from_millis(20)).await;

    binding.stop().await;
}

#[tokio::test]
async fn command_to_command_round_trips_through_the_binding() {
    let broker = Broker::new();
    let metrics = MetricsStore::new();

    let target_meta = props(&[("default_channel", "downstream")]);
    let base = targets::build("command", broker.clone(), &target_meta).unwrap();
    let chain = middleware::build_chain(base, &Metadata::empty(), metrics, "b1", "command", "command").unwrap();

    let source_meta = props(&[("channel", "upstream")]);
    let source = sources::build("src", "command", broker.clone(), &source_meta).unwrap();

    // The downstream responder the command target forwards to.
    let mut downstream = broker.rpc_receiver("downstream").unwrap();
    tokio::spawn(async move {
        let mut call = downstream.recv().await.unwrap();
        let request = call.take_request();
        call.respond(flowbridge::envelope::Response::success(request.data));
    });

    let binding = Arc::new(Binding::new("b1", "command", vec![chain], vec![source]));
    binding.start().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let caller_cancel = tokio_util::sync::CancellationToken::new();
    let response = broker.rpc_send("upstream", Request::new(b"do-it".to_vec()), &caller_cancel).await.unwrap();
    assert_eq!(response.data, b"do-it");

    binding.stop().await;
}

#[tokio::test]
async fn queue_requeues_until_max_requeue_then_drops() {
    let broker = Broker::new();
    let metrics = MetricsStore::new();

    // A null target seeded to always fail, so every delivery is a requeue
    // candidate; `max_requeue = 2` bounds the source to three total attempts
    // (the original delivery plus two requeues).
    let target_meta = props(&[("error", "downstream unavailable")]);
    let base = targets::build("null", broker.clone(), &target_meta).unwrap();
    let chain = middleware::build_chain(base, &Metadata::empty(), metrics, "b1", "queue", "null").unwrap();

    let source_meta = props(&[("channel", "work"), ("sources", "1"), ("max_requeue", "2"), ("wait_timeout", "1")]);
    let source = sources::build("src", "queue", broker.clone(), &source_meta).unwrap();

    broker.queue_push("work", flowbridge::broker::QueueMessage::new(Request::new(b"payload".to_vec())));

    let binding = Arc::new(Binding::new("b1", "queue", vec![chain], vec![source]));
    binding.start().unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    binding.stop().await;

    let cancel = tokio_util::sync::CancellationToken::new();
    let remaining = tokio::time::timeout(Duration::from_millis(50), broker.queue_pop("work", &cancel)).await;
    assert!(remaining.is_err(), "message should have been dropped after exhausting its requeue budget");
}

#[tokio::test]
async fn retry_then_rate_limit_chain_enforces_both_properties() {
    let broker = Broker::new();
    let metrics = MetricsStore::new();

    let target_meta = props(&[]);
    let base = targets::build("null", broker.clone(), &target_meta).unwrap();
    let binding_properties = props(&[
        ("retry_attempts", "2"),
        ("retry_delay_milliseconds", "20"),
        ("rate_per_second", "20"),
    ]);
    let chain = middleware::build_chain(base, &binding_properties, metrics, "b1", "events", "null").unwrap();

    let start = Instant::now();
    for _ in 0..3 {
        let resp = chain.do_call(tokio_util::sync::CancellationToken::new(), Request::new(b"x".to_vec())).await.unwrap();
        assert!(resp.is_success());
    }
    // 3 calls at 20/s should take at least ~100ms (2 intervals of 50ms);
    // the retry link never engages here since the null target never fails.
    assert!(start.elapsed() >= Duration::from_millis(80));
}

#[tokio::test]
async fn reload_never_runs_old_and_new_binding_concurrently() {
    let broker = Broker::new();
    let metrics = MetricsStore::new();
    let service = Arc::new(BindingService::new());

    let make_binding = |name: &str, channel: &str| {
        let target_meta = props(&[]);
        let base = targets::build("null", broker.clone(), &target_meta).unwrap();
        let chain = middleware::build_chain(base, &Metadata::empty(), metrics.clone(), name, "events", "null").unwrap();
        let source_meta = props(&[("channel", channel)]);
        let source = sources::build("src", "events", broker.clone(), &source_meta).unwrap();
        Arc::new(Binding::new(name, "events", vec![chain], vec![source]))
    };

    service.start(vec![make_binding("first", "chan-a")]).unwrap();
    assert_eq!(service.binding_names(), vec!["first".to_string()]);

    service.reload(vec![make_binding("second", "chan-b")]).await.unwrap();
    assert_eq!(service.binding_names(), vec!["second".to_string()]);

    service.stop().await;
}
