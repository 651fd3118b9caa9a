use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;

use super::handler::HandlerAdapter;
use super::*;
use crate::transport::memory::{ConnectionPath, DEFAULT_BROKER_ADDRESS};
use crate::transport::{Consumer, MemoryTransport, RawHandler, RawMessage};
use crate::utils::error::{BoxError, BusError, TransportError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Sum {
    a: i64,
    b: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Total {
    total: i64,
}

/// Adds the operands and counts how often it ran.
#[derive(Clone, Default)]
struct Adder {
    calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Handler for Adder {
    type Body = Sum;
    type Reply = Total;

    async fn handle(&self, message: Message<Sum>) -> Result<Total, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Total {
            total: message.body.a + message.body.b,
        })
    }
}

#[derive(Clone, Default)]
struct Failing {
    calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Handler for Failing {
    type Body = serde_json::Value;
    type Reply = ();

    async fn handle(&self, _message: Message<serde_json::Value>) -> Result<(), BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err("boom".into())
    }
}

fn raw(value: serde_json::Value) -> RawMessage {
    RawMessage::new(serde_json::to_vec(&value).unwrap())
}

fn adapter<H: Handler>(transport: &MemoryTransport, handler: H) -> HandlerAdapter<MemoryTransport, H> {
    HandlerAdapter::new(handler, transport.clone(), EmitterConfig::default())
}

// --- message decoding ---

#[test]
fn test_decode_populates_reply_to_and_body() {
    let msg = Message::<Sum>::decode(raw(json!({"ReplyTo": "replies", "a": 1, "b": 2}))).unwrap();
    assert_eq!(msg.body, Sum { a: 1, b: 2 });
    assert_eq!(msg.reply_to, "replies");
    assert_eq!(msg.reply_to(), Some("replies"));
}

#[test]
fn test_decode_without_reply_to() {
    let msg = Message::<Sum>::decode(raw(json!({"a": 1, "b": 2}))).unwrap();
    assert_eq!(msg.reply_to, "");
    assert_eq!(msg.reply_to(), None);

    let msg = Message::<Sum>::decode(raw(json!({"ReplyTo": null, "a": 1, "b": 2}))).unwrap();
    assert_eq!(msg.reply_to(), None);
}

#[test]
fn test_decode_keeps_raw_message() {
    let original = raw(json!({"a": 1, "b": 2}));
    let msg = Message::<Sum>::decode(original.clone()).unwrap();
    assert_eq!(msg.raw(), &original);
}

#[test]
fn test_decode_rejects_malformed_body() {
    let err = Message::<Sum>::decode(RawMessage::new(b"not json".to_vec())).unwrap_err();
    assert!(matches!(err, BusError::Decode(_)));

    let err = Message::<Sum>::decode(raw(json!({"ReplyTo": "x", "a": 1}))).unwrap_err();
    assert!(matches!(err, BusError::Decode(_)));
}

// --- validation and defaults ---

#[test]
fn test_validation_order() {
    let cfg = ListenerConfig::<Adder>::new("", "").with_handler(Adder::default());
    assert!(matches!(cfg.validate(), Err(BusError::TopicRequired)));

    let cfg = ListenerConfig::<Adder>::new("", "chan");
    assert!(matches!(cfg.validate(), Err(BusError::TopicRequired)));

    let cfg = ListenerConfig::<Adder>::new("topic", "");
    assert!(matches!(cfg.validate(), Err(BusError::ChannelRequired)));

    let cfg = ListenerConfig::<Adder>::new("topic", "chan");
    assert!(matches!(cfg.validate(), Err(BusError::HandlerRequired)));

    let cfg = ListenerConfig::new("topic", "chan").with_handler(Adder::default());
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_defaults_fill_lookup_and_concurrency() {
    let cfg = ListenerConfig::<Adder>::new("t", "c").with_defaults();
    assert_eq!(cfg.lookup, vec![DEFAULT_LOOKUP_ADDRESS.to_string()]);
    assert_eq!(cfg.handler_concurrency, 1);
    assert!(cfg.nsqd.is_empty());
}

#[test]
fn test_defaults_keep_explicit_values() {
    let cfg = ListenerConfig::<Adder>::new("t", "c")
        .with_lookup(["lookupd-1:4161", "lookupd-2:4161"])
        .with_concurrency(8)
        .with_defaults();
    assert_eq!(cfg.lookup, vec!["lookupd-1:4161", "lookupd-2:4161"]);
    assert_eq!(cfg.handler_concurrency, 8);
}

#[test]
fn test_consumer_settings_copied_from_config() {
    let mut cfg = ListenerConfig::<Adder>::new("t", "c");
    cfg.max_attempts = 9;
    cfg.requeue_delay = Duration::from_millis(25);
    cfg.dial_timeout = Duration::from_millis(300);

    let settings = cfg.consumer_settings();
    assert_eq!(settings.max_attempts, 9);
    assert_eq!(settings.requeue_delay, Duration::from_millis(25));
    assert_eq!(settings.dial_timeout, Duration::from_millis(300));
}

#[test]
fn test_debug_does_not_require_debug_handler() {
    let cfg = ListenerConfig::new("t", "c").with_handler(Adder::default());
    let text = format!("{cfg:?}");
    assert!(text.contains("topic: \"t\""));
    assert!(text.contains("Handler"));
}

// --- registration ---

#[tokio::test]
async fn test_register_rejects_invalid_config_without_connecting() {
    let transport = MemoryTransport::new();

    let err = on(&transport, ListenerConfig::<Adder>::new("", "c")).await.unwrap_err();
    assert!(matches!(err, BusError::TopicRequired));

    let err = on(&transport, ListenerConfig::<Adder>::new("t", "")).await.unwrap_err();
    assert!(matches!(err, BusError::ChannelRequired));

    let err = on_sync(&transport, ListenerConfig::<Adder>::new("t", "c"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BusError::HandlerRequired));

    assert!(transport.connections().is_empty());
}

#[tokio::test]
async fn test_register_invalid_config_is_repeatable() {
    let transport = MemoryTransport::new();
    let cfg = ListenerConfig::<Adder>::new("t", "");

    for _ in 0..3 {
        let err = on(&transport, cfg.clone()).await.unwrap_err();
        assert!(matches!(err, BusError::ChannelRequired));
    }
}

#[tokio::test]
async fn test_register_uses_default_lookup() {
    let transport = MemoryTransport::new();
    let cfg = ListenerConfig::new("t", "c").with_handler(Adder::default());

    on(&transport, cfg).await.unwrap();

    let connections = transport.connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(
        connections[0].path,
        ConnectionPath::Lookup(vec![DEFAULT_LOOKUP_ADDRESS.to_string()])
    );
}

#[tokio::test]
async fn test_register_prefers_nsqd_over_lookup() {
    let transport = MemoryTransport::new().with_broker("broker-1:4150");
    let cfg = ListenerConfig::new("t", "c")
        .with_handler(Adder::default())
        .with_lookup(["unknown-lookupd:4161"])
        .with_nsqd(["broker-1:4150"]);

    on(&transport, cfg).await.unwrap();

    let connections = transport.connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(
        connections[0].path,
        ConnectionPath::Brokers(vec!["broker-1:4150".to_string()])
    );
}

#[tokio::test]
async fn test_register_reports_consumer_construction_failure() {
    let transport = MemoryTransport::new();
    let cfg = ListenerConfig::new("bad topic!", "c").with_handler(Adder::default());

    let err = on_sync(&transport, cfg).await.err().unwrap();
    assert!(matches!(
        err,
        BusError::Transport(TransportError::InvalidName(_))
    ));
}

#[tokio::test]
async fn test_on_sync_returns_consumer_on_connection_failure() {
    let transport = MemoryTransport::without_defaults();
    let cfg = ListenerConfig::new("t", "c").with_handler(Adder::default());

    let mut registration = on_sync(&transport, cfg).await.unwrap();
    assert!(!registration.is_connected());
    assert!(matches!(
        registration.connection,
        Err(BusError::Transport(TransportError::Connect { ref addr, .. })) if addr == DEFAULT_LOOKUP_ADDRESS
    ));
    assert!(!registration.consumer.is_connected());

    registration.consumer.stop().await;
}

#[tokio::test]
async fn test_on_returns_connection_error() {
    let transport = MemoryTransport::new();
    let cfg = ListenerConfig::new("t", "c")
        .with_handler(Adder::default())
        .with_nsqd(["nowhere:4150"]);

    let err = on(&transport, cfg).await.unwrap_err();
    assert!(matches!(err, BusError::Transport(TransportError::Connect { .. })));
}

// --- handler adapter ---

#[tokio::test]
async fn test_adapter_without_reply_to_publishes_nothing() {
    let transport = MemoryTransport::new();
    let handler = Adder::default();
    let adapter = adapter(&transport, handler.clone());

    adapter.handle_raw(&raw(json!({"a": 2, "b": 3}))).await.unwrap();

    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    assert!(transport.published().is_empty());
}

#[tokio::test]
async fn test_adapter_publishes_result_to_reply_to() {
    let transport = MemoryTransport::new();
    let adapter = adapter(&transport, Adder::default());

    adapter
        .handle_raw(&raw(json!({"ReplyTo": "replies.topic", "a": 2, "b": 3})))
        .await
        .unwrap();

    let published = transport.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "replies.topic");
    let reply: Total = serde_json::from_slice(&published[0].body).unwrap();
    assert_eq!(reply, Total { total: 5 });
}

#[tokio::test]
async fn test_adapter_decode_failure_skips_handler() {
    let transport = MemoryTransport::new();
    let handler = Adder::default();
    let adapter = adapter(&transport, handler.clone());

    let err = adapter
        .handle_raw(&RawMessage::new(b"{\"ReplyTo\": \"replies\"".to_vec()))
        .await
        .unwrap_err();

    assert!(matches!(err, BusError::Decode(_)));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    assert!(transport.published().is_empty());
}

#[tokio::test]
async fn test_adapter_handler_error_skips_reply() {
    let transport = MemoryTransport::new();
    let handler = Failing::default();
    let adapter = adapter(&transport, handler.clone());

    let err = adapter
        .handle_raw(&raw(json!({"ReplyTo": "replies", "x": 1})))
        .await
        .unwrap_err();

    assert!(matches!(err, BusError::Handler(ref e) if e.to_string() == "boom"));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    assert!(transport.published().is_empty());
}

#[tokio::test]
async fn test_adapter_reports_emitter_failure_after_successful_handler() {
    let transport = MemoryTransport::without_defaults();
    let handler = Adder::default();
    let adapter = adapter(&transport, handler.clone());

    let err = adapter
        .handle_raw(&raw(json!({"ReplyTo": "replies", "a": 1, "b": 1})))
        .await
        .unwrap_err();

    assert!(matches!(err, BusError::Transport(TransportError::Connect { ref addr, .. }) if addr == DEFAULT_BROKER_ADDRESS));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_adapter_reuses_emitter_once_built() {
    let transport = MemoryTransport::new();
    let adapter = adapter(&transport, Adder::default());

    for i in 0..3 {
        adapter
            .handle_raw(&raw(json!({"ReplyTo": "replies", "a": i, "b": 0})))
            .await
            .unwrap();
    }

    assert_eq!(transport.published_to("replies").len(), 3);
}

// --- emitter ---

#[tokio::test]
async fn test_emitter_encodes_payload() {
    let transport = MemoryTransport::new();
    let emitter = Emitter::new(&transport, EmitterConfig::default()).await.unwrap();
    assert_eq!(emitter.producer().address(), DEFAULT_BROKER_ADDRESS);

    emitter.emit("totals", &Total { total: 4 }).await.unwrap();
    emitter.emit_raw("raw", b"plain bytes".to_vec()).await.unwrap();

    let published = transport.published();
    assert_eq!(published[0].body, br#"{"total":4}"#.to_vec());
    assert_eq!(published[1].body, b"plain bytes".to_vec());
}

#[tokio::test]
async fn test_emitter_requires_topic() {
    let transport = MemoryTransport::new();
    let emitter = Emitter::new(&transport, EmitterConfig::default()).await.unwrap();

    let err = emitter.emit("", &json!({})).await.unwrap_err();
    assert!(matches!(err, BusError::TopicRequired));
    assert!(transport.published().is_empty());
}

#[tokio::test]
async fn test_emitter_construction_fails_for_unknown_address() {
    let transport = MemoryTransport::new();
    let config = EmitterConfig {
        address: Some("elsewhere:4150".to_string()),
        ..EmitterConfig::default()
    };

    let err = Emitter::new(&transport, config).await.err().unwrap();
    assert!(matches!(err, BusError::Transport(TransportError::Connect { .. })));
}

#[tokio::test]
async fn test_request_envelope_round_trips_through_message() {
    let transport = MemoryTransport::new();
    let emitter = Emitter::new(&transport, EmitterConfig::default()).await.unwrap();

    emitter.request("sums", "totals", &Sum { a: 1, b: 2 }).await.unwrap();

    let published = transport.published_to("sums");
    let msg = Message::<Sum>::decode(RawMessage::new(published[0].body.clone())).unwrap();
    assert_eq!(msg.body, Sum { a: 1, b: 2 });
    assert_eq!(msg.reply_to(), Some("totals"));

    let err = emitter.request("sums", "totals", &42).await.unwrap_err();
    assert!(matches!(err, BusError::Encode(_)));
}

// --- end to end ---

#[tokio::test]
async fn test_request_reply_end_to_end() {
    let transport = MemoryTransport::new();

    let adder = ListenerConfig::new("sums", "adders")
        .with_handler(Adder::default())
        .with_concurrency(2);
    on(&transport, adder).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel::<i64>();
    let collector = handler_fn(move |msg: Message<Total>| {
        let tx = tx.clone();
        async move {
            tx.send(msg.body.total)?;
            Ok::<_, BoxError>(())
        }
    });
    on(&transport, ListenerConfig::new("totals", "collector").with_handler(collector))
        .await
        .unwrap();

    let emitter = Emitter::new(&transport, EmitterConfig::default()).await.unwrap();
    emitter.request("sums", "totals", &Sum { a: 20, b: 22 }).await.unwrap();

    let total = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no reply received")
        .unwrap();
    assert_eq!(total, 42);
}

#[tokio::test]
async fn test_handler_concurrency_bounds_parallel_invocations() {
    let transport = MemoryTransport::new();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    let handler = {
        let (in_flight, peak, done) = (in_flight.clone(), peak.clone(), done.clone());
        handler_fn(move |_msg: Message<serde_json::Value>| {
            let (in_flight, peak, done) = (in_flight.clone(), peak.clone(), done.clone());
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(())
            }
        })
    };

    let mut registration = on_sync(
        &transport,
        ListenerConfig::new("jobs", "workers")
            .with_handler(handler)
            .with_concurrency(2),
    )
    .await
    .unwrap();
    assert!(registration.is_connected());

    for i in 0..6 {
        transport.publish("jobs", serde_json::to_vec(&json!({"n": i})).unwrap()).unwrap();
    }

    tokio::time::timeout(Duration::from_secs(2), async {
        while done.load(Ordering::SeqCst) < 6 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("jobs did not finish");

    assert!(peak.load(Ordering::SeqCst) <= 2);
    registration.consumer.stop().await;
}

#[test]
fn test_registration_reports_outcome_for_any_handle() {
    let connected = Registration {
        consumer: "handle",
        connection: Ok(()),
    };
    assert!(connected.is_connected());

    let failed = Registration {
        consumer: "handle",
        connection: Err(BusError::Transport(TransportError::NoAddresses)),
    };
    assert!(!failed.is_connected());
}
