//! Cross-module scenarios from spec.md §8 that need more than one
//! module talking over real RPC to exercise: a transmission interrupt
//! actually diverting a committed line end-to-end (S5), coalescing
//! timing (S2), and Proxy fan-out to multiple peers (S6). Everything
//! else covered purely by one module's own state (S1, S3, S4) lives in
//! that module's unit tests instead.
//!
//! All three scenarios here publish real services via
//! [`moxie::discovery::Discovery`], which means a working mDNS
//! multicast path on loopback — the same assumption the whole fabric
//! makes in production.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use moxie::common::{ConsumptionInterrupt, InterruptedConsumption, TransmissionInterrupt};
use moxie::constants::{method, role};
use moxie::consumer::Consumer;
use moxie::controller::editor::EditorState;
use moxie::controller::history::HistoryStore;
use moxie::controller::Controller;
use moxie::discovery::server::{RpcHandler, RpcServer};
use moxie::discovery::Discovery;
use moxie::proxy::{Proxy, ProxyService};

/// Minimal RPC handler that appends every argument it's given (as raw
/// bytes) to a shared buffer, standing in for a Consumer/Subscriber that
/// only cares about "what bytes did I receive" for S6's fan-out
/// invariant.
struct Capture {
    method: &'static str,
    bytes: Mutex<Vec<u8>>,
}

impl Capture {
    fn new(method: &'static str) -> Arc<Self> {
        Arc::new(Self {
            method,
            bytes: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl RpcHandler for Capture {
    async fn dispatch(&self, method: &str, argument: Value) -> Result<Value, String> {
        if method != self.method {
            return Err(format!("unexpected method {method:?}"));
        }
        let chunk: Vec<u8> = serde_json::from_value(argument).map_err(|e| e.to_string())?;
        self.bytes.lock().await.extend_from_slice(&chunk);
        Ok(Value::Null)
    }
}

/// A loopback RPC endpoint for the test callback registrant, collecting
/// every `InterruptorInterruptedConsumption` it is sent.
struct InterruptSink {
    fires: Mutex<Vec<InterruptedConsumption>>,
}

impl InterruptSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fires: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl RpcHandler for InterruptSink {
    async fn dispatch(&self, method: &str, argument: Value) -> Result<Value, String> {
        if method != method::INTERRUPTOR_INTERRUPTED_CONSUMPTION {
            return Err(format!("unexpected method {method:?}"));
        }
        let payload: InterruptedConsumption =
            serde_json::from_value(argument).map_err(|e| e.to_string())?;
        self.fires.lock().await.push(payload);
        Ok(Value::Null)
    }
}

/// A loopback RPC endpoint collecting every
/// `InterruptorInterruptedTransmission` it is sent, used to prove a
/// transmission interrupt actually diverts a committed line (S5).
struct TransmissionSink {
    fires: Mutex<Vec<moxie::common::InterruptedTransmission>>,
}

impl TransmissionSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fires: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl RpcHandler for TransmissionSink {
    async fn dispatch(&self, method: &str, argument: Value) -> Result<Value, String> {
        if method != method::INTERRUPTOR_INTERRUPTED_TRANSMISSION {
            return Err(format!("unexpected method {method:?}"));
        }
        let payload: moxie::common::InterruptedTransmission =
            serde_json::from_value(argument).map_err(|e| e.to_string())?;
        self.fires.lock().await.push(payload);
        Ok(Value::Null)
    }
}

/// S5: a committed line matching an installed transmission interrupt is
/// diverted to the registrant instead of ever reaching a Proxy — there
/// is deliberately no Proxy published in this test, so if the divert
/// didn't happen `commit` would hang retrying `ProxyTransmit` forever
/// and the test would time out instead of completing.
#[tokio::test]
async fn s5_transmission_interrupt_diverts_committed_line() {
    let sink = TransmissionSink::new();
    let sink_server = RpcServer::bind("127.0.0.1:0".parse().unwrap(), sink.clone())
        .await
        .unwrap();
    let sink_addr = sink_server.local_addr;

    let dir = tempfile::tempdir().unwrap();
    let history = HistoryStore::open(&dir.path().join("controller.db")).unwrap();
    let discovery = Arc::new(Discovery::new().expect("mdns daemon"));
    let controller = Controller::new(discovery, history);

    controller
        .install_transmission_interrupt(TransmissionInterrupt {
            name: "divert".into(),
            callback_addr: sink_addr.to_string(),
            pattern: "quit".into(),
            remaining_fires: 1,
        })
        .await
        .unwrap();

    let mut state = EditorState::new();
    for ch in "quit".chars() {
        state.insert(ch);
    }

    tokio::time::timeout(Duration::from_secs(5), controller.commit(&mut state))
        .await
        .expect("commit hung — line was not diverted")
        .unwrap();

    let fires = sink.fires.lock().await;
    assert_eq!(fires.len(), 1);
    assert_eq!(fires[0].name, "divert");
    assert_eq!(fires[0].r#match[0], "quit");
}

/// S2: three chunks fed within 100ms coalesce into a single idle-flush
/// unit. Observed indirectly through a consumption interrupt whose
/// pattern only matches the fully-assembled buffer — if the Consumer
/// flushed each chunk separately, the pattern spanning all three chunks
/// could never match any single flush unit.
#[tokio::test]
async fn s2_coalescing_across_idle_window() {
    let sink = InterruptSink::new();
    let sink_server = RpcServer::bind("127.0.0.1:0".parse().unwrap(), sink.clone())
        .await
        .unwrap();
    let sink_addr = sink_server.local_addr;

    let (consumer, incoming_rx) = Consumer::new();
    consumer
        .install(ConsumptionInterrupt {
            name: "coalesced".into(),
            callback_addr: sink_addr.to_string(),
            pattern: "foobarbaz".into(),
            remaining_fires: 1,
        })
        .await
        .unwrap();

    let run_handle = tokio::spawn({
        let consumer = consumer.clone();
        async move { consumer.run(incoming_rx).await }
    });

    consumer.consume(b"foo".to_vec()).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    consumer.consume(b"bar".to_vec()).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    consumer.consume(b"baz".to_vec()).await;

    // Idle past FLUSH_IDLE (500ms) so the coalesced unit flushes.
    tokio::time::sleep(Duration::from_millis(700)).await;

    let fires = sink.fires.lock().await;
    assert_eq!(fires.len(), 1);
    assert_eq!(fires[0].name, "coalesced");
    assert_eq!(fires[0].content, "foobarbaz");
    drop(fires);

    run_handle.abort();
}

/// S6: a single inbound burst fans out to two Consumers and one
/// Subscriber, each receiving a call set whose concatenated payload
/// equals the original bytes.
#[tokio::test]
async fn s6_proxy_fans_out_to_every_peer() {
    let discovery = Arc::new(Discovery::new().expect("mdns daemon"));

    let consumer_a = Capture::new(method::CONSUMER_CONSUME);
    let consumer_b = Capture::new(method::CONSUMER_CONSUME);
    let subscriber = Capture::new(method::SUBSCRIBER_RECEIVE);

    let _h_a = discovery
        .publish(role::CONSUMER, consumer_a.clone() as Arc<dyn RpcHandler>)
        .await
        .unwrap();
    let _h_b = discovery
        .publish(role::CONSUMER, consumer_b.clone() as Arc<dyn RpcHandler>)
        .await
        .unwrap();
    let _h_s = discovery
        .publish(role::SUBSCRIBER, subscriber.clone() as Arc<dyn RpcHandler>)
        .await
        .unwrap();

    // Let mDNS settle so the Proxy's first lookup sees every peer.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let burst = vec![0x5Au8; 10 * 1024];
    let remote_addr = spawn_one_shot_remote(burst.clone()).await;

    let (proxy, chunk_rx) = Proxy::new(Arc::clone(&discovery));
    proxy.connect(remote_addr).await.unwrap();
    let _proxy_service = Arc::new(ProxyService::new(proxy.clone()));

    let dispatcher = tokio::spawn({
        let proxy = proxy.clone();
        async move { proxy.run_dispatcher(chunk_rx).await }
    });

    // Enough time for every 4KiB read to be re-resolved and fanned out.
    tokio::time::sleep(Duration::from_secs(2)).await;
    dispatcher.abort();

    for capture in [&consumer_a, &consumer_b, &subscriber] {
        let received = capture.bytes.lock().await;
        assert_eq!(
            received.as_slice(),
            burst.as_slice(),
            "{} did not receive the full burst",
            capture.method
        );
    }
}

/// A one-shot TCP listener that writes `payload` to the first connection
/// and then closes, standing in for the remote upstream the Proxy dials.
async fn spawn_one_shot_remote(payload: Vec<u8>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(&payload).await.unwrap();
        stream.flush().await.unwrap();
    });
    addr
}
