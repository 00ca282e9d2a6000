//! The Proxy role (spec.md §4.2): holds the single TCP connection to the
//! remote upstream, pumps bytes out to every Consumer and Subscriber, and
//! accepts line submissions from Controllers.
//!
//! Grounded on the teacher's reader/dispatcher task split
//! (`src/socket/server.rs` spawns an accept loop; here a reader task
//! pushes into a channel a dispatcher task drains) and on
//! `examples/original_source/proxy/proxy.go`, which this module
//! generalizes from explicit `Consume`/`Subscribe` registration RPCs to
//! discovery-resolved fan-out (spec.md's redesign: no central registry).

mod service;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

use crate::constants::{role, CHUNK_CHANNEL_CAPACITY, NO_CONSUMER_BACKOFF, READ_CHUNK_BYTES};
use crate::discovery::Discovery;
use crate::error::Result;

pub use service::ProxyService;

/// The three states spec.md §4.2 names for the Proxy's remote
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProxyState {
    Disconnected = 0,
    Connected = 1,
    Draining = 2,
}

impl From<u8> for ProxyState {
    fn from(value: u8) -> Self {
        match value {
            1 => ProxyState::Connected,
            2 => ProxyState::Draining,
            _ => ProxyState::Disconnected,
        }
    }
}

/// Holds the remote connection and fans bytes out to Consumers and
/// Subscribers. Cloned cheaply (everything behind `Arc`) so the RPC
/// handler ([`ProxyService`]) and the background tasks share one
/// instance.
///
/// The connection is split into owned halves on connect (spec.md §9:
/// "RPC method invocations do not serialize with the reader"): the
/// reader pump owns its half outright, so a `ProxyTransmit` RPC taking
/// [`Proxy::transmit`]'s writer lock never blocks on an in-flight read
/// from an idle remote.
#[derive(Clone)]
pub struct Proxy {
    discovery: Arc<Discovery>,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    chunk_tx: mpsc::Sender<Vec<u8>>,
    state: Arc<AtomicU8>,
}

impl Proxy {
    #[must_use]
    pub fn new(discovery: Arc<Discovery>) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let proxy = Self {
            discovery,
            writer: Arc::new(Mutex::new(None)),
            chunk_tx,
            state: Arc::new(AtomicU8::new(ProxyState::Disconnected as u8)),
        };
        (proxy, chunk_rx)
    }

    #[must_use]
    pub fn state(&self) -> ProxyState {
        ProxyState::from(self.state.load(Ordering::Acquire))
    }

    /// Connect to the remote upstream, replacing any existing
    /// connection, and spawn the reader pump against its own owned read
    /// half. The caller is responsible for separately running
    /// [`Proxy::run_dispatcher`] against the returned receiver.
    pub async fn connect(&self, remote: SocketAddr) -> Result<()> {
        let stream = TcpStream::connect(remote).await?;
        let (read_half, write_half) = stream.into_split();
        {
            let mut guard = self.writer.lock().await;
            *guard = Some(write_half);
        }
        self.state.store(ProxyState::Connected as u8, Ordering::Release);

        let chunk_tx = self.chunk_tx.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move { reader_pump(read_half, chunk_tx, state, remote).await });
        Ok(())
    }

    /// The dispatcher loop (spec.md §4.2): drains the chunk channel,
    /// re-resolving Consumers (with backoff if none are visible) and
    /// Subscribers (best-effort, no backoff) on every chunk.
    pub async fn run_dispatcher(&self, mut chunk_rx: mpsc::Receiver<Vec<u8>>) {
        while let Some(chunk) = chunk_rx.recv().await {
            self.dispatch_chunk(chunk).await;
        }
        // Channel closed (reader dropped its sender after a remote
        // error) and drained: move from Draining to Disconnected.
        self.state
            .store(ProxyState::Disconnected as u8, Ordering::Release);
    }

    async fn dispatch_chunk(&self, chunk: Vec<u8>) {
        let consumers = loop {
            match self.discovery.lookup_all(role::CONSUMER).await {
                Ok(found) if !found.is_empty() => break found,
                _ => {
                    log::debug!("no consumers visible, backing off");
                    tokio::time::sleep(NO_CONSUMER_BACKOFF).await;
                }
            }
        };
        for consumer in &consumers {
            if let Err(e) = consumer
                .call_unit(crate::constants::method::CONSUMER_CONSUME, &chunk)
                .await
            {
                log::warn!("Consume call to {} failed: {e}", consumer.addr);
            }
        }

        if let Ok(subscribers) = self.discovery.lookup_all(role::SUBSCRIBER).await {
            for subscriber in &subscribers {
                if let Err(e) = subscriber
                    .call_unit(crate::constants::method::SUBSCRIBER_RECEIVE, &chunk)
                    .await
                {
                    log::debug!("Receive call to {} failed: {e}", subscriber.addr);
                }
            }
        }
    }

    /// Write `line` to the remote socket, retrying short writes until it
    /// is fully flushed, then echo it to every Subscriber as a
    /// `Transmit` event (spec.md §4.2 "Transmit").
    pub async fn transmit(&self, line: &str) -> Result<()> {
        let bytes = line.as_bytes();
        {
            let mut guard = self.writer.lock().await;
            let writer = guard
                .as_mut()
                .ok_or(crate::error::MoxieError::NoSuchService("remote".into()))?;
            let mut written = 0;
            while written < bytes.len() {
                written += writer.write(&bytes[written..]).await?;
            }
            writer.flush().await?;
        }

        let discovery = Arc::clone(&self.discovery);
        let bytes = bytes.to_vec();
        tokio::spawn(async move {
            if let Ok(subscribers) = discovery.lookup_all(role::SUBSCRIBER).await {
                for subscriber in &subscribers {
                    let _ = subscriber
                        .call_unit(crate::constants::method::SUBSCRIBER_TRANSMIT, &bytes)
                        .await;
                }
            }
        });
        Ok(())
    }

    /// Broadcast a human-readable string to every current Subscriber via
    /// `SubscriberLog` (spec.md §4.2 "Log"). Failures are swallowed.
    pub async fn log_to_subscribers(&self, message: String) {
        if let Ok(subscribers) = self.discovery.lookup_all(role::SUBSCRIBER).await {
            for subscriber in &subscribers {
                let _ = subscriber
                    .call_unit(crate::constants::method::SUBSCRIBER_LOG, &message)
                    .await;
            }
        }
    }
}

async fn reader_pump(
    mut read_half: OwnedReadHalf,
    chunk_tx: mpsc::Sender<Vec<u8>>,
    state: Arc<AtomicU8>,
    remote: SocketAddr,
) {
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        let read = read_half.read(&mut buf).await;
        match read {
            Ok(0) => {
                let _ = chunk_tx
                    .send(format!("Reading from {remote}: connection closed\n").into_bytes())
                    .await;
                break;
            }
            Ok(n) => {
                if chunk_tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = chunk_tx
                    .send(format!("Reading from {remote}: {e}\n").into_bytes())
                    .await;
                break;
            }
        }
    }
    // Remote error is fatal to the connection (spec.md §4.2 "Failure
    // model"): move to Draining. The dispatcher keeps draining the
    // channel until it empties, then falls back to Disconnected itself.
    state.store(ProxyState::Draining as u8, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        assert_eq!(ProxyState::from(0), ProxyState::Disconnected);
        assert_eq!(ProxyState::from(1), ProxyState::Connected);
        assert_eq!(ProxyState::from(2), ProxyState::Draining);
    }
}
