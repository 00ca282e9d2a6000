//! The discovery-and-invocation substrate (spec.md §4.1, §4.6).
//!
//! This is the only long-lived reference holder in the system (spec.md
//! §9: "cyclic ownership among roles ... is broken by making Discovery
//! the only long-lived reference holder"). Every role keeps only service
//! *names*, resolves [`Endpoint`]s lazily through [`Discovery`], and
//! treats any call failure as "the peer is gone" rather than retrying
//! the same endpoint.
//!
//! Realized on top of `mdns-sd` (publish/browse) plus the length-prefixed
//! JSON-RPC substrate in [`server`] and [`wire`]. The structural split
//! between a caller-facing handle and a resolver that owns the live peer
//! map is grounded on
//! `examples/other_examples/..._conduit__proxy-src-control-discovery.rs.rs`,
//! a discovery layer inside a proxy control plane with the same
//! resolve-a-name-to-many-peers shape.

pub mod server;
pub mod wire;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;

use crate::error::{MoxieError, Result};
use server::{RpcHandler, RpcServer};
use wire::{read_frame, write_frame, CallFrame, ReplyFrame};

/// How long [`Discovery::lookup_all`] waits for mDNS responders before
/// returning whatever it has collected. Short, because the dispatcher
/// (spec.md §4.2) re-resolves on every chunk and is itself responsible
/// for backing off when nothing is visible.
const BROWSE_WINDOW: Duration = Duration::from_millis(300);

/// A callable peer: an opaque `(host, port)` plus the means to call it
/// (spec.md §3, "Endpoint"). Produced by [`Discovery`]; a call failure
/// means the owner is gone — callers never retry the same `Endpoint`,
/// they re-resolve instead.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub addr: SocketAddr,
}

impl Endpoint {
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Resolve a raw `"host:port"` address into a callable endpoint
    /// without going through mDNS (spec.md §4.1 `Connect`). This is the
    /// free-function form of [`Discovery::connect`], usable by roles
    /// (the Consumer, resolving an interrupt's `callback_addr`) that
    /// never need to *browse*, only to dial an address a peer already
    /// handed them.
    pub fn from_addr_str(addr: &str) -> Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| MoxieError::NoSuchService(addr.to_string()))?;
        Ok(Self::new(addr))
    }

    /// Invoke `method` with `argument`, deserializing the reply as `O`
    /// (spec.md §4.1: "`Call(methodName, argument, out) -> error`").
    pub async fn call<A, O>(&self, method: &str, argument: &A) -> Result<O>
    where
        A: Serialize + Sync,
        O: DeserializeOwned,
    {
        let mut stream = TcpStream::connect(self.addr).await?;
        let frame = CallFrame {
            method: method.to_string(),
            argument: serde_json::to_value(argument)
                .map_err(|e| MoxieError::FatalIo(e.to_string()))?,
        };
        write_frame(&mut stream, &frame).await?;
        let reply: ReplyFrame = read_frame(&mut stream).await?;
        match reply {
            ReplyFrame::Ok(value) => {
                serde_json::from_value(value).map_err(|e| MoxieError::FatalIo(e.to_string()))
            }
            ReplyFrame::Err(message) => Err(MoxieError::Transport(std::io::Error::new(
                std::io::ErrorKind::Other,
                message,
            ))),
        }
    }

    /// Convenience for calls whose reply carries no meaningful payload.
    pub async fn call_unit<A>(&self, method: &str, argument: &A) -> Result<()>
    where
        A: Serialize + Sync,
    {
        self.call::<A, serde_json::Value>(method, argument)
            .await
            .map(|_| ())
    }
}

/// Handle returned by [`Discovery::publish`]. Keeps the mDNS
/// advertisement and the backing [`RpcServer`] alive; dropping it
/// unpublishes implicitly, but [`Handle::wait`] is the blocking form
/// spec.md §4.1 describes ("`Wait()` returns when advertisement ends").
pub struct Handle {
    daemon: ServiceDaemon,
    fullname: String,
    server: RpcServer,
    stop_rx: tokio::sync::oneshot::Receiver<()>,
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl Handle {
    /// The address the advertised RPC server is actually listening on.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr
    }

    /// Block (asynchronously) until the advertisement is explicitly
    /// ended via [`Handle::unpublish`] or the handle is dropped.
    pub async fn wait(&mut self) {
        let _ = (&mut self.stop_rx).await;
    }

    /// End the advertisement: unregister from mDNS and unblock any
    /// pending [`Handle::wait`].
    pub fn unpublish(mut self) {
        let _ = self.daemon.unregister(&self.fullname);
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// The discovery contract (spec.md §4.1): publish a handler under a
/// service name, resolve a name to zero or more peers, or connect
/// directly to a raw address handed to us by a peer (e.g. an
/// interrupt-callback address).
#[derive(Clone)]
pub struct Discovery {
    daemon: ServiceDaemon,
}

impl Discovery {
    pub fn new() -> Result<Self> {
        let daemon =
            ServiceDaemon::new().map_err(|e| MoxieError::FatalIo(format!("mDNS init: {e}")))?;
        Ok(Self { daemon })
    }

    /// Advertise `handler` as an instance of `service_name`
    /// (spec.md §4.1 `Publish`). Binds an ephemeral RPC listener and
    /// registers it via mDNS with a `role` TXT record so
    /// [`Discovery::lookup_all`] can filter by role.
    pub async fn publish(
        &self,
        service_name: &str,
        handler: Arc<dyn RpcHandler>,
    ) -> Result<Handle> {
        let bind_addr: SocketAddr = "0.0.0.0:0".parse().expect("valid bind address");
        let server = RpcServer::bind(bind_addr, handler)
            .await
            .map_err(|e| MoxieError::FatalIo(e.to_string()))?;

        let host = local_ip().unwrap_or_else(|| "127.0.0.1".to_string());
        let instance_name = format!("{service_name}-{}", uuid::Uuid::new_v4());
        let info = ServiceInfo::new(
            crate::constants::SERVICE_TYPE,
            &instance_name,
            &format!("{host}.local."),
            &host,
            server.local_addr.port(),
            &[("role", service_name)][..],
        )
        .map_err(|e| MoxieError::FatalIo(format!("mDNS service info: {e}")))?;
        let fullname = info.get_fullname().to_string();

        self.daemon
            .register(info)
            .map_err(|e| MoxieError::FatalIo(format!("mDNS register: {e}")))?;
        log::info!("published {service_name} at {}", server.local_addr);

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
        Ok(Handle {
            daemon: self.daemon.clone(),
            fullname,
            server,
            stop_rx,
            stop_tx: Some(stop_tx),
        })
    }

    /// Resolve every currently-visible instance of `service_name`
    /// (spec.md §4.1 `LookupAll`). May return an empty vector; that is
    /// legal (e.g. "no subscribers").
    pub async fn lookup_all(&self, service_name: &str) -> Result<Vec<Endpoint>> {
        let receiver = self
            .daemon
            .browse(crate::constants::SERVICE_TYPE)
            .map_err(|e| MoxieError::FatalIo(format!("mDNS browse: {e}")))?;

        let mut endpoints = Vec::new();
        let deadline = tokio::time::Instant::now() + BROWSE_WINDOW;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, receiver.recv_async()).await {
                Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                    let matches_role = info
                        .get_property_val_str("role")
                        .is_some_and(|role| role == service_name);
                    if !matches_role {
                        continue;
                    }
                    for ip in info.get_addresses() {
                        endpoints.push(Endpoint::new(SocketAddr::new(*ip, info.get_port())));
                    }
                }
                Ok(Ok(_)) => continue,
                Ok(Err(_)) | Err(_) => break,
            }
        }
        let _ = self.daemon.stop_browse(crate::constants::SERVICE_TYPE);
        Ok(endpoints)
    }

    /// Convenience: the first visible instance, or
    /// [`MoxieError::NoSuchService`] if none are (spec.md §4.1
    /// `LookupOne`).
    pub async fn lookup_one(&self, service_name: &str) -> Result<Endpoint> {
        self.lookup_all(service_name)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| MoxieError::NoSuchService(service_name.to_string()))
    }

    /// Resolve a raw address given by a peer (e.g. an interrupt callback
    /// address) into a callable endpoint (spec.md §4.1 `Connect`). No
    /// discovery round-trip is needed since the address is already
    /// known.
    pub fn connect(&self, addr: &str) -> Result<Endpoint> {
        Endpoint::from_addr_str(addr)
    }
}

/// Best-effort local IPv4 address to advertise, by opening a UDP socket
/// toward a public address without sending anything (the usual
/// no-dependency trick for "what's my LAN-facing IP").
fn local_ip() -> Option<String> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|a| a.ip().to_string())
}
