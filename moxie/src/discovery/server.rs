//! The RPC server substrate every role binds.
//!
//! One TCP listener, one accept loop, one short-lived task per inbound
//! call (spec.md §5: "Proxy: ... one task per inbound RPC (short-lived)"
//! — the same shape applies to every role's server side). Grounded on
//! the teacher's `src/socket/server.rs` accept-loop structure.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::wire::{read_frame, write_frame, CallFrame, ReplyFrame};

/// Routes an inbound call, by method name, to whatever local state the
/// role needs to mutate. Implementations typically match on `method` and
/// deserialize `argument` into the concrete type that RPC expects
/// (spec.md §6 fixes the method-name-to-argument-type table; this trait
/// is the dynamic-dispatch seam spec.md §9 asks implementations to route
/// through rather than reflection).
#[async_trait::async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    async fn dispatch(&self, method: &str, argument: Value) -> Result<Value, String>;
}

/// A bound RPC server. Dropping it does not stop the accept loop; call
/// [`RpcServer::handle`] and abort it explicitly if that's needed, the
/// same lifetime discipline the teacher's `SocketServer` uses.
#[derive(Debug)]
pub struct RpcServer {
    pub local_addr: SocketAddr,
    accept_handle: JoinHandle<()>,
}

impl RpcServer {
    /// Bind `bind_addr` (use port 0 to let the OS choose) and spawn the
    /// accept loop.
    pub async fn bind(bind_addr: SocketAddr, handler: Arc<dyn RpcHandler>) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind RPC listener on {bind_addr}"))?;
        let local_addr = listener.local_addr()?;
        log::info!("RPC server listening on {local_addr}");
        let accept_handle = tokio::spawn(accept_loop(listener, handler));
        Ok(Self {
            local_addr,
            accept_handle,
        })
    }

    /// A handle to the accept loop task, for tests that want to abort it
    /// deterministically rather than leaking it for the process lifetime.
    #[must_use]
    pub fn handle(&self) -> &JoinHandle<()> {
        &self.accept_handle
    }
}

async fn accept_loop(listener: TcpListener, handler: Arc<dyn RpcHandler>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, handler).await {
                        log::debug!("RPC connection from {peer} ended: {e}");
                    }
                });
            }
            Err(e) => {
                log::warn!("RPC accept failed: {e}");
            }
        }
    }
}

async fn serve_connection(mut stream: TcpStream, handler: Arc<dyn RpcHandler>) -> Result<()> {
    let call: CallFrame = read_frame(&mut stream).await?;
    let reply = match handler.dispatch(&call.method, call.argument).await {
        Ok(value) => ReplyFrame::Ok(value),
        Err(message) => ReplyFrame::Err(message),
    };
    write_frame(&mut stream, &reply).await?;
    Ok(())
}
