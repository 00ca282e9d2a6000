//! The Proxy's RPC surface: `ProxyTransmit` (spec.md §6).

use async_trait::async_trait;
use serde_json::Value;

use crate::discovery::server::RpcHandler;

use super::Proxy;

/// Adapts [`Proxy`] to [`RpcHandler`] so it can be published via
/// [`crate::discovery::Discovery::publish`].
pub struct ProxyService {
    proxy: Proxy,
}

impl ProxyService {
    #[must_use]
    pub fn new(proxy: Proxy) -> Self {
        Self { proxy }
    }
}

#[async_trait]
impl RpcHandler for ProxyService {
    async fn dispatch(&self, method: &str, argument: Value) -> Result<Value, String> {
        match method {
            crate::constants::method::PROXY_TRANSMIT => {
                let line: String = serde_json::from_value(argument).map_err(|e| e.to_string())?;
                self.proxy.transmit(&line).await.map_err(|e| e.to_string())?;
                Ok(Value::Null)
            }
            other => Err(format!("unknown method {other:?} for Proxy")),
        }
    }
}
