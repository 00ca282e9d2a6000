//! The scripting facade (spec.md §4.5): a per-process singleton that
//! registers regex-keyed callbacks against a running moxie fabric and
//! serves as both a Subscriber and the callback target for
//! `InterruptorInterruptedConsumption`/`InterruptorInterruptedTransmission`.
//!
//! Grounded on `moxie::consumer::Consumer`'s excision loop for the
//! receive-hook evaluation (same rescan-after-excise shape), generalized
//! per spec.md §4.5 so the lock is dropped for the duration of the user
//! callback rather than held across it — a script callback is local
//! code, not an RPC, so there is no reason to hold the table hostage
//! while it runs, and every reason not to (a callback that itself
//! registers a hook would otherwise deadlock on the same lock).
//!
//! The per-process singleton (spec.md §9 "Global singletons") is a
//! `OnceLock<Arc<ScriptHandler>>`; [`ScriptHandler::new_for_test`] gives
//! tests an explicit injection path instead of reaching through the
//! global.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use moxie::common::{Compiled, ConsumptionInterrupt, InterruptedConsumption, InterruptedTransmission, TransmissionInterrupt};
use moxie::constants::{method, role};
use moxie::discovery::server::RpcHandler;
use moxie::discovery::{Discovery, Handle};
use moxie::error::Result;

type ConsumptionCallback = Arc<dyn Fn(String) + Send + Sync>;
type TransmissionCallback = Arc<dyn Fn(Vec<String>) + Send + Sync>;
type ReceiveCallback = Arc<dyn Fn(String) + Send + Sync>;

struct Hook<F> {
    compiled: Compiled,
    /// `0` means unlimited, matching [`ConsumptionInterrupt::remaining_fires`].
    remaining: u32,
    callback: F,
}

/// The scripting handler (spec.md §4.5). Publishes itself lazily, on the
/// first hook registration of any kind.
pub struct ScriptHandler {
    discovery: Arc<Discovery>,
    handle: Mutex<Option<Handle>>,
    consumption: Mutex<HashMap<String, Hook<ConsumptionCallback>>>,
    transmission: Mutex<HashMap<String, Hook<TransmissionCallback>>>,
    receive_hooks: Mutex<HashMap<String, Hook<ReceiveCallback>>>,
}

impl ScriptHandler {
    #[must_use]
    pub fn new(discovery: Arc<Discovery>) -> Self {
        Self {
            discovery,
            handle: Mutex::new(None),
            consumption: Mutex::new(HashMap::new()),
            transmission: Mutex::new(HashMap::new()),
            receive_hooks: Mutex::new(HashMap::new()),
        }
    }

    /// Construct a standalone handler for tests, bypassing the process
    /// singleton (spec.md §9: "tests should allow an explicit injection
    /// path").
    pub fn new_for_test() -> Result<Arc<Self>> {
        Ok(Arc::new(Self::new(Arc::new(Discovery::new()?))))
    }

    /// Publish as a Subscriber on first use; idempotent (spec.md §4.5
    /// registration step 2). Returns the address remote peers should
    /// call back on.
    async fn ensure_published(self: &Arc<Self>) -> Result<SocketAddr> {
        let mut guard = self.handle.lock().await;
        if guard.is_none() {
            let rpc_handler: Arc<dyn RpcHandler> = Arc::clone(self) as Arc<dyn RpcHandler>;
            let handle = self.discovery.publish(role::SUBSCRIBER, rpc_handler).await?;
            *guard = Some(handle);
        }
        Ok(guard.as_ref().expect("just published").local_addr())
    }

    /// `Transmit` (spec.md §4.5): send one line to whichever Proxy is
    /// visible right now.
    pub async fn transmit(self: &Arc<Self>, line: &str) -> Result<()> {
        let proxy = self.discovery.lookup_one(role::PROXY).await?;
        proxy.call_unit(method::PROXY_TRANSMIT, &format!("{line}\n")).await
    }

    /// `TransmitMany`: transmit each line in order, stopping at the
    /// first failure.
    pub async fn transmit_many(self: &Arc<Self>, lines: &[&str]) -> Result<()> {
        for line in lines {
            self.transmit(line).await?;
        }
        Ok(())
    }

    /// `InterruptConsumptionN` (spec.md §4.5 registration flow): install
    /// a consumption callback firing at most `times` times (`0` =
    /// unlimited) across every currently visible Consumer.
    pub async fn interrupt_consumption_n(
        self: &Arc<Self>,
        name: &str,
        pattern: &str,
        times: u32,
        callback: impl Fn(String) + Send + Sync + 'static,
    ) -> Result<()> {
        let compiled = Compiled::new(pattern)?;
        {
            let mut table = self.consumption.lock().await;
            table.insert(
                name.to_string(),
                Hook {
                    compiled,
                    remaining: times,
                    callback: Arc::new(callback),
                },
            );
        }

        let callback_addr = self.ensure_published().await?.to_string();
        let interrupt = ConsumptionInterrupt {
            name: name.to_string(),
            callback_addr,
            pattern: pattern.to_string(),
            remaining_fires: times,
        };
        for consumer in self.discovery.lookup_all(role::CONSUMER).await? {
            if let Err(e) = consumer
                .call_unit(method::CONSUMER_INTERRUPT_CONSUMPTION, &interrupt)
                .await
            {
                log::warn!("ConsumerInterruptConsumption install failed: {e}");
            }
        }
        Ok(())
    }

    /// `InterruptConsumption`: unlimited fires.
    pub async fn interrupt_consumption(
        self: &Arc<Self>,
        name: &str,
        pattern: &str,
        callback: impl Fn(String) + Send + Sync + 'static,
    ) -> Result<()> {
        self.interrupt_consumption_n(name, pattern, 0, callback).await
    }

    /// `InterruptConsumptionOnce`: fires exactly once, then unregisters.
    pub async fn interrupt_consumption_once(
        self: &Arc<Self>,
        name: &str,
        pattern: &str,
        callback: impl Fn(String) + Send + Sync + 'static,
    ) -> Result<()> {
        self.interrupt_consumption_n(name, pattern, 1, callback).await
    }

    /// `InterruptTransmission` (spec.md §4.5): install a transmission
    /// callback, unlimited fires, across every currently visible
    /// Controller.
    pub async fn interrupt_transmission(
        self: &Arc<Self>,
        name: &str,
        pattern: &str,
        callback: impl Fn(Vec<String>) + Send + Sync + 'static,
    ) -> Result<()> {
        let compiled = Compiled::new(pattern)?;
        {
            let mut table = self.transmission.lock().await;
            table.insert(
                name.to_string(),
                Hook {
                    compiled,
                    remaining: 0,
                    callback: Arc::new(callback),
                },
            );
        }

        let callback_addr = self.ensure_published().await?.to_string();
        let interrupt = TransmissionInterrupt {
            name: name.to_string(),
            callback_addr,
            pattern: pattern.to_string(),
            remaining_fires: 0,
        };
        for controller in self.discovery.lookup_all(role::CONTROLLER).await? {
            if let Err(e) = controller
                .call_unit(method::CONTROLLER_INTERRUPT_TRANSMISSION, &interrupt)
                .await
            {
                log::warn!("ControllerInterruptTransmission install failed: {e}");
            }
        }
        Ok(())
    }

    /// `ReceiveHookN`: install a local receive-hook firing at most
    /// `times` times (`0` = unlimited). No round trip is needed — the
    /// handler evaluates `SubscriberReceive` locally once it is
    /// published.
    pub async fn receive_hook_n(
        self: &Arc<Self>,
        name: &str,
        pattern: &str,
        times: u32,
        callback: impl Fn(String) + Send + Sync + 'static,
    ) -> Result<()> {
        let compiled = Compiled::new(pattern)?;
        {
            let mut table = self.receive_hooks.lock().await;
            table.insert(
                name.to_string(),
                Hook {
                    compiled,
                    remaining: times,
                    callback: Arc::new(callback),
                },
            );
        }
        self.ensure_published().await?;
        Ok(())
    }

    pub async fn receive_hook(
        self: &Arc<Self>,
        name: &str,
        pattern: &str,
        callback: impl Fn(String) + Send + Sync + 'static,
    ) -> Result<()> {
        self.receive_hook_n(name, pattern, 0, callback).await
    }

    pub async fn receive_hook_once(
        self: &Arc<Self>,
        name: &str,
        pattern: &str,
        callback: impl Fn(String) + Send + Sync + 'static,
    ) -> Result<()> {
        self.receive_hook_n(name, pattern, 1, callback).await
    }

    /// `Wait` (spec.md §4.5): block the caller indefinitely so a
    /// resident script keeps consuming events.
    pub async fn wait(self: &Arc<Self>) {
        std::future::pending::<()>().await;
    }

    /// Evaluate one `SubscriberReceive` chunk against the local
    /// receive-hook table (spec.md §4.5 "Receive-hook semantics
    /// (local)"). The table lock is held only while scanning for a
    /// match and while updating `remaining`/removing an exhausted hook
    /// — never while the callback itself runs.
    async fn evaluate_receive(&self, bytes: Vec<u8>) {
        let mut text = String::from_utf8_lossy(&bytes).into_owned();
        loop {
            let matched = {
                let table = self.receive_hooks.lock().await;
                table.iter().find_map(|(name, hook)| {
                    hook.compiled
                        .find(&text)
                        .map(|m| (name.clone(), m, hook.remaining, Arc::clone(&hook.callback)))
                })
            };

            let Some((name, found, remaining, callback)) = matched else {
                return;
            };

            {
                let mut table = self.receive_hooks.lock().await;
                if remaining > 0 {
                    let remaining = remaining - 1;
                    if remaining == 0 {
                        table.remove(&name);
                    } else if let Some(hook) = table.get_mut(&name) {
                        hook.remaining = remaining;
                    }
                }
            }

            callback(found.content);
            // Recursively re-submit before+after as a fresh Receive so
            // chained hooks can fire on the excised remainder (spec.md
            // §4.5).
            text = format!("{}{}", found.before, found.after);
        }
    }

    async fn fire_consumption(&self, payload: InterruptedConsumption) -> std::result::Result<(), String> {
        let entry = {
            let mut table = self.consumption.lock().await;
            let Some(hook) = table.get_mut(&payload.name) else {
                return Err(format!("no callback registered under name {:?}", payload.name));
            };
            let callback = Arc::clone(&hook.callback);
            if hook.remaining > 0 {
                hook.remaining -= 1;
                if hook.remaining == 0 {
                    table.remove(&payload.name);
                }
            }
            callback
        };
        entry(payload.content);
        Ok(())
    }

    async fn fire_transmission(&self, payload: InterruptedTransmission) -> std::result::Result<(), String> {
        let entry = {
            let mut table = self.transmission.lock().await;
            let Some(hook) = table.get_mut(&payload.name) else {
                return Err(format!("no callback registered under name {:?}", payload.name));
            };
            let callback = Arc::clone(&hook.callback);
            if hook.remaining > 0 {
                hook.remaining -= 1;
                if hook.remaining == 0 {
                    table.remove(&payload.name);
                }
            }
            callback
        };
        entry(payload.r#match);
        Ok(())
    }
}

#[async_trait]
impl RpcHandler for ScriptHandler {
    async fn dispatch(&self, method_name: &str, argument: Value) -> std::result::Result<Value, String> {
        match method_name {
            method::SUBSCRIBER_RECEIVE => {
                let bytes: Vec<u8> = serde_json::from_value(argument).map_err(|e| e.to_string())?;
                self.evaluate_receive(bytes).await;
                Ok(Value::Null)
            }
            method::SUBSCRIBER_TRANSMIT | method::SUBSCRIBER_LOG => Ok(Value::Null),
            method::INTERRUPTOR_INTERRUPTED_CONSUMPTION => {
                let payload: InterruptedConsumption =
                    serde_json::from_value(argument).map_err(|e| e.to_string())?;
                self.fire_consumption(payload).await?;
                Ok(Value::Null)
            }
            method::INTERRUPTOR_INTERRUPTED_TRANSMISSION => {
                let payload: InterruptedTransmission =
                    serde_json::from_value(argument).map_err(|e| e.to_string())?;
                self.fire_transmission(payload).await?;
                Ok(Value::Null)
            }
            other => Err(format!("unknown method {other:?} for scripting handler")),
        }
    }
}

fn global() -> &'static Arc<ScriptHandler> {
    static HANDLER: OnceLock<Arc<ScriptHandler>> = OnceLock::new();
    HANDLER.get_or_init(|| {
        let discovery = Discovery::new().expect("mdns daemon init for scripting handler");
        Arc::new(ScriptHandler::new(Arc::new(discovery)))
    })
}

pub async fn transmit(line: &str) -> Result<()> {
    global().transmit(line).await
}

pub async fn transmit_many(lines: &[&str]) -> Result<()> {
    global().transmit_many(lines).await
}

pub async fn interrupt_consumption(
    name: &str,
    pattern: &str,
    callback: impl Fn(String) + Send + Sync + 'static,
) -> Result<()> {
    global().interrupt_consumption(name, pattern, callback).await
}

pub async fn interrupt_consumption_n(
    name: &str,
    pattern: &str,
    times: u32,
    callback: impl Fn(String) + Send + Sync + 'static,
) -> Result<()> {
    global().interrupt_consumption_n(name, pattern, times, callback).await
}

pub async fn interrupt_consumption_once(
    name: &str,
    pattern: &str,
    callback: impl Fn(String) + Send + Sync + 'static,
) -> Result<()> {
    global().interrupt_consumption_once(name, pattern, callback).await
}

pub async fn interrupt_transmission(
    name: &str,
    pattern: &str,
    callback: impl Fn(Vec<String>) + Send + Sync + 'static,
) -> Result<()> {
    global().interrupt_transmission(name, pattern, callback).await
}

pub async fn receive_hook(
    name: &str,
    pattern: &str,
    callback: impl Fn(String) + Send + Sync + 'static,
) -> Result<()> {
    global().receive_hook(name, pattern, callback).await
}

pub async fn receive_hook_n(
    name: &str,
    pattern: &str,
    times: u32,
    callback: impl Fn(String) + Send + Sync + 'static,
) -> Result<()> {
    global().receive_hook_n(name, pattern, times, callback).await
}

pub async fn receive_hook_once(
    name: &str,
    pattern: &str,
    callback: impl Fn(String) + Send + Sync + 'static,
) -> Result<()> {
    global().receive_hook_once(name, pattern, callback).await
}

pub async fn wait() {
    global().wait().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn receive_hook_fires_and_recurses_on_residual() {
        let handler = ScriptHandler::new_for_test().unwrap();
        let first_hits = Arc::new(AtomicU32::new(0));
        let second_hits = Arc::new(AtomicU32::new(0));

        {
            let hits = Arc::clone(&first_hits);
            handler
                .receive_hook("alpha", "ALPHA", move |_content| {
                    hits.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
        }
        {
            let hits = Arc::clone(&second_hits);
            handler
                .receive_hook("beta", "BETA", move |_content| {
                    hits.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
        }

        handler.evaluate_receive(b"xxALPHAyyBETAzz".to_vec()).await;

        assert_eq!(first_hits.load(Ordering::SeqCst), 1);
        assert_eq!(second_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn receive_hook_once_unregisters_after_one_fire() {
        let handler = ScriptHandler::new_for_test().unwrap();
        handler
            .receive_hook_once("quit", "QUIT", |_content| {})
            .await
            .unwrap();
        handler.evaluate_receive(b"QUIT".to_vec()).await;
        let table = handler.receive_hooks.lock().await;
        assert!(!table.contains_key("quit"));
    }

    #[tokio::test]
    async fn fire_consumption_missing_name_is_error() {
        let handler = ScriptHandler::new_for_test().unwrap();
        let err = handler
            .fire_consumption(InterruptedConsumption {
                name: "ghost".into(),
                content: "x".into(),
            })
            .await
            .unwrap_err();
        assert!(err.contains("ghost"));
    }

    #[tokio::test]
    async fn fire_transmission_invokes_registered_callback() {
        let handler = ScriptHandler::new_for_test().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            let mut table = handler.transmission.lock().await;
            table.insert(
                "p".to_string(),
                Hook {
                    compiled: Compiled::new("p").unwrap(),
                    remaining: 0,
                    callback: Arc::new(move |m: Vec<String>| {
                        let seen = Arc::clone(&seen);
                        tokio::spawn(async move {
                            seen.lock().await.extend(m);
                        });
                    }),
                },
            );
        }
        handler
            .fire_transmission(InterruptedTransmission {
                name: "p".into(),
                r#match: vec!["whole".into(), "a".into()],
            })
            .await
            .unwrap();
    }
}
