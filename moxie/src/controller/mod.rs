//! The Controller role (spec.md §4.4): the interactive terminal line
//! editor. Owns the edit buffer/cursor, the transmission-interrupt
//! table, the persistent history store and the completion trie.
//!
//! The RPC-facing and rendering concerns are split out
//! ([`service`], [`render`]) so this module stays focused on the commit
//! pipeline and Subscriber duties, mirroring the teacher's separation of
//! `hub/state.rs` (owned state + mutating methods) from
//! `hub/server_comms.rs` (the wire-facing adapter).

pub mod editor;
pub mod history;
mod render;
mod service;
pub mod trie;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;

use crate::common::{Compiled, InterruptedTransmission, TransmissionInterrupt};
use crate::constants::{method, role, TRANSMIT_RETRY_DELAY};
use crate::discovery::{Discovery, Endpoint};
use crate::error::Result;

use editor::{completion_tokens, EditorState};
use history::HistoryStore;
use trie::Trie;

pub use render::run_editor;
pub use service::ControllerService;

struct Installed {
    interrupt: TransmissionInterrupt,
    compiled: Compiled,
}

/// Owns the Controller's persistent and in-memory state: history store,
/// completion trie, and installed transmission interrupts. Cloned
/// cheaply; shared between the editor loop and the RPC server.
#[derive(Clone)]
pub struct Controller {
    discovery: Arc<Discovery>,
    history: HistoryStore,
    trie: Arc<StdMutex<Trie>>,
    transmission_interrupts: Arc<Mutex<HashMap<String, Installed>>>,
}

impl Controller {
    pub fn new(discovery: Arc<Discovery>, history: HistoryStore) -> Self {
        Self {
            discovery,
            history,
            trie: Arc::new(StdMutex::new(Trie::new())),
            transmission_interrupts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    #[must_use]
    pub fn trie(&self) -> Arc<StdMutex<Trie>> {
        Arc::clone(&self.trie)
    }

    /// `ControllerInterruptTransmission` (spec.md §6): compile and
    /// install/overwrite by name.
    pub async fn install_transmission_interrupt(
        &self,
        interrupt: TransmissionInterrupt,
    ) -> Result<()> {
        let compiled = Compiled::new(&interrupt.pattern)?;
        let mut table = self.transmission_interrupts.lock().await;
        table.insert(interrupt.name.clone(), Installed { interrupt, compiled });
        Ok(())
    }

    /// `SubscriberReceive` (spec.md §4.4 "Subscriber duties"): split on
    /// non-word runs and insert every token ≥ 4 bytes into the trie.
    pub fn subscriber_receive(&self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        let mut trie = self.trie.lock().expect("trie lock poisoned");
        for token in completion_tokens(&text) {
            trie.insert(token);
        }
    }

    /// Commit the current buffer (spec.md §4.4 "Commit (Enter in
    /// regular mode)"). No-op if the buffer is empty. Evaluates
    /// transmission interrupts first; if any fires, the line is
    /// diverted and never reaches the Proxy. Otherwise it is sent with
    /// an indefinite 0.5s retry, then recorded in history and tokenized
    /// into the trie.
    pub async fn commit(&self, state: &mut EditorState) -> Result<()> {
        let line = state.buffer();
        if line.is_empty() {
            return Ok(());
        }

        let diverted = self.evaluate_transmission_interrupts(&line).await;

        if !diverted {
            self.transmit_with_retry(&line).await;
        }

        let nanos = now_nanos();
        self.history
            .put(nanos, &line)
            .map_err(|e| crate::error::MoxieError::FatalIo(e.to_string()))?;

        {
            let mut trie = self.trie.lock().expect("trie lock poisoned");
            for token in completion_tokens(&line) {
                trie.insert(token);
            }
        }

        state.clear();
        Ok(())
    }

    /// spec.md §4.4 commit step 3: retry `ProxyTransmit` every 0.5s
    /// until it succeeds. There may be no Proxy at the instant of
    /// Enter — lines are never lost locally (spec.md §7).
    async fn transmit_with_retry(&self, line: &str) {
        let payload = format!("{line}\n");
        loop {
            let attempt = async {
                let proxy = self.discovery.lookup_one(role::PROXY).await?;
                proxy.call_unit(method::PROXY_TRANSMIT, &payload).await
            };
            if attempt.await.is_ok() {
                return;
            }
            tokio::time::sleep(TRANSMIT_RETRY_DELAY).await;
        }
    }

    /// spec.md §4.4 commit step 2: each match's whole submatch vector is
    /// sent to its registrant. If any interrupt call succeeds, the line
    /// is diverted. Fired interrupts still decrement/unregister per
    /// `remainingFires`, same as consumption interrupts.
    async fn evaluate_transmission_interrupts(&self, line: &str) -> bool {
        let mut table = self.transmission_interrupts.lock().await;
        let mut diverted = false;
        let mut exhausted = Vec::new();

        for (name, installed) in table.iter_mut() {
            let Some(submatches) = installed.compiled.find_submatches(line) else {
                continue;
            };
            let payload = InterruptedTransmission {
                name: name.clone(),
                r#match: submatches,
            };
            let Ok(endpoint) = Endpoint::from_addr_str(&installed.interrupt.callback_addr) else {
                continue;
            };
            if endpoint
                .call_unit(method::INTERRUPTOR_INTERRUPTED_TRANSMISSION, &payload)
                .await
                .is_ok()
            {
                diverted = true;
                if installed.interrupt.remaining_fires > 0 {
                    installed.interrupt.remaining_fires -= 1;
                    if installed.interrupt.remaining_fires == 0 {
                        exhausted.push(name.clone());
                    }
                }
            }
        }

        for name in exhausted {
            table.remove(&name);
        }
        diverted
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_controller() -> (tempfile::TempDir, Controller) {
        let dir = tempfile::tempdir().unwrap();
        let history = HistoryStore::open(&dir.path().join("controller.db")).unwrap();
        let discovery = Arc::new(Discovery::new().expect("mdns daemon"));
        (dir, Controller::new(discovery, history))
    }

    #[tokio::test]
    async fn s5_transmission_divert() {
        let (_dir, controller) = test_controller();
        // A callback address nothing listens on still counts as "the
        // call failed" for divert purposes; this test only exercises
        // the non-diverting path (empty table -> always transmits), the
        // diverting path is exercised in tests/scenarios.rs against a
        // real in-process callback listener.
        let mut state = EditorState::new();
        state.insert('h');
        state.insert('i');
        // No Proxy is running, so commit would otherwise retry
        // indefinitely; skip invoking commit() here and instead verify
        // the interrupt-evaluation helper alone.
        let diverted = controller.evaluate_transmission_interrupts("hi").await;
        assert!(!diverted);
    }

    #[test]
    fn now_nanos_is_monotonic_enough_for_history_keys() {
        let a = now_nanos();
        let b = now_nanos();
        assert!(b >= a);
    }
}
