//! The Subscriber role: a passive observer of both directions of the
//! stream plus log messages (spec.md §2, §6).
//!
//! Subscriber is not a standalone binary mode on its own — it is a set of
//! three RPC methods (`SubscriberReceive`, `SubscriberTransmit`,
//! `SubscriberLog`) that the Controller, the scripting handler, and the
//! `log` CLI mode each implement to taste (spec.md §4.4 "Subscriber
//! duties", §4.5, §6 "`log` mode").

use async_trait::async_trait;

/// Implemented by anything that registers itself as a Subscriber.
/// `receive`/`transmit`/`log` mirror the three RPC methods directly;
/// implementations that don't care about a given direction make it a
/// no-op (spec.md §4.4: "`SubscriberTransmit` and `SubscriberLog` are
/// no-ops" for the Controller).
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn receive(&self, bytes: Vec<u8>);
    async fn transmit(&self, bytes: Vec<u8>);
    async fn log(&self, message: String);
}

/// The `moxie --mode log` Subscriber: prints every event with a
/// labelled prefix to stderr (spec.md §6).
pub struct LogSubscriber;

#[async_trait]
impl Subscriber for LogSubscriber {
    async fn receive(&self, bytes: Vec<u8>) {
        eprint!("{} [receive] {}", timestamp(), String::from_utf8_lossy(&bytes));
    }

    async fn transmit(&self, bytes: Vec<u8>) {
        eprint!("{} [transmit] {}", timestamp(), String::from_utf8_lossy(&bytes));
    }

    async fn log(&self, message: String) {
        eprintln!("{} [log] {message}", timestamp());
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}
