//! Tunable constants for the proxy/consumer/controller fabric.
//!
//! Collected here rather than scattered as magic numbers, following the
//! teacher's convention of a dedicated `constants.rs`.

use std::time::Duration;

/// Size of each read issued against the remote socket by the Proxy's
/// reader pump (spec.md §4.2).
pub const READ_CHUNK_BYTES: usize = 4096;

/// Bound on the Proxy's chunk channel. The spec describes this as
/// "unbounded-in-spirit but bounded-in-implementation"; 2^17 chunks give
/// headroom while still applying backpressure to the reader under a
/// sustained burst with no live Consumers.
pub const CHUNK_CHANNEL_CAPACITY: usize = 1 << 17;

/// Backoff between Consumer-lookup retries in the Proxy dispatcher when
/// no Consumer is currently visible (spec.md §4.2).
pub const NO_CONSUMER_BACKOFF: Duration = Duration::from_millis(500);

/// Idle-flush threshold for the Consumer's coalescing buffer (spec.md
/// §4.3). The source oscillated between 0.1s and 0.5s across revisions;
/// the spec fixes 0.5s (spec.md §9, Open Question iii).
pub const FLUSH_IDLE: Duration = Duration::from_millis(500);

/// Retry delay for `ProxyTransmit` from the Controller when no Proxy is
/// reachable yet (spec.md §4.4 step 3).
pub const TRANSMIT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Minimum token length inserted into the completion trie, both from the
/// operator's own committed lines and from observed receive traffic
/// (spec.md §4.4, commit step 5, and Subscriber duties).
pub const MIN_COMPLETION_TOKEN_LEN: usize = 4;

/// mDNS service type all roles publish under, with a `role` TXT record
/// distinguishing `proxy` / `consumer` / `subscriber` / `controller`
/// (spec.md §6, canonical service names).
pub const SERVICE_TYPE: &str = "_moxie._tcp.local.";

/// Canonical service/role names (spec.md §6).
pub mod role {
    pub const PROXY: &str = "proxy";
    pub const CONSUMER: &str = "consumer";
    pub const SUBSCRIBER: &str = "subscriber";
    pub const CONTROLLER: &str = "controller";
}

/// RPC method names (spec.md §6). Kept as a dedicated module so callers
/// never hand-type a method string more than once.
pub mod method {
    pub const PROXY_TRANSMIT: &str = "ProxyTransmit";
    pub const CONSUMER_CONSUME: &str = "ConsumerConsume";
    pub const CONSUMER_INTERRUPT_CONSUMPTION: &str = "ConsumerInterruptConsumption";
    pub const CONTROLLER_INTERRUPT_TRANSMISSION: &str = "ControllerInterruptTransmission";
    pub const SUBSCRIBER_RECEIVE: &str = "SubscriberReceive";
    pub const SUBSCRIBER_TRANSMIT: &str = "SubscriberTransmit";
    pub const SUBSCRIBER_LOG: &str = "SubscriberLog";
    pub const INTERRUPTOR_INTERRUPTED_CONSUMPTION: &str = "InterruptorInterruptedConsumption";
    pub const INTERRUPTOR_INTERRUPTED_TRANSMISSION: &str = "InterruptorInterruptedTransmission";
}
