//! moxie CLI entry point (spec.md §6 "External interfaces").
//!
//! One binary, four modes. `clap` (derive) mirrors the teacher's
//! `main.rs` CLI shape; `env_logger` + `log` for diagnostics the same
//! way.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use moxie::config::Dirs;
use moxie::consumer::{Consumer, ConsumerService};
use moxie::constants::role;
use moxie::controller::history::HistoryStore;
use moxie::controller::{run_editor, Controller, ControllerService};
use moxie::discovery::Discovery;
use moxie::proxy::{Proxy, ProxyService};
use moxie::subscriber::{LogSubscriber, Subscriber};

#[derive(Parser)]
#[command(name = "moxie")]
#[command(about = "Interposing interactive session proxy for line-oriented TCP applications")]
struct Cli {
    #[arg(long, value_enum)]
    mode: Mode,

    /// Required in proxy mode: the upstream to connect to.
    #[arg(long)]
    remotehost: Option<String>,

    /// History and log directory. Defaults to `~/.moxie`.
    #[arg(long)]
    dir: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Proxy,
    Consume,
    Control,
    Log,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let dirs = Dirs::resolve(cli.dir.as_deref())?;
    let discovery = Arc::new(Discovery::new()?);

    let result = match cli.mode {
        Mode::Proxy => run_proxy(discovery, cli.remotehost).await,
        Mode::Consume => run_consume(discovery).await,
        Mode::Control => run_control(discovery, dirs).await,
        Mode::Log => run_log(discovery).await,
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e
            .downcast_ref::<moxie::MoxieError>()
            .is_some_and(moxie::MoxieError::is_user_quit) =>
        {
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn run_proxy(discovery: Arc<Discovery>, remotehost: Option<String>) -> anyhow::Result<()> {
    let remotehost = remotehost.ok_or_else(|| anyhow::anyhow!("--remotehost is required in proxy mode"))?;
    let remote: std::net::SocketAddr = remotehost
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid --remotehost {remotehost:?}: {e}"))?;

    let (proxy, chunk_rx) = Proxy::new(Arc::clone(&discovery));
    proxy.connect(remote).await?;

    let service = Arc::new(ProxyService::new(proxy.clone()));
    let mut handle = discovery.publish(role::PROXY, service).await?;
    log::info!("proxy published, connected to {remote}");

    tokio::select! {
        () = proxy.run_dispatcher(chunk_rx) => {}
        () = handle.wait() => {}
    }
    Ok(())
}

async fn run_consume(discovery: Arc<Discovery>) -> anyhow::Result<()> {
    let (consumer, incoming_rx) = Consumer::new();
    let service = Arc::new(ConsumerService::new(consumer.clone()));
    let mut handle = discovery.publish(role::CONSUMER, service).await?;
    log::info!("consumer published");

    tokio::select! {
        () = consumer.run(incoming_rx) => {}
        () = handle.wait() => {}
    }
    Ok(())
}

async fn run_control(discovery: Arc<Discovery>, dirs: Dirs) -> anyhow::Result<()> {
    let history = HistoryStore::open(&dirs.history_db())?;
    let controller = Controller::new(Arc::clone(&discovery), history);
    let service = Arc::new(ControllerService::new(controller.clone()));

    // `control` publishes as both Subscriber and Controller (spec.md §6),
    // one RPC server answering both method families.
    let subscriber_service: Arc<dyn moxie::discovery::server::RpcHandler> = Arc::clone(&service);
    let _subscriber_handle = discovery.publish(role::SUBSCRIBER, subscriber_service).await?;
    let _controller_handle = discovery.publish(role::CONTROLLER, service).await?;

    run_editor(controller).await?;
    Ok(())
}

async fn run_log(discovery: Arc<Discovery>) -> anyhow::Result<()> {
    let subscriber = Arc::new(LogSubscriberService::new(LogSubscriber));
    let mut handle = discovery.publish(role::SUBSCRIBER, subscriber).await?;
    log::info!("log subscriber published");
    handle.wait().await;
    Ok(())
}

/// Adapts any [`Subscriber`] to [`moxie::discovery::server::RpcHandler`]
/// so `log` mode can publish [`LogSubscriber`] directly without a
/// dedicated service module — it is the only role whose Subscriber
/// implementation is not itself the RPC-owning struct.
struct LogSubscriberService<S: Subscriber + 'static> {
    inner: S,
}

impl<S: Subscriber + 'static> LogSubscriberService<S> {
    fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl<S: Subscriber + 'static> moxie::discovery::server::RpcHandler for LogSubscriberService<S> {
    async fn dispatch(&self, method: &str, argument: serde_json::Value) -> Result<serde_json::Value, String> {
        use moxie::constants::method as m;
        match method {
            m::SUBSCRIBER_RECEIVE => {
                let bytes: Vec<u8> = serde_json::from_value(argument).map_err(|e| e.to_string())?;
                self.inner.receive(bytes).await;
                Ok(serde_json::Value::Null)
            }
            m::SUBSCRIBER_TRANSMIT => {
                let bytes: Vec<u8> = serde_json::from_value(argument).map_err(|e| e.to_string())?;
                self.inner.transmit(bytes).await;
                Ok(serde_json::Value::Null)
            }
            m::SUBSCRIBER_LOG => {
                let message: String = serde_json::from_value(argument).map_err(|e| e.to_string())?;
                self.inner.log(message).await;
                Ok(serde_json::Value::Null)
            }
            other => Err(format!("unknown method {other:?} for Subscriber")),
        }
    }
}
