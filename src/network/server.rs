//! TCP Server
//!
//! Accepts connections and serves each one as a [`Session`] task.
//!
//! ## Threads
//! ```text
//! ┌──────────────────────────────┐   ┌─────────────────────────────┐
//! │ network runtime              │   │ "mapkv-stats" thread         │
//! │  max(cpus - 1, 1) workers    │   │  current_thread runtime     │
//! │   accept loop                │   │   report_periodically       │
//! │   Session task per client    │   └─────────────────────────────┘
//! └──────────────────────────────┘
//! ```
//!
//! The stats thread starts with construction, so reports begin before
//! [`run`](Server::run) is called. Both stop when the [`CancellationToken`]
//! from [`shutdown_handle`](Server::shutdown_handle) is cancelled, or when an
//! unrun server is dropped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use super::Session;
use crate::config::Config;
use crate::error::{MapKvError, Result};
use crate::stats::{self, Stats};
use crate::storage::{Storage, Store};

/// How long `run` waits for in-flight sessions after shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// TCP server for mapkv
pub struct Server {
    config: Config,
    store: Arc<dyn Store>,
    stats: Arc<Stats>,
    runtime: Runtime,
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    reporter: StatsThread,
}

impl Server {
    /// Open the storage described by `config` and bind the listener
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let storage = Storage::open(&config)?;
        Self::with_store(config, Arc::new(storage))
    }

    /// Serve an already-initialized store
    pub fn with_store(config: Config, store: Arc<dyn Store>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.effective_worker_threads())
            .thread_name("mapkv-worker")
            .enable_all()
            .build()?;

        let addr: SocketAddr = config.listen_addr.parse().map_err(|e| {
            MapKvError::Config(format!("invalid listen_addr '{}': {}", config.listen_addr, e))
        })?;
        let std_listener = std::net::TcpListener::bind(addr)?;
        std_listener.set_nonblocking(true)?;
        let local_addr = std_listener.local_addr()?;
        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(std_listener)?
        };

        let stats = Arc::new(Stats::new(store.size()? as u64));
        let shutdown = CancellationToken::new();
        let reporter = StatsThread::spawn(
            Arc::clone(&stats),
            config.stats_interval(),
            shutdown.child_token(),
        )?;

        tracing::info!(
            "Listening on {} with {} worker threads",
            local_addr,
            config.effective_worker_threads()
        );

        Ok(Self {
            config,
            store,
            stats,
            runtime,
            listener,
            local_addr,
            shutdown,
            reporter,
        })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    /// Token that stops [`run`](Self::run) when cancelled
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until shutdown (blocking)
    pub fn run(self) -> Result<()> {
        let Self {
            config,
            store,
            stats,
            runtime,
            listener,
            local_addr: _,
            shutdown,
            reporter,
        } = self;

        let accept = runtime.spawn(accept_loop(
            listener,
            Arc::clone(&store),
            stats,
            config.tcp_nodelay,
            shutdown.clone(),
        ));
        if let Err(e) = runtime.block_on(accept) {
            tracing::error!("Accept loop panicked: {}", e);
        }

        runtime.shutdown_timeout(SHUTDOWN_GRACE);

        reporter.join()?;

        store.flush()?;
        tracing::info!("Server stopped");
        Ok(())
    }
}

/// The "mapkv-stats" thread and its timer runtime
///
/// Dropping it without [`join`](Self::join) cancels and joins the thread.
struct StatsThread {
    handle: Option<thread::JoinHandle<Result<()>>>,
    cancel: CancellationToken,
}

impl StatsThread {
    fn spawn(stats: Arc<Stats>, period: Duration, cancel: CancellationToken) -> Result<Self> {
        let token = cancel.clone();
        let handle = thread::Builder::new()
            .name("mapkv-stats".into())
            .spawn(move || -> Result<()> {
                let timer = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()?;
                timer.block_on(stats::report_periodically(stats, period, token, None));
                Ok(())
            })?;

        Ok(Self {
            handle: Some(handle),
            cancel,
        })
    }

    /// Wait for the thread; it exits once its token is cancelled
    fn join(mut self) -> Result<()> {
        match self.handle.take().map(|h| h.join()) {
            Some(Ok(result)) => result,
            Some(Err(_)) => {
                tracing::error!("Stats thread panicked");
                Ok(())
            }
            None => Ok(()),
        }
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for StatsThread {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Accept until cancelled; a failed accept never stops the next one
async fn accept_loop(
    listener: TcpListener,
    store: Arc<dyn Store>,
    stats: Arc<Stats>,
    nodelay: bool,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                continue;
            }
        };

        if nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
            }
        }

        let session = Session::new(
            stream,
            peer.to_string(),
            Arc::clone(&store),
            Arc::clone(&stats),
            shutdown.child_token(),
        );
        tokio::spawn(session.run());
    }
    tracing::debug!("Accept loop stopped");
}
