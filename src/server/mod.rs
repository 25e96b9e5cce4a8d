//! TCP request dispatcher: one epoll-driven application thread per group,
//! each permanently paired with a validator thread by the runtime.

pub mod conn;
pub mod dispatch;

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};

use crate::runtime::{ConfigError, Runtime, RuntimeConfig};
use crate::stats::RuntimeStats;
use crate::store::{HashTable, KvReplay};

pub use conn::{consume_crc_prefix, write_all, LineReader, LineStatus};
pub use dispatch::{NullGuard, RequestGuard};

use dispatch::{close_worker, Drained, Worker};

const LISTENER: Token = Token(usize::MAX);

/// Max events per poll wake-up; bounds total active connections handled
/// per tick, not total connections.
const MAX_EVENTS: usize = 128;

/// How often a blocked group thread re-checks the stop flag.
const POLL_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid runtime configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to bind group listener: {0}")]
    Bind(#[source] io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Deployment parameters. `ngroups` application threads listen on
/// consecutive ports starting at `port`; clients shard by
/// `client_id mod ngroups`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub ngroups: usize,
    /// Bucket count of the key/value table. Power of two.
    pub capacity: usize,
    pub runtime: RuntimeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 9200,
            ngroups: 3,
            capacity: 1 << 24,
            runtime: RuntimeConfig::default(),
        }
    }
}

/// Handle over the running group threads. Dropping it (or calling
/// [`Server::shutdown`]) stops every group, which in turn drains and joins
/// the paired validators.
pub struct Server {
    stop: Arc<AtomicBool>,
    groups: Vec<JoinHandle<()>>,
    ports: Vec<u16>,
    stats: Arc<RuntimeStats>,
}

impl Server {
    /// Bind all group listeners, then start the group threads. Listeners
    /// are bound before this returns, so a client may connect immediately.
    pub fn spawn(config: ServerConfig) -> Result<Server, ServerError> {
        Self::spawn_with_guard(config, Arc::new(NullGuard))
    }

    /// Variant wiring an integrity layer into the request boundary.
    pub fn spawn_with_guard(
        config: ServerConfig,
        guard: Arc<dyn RequestGuard>,
    ) -> Result<Server, ServerError> {
        let runtime = Arc::new(Runtime::new(config.runtime)?);
        let table = Arc::new(HashTable::with_capacity(config.capacity));
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::clone(runtime.stats());

        let mut listeners = Vec::with_capacity(config.ngroups);
        let mut ports = Vec::with_capacity(config.ngroups);
        for i in 0..config.ngroups {
            let port = if config.port == 0 {
                0
            } else {
                config.port + i as u16
            };
            let addr = SocketAddr::new(config.host, port);
            let listener = TcpListener::bind(addr).map_err(ServerError::Bind)?;
            ports.push(listener.local_addr().map_err(ServerError::Bind)?.port());
            listeners.push(listener);
        }

        let groups = listeners
            .into_iter()
            .enumerate()
            .map(|(i, listener)| {
                let runtime = Arc::clone(&runtime);
                let table = Arc::clone(&table);
                let stop = Arc::clone(&stop);
                let guard = Arc::clone(&guard);
                std::thread::Builder::new()
                    .name(format!("remora-group-{i}"))
                    .spawn(move || {
                        if let Err(err) = group_loop(listener, &runtime, &table, &stop, &*guard) {
                            tracing::error!(target: "remora::server", group = i, %err, "group loop failed");
                        }
                    })
                    .map_err(ServerError::Io)
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            target: "remora::server",
            ?ports,
            groups = config.ngroups,
            "server listening"
        );

        Ok(Server {
            stop,
            groups,
            ports,
            stats,
        })
    }

    /// Actual listen ports, in group order. Differs from the configured
    /// base port only when that was 0.
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn stats(&self) -> &Arc<RuntimeStats> {
        &self.stats
    }

    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    /// Block until the group threads exit, without asking them to stop.
    /// The server binary parks here.
    pub fn wait(mut self) {
        for group in self.groups.drain(..) {
            let _ = group.join();
        }
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for group in self.groups.drain(..) {
            let _ = group.join();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// One group: accept clients, frame requests, funnel each through `run2`,
/// write responses. Blocks only in `poll` (with a tick to observe the
/// stop flag), the bucket mutexes, and, in synchronous mode, the
/// per-frame validation ticket.
fn group_loop(
    mut listener: TcpListener,
    runtime: &Runtime,
    table: &HashTable,
    stop: &AtomicBool,
    guard: &dyn RequestGuard,
) -> io::Result<()> {
    // Registering pairs this thread with its validator and applies
    // SCEE_WORK_CPUSET pinning.
    let mut session = runtime.register(KvReplay::for_table(table));

    let mut poll = Poll::new()?;
    poll.registry()
        .register(&mut listener, LISTENER, Interest::READABLE)?;
    let mut events = Events::with_capacity(MAX_EVENTS);
    let mut workers: HashMap<Token, Worker> = HashMap::new();
    let mut next_token = 0usize;

    while !stop.load(Ordering::Relaxed) {
        if let Err(err) = poll.poll(&mut events, Some(POLL_TICK)) {
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }

        for event in events.iter() {
            match event.token() {
                LISTENER => loop {
                    match listener.accept() {
                        Ok((mut stream, _peer)) => {
                            let token = Token(next_token);
                            next_token += 1;
                            poll.registry()
                                .register(&mut stream, token, Interest::READABLE)?;
                            workers.insert(token, Worker::new(stream));
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(err) => {
                            tracing::warn!(target: "remora::server", %err, "accept failed");
                            break;
                        }
                    }
                },
                token => {
                    let Some(worker) = workers.get_mut(&token) else {
                        continue;
                    };
                    // Peer went away with nothing left to read.
                    let gone = event.is_error()
                        || (event.is_read_closed() && !event.is_readable());
                    let close = gone || worker.drain(&mut session, table, guard) == Drained::Close;
                    if close {
                        if let Some(worker) = workers.remove(&token) {
                            close_worker(poll.registry(), worker);
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
