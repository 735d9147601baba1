use std::collections::{HashMap, HashSet, VecDeque};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};

use crate::check::IgnoreRegistry;
use crate::config::ServerConfig;
use crate::diagnostic::TypeError;
use crate::environment::Environment;
use crate::heap::SourceHeap;
use crate::lookup::LookupCache;
use crate::path::FileHandle;
use crate::request::Request;
use crate::scheduler::Scheduler;

/// Connection lifecycle record. Guarded by the mutex in
/// [`ServerState::connections`]; acquisition is always brief and never
/// nested with worker joins.
#[derive(Debug, Default)]
pub struct Connections {
    /// The listening socket, dropped on stop so further connects fail.
    pub listener: Option<TcpListener>,
    /// Labels of external file-change subscribers. When empty, the server
    /// rechecks on save itself.
    pub file_notifiers: Vec<String>,
    pub persistent_clients: usize,
    pub stopping: bool,
}

impl Connections {
    /// Tear the listener down; subsequent connects are refused.
    pub fn stop(&mut self) {
        self.stopping = true;
        self.listener.take();
    }
}

/// The primary mutable state of the server. One instance per process; only
/// the dispatcher thread mutates it. Workers receive read handles (the
/// heap, the environment) and return plain data.
pub struct ServerState {
    pub environment: Environment,
    pub heap: Arc<SourceHeap>,
    /// Keys are exactly the handles ever successfully analyzed; an empty
    /// list means "analyzed, no errors".
    pub errors: HashMap<FileHandle, Vec<TypeError>>,
    /// Handles ever populated in the environment.
    pub handles: HashSet<FileHandle>,
    pub lookups: LookupCache,
    /// Rechecks synthesized for transitive dependents, drained FIFO.
    pub deferred_requests: VecDeque<Request>,
    pub connections: Arc<Mutex<Connections>>,
    pub scheduler: Scheduler,
    pub ignores: IgnoreRegistry,
    /// Set by a stop request; the server loop tears down after replying.
    pub shutdown_requested: bool,
    /// Process start, for uptime reporting.
    pub started: std::time::Instant,
}

impl ServerState {
    pub fn new(config: &ServerConfig) -> Result<ServerState, rayon::ThreadPoolBuildError> {
        Ok(ServerState {
            environment: Environment::new(),
            heap: Arc::new(SourceHeap::new(config.heap_capacity_bytes)),
            errors: HashMap::new(),
            handles: HashSet::new(),
            lookups: LookupCache::default(),
            deferred_requests: VecDeque::new(),
            connections: Arc::new(Mutex::new(Connections::default())),
            scheduler: Scheduler::new(config.jobs)?,
            ignores: IgnoreRegistry::default(),
            shutdown_requested: false,
            started: std::time::Instant::now(),
        })
    }

    /// Whether saves should trigger a recheck: true iff no external watcher
    /// feeds us updates. Read under the connections lock.
    pub fn check_on_save(&self) -> bool {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .file_notifiers
            .is_empty()
    }
}
