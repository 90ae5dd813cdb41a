//! The per-store query manager: request admission, configuration, and
//! instance lifecycle.
//!
//! One manager exists per store handle, held in an explicit registry keyed
//! by handle identity and torn down with the handle via [`QueryManager::release`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use tracing::{debug, info};

use quern_protocol::{QueryStats, Request, Response};

use crate::bridge::{Delivery, ResponseFuture};
use crate::config::QueryConfig;
use crate::registry::{CancelFlag, RestartTokenRegistry};
use crate::store::QueryStore;
use crate::worker::{QueuedRequest, WorkerPool};

static INSTANCES: OnceLock<Mutex<HashMap<usize, Arc<QueryManager>>>> = OnceLock::new();

/// Request ids are process-unique and monotonically increasing, across
/// every manager instance.
static REQUEST_IDS: AtomicU64 = AtomicU64::new(0);

fn instances() -> &'static Mutex<HashMap<usize, Arc<QueryManager>>> {
    INSTANCES.get_or_init(|| Mutex::new(HashMap::new()))
}

fn store_key(store: &Arc<dyn QueryStore>) -> usize {
    Arc::as_ptr(store) as *const () as usize
}

/// Accepts requests for one store handle and runs them on its worker pool.
///
/// `enqueue` is safe under unbounded concurrent callers and never fails
/// for a well-formed request; malformed targets fail later, during
/// execution, as an `Error` response.
pub struct QueryManager {
    config: RwLock<QueryConfig>,
    registry: Arc<RestartTokenRegistry>,
    pool: WorkerPool,
    released: AtomicBool,
}

impl QueryManager {
    /// Build a manager with an explicit config, outside the instance
    /// registry. `instance` is the usual entry point.
    pub fn new(store: Arc<dyn QueryStore>, config: QueryConfig) -> Arc<Self> {
        let registry = Arc::new(RestartTokenRegistry::new());
        let pool = WorkerPool::new(store, Arc::clone(&registry), config.worker_threads);
        Arc::new(Self {
            config: RwLock::new(config),
            registry,
            pool,
            released: AtomicBool::new(false),
        })
    }

    /// The singleton manager for `store`, lazily created with the default
    /// config.
    pub fn instance(store: &Arc<dyn QueryStore>) -> Arc<Self> {
        let mut map = instances().lock().unwrap();
        Arc::clone(map.entry(store_key(store)).or_insert_with(|| {
            info!("creating query manager for store handle");
            Self::new(Arc::clone(store), QueryConfig::default())
        }))
    }

    /// Tear the manager down with its store handle: drop the registry
    /// entry, drain the pool, resolve every pending request `Cancel`.
    pub fn release(store: &Arc<dyn QueryStore>) {
        let removed = instances().lock().unwrap().remove(&store_key(store));
        if let Some(manager) = removed {
            manager.shutdown();
        }
    }

    pub fn config(&self) -> QueryConfig {
        *self.config.read().unwrap()
    }

    /// Replace the config. Applies to subsequently enqueued requests;
    /// quota and delay handling of in-flight requests keep their
    /// enqueue-time snapshot. The pool is resized to the new thread count.
    pub fn reset_config(&self, config: QueryConfig) {
        *self.config.write().unwrap() = config;
        self.pool.resize(config.worker_threads);
        info!(
            worker_threads = config.worker_threads,
            time_budget_ms = config.quota.time.as_millis() as u64,
            memory_budget = config.quota.memory,
            "query config replaced"
        );
    }

    /// Submit a request; resolve it later through the returned future.
    pub fn enqueue(&self, request: impl Into<Request>) -> ResponseFuture {
        let (delivery, future) = Delivery::future();
        self.submit(request.into(), delivery);
        future
    }

    /// Submit a request; the callback runs on the worker thread that
    /// finished it. Callbacks must not block or synchronously re-enter the
    /// pool in a way that can starve it.
    pub fn enqueue_with_callback(
        &self,
        request: impl Into<Request>,
        callback: impl FnOnce(Response) + Send + 'static,
    ) {
        self.submit(request.into(), Delivery::callback(callback));
    }

    fn submit(&self, request: Request, delivery: Delivery) {
        let id = REQUEST_IDS.fetch_add(1, Ordering::SeqCst) + 1;

        if self.released.load(Ordering::SeqCst) {
            delivery.deliver(Response::cancel(id, QueryStats::default()));
            return;
        }

        let cancel = CancelFlag::new();
        if let Some(token) = request.restart_token() {
            if let Some(evicted) = self.registry.register(token, id, &cancel) {
                debug!(token, evicted, id, "newer request supersedes older one");
            }
        }

        let config = self.config();
        let item = QueuedRequest {
            id,
            request,
            cancel,
            quota: config.quota,
            ignore_delay: config.ignore_delay,
            delivery,
        };
        debug!(id, "request enqueued");

        if let Err(item) = self.pool.submit(item) {
            // Lost the race against shutdown; nothing may hang.
            if let Some(token) = item.request.restart_token() {
                self.registry.clear(token, item.id);
            }
            item.delivery
                .deliver(Response::cancel(item.id, QueryStats::default()));
        }
    }

    /// Stop accepting work, drain the pool, join the workers. Idempotent.
    pub fn shutdown(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pool.shutdown();
    }
}

impl Drop for QueryManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
