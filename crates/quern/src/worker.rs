//! Worker pool and per-request execution.
//!
//! A fixed set of OS threads shares one FIFO channel. Each worker owns a
//! lazily opened read-only connection, runs one request at a time to a
//! terminal status, clears its restart token, and delivers the response.
//! Every failure is converted to an `Error` response at this boundary; a
//! bad request never takes a worker down.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use quern_protocol::{
    format_id, BlobBytes, ColumnMeta, QueryStats, Request, RequestId, Response, ResponsePayload,
    RowSet,
};

use crate::bridge::Delivery;
use crate::config::QueryQuota;
use crate::quota::{QuotaMonitor, QuotaVerdict};
use crate::registry::{CancelFlag, RestartTokenRegistry};
use crate::store::{ColumnInfo, QueryStore, StoreError, StoreReader};

/// How often an idle worker re-checks shutdown and pool-size state.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Blob reads advance in chunks of this size; each chunk is a checkpoint.
const BLOB_CHUNK: usize = 64 * 1024;

/// One queue entry: the request plus everything snapshotted at enqueue.
pub(crate) struct QueuedRequest {
    pub id: RequestId,
    pub request: Request,
    pub cancel: CancelFlag,
    pub quota: QueryQuota,
    pub ignore_delay: bool,
    pub delivery: Delivery,
}

struct PoolShared {
    store: Arc<dyn QueryStore>,
    rx: Receiver<QueuedRequest>,
    registry: Arc<RestartTokenRegistry>,
    /// Target worker count; workers over target give their slot back.
    desired: AtomicUsize,
    active: AtomicUsize,
    shutdown: AtomicBool,
}

/// The executor thread pool. Owned by the manager.
pub(crate) struct WorkerPool {
    shared: Arc<PoolShared>,
    tx: Sender<QueuedRequest>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    name_seq: AtomicUsize,
}

impl WorkerPool {
    pub(crate) fn new(
        store: Arc<dyn QueryStore>,
        registry: Arc<RestartTokenRegistry>,
        worker_threads: usize,
    ) -> Self {
        let (tx, rx) = unbounded();
        let pool = Self {
            shared: Arc::new(PoolShared {
                store,
                rx,
                registry,
                desired: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
            }),
            tx,
            handles: Mutex::new(Vec::new()),
            name_seq: AtomicUsize::new(0),
        };
        pool.resize(worker_threads.max(1));
        pool
    }

    /// Hand a request to the pool. Gives the entry back if the pool is
    /// already shut down so the caller can resolve it.
    pub(crate) fn submit(&self, item: QueuedRequest) -> Result<(), QueuedRequest> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(item);
        }
        self.tx.send(item).map_err(|send| send.into_inner())
    }

    /// Grow by spawning, shrink by letting workers drain off at their next
    /// poll. In-flight requests always finish.
    pub(crate) fn resize(&self, worker_threads: usize) {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let desired = worker_threads.max(1);
        self.shared.desired.store(desired, Ordering::SeqCst);

        let mut handles = self.handles.lock().unwrap();
        while self.shared.active.load(Ordering::SeqCst) < desired {
            self.shared.active.fetch_add(1, Ordering::SeqCst);
            let shared = Arc::clone(&self.shared);
            let name = format!("quern-worker-{}", self.name_seq.fetch_add(1, Ordering::SeqCst));
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(shared))
                .expect("failed to spawn query worker thread");
            debug!(worker = %name, "spawned query worker");
            handles.push(handle);
        }
    }

    /// Stop the pool: workers exit after their current request, then every
    /// still-queued request resolves `Cancel`.
    pub(crate) fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        let current = thread::current().id();
        for handle in handles {
            // A worker can trigger shutdown through a callback that drops
            // the last manager handle; it must not join itself.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("query worker panicked during shutdown");
            }
        }

        let mut drained = 0usize;
        while let Ok(item) = self.shared.rx.try_recv() {
            if let Some(token) = item.request.restart_token() {
                self.shared.registry.clear(token, item.id);
            }
            item.delivery
                .deliver(Response::cancel(item.id, QueryStats::default()));
            drained += 1;
        }
        if drained > 0 {
            info!(drained, "cancelled queued requests on shutdown");
        }
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    let mut connection: Option<Box<dyn StoreReader>> = None;
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            return;
        }

        // Shrink: hand the slot back when the pool is over target.
        let active = shared.active.load(Ordering::SeqCst);
        if active > shared.desired.load(Ordering::SeqCst) {
            if shared
                .active
                .compare_exchange(active, active - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                debug!("query worker drained off after pool shrink");
                return;
            }
            continue;
        }

        match shared.rx.recv_timeout(POLL_INTERVAL) {
            Ok(item) => execute_one(&shared, &mut connection, item),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn execute_one(
    shared: &PoolShared,
    connection: &mut Option<Box<dyn StoreReader>>,
    item: QueuedRequest,
) {
    let QueuedRequest {
        id,
        request,
        cancel,
        quota,
        ignore_delay,
        delivery,
    } = item;

    debug!(id, kind = ?request.kind(), "executing request");
    let monitor = QuotaMonitor::start(quota);

    let response = if cancel.is_cancelled() {
        // Evicted while still queued: never starts executing.
        Response::cancel(id, monitor.stats())
    } else {
        run_request(shared, connection, id, &request, &cancel, monitor, ignore_delay)
    };

    if let Some(token) = request.restart_token() {
        shared.registry.clear(token, id);
    }

    info!(
        id,
        status = %response.status(),
        elapsed_ms = response.stats().total_time().as_millis() as u64,
        mem_used = response.stats().mem_used(),
        "request finished"
    );
    delivery.deliver(response);
}

fn run_request(
    shared: &PoolShared,
    connection: &mut Option<Box<dyn StoreReader>>,
    id: RequestId,
    request: &Request,
    cancel: &CancelFlag,
    mut monitor: QuotaMonitor,
    ignore_delay: bool,
) -> Response {
    if let Some(delay) = request.delay() {
        if !ignore_delay && !sleep_delay(shared, cancel, delay) {
            return Response::cancel(id, monitor.stats());
        }
    }

    // Checkpoint before the first unit of progress: an injected delay
    // alone may already exceed the time budget.
    if cancel.is_cancelled() {
        return Response::cancel(id, monitor.stats());
    }
    if monitor.checkpoint() != QuotaVerdict::Continue {
        return Response::timeout(id, monitor.stats());
    }

    let reader = match ensure_connection(shared, connection) {
        Ok(reader) => reader,
        Err(err) => return Response::error(id, err.to_string(), monitor.stats()),
    };

    match request {
        Request::EcSql(ecsql) => run_ecsql(reader, id, ecsql, cancel, &mut monitor),
        Request::BlobIo(blob) => run_blob_io(reader, id, blob, cancel, &mut monitor),
    }
}

/// Sleep the injected delay, a poll interval at a time so cancellation and
/// shutdown stay responsive. Returns false when the request was cancelled
/// or the pool is shutting down.
fn sleep_delay(shared: &PoolShared, cancel: &CancelFlag, delay: Duration) -> bool {
    let mut remaining = delay;
    while !remaining.is_zero() {
        if cancel.is_cancelled() || shared.shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let step = remaining.min(POLL_INTERVAL);
        thread::sleep(step);
        remaining -= step;
    }
    !cancel.is_cancelled() && !shared.shutdown.load(Ordering::SeqCst)
}

fn ensure_connection<'a>(
    shared: &PoolShared,
    connection: &'a mut Option<Box<dyn StoreReader>>,
) -> Result<&'a mut Box<dyn StoreReader>, StoreError> {
    if connection.is_none() {
        *connection = Some(shared.store.open_reader()?);
    }
    Ok(connection.as_mut().unwrap())
}

fn run_ecsql(
    reader: &mut Box<dyn StoreReader>,
    id: RequestId,
    request: &quern_protocol::EcSqlRequest,
    cancel: &CancelFlag,
    monitor: &mut QuotaMonitor,
) -> Response {
    let mut cursor = match reader.prepare(&request.ecsql, &request.params) {
        Ok(cursor) => cursor,
        Err(err) => return Response::error(id, err.to_string(), monitor.stats()),
    };

    let columns = column_meta(cursor.columns());
    let mut rows: Vec<Vec<Value>> = Vec::new();
    let mut skipped = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Response::cancel(id, monitor.stats());
        }

        let row = match cursor.next_row() {
            Ok(Some(row)) => row,
            Ok(None) => {
                let stats = monitor.stats();
                return Response::done(id, ResponsePayload::Rows(RowSet { columns, rows }), stats);
            }
            Err(err) => return Response::error(id, err.to_string(), monitor.stats()),
        };

        // Paging continuation: step past already-delivered rows without
        // counting them as progress.
        if skipped < request.skip_rows {
            skipped += 1;
            if monitor.checkpoint() == QuotaVerdict::Timeout {
                return Response::timeout(id, monitor.stats());
            }
            continue;
        }

        monitor.record_progress(row_size(&row));
        rows.push(row);

        match monitor.checkpoint() {
            QuotaVerdict::Continue => {}
            QuotaVerdict::Timeout => return Response::timeout(id, monitor.stats()),
            QuotaVerdict::Partial => {
                let stats = monitor.stats();
                return Response::partial(
                    id,
                    ResponsePayload::Rows(RowSet { columns, rows }),
                    stats,
                );
            }
        }
    }
}

fn run_blob_io(
    reader: &mut Box<dyn StoreReader>,
    id: RequestId,
    request: &quern_protocol::BlobIoRequest,
    cancel: &CancelFlag,
    monitor: &mut QuotaMonitor,
) -> Response {
    let mut blob = match reader.open_blob(
        &request.class_name,
        &request.access_string,
        request.instance_id,
    ) {
        Ok(blob) => blob,
        Err(StoreError::ClassNotFound(_)) => {
            return Response::error(
                id,
                format!(
                    "BlobIO: unable to find classname '{}'",
                    request.class_name
                ),
                monitor.stats(),
            );
        }
        Err(_) => {
            return Response::error(
                id,
                format!(
                    "BlobIO: unable to open blob for classname '{}' , accessString '{}' for instanceId '{}'",
                    request.class_name,
                    request.access_string,
                    format_id(request.instance_id)
                ),
                monitor.stats(),
            );
        }
    };

    let size = blob.size();
    let (offset, length) = match request.range {
        Some(range) => (range.offset, u64::from(range.length)),
        None => (0, size),
    };
    let in_bounds = offset
        .checked_add(length)
        .map(|end| end <= size)
        .unwrap_or(false);
    if !in_bounds {
        return Response::error(
            id,
            "BlobIO: offset + length provided is greater then size of blob",
            monitor.stats(),
        );
    }

    let mut data = Vec::with_capacity(length as usize);
    let end = offset + length;
    let mut position = offset;

    while position < end {
        if cancel.is_cancelled() {
            return Response::cancel(id, monitor.stats());
        }

        let chunk_len = (end - position).min(BLOB_CHUNK as u64) as usize;
        let chunk = match blob.read(position, chunk_len) {
            Ok(chunk) => chunk,
            Err(err) => return Response::error(id, err.to_string(), monitor.stats()),
        };
        position += chunk.len() as u64;

        monitor.record_progress(chunk.len() as u64);
        data.extend_from_slice(&chunk);

        match monitor.checkpoint() {
            QuotaVerdict::Continue => {}
            QuotaVerdict::Timeout => return Response::timeout(id, monitor.stats()),
            QuotaVerdict::Partial => {
                let stats = monitor.stats();
                return Response::partial(id, ResponsePayload::Blob(BlobBytes::new(data)), stats);
            }
        }
    }

    let stats = monitor.stats();
    Response::done(id, ResponsePayload::Blob(BlobBytes::new(data)), stats)
}

fn column_meta(infos: &[ColumnInfo]) -> Vec<ColumnMeta> {
    infos
        .iter()
        .enumerate()
        .map(|(index, info)| ColumnMeta {
            index,
            name: info.name.clone(),
            json_name: ColumnMeta::json_name_for(&info.name),
            type_name: info.type_name.clone(),
            extended_type: info.extended_type.clone(),
            class_name: info.class_name.clone(),
            generated: info.generated,
        })
        .collect()
}

/// Serialized size of one row; the unit the memory budget is charged in.
fn row_size(row: &[Value]) -> u64 {
    serde_json::to_string(row).map_or(0, |s| s.len() as u64)
}
