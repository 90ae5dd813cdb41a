//! Cooperative cancellation flags and the restart-token registry.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use quern_protocol::RequestId;

/// Cancellation flag shared between the registry and the worker executing
/// the request. The request itself stays immutable; the worker reads the
/// flag at every checkpoint.
///
/// Clone is cheap and shares state.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

struct TokenEntry {
    id: RequestId,
    flag: CancelFlag,
}

/// Maps a restart token to the single live request bound to it.
///
/// Invariant: at most one live request per token. Registering a new id
/// under a mapped token atomically flags the previous request for
/// cancellation and rebinds the token.
#[derive(Default)]
pub struct RestartTokenRegistry {
    live: Mutex<HashMap<String, TokenEntry>>,
}

impl RestartTokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `token -> id`. Returns the evicted request id when the token
    /// was already bound; that request's flag is cancelled before rebind.
    pub fn register(&self, token: &str, id: RequestId, flag: &CancelFlag) -> Option<RequestId> {
        let mut live = self.live.lock().unwrap();
        let previous = live.insert(
            token.to_string(),
            TokenEntry {
                id,
                flag: flag.clone(),
            },
        );
        previous.map(|entry| {
            entry.flag.cancel();
            debug!(token, evicted = entry.id, superseded_by = id, "restart token rebound");
            entry.id
        })
    }

    /// Remove the mapping only if it still points at `id`. A worker
    /// finishing an evicted request must not clobber the newer binding.
    pub fn clear(&self, token: &str, id: RequestId) {
        let mut live = self.live.lock().unwrap();
        if let Entry::Occupied(entry) = live.entry(token.to_string()) {
            if entry.get().id == id {
                entry.remove();
            }
        }
    }

    #[cfg(test)]
    fn live_id(&self, token: &str) -> Option<RequestId> {
        self.live.lock().unwrap().get(token).map(|e| e.id)
    }
}
