//! One in-flight request per operation kind.
//!
//! Starting a request in a slot aborts whatever was running there; a cancel
//! aborts the current occupant. Ids are shared across slots so log lines can
//! be correlated.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use super::BackendError;

struct RequestSlot {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
pub struct OperationSlot {
    current: Mutex<Option<RequestSlot>>,
}

impl OperationSlot {
    fn lock(&self) -> MutexGuard<'_, Option<RequestSlot>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start(&self, id: u64) -> CancellationToken {
        let cancel = CancellationToken::new();
        if let Some(prev) = self.lock().replace(RequestSlot {
            id,
            cancel: cancel.clone(),
        }) {
            prev.cancel.cancel();
        }
        cancel
    }

    fn finish(&self, id: u64) {
        let mut guard = self.lock();
        if guard.as_ref().is_some_and(|current| current.id == id) {
            guard.take();
        }
    }

    fn cancel(&self) -> Option<u64> {
        self.lock().take().map(|prev| {
            prev.cancel.cancel();
            prev.id
        })
    }

    pub fn is_busy(&self) -> bool {
        self.lock().is_some()
    }
}

#[derive(Default)]
pub struct RequestSlots {
    counter: AtomicU64,
    pub quick_answer: OperationSlot,
    pub translation: OperationSlot,
}

impl RequestSlots {
    fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Run `request` in `slot` until it finishes, the slot is cancelled, or
    /// the caller's token fires.
    pub async fn run<T, F>(
        &self,
        slot: &OperationSlot,
        label: &str,
        caller: &CancellationToken,
        request: F,
    ) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        let id = self.next_id();
        let slot_cancel = slot.start(id);
        log::info!("[{}][id={}] started", label, id);

        let result = tokio::select! {
            biased;
            _ = slot_cancel.cancelled() => Err(BackendError::Cancelled),
            _ = caller.cancelled() => Err(BackendError::Cancelled),
            result = request => result,
        };

        slot.finish(id);
        match &result {
            Ok(_) => log::info!("[{}][id={}] ended ok", label, id),
            Err(BackendError::Cancelled) => log::info!("[{}][id={}] canceled", label, id),
            Err(err) => log::info!("[{}][id={}] ended error: {}", label, id, err),
        }
        result
    }

    pub fn cancel(&self, slot: &OperationSlot, label: &str) {
        if let Some(request_id) = slot.cancel() {
            log::info!("[{}][id={}] cancel requested", label, request_id);
        }
    }
}
