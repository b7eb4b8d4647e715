//! Process handler registry
//!
//! Maps the id of each unit of work in flight on a node to the callback that
//! receives its result. The map is sharded (`DashMap`), so dispatch and
//! completion for different work ids never contend on a single lock.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use atoll_core::{SessionError, WorkId, WorkResult};

// ----------------------------------------------------------------------------
// Completion Handler
// ----------------------------------------------------------------------------

/// Receives the result of one dispatched unit of work
pub trait CompletionHandler: Send + Sync {
    fn process_finished(self: Box<Self>, result: WorkResult);
}

impl<F> CompletionHandler for F
where
    F: FnOnce(WorkResult) + Send + Sync,
{
    fn process_finished(self: Box<Self>, result: WorkResult) {
        (*self)(result)
    }
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

/// Thread-safe map from work id to completion handler
#[derive(Default)]
pub struct ProcessHandlerRegistry {
    handlers: DashMap<WorkId, Box<dyn CompletionHandler>>,
}

impl ProcessHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `work_id`.
    ///
    /// Fails without touching the existing entry if the id is already in
    /// flight.
    pub fn register(
        &self,
        work_id: WorkId,
        handler: Box<dyn CompletionHandler>,
    ) -> Result<(), SessionError> {
        match self.handlers.entry(work_id) {
            Entry::Occupied(_) => Err(SessionError::DuplicateWorkId { work_id }),
            Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(())
            }
        }
    }

    /// Remove and return the handler for `work_id`
    pub fn take(&self, work_id: WorkId) -> Option<Box<dyn CompletionHandler>> {
        self.handlers.remove(&work_id).map(|(_, handler)| handler)
    }

    /// Route a result to its handler. Returns false if no handler was waiting.
    ///
    /// The handler runs after its entry is removed, outside any shard lock.
    pub fn complete(&self, result: WorkResult) -> bool {
        match self.take(result.id) {
            Some(handler) => {
                handler.process_finished(result);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, work_id: WorkId) -> bool {
        self.handlers.contains_key(&work_id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Drop every handler without invoking it. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let ids: Vec<WorkId> = self.handlers.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter(|id| self.handlers.remove(id).is_some())
            .count()
    }
}

impl core::fmt::Debug for ProcessHandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProcessHandlerRegistry")
            .field("in_flight", &self.handlers.len())
            .finish()
    }
}
