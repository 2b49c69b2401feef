//! One in-flight load shared by every consumer of the same request key.

use crate::decode_job::DecodeJob;
use crate::messages::{LoadTicket, ResourceCallback};
use crate::request::RequestKey;
use std::sync::Arc;

pub(crate) struct EngineJob {
    pub key: RequestKey,
    pub memory_cacheable: bool,
    pub only_retrieve_from_cache: bool,
    pub decode_job: Arc<DecodeJob>,
    callbacks: Vec<(LoadTicket, Arc<dyn ResourceCallback>)>,
    cancelled: bool,
}

impl EngineJob {
    pub fn new(
        key: RequestKey,
        memory_cacheable: bool,
        only_retrieve_from_cache: bool,
        decode_job: Arc<DecodeJob>,
    ) -> Self {
        Self {
            key,
            memory_cacheable,
            only_retrieve_from_cache,
            decode_job,
            callbacks: Vec::new(),
            cancelled: false,
        }
    }

    pub fn add_callback(&mut self, ticket: LoadTicket, callback: Arc<dyn ResourceCallback>) {
        assert!(!self.cancelled, "Cannot add a callback to a cancelled job");
        self.callbacks.push((ticket, callback));
    }

    /// Remove one consumer. Returns true if that was the last one.
    pub fn remove_callback(&mut self, ticket: LoadTicket) -> bool {
        self.callbacks.retain(|(existing, _)| *existing != ticket);
        self.callbacks.is_empty()
    }

    /// Stop the decode. The job stays around until the decode reports back.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.decode_job.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Callbacks to notify of the job's outcome.
    ///
    /// # Panics
    ///
    /// Panics if the job has no callbacks left to notify.
    pub fn take_callbacks(&mut self) -> Vec<(LoadTicket, Arc<dyn ResourceCallback>)> {
        assert!(!self.callbacks.is_empty(), "Received a result without any callbacks to notify");
        std::mem::take(&mut self.callbacks)
    }
}
