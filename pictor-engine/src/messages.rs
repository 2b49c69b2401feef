//! Messages exchanged between the loader handle, the control thread and the
//! decode workers.

use crate::engine::EngineSnapshot;
use crate::errors::EngineError;
use crate::jobs::JobId;
use crate::request::LoadRequest;
use crate::resource::{Collected, EngineResource};
use pictor_cache::TrimLevel;
use pictor_common::{DataSource, Resource};
use std::fmt;
use std::sync::Arc;

/// Receives the outcome of a load.
///
/// Both methods run on the engine's control thread and should return quickly.
/// Exactly one of them is called per load unless the load is cancelled first.
pub trait ResourceCallback: Send + Sync {
    /// The resource is ready. The consumer owns one acquisition of it and
    /// must hand it back with [`LoaderHandle::release`](crate::LoaderHandle::release).
    fn on_resource_ready(&self, resource: EngineResource, data_source: DataSource);

    /// The load failed.
    fn on_load_failed(&self, error: EngineError);
}

/// Identity of one call to [`LoaderHandle::load`](crate::LoaderHandle::load).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadTicket(pub(crate) u64);

impl fmt::Display for LoadTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "load{}", self.0)
    }
}

/// Work for the control thread.
pub(crate) enum ControlMessage {
    Load {
        ticket: LoadTicket,
        request: LoadRequest,
        callback: Arc<dyn ResourceCallback>,
    },
    Cancel(LoadTicket),
    Release(EngineResource),
    JobReady {
        job: JobId,
        resource: Arc<Resource>,
        data_source: DataSource,
        is_from_alternate: bool,
    },
    JobFailed {
        job: JobId,
        error: EngineError,
    },
    ResourceCollected(Collected),
    SweepActive,
    ClearMemory,
    TrimMemory(TrimLevel),
    SetMemorySizeMultiplier(f32),
    ClearDiskCache,
    Snapshot(flume::Sender<EngineSnapshot>),
    Shutdown,
}

impl fmt::Debug for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load { ticket, request, .. } => write!(f, "Load({ticket}, {request:?})"),
            Self::Cancel(ticket) => write!(f, "Cancel({ticket})"),
            Self::Release(resource) => write!(f, "Release({resource:?})"),
            Self::JobReady { job, data_source, .. } => write!(f, "JobReady({job}, {data_source})"),
            Self::JobFailed { job, error } => write!(f, "JobFailed({job}, {error})"),
            Self::ResourceCollected(collected) => write!(f, "ResourceCollected({collected:?})"),
            Self::SweepActive => f.write_str("SweepActive"),
            Self::ClearMemory => f.write_str("ClearMemory"),
            Self::TrimMemory(level) => write!(f, "TrimMemory({level:?})"),
            Self::SetMemorySizeMultiplier(multiplier) => {
                write!(f, "SetMemorySizeMultiplier({multiplier})")
            }
            Self::ClearDiskCache => f.write_str("ClearDiskCache"),
            Self::Snapshot(_) => f.write_str("Snapshot"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}
