//! The control thread and the active-resource monitor.
//!
//! The control thread owns the [`Engine`] and handles one message at a time,
//! so engine state needs no locking. The monitor waits for resources whose
//! last handle was dropped and turns them into control messages, sweeping
//! the active table whenever it has been idle for a sweep interval.

use crate::config::Config;
use crate::engine::Engine;
use crate::errors::EngineError;
use crate::messages::ControlMessage;
use crate::resource::{Reference, ResourceFactory};
use flume::RecvTimeoutError;
use parking_lot::RwLock;
use pictor_cache::DiskCache;
use pictor_registry::Registry;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// Background threads of a running loader.
pub(crate) struct Threads {
    pub control: JoinHandle<()>,
    pub monitor: JoinHandle<()>,
}

impl Threads {
    /// Wait for both threads to exit.
    pub fn join(self) {
        for (name, handle) in [("control", self.control), ("monitor", self.monitor)] {
            if handle.thread().id() == thread::current().id() {
                continue;
            }
            if handle.join().is_err() {
                error!("The {name} thread panicked");
            }
        }
    }
}

/// Admission of new loads into the control channel.
///
/// The control thread closes the intake before its final drain. A load is
/// sent while the read lock is held, so once the intake is closed every
/// admitted load is already queued and nothing new can be queued.
#[derive(Clone, Default)]
pub(crate) struct Intake {
    closed: Arc<RwLock<bool>>,
}

impl Intake {
    /// Queue `message`, handing it back if the loader no longer accepts work.
    pub fn submit(
        &self,
        control: &flume::Sender<ControlMessage>,
        message: ControlMessage,
    ) -> Result<(), ControlMessage> {
        let closed = self.closed.read();
        if *closed {
            return Err(message);
        }
        control.send(message).map_err(|flume::SendError(message)| message)
    }

    fn close(&self) {
        *self.closed.write() = true;
    }
}

/// Build the engine and start the control and monitor threads.
pub(crate) fn spawn(
    config: &Config,
    registry: Arc<Registry>,
    disk_cache: Arc<dyn DiskCache>,
    intake: Intake,
) -> Result<(flume::Sender<ControlMessage>, Threads), EngineError> {
    let (control_tx, control_rx) = flume::unbounded();
    let (reference_tx, reference_rx) = flume::unbounded();

    let factory = ResourceFactory::new(reference_tx);
    let engine = Engine::new(config, registry, disk_cache, control_tx.clone(), factory)?;

    let sweep_interval = config.sweep_interval();
    let monitor_tx = control_tx.clone();
    let monitor = thread::Builder::new()
        .name("pictor-active-resources".to_string())
        .spawn(move || monitor_loop(&reference_rx, &monitor_tx, sweep_interval))?;
    let control = thread::Builder::new()
        .name("pictor-control".to_string())
        .spawn(move || control_loop(engine, &control_rx, &intake))?;

    Ok((control_tx, Threads { control, monitor }))
}

fn control_loop(mut engine: Engine, messages: &flume::Receiver<ControlMessage>, intake: &Intake) {
    engine.bind_to_current_thread();
    debug!("Control loop started");
    let mut running = true;
    while running {
        match messages.recv() {
            Ok(message) => running = engine.handle(message),
            Err(_) => {
                engine.shutdown();
                running = false;
            }
        }
    }
    intake.close();
    let mut pending = 0;
    for message in messages.drain() {
        if let ControlMessage::Load { callback, .. } = message {
            pending += 1;
            callback.on_load_failed(EngineError::Shutdown);
        }
    }
    debug!("Control loop stopped, failed {pending} pending loads");
}

fn monitor_loop(
    references: &flume::Receiver<Reference>,
    control: &flume::Sender<ControlMessage>,
    sweep_interval: Duration,
) {
    debug!("Active resource monitor started");
    loop {
        let message = match references.recv_timeout(sweep_interval) {
            Ok(Reference::Collected(collected)) => ControlMessage::ResourceCollected(collected),
            Ok(Reference::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => ControlMessage::SweepActive,
        };
        if control.send(message).is_err() {
            break;
        }
    }
    debug!("Active resource monitor stopped");
}
