//! Owns the full process set and publishes snapshots of it.
//!
//! ```text
//! runner(a) ─┐
//! runner(b) ─┼─► Update channel ─► aggregator thread ─► Snapshot ─► observers
//! runner(c) ─┘                      (only writer)
//! ```
//!
//! Runners never touch the snapshot. Every transition is funneled through
//! the aggregator, so all observers see snapshots in the same order.

use std::collections::HashSet;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::sys::signal::Signal;
use parking_lot::{ReentrantMutex, RwLock};
use tracing::{debug, info, warn};

use super::observers::{Observation, ObserverFn, ObserverRegistry};
use super::process_runner;
use crate::error::{ConfigError, ProcessError};
use crate::model::line_buffer::{LineBuffer, LineBufferConfig};
use crate::model::process::{ProcessDefinition, ProcessState};
use crate::model::snapshot::Snapshot;

/// Message from a runner (or a kill request) to the aggregator.
#[derive(Debug)]
enum Update {
    State {
        slot: usize,
        state: Arc<ProcessState>,
    },
    KillRequested {
        slot: usize,
    },
}

struct Hub {
    current: RwLock<Snapshot>,
    observers: Arc<ObserverRegistry>,
    /// Held while publishing and while registering, so a new observer gets
    /// the current snapshot exactly once and in order. Re-entrant so
    /// callbacks may call `observe` themselves.
    gate: ReentrantMutex<()>,
}

impl Hub {
    fn new(initial: Snapshot) -> Self {
        Self {
            current: RwLock::new(initial),
            observers: Arc::new(ObserverRegistry::new()),
            gate: ReentrantMutex::new(()),
        }
    }

    fn apply(&self, update: Update) {
        let _gate = self.gate.lock();
        let current = self.current.read().clone();
        let Some(next) = reduce(&current, update) else {
            return;
        };
        *self.current.write() = next.clone();
        for observer in self.observers.listeners() {
            observer(&next);
        }
    }
}

/// Next snapshot for `update`, or `None` when nothing changed.
fn reduce(current: &Snapshot, update: Update) -> Option<Snapshot> {
    match update {
        Update::State { slot, state } => {
            let entry = current.entry(slot)?;
            if Arc::ptr_eq(&entry.state, &state) {
                return None;
            }
            if entry.state.is_terminal() {
                warn!(id = %entry.definition.id, "ignoring update after terminal state");
                return None;
            }
            Some(current.with_state(slot, state))
        }
        Update::KillRequested { slot } => {
            let entry = current.entry(slot)?;
            match &*entry.state {
                ProcessState::Launched {
                    kill_requested: false,
                    ..
                } => {
                    let flagged = entry.state.with_kill_requested()?;
                    Some(current.with_state(slot, Arc::new(flagged)))
                }
                ProcessState::Launched { .. }
                | ProcessState::Unlaunched { .. }
                | ProcessState::Finished { .. }
                | ProcessState::Failed { .. } => None,
            }
        }
    }
}

/// Handle to a running group of processes. Cheap to clone; every clone
/// talks to the same aggregator.
#[derive(Clone)]
pub struct Supervisor {
    hub: Arc<Hub>,
    updates: mpsc::Sender<Update>,
}

impl Supervisor {
    /// Start every definition and begin aggregating their transitions.
    ///
    /// Ids must be unique and non-empty; nothing is spawned otherwise.
    /// Definitions with an empty command are already `Failed` in the
    /// snapshot when this returns.
    pub fn launch_all(
        definitions: Vec<ProcessDefinition>,
        buffer: LineBufferConfig,
    ) -> Result<Self, ConfigError> {
        validate_ids(&definitions)?;

        let definitions: Vec<Arc<ProcessDefinition>> =
            definitions.into_iter().map(Arc::new).collect();
        let initial = Snapshot::initial(&definitions, &LineBuffer::new(buffer));
        let hub = Arc::new(Hub::new(initial.clone()));
        let (tx, rx) = mpsc::channel::<Update>();

        for (slot, entry) in initial.iter().enumerate() {
            let tx = tx.clone();
            process_runner::launch(entry.definition.clone(), entry.state.clone(), move |state| {
                let _ = tx.send(Update::State { slot, state });
            });
        }
        info!(count = initial.len(), "launched process group");

        // Synchronous failures are visible before we return.
        while let Ok(update) = rx.try_recv() {
            hub.apply(update);
        }

        let aggregator = hub.clone();
        thread::spawn(move || {
            for update in rx {
                aggregator.apply(update);
            }
            debug!("aggregator stopped");
        });

        Ok(Self { hub, updates: tx })
    }

    /// The latest snapshot. Always covers every configured id.
    pub fn get_state(&self) -> Snapshot {
        self.hub.current.read().clone()
    }

    /// Register `observer` and call it right away with the current snapshot.
    ///
    /// Later calls happen on the aggregator thread, once per published
    /// snapshot; keep them short and non-blocking.
    pub fn observe<F>(&self, observer: F) -> Observation
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let _gate = self.hub.gate.lock();
        let observer: ObserverFn = Arc::new(observer);
        let id = self.hub.observers.register(observer.clone());
        let current = self.get_state();
        observer(&current);
        Observation::new(id, &self.hub.observers)
    }

    /// Close stdin of and signal the group of every launched process.
    /// Returns without waiting; exits show up as ordinary transitions.
    pub fn kill_all(&self, signal: Signal) -> usize {
        let snapshot = self.get_state();
        let mut signalled = 0;
        for entry in snapshot.iter() {
            if let ProcessState::Launched { handle, .. } = &*entry.state {
                handle.close_stdin();
                match handle.signal_group(signal) {
                    Ok(()) => {
                        debug!(id = %entry.definition.id, pgid = handle.pgid(), %signal, "signalled group");
                        signalled += 1;
                    }
                    Err(e) => debug!(id = %entry.definition.id, error = %e, "signal not delivered"),
                }
            }
        }
        info!(signalled, %signal, "kill all");
        signalled
    }

    /// Like [`kill_all`](Self::kill_all), skipping process groups in
    /// `already`, which is extended with every group signalled now.
    pub fn kill_remaining(&self, signal: Signal, already: &mut HashSet<u32>) -> usize {
        let snapshot = self.get_state();
        let mut signalled = 0;
        for entry in snapshot.iter() {
            if let ProcessState::Launched { handle, .. } = &*entry.state {
                if !already.insert(handle.pid()) {
                    continue;
                }
                handle.close_stdin();
                match handle.signal_group(signal) {
                    Ok(()) => {
                        debug!(id = %entry.definition.id, pgid = handle.pgid(), %signal, "signalled group");
                        signalled += 1;
                    }
                    Err(e) => debug!(id = %entry.definition.id, error = %e, "signal not delivered"),
                }
            }
        }
        signalled
    }

    /// Ask one process to stop. Marks it `kill_requested`, closes stdin and
    /// signals its group. `Ok(false)` if the id is unknown or not running.
    pub fn kill_proc(&self, id: &str, signal: Signal) -> Result<bool, ProcessError> {
        let snapshot = self.get_state();
        let Some(slot) = snapshot.slot(id) else {
            return Ok(false);
        };
        let Some(handle) = snapshot.entry(slot).and_then(|e| e.state.handle()) else {
            return Ok(false);
        };
        handle.request_kill();
        handle.close_stdin();
        let _ = self.updates.send(Update::KillRequested { slot });
        handle.signal_group(signal)?;
        info!(%id, pgid = handle.pgid(), %signal, "kill requested");
        Ok(true)
    }

    /// Block until a snapshot satisfies `predicate`, or `timeout` passes.
    pub fn wait_until<P>(&self, timeout: Duration, predicate: P) -> Option<Snapshot>
    where
        P: Fn(&Snapshot) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let observation = self.observe(move |snapshot| {
            if predicate(snapshot) {
                let _ = tx.send(snapshot.clone());
            }
        });
        let found = rx.recv_timeout(timeout).ok();
        observation.cancel();
        found
    }

    /// True once every process is in a terminal state, false on timeout.
    pub fn wait_until_settled(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, Snapshot::is_settled).is_some()
    }
}

fn validate_ids(definitions: &[ProcessDefinition]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for def in definitions {
        if def.id.is_empty() {
            return Err(ConfigError::EmptyId);
        }
        if !seen.insert(def.id.as_str()) {
            return Err(ConfigError::DuplicateId(def.id.clone()));
        }
    }
    Ok(())
}
