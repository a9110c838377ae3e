use std::collections::HashMap;
use std::sync::Arc;

use super::line_buffer::LineBuffer;
use super::process::{ProcessDefinition, ProcessState};

/// One process and where it currently is in its lifecycle.
#[derive(Debug)]
pub struct ProcEntry {
    pub definition: Arc<ProcessDefinition>,
    pub state: Arc<ProcessState>,
}

/// Immutable point-in-time view of every supervised process, in
/// configuration order. Cloning is cheap; replacing one entry shares all
/// the others with the previous snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    entries: Arc<[Arc<ProcEntry>]>,
    index: Arc<HashMap<String, usize>>,
}

impl Snapshot {
    /// Every definition in the `Unlaunched` state with an empty buffer.
    /// Ids are assumed unique; the supervisor validates that beforehand.
    pub fn initial(definitions: &[Arc<ProcessDefinition>], lines: &LineBuffer) -> Self {
        let entries: Vec<Arc<ProcEntry>> = definitions
            .iter()
            .map(|definition| {
                Arc::new(ProcEntry {
                    definition: definition.clone(),
                    state: Arc::new(ProcessState::unlaunched(lines.clone())),
                })
            })
            .collect();
        let index = definitions
            .iter()
            .enumerate()
            .map(|(slot, d)| (d.id.clone(), slot))
            .collect();
        Self {
            entries: entries.into(),
            index: Arc::new(index),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ProcEntry> {
        self.index.get(id).map(|&slot| &*self.entries[slot])
    }

    pub fn slot(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn entry(&self, slot: usize) -> Option<&ProcEntry> {
        self.entries.get(slot).map(|e| &**e)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcEntry> + '_ {
        self.entries.iter().map(|e| &**e)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// New snapshot with `state` at `slot`; every other entry is shared.
    pub fn with_state(&self, slot: usize, state: Arc<ProcessState>) -> Snapshot {
        let entries: Vec<Arc<ProcEntry>> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                if i == slot {
                    Arc::new(ProcEntry {
                        definition: entry.definition.clone(),
                        state: state.clone(),
                    })
                } else {
                    entry.clone()
                }
            })
            .collect();
        Snapshot {
            entries: entries.into(),
            index: self.index.clone(),
        }
    }

    pub fn ptr_eq(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    /// Nothing is running, or everything still running has been asked to stop.
    pub fn is_exiting(&self) -> bool {
        self.iter().all(|e| match &*e.state {
            ProcessState::Launched { kill_requested, .. } => *kill_requested,
            _ => true,
        })
    }

    /// Every process has reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.iter().all(|e| e.state.is_terminal())
    }

    pub fn running_count(&self) -> usize {
        self.iter()
            .filter(|e| matches!(*e.state, ProcessState::Launched { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::process::ProcessHandle;

    fn defs(ids: &[&str]) -> Vec<Arc<ProcessDefinition>> {
        ids.iter()
            .map(|id| Arc::new(ProcessDefinition::new(*id, vec!["true".into()])))
            .collect()
    }

    #[test]
    fn test_initial_covers_every_definition() {
        let snap = Snapshot::initial(&defs(&["a", "b", "c"]), &LineBuffer::default());
        assert_eq!(snap.len(), 3);
        for id in ["a", "b", "c"] {
            let entry = snap.get(id).unwrap();
            assert_eq!(entry.definition.id, id);
            assert!(matches!(*entry.state, ProcessState::Unlaunched { .. }));
            assert!(entry.state.lines().is_empty());
        }
        let order: Vec<&str> = snap.iter().map(|e| e.definition.id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(snap.get("zzz").is_none());
    }

    #[test]
    fn test_with_state_shares_other_entries() {
        let snap = Snapshot::initial(&defs(&["a", "b"]), &LineBuffer::default());
        let failed = Arc::new(ProcessState::failed(
            LineBuffer::default(),
            crate::error::ProcessError::NoCommand,
        ));
        let next = snap.with_state(1, failed.clone());

        assert!(Arc::ptr_eq(&snap.entries[0], &next.entries[0]));
        assert!(Arc::ptr_eq(&next.get("b").unwrap().state, &failed));
        assert!(matches!(
            *snap.get("b").unwrap().state,
            ProcessState::Unlaunched { .. }
        ));
        assert!(!snap.ptr_eq(&next));
        assert!(snap.ptr_eq(&snap.clone()));
    }

    #[test]
    fn test_exiting_and_settled() {
        let snap = Snapshot::initial(&defs(&["a"]), &LineBuffer::default());
        assert!(snap.is_exiting());
        assert!(!snap.is_settled());

        let handle = Arc::new(ProcessHandle::new(7, None));
        let running = snap.with_state(
            0,
            Arc::new(ProcessState::Launched {
                lines: LineBuffer::default(),
                handle,
                kill_requested: false,
            }),
        );
        assert!(!running.is_exiting());
        assert_eq!(running.running_count(), 1);

        let stopping = running.with_state(
            0,
            Arc::new(running.get("a").unwrap().state.with_kill_requested().unwrap()),
        );
        assert!(stopping.is_exiting());
        assert!(!stopping.is_settled());

        let done = stopping.with_state(
            0,
            Arc::new(ProcessState::failed(
                LineBuffer::default(),
                crate::error::ProcessError::NoCommand,
            )),
        );
        assert!(done.is_settled());
        assert_eq!(done.running_count(), 0);
    }
}
