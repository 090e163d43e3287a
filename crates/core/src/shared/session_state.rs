use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::event_bus::{EventBus, PipelineEvent};

/// Mutable pipeline flags observed by the presentation layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionState {
    pub is_recording: bool,
    pub is_mirrored: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            is_recording: false,
            is_mirrored: true,
        }
    }
}

struct Slot {
    state: SessionState,
    change_count: u64,
}

/// The single authoritative [`SessionState`] of a pipeline.
///
/// Reads and writes are short critical sections on one mutex. Every committed
/// write bumps the change counter and publishes a
/// [`PipelineEvent::StateChanged`], even when the value did not change.
pub struct SessionStateStore {
    slot: Mutex<Slot>,
    events: Arc<EventBus>,
}

impl SessionStateStore {
    pub fn new(initial: SessionState, events: Arc<EventBus>) -> Self {
        Self {
            slot: Mutex::new(Slot {
                state: initial,
                change_count: 0,
            }),
            events,
        }
    }

    pub fn get(&self) -> SessionState {
        self.lock().state
    }

    pub fn change_count(&self) -> u64 {
        self.lock().change_count
    }

    pub fn set(&self, state: SessionState) {
        self.update(|s| *s = state);
    }

    /// Read-modify-write under the lock; returns the committed state.
    pub fn update(&self, mutate: impl FnOnce(&mut SessionState)) -> SessionState {
        let mut slot = self.lock();
        mutate(&mut slot.state);
        slot.change_count += 1;
        let event = PipelineEvent::StateChanged {
            state: slot.state,
            change_count: slot.change_count,
        };
        // Published under the lock so observers see changes in commit order.
        self.events.publish(event);
        slot.state
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (SessionStateStore, crossbeam_channel::Receiver<PipelineEvent>) {
        let bus = Arc::new(EventBus::new());
        let rx = bus.subscribe();
        (SessionStateStore::new(SessionState::default(), bus), rx)
    }

    #[test]
    fn test_default_state_is_mirrored_and_idle() {
        let state = SessionState::default();
        assert!(!state.is_recording);
        assert!(state.is_mirrored);
    }

    #[test]
    fn test_update_commits_and_counts() {
        let (store, _rx) = store();
        let committed = store.update(|s| s.is_recording = true);
        assert!(committed.is_recording);
        assert!(store.get().is_recording);
        assert_eq!(store.change_count(), 1);
    }

    #[test]
    fn test_every_write_notifies_even_without_change() {
        let (store, rx) = store();
        let same = store.get();
        store.set(same);
        store.set(same);
        assert_eq!(store.change_count(), 2);
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn test_notification_carries_committed_state() {
        let (store, rx) = store();
        store.update(|s| s.is_mirrored = false);
        match rx.try_recv().unwrap() {
            PipelineEvent::StateChanged {
                state,
                change_count,
            } => {
                assert!(!state.is_mirrored);
                assert_eq!(change_count, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_reads_do_not_count_as_changes() {
        let (store, rx) = store();
        let _ = store.get();
        let _ = store.get();
        assert_eq!(store.change_count(), 0);
        assert!(rx.is_empty());
    }
}
