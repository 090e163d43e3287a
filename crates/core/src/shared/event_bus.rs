use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::constants::EVENT_CHANNEL_CAPACITY;
use super::session_state::SessionState;

/// Notifications published to the presentation layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PipelineEvent {
    /// A session-state mutation was committed. `change_count` only signals
    /// that something changed; compare it for inequality, nothing more.
    StateChanged {
        state: SessionState,
        change_count: u64,
    },
    /// A new preview image is available; `pts` is the source frame's timestamp.
    PreviewUpdated { pts: Duration },
}

/// Fan-out of pipeline events over bounded channels.
///
/// Publishing never blocks: a subscriber that falls behind loses events
/// (the authoritative values stay readable from the pipeline), and
/// subscribers whose receiver was dropped are pruned.
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<PipelineEvent>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        let (tx, rx) = crossbeam_channel::bounded(self.capacity);
        self.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: PipelineEvent) {
        self.lock().retain(|tx| match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::trace!("Dropping {event:?} for a lagging subscriber");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Sender<PipelineEvent>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preview(ms: u64) -> PipelineEvent {
        PipelineEvent::PreviewUpdated {
            pts: Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_every_subscriber_receives_event() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(preview(1));
        assert_eq!(a.try_recv().unwrap(), preview(1));
        assert_eq!(b.try_recv().unwrap(), preview(1));
    }

    #[test]
    fn test_full_subscriber_does_not_block() {
        let bus = EventBus::with_capacity(2);
        let rx = bus.subscribe();
        for i in 0..10 {
            bus.publish(preview(i));
        }
        assert_eq!(rx.len(), 2);
        assert_eq!(rx.try_recv().unwrap(), preview(0));
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let _kept = bus.subscribe();
        drop(rx);
        bus.publish(preview(0));
        assert_eq!(bus.subscriber_count(), 1);
    }
}
