use std::collections::BTreeMap;
use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;

/// Announcement sent to live subscribers after a release is published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseEvent {
    pub version: String,
    pub manifest_url: Option<String>,
}

/// Receiving end handed to a subscriber.
pub struct Subscription {
    pub id: u64,
    pub events: Receiver<ReleaseEvent>,
}

struct HubState {
    next_id: u64,
    closed: bool,
    subscribers: BTreeMap<u64, Sender<ReleaseEvent>>,
}

/// Owns the set of live subscriber channels.
///
/// Callers create one hub per service instance and pass it where events are
/// produced; there is no process-wide registry.
pub struct BroadcastHub {
    capacity: usize,
    state: Mutex<HubState>,
}

impl BroadcastHub {
    /// `capacity` bounds each subscriber's queue; a full queue drops the event
    /// for that subscriber only.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(HubState {
                next_id: 0,
                closed: false,
                subscribers: BTreeMap::new(),
            }),
        }
    }

    /// Register a subscriber. Returns `None` once the hub is closed.
    pub fn subscribe(&self) -> Option<Subscription> {
        let mut st = self.state.lock().unwrap();
        if st.closed {
            return None;
        }
        let (tx, rx) = crossbeam_channel::bounded(self.capacity);
        let id = st.next_id;
        st.next_id += 1;
        st.subscribers.insert(id, tx);
        Some(Subscription { id, events: rx })
    }

    pub fn remove(&self, id: u64) -> bool {
        self.state.lock().unwrap().subscribers.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every subscriber, pruning disconnected ones.
    /// Returns how many subscribers received it.
    pub fn broadcast(&self, event: &ReleaseEvent) -> usize {
        let mut st = self.state.lock().unwrap();
        let mut delivered = 0;
        st.subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!("subscriber {id} is not keeping up, event dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        delivered
    }

    /// Drop every subscriber and refuse new ones.
    pub fn close(&self) {
        let mut st = self.state.lock().unwrap();
        st.closed = true;
        st.subscribers.clear();
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(64)
    }
}
