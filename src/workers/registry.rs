use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::Instant,
};

use crossbeam::channel::Sender;

use super::protocol::WorkerReply;

struct Listener {
    group: u64,
    sender: Sender<WorkerReply>,
}

struct RegistryState {
    listeners: HashMap<u64, Listener>,
    /// Start time of every registered request a worker is currently rendering.
    in_flight: HashMap<u64, Instant>,
    /// Last time a worker picked up a request or delivered a reply.
    last_activity: Instant,
    closed: bool,
}

/// Snapshot of worker activity for one group of requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activity {
    /// The in-flight request of the group that started first, with its start time.
    pub earliest_start: Option<(u64, Instant)>,
    /// Number of the group's requests currently being rendered.
    pub started: usize,
    pub last_activity: Instant,
}

/**
 * Maps correlation ids to the channel of the batch waiting on them.
 * A listener is removed as soon as its reply is delivered, so it fires at most once;
 * replies for ids that are not registered (abandoned or already answered) are dropped.
 * Workers consult the registry before rendering, so abandoned requests are skipped.
 */
pub struct ListenerRegistry {
    state: Mutex<RegistryState>,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        ListenerRegistry {
            state: Mutex::new(RegistryState {
                listeners: HashMap::new(),
                in_flight: HashMap::new(),
                last_activity: Instant::now(),
                closed: false,
            }),
        }
    }
}

impl ListenerRegistry {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // A panic while holding the lock cannot leave the maps half-updated.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, correlation_id: u64, group: u64, sender: Sender<WorkerReply>) {
        let previous = self
            .lock()
            .listeners
            .insert(correlation_id, Listener { group, sender });
        assert!(
            previous.is_none(),
            "correlation id {} registered twice",
            correlation_id
        );
    }

    pub fn deregister(&self, correlation_id: u64) -> bool {
        let mut state = self.lock();
        state.in_flight.remove(&correlation_id);
        state.listeners.remove(&correlation_id).is_some()
    }

    /// Drops every listener of `group`. Returns how many were still waiting.
    pub fn cancel_group(&self, group: u64) -> usize {
        let mut state = self.lock();
        let cancelled: Vec<u64> = state
            .listeners
            .iter()
            .filter(|(_, listener)| listener.group == group)
            .map(|(&id, _)| id)
            .collect();
        for id in cancelled.iter() {
            state.listeners.remove(id);
            state.in_flight.remove(id);
        }
        cancelled.len()
    }

    /// Called by a worker before it renders a request. Returns `false` when nobody
    /// waits for the reply anymore, in which case the request should be skipped.
    pub fn begin(&self, correlation_id: u64) -> bool {
        let mut state = self.lock();
        if !state.listeners.contains_key(&correlation_id) {
            return false;
        }
        let now = Instant::now();
        state.in_flight.insert(correlation_id, now);
        state.last_activity = now;
        true
    }

    pub fn is_started(&self, correlation_id: u64) -> bool {
        self.lock().in_flight.contains_key(&correlation_id)
    }

    /// Returns `true` when the reply reached a registered listener.
    pub fn deliver(&self, reply: WorkerReply) -> bool {
        let correlation_id = reply.correlation_id();
        let listener = {
            let mut state = self.lock();
            state.last_activity = Instant::now();
            state.in_flight.remove(&correlation_id);
            state.listeners.remove(&correlation_id)
        };
        match listener {
            Some(listener) => {
                if listener.sender.send(reply).is_err() {
                    log::debug!("listener for request {} went away", correlation_id);
                }
                true
            }
            None => {
                log::warn!(
                    "discarding stale reply to request {} (row {})",
                    correlation_id,
                    reply.row()
                );
                false
            }
        }
    }

    /// Worker activity restricted to the requests for which `is_member` holds.
    /// Only in-flight requests are scanned, at most one per worker.
    pub fn activity<F: Fn(u64) -> bool>(&self, is_member: F) -> Activity {
        let state = self.lock();
        let mut earliest_start: Option<(u64, Instant)> = None;
        let mut started = 0;
        for (&id, &start) in state.in_flight.iter().filter(|(id, _)| is_member(**id)) {
            started += 1;
            if earliest_start.map_or(true, |(_, earliest)| start < earliest) {
                earliest_start = Some((id, start));
            }
        }
        Activity {
            earliest_start,
            started,
            last_activity: state.last_activity,
        }
    }

    /// Drops every listener; their receivers observe a disconnect.
    pub fn close(&self) {
        let mut state = self.lock();
        if !state.listeners.is_empty() {
            log::debug!("closing {} pending listeners", state.listeners.len());
        }
        state.listeners.clear();
        state.in_flight.clear();
        state.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
