//! Bounded publish/subscribe event bus between the core and subsystems.
//!
//! Publishing is non-blocking: when the queue is full the event is dropped
//! and counted. Cumulative drops beyond 10 % of queue capacity are fatal and
//! surface as [`EngineError::EventQueueOverflow`] from the tick loop. The
//! drain phase snapshots the subscriber list under its lock, releases the
//! lock, and then invokes handlers, so a handler registering another
//! subscriber takes effect next tick. A bounded history deque retains the
//! most recent events for inspection.
//!
//! [`EngineError::EventQueueOverflow`]: crate::error::EngineError::EventQueueOverflow

use crate::id::{ModuleTypeId, ResourceId, TaskId};
use std::collections::VecDeque;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A simulation event. All events carry the simulated time at which they
/// occurred, in hours.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub enum Event {
    // -- Production --
    ResourceProduced {
        resource: ResourceId,
        quantity: f64,
        task: TaskId,
        time: f64,
    },
    ResourceConsumed {
        resource: ResourceId,
        quantity: f64,
        task: TaskId,
        time: f64,
    },
    WasteGenerated {
        resource: ResourceId,
        quantity: f64,
        time: f64,
    },

    // -- Modules --
    ModuleCreated {
        module: ModuleTypeId,
        count: f64,
        time: f64,
    },
    ModuleFailed {
        module: ModuleTypeId,
        time: f64,
    },

    // -- Tasks --
    TaskStarted {
        task: TaskId,
        resource: ResourceId,
        time: f64,
    },
    TaskCompleted {
        task: TaskId,
        resource: ResourceId,
        time: f64,
    },
    StorageFull {
        task: TaskId,
        resource: ResourceId,
        time: f64,
    },

    // -- Logistics & environment --
    TransportRequested {
        resource: ResourceId,
        quantity: f64,
        time: f64,
    },
    EnergyAvailable {
        battery_kwh: f64,
        generated_kwh: f64,
        time: f64,
    },
    ThermalLimitReached {
        temperature_c: f64,
        time: f64,
    },
    ContaminationLevel {
        level: f64,
        time: f64,
    },

    // -- Subsystem proposals (applied by the core next tick) --
    ResourceRecovered {
        resource: ResourceId,
        quantity: f64,
        time: f64,
    },
    TaskRequested {
        resource: ResourceId,
        quantity: f64,
        time: f64,
    },
}

/// Discriminant tag for event types, used for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum EventKind {
    ResourceProduced,
    ResourceConsumed,
    WasteGenerated,
    ModuleCreated,
    ModuleFailed,
    TaskStarted,
    TaskCompleted,
    StorageFull,
    TransportRequested,
    EnergyAvailable,
    ThermalLimitReached,
    ContaminationLevel,
    ResourceRecovered,
    TaskRequested,
}

impl Event {
    /// Get the discriminant kind for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ResourceProduced { .. } => EventKind::ResourceProduced,
            Event::ResourceConsumed { .. } => EventKind::ResourceConsumed,
            Event::WasteGenerated { .. } => EventKind::WasteGenerated,
            Event::ModuleCreated { .. } => EventKind::ModuleCreated,
            Event::ModuleFailed { .. } => EventKind::ModuleFailed,
            Event::TaskStarted { .. } => EventKind::TaskStarted,
            Event::TaskCompleted { .. } => EventKind::TaskCompleted,
            Event::StorageFull { .. } => EventKind::StorageFull,
            Event::TransportRequested { .. } => EventKind::TransportRequested,
            Event::EnergyAvailable { .. } => EventKind::EnergyAvailable,
            Event::ThermalLimitReached { .. } => EventKind::ThermalLimitReached,
            Event::ContaminationLevel { .. } => EventKind::ContaminationLevel,
            Event::ResourceRecovered { .. } => EventKind::ResourceRecovered,
            Event::TaskRequested { .. } => EventKind::TaskRequested,
        }
    }

    /// Simulated time the event was published at.
    pub fn time(&self) -> f64 {
        match self {
            Event::ResourceProduced { time, .. }
            | Event::ResourceConsumed { time, .. }
            | Event::WasteGenerated { time, .. }
            | Event::ModuleCreated { time, .. }
            | Event::ModuleFailed { time, .. }
            | Event::TaskStarted { time, .. }
            | Event::TaskCompleted { time, .. }
            | Event::StorageFull { time, .. }
            | Event::TransportRequested { time, .. }
            | Event::EnergyAvailable { time, .. }
            | Event::ThermalLimitReached { time, .. }
            | Event::ContaminationLevel { time, .. }
            | Event::ResourceRecovered { time, .. }
            | Event::TaskRequested { time, .. } => *time,
        }
    }
}

// ---------------------------------------------------------------------------
// Subscribers
// ---------------------------------------------------------------------------

/// A subscriber handler. Receives events read-only during the drain phase.
pub type EventHandler = Box<dyn FnMut(&Event) + Send>;

struct SubscriberEntry {
    kind: EventKind,
    handler: EventHandler,
}

impl std::fmt::Debug for SubscriberEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberEntry")
            .field("kind", &self.kind)
            .field("handler", &"<fn>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// The central event bus: bounded FIFO queue, per-kind subscribers, drop
/// accounting, and a bounded history of recent events.
pub struct EventBus {
    /// Pending events, drained once per tick.
    queue: VecDeque<Event>,
    /// Maximum queued events; publishes beyond this are dropped.
    capacity: usize,
    /// Events dropped because the queue was full.
    dropped: u64,
    /// Total publish attempts (including drops).
    total_published: u64,
    /// Subscriber list. The lock covers list mutations only; handlers are
    /// invoked outside it against a snapshot.
    subscribers: Mutex<Vec<SubscriberEntry>>,
    /// Most recent events, oldest first.
    history: VecDeque<Event>,
    history_capacity: usize,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("queued", &self.queue.len())
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped)
            .field("total_published", &self.total_published)
            .field("history_len", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Create a bus with the given queue and history capacities.
    pub fn new(capacity: usize, history_capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity.min(4096)),
            capacity: capacity.max(1),
            dropped: 0,
            total_published: 0,
            subscribers: Mutex::new(Vec::new()),
            history: VecDeque::with_capacity(history_capacity.min(4096)),
            history_capacity: history_capacity.max(1),
        }
    }

    /// Non-blocking publish. On overflow the event is dropped and counted.
    pub fn publish(&mut self, event: Event) {
        self.total_published += 1;
        if self.queue.len() >= self.capacity {
            self.dropped += 1;
            return;
        }
        self.queue.push_back(event);
    }

    /// Register a handler for one event kind. Registration during a drain
    /// takes effect at the next drain.
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) {
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .push(SubscriberEntry { kind, handler });
    }

    /// Drain all queued events: append to history, invoke subscribers against
    /// a snapshot of the subscriber list, and return the drained events for
    /// the core's own handling.
    pub fn drain(&mut self) -> Vec<Event> {
        let events: Vec<Event> = self.queue.drain(..).collect();
        if events.is_empty() {
            return events;
        }

        for event in &events {
            if self.history.len() >= self.history_capacity {
                self.history.pop_front();
            }
            self.history.push_back(event.clone());
        }

        // Snapshot under the lock, invoke outside it. Handlers that mutate
        // the subscriber list land in the live list and run next tick.
        let mut snapshot = {
            let mut guard = self.subscribers.lock().expect("subscriber lock poisoned");
            std::mem::take(&mut *guard)
        };
        for entry in &mut snapshot {
            for event in &events {
                if event.kind() == entry.kind {
                    (entry.handler)(event);
                }
            }
        }
        {
            let mut guard = self.subscribers.lock().expect("subscriber lock poisoned");
            // Keep snapshot order ahead of registrations made during dispatch.
            let added = std::mem::take(&mut *guard);
            snapshot.extend(added);
            *guard = snapshot;
        }

        events
    }

    /// Whether cumulative drops exceed 10 % of queue capacity.
    pub fn overflow_exceeded(&self) -> bool {
        self.dropped * 10 > self.capacity as u64
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn total_published(&self) -> u64 {
        self.total_published
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Recent events, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Event> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}
