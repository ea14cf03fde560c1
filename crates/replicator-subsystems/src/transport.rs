//! Transport scheduling: models a bounded pool of transfer slots.
//!
//! Deliveries requested over the bus occupy a transfer slot for the
//! configured time; requests beyond `max_concurrent` wait in a FIFO. The
//! subsystem is observational (storage deposits already happened at task
//! completion), but its occupancy statistics and the fixed overhead power
//! folded into base consumption model the cost of moving material around.

use crate::SubsystemBuildError;
use replicator_core::event::Event;
use replicator_core::id::ResourceId;
use replicator_core::subsystem::{Subsystem, TickContext};
use std::collections::VecDeque;

/// Transport parameters, from the `subsystem_data.transport` block.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Hours one transfer occupies a slot.
    pub transfer_time_hours: f64,
    /// Concurrent transfers supported.
    pub max_concurrent: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            transfer_time_hours: 0.2,
            max_concurrent: 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Transfer {
    resource: ResourceId,
    quantity: f64,
    ready_at: f64,
}

/// The transport subsystem.
#[derive(Debug)]
pub struct TransportScheduler {
    config: TransportConfig,
    in_flight: VecDeque<Transfer>,
    waiting: VecDeque<Transfer>,
    completed_transfers: u64,
    total_quantity_moved: f64,
    last_delivered: Option<ResourceId>,
}

impl TransportScheduler {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            in_flight: VecDeque::new(),
            waiting: VecDeque::new(),
            completed_transfers: 0,
            total_quantity_moved: 0.0,
            last_delivered: None,
        }
    }

    pub fn from_value(data: &serde_json::Value, tag: &str) -> Result<Self, SubsystemBuildError> {
        Ok(Self::new(crate::parse_data(data, tag)?))
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn waiting(&self) -> usize {
        self.waiting.len()
    }

    pub fn completed_transfers(&self) -> u64 {
        self.completed_transfers
    }

    pub fn total_quantity_moved(&self) -> f64 {
        self.total_quantity_moved
    }

    pub fn last_delivered(&self) -> Option<ResourceId> {
        self.last_delivered
    }
}

impl Subsystem for TransportScheduler {
    fn name(&self) -> &str {
        "transport"
    }

    fn on_tick(&mut self, ctx: &TickContext<'_>) -> Vec<Event> {
        // Retire transfers whose time elapsed.
        while let Some(front) = self.in_flight.front() {
            if front.ready_at <= ctx.time {
                let done = self.in_flight.pop_front().expect("front exists");
                self.completed_transfers += 1;
                self.total_quantity_moved += done.quantity;
                self.last_delivered = Some(done.resource);
            } else {
                break;
            }
        }

        // Ingest new requests.
        for event in ctx.events {
            if let Event::TransportRequested {
                resource, quantity, ..
            } = event
            {
                self.waiting.push_back(Transfer {
                    resource: *resource,
                    quantity: *quantity,
                    ready_at: 0.0,
                });
            }
        }

        // Promote waiting transfers into free slots.
        while self.in_flight.len() < self.config.max_concurrent {
            let Some(mut transfer) = self.waiting.pop_front() else {
                break;
            };
            transfer.ready_at = ctx.time + self.config.transfer_time_hours;
            self.in_flight.push_back(transfer);
        }

        Vec::new()
    }
}
