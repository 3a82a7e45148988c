//! Typed publish/subscribe registry for ledger state changes.
//!
//! Callbacks run synchronously, in subscription order, after the operation
//! that produced the event has committed.

use std::collections::HashMap;

use serde::Serialize;

use crate::model::{Alert, Checkpoint, Medicine, MedicineStatus};
use crate::verification::Check;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    MedicineRegistered,
    DetailsUpdated,
    VerificationCompleted,
    MedicineTransferred,
    StatusChanged,
    AlertRaised,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    MedicineRegistered {
        record: Medicine,
        block_index: u64,
    },
    DetailsUpdated {
        record: Medicine,
    },
    VerificationCompleted {
        batch_id: String,
        is_authentic: bool,
        checks: Vec<Check>,
        record: Option<Medicine>,
    },
    MedicineTransferred {
        batch_id: String,
        checkpoint: Checkpoint,
    },
    StatusChanged {
        batch_id: String,
        status: MedicineStatus,
    },
    AlertRaised {
        alert: Alert,
    },
}

impl LedgerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::MedicineRegistered { .. } => EventKind::MedicineRegistered,
            Self::DetailsUpdated { .. } => EventKind::DetailsUpdated,
            Self::VerificationCompleted { .. } => EventKind::VerificationCompleted,
            Self::MedicineTransferred { .. } => EventKind::MedicineTransferred,
            Self::StatusChanged { .. } => EventKind::StatusChanged,
            Self::AlertRaised { .. } => EventKind::AlertRaised,
        }
    }
}

pub type Callback = Box<dyn Fn(&LedgerEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct EventBus {
    next_id: u64,
    subscribers: HashMap<EventKind, Vec<(SubscriptionId, Callback)>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<_, _> = self
            .subscribers
            .iter()
            .map(|(k, v)| (*k, v.len()))
            .collect();
        f.debug_struct("EventBus")
            .field("subscribers", &counts)
            .finish_non_exhaustive()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&LedgerEvent) + Send + Sync + 'static,
    {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.subscribers
            .entry(kind)
            .or_default()
            .push((id, Box::new(callback)));
        id
    }

    /// Returns `false` if the id was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for subs in self.subscribers.values_mut() {
            if let Some(pos) = subs.iter().position(|(sid, _)| *sid == id) {
                drop(subs.remove(pos));
                return true;
            }
        }
        false
    }

    pub fn publish(&self, event: &LedgerEvent) {
        if let Some(subs) = self.subscribers.get(&event.kind()) {
            for (_, cb) in subs {
                cb(event);
            }
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers.get(&kind).map_or(0, Vec::len)
    }
}
