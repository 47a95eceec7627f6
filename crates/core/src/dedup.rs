//! Two-tier deduplication.
//!
//! The per-module tier guarantees at-most-once `handle_event` per
//! `(module, dedup key)`. The global tier holds one canonical record per
//! event id; later emissions of the same id are folded into that record's
//! provenance instead of becoming a second identity.
//!
//! Both tiers only ever grow for the lifetime of a scan.

use std::{collections::BTreeSet, sync::Arc};

use dashmap::{DashMap, DashSet, mapref::entry::Entry};

use crate::{
    error::{EngineError, Result},
    events::Event,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Created,
    ScopeEvaluated,
    Routed,
    Delivered,
    Settled,
}

/// Canonical record for one logical event.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub event: Arc<Event>,
    /// Union of the canonical event's tags and every merged duplicate's tags.
    pub tags: BTreeSet<String>,
    /// Parent chains of duplicates that reached this fact another way.
    pub alternate_chains: Vec<Vec<String>>,
    pub alternate_paths: Vec<Vec<String>>,
    pub state: EventState,
    pending: usize,
}

impl EventRecord {
    fn new(event: Arc<Event>) -> Self {
        Self {
            tags: event.tags().clone(),
            event,
            alternate_chains: Vec::new(),
            alternate_paths: Vec::new(),
            state: EventState::ScopeEvaluated,
            pending: 0,
        }
    }

    /// Every parent chain this fact has been discovered through.
    pub fn all_chains(&self) -> impl Iterator<Item = &[String]> {
        std::iter::once(self.event.parent_chain()).chain(self.alternate_chains.iter().map(Vec::as_slice))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// First writer: the event becomes canonical and is routed.
    New,
    /// Same id already recorded; provenance merged, nothing routed.
    Duplicate { canonical_uuid: String },
    /// Duplicate whose own ancestry already contains the canonical event.
    /// Not merged, since the chain would be cyclic.
    BackEdge,
}

#[derive(Default)]
pub struct DedupStore {
    per_module: DashSet<(String, String)>,
    events: DashMap<String, EventRecord>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic check-and-insert on the per-module tier. Returns `true` for
    /// the single caller that wins the key.
    pub fn claim(&self, module: &str, key: &str) -> bool {
        self.per_module.insert((module.to_string(), key.to_string()))
    }

    pub fn is_claimed(&self, module: &str, key: &str) -> bool {
        self.per_module.contains(&(module.to_string(), key.to_string()))
    }

    /// Atomic admission on the global tier.
    pub fn admit(&self, event: &Arc<Event>) -> Result<Admission> {
        match self.events.entry(event.id().to_string()) {
            Entry::Vacant(slot) => {
                if event.parent_chain().iter().any(|id| id == event.id()) {
                    // every ancestor is recorded before its children, so a new
                    // identity inside its own chain means the store lost it
                    return Err(EngineError::CycleDetected {
                        event_id: event.id().to_string(),
                        chain: event.parent_chain().to_vec(),
                    });
                }
                slot.insert(EventRecord::new(Arc::clone(event)));
                Ok(Admission::New)
            }
            Entry::Occupied(mut slot) => {
                if event.parent_chain().iter().any(|id| id == event.id()) {
                    return Ok(Admission::BackEdge);
                }
                let record = slot.get_mut();
                record.tags.extend(event.tags().iter().cloned());
                let chain = event.parent_chain();
                if record.all_chains().all(|known| known != chain) {
                    record.alternate_chains.push(chain.to_vec());
                    record.alternate_paths.push(event.discovery_path().to_vec());
                }
                Ok(Admission::Duplicate {
                    canonical_uuid: record.event.uuid().to_string(),
                })
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Event>> {
        self.events.get(id).map(|r| Arc::clone(&r.event))
    }

    pub fn record(&self, id: &str) -> Option<EventRecord> {
        self.events.get(id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub(crate) fn set_state(&self, id: &str, state: EventState) {
        if let Some(mut record) = self.events.get_mut(id) {
            record.state = state;
        }
    }

    /// Marks the event routed with `deliveries` outstanding module
    /// deliveries. Zero deliveries settles it immediately.
    pub(crate) fn routed(&self, id: &str, deliveries: usize) -> EventState {
        match self.events.get_mut(id) {
            Some(mut record) => {
                record.pending += deliveries;
                record.state = if record.pending == 0 {
                    EventState::Settled
                } else {
                    EventState::Delivered
                };
                record.state
            }
            None => EventState::Settled,
        }
    }

    /// One module finished with the event (filtered, deduped, handled or
    /// failed). Returns the resulting state.
    pub(crate) fn delivery_done(&self, id: &str) -> EventState {
        match self.events.get_mut(id) {
            Some(mut record) => {
                record.pending = record.pending.saturating_sub(1);
                if record.pending == 0 {
                    record.state = EventState::Settled;
                }
                record.state
            }
            None => EventState::Settled,
        }
    }

    /// All canonical records in emission order.
    pub fn snapshot(&self) -> Vec<EventRecord> {
        let mut records: Vec<EventRecord> = self.events.iter().map(|r| r.clone()).collect();
        records.sort_by_key(|r| r.event.module_sequence());
        records
    }
}
