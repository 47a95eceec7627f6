use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::Context as _;
use async_trait::async_trait;

use crate::{
    events::{Event, event_type},
    module::{Module, ModuleContext},
    report::ScanRecord,
    scope::Target,
};

#[derive(Default)]
struct Tables {
    /// Keyed by uuid, so a re-delivered instance overwrites itself.
    events: BTreeMap<String, Event>,
    scans: BTreeMap<String, ScanRecord>,
    targets: BTreeMap<String, Target>,
}

/// In-memory persistence sink. Clones share the same tables, so keep one
/// handle and register the other.
#[derive(Clone, Default)]
pub struct MemorySink {
    tables: Arc<Mutex<Tables>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Stored events in emission order. `SCAN` events live in [`scans`](Self::scans).
    pub fn events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self.tables().events.values().cloned().collect();
        events.sort_by_key(Event::module_sequence);
        events
    }

    pub fn event_count(&self) -> usize {
        self.tables().events.len()
    }

    pub fn find(&self, event_type: &str, data: &str) -> Option<Event> {
        self.tables()
            .events
            .values()
            .find(|e| e.event_type() == event_type && e.data_str() == Some(data))
            .cloned()
    }

    pub fn scan(&self, id: &str) -> Option<ScanRecord> {
        self.tables().scans.get(id).cloned()
    }

    pub fn scans(&self) -> Vec<ScanRecord> {
        self.tables().scans.values().cloned().collect()
    }

    pub fn targets(&self) -> Vec<Target> {
        self.tables().targets.values().cloned().collect()
    }
}

#[async_trait]
impl Module for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn watched_events(&self) -> &[&'static str] {
        &[event_type::WILDCARD]
    }

    async fn handle_event(&self, event: Arc<Event>, _ctx: &ModuleContext) -> anyhow::Result<()> {
        if event.event_type() == event_type::SCAN {
            let record: ScanRecord = serde_json::from_value(event.data().clone())
                .context("SCAN event does not carry a scan record")?;
            let mut tables = self.tables();
            tables
                .targets
                .insert(record.target.hash.clone(), record.target.clone());
            tables.scans.insert(record.id.clone(), record);
            return Ok(());
        }

        self.tables()
            .events
            .insert(event.uuid().to_string(), (*event).clone());
        Ok(())
    }
}
