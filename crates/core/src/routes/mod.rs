use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{events::Event, module::Module, queues::ModuleInbox, workers::ModuleStats};

/// Event type -> interested modules. Wildcard subscribers are kept apart
/// so every lookup is one hash lookup plus the wildcard list.
pub struct Routes {
    pub table: HashMap<String, Vec<Arc<Route>>>,
    pub wildcard: Vec<Arc<Route>>,
    pub by_module: HashMap<Arc<str>, Arc<Route>>,
}

pub struct Route {
    pub name: Arc<str>,
    pub module: Arc<dyn Module>,
    pub inbox: ModuleInbox<Arc<Event>>,
    /// Largest scope distance this module accepts.
    pub max_distance: u32,
    pub stats: Arc<ModuleStats>,
    enabled: AtomicBool,
}

impl Route {
    pub fn new(
        name: Arc<str>,
        module: Arc<dyn Module>,
        inbox: ModuleInbox<Arc<Event>>,
        max_distance: u32,
        stats: Arc<ModuleStats>,
    ) -> Self {
        Self {
            name,
            module,
            inbox,
            max_distance,
            stats,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn accepts_distance(&self, distance: u32) -> bool {
        distance <= self.max_distance
    }
}

impl Routes {
    pub fn matching<'a>(&'a self, event_type: &str) -> impl Iterator<Item = &'a Arc<Route>> + 'a {
        self.table
            .get(event_type)
            .into_iter()
            .flatten()
            .chain(self.wildcard.iter())
    }

    pub fn route(&self, module: &str) -> Option<&Arc<Route>> {
        self.by_module.get(module)
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.by_module.values()
    }
}
