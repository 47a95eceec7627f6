use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use tracing::warn;

use crate::{
    error::{EngineError, Result},
    events::{BusConfig, EventBus, event_type},
    module::Module,
    queues::{ModuleInbox, StartupTasks},
    routes::{Route, Routes},
    workers::{ModuleStats, WorkerInputs, WorkerWiring},
};

fn invalid(reason: String) -> EngineError {
    EngineError::InvalidModuleRegistry { reason }
}

/// Hard errors for a malformed registry; returns warnings for watched
/// types nothing can produce.
pub fn validate(modules: &[Arc<dyn Module>], seed_types: &[&str]) -> Result<Vec<String>> {
    let mut seen_modules: HashSet<&str> = HashSet::new();
    for m in modules {
        let name = m.name();
        if name.trim().is_empty() {
            return Err(invalid("empty module name".to_string()));
        }
        if !seen_modules.insert(name) {
            return Err(EngineError::DuplicateModule {
                name: name.to_string(),
            });
        }
        if m.watched_events().is_empty() {
            return Err(invalid(format!("module={name} watches no events")));
        }
        if m.concurrency() == Some(0) {
            return Err(invalid(format!("module={name} has concurrency 0")));
        }

        let mut seen_inputs: HashSet<&str> = HashSet::new();
        for t in m.watched_events() {
            if t.trim().is_empty() {
                return Err(invalid(format!("module={name} has empty event_type")));
            }
            if !seen_inputs.insert(*t) {
                return Err(invalid(format!(
                    "module={name} has duplicate watched event_type={t}"
                )));
            }
        }
    }

    let mut warnings = Vec::new();
    for m in modules {
        for watched in m.watched_events() {
            if *watched == event_type::WILDCARD || seed_types.contains(watched) {
                continue;
            }
            let producible = modules.iter().any(|other| {
                other.name() != m.name() && other.produced_events().contains(watched)
            });
            if !producible {
                warnings.push(format!(
                    "module={} watches {watched} but no other module produces it",
                    m.name()
                ));
            }
        }
        let feeds_itself = m
            .produced_events()
            .iter()
            .any(|p| m.watched_events().contains(p) || m.watched_events().contains(&event_type::WILDCARD));
        if feeds_itself {
            warnings.push(format!(
                "module={} consumes its own output; relying on per-module dedup to stop recursion",
                m.name()
            ));
        }
    }
    Ok(warnings)
}

pub struct EventBusBuilder {
    cfg: BusConfig,
    modules: Vec<Arc<dyn Module>>,
    seed_types: Vec<&'static str>,
}

impl EventBusBuilder {
    pub fn new(cfg: BusConfig) -> Self {
        Self {
            cfg,
            modules: Vec::new(),
            seed_types: vec![event_type::SCAN],
        }
    }

    pub fn register(mut self, module: Arc<dyn Module>) -> Self {
        self.modules.push(module);
        self
    }

    pub fn seed_types(mut self, types: impl IntoIterator<Item = &'static str>) -> Self {
        self.seed_types.extend(types);
        self
    }

    pub fn build(self) -> Result<(EventBus, WorkerWiring, StartupTasks)> {
        let warnings = validate(&self.modules, &self.seed_types)?;
        for w in &warnings {
            warn!("{w}");
        }

        let config = Arc::clone(&self.cfg.config);
        let mut table: HashMap<String, Vec<Arc<Route>>> = HashMap::new();
        let mut wildcard = Vec::new();
        let mut by_module = HashMap::new();
        let mut wiring = HashMap::new();
        let mut tasks = StartupTasks { tokio: Vec::new() };

        for module in self.modules {
            let name: Arc<str> = Arc::from(module.name());
            let stats = Arc::new(ModuleStats::default());
            let (inbox, rx, drain_task) = ModuleInbox::new(
                Arc::clone(&name),
                config.queue_high_water,
                config.backpressure_timeout(),
                Arc::clone(&stats),
            );
            tasks.tokio.push(drain_task);

            let max_distance = config
                .max_scope_distance
                .saturating_add(module.scope_distance_modifier());
            let route = Arc::new(Route::new(
                Arc::clone(&name),
                Arc::clone(&module),
                inbox,
                max_distance,
                stats,
            ));

            if module.watched_events().contains(&event_type::WILDCARD) {
                wildcard.push(Arc::clone(&route));
            } else {
                for t in module.watched_events() {
                    table.entry(t.to_string()).or_default().push(Arc::clone(&route));
                }
            }

            by_module.insert(Arc::clone(&name), Arc::clone(&route));
            wiring.insert(name, WorkerInputs::new(route, rx));
        }

        let routes = Routes {
            table,
            wildcard,
            by_module,
        };
        let bus = EventBus::new(self.cfg, routes);
        Ok((bus, WorkerWiring::new(wiring), tasks))
    }
}
