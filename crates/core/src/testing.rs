//! Closure-driven module for building event graphs in tests.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    events::Event,
    module::{FilterVerdict, Module, ModuleContext},
};

type HandleFn = Arc<dyn Fn(&Arc<Event>, &ModuleContext) -> anyhow::Result<()> + Send + Sync>;
type FilterFn = Arc<dyn Fn(&Event) -> FilterVerdict + Send + Sync>;
type DedupFn = Arc<dyn Fn(&Event) -> Option<String> + Send + Sync>;

/// What a [`ScriptedModule`] saw, readable after the module moved into a
/// scan.
#[derive(Default)]
pub struct Observed {
    invocations: AtomicUsize,
    setups: AtomicUsize,
    teardowns: AtomicUsize,
    handled: Mutex<Vec<Arc<Event>>>,
}

impl Observed {
    /// `handle_event` calls, successful or not.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    pub fn handled(&self) -> Vec<Arc<Event>> {
        self.handled.lock().map(|h| h.clone()).unwrap_or_default()
    }

    pub fn handled_ids(&self) -> Vec<String> {
        self.handled().iter().map(|e| e.id().to_string()).collect()
    }
}

pub struct ScriptedModule {
    name: String,
    watched: Vec<&'static str>,
    produced: Vec<&'static str>,
    concurrency: Option<usize>,
    modifier: u32,
    delay: Option<Duration>,
    fail_setup: bool,
    handler: Option<HandleFn>,
    filter: Option<FilterFn>,
    dedup_key: Option<DedupFn>,
    seen: Arc<Observed>,
}

impl ScriptedModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            watched: Vec::new(),
            produced: Vec::new(),
            concurrency: None,
            modifier: 0,
            delay: None,
            fail_setup: false,
            handler: None,
            filter: None,
            dedup_key: None,
            seen: Arc::new(Observed::default()),
        }
    }

    pub fn watching(mut self, types: &[&'static str]) -> Self {
        self.watched = types.to_vec();
        self
    }

    pub fn producing(mut self, types: &[&'static str]) -> Self {
        self.produced = types.to_vec();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = Some(n);
        self
    }

    pub fn distance_modifier(mut self, modifier: u32) -> Self {
        self.modifier = modifier;
        self
    }

    /// Sleeps before every handler call.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_setup(mut self) -> Self {
        self.fail_setup = true;
        self
    }

    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Event>, &ModuleContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(f));
        self
    }

    pub fn filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Event) -> FilterVerdict + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(f));
        self
    }

    pub fn dedup_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&Event) -> Option<String> + Send + Sync + 'static,
    {
        self.dedup_key = Some(Arc::new(f));
        self
    }

    pub fn seen(&self) -> Arc<Observed> {
        Arc::clone(&self.seen)
    }
}

#[async_trait]
impl Module for ScriptedModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn watched_events(&self) -> &[&'static str] {
        &self.watched
    }

    fn produced_events(&self) -> &[&'static str] {
        &self.produced
    }

    fn concurrency(&self) -> Option<usize> {
        self.concurrency
    }

    fn scope_distance_modifier(&self) -> u32 {
        self.modifier
    }

    fn incoming_dedup_key(&self, event: &Event) -> Option<String> {
        match &self.dedup_key {
            Some(f) => f(event),
            None => Some(event.id().to_string()),
        }
    }

    async fn setup(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        self.seen.setups.fetch_add(1, Ordering::SeqCst);
        if self.fail_setup {
            anyhow::bail!("{} refused to start", self.name);
        }
        Ok(())
    }

    async fn filter_event(&self, event: &Event, _ctx: &ModuleContext) -> anyhow::Result<FilterVerdict> {
        Ok(match &self.filter {
            Some(f) => f(event),
            None => FilterVerdict::Accept,
        })
    }

    async fn handle_event(&self, event: Arc<Event>, ctx: &ModuleContext) -> anyhow::Result<()> {
        self.seen.invocations.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Ok(mut handled) = self.seen.handled.lock() {
            handled.push(Arc::clone(&event));
        }
        match &self.handler {
            Some(f) => f(&event, ctx),
            None => Ok(()),
        }
    }

    async fn teardown(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        self.seen.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
