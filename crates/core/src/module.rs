use std::{process::Output, sync::Arc};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::{process::Command, sync::Semaphore};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::{
    config::ScanConfig,
    error::{EngineError, Result},
    events::{EmitRequest, Event, EventBus},
    scope::Target,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    Accept,
    Reject(String),
}

impl FilterVerdict {
    pub fn reject(reason: impl Into<String>) -> Self {
        FilterVerdict::Reject(reason.into())
    }
}

/// A pluggable unit of work. The engine never special-cases a concrete
/// module: everything it needs to know is declared here.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Event types to receive. `"*"` subscribes to everything.
    fn watched_events(&self) -> &[&'static str];

    /// Event types this module may emit, used to validate the registry.
    fn produced_events(&self) -> &[&'static str] {
        &[]
    }

    /// Worker-pool size. `None` falls back to `module_concurrency`.
    fn concurrency(&self) -> Option<usize> {
        None
    }

    /// How far past `max_scope_distance` this module still wants events.
    fn scope_distance_modifier(&self) -> u32 {
        0
    }

    /// Key for the per-module dedup tier. `None` opts out, so the module may
    /// see the same logical input more than once.
    fn incoming_dedup_key(&self, event: &Event) -> Option<String> {
        Some(event.id().to_string())
    }

    async fn setup(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn filter_event(
        &self,
        _event: &Event,
        _ctx: &ModuleContext,
    ) -> anyhow::Result<FilterVerdict> {
        Ok(FilterVerdict::Accept)
    }

    async fn handle_event(&self, event: Arc<Event>, ctx: &ModuleContext) -> anyhow::Result<()>;

    async fn teardown(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Per-scan state shared by every module call. Lives exactly as long as
/// the scan that created it.
pub struct ScanContext {
    pub scan_id: String,
    pub scan_name: String,
    pub config: Arc<ScanConfig>,
    pub target: Arc<Target>,
    pub(crate) cancel: CancellationToken,
    pub(crate) blocking: Arc<Semaphore>,
}

impl ScanContext {
    pub(crate) fn new(
        scan_id: String,
        scan_name: String,
        config: Arc<ScanConfig>,
        target: Arc<Target>,
        cancel: CancellationToken,
    ) -> Self {
        let blocking = Arc::new(Semaphore::new(config.blocking_concurrency));
        Self {
            scan_id,
            scan_name,
            config,
            target,
            cancel,
            blocking,
        }
    }
}

/// Handed to every module hook. Cheap to clone.
#[derive(Clone)]
pub struct ModuleContext {
    module: Arc<str>,
    bus: EventBus,
    scan: Arc<ScanContext>,
}

impl ModuleContext {
    pub(crate) fn new(module: Arc<str>, bus: EventBus, scan: Arc<ScanContext>) -> Self {
        Self { module, bus, scan }
    }

    pub fn module_name(&self) -> &str {
        &self.module
    }

    /// Emits a child of `parent`. Returns the new event, or `None` when it
    /// was dropped (invalid, blacklisted) or merged into an existing one.
    pub fn emit(&self, parent: &Arc<Event>, request: EmitRequest) -> Result<Option<Arc<Event>>> {
        self.bus.publish(Some(parent), &self.module, request)
    }

    /// Recorded canonical event by id, e.g. to inspect a parent's tags.
    pub fn lookup(&self, id: &str) -> Option<Arc<Event>> {
        self.bus.lookup(id)
    }

    pub fn parent_of(&self, event: &Event) -> Option<Arc<Event>> {
        event.parent().and_then(|id| self.lookup(id))
    }

    pub fn scan_id(&self) -> &str {
        &self.scan.scan_id
    }

    pub fn config(&self) -> &ScanConfig {
        &self.scan.config
    }

    pub fn target(&self) -> &Target {
        &self.scan.target
    }

    /// This module's `[modules.<name>]` table from the scan config.
    pub fn module_config(&self) -> Option<&toml::Table> {
        self.scan.config.module_options(&self.module)
    }

    pub fn is_cancelled(&self) -> bool {
        self.scan.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.scan.cancel.cancelled()
    }

    /// Runs CPU-heavy or blocking work on the offload pool, bounded by
    /// `blocking_concurrency`.
    pub async fn run_blocking<F, R>(&self, f: F) -> anyhow::Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let _permit = tokio::select! {
            _ = self.scan.cancel.cancelled() => return Err(EngineError::Cancelled.into()),
            permit = Arc::clone(&self.scan.blocking).acquire_owned() => permit?,
        };
        Ok(tokio::task::spawn_blocking(f).await?)
    }

    /// Runs an external process to completion. On scan cancellation the
    /// child is killed rather than awaited.
    pub async fn run_process(&self, mut command: Command) -> anyhow::Result<Output> {
        command.kill_on_drop(true);
        let _permit = tokio::select! {
            _ = self.scan.cancel.cancelled() => return Err(EngineError::Cancelled.into()),
            permit = Arc::clone(&self.scan.blocking).acquire_owned() => permit?,
        };
        let child = command
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .with_context(|| format!("{}: failed to spawn process", self.module))?;

        tokio::select! {
            // dropping the child kills it
            _ = self.scan.cancel.cancelled() => Err(EngineError::Cancelled.into()),
            output = child.wait_with_output() => Ok(output?),
        }
    }
}
