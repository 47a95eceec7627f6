//! Scan controller: owns the module registry and drives the event graph
//! from seeds to quiescence.

use std::{collections::BTreeMap, panic::AssertUnwindSafe, sync::Arc, time::Instant};

use chrono::{NaiveDateTime, Utc};
use futures::{FutureExt, future::join_all};
use tokio::sync::{Semaphore, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::ScanConfig,
    error::{EngineError, Result},
    events::{BusConfig, EmitRequest, EventBus, EventBusBuilder, event_type},
    format::format_duration,
    module::{Module, ModuleContext, ScanContext},
    report::{ScanOutcome, ScanRecord, ScanReport, ScanStatus},
    scope::Target,
    workers::{ModuleWorker, deliver, panic_message},
};

pub const SEED_MODULE: &str = "TARGET";
pub const SCAN_MODULE: &str = "SCAN";

pub struct Scan {
    id: String,
    name: String,
    config: Arc<ScanConfig>,
    target: Arc<Target>,
    modules: Vec<Arc<dyn Module>>,
    cancel: CancellationToken,
    status_tx: watch::Sender<ScanStatus>,
}

impl Scan {
    pub fn new(config: ScanConfig, target: Target) -> Result<Self> {
        config.validate()?;
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("scan-{}", &uuid[..8]));
        let (status_tx, _) = watch::channel(ScanStatus::Pending);

        Ok(Self {
            id: format!("SCAN:{uuid}"),
            name,
            config: Arc::new(config),
            target: Arc::new(target),
            modules: Vec::new(),
            cancel: CancellationToken::new(),
            status_tx,
        })
    }

    pub fn with_module(mut self, module: impl Module) -> Self {
        self.modules.push(Arc::new(module));
        self
    }

    pub fn add_module(&mut self, module: Arc<dyn Module>) {
        self.modules.push(module);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancelling aborts the scan: in-flight handlers are dropped at their
    /// next suspension point and external processes are killed.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ScanStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> ScanStatus {
        self.status_tx.borrow().clone()
    }

    fn scan_record(
        &self,
        status: &ScanStatus,
        started_at: NaiveDateTime,
        clock: Option<Instant>,
    ) -> ScanRecord {
        let elapsed = clock.map(|c| c.elapsed());
        ScanRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            status: status.label().to_string(),
            started_at,
            finished_at: elapsed.map(|_| Utc::now().naive_utc()),
            duration_seconds: elapsed.map(|d| d.as_secs_f64()),
            duration: elapsed.map(format_duration),
            target: (*self.target).clone(),
            config: (*self.config).clone(),
        }
    }

    pub async fn run(self) -> Result<ScanReport> {
        let started_at = Utc::now().naive_utc();
        let clock = Instant::now();
        let seeds = self.target.seed_requests()?;

        let mut builder = EventBusBuilder::new(BusConfig {
            scan_id: self.id.clone(),
            config: Arc::clone(&self.config),
            target: Arc::clone(&self.target),
            cancel: self.cancel.clone(),
        })
        .seed_types(self.target.seed_types()?);
        for module in &self.modules {
            builder = builder.register(Arc::clone(module));
        }
        let (bus, mut wiring, tasks) = builder.build()?;

        self.status_tx.send_replace(ScanStatus::Running);
        info!(
            scan_id = %self.id,
            name = %self.name,
            modules = self.modules.len(),
            seeds = seeds.len(),
            "starting scan"
        );

        // drain tasks must run before anything is published
        let drains: Vec<_> = tasks.tokio.into_iter().map(tokio::spawn).collect();

        let scan_ctx = Arc::new(ScanContext::new(
            self.id.clone(),
            self.name.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.target),
            self.cancel.clone(),
        ));
        let enabled = self.setup_modules(&bus, &scan_ctx).await;

        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let global = Arc::new(Semaphore::new(self.config.global_concurrency));
        let mut workers = Vec::new();
        for (module, ctx) in &enabled {
            let inputs = wiring
                .take(module.name())
                .ok_or_else(|| EngineError::InvalidModuleRegistry {
                    reason: format!("no inbound queue wired for module={}", module.name()),
                })?;
            let pool = module.concurrency().unwrap_or(self.config.module_concurrency);
            for worker_id in 0..pool {
                let worker = ModuleWorker {
                    worker_id,
                    inputs: inputs.clone(),
                    ctx: ctx.clone(),
                    bus: bus.clone(),
                    global: Arc::clone(&global),
                    cancel: self.cancel.clone(),
                    shutdown: shutdown_rx.resubscribe(),
                };
                workers.push(tokio::spawn(worker.run()));
            }
        }
        drop(shutdown_rx);

        let running = ScanStatus::Running;
        if self.config.emit_scan_events {
            let record = self.scan_record(&running, started_at, None);
            let request = EmitRequest::new(event_type::SCAN, serde_json::to_value(&record)?);
            self.publish_root(&bus, SCAN_MODULE, request);
        }
        for seed in seeds {
            self.publish_root(&bus, SEED_MODULE, seed);
        }

        let mut drained = self.drain(&bus).await;
        if drained && self.config.emit_scan_events {
            let finished = ScanStatus::Finished(ScanOutcome::Succeeded);
            let record = self.scan_record(&finished, started_at, Some(clock));
            let request = EmitRequest::new(event_type::SCAN, serde_json::to_value(&record)?);
            self.publish_root(&bus, SCAN_MODULE, request);
            drained = self.drain(&bus).await;
        }

        let _ = shutdown_tx.send(());
        join_all(workers).await;
        for drain in drains {
            drain.abort();
        }

        let outcome = match bus.take_fatal() {
            Some(err) => ScanOutcome::Failed {
                reason: err.to_string(),
            },
            None if !drained => ScanOutcome::Aborted,
            None => ScanOutcome::Succeeded,
        };
        let status = ScanStatus::Finished(outcome);

        // the queues are gone, so an aborted or failed scan hands its final
        // record to the sinks directly
        if !drained && self.config.emit_scan_events {
            let record = self.scan_record(&status, started_at, Some(clock));
            let request = EmitRequest::new(event_type::SCAN, serde_json::to_value(&record)?);
            self.deliver_terminal(&bus, &enabled, request).await;
        }

        self.teardown_modules(&enabled).await;
        self.status_tx.send_replace(status.clone());

        let module_stats: BTreeMap<String, _> = bus
            .routes()
            .all()
            .map(|r| (r.name.to_string(), r.stats.snapshot()))
            .collect();
        let report = ScanReport {
            scan_id: self.id.clone(),
            name: self.name.clone(),
            status,
            started_at,
            finished_at: Utc::now().naive_utc(),
            duration: clock.elapsed(),
            stats: bus.metrics(),
            module_stats,
            graph: bus.dedup().snapshot(),
        };

        info!(
            scan_id = %self.id,
            status = report.status.label(),
            events = report.graph.len(),
            failures = report.total_failures(),
            duration = %format_duration(report.duration),
            "scan finished"
        );
        Ok(report)
    }

    fn publish_root(&self, bus: &EventBus, module: &str, request: EmitRequest) {
        if let Err(e) = bus.publish(None, module, request) {
            warn!(module, error = %e, "failed to publish root event");
        }
    }

    async fn deliver_terminal(
        &self,
        bus: &EventBus,
        enabled: &[(Arc<dyn Module>, ModuleContext)],
        request: EmitRequest,
    ) {
        let (event, targets) = match bus.record_terminal(SCAN_MODULE, request) {
            Ok(Some(recorded)) => recorded,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "failed to record final scan event");
                return;
            }
        };
        let deliveries = targets.iter().filter_map(|route| {
            let (_, ctx) = enabled.iter().find(|(module, _)| module.name() == &*route.name)?;
            Some(deliver(route, ctx, bus, &event, None))
        });
        join_all(deliveries).await;
    }

    /// `true` once the graph is settled, `false` if the scan was cancelled.
    async fn drain(&self, bus: &EventBus) -> bool {
        tokio::select! {
            _ = bus.wait_idle() => !self.cancel.is_cancelled(),
            _ = self.cancel.cancelled() => false,
        }
    }

    /// Runs every `setup` concurrently. A failing module is disabled for the
    /// rest of the scan; the scan itself carries on.
    async fn setup_modules(
        &self,
        bus: &EventBus,
        scan_ctx: &Arc<ScanContext>,
    ) -> Vec<(Arc<dyn Module>, ModuleContext)> {
        let setups = self.modules.iter().map(|module| {
            let ctx = ModuleContext::new(Arc::from(module.name()), bus.clone(), Arc::clone(scan_ctx));
            async move {
                let result = AssertUnwindSafe(module.setup(&ctx)).catch_unwind().await;
                let result = match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(format!("{e:#}")),
                    Err(panic) => Err(format!("setup panicked: {}", panic_message(&panic))),
                };
                (Arc::clone(module), ctx, result)
            }
        });

        let mut enabled = Vec::new();
        for (module, ctx, result) in join_all(setups).await {
            match result {
                Ok(()) => enabled.push((module, ctx)),
                Err(message) => {
                    warn!(module = module.name(), error = %message, "setup failed, module disabled");
                    if let Some(route) = bus.routes().route(module.name()) {
                        route.disable();
                        route.stats.record_setup_error(message);
                    }
                }
            }
        }
        info!(enabled = enabled.len(), total = self.modules.len(), "modules set up");
        enabled
    }

    async fn teardown_modules(&self, enabled: &[(Arc<dyn Module>, ModuleContext)]) {
        let teardowns = enabled.iter().map(|(module, ctx)| async move {
            let result = AssertUnwindSafe(module.teardown(ctx)).catch_unwind().await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(module = module.name(), error = ?e, "teardown failed"),
                Err(panic) => warn!(
                    module = module.name(),
                    panic = %panic_message(&panic),
                    "teardown panicked"
                ),
            }
        });
        join_all(teardowns).await;
    }
}
