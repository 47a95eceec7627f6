use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::{
    config::ScanConfig,
    dedup::{Admission, DedupStore, EventState},
    error::{EngineError, Result},
    events::{EmitRequest, Event},
    routes::{Route, Routes},
    scope::{ScopeCalculator, ScopeVerdict, Target},
    workers::dedup_key,
};

/// Graph-wide counters.
#[derive(Default)]
pub struct BusMetrics {
    pub emitted: AtomicU64,
    pub duplicates: AtomicU64,
    pub back_edges: AtomicU64,
    pub blacklisted: AtomicU64,
    pub invalid: AtomicU64,
    pub distance_capped: AtomicU64,
    pub cycles: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BusMetricsSnapshot {
    pub emitted: u64,
    pub duplicates: u64,
    pub back_edges: u64,
    pub blacklisted: u64,
    pub invalid: u64,
    pub distance_capped: u64,
    pub cycles: u64,
}

impl BusMetrics {
    pub fn snapshot(&self) -> BusMetricsSnapshot {
        BusMetricsSnapshot {
            emitted: self.emitted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            back_edges: self.back_edges.load(Ordering::Relaxed),
            blacklisted: self.blacklisted.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            distance_capped: self.distance_capped.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
        }
    }
}

/// Outstanding module deliveries across the whole scan. Zero means every
/// routed event is settled.
#[derive(Default)]
pub struct Inflight {
    count: AtomicUsize,
    notify: Notify,
}

impl Inflight {
    fn add(&self, n: usize) {
        self.count.fetch_add(n, Ordering::AcqRel);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.notify.notify_waiters();
        }
    }

    pub fn pending(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub async fn wait_zero(&self) {
        loop {
            // register before checking, notify_waiters is edge-triggered
            let notified = self.notify.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

pub struct BusConfig {
    pub scan_id: String,
    pub config: Arc<ScanConfig>,
    pub target: Arc<Target>,
    pub cancel: CancellationToken,
}

/// Central router: scope evaluation, global dedup, and fan-out to module
/// inboxes.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

pub struct EventBusInner {
    scan_id: String,
    next_sequence: AtomicU64,
    routes: Routes,
    dedup: DedupStore,
    target: Arc<Target>,
    metrics: BusMetrics,
    inflight: Inflight,
    cancel: CancellationToken,
    fatal: Mutex<Option<EngineError>>,
}

impl EventBus {
    pub fn new(cfg: BusConfig, routes: Routes) -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                scan_id: cfg.scan_id,
                next_sequence: AtomicU64::new(0),
                routes,
                dedup: DedupStore::new(),
                target: cfg.target,
                metrics: BusMetrics::default(),
                inflight: Inflight::default(),
                cancel: cfg.cancel,
                fatal: Mutex::new(None),
            }),
        }
    }

    /// Created -> ScopeEvaluated -> Routed -> Delivered/Settled.
    ///
    /// Returns the routed event, or `None` when it was dropped or merged.
    /// Only graph-integrity failures and cancellation are errors.
    pub fn publish(
        &self,
        parent: Option<&Arc<Event>>,
        module: &str,
        request: EmitRequest,
    ) -> Result<Option<Arc<Event>>> {
        if self.inner.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let Some(event) = self.admit(parent, module, request)? else {
            return Ok(None);
        };
        self.route(&event);
        Ok(Some(event))
    }

    /// Records a root event after the scan stopped routing and hands back
    /// the enabled routes that want it. The caller delivers it in place of
    /// the queues, so the event is settled straight away.
    pub(crate) fn record_terminal(
        &self,
        module: &str,
        request: EmitRequest,
    ) -> Result<Option<(Arc<Event>, Vec<Arc<Route>>)>> {
        let Some(event) = self.admit(None, module, request)? else {
            return Ok(None);
        };
        self.inner.dedup.routed(event.id(), 0);
        let targets: Vec<_> = self
            .inner
            .routes
            .matching(event.event_type())
            .filter(|route| route.is_enabled() && route.accepts_distance(event.scope_distance()))
            .cloned()
            .collect();
        for route in &targets {
            route.stats.record_queued();
        }
        Ok(Some((event, targets)))
    }

    /// Create, scope and admit into the global store.
    fn admit(
        &self,
        parent: Option<&Arc<Event>>,
        module: &str,
        request: EmitRequest,
    ) -> Result<Option<Arc<Event>>> {
        let inner = &self.inner;
        let reseed = request.reseed;
        let sequence = inner.next_sequence.fetch_add(1, Ordering::Relaxed);
        let mut event = match Event::create(request, parent.map(AsRef::as_ref), module, sequence, &inner.scan_id) {
            Ok(event) => event,
            Err(e) => {
                inner.metrics.invalid.fetch_add(1, Ordering::Relaxed);
                warn!(module, error = %e, "dropping invalid event");
                return Ok(None);
            }
        };
        trace!(event_id = %event.id(), module, "created");

        match ScopeCalculator::compute(&event, parent.map(AsRef::as_ref), &inner.target, reseed) {
            ScopeVerdict::Blacklisted => {
                inner.metrics.blacklisted.fetch_add(1, Ordering::Relaxed);
                debug!(event_id = %event.id(), host = ?event.host(), module, "blacklisted, not routed");
                return Ok(None);
            }
            ScopeVerdict::Distance { distance, reseeded } => {
                event.set_scope(distance, reseeded);
                if reseeded {
                    debug!(event_id = %event.id(), module, "scope distance reset to 0");
                }
            }
        }
        trace!(event_id = %event.id(), scope_distance = event.scope_distance(), "scope evaluated");

        let event = Arc::new(event);
        match inner.dedup.admit(&event) {
            Ok(Admission::New) => {}
            Ok(Admission::Duplicate { canonical_uuid }) => {
                inner.metrics.duplicates.fetch_add(1, Ordering::Relaxed);
                debug!(event_id = %event.id(), %canonical_uuid, module, "merged into existing event");
                return Ok(None);
            }
            Ok(Admission::BackEdge) => {
                inner.metrics.back_edges.fetch_add(1, Ordering::Relaxed);
                debug!(event_id = %event.id(), module, "rediscovered an ancestor, ignoring");
                return Ok(None);
            }
            Err(e) => {
                inner.metrics.cycles.fetch_add(1, Ordering::Relaxed);
                error!(event_id = %event.id(), module, error = %e, "event graph integrity violated, aborting scan");
                let returned = EngineError::CycleDetected {
                    event_id: event.id().to_string(),
                    chain: event.parent_chain().to_vec(),
                };
                self.abort(e);
                return Err(returned);
            }
        }
        inner.metrics.emitted.fetch_add(1, Ordering::Relaxed);
        Ok(Some(event))
    }

    fn route(&self, event: &Arc<Event>) {
        let inner = &self.inner;
        let distance = event.scope_distance();

        let mut targets = Vec::new();
        let mut out_of_window = 0usize;
        let mut in_window = 0usize;
        for route in inner.routes.matching(event.event_type()) {
            if !route.is_enabled() {
                continue;
            }
            if !route.accepts_distance(distance) {
                out_of_window += 1;
                continue;
            }
            in_window += 1;
            // cheap pre-check, the authoritative claim happens in the worker
            match dedup_key(route, event) {
                // panicked, counted as a failure and never delivered
                None => continue,
                Some(Some(key)) if inner.dedup.is_claimed(&route.name, &key) => {
                    route.stats.record_deduped();
                    continue;
                }
                Some(_) => {}
            }
            targets.push(route);
        }

        if in_window == 0 && out_of_window > 0 {
            inner.metrics.distance_capped.fetch_add(1, Ordering::Relaxed);
            debug!(event_id = %event.id(), scope_distance = distance, "beyond every module's scope window");
        }

        // settle bookkeeping first so a fast worker can't finish before we count it
        inner.dedup.set_state(event.id(), EventState::Routed);
        inner.inflight.add(targets.len());
        let state = inner.dedup.routed(event.id(), targets.len());
        trace!(event_id = %event.id(), deliveries = targets.len(), ?state, "routed");

        for route in targets {
            route.stats.record_queued();
            if route.inbox.deliver(Arc::clone(event)).is_err() {
                // module pipeline already shut down
                self.finish_delivery(event);
            }
        }
    }

    /// A module is done with `event`, whatever the outcome.
    pub fn finish_delivery(&self, event: &Event) {
        if self.inner.dedup.delivery_done(event.id()) == EventState::Settled {
            trace!(event_id = %event.id(), "settled");
        }
        self.inner.inflight.done();
    }

    /// Resolves once every routed event is settled.
    pub async fn wait_idle(&self) {
        self.inner.inflight.wait_zero().await
    }

    pub fn abort(&self, err: EngineError) {
        let mut fatal = self.inner.fatal.lock().unwrap_or_else(|p| p.into_inner());
        if fatal.is_none() {
            *fatal = Some(err);
        }
        drop(fatal);
        self.inner.cancel.cancel();
    }

    pub fn take_fatal(&self) -> Option<EngineError> {
        self.inner
            .fatal
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<Event>> {
        self.inner.dedup.get(id)
    }

    pub fn dedup(&self) -> &DedupStore {
        &self.inner.dedup
    }

    pub fn routes(&self) -> &Routes {
        &self.inner.routes
    }

    pub fn metrics(&self) -> BusMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn scan_id(&self) -> &str {
        &self.inner.scan_id
    }
}
