use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::{
    events::{Event, EventBus},
    module::{FilterVerdict, ModuleContext},
    routes::Route,
    workers::WorkerInputs,
};

/// One member of a module's worker pool.
pub struct ModuleWorker {
    pub worker_id: usize,
    pub inputs: WorkerInputs,
    pub ctx: ModuleContext,
    pub bus: EventBus,
    pub global: Arc<Semaphore>,
    pub cancel: CancellationToken,
    pub shutdown: broadcast::Receiver<()>,
}

impl ModuleWorker {
    pub async fn run(mut self) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = self.shutdown.recv() => return,
                next = self.inputs.next() => match next {
                    Some(event) => event,
                    None => return,
                },
            };

            let permit = tokio::select! {
                _ = self.cancel.cancelled() => return,
                permit = Arc::clone(&self.global).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            self.process(&event).await;
            drop(permit);
            self.bus.finish_delivery(&event);
        }
    }

    async fn process(&self, event: &Arc<Event>) {
        trace!(module = %self.inputs.route.name, worker = self.worker_id, event_id = %event.id(), "dequeued");
        deliver(&self.inputs.route, &self.ctx, &self.bus, event, Some(&self.cancel)).await;
    }
}

/// Filter, per-module claim, then handle. Every module hook is isolated:
/// an error or panic counts against this module for this event only.
/// Without a cancel token the handler always runs to completion.
pub(crate) async fn deliver(
    route: &Route,
    ctx: &ModuleContext,
    bus: &EventBus,
    event: &Arc<Event>,
    cancel: Option<&CancellationToken>,
) {
    let module = &route.module;
    let name = &route.name;

    let verdict = AssertUnwindSafe(module.filter_event(event, ctx))
        .catch_unwind()
        .await;
    match verdict {
        Ok(Ok(FilterVerdict::Accept)) => {}
        Ok(Ok(FilterVerdict::Reject(reason))) => {
            route.stats.record_filtered();
            debug!(module = %name, event_id = %event.id(), %reason, "event filtered");
            return;
        }
        Ok(Err(e)) => {
            warn!(module = %name, event_id = %event.id(), error = ?e, "filter_event failed");
            route.stats.record_failure(format!("filter_event: {e}"));
            return;
        }
        Err(panic) => {
            let message = panic_message(&panic);
            error!(module = %name, event_id = %event.id(), panic = %message, "filter_event panicked");
            route.stats.record_failure(format!("filter_event panicked: {message}"));
            return;
        }
    }

    let Some(key) = dedup_key(route, event) else {
        return;
    };
    if let Some(key) = key {
        if !bus.dedup().claim(name, &key) {
            route.stats.record_deduped();
            debug!(module = %name, event_id = %event.id(), %key, "already processed");
            return;
        }
    }

    let handle = AssertUnwindSafe(module.handle_event(Arc::clone(event), ctx)).catch_unwind();
    let handled = match cancel {
        Some(cancel) => tokio::select! {
            _ = cancel.cancelled() => return,
            handled = handle => handled,
        },
        None => handle.await,
    };
    match handled {
        Ok(Ok(())) => route.stats.record_handled(),
        Ok(Err(e)) => {
            warn!(module = %name, event_id = %event.id(), error = ?e, "handle_event failed");
            route.stats.record_failure(format!("handle_event: {e}"));
        }
        Err(panic) => {
            let message = panic_message(&panic);
            error!(module = %name, event_id = %event.id(), panic = %message, "handle_event panicked");
            route.stats.record_failure(format!("handle_event panicked: {message}"));
        }
    }
}

/// `incoming_dedup_key` behind a panic guard. The outer `None` means the
/// hook panicked; the failure is already recorded against the module.
pub(crate) fn dedup_key(route: &Route, event: &Event) -> Option<Option<String>> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| route.module.incoming_dedup_key(event))) {
        Ok(key) => Some(key),
        Err(panic) => {
            let message = panic_message(&panic);
            error!(module = %route.name, event_id = %event.id(), panic = %message, "incoming_dedup_key panicked");
            route.stats.record_failure(format!("incoming_dedup_key panicked: {message}"));
            None
        }
    }
}

pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
