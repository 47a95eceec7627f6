use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tracing::warn;

use crate::workers::ModuleStats;

pub type DrainTask = Pin<Box<dyn Future<Output = ()> + Send>>;

pub struct StartupTasks {
    pub tokio: Vec<DrainTask>,
}

/// Lossless inbound queue for one module.
///
/// The dispatcher hands events to an unbounded staging channel, so emitting
/// never blocks. A drain task moves them into the bounded worker queue
/// (`high_water` slots). When that queue is full the drain task suspends,
/// which pauses delivery to this module only. A stall longer than
/// `stall_timeout` flags the module and keeps waiting; nothing is dropped.
pub struct ModuleInbox<T> {
    staging_tx: mpsc::UnboundedSender<T>,
    stats: Arc<ModuleStats>,
}

impl<T> Clone for ModuleInbox<T> {
    fn clone(&self) -> Self {
        Self {
            staging_tx: self.staging_tx.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T: Send + 'static> ModuleInbox<T> {
    pub fn new(
        module: Arc<str>,
        high_water: usize,
        stall_timeout: Duration,
        stats: Arc<ModuleStats>,
    ) -> (ModuleInbox<T>, mpsc::Receiver<T>, DrainTask) {
        let (staging_tx, mut staging_rx) = mpsc::unbounded_channel::<T>();
        let (out_tx, out_rx) = mpsc::channel::<T>(high_water);
        let drain_stats = Arc::clone(&stats);

        let drain_task = Box::pin(async move {
            while let Some(value) = staging_rx.recv().await {
                drain_stats.staged_dec();
                let permit = match tokio::time::timeout(stall_timeout, out_tx.reserve()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => break,
                    Err(_) => {
                        drain_stats.record_stall();
                        warn!(
                            module = %module,
                            high_water,
                            staged = drain_stats.staged(),
                            "module queue saturated, delivery paused"
                        );
                        match out_tx.reserve().await {
                            Ok(permit) => permit,
                            Err(_) => break,
                        }
                    }
                };
                permit.send(value);
            }
        });

        (ModuleInbox { staging_tx, stats }, out_rx, drain_task)
    }

    /// Never blocks. Fails only once the module's pipeline has shut down.
    pub fn deliver(&self, value: T) -> Result<(), T> {
        self.stats.staged_inc();
        self.staging_tx.send(value).map_err(|e| {
            self.stats.staged_dec();
            e.0
        })
    }
}
