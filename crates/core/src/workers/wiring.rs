use std::{collections::HashMap, sync::Arc};

use crate::workers::WorkerInputs;

/// Inbound queues produced by the bus builder, claimed by the controller
/// when it spawns each module's worker pool.
pub struct WorkerWiring {
    inputs: HashMap<Arc<str>, WorkerInputs>,
}

impl WorkerWiring {
    pub fn new(inputs: HashMap<Arc<str>, WorkerInputs>) -> Self {
        Self { inputs }
    }

    pub fn take(&mut self, module: &str) -> Option<WorkerInputs> {
        self.inputs.remove(module)
    }
}
