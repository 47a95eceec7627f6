use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::{events::Event, routes::Route};

/// The receiving half of one module's inbound queue, shared by every
/// worker in that module's pool. FIFO order is preserved at dequeue time.
#[derive(Clone)]
pub struct WorkerInputs {
    pub route: Arc<Route>,
    receiver: Arc<Mutex<mpsc::Receiver<Arc<Event>>>>,
}

impl WorkerInputs {
    pub fn new(route: Arc<Route>, receiver: mpsc::Receiver<Arc<Event>>) -> Self {
        Self {
            route,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    pub async fn next(&self) -> Option<Arc<Event>> {
        self.receiver.lock().await.recv().await
    }
}
