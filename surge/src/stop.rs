use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of a run. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StopMode {
    Running,
    /// Stop firing and let in-flight requests finish within the grace period.
    Graceful,
    /// Stop firing and abandon in-flight requests.
    Forced,
}

/// Requests a stop. Cheap to clone; every clone controls the same run.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<StopMode>>,
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(StopMode::Running);
        Self { tx: Arc::new(tx) }
    }

    pub fn graceful(&self) {
        self.escalate(StopMode::Graceful);
    }

    pub fn force(&self) {
        self.escalate(StopMode::Forced);
    }

    pub fn mode(&self) -> StopMode {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }

    fn escalate(&self, mode: StopMode) {
        self.tx.send_if_modified(|current| {
            if mode > *current {
                *current = mode;
                true
            } else {
                false
            }
        });
    }
}

/// Observes a [`StopHandle`].
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<StopMode>,
}

impl StopSignal {
    pub fn mode(&self) -> StopMode {
        *self.rx.borrow()
    }

    /// Resolves once the mode is at least `mode`. Pends forever if every handle is dropped first.
    pub async fn reached(&mut self, mode: StopMode) -> StopMode {
        loop {
            let current = *self.rx.borrow_and_update();
            if current >= mode {
                return current;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
