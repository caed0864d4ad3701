//! Bounded worker pool that turns fire events into dispatched requests.
use crate::aggregator::MetricsAggregator;
use crate::classifier::OutcomeClassifier;
use crate::stop::{StopHandle, StopMode, StopSignal};
use crate::supplier::RequestSupplier;
use crate::transport::Transport;
use async_channel::{Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use surge_core::{FireEvent, Outcome};
use tokio::task::JoinSet;
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub pre_allocated: usize,
    pub max_workers: usize,
    pub backlog: usize,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub workers: usize,
    pub peak_in_flight: usize,
    pub interrupted: u64,
}

/// Everything a worker needs to turn one fire event into an outcome.
pub(crate) struct Dispatcher<S, T> {
    supplier: Arc<S>,
    transport: Arc<T>,
    classifier: OutcomeClassifier,
    timeout: Duration,
}

impl<S, T> Dispatcher<S, T>
where
    S: RequestSupplier,
    T: Transport + Sync + 'static,
{
    pub fn new(
        supplier: Arc<S>,
        transport: Arc<T>,
        classifier: OutcomeClassifier,
        timeout: Duration,
    ) -> Self {
        Self {
            supplier,
            transport,
            classifier,
            timeout,
        }
    }

    async fn dispatch(&self) -> Outcome {
        let request = self.supplier.produce();
        let start = Instant::now();
        match tokio::time::timeout(self.timeout, self.transport.send(request, self.timeout)).await
        {
            Ok(res) => self.classifier.classify(&res),
            Err(_) => Outcome::timeout(start.elapsed()),
        }
    }
}

#[derive(Default)]
struct PoolAtomics {
    idle: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    interrupted: AtomicU64,
}

/// Workers share one bounded backlog. The pool starts with `pre_allocated` workers and adds one
/// whenever queued events outnumber idle workers, up to `max_workers`.
pub struct WorkerPool<S, T> {
    name: Arc<str>,
    config: PoolConfig,
    tx: Sender<FireEvent>,
    rx: Receiver<FireEvent>,
    workers: JoinSet<()>,
    spawned: usize,
    atomics: Arc<PoolAtomics>,
    abort: StopHandle,
    dispatcher: Arc<Dispatcher<S, T>>,
    aggregator: Arc<MetricsAggregator>,
}

impl<S, T> WorkerPool<S, T>
where
    S: RequestSupplier,
    T: Transport + Sync + 'static,
{
    /// Must be called from within a tokio runtime.
    pub(crate) fn new(
        name: impl Into<Arc<str>>,
        config: PoolConfig,
        dispatcher: Arc<Dispatcher<S, T>>,
        aggregator: Arc<MetricsAggregator>,
    ) -> Self {
        let (tx, rx) = async_channel::bounded(config.backlog.max(1));
        let mut pool = Self {
            name: name.into(),
            config,
            tx,
            rx,
            workers: JoinSet::new(),
            spawned: 0,
            atomics: Arc::new(PoolAtomics::default()),
            abort: StopHandle::new(),
            dispatcher,
            aggregator,
        };
        for _ in 0..config.pre_allocated.min(config.max_workers) {
            pool.spawn_worker();
        }
        pool
    }

    pub fn workers(&self) -> usize {
        self.spawned
    }

    pub fn in_flight(&self) -> usize {
        self.atomics.in_flight.load(Ordering::Relaxed)
    }

    /// Queues an event for dispatch. A full backlog drops the event.
    pub fn submit(&mut self, event: FireEvent) {
        if self.tx.len() >= self.atomics.idle.load(Ordering::Acquire)
            && self.spawned < self.config.max_workers
        {
            self.spawn_worker();
        }

        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                trace!("Backlog full, dropping event {}", event.seq);
                self.aggregator.record(&Outcome::dropped());
            }
            Err(TrySendError::Closed(event)) => {
                trace!("Pool closed, interrupting event {}", event.seq);
                self.atomics.interrupted.fetch_add(1, Ordering::Relaxed);
                self.aggregator.record(&Outcome::interrupted(Duration::ZERO));
            }
        }
    }

    fn spawn_worker(&mut self) {
        self.spawned += 1;
        self.atomics.idle.fetch_add(1, Ordering::AcqRel);

        #[cfg(feature = "metrics")]
        metrics::gauge!("surge_workers", "scenario" => self.name.to_string())
            .set(self.spawned as f64);

        trace!("Spawning worker {} for {}", self.spawned, self.name);
        self.workers.spawn(worker(
            self.rx.clone(),
            self.dispatcher.clone(),
            self.aggregator.clone(),
            self.atomics.clone(),
            self.abort.signal(),
        ));
    }

    /// Stops accepting events and waits up to `grace` for queued and in-flight requests. Whatever
    /// is left after that, or after a forced stop, is recorded as interrupted.
    pub async fn shutdown(mut self, grace: Duration, stop: &mut StopSignal) -> PoolReport {
        self.tx.close();

        let drained = tokio::select! {
            biased;
            _ = stop.reached(StopMode::Forced) => false,
            res = tokio::time::timeout(grace, join_all(&mut self.workers)) => res.is_ok(),
        };

        if !drained {
            warn!(
                "Interrupting {} in-flight requests of {}",
                self.in_flight(),
                self.name
            );
            self.abort.force();
            join_all(&mut self.workers).await;
        }

        let mut leftover = 0;
        while self.rx.try_recv().is_ok() {
            leftover += 1;
            self.aggregator.record(&Outcome::interrupted(Duration::ZERO));
        }
        if leftover > 0 {
            debug!("{leftover} queued events of {} were never dispatched", self.name);
        }

        #[cfg(feature = "metrics")]
        metrics::gauge!("surge_workers", "scenario" => self.name.to_string()).set(0.);

        PoolReport {
            workers: self.spawned,
            peak_in_flight: self.atomics.peak_in_flight.load(Ordering::Relaxed),
            interrupted: self.atomics.interrupted.load(Ordering::Relaxed) + leftover,
        }
    }
}

async fn join_all(workers: &mut JoinSet<()>) {
    while let Some(res) = workers.join_next().await {
        if let Err(err) = res {
            error!("Worker failed: {err}");
        }
    }
}

async fn worker<S, T>(
    rx: Receiver<FireEvent>,
    dispatcher: Arc<Dispatcher<S, T>>,
    aggregator: Arc<MetricsAggregator>,
    atomics: Arc<PoolAtomics>,
    mut abort: StopSignal,
) where
    S: RequestSupplier,
    T: Transport + Sync + 'static,
{
    loop {
        let event = tokio::select! {
            biased;
            _ = abort.reached(StopMode::Forced) => break,
            event = rx.recv() => match event {
                Ok(event) => event,
                Err(_) => break,
            },
        };

        atomics.idle.fetch_sub(1, Ordering::AcqRel);
        let in_flight = atomics.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        atomics.peak_in_flight.fetch_max(in_flight, Ordering::Relaxed);

        let start = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = abort.reached(StopMode::Forced) => {
                atomics.interrupted.fetch_add(1, Ordering::Relaxed);
                Outcome::interrupted(start.elapsed())
            }
            outcome = dispatcher.dispatch() => outcome,
        };
        trace!(seq = event.seq, success = outcome.success, latency = ?outcome.latency);

        atomics.in_flight.fetch_sub(1, Ordering::AcqRel);
        aggregator.record(&outcome);
        atomics.idle.fetch_add(1, Ordering::AcqRel);
    }
}
