//! # Single-Flight Loads
//!
//! At most one load run per dataset kind and store generation is in flight.
//! The first caller of [`LoadCoordinator::ensure_loaded`] spawns the run;
//! every caller arriving while it is in flight awaits the same outcome through
//! a `watch` channel. Once the run settles the registration is cleared, so a
//! later call after a failure starts a fresh run.
//!
//! Generations come from the owning store and change on every job switch.
//! [`LoadCoordinator::retire_before`] cancels older runs and refuses callers
//! that still carry an older generation, so a run for one job is never joined
//! by a caller working for the next.

use crate::errors::LoadError;
use crate::model::{DatasetKind, Row};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome shared by every caller of one run.
pub type SharedLoad = Result<Arc<Vec<Row>>, LoadError>;

type RunKey = (u64, DatasetKind);
type Registry = Arc<Mutex<Flights>>;

#[derive(Default)]
struct Flights {
    /// Lowest generation still allowed to start or join a run.
    floor: u64,
    runs: HashMap<RunKey, InFlight>,
}

struct InFlight {
    run_id: u64,
    outcome: watch::Receiver<Option<SharedLoad>>,
    cancel: CancellationToken,
}

#[derive(Default)]
pub struct LoadCoordinator {
    in_flight: Registry,
    next_run: AtomicU64,
    runs_started: AtomicUsize,
}

impl LoadCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `load` for `kind` unless a run of the same generation is already
    /// in flight, then await the in-flight run's outcome.
    ///
    /// `load` receives the run's cancellation token and is only invoked by
    /// the caller that starts the run. A retired generation gets
    /// [`LoadError::Cancelled`] without starting anything. Must be called
    /// inside a tokio runtime.
    pub async fn ensure_loaded<F, Fut>(&self, generation: u64, kind: DatasetKind, load: F) -> SharedLoad
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<Vec<Row>, LoadError>> + Send + 'static,
    {
        let key = (generation, kind);
        let mut outcome = {
            let mut flights = self.in_flight.lock();
            if generation < flights.floor {
                debug!(%kind, generation, floor = flights.floor, "refusing load for a retired generation");
                return Err(LoadError::Cancelled);
            }
            match flights.runs.get(&key) {
                Some(flight) => {
                    debug!(%kind, generation, run = flight.run_id, "joining in-flight load");
                    flight.outcome.clone()
                }
                None => {
                    let run_id = self.next_run.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    let cancel = CancellationToken::new();
                    flights.runs.insert(
                        key,
                        InFlight {
                            run_id,
                            outcome: rx.clone(),
                            cancel: cancel.clone(),
                        },
                    );
                    self.runs_started.fetch_add(1, Ordering::Relaxed);
                    info!(%kind, generation, run = run_id, "starting load");

                    let settle = Settle {
                        registry: Arc::clone(&self.in_flight),
                        key,
                        run_id,
                        tx,
                    };
                    let run = load(cancel);
                    tokio::spawn(async move {
                        let result = run.await.map(Arc::new);
                        settle.publish(result);
                    });
                    rx
                }
            }
        };

        let settled = match outcome.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        // A run whose task died without publishing reports as cancelled.
        settled.unwrap_or(Err(LoadError::Cancelled))
    }

    /// Cancel every in-flight run for `kind`, whatever its generation.
    ///
    /// Registrations are dropped immediately so the next `ensure_loaded`
    /// starts a new run instead of joining a cancelled one.
    pub fn cancel(&self, kind: DatasetKind) -> bool {
        let cancelled = self.drain_where(|(_, run_kind)| run_kind == kind);
        !cancelled.is_empty()
    }

    /// Cancel every run older than `generation` and refuse older callers from
    /// now on. Returns the number of runs cancelled.
    pub fn retire_before(&self, generation: u64) -> usize {
        let mut flights = self.in_flight.lock();
        flights.floor = flights.floor.max(generation);
        let stale: Vec<RunKey> = flights
            .runs
            .keys()
            .filter(|(run_generation, _)| *run_generation < generation)
            .copied()
            .collect();
        let drained: Vec<(RunKey, InFlight)> = stale
            .into_iter()
            .filter_map(|key| flights.runs.remove(&key).map(|flight| (key, flight)))
            .collect();
        drop(flights);
        cancel_drained(&drained);
        drained.len()
    }

    pub fn is_in_flight(&self, kind: DatasetKind) -> bool {
        self.in_flight.lock().runs.keys().any(|(_, run_kind)| *run_kind == kind)
    }

    /// Number of runs ever started, joined calls excluded.
    pub fn runs_started(&self) -> usize {
        self.runs_started.load(Ordering::Relaxed)
    }

    fn drain_where(&self, matches: impl Fn(RunKey) -> bool) -> Vec<(RunKey, InFlight)> {
        let drained: Vec<(RunKey, InFlight)> = {
            let mut flights = self.in_flight.lock();
            let keys: Vec<RunKey> = flights.runs.keys().copied().filter(|key| matches(*key)).collect();
            keys.into_iter()
                .filter_map(|key| flights.runs.remove(&key).map(|flight| (key, flight)))
                .collect()
        };
        cancel_drained(&drained);
        drained
    }
}

fn cancel_drained(drained: &[(RunKey, InFlight)]) {
    for ((generation, kind), flight) in drained {
        info!(%kind, generation, run = flight.run_id, "cancelling load");
        flight.cancel.cancel();
    }
}

/// Clears a run's registration when the run ends, published or not.
struct Settle {
    registry: Registry,
    key: RunKey,
    run_id: u64,
    tx: watch::Sender<Option<SharedLoad>>,
}

impl Settle {
    fn publish(self, result: SharedLoad) {
        let mut flights = self.registry.lock();
        unregister(&mut flights, self.key, self.run_id);
        self.tx.send_replace(Some(result));
    }
}

impl Drop for Settle {
    fn drop(&mut self) {
        unregister(&mut self.registry.lock(), self.key, self.run_id);
    }
}

fn unregister(flights: &mut Flights, key: RunKey, run_id: u64) {
    if flights.runs.get(&key).is_some_and(|flight| flight.run_id == run_id) {
        flights.runs.remove(&key);
    }
}
