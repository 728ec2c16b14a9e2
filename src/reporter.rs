//! Periodic export of registered collections to a bulk client
//!
//! A [`Reporter`] owns one lifecycle task at a time. The task probes the
//! client until it answers, exports once, then exports on every interval
//! tick until [`Reporter::stop`] cancels it.
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::client::BulkClient;
use crate::collection::{Collection, CollectionRegistry};
use crate::config::{ReporterConfig, check_period};
use crate::document::translate;
use crate::error::{ReporterError, Result};
use crate::retry::{RetryBuilder, retry_until_ok};

/// Source of the export instant
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

const EVENT_CAPACITY: usize = 64;

/// Lifecycle state of a reporter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterState {
    /// Never started
    Idle,
    /// Waiting for a connectivity probe to answer
    Probing,
    /// Last probe failed, waiting to retry
    ProbeFailed,
    /// Connected and exporting periodically
    Active,
    /// Stopped, or gave up probing after the configured attempts
    Stopped,
}

impl ReporterState {
    /// Whether a lifecycle task is in charge
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            ReporterState::Probing | ReporterState::ProbeFailed | ReporterState::Active
        )
    }
}

/// Lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReporterEvent {
    Start,
    Stop,
    /// An export cycle finished, successfully or not
    Update { documents: usize },
    /// A bulk write failed
    Error { message: String },
}

/// State shared between the reporter handle and its lifecycle task
struct Shared {
    client: Arc<dyn BulkClient>,
    config: ReporterConfig,
    clock: Clock,
    registry: CollectionRegistry,
    state: Mutex<ReporterState>,
    events: broadcast::Sender<ReporterEvent>,
}

impl Shared {
    fn state(&self) -> ReporterState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ReporterState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            debug!("Reporter state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    fn emit(&self, event: ReporterEvent) {
        // no subscribers is not an error
        let _ = self.events.send(event);
    }

    /// Translate the current registry members and write them in one bulk call
    async fn export_cycle(&self) -> Result<usize> {
        let collections = self.registry.snapshot_all()?;
        let now = (self.clock)();
        let entries = translate(&collections, &self.config, now);
        let documents = entries.len();

        debug!(
            "Sending {} documents from {} collections to {}",
            documents,
            collections.len(),
            self.client.name()
        );

        let outcome = self.client.bulk(&entries).await;
        if let Err(e) = &outcome {
            error!("Bulk write to {} failed: {}", self.client.name(), e);
            self.emit(ReporterEvent::Error {
                message: e.to_string(),
            });
        }
        self.emit(ReporterEvent::Update { documents });

        outcome.map(|()| documents)
    }
}

struct Lifecycle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic exporter of metric collections
pub struct Reporter {
    shared: Arc<Shared>,
    lifecycle: Mutex<Option<Lifecycle>>,
}

impl Reporter {
    pub fn builder(client: Arc<dyn BulkClient>) -> ReporterBuilder {
        ReporterBuilder::new(client)
    }

    pub fn state(&self) -> ReporterState {
        self.shared.state()
    }

    pub fn config(&self) -> &ReporterConfig {
        &self.shared.config
    }

    /// Receive lifecycle notifications from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ReporterEvent> {
        self.shared.events.subscribe()
    }

    /// Export a collection from the next cycle on
    pub fn add_collection(&self, collection: Arc<dyn Collection>) -> Result<()> {
        self.shared.registry.add(collection)
    }

    /// Stop exporting a collection from the next cycle on
    pub fn remove_collection<C: Collection + ?Sized>(&self, collection: &Arc<C>) -> Result<bool> {
        self.shared.registry.remove(collection)
    }

    /// Registered collections, in insertion order
    pub fn collections(&self) -> Result<Vec<Arc<dyn Collection>>> {
        self.shared.registry.snapshot_all()
    }

    /// Start the probe-then-export lifecycle on the current tokio runtime.
    ///
    /// `interval` defaults to the configured export interval. Starting a
    /// reporter that is already running is ignored.
    pub fn start(&self, interval: Option<Duration>) -> Result<()> {
        let period = interval.unwrap_or_else(|| self.shared.config.interval());
        check_period("export interval", period)?;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ReporterError::Runtime(format!("start requires a tokio runtime: {}", e)))?;

        let mut lifecycle = self
            .lifecycle
            .lock()
            .map_err(|_| ReporterError::poisoned("lifecycle"))?;

        if self.shared.state().is_running() {
            warn!(
                "Reporter for {} already started, ignoring start",
                self.shared.client.name()
            );
            return Ok(());
        }

        info!(
            "Starting reporter for {} (interval: {:?})",
            self.shared.client.name(),
            period
        );
        self.shared.set_state(ReporterState::Probing);
        self.shared.emit(ReporterEvent::Start);

        let cancel = CancellationToken::new();
        let handle = runtime.spawn(run_lifecycle(
            Arc::clone(&self.shared),
            period,
            cancel.clone(),
        ));
        *lifecycle = Some(Lifecycle { cancel, handle });

        Ok(())
    }

    /// Run one export cycle now, whatever the lifecycle state.
    /// Returns the number of documents written.
    pub async fn send_bulk(&self) -> Result<usize> {
        self.shared.export_cycle().await
    }

    /// Cancel the lifecycle and release every registered collection.
    ///
    /// Once this returns no probe or export will run until the next
    /// `start`. Collections stay registered. Stopping a stopped reporter
    /// does nothing.
    pub async fn stop(&self) -> Result<()> {
        let lifecycle = self
            .lifecycle
            .lock()
            .map_err(|_| ReporterError::poisoned("lifecycle"))?
            .take();

        if lifecycle.is_none() && self.shared.state() == ReporterState::Stopped {
            debug!("Reporter already stopped");
            return Ok(());
        }

        if let Some(Lifecycle { cancel, handle }) = lifecycle {
            cancel.cancel();
            if let Err(e) = handle.await {
                error!("Reporter task ended abnormally: {}", e);
            }
        }

        let collections = self.shared.registry.distinct()?;
        for collection in &collections {
            collection.release();
        }

        self.shared.set_state(ReporterState::Stopped);
        info!(
            "Reporter for {} stopped, released {} collections",
            self.shared.client.name(),
            collections.len()
        );
        self.shared.emit(ReporterEvent::Stop);

        Ok(())
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        if let Ok(mut lifecycle) = self.lifecycle.lock() {
            if let Some(lifecycle) = lifecycle.take() {
                lifecycle.cancel.cancel();
            }
        }
    }
}

async fn run_lifecycle(shared: Arc<Shared>, period: Duration, cancel: CancellationToken) {
    let mut retry = RetryBuilder::new().delay(shared.config.probe_retry_delay());
    if let Some(attempts) = shared.config.probe_max_attempts {
        retry = retry.max_attempts(attempts);
    }
    let retry = retry.build();
    let timeout = shared.config.ping_timeout();

    let probe = retry_until_ok(
        || {
            shared.set_state(ReporterState::Probing);
            shared.client.ping(timeout)
        },
        &retry,
        &cancel,
        "Connectivity probe",
        |_, _| shared.set_state(ReporterState::ProbeFailed),
    )
    .await;

    match probe {
        Ok(Some(())) => {}
        Ok(None) => {
            debug!("Connectivity probe cancelled");
            return;
        }
        Err(e) => {
            error!("Giving up on {}: {}", shared.client.name(), e);
            shared.set_state(ReporterState::Stopped);
            shared.emit(ReporterEvent::Error {
                message: e.to_string(),
            });
            return;
        }
    }

    shared.set_state(ReporterState::Active);
    info!("Connected to {}", shared.client.name());

    // cycles are serialised: a slow write delays the next one, missed ticks are dropped
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = shared.export_cycle() => {}
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
    }

    debug!("Export loop for {} finished", shared.client.name());
}

/// Log reporter events until the reporter is dropped.
/// Returns how many events were logged; lagging only skips the overwritten ones.
pub async fn log_events(mut events: broadcast::Receiver<ReporterEvent>) -> usize {
    let mut logged = 0;
    loop {
        match events.recv().await {
            Ok(ReporterEvent::Error { message }) => error!("Export failed: {}", message),
            Ok(ReporterEvent::Update { documents }) => info!("Exported {} documents", documents),
            Ok(event) => debug!("Reporter event: {:?}", event),
            Err(RecvError::Lagged(missed)) => {
                warn!("Event log skipped {} events", missed);
                continue;
            }
            Err(RecvError::Closed) => break,
        }
        logged += 1;
    }
    logged
}

/// Builder for a reporter
pub struct ReporterBuilder {
    client: Arc<dyn BulkClient>,
    config: ReporterConfig,
    clock: Option<Clock>,
}

impl ReporterBuilder {
    pub fn new(client: Arc<dyn BulkClient>) -> Self {
        Self {
            client,
            config: ReporterConfig::default(),
            clock: None,
        }
    }

    pub fn config(mut self, config: ReporterConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the time source, defaults to the wall clock
    pub fn clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Validate the configuration and build the reporter
    pub fn build(self) -> Result<Reporter> {
        self.config.validate()?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let clock: Clock = match self.clock {
            Some(clock) => clock,
            None => Arc::new(Utc::now),
        };

        Ok(Reporter {
            shared: Arc::new(Shared {
                client: self.client,
                config: self.config,
                clock,
                registry: CollectionRegistry::new(),
                state: Mutex::new(ReporterState::Idle),
                events,
            }),
            lifecycle: Mutex::new(None),
        })
    }
}
