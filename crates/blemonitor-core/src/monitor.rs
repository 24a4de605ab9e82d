//! The monitoring session.
//!
//! [`MonitorService`] owns everything that accumulates while a sensor is
//! being watched:
//!
//! - the [`SessionTracker`] and the running [`DurationTable`], behind one lock
//! - the 1 Hz ticker that stretches the open session
//! - the consumer side of the connection event stream
//! - flushes to the [`PersistenceGateway`]
//!
//! Persistence failures never lose in-memory totals; they are logged and the
//! failed batch is dropped.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::aggregator::{Aggregator, StatusSnapshot};
use crate::connection::ConnectionEvent;
use crate::decoder;
use crate::storage::PersistenceGateway;
use crate::tracker::SessionTracker;
use crate::types::{DeviceIdentity, DurationTable, Status};

/// Source of wall-clock time for session boundaries.
pub trait Clock: Send + Sync + 'static {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct SessionState {
    tracker: SessionTracker,
    totals: DurationTable,
    running: bool,
}

struct Inner<G, C> {
    device: DeviceIdentity,
    gateway: G,
    clock: C,
    tick_interval: Duration,
    state: Mutex<SessionState>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

/// Session state for one sensor. Clones share state.
pub struct MonitorService<G, C = SystemClock> {
    inner: Arc<Inner<G, C>>,
}

impl<G, C> Clone for MonitorService<G, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G: PersistenceGateway> MonitorService<G, SystemClock> {
    /// Creates a stopped monitor for `device` using the system clock.
    #[must_use]
    pub fn new(device: DeviceIdentity, gateway: G, tick_interval: Duration) -> Self {
        Self::with_clock(device, gateway, tick_interval, SystemClock)
    }
}

impl<G: PersistenceGateway, C: Clock> MonitorService<G, C> {
    /// Creates a stopped monitor with a custom clock.
    #[must_use]
    pub fn with_clock(device: DeviceIdentity, gateway: G, tick_interval: Duration, clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SessionState {
                    tracker: SessionTracker::new(device.clone()),
                    totals: DurationTable::default(),
                    running: false,
                }),
                device,
                gateway,
                clock,
                tick_interval,
                ticker: Mutex::new(None),
            }),
        }
    }

    /// The sensor this monitor records for.
    #[must_use]
    pub fn device(&self) -> &DeviceIdentity {
        &self.inner.device
    }

    /// The persistence gateway.
    #[must_use]
    pub fn gateway(&self) -> &G {
        &self.inner.gateway
    }

    /// Loads persisted totals for the device and starts recording.
    ///
    /// Call once. If the store cannot be read, recording starts from zero.
    pub async fn start(&self) {
        match self.inner.gateway.load_durations(&self.inner.device).await {
            Ok(table) => {
                info!(
                    device = %self.inner.device,
                    total_ms = table.total(),
                    "loaded persisted status durations"
                );
                self.inner.state.lock().await.totals = table;
            }
            Err(err) => {
                warn!(device = %self.inner.device, error = %err, "could not load status durations");
            }
        }
        self.resume().await;
    }

    /// Resumes recording and restarts the ticker.
    pub async fn resume(&self) {
        self.inner.state.lock().await.running = true;

        let mut ticker = self.inner.ticker.lock().await;
        if ticker.is_none() {
            *ticker = Some(spawn_ticker(
                Arc::downgrade(&self.inner),
                self.inner.tick_interval,
            ));
            debug!(interval_ms = self.inner.tick_interval.as_millis(), "ticker started");
        }
    }

    /// Stops the ticker, closes the open session and flushes.
    ///
    /// Returns the number of sessions handed to the gateway.
    pub async fn pause(&self) -> usize {
        if let Some(handle) = self.inner.ticker.lock().await.take() {
            handle.abort();
            debug!("ticker stopped");
        }

        {
            let mut state = self.inner.state.lock().await;
            state.running = false;
            state.tracker.close(self.inner.clock.now());
        }
        self.flush().await
    }

    /// Whether recording is active.
    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.running
    }

    /// Folds the working list into the totals and appends it to the store.
    ///
    /// Returns the number of sessions handed to the gateway. Nothing is sent
    /// when the working list is empty.
    pub async fn flush(&self) -> usize {
        let drained = {
            let mut state = self.inner.state.lock().await;
            let SessionState {
                tracker, totals, ..
            } = &mut *state;
            tracker.flush(totals)
        };

        let count = drained.len();
        if count == 0 {
            return 0;
        }

        if let Err(err) = self
            .inner
            .gateway
            .append_sessions(&self.inner.device, drained)
            .await
        {
            warn!(
                device = %self.inner.device,
                error = %err,
                dropped = count,
                "could not persist status sessions"
            );
        }
        count
    }

    /// Records `status` as of now. Returns `true` when a session opened.
    pub async fn record_status(&self, status: Status) -> bool {
        let mut state = self.inner.state.lock().await;
        if !state.running {
            trace!(%status, "monitor paused, status ignored");
            return false;
        }
        state.tracker.on_status(status, self.inner.clock.now())
    }

    /// Applies one connection event.
    pub async fn on_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::DataAvailable(payload) => {
                if let Some(status) = decoder::decode(&payload) {
                    self.record_status(status).await;
                }
            }
            ConnectionEvent::Disconnected => {
                self.inner
                    .state
                    .lock()
                    .await
                    .tracker
                    .close(self.inner.clock.now());
                self.flush().await;
            }
            ConnectionEvent::RssiRead(rssi) => trace!(rssi, "rssi"),
            other => debug!(event = ?other, "connection event"),
        }
    }

    /// Consumes `events` until the sender side closes.
    pub async fn run(&self, mut events: broadcast::Receiver<ConnectionEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.on_event(event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "connection events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("connection event stream closed");
    }

    /// Runs [`Self::run`] on a background task.
    pub fn spawn_event_pump(&self, events: broadcast::Receiver<ConnectionEvent>) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move { monitor.run(events).await })
    }

    /// Durations, percentages and the current status.
    pub async fn snapshot(&self) -> StatusSnapshot {
        let state = self.inner.state.lock().await;
        Aggregator::new(&state.totals, state.tracker.sessions())
            .snapshot(state.tracker.current_status())
    }
}

impl<G, C: Clock> Inner<G, C> {
    async fn tick(&self) {
        let mut state = self.state.lock().await;
        if state.running {
            state.tracker.tick(self.clock.now());
        }
    }
}

fn spawn_ticker<G, C>(inner: Weak<Inner<G, C>>, period: Duration) -> JoinHandle<()>
where
    G: PersistenceGateway,
    C: Clock,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.tick().await;
        }
    })
}
