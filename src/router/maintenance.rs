//! Background tickers: expired-entry sweep and trend sampling.
//!
//! Tasks hold a `Weak<Router>`, so dropping the last `Arc` ends them on
//! their next tick even without [`Router::close`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::Router;
use crate::store::UsageSnapshot;
use crate::trend::{self, Trend, TrendReading};
use crate::{HuginnError, Result};

pub(super) struct Maintenance {
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    last_usage: Mutex<UsageSnapshot>,
    last_trends: Mutex<HashMap<String, Trend>>,
}

impl Maintenance {
    pub(super) fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            handles: Mutex::new(Vec::new()),
            last_usage: Mutex::new(UsageSnapshot::default()),
            last_trends: Mutex::new(HashMap::new()),
        }
    }
}

impl Router {
    /// Spawn the sweep and trend-sampling tasks on the current tokio
    /// runtime. The first tick of each fires one period after start.
    ///
    /// Calling `start` on a running router is a no-op. Fails outside a
    /// tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(HuginnError::Configuration(
                "start requires a tokio runtime".into(),
            ));
        }
        let mut handles = self
            .maintenance
            .handles
            .lock()
            .map_err(|_| HuginnError::StoreBusy("maintenance"))?;
        if !handles.is_empty() {
            return Ok(());
        }
        self.maintenance.shutdown.send_replace(false);

        handles.push(spawn_ticker(
            self,
            "sweep",
            self.config.store.sweep_interval,
            self.maintenance.shutdown.subscribe(),
            |router| {
                router.store.sweep_expired();
            },
        ));
        handles.push(spawn_ticker(
            self,
            "trend_sampler",
            self.config.trends.sample_interval,
            self.maintenance.shutdown.subscribe(),
            |router| {
                router.sample_trends();
            },
        ));
        info!(
            sweep_interval = ?self.config.store.sweep_interval,
            sample_interval = ?self.config.trends.sample_interval,
            "router maintenance started"
        );
        Ok(())
    }

    /// Stop the background tasks and wait for them to finish.
    pub async fn close(&self) {
        self.maintenance.shutdown.send_replace(true);
        let handles = match self.maintenance.handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(_) => {
                warn!("maintenance lock poisoned, tasks left to exit on their own");
                return;
            }
        };
        if handles.is_empty() {
            return;
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "maintenance task ended abnormally");
            }
        }
        info!("router maintenance stopped");
    }

    /// Whether background tasks are running.
    pub fn is_running(&self) -> bool {
        self.maintenance
            .handles
            .lock()
            .map(|h| h.iter().any(|t| !t.is_finished()))
            .unwrap_or(false)
    }

    /// Run one trend sample now: record the hit rate since the previous
    /// sample (if there were any lookups) and reclassify every series.
    /// Classification changes are logged.
    pub fn sample_trends(&self) -> Vec<TrendReading> {
        let now = self.store.stats();
        if let Ok(mut last) = self.maintenance.last_usage.lock() {
            let delta = now.since(&last);
            *last = now;
            if delta.lookups() > 0 {
                self.trends.record(trend::CACHE_HIT_RATE, delta.hit_rate());
            }
        }

        let readings = self.trends.snapshot();
        if let Ok(mut seen) = self.maintenance.last_trends.lock() {
            for reading in &readings {
                let previous = seen.insert(reading.name.clone(), reading.trend);
                if previous.is_some_and(|p| p != reading.trend) {
                    info!(series = %reading.name, trend = ?reading.trend, "trend changed");
                }
            }
        }
        readings
    }
}

fn spawn_ticker(
    router: &Arc<Router>,
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    tick: fn(&Router),
) -> JoinHandle<()> {
    let router: Weak<Router> = Arc::downgrade(router);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(router) = router.upgrade() else { break };
                    tick(&router);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(task = name, "maintenance task exited");
    })
}
