//! The collection loop: fetch, merge into the store, prune, record the outcome, sleep.

use chrono::{DateTime, TimeDelta, Utc};
use log::{error, info, warn};
use std::{fmt, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    error::{CycleError, SourceError, StoreError},
    model::UpdateStats,
    source::WeatherSource,
    store::RecordStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePolicy {
    pub interval: Duration,
    pub retention: TimeDelta,
    pub forecast_days: u8,
}

impl SchedulePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.interval(),
            retention: TimeDelta::days(i64::from(config.schedule.retention_days)),
            forecast_days: config.schedule.forecast_days,
        }
    }
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Collecting,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Current conditions were stored. A failed forecast fetch does not fail the cycle.
    Success {
        forecast_points: usize,
        forecast_error: Option<SourceError>,
    },
    Failed {
        kind: &'static str,
        message: String,
    },
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: CycleOutcome,
    /// Keys that were new to the store.
    pub appended: usize,
    pub pruned: usize,
}

struct Collected {
    appended: usize,
    forecast_points: usize,
    forecast_error: Option<SourceError>,
}

pub struct Scheduler<S> {
    source: S,
    store: RecordStore,
    policy: SchedulePolicy,
    state: CycleState,
}

impl<S: WeatherSource> Scheduler<S> {
    pub fn new(source: S, store: RecordStore, policy: SchedulePolicy) -> Self {
        Self {
            source,
            store,
            policy,
            state: CycleState::Idle,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Run one cycle. Failures are logged and recorded, never returned.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let started_at = Utc::now();
        self.state = CycleState::Collecting;
        info!("Starting weather update");

        if let Err(e) = self.store.mark_in_flight(started_at) {
            warn!("Could not mark cycle as in flight: {e}");
        }

        let (outcome, appended) = match self.collect().await {
            Ok(collected) => (
                CycleOutcome::Success {
                    forecast_points: collected.forecast_points,
                    forecast_error: collected.forecast_error,
                },
                collected.appended,
            ),
            Err(e) => {
                error!("Weather update started at {started_at} failed ({}): {e}", e.kind());
                (
                    CycleOutcome::Failed {
                        kind: e.kind(),
                        message: e.to_string(),
                    },
                    0,
                )
            }
        };

        let pruned = match self.store.prune(self.policy.retention) {
            Ok(n) => n,
            Err(e) => {
                warn!("Cleanup of old records failed ({}): {e}", e.kind());
                0
            }
        };

        let error_text = match &outcome {
            CycleOutcome::Failed { kind, message } => Some(format!("{kind}: {message}")),
            CycleOutcome::Success { .. } => None,
        };
        if let Err(e) = self
            .store
            .record_run_outcome(outcome.is_success(), error_text.as_deref())
        {
            error!("Could not save update stats ({}): {e}", e.kind());
        }

        if let Err(e) = self.store.clear_in_flight() {
            warn!("Could not clear in-flight marker: {e}");
        }

        self.state = if outcome.is_success() {
            info!("Weather update finished: {appended} new record(s), {pruned} pruned");
            self.log_database_status();
            CycleState::Success
        } else {
            CycleState::Failed
        };

        let report = CycleReport {
            started_at,
            finished_at: Utc::now(),
            outcome,
            appended,
            pruned,
        };
        self.state = CycleState::Idle;
        report
    }

    /// Run cycles every `policy.interval` until `shutdown` fires. Cancellation is only
    /// observed between cycles. Returns the number of cycles run.
    pub async fn run_forever(&mut self, shutdown: CancellationToken) -> usize {
        info!(
            "Collector started, updating every {} hour(s)",
            self.policy.interval.as_secs() / 3600
        );

        let mut cycles = 0;
        while !shutdown.is_cancelled() {
            self.run_cycle().await;
            cycles += 1;

            if let Some(next) = TimeDelta::from_std(self.policy.interval)
                .ok()
                .and_then(|d| Utc::now().checked_add_signed(d))
            {
                info!("Next update at {}", next.format("%Y-%m-%d %H:%M:%S"));
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.policy.interval) => {}
            }
        }

        info!("Collector stopped after {cycles} cycle(s)");
        cycles
    }

    pub fn status(&self) -> Result<StatusReport, StoreError> {
        let mut report = StatusReport::from_store(&self.store, Some(self.policy.interval))?;
        if self.state == CycleState::Collecting && report.in_flight_since.is_none() {
            report.in_flight_since = Some(Utc::now());
        }
        Ok(report)
    }

    async fn collect(&self) -> Result<Collected, CycleError> {
        let current = self.source.fetch_current().await?;
        info!(
            "Current conditions in {}: {:.1}°C, {}",
            current.city, current.temperature, current.condition
        );

        let (forecast, forecast_error) =
            match self.source.fetch_forecast(self.policy.forecast_days).await {
                Ok(points) => (points, None),
                Err(e) => {
                    warn!("Forecast skipped this cycle ({}): {e}", e.kind());
                    (Vec::new(), Some(e))
                }
            };
        let forecast_points = forecast.len();

        let mut batch = Vec::with_capacity(1 + forecast_points);
        batch.push(current);
        batch.extend(forecast);

        let appended = self.store.append(&batch)?;

        Ok(Collected {
            appended,
            forecast_points,
            forecast_error,
        })
    }

    fn log_database_status(&self) {
        match self.store.load_all(None) {
            Ok(records) => {
                if let (Some(first), Some(last)) = (records.first(), records.last()) {
                    info!(
                        "Database status: {} entries, {} to {}",
                        records.len(),
                        first.timestamp.format("%Y-%m-%d"),
                        last.timestamp.format("%Y-%m-%d")
                    );
                }
                if let Some(latest) = records.iter().rev().find(|r| !r.is_forecast) {
                    info!(
                        "Latest observation: {:.1}°C, {}",
                        latest.temperature, latest.condition
                    );
                }
            }
            Err(e) => warn!("Could not read database status: {e}"),
        }
    }
}

/// Cumulative stats plus whether a cycle is running right now.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub stats: UpdateStats,
    pub in_flight_since: Option<DateTime<Utc>>,
    pub interval: Option<Duration>,
    pub next_run: Option<DateTime<Utc>>,
}

impl StatusReport {
    /// Status as seen from any process sharing the data directory.
    pub fn from_store(store: &RecordStore, interval: Option<Duration>) -> Result<Self, StoreError> {
        let stats = store.load_stats()?;

        let last_attempt = stats.last_success.max(stats.last_failure);
        let next_run = match (last_attempt, interval) {
            (Some(last), Some(every)) => TimeDelta::from_std(every)
                .ok()
                .and_then(|d| last.checked_add_signed(d)),
            _ => None,
        };

        Ok(Self {
            stats,
            in_flight_since: store.in_flight_since(),
            interval,
            next_run,
        })
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight_since.is_some()
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const TIME: &str = "%d.%m.%Y %H:%M:%S";
        let rule = "=".repeat(50);

        writeln!(f, "{rule}")?;
        writeln!(f, "WEATHER COLLECTOR STATUS")?;
        writeln!(f, "{rule}")?;
        if let Some(every) = self.interval {
            writeln!(f, "Update interval: every {} hour(s)", every.as_secs() / 3600)?;
        }
        writeln!(f, "Total runs: {}", self.stats.total_runs)?;
        writeln!(f, "Successful: {}", self.stats.successful_runs)?;
        writeln!(f, "Failed: {}", self.stats.failed_runs)?;
        if let Some(ts) = self.stats.last_success {
            writeln!(f, "Last success: {}", ts.format(TIME))?;
        }
        if let Some(ts) = self.stats.last_failure {
            writeln!(f, "Last failure: {}", ts.format(TIME))?;
        }
        if let Some(err) = &self.stats.last_error {
            writeln!(f, "Last error: {err}")?;
        }

        let uptime = Utc::now() - self.stats.tracking_since;
        writeln!(
            f,
            "Tracking for: {} days, {} hours",
            uptime.num_days(),
            uptime.num_hours() % 24
        )?;

        match self.in_flight_since {
            Some(ts) => writeln!(f, "Cycle in flight since: {}", ts.format(TIME))?,
            None => {
                if let Some(next) = self.next_run {
                    writeln!(f, "Next update: {}", next.format(TIME))?;
                }
            }
        }
        write!(f, "{rule}")
    }
}
