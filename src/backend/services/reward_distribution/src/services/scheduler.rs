use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use performance_monitoring::UptimeSampler;
use shared_models::{Result, RewardError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::services::cycle_service::{CycleContext, CycleOutcome, CycleService};

/// Next wall-clock instant at `hour:minute` in `timezone` strictly after `now`.
/// Skipped local times (DST gap) move forward an hour; repeated ones take the
/// earlier instant.
pub fn next_trigger(now: DateTime<Utc>, timezone: Tz, hour: u32, minute: u32) -> Result<DateTime<Utc>> {
    let at = NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| RewardError::validation(format!("invalid trigger time {:02}:{:02}", hour, minute)))?;
    let today = now.with_timezone(&timezone).date_naive();

    for offset in 0..=2 {
        let Some(date) = today.checked_add_days(chrono::Days::new(offset)) else {
            break;
        };
        let candidate = resolve_local(timezone, date.and_time(at));
        if let Some(candidate) = candidate.filter(|c| *c > now) {
            return Ok(candidate);
        }
    }
    Err(RewardError::validation(format!("no trigger time after {}", now)))
}

fn resolve_local(timezone: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    match timezone.from_local_datetime(&local) {
        LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => timezone
            .from_local_datetime(&(local + chrono::Duration::hours(1)))
            .earliest()
            .map(|t| t.with_timezone(&Utc)),
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub hour: u32,
    pub minute: u32,
    pub timezone: Tz,
    pub max_retries: u32,
    pub retry_base: Duration,
    pub cycle_timeout: Duration,
    pub heartbeat_retention: Option<chrono::Duration>,
}

impl From<&Config> for SchedulerSettings {
    fn from(config: &Config) -> Self {
        Self {
            hour: config.schedule.hour,
            minute: config.schedule.minute,
            timezone: config.schedule.timezone,
            max_retries: config.schedule.max_retries,
            retry_base: config.schedule.retry_base(),
            cycle_timeout: config.schedule.cycle_timeout(),
            heartbeat_retention: config.uptime.retention(),
        }
    }
}

impl SchedulerSettings {
    /// `retry_base * 2^attempt`, attempt counted from zero.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Runs one cycle per day at the configured local time.
pub struct Scheduler {
    cycles: Arc<CycleService>,
    sampler: Arc<UptimeSampler>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
}

impl Scheduler {
    /// Scheduler for `cycles`, pruning heartbeats through `sampler` after each run.
    pub fn new(
        cycles: Arc<CycleService>,
        sampler: Arc<UptimeSampler>,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            cycles,
            sampler,
            clock,
            settings,
        }
    }

    /// Starts the loop on the runtime; the handle stops it.
    pub fn spawn(self) -> SchedulerHandle {
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(stop_rx).await });
        SchedulerHandle { stop, task }
    }

    /// Loops until `stop` flips to true. The stop flag is checked before each
    /// wait; a cycle that already started is left to finish.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        info!(
            hour = self.settings.hour,
            minute = self.settings.minute,
            timezone = %self.settings.timezone,
            "reward scheduler started"
        );

        loop {
            if *stop.borrow() {
                break;
            }

            // Recomputed from wall time every iteration.
            let now = self.clock.now();
            let trigger = match next_trigger(now, self.settings.timezone, self.settings.hour, self.settings.minute) {
                Ok(trigger) => trigger,
                Err(err) => {
                    error!(error = %err, "cannot compute next trigger; scheduler exiting");
                    break;
                }
            };
            let delay = (trigger - now).to_std().unwrap_or(Duration::ZERO);
            info!(next_run = %trigger, delay_secs = delay.as_secs(), "next reward cycle scheduled");

            tokio::select! {
                _ = self.clock.sleep(delay) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            // Failures are already logged; the next trigger is tomorrow's.
            let _ = self.run_once().await;
        }

        info!("reward scheduler stopped");
    }

    /// One scheduled cycle with bounded retries on transient failures, followed
    /// by heartbeat pruning.
    pub async fn run_once(&self) -> Result<CycleOutcome> {
        let ctx = CycleContext::scheduled(self.clock.now(), self.settings.timezone);
        let result = self.run_with_retries(&ctx).await;
        self.prune_heartbeats().await;
        result
    }

    async fn run_with_retries(&self, ctx: &CycleContext) -> Result<CycleOutcome> {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.settings.cycle_timeout, self.cycles.run(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(RewardError::storage(format!(
                    "cycle exceeded {:?}",
                    self.settings.cycle_timeout
                ))),
            };

            match result {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_retryable() && attempt < self.settings.max_retries => {
                    let delay = self.settings.backoff(attempt);
                    attempt += 1;
                    warn!(
                        cycle_id = %ctx.cycle_id,
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "reward cycle failed; retrying"
                    );
                    self.clock.sleep(delay).await;
                }
                Err(err) => {
                    if err.is_retryable() {
                        error!(cycle_id = %ctx.cycle_id, attempts = attempt + 1, error = %err, "reward cycle skipped until next trigger");
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn prune_heartbeats(&self) {
        let Some(retention) = self.settings.heartbeat_retention else {
            return;
        };
        let cutoff = self.clock.now() - retention;
        if let Err(err) = self.sampler.prune(cutoff).await {
            warn!(error = %err, %cutoff, "heartbeat pruning failed");
        }
    }
}

/// Stop handle for a spawned [`Scheduler`].
pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals stop and waits up to `grace` for an in-flight cycle. Past the
    /// grace period the task is aborted and awaited. Returns whether the
    /// scheduler stopped within the grace period.
    pub async fn shutdown(mut self, grace: Duration) -> bool {
        if self.stop.send(true).is_err() {
            warn!("scheduler already exited");
        }

        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                error!(error = %err, "scheduler task failed");
                false
            }
            Err(_) => {
                warn!(grace_secs = grace.as_secs(), "in-flight cycle did not finish within grace period; abandoning it");
                self.task.abort();
                // Wait for the cancellation so the cycle's futures are dropped
                // before we report.
                let _ = (&mut self.task).await;
                false
            }
        }
    }
}
