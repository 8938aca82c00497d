//! The schedule engine: turns persisted schedule rows into live timers,
//! enforces single-flight execution per schedule, and owns every status
//! transition.
//!
//! One timer task per ACTIVE schedule. The task loops over a biased
//! `select!` with arms ordered cancel, tick, window deadline. A tick that
//! lands exactly on the window boundary still dispatches, but a tick
//! observed after the deadline has passed is dropped, so even a stalled
//! task never produces a post-window fire.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::executor::Execute;
use crate::model::{Cadence, Schedule, ScheduleId, ScheduleStatus, TargetId};
use crate::scheduler::context::SchedulerContext;
use crate::scheduler::error::{EngineError, Result};
use crate::storage::{NewSchedule, Pool, SchedulePatch, ScheduleStore, TargetStore};

/// Parameters accepted by [`ScheduleEngine::create`].
#[derive(Debug, Clone)]
pub struct CreateSchedule {
    pub name: String,
    pub target_id: TargetId,
    pub cadence: Cadence,
}

/// Changes accepted by [`ScheduleEngine::update`]; `None` leaves a field
/// alone.
#[derive(Debug, Clone, Default)]
pub struct UpdateSchedule {
    pub name: Option<String>,
    pub cadence: Option<Cadence>,
}

/// What `recover()` found and did at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub loaded: usize,
    pub armed: usize,
    pub expired: usize,
}

#[derive(Clone)]
pub struct ScheduleEngine {
    schedules: ScheduleStore,
    targets: TargetStore,
    executor: Arc<dyn Execute>,
    ctx: Arc<SchedulerContext>,
}

impl ScheduleEngine {
    pub fn new(pool: Pool, executor: Arc<dyn Execute>) -> Self {
        Self {
            schedules: ScheduleStore::new(pool.clone()),
            targets: TargetStore::new(pool),
            executor,
            ctx: Arc::new(SchedulerContext::new()),
        }
    }

    /// Validate, persist as ACTIVE, and arm the timer.
    pub async fn create(&self, new: CreateSchedule) -> Result<Schedule> {
        validate_cadence(&new.cadence)?;
        if self.targets.get(new.target_id)?.is_none() {
            return Err(EngineError::Validation(format!(
                "target {} does not exist",
                new.target_id
            )));
        }
        if self.schedules.get_by_name(&new.name)?.is_some() {
            return Err(EngineError::Validation(format!(
                "schedule name '{}' is already taken",
                new.name
            )));
        }

        let window_started_at = match new.cadence {
            Cadence::Window { .. } => Some(Utc::now()),
            Cadence::Interval { .. } => None,
        };
        let schedule = self.schedules.create(&NewSchedule {
            name: new.name,
            target_id: new.target_id,
            cadence: new.cadence,
            window_started_at,
        })?;

        self.arm(&schedule).await;
        info!(
            schedule = %schedule.name,
            id = schedule.id,
            kind = schedule.cadence.kind(),
            interval = schedule.cadence.interval_seconds(),
            "schedule installed"
        );
        Ok(schedule)
    }

    /// Cancel the timer and mark PAUSED. Only legal from ACTIVE.
    pub async fn pause(&self, id: ScheduleId) -> Result<Schedule> {
        let schedule = self.load(id)?;
        if schedule.status != ScheduleStatus::Active {
            return Err(EngineError::InvalidState(format!(
                "schedule {id} is {}, only ACTIVE schedules can be paused",
                schedule.status
            )));
        }

        self.ctx.cancel(id).await;
        self.schedules.set_status(id, ScheduleStatus::Paused)?;
        info!(schedule = %schedule.name, id, "schedule paused");
        self.load(id)
    }

    /// Re-arm a paused schedule. A window that elapsed during the pause
    /// goes straight to STOPPED without a timer; pause time is never
    /// credited back.
    pub async fn resume(&self, id: ScheduleId) -> Result<Schedule> {
        let schedule = self.load(id)?;
        if schedule.status != ScheduleStatus::Paused {
            return Err(EngineError::InvalidState(format!(
                "schedule {id} is {}, only PAUSED schedules can be resumed",
                schedule.status
            )));
        }

        if let Some(ends_at) = schedule.window_ends_at() {
            if ends_at <= Utc::now() {
                self.schedules.mark_stopped(id, Utc::now())?;
                info!(
                    schedule = %schedule.name,
                    id,
                    "window elapsed during pause, schedule stopped"
                );
                return self.load(id);
            }
        }

        self.schedules.set_status(id, ScheduleStatus::Active)?;
        let schedule = self.load(id)?;
        self.arm(&schedule).await;
        info!(schedule = %schedule.name, id, "schedule resumed");
        Ok(schedule)
    }

    /// Rename and/or swap the cadence. An ACTIVE schedule gets its timer
    /// re-armed under the new cadence.
    pub async fn update(&self, id: ScheduleId, changes: UpdateSchedule) -> Result<Schedule> {
        let current = self.load(id)?;
        if let Some(cadence) = &changes.cadence {
            validate_cadence(cadence)?;
        }
        if let Some(name) = &changes.name {
            if let Some(existing) = self.schedules.get_by_name(name)? {
                if existing.id != id {
                    return Err(EngineError::Validation(format!(
                        "schedule name '{name}' is already taken"
                    )));
                }
            }
        }

        // Switching a schedule onto a window starts that window now; an
        // existing window keeps its original start.
        let window_started_at = match changes.cadence {
            Some(Cadence::Window { .. }) if current.window_started_at.is_none() => Some(Utc::now()),
            _ => None,
        };

        let rearm = current.status == ScheduleStatus::Active && changes.cadence.is_some();
        let updated = self
            .schedules
            .update(
                id,
                &SchedulePatch {
                    name: changes.name,
                    cadence: changes.cadence,
                    window_started_at,
                },
            )?
            .ok_or(EngineError::NotFound {
                kind: "schedule",
                id,
            })?;

        if rearm {
            self.ctx.cancel(id).await;
            self.arm(&updated).await;
        }
        info!(schedule = %updated.name, id, "schedule updated");
        Ok(updated)
    }

    /// Cancel any live timer and remove the row. Legal from any status.
    pub async fn delete(&self, id: ScheduleId) -> Result<()> {
        self.ctx.cancel(id).await;
        if !self.schedules.delete(id)? {
            return Err(EngineError::NotFound {
                kind: "schedule",
                id,
            });
        }
        info!(id, "schedule deleted");
        Ok(())
    }

    /// Rebuild timers from persisted rows. Run once at process start.
    ///
    /// ACTIVE interval schedules re-arm at their original cadence; ACTIVE
    /// window schedules re-arm against the absolute window end, or are
    /// stopped outright when the window elapsed while the process was
    /// down. PAUSED and STOPPED rows are loaded as data only.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let all = self.schedules.list(None)?;
        let mut armed = 0usize;
        let mut expired = 0usize;

        for schedule in &all {
            if schedule.status != ScheduleStatus::Active {
                continue;
            }
            match schedule.cadence {
                Cadence::Interval { .. } => {
                    self.arm(schedule).await;
                    armed += 1;
                }
                Cadence::Window { .. } => match schedule.window_ends_at() {
                    Some(ends_at) if ends_at > Utc::now() => {
                        self.arm(schedule).await;
                        armed += 1;
                    }
                    _ => {
                        self.schedules.mark_stopped(schedule.id, Utc::now())?;
                        expired += 1;
                        info!(
                            schedule = %schedule.name,
                            id = schedule.id,
                            "window elapsed while offline, schedule stopped"
                        );
                    }
                },
            }
        }

        let report = RecoveryReport {
            loaded: all.len(),
            armed,
            expired,
        };
        info!(
            loaded = report.loaded,
            armed = report.armed,
            expired = report.expired,
            "schedule recovery complete"
        );
        Ok(report)
    }

    /// Number of live timers; exposed for health reporting and tests.
    pub async fn live_timers(&self) -> usize {
        self.ctx.timer_count().await
    }

    pub async fn has_timer(&self, id: ScheduleId) -> bool {
        self.ctx.has_timer(id).await
    }

    fn load(&self, id: ScheduleId) -> Result<Schedule> {
        self.schedules.get(id)?.ok_or(EngineError::NotFound {
            kind: "schedule",
            id,
        })
    }

    async fn arm(&self, schedule: &Schedule) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        if !self.ctx.register(schedule.id, cancel_tx).await {
            warn!(
                id = schedule.id,
                "timer already live for schedule, not arming another"
            );
            return;
        }

        let every = StdDuration::from_secs(u64::from(schedule.cadence.interval_seconds()));
        let deadline = schedule.window_ends_at().map(deadline_for);
        let engine = self.clone();
        let id = schedule.id;
        tokio::spawn(async move { engine.run_timer(id, every, deadline, cancel_rx).await });
        debug!(id = schedule.id, interval = ?every, "timer armed");
    }

    async fn run_timer(
        self,
        id: ScheduleId,
        every: StdDuration,
        deadline: Option<Instant>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let mut ticker = time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let expiry = async move {
            match deadline {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                biased;
                _ = &mut cancel_rx => {
                    debug!(id, "timer cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    // If the task was stalled past the deadline, refuse the
                    // late tick and let the expiry arm close the window.
                    if let Some(at) = deadline {
                        if Instant::now() > at {
                            continue;
                        }
                    }
                    self.on_timer_fire(id).await;
                }
                _ = &mut expiry => {
                    self.expire_window(id).await;
                    return;
                }
            }
        }
    }

    /// One interval boundary. Re-reads state (the row may have been
    /// paused or deleted since the tick was scheduled), applies the
    /// in-flight guard, and dispatches the execution as its own task so
    /// the timer keeps ticking underneath slow calls.
    async fn on_timer_fire(&self, id: ScheduleId) {
        let schedule = match self.schedules.get(id) {
            Ok(Some(s)) if s.status == ScheduleStatus::Active => s,
            Ok(_) => {
                debug!(id, "fire skipped, schedule no longer active");
                return;
            }
            Err(e) => {
                error!(id, "failed to load schedule at fire: {:#}", e);
                return;
            }
        };
        let target = match self.targets.get(schedule.target_id) {
            Ok(Some(t)) => t,
            Ok(None) => {
                warn!(schedule = %schedule.name, id, "target missing, fire skipped");
                return;
            }
            Err(e) => {
                error!(id, "failed to load target at fire: {:#}", e);
                return;
            }
        };

        if !self.ctx.try_begin(id).await {
            debug!(
                schedule = %schedule.name,
                id,
                "previous execution still in flight, fire dropped"
            );
            return;
        }

        let engine = self.clone();
        tokio::spawn(async move {
            let run = engine.executor.execute(&schedule, &target).await;
            engine.ctx.finish(id).await;
            debug!(
                schedule = %schedule.name,
                run = run.id,
                status = %run.status,
                "execution finished"
            );
        });
    }

    async fn expire_window(&self, id: ScheduleId) {
        self.ctx.forget(id).await;
        match self.schedules.get(id) {
            Ok(Some(s)) if s.status == ScheduleStatus::Active => {
                if let Err(e) = self.schedules.mark_stopped(id, Utc::now()) {
                    error!(id, "failed to stop expired window: {:#}", e);
                    return;
                }
                info!(schedule = %s.name, id, "window elapsed, schedule stopped");
            }
            Ok(_) => debug!(id, "window expiry raced a pause or delete"),
            Err(e) => error!(id, "failed to load schedule at window expiry: {:#}", e),
        }
    }
}

fn validate_cadence(cadence: &Cadence) -> Result<()> {
    if cadence.interval_seconds() == 0 {
        return Err(EngineError::Validation(
            "interval_seconds must be greater than zero".into(),
        ));
    }
    if let Cadence::Window {
        duration_seconds, ..
    } = cadence
    {
        if *duration_seconds == 0 {
            return Err(EngineError::Validation(
                "duration_seconds must be greater than zero".into(),
            ));
        }
    }
    Ok(())
}

/// Convert the absolute window end into a timer deadline. An end already
/// in the past becomes an immediate deadline.
fn deadline_for(ends_at: DateTime<Utc>) -> Instant {
    let remaining = (ends_at - Utc::now())
        .to_std()
        .unwrap_or(StdDuration::ZERO);
    Instant::now() + remaining
}
