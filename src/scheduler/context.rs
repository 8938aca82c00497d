//! Timer bookkeeping for one engine instance.
//!
//! Owns the cancel handle of every live timer plus the per-schedule
//! in-flight flags. Each engine carries its own context; nothing here is
//! process-wide, so several engines can coexist in one process.

use std::collections::{HashMap, HashSet};

use tokio::sync::{oneshot, Mutex};

use crate::model::ScheduleId;

#[derive(Default)]
struct ContextInner {
    timers: HashMap<ScheduleId, oneshot::Sender<()>>,
    in_flight: HashSet<ScheduleId>,
}

#[derive(Default)]
pub struct SchedulerContext {
    inner: Mutex<ContextInner>,
}

impl SchedulerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the cancel handle for a newly armed timer. Returns false
    /// if a timer is already live for this id; the caller must not arm a
    /// second one.
    pub async fn register(&self, id: ScheduleId, cancel: oneshot::Sender<()>) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.timers.contains_key(&id) {
            return false;
        }
        inner.timers.insert(id, cancel);
        true
    }

    /// Cancel the live timer, if any. Returns whether one existed. The
    /// in-flight flag is untouched: a dispatched execution finishes on
    /// its own.
    pub async fn cancel(&self, id: ScheduleId) -> bool {
        let handle = self.inner.lock().await.timers.remove(&id);
        match handle {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Drop the bookkeeping for a timer that ended on its own.
    pub async fn forget(&self, id: ScheduleId) {
        self.inner.lock().await.timers.remove(&id);
    }

    /// Mark an execution in flight. False means one is already running
    /// for this id and the fire must be dropped.
    pub async fn try_begin(&self, id: ScheduleId) -> bool {
        self.inner.lock().await.in_flight.insert(id)
    }

    /// Clear the in-flight flag once an execution has returned.
    pub async fn finish(&self, id: ScheduleId) {
        self.inner.lock().await.in_flight.remove(&id);
    }

    pub async fn timer_count(&self) -> usize {
        self.inner.lock().await.timers.len()
    }

    pub async fn has_timer(&self, id: ScheduleId) -> bool {
        self.inner.lock().await.timers.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_refuses_second_timer() {
        let ctx = SchedulerContext::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();

        assert!(ctx.register(7, tx1).await);
        assert!(!ctx.register(7, tx2).await);
        assert_eq!(ctx.timer_count().await, 1);
    }

    #[tokio::test]
    async fn cancel_reaches_the_timer_task() {
        let ctx = SchedulerContext::new();
        let (tx, rx) = oneshot::channel();
        ctx.register(1, tx).await;

        let waiter = tokio::spawn(async move { rx.await.is_ok() });
        assert!(ctx.cancel(1).await);
        assert!(waiter.await.unwrap());
        assert!(!ctx.has_timer(1).await);
        assert!(!ctx.cancel(1).await);
    }

    #[tokio::test]
    async fn in_flight_guard_is_per_id() {
        let ctx = SchedulerContext::new();

        assert!(ctx.try_begin(1).await);
        assert!(!ctx.try_begin(1).await, "second fire must be dropped");
        assert!(ctx.try_begin(2).await, "other schedules are unaffected");

        ctx.finish(1).await;
        assert!(ctx.try_begin(1).await);
    }
}
