//! [`TokioWorkScheduler`] – named recurring work on a Tokio runtime.
//!
//! Each name owns at most one recurring task.  Scheduling a name that is
//! already running aborts the old task, so re-applying a policy replaces the
//! cadence instead of stacking a second timer on top of the first.
//!
//! Units are synchronous closures and run via [`tokio::task::spawn_blocking`]
//! so a slow location fix never stalls the runtime.  A recurring unit does
//! not start its next tick until the previous run has returned.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use lifeline_types::LifelineError;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::ports::{WorkScheduler, WorkUnit};

pub struct TokioWorkScheduler {
    handle: Handle,
    units: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TokioWorkScheduler {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            units: Mutex::new(HashMap::new()),
        }
    }

    /// Names of the recurring units currently scheduled.
    pub fn scheduled(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .units()
            .iter()
            .filter(|(_, task)| !task.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn units(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.units.lock().unwrap_or_else(|p| p.into_inner())
    }
}

async fn run_unit(name: &str, unit: WorkUnit) {
    if let Err(e) = tokio::task::spawn_blocking(move || unit()).await {
        error!(unit = name, error = %e, "work unit panicked");
    }
}

impl WorkScheduler for TokioWorkScheduler {
    fn schedule_every(
        &self,
        name: &str,
        interval: Duration,
        initial_delay: Duration,
        unit: WorkUnit,
    ) -> Result<(), LifelineError> {
        if interval.is_zero() {
            return Err(LifelineError::Scheduling(format!(
                "unit '{name}': interval must be non-zero"
            )));
        }

        let task_name = name.to_string();
        let task = self.handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + initial_delay, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                debug!(unit = %task_name, "running recurring unit");
                run_unit(&task_name, unit.clone()).await;
            }
        });

        if let Some(previous) = self.units().insert(name.to_string(), task) {
            previous.abort();
            debug!(unit = name, "replaced existing schedule");
        }
        info!(
            unit = name,
            interval_secs = interval.as_secs(),
            initial_delay_secs = initial_delay.as_secs(),
            "recurring unit scheduled"
        );
        Ok(())
    }

    fn cancel(&self, name: &str) {
        if let Some(task) = self.units().remove(name) {
            task.abort();
            info!(unit = name, "recurring unit cancelled");
        }
    }

    fn cancel_all(&self) {
        let mut units = self.units();
        for (name, task) in units.drain() {
            task.abort();
            debug!(unit = %name, "recurring unit cancelled");
        }
    }

    fn enqueue_once(&self, unit: WorkUnit) {
        let run_id = Uuid::new_v4().to_string();
        debug!(run_id = %run_id, "one-shot unit enqueued");
        self.handle.spawn(async move {
            run_unit(&run_id, unit).await;
        });
    }
}

impl Drop for TokioWorkScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, WorkUnit) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enqueue_once_runs_unit() {
        let work = TokioWorkScheduler::new(Handle::current());
        let (count, unit) = counter();
        work.enqueue_once(unit);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn recurring_unit_ticks_after_initial_delay() {
        let work = TokioWorkScheduler::new(Handle::current());
        let (count, unit) = counter();
        work.schedule_every(
            "panic_heartbeat",
            Duration::from_millis(40),
            Duration::from_millis(40),
            unit,
        )
        .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(count.load(Ordering::SeqCst) >= 2);
        work.cancel("panic_heartbeat");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rescheduling_a_name_replaces_it() {
        let work = TokioWorkScheduler::new(Handle::current());
        let (first, unit_a) = counter();
        let (_second, unit_b) = counter();
        work.schedule_every("panic_heartbeat", Duration::from_millis(30), Duration::from_millis(30), unit_a)
            .unwrap();
        work.schedule_every("panic_heartbeat", Duration::from_secs(3600), Duration::from_secs(3600), unit_b)
            .unwrap();
        assert_eq!(work.scheduled(), vec!["panic_heartbeat".to_string()]);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_all_stops_everything() {
        let work = TokioWorkScheduler::new(Handle::current());
        let (count, unit) = counter();
        work.schedule_every("a", Duration::from_millis(30), Duration::from_millis(30), unit.clone())
            .unwrap();
        work.schedule_every("b", Duration::from_millis(30), Duration::from_millis(30), unit)
            .unwrap();
        work.cancel_all();
        assert!(work.scheduled().is_empty());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let work = TokioWorkScheduler::new(Handle::current());
        let (_, unit) = counter();
        assert!(matches!(
            work.schedule_every("x", Duration::ZERO, Duration::ZERO, unit),
            Err(LifelineError::Scheduling(_))
        ));
    }
}
