//! Daily wall-clock job scheduling.
//!
//! Jobs are registered for a time of day and polled on a fixed interval.
//! `run_pending` runs every job whose next run time has passed and then moves
//! it to the next occurrence of its time of day, so a job that was due on
//! several missed days runs once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, Local, NaiveDateTime, NaiveTime};

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> anyhow::Result<()>;
}

struct ScheduledJob {
    job: Arc<dyn Job>,
    at: NaiveTime,
    next_run: NaiveDateTime,
    last_run: Option<NaiveDateTime>,
}

#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
}

/// First occurrence of `at` strictly after `after`.
pub fn next_occurrence(at: NaiveTime, after: NaiveDateTime) -> NaiveDateTime {
    let candidate = after.date().and_time(at);
    if candidate > after {
        candidate
    } else {
        candidate
            .checked_add_days(Days::new(1))
            .unwrap_or(NaiveDateTime::MAX)
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn every_day_at(&mut self, at: NaiveTime, job: Arc<dyn Job>) -> &mut Self {
        self.every_day_at_from(at, job, now())
    }

    /// Registers `job` as if the current time were `now`.
    pub fn every_day_at_from(
        &mut self,
        at: NaiveTime,
        job: Arc<dyn Job>,
        now: NaiveDateTime,
    ) -> &mut Self {
        let next_run = next_occurrence(at, now);
        tracing::info!(job = job.name(), %at, %next_run, "job scheduled");
        self.jobs.push(ScheduledJob {
            job,
            at,
            next_run,
            last_run: None,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Earliest upcoming run across all jobs.
    pub fn next_run(&self) -> Option<NaiveDateTime> {
        self.jobs.iter().map(|j| j.next_run).min()
    }

    pub fn last_run(&self, name: &str) -> Option<NaiveDateTime> {
        self.jobs
            .iter()
            .find(|j| j.job.name() == name)
            .and_then(|j| j.last_run)
    }

    pub async fn run_pending(&mut self) -> usize {
        self.run_pending_at(now()).await
    }

    /// Runs every job due at `now`, in registration order. Returns how many ran.
    /// A failing job is logged and stays scheduled.
    pub async fn run_pending_at(&mut self, now: NaiveDateTime) -> usize {
        let mut ran = 0;
        for scheduled in self.jobs.iter_mut().filter(|j| j.next_run <= now) {
            let name = scheduled.job.name().to_string();
            tracing::debug!(job = %name, "running job");

            if let Err(err) = scheduled.job.run().await {
                tracing::error!(job = %name, error = %format!("{err:#}"), "job failed");
            }

            scheduled.last_run = Some(now);
            scheduled.next_run = next_occurrence(scheduled.at, now);
            tracing::info!(job = %name, next_run = %scheduled.next_run, "job rescheduled");
            ran += 1;
        }
        ran
    }

    /// Polls every `poll_interval` until `shutdown` resolves.
    pub async fn run_until<F>(mut self, poll_interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.run_pending().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::NaiveDate;

    use super::*;

    struct CountingJob {
        name: &'static str,
        runs: AtomicUsize,
        fail: bool,
    }

    impl CountingJob {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                runs: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn eight() -> NaiveTime {
        NaiveTime::from_hms_opt(8, 0, 0).unwrap()
    }

    #[test]
    fn next_occurrence_rolls_over_midnight() {
        assert_eq!(next_occurrence(eight(), at(1, 7, 59)), at(1, 8, 0));
        assert_eq!(next_occurrence(eight(), at(1, 8, 0)), at(2, 8, 0));
        let april_first = NaiveDate::from_ymd_opt(2024, 4, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        assert_eq!(next_occurrence(eight(), at(31, 9, 0)), april_first);
    }

    #[tokio::test]
    async fn registered_after_time_runs_tomorrow() {
        let job = CountingJob::new("update_recommendations", false);
        let mut scheduler = Scheduler::new();
        scheduler.every_day_at_from(eight(), job.clone(), at(1, 9, 0));

        assert_eq!(scheduler.next_run(), Some(at(2, 8, 0)));
        assert_eq!(scheduler.run_pending_at(at(1, 23, 59)).await, 0);
        assert_eq!(scheduler.run_pending_at(at(2, 8, 0)).await, 1);
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.last_run("update_recommendations"), Some(at(2, 8, 0)));
        assert_eq!(scheduler.next_run(), Some(at(3, 8, 0)));
    }

    #[tokio::test]
    async fn runs_once_after_long_gap() {
        let job = CountingJob::new("daily", false);
        let mut scheduler = Scheduler::new();
        scheduler.every_day_at_from(eight(), job.clone(), at(1, 7, 0));

        assert_eq!(scheduler.run_pending_at(at(5, 12, 0)).await, 1);
        assert_eq!(scheduler.run_pending_at(at(5, 12, 1)).await, 0);
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.next_run(), Some(at(6, 8, 0)));
    }

    #[tokio::test]
    async fn failing_job_stays_scheduled() {
        let failing = CountingJob::new("failing", true);
        let healthy = CountingJob::new("healthy", false);
        let mut scheduler = Scheduler::new();
        scheduler
            .every_day_at_from(eight(), failing.clone(), at(1, 7, 0))
            .every_day_at_from(eight(), healthy.clone(), at(1, 7, 0));

        assert_eq!(scheduler.run_pending_at(at(1, 8, 0)).await, 2);
        assert_eq!(scheduler.run_pending_at(at(2, 8, 0)).await, 2);
        assert_eq!(failing.runs.load(Ordering::SeqCst), 2);
        assert_eq!(healthy.runs.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_until_stops_on_shutdown() {
        let scheduler = Scheduler::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(scheduler.run_until(Duration::from_secs(1), async move {
            let _ = rx.await;
        }));
        tokio::time::sleep(Duration::from_secs(3)).await;
        tx.send(()).unwrap();

        handle.await.unwrap();
    }
}
