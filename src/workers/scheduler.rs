use super::processor::{JobOutcome, JobProcessor};
use crate::modules::job::model::MAX_RETRIES;
use crate::modules::job::repository::JobStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DRAIN_POLL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum TickOutcome {
    /// Shutting down, or a job is already in flight.
    Skipped,
    /// Nothing claimable.
    Idle,
    Processed { job_id: Uuid, outcome: JobOutcome },
    /// The claim query itself failed.
    Errored(String),
}

/// Polls the job table and runs at most one job at a time.
pub struct Scheduler {
    jobs: Arc<dyn JobStore>,
    processor: Arc<JobProcessor>,
    poll_interval: Duration,
    drain_poll: Duration,
    in_flight: AtomicBool,
    current_job: Mutex<Option<Uuid>>,
    shutting_down: AtomicBool,
}

impl Scheduler {
    pub fn new(jobs: Arc<dyn JobStore>, processor: Arc<JobProcessor>, poll_interval: Duration) -> Self {
        Self {
            jobs,
            processor,
            poll_interval,
            drain_poll: DRAIN_POLL,
            in_flight: AtomicBool::new(false),
            current_job: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn with_drain_poll(mut self, drain_poll: Duration) -> Self {
        self.drain_poll = drain_poll;
        self
    }

    pub fn current_job(&self) -> Option<Uuid> {
        *self.current_job.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn set_current_job(&self, job_id: Option<Uuid>) {
        *self.current_job.lock().unwrap_or_else(|e| e.into_inner()) = job_id;
    }

    /// One polling cycle: claim the oldest eligible job and process it to the end.
    pub async fn tick(&self) -> TickOutcome {
        if self.is_shutting_down() {
            return TickOutcome::Skipped;
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Previous job still running, skipping tick");
            return TickOutcome::Skipped;
        }
        let _slot = InFlightGuard { scheduler: self };

        let job = match self.jobs.claim_next(MAX_RETRIES).await {
            Ok(Some(job)) => job,
            Ok(None) => return TickOutcome::Idle,
            Err(e) => {
                error!("Failed to claim job: {:#}", e);
                return TickOutcome::Errored(format!("{:#}", e));
            }
        };

        self.set_current_job(Some(job.id));
        info!(
            job_id = %job.id,
            media_id = %job.media_id,
            retry_count = job.retry_count,
            "📥 Claimed job"
        );

        let outcome = self.processor.run(&job).await;
        TickOutcome::Processed {
            job_id: job.id,
            outcome,
        }
    }

    /// Stops new claims. The in-flight job, if any, keeps running.
    pub fn begin_shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            info!("🛑 Scheduler shutting down, no new jobs will be claimed");
        }
    }

    /// Waits up to `grace` for the in-flight job. Returns `false` if it is still running.
    pub async fn drain(&self, grace: Duration) -> bool {
        if !self.is_busy() {
            info!("No job in flight");
            return true;
        }

        info!(job_id = ?self.current_job(), "Waiting up to {:?} for in-flight job", grace);
        let deadline = Instant::now() + grace;

        loop {
            if !self.is_busy() {
                info!("✅ In-flight job finished");
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    job_id = ?self.current_job(),
                    "Grace period elapsed, abandoning in-flight job in PROCESSING"
                );
                return false;
            }

            sleep(self.drain_poll.min(deadline - now)).await;
        }
    }

    /// Ticks every poll interval until `shutdown` fires, then drains.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken, grace: Duration) -> bool {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.poll_interval, "🎬 Transcoding scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let scheduler = Arc::clone(&self);
                    // A panicking job only takes down its own task.
                    tokio::spawn(async move {
                        scheduler.tick().await;
                    });
                }
            }
        }

        self.begin_shutdown();
        self.drain(grace).await
    }
}

/// Releases the single job slot when a tick ends, however it ends.
struct InFlightGuard<'a> {
    scheduler: &'a Scheduler,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.set_current_job(None);
        self.scheduler.in_flight.store(false, Ordering::Release);
    }
}
