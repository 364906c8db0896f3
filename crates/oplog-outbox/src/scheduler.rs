//! Retry scheduler: a fixed pool of workers fed by delayed and periodic jobs.
//!
//! Delays are timed on the injected [`Clock`] by lightweight timer tasks;
//! only the job itself runs on a pool worker. Jobs are expected to be
//! short (dispatching a publish, scanning the pending store).

use crate::clock::Clock;
use crate::{OutboxError, OutboxResult};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Fixed-size worker pool with delayed and periodic submission.
pub struct RetryScheduler {
    jobs: mpsc::UnboundedSender<Job>,
    shutdown: watch::Sender<bool>,
    clock: Arc<dyn Clock>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RetryScheduler {
    /// Spawn `workers` workers on the current runtime.
    pub fn start(workers: usize, clock: Arc<dyn Clock>) -> Self {
        let (jobs, receiver) = mpsc::unbounded_channel::<Job>();
        let (shutdown, _) = watch::channel(false);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let handles = (0..workers)
            .map(|worker_id| {
                let receiver = receiver.clone();
                let mut stop = shutdown.subscribe();
                tokio::spawn(async move {
                    loop {
                        let job = tokio::select! {
                            _ = stop.changed() => break,
                            job = async { receiver.lock().await.recv().await } => job,
                        };
                        match job {
                            Some(job) => job.await,
                            None => break,
                        }
                    }
                    debug!(worker_id, "Scheduler worker stopped");
                })
            })
            .collect();

        info!(workers, "Retry scheduler started");

        Self {
            jobs,
            shutdown,
            clock,
            workers: Mutex::new(handles),
        }
    }

    /// Run `job` on a worker as soon as one is free.
    pub fn submit<F>(&self, job: F) -> OutboxResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(OutboxError::SchedulerClosed);
        }
        self.jobs
            .send(Box::pin(job))
            .map_err(|_| OutboxError::SchedulerClosed)
    }

    /// Run `job` on a worker once `delay` has elapsed on the clock.
    pub fn schedule_after<F>(&self, delay: Duration, job: F) -> OutboxResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(OutboxError::SchedulerClosed);
        }

        let jobs = self.jobs.clone();
        let sleep = self.clock.sleep(delay);
        let mut stop = self.shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep => {
                    let _ = jobs.send(Box::pin(job));
                }
                _ = stop.changed() => {}
            }
        });
        Ok(())
    }

    /// Submit a job built by `make_job` every `period`, until shutdown.
    pub fn schedule_every<F, Fut>(&self, period: Duration, mut make_job: F) -> OutboxResult<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(OutboxError::SchedulerClosed);
        }

        let jobs = self.jobs.clone();
        let clock = self.clock.clone();
        let mut stop = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = clock.sleep(period) => {
                        if jobs.send(Box::pin(make_job())).is_err() {
                            break;
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
        });
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Signal every worker and timer to stop. Does not wait.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Stop and wait for workers to finish their current job.
    pub async fn shutdown(&self) {
        self.stop();
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.await;
        }
        info!("Retry scheduler stopped");
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_secs(2);

    async fn wait_for(count: &AtomicUsize, expected: usize) {
        tokio::time::timeout(WAIT, async {
            while count.load(Ordering::SeqCst) < expected {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("timed out waiting for jobs");
    }

    #[tokio::test]
    async fn test_submitted_jobs_run() {
        let scheduler = RetryScheduler::start(2, Arc::new(ManualClock::default()));
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let ran = ran.clone();
            scheduler
                .submit(async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        wait_for(&ran, 5).await;
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_delayed_job_waits_for_clock() {
        let clock = ManualClock::default();
        let scheduler = RetryScheduler::start(2, Arc::new(clock.clone()));
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = ran.clone();
        scheduler
            .schedule_after(Duration::from_secs(5), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        clock.advance(Duration::from_secs(5));
        wait_for(&ran, 1).await;
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_periodic_job_fires_each_period() {
        let clock = ManualClock::default();
        let scheduler = RetryScheduler::start(2, Arc::new(clock.clone()));
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = ran.clone();
        scheduler
            .schedule_every(Duration::from_secs(60), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();

        for expected in 1..=3 {
            assert!(clock.wait_for_sleepers(1, WAIT).await);
            clock.advance(Duration::from_secs(60));
            wait_for(&ran, expected).await;
        }
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_jobs_and_cancels_timers() {
        let clock = ManualClock::default();
        let scheduler = RetryScheduler::start(2, Arc::new(clock.clone()));
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = ran.clone();
        scheduler
            .schedule_after(Duration::from_secs(5), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        scheduler.shutdown().await;
        assert!(scheduler.is_shut_down());
        assert!(matches!(
            scheduler.submit(async {}),
            Err(OutboxError::SchedulerClosed)
        ));

        clock.advance(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
