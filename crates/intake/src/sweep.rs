//! Periodic expiry of jobs the worker never answered.
//!
//! No event arrives for a lost job, so this scheduler is the only thing that
//! moves it out of `Queued`/`Processing`. It also accepts manual sweeps via a
//! broadcast channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::coordinator::IntakeCoordinator;

pub struct SweepScheduler {
    coordinator: Arc<IntakeCoordinator>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl SweepScheduler {
    pub fn new(coordinator: Arc<IntakeCoordinator>, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts the sweep loop on the current runtime.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let coordinator = Arc::clone(&self.coordinator);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.tick().await; // skip immediate first tick

            loop {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                tokio::select! {
                    _ = interval_timer.tick() => {},
                    Ok(()) = trigger_rx.recv() => {
                        log::info!("Manual sweep triggered");
                    },
                }

                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                // Expiry does blocking SQLite writes under the job locks.
                let sweeper = Arc::clone(&coordinator);
                match tokio::task::spawn_blocking(move || sweeper.expire_stale_jobs(Utc::now()))
                    .await
                {
                    Ok(expired) => {
                        for job_id in &expired {
                            log::warn!("Job {} expired without a worker callback", job_id);
                        }
                    }
                    Err(e) => log::error!("Sweep task failed: {}", e),
                }
            }

            log::debug!("Sweep scheduler stopped");
        })
    }

    /// Signals the scheduler to stop. A pending trigger or tick wakes it.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
