use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use anyhow::Result;

pub struct Scheduler {
    interval: Duration,
}

impl Scheduler {
    pub fn new(interval_ms: u64) -> Result<Self> {
        if interval_ms == 0 {
            anyhow::bail!("probe interval must be greater than zero");
        }
        Ok(Self {
            interval: Duration::from_millis(interval_ms),
        })
    }

    /// job: async closure for each tick, run until `shutdown` resolves
    pub async fn run<J, F, S>(&self, mut job: J, shutdown: S) -> Result<()>
    where
        J: FnMut() -> F + Send + 'static,
        F: Future<Output = ()> + Send + 'static,
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut next = Instant::now();
        loop {
            next += self.interval;
            // spawn job so next tick unaffected by job duration
            tokio::spawn(job());
            tokio::select! {
                _ = sleep_until(next) => {}
                _ = &mut shutdown => {
                    tracing::info!("Scheduler stopped");
                    return Ok(());
                }
            }
        }
    }
}
