//! Sequential launch loop: wait for an idle host, launch, wait again.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    config::LauncherConfig,
    docker::Host,
    runner::{LaunchOutcome, Runner, now_timestamp},
    wait::{Poller, WaitError},
};

/// Printed between workloads.
pub const SEPARATOR: &str = "====================================================================================================";

/// Runs every configured workload, one at a time.
pub struct Scheduler<H> {
    config: LauncherConfig,
    host: H,
    poller: Poller,
    cancel: CancellationToken,
}

impl<H: Host> Scheduler<H> {
    #[must_use]
    pub fn new(config: LauncherConfig, host: H) -> Self {
        let poller = Poller::new(config.host.poll_interval(), config.host.wait_timeout());
        Self {
            config,
            host,
            poller,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `cancel` to abort the loop from outside (e.g. on Ctrl-C).
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Launch every workload in table order.
    ///
    /// Failed launches are recorded and the loop moves on. Only a wait that
    /// times out, is cancelled or cannot query the engine stops the loop.
    pub async fn run(&self) -> Result<SchedulerResult, SchedulerError> {
        let runner = Runner::new(&self.config, &self.host);
        let started_at = now_timestamp();
        let mut outcomes = Vec::with_capacity(self.config.workloads.len());
        let mut polls = 0;

        for workload in &self.config.workloads {
            polls += self.wait_idle(&workload.name).await?;
            self.clear_caches().await;
            println!("{SEPARATOR}");

            outcomes.push(runner.launch(workload).await);

            polls += self.wait_idle(&workload.name).await?;
            self.clear_caches().await;
            println!("{SEPARATOR}");
        }

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        Ok(SchedulerResult {
            total: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
            polls,
            started_at,
            finished_at: now_timestamp(),
            outcomes,
        })
    }

    /// Block until the engine reports no running containers.
    async fn wait_idle(&self, workload: &str) -> Result<u32, SchedulerError> {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("{workload:15}: waiting for running containers"));
        pb.enable_steady_tick(Duration::from_millis(100));

        let host = &self.host;
        let result = self
            .poller
            .until(&self.cancel, move || async move {
                host.containers_running().await.map(|running| !running)
            })
            .await;
        pb.finish_and_clear();

        match result {
            Ok(sleeps) => {
                if sleeps > 0 {
                    tracing::debug!("{workload}: host idle after {sleeps} polls");
                }
                Ok(sleeps)
            }
            Err(source) => Err(SchedulerError::Wait {
                workload: workload.to_string(),
                source,
            }),
        }
    }

    async fn clear_caches(&self) {
        if self.config.run.dry_run || !self.config.host.clear_caches {
            return;
        }
        if let Err(e) = self.host.drop_page_cache().await {
            tracing::warn!("Could not clear page cache: {e}");
        }
    }
}

/// Result of a launcher run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerResult {
    /// Number of workloads launched.
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Sleeps taken while waiting for the host to go idle.
    pub polls: u32,
    pub started_at: String,
    pub finished_at: String,
    pub outcomes: Vec<LaunchOutcome>,
}

/// Errors that stop the launcher.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("waiting for an idle host around {workload}: {source}")]
    Wait {
        workload: String,
        #[source]
        source: WaitError,
    },
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use algoperf_config::{Framework, find_builtin};

    use super::*;
    use crate::{config::RunOptions, docker::HostError};

    /// Reports `busy_polls` running checks as busy, then idle forever.
    #[derive(Default)]
    struct CountingHost {
        busy_polls: AtomicUsize,
        drops: AtomicUsize,
        commands: Mutex<Vec<String>>,
    }

    impl Host for CountingHost {
        async fn containers_running(&self) -> Result<bool, HostError> {
            let left = self.busy_polls.load(Ordering::SeqCst);
            if left == 0 {
                return Ok(false);
            }
            self.busy_polls.store(left - 1, Ordering::SeqCst);
            Ok(true)
        }

        async fn run_shell(&self, command: &str) -> Result<Option<i32>, HostError> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok(Some(0))
        }

        async fn drop_page_cache(&self) -> Result<(), HostError> {
            self.drops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(dry_run: bool) -> LauncherConfig {
        let mut run = RunOptions::new(Framework::Pytorch, "adamw");
        run.dry_run = dry_run;
        let mut config = LauncherConfig::new(run);
        config.workloads = vec![find_builtin("ogbg").unwrap()];
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_caches_dropped_around_each_launch() {
        let scheduler = Scheduler::new(config(false), CountingHost::default());
        let result = scheduler.run().await.unwrap();

        assert_eq!(result.total, 1);
        assert_eq!(result.succeeded, 1);
        assert_eq!(scheduler.host().drops.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.host().commands.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_busy_host() {
        let host = CountingHost {
            busy_polls: AtomicUsize::new(2),
            ..CountingHost::default()
        };
        let scheduler = Scheduler::new(config(false), host);
        let result = scheduler.run().await.unwrap();
        assert_eq!(result.polls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_cache_clearing() {
        let mut config = config(false);
        config.host.clear_caches = false;
        let scheduler = Scheduler::new(config, CountingHost::default());
        scheduler.run().await.unwrap();
        assert_eq!(scheduler.host().drops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let scheduler =
            Scheduler::new(config(false), CountingHost::default()).with_cancellation(cancel);

        let err = scheduler.run().await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Wait {
                source: WaitError::Cancelled,
                ..
            }
        ));
        assert!(scheduler.host().commands.lock().unwrap().is_empty());
    }
}
