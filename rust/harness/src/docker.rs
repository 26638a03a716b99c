//! Host operations: container engine queries, shell launches and page cache drops.
//!
//! Uses the docker CLI rather than the engine API, so the launcher works
//! anywhere the user can already run `docker`.

use std::{future::Future, process::Stdio};

use tokio::process::Command;

const DROP_CACHES_PATH: &str = "/proc/sys/vm/drop_caches";

/// Everything the launcher needs from the machine it runs on.
pub trait Host {
    /// Whether the container engine reports any running container.
    fn containers_running(&self) -> impl Future<Output = Result<bool, HostError>> + Send;

    /// Run `command` through `sh -c` and wait for it. Returns the exit code,
    /// `None` when the shell was killed by a signal.
    fn run_shell(
        &self,
        command: &str,
    ) -> impl Future<Output = Result<Option<i32>, HostError>> + Send;

    /// Drop the OS page cache so the next run starts cold.
    fn drop_page_cache(&self) -> impl Future<Output = Result<(), HostError>> + Send;
}

/// The local docker engine.
#[derive(Debug, Clone)]
pub struct DockerHost {
    docker_binary: String,
}

impl DockerHost {
    #[must_use]
    pub fn new(docker_binary: impl Into<String>) -> Self {
        Self {
            docker_binary: docker_binary.into(),
        }
    }

    /// Check that the CLI can reach the engine. Returns the server version.
    pub async fn check_available(&self) -> Result<String, HostError> {
        let output = Command::new(&self.docker_binary)
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| HostError::Spawn(self.docker_binary.clone(), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HostError::Engine(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for DockerHost {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl Host for DockerHost {
    async fn containers_running(&self) -> Result<bool, HostError> {
        let output = Command::new(&self.docker_binary)
            .args(["ps", "-q"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| HostError::Spawn(self.docker_binary.clone(), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HostError::Engine(stderr.trim().to_string()));
        }

        let running = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count();
        tracing::debug!("{running} containers running");
        Ok(running > 0)
    }

    async fn run_shell(&self, command: &str) -> Result<Option<i32>, HostError> {
        tracing::debug!("sh -c {command}");
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .status()
            .await
            .map_err(|e| HostError::Spawn("sh".to_string(), e))?;
        Ok(status.code())
    }

    async fn drop_page_cache(&self) -> Result<(), HostError> {
        // SAFETY: sync(2) takes no arguments and always succeeds
        unsafe { libc::sync() };

        // SAFETY: geteuid(2) takes no arguments and always succeeds
        let is_root = unsafe { libc::geteuid() } == 0;

        if is_root {
            return tokio::fs::write(DROP_CACHES_PATH, b"3")
                .await
                .map_err(|e| HostError::DropCaches(e.to_string()));
        }

        let status = Command::new("sudo")
            .args(["sh", "-c", "echo 3 > /proc/sys/vm/drop_caches"])
            .status()
            .await
            .map_err(|e| HostError::Spawn("sudo".to_string(), e))?;

        if status.success() {
            Ok(())
        } else {
            Err(HostError::DropCaches(format!(
                "sudo exited with {:?}",
                status.code()
            )))
        }
    }
}

/// Errors from host operations.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("failed to run {0}: {1}")]
    Spawn(String, std::io::Error),
    #[error("container engine error: {0}")]
    Engine(String),
    #[error("failed to drop page cache: {0}")]
    DropCaches(String),
}
