//! Configuration for the launcher: per-invocation run options plus an
//! optional TOML file with host settings and a workload table override.

use std::{collections::HashSet, path::Path, time::Duration};

use algoperf_config::{Framework, RunPercentage, WorkloadSpec, builtin_workloads};
use serde::{Deserialize, Serialize};

pub const DEFAULT_DOCKER_IMAGE_URL: &str = "us-central1-docker.pkg.dev/training-algorithms-external/mlcommons-docker-repo/algoperf_jax_dev";
pub const DEFAULT_SUBMISSION_PATH: &str =
    "prize_qualification_baselines/external_tuning/jax_nadamw_full_budget.py";
pub const DEFAULT_TUNING_SEARCH_SPACE: &str =
    "prize_qualification_baselines/external_tuning/tuning_search_space.json";
pub const DEFAULT_EXPERIMENT_BASENAME: &str = "my_experiment";

/// Options for one launcher invocation. Immutable once the loop starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub framework: Framework,
    /// Algorithm name, used as the experiment subdirectory.
    pub algorithm: String,
    pub docker_image_url: String,
    pub tag: Option<String>,
    pub run_percentage: RunPercentage,
    /// Top directory for results under the experiment dir.
    pub experiment_basename: String,
    /// Have the container rsync its dataset from the bucket.
    pub rsync_data: bool,
    /// Mount the local checkout of the benchmark repo into the container.
    pub local: bool,
    pub submission_path: String,
    pub tuning_search_space: String,
    /// Print commands instead of running them.
    pub dry_run: bool,
}

impl RunOptions {
    /// Options with every optional field at its default.
    #[must_use]
    pub fn new(framework: Framework, algorithm: impl Into<String>) -> Self {
        Self {
            framework,
            algorithm: algorithm.into(),
            docker_image_url: DEFAULT_DOCKER_IMAGE_URL.to_string(),
            tag: None,
            run_percentage: RunPercentage::FULL,
            experiment_basename: DEFAULT_EXPERIMENT_BASENAME.to_string(),
            rsync_data: true,
            local: false,
            submission_path: DEFAULT_SUBMISSION_PATH.to_string(),
            tuning_search_space: DEFAULT_TUNING_SEARCH_SPACE.to_string(),
            dry_run: false,
        }
    }

    /// Image reference with the tag appended when one is set.
    #[must_use]
    pub fn image_ref(&self) -> String {
        match self.tag {
            Some(ref tag) => format!("{}:{tag}", self.docker_image_url),
            None => self.docker_image_url.clone(),
        }
    }

    /// `<experiment_basename>/<algorithm>`.
    #[must_use]
    pub fn experiment_name(&self) -> String {
        format!("{}/{}", self.experiment_basename, self.algorithm)
    }

    /// Check fields the CLI cannot enforce on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.algorithm.trim().is_empty() {
            return Err(ConfigError::Missing("algorithm"));
        }
        if self.experiment_basename.trim().is_empty() {
            return Err(ConfigError::Missing("experiment_basename"));
        }
        if self.docker_image_url.trim().is_empty() {
            return Err(ConfigError::Missing("docker_image_url"));
        }
        Ok(())
    }
}

/// Host-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostSettings {
    /// Seconds between "is any container running" polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Give up waiting for running containers after this many seconds.
    #[serde(default)]
    pub wait_timeout_secs: Option<u64>,
    /// Drop the OS page cache before and after every workload.
    #[serde(default = "default_true")]
    pub clear_caches: bool,
    /// Container engine CLI.
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,
    /// Volume mount sources on the host.
    #[serde(default)]
    pub mounts: MountSettings,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            wait_timeout_secs: None,
            clear_caches: true,
            docker_binary: default_docker_binary(),
            mounts: MountSettings::default(),
        }
    }
}

impl HostSettings {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    #[must_use]
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_secs.map(Duration::from_secs)
    }
}

/// Host paths mounted into each container. Expanded by the shell, so `$HOME` works.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountSettings {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_experiment_dir")]
    pub experiment_dir: String,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,
    /// Only mounted with `--local`.
    #[serde(default = "default_repo_dir")]
    pub repo_dir: String,
}

impl Default for MountSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            experiment_dir: default_experiment_dir(),
            logs_dir: default_logs_dir(),
            repo_dir: default_repo_dir(),
        }
    }
}

fn default_poll_interval() -> u64 {
    5 * 60
}

fn default_true() -> bool {
    true
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_data_dir() -> String {
    "$HOME/data/".to_string()
}

fn default_experiment_dir() -> String {
    "$HOME/experiment_runs/".to_string()
}

fn default_logs_dir() -> String {
    "$HOME/experiment_runs/logs".to_string()
}

fn default_repo_dir() -> String {
    "$HOME/algorithmic-efficiency".to_string()
}

/// Contents of a launcher TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LauncherFile {
    #[serde(default)]
    pub host: HostSettings,
    /// Replaces the built-in table when present.
    #[serde(default)]
    pub workloads: Option<Vec<WorkloadSpec>>,
}

impl LauncherFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// The workload table this file selects, falling back to the built-in one.
    pub fn workloads(&self) -> Result<Vec<WorkloadSpec>, ConfigError> {
        let Some(ref workloads) = self.workloads else {
            return Ok(builtin_workloads());
        };

        if workloads.is_empty() {
            return Err(ConfigError::EmptyWorkloads);
        }

        let mut seen = HashSet::new();
        for workload in workloads {
            if !seen.insert(workload.name.as_str()) {
                return Err(ConfigError::DuplicateWorkload(workload.name.clone()));
            }
        }

        Ok(workloads.clone())
    }
}

/// Everything the launcher loop needs.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub run: RunOptions,
    pub host: HostSettings,
    /// Workloads in launch order.
    pub workloads: Vec<WorkloadSpec>,
}

impl LauncherConfig {
    /// Default host settings and the built-in workload table.
    #[must_use]
    pub fn new(run: RunOptions) -> Self {
        Self {
            run,
            host: HostSettings::default(),
            workloads: builtin_workloads(),
        }
    }

    /// Combine run options with an optional config file.
    pub fn load(run: RunOptions, path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => LauncherFile::load(path)?,
            None => LauncherFile::default(),
        };
        Self::from_file(run, &file)
    }

    pub fn from_file(run: RunOptions, file: &LauncherFile) -> Result<Self, ConfigError> {
        run.validate()?;
        let config = Self {
            run,
            host: file.host.clone(),
            workloads: file.workloads()?,
        };
        config.validate_host()?;
        Ok(config)
    }

    /// Keep only the named workloads, preserving table order.
    pub fn select_workloads(&mut self, names: &[String]) -> Result<(), ConfigError> {
        if names.is_empty() {
            return Ok(());
        }

        if let Some(unknown) = names
            .iter()
            .find(|name| !self.workloads.iter().any(|w| &w.name == *name))
        {
            return Err(ConfigError::UnknownWorkload(unknown.clone()));
        }

        self.workloads.retain(|w| names.contains(&w.name));
        Ok(())
    }

    pub fn validate_host(&self) -> Result<(), ConfigError> {
        if self.host.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "host.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.host.docker_binary.trim().is_empty() {
            return Err(ConfigError::Missing("host.docker_binary"));
        }
        Ok(())
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("required setting '{0}' is missing")]
    Missing(&'static str),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("unknown workload '{0}'")]
    UnknownWorkload(String),
    #[error("workload '{0}' is defined more than once")]
    DuplicateWorkload(String),
    #[error("workload table is empty")]
    EmptyWorkloads,
}
