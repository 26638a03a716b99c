//! Process and device context derived from the launch environment.

use std::{collections::HashMap, fmt, process::Command};

use serde::{Deserialize, Serialize};

/// Environment variable set by the distributed launcher for each local worker.
pub const LOCAL_RANK_VAR: &str = "LOCAL_RANK";
/// Accelerator visibility mask honored by both frameworks.
pub const VISIBLE_DEVICES_VAR: &str = "CUDA_VISIBLE_DEVICES";

/// Source of environment variables.
///
/// Lets the context be computed from something other than the live process
/// environment, e.g. a worker's planned environment or a test fixture.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// The current process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Compute device a worker is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda(usize),
}

impl Device {
    #[must_use]
    pub fn is_accelerator(self) -> bool {
        matches!(self, Self::Cuda(_))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(index) => write!(f, "cuda:{index}"),
        }
    }
}

/// Whether this process is one worker of a distributed job, and where it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceContext {
    pub distributed: bool,
    pub local_rank: usize,
    /// Index into the visible devices, not a physical id.
    pub device: Device,
    pub visible_gpus: usize,
    /// Visibility mask entry `device` resolves to, when a mask is set.
    pub mask_entry: Option<String>,
}

impl DeviceContext {
    /// Build the context from the live environment, probing for accelerators
    /// when the visibility mask is unset.
    pub fn from_env() -> Result<Self, DeviceError> {
        let env = ProcessEnv;
        let visible_gpus = visible_gpus_from(&env).unwrap_or_else(probe_gpu_count);
        Self::from_source(&env, visible_gpus)
    }

    /// Build the context from `env` with a known accelerator count.
    pub fn from_source(env: &impl EnvSource, visible_gpus: usize) -> Result<Self, DeviceError> {
        let (distributed, local_rank) = match env.var(LOCAL_RANK_VAR) {
            Some(raw) => {
                let rank = raw
                    .trim()
                    .parse()
                    .map_err(|_| DeviceError::InvalidRank(raw.clone()))?;
                (true, rank)
            }
            None => (false, 0),
        };

        if visible_gpus > 0 && local_rank >= visible_gpus {
            return Err(DeviceError::RankOutOfRange {
                rank: local_rank,
                visible: visible_gpus,
            });
        }

        let (device, mask_entry) = if visible_gpus > 0 {
            let entry = mask_entries(env).and_then(|ids| ids.into_iter().nth(local_rank));
            (Device::Cuda(local_rank), entry)
        } else {
            (Device::Cpu, None)
        };

        Ok(Self {
            distributed,
            local_rank,
            device,
            visible_gpus,
            mask_entry,
        })
    }

    /// Value a worker's visibility mask must be narrowed to so that only
    /// the bound device is left. Uses the original mask entry when there is one.
    #[must_use]
    pub fn pinned_mask(&self) -> Option<String> {
        match self.device {
            Device::Cuda(index) => Some(
                self.mask_entry
                    .clone()
                    .unwrap_or_else(|| index.to_string()),
            ),
            Device::Cpu => None,
        }
    }

    /// Rank 0, or any process that is not part of a distributed job.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.local_rank == 0
    }
}

/// Count of accelerators named by the visibility mask, if the mask is set.
#[must_use]
pub fn visible_gpus_from(env: &impl EnvSource) -> Option<usize> {
    mask_entries(env).map(|ids| ids.len())
}

/// Device ids (or UUIDs) listed in the visibility mask, in order.
fn mask_entries(env: &impl EnvSource) -> Option<Vec<String>> {
    let mask = env.var(VISIBLE_DEVICES_VAR)?;
    let mask = mask.trim();
    if mask.is_empty() || mask == "-1" || mask == "NoDevFiles" {
        return Some(Vec::new());
    }
    Some(
        mask.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

/// Ask the driver how many GPUs exist. Zero when the tool is missing or fails.
#[must_use]
pub fn probe_gpu_count() -> usize {
    match Command::new("nvidia-smi").arg("--list-gpus").output() {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| line.starts_with("GPU "))
            .count(),
        Ok(_) | Err(_) => {
            tracing::debug!("nvidia-smi unavailable, assuming no accelerators");
            0
        }
    }
}

/// Errors while deriving the device context.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("LOCAL_RANK must be a non-negative integer, got '{0}'")]
    InvalidRank(String),
    #[error("LOCAL_RANK {rank} has no device, only {visible} visible")]
    RankOutOfRange { rank: usize, visible: usize },
}
