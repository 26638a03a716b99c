//! Framework bootstrap for training workers.
//!
//! Two frameworks share each host: the primary one owns the accelerator, the
//! secondary one (used for input pipelines and reference code) is pinned to CPU
//! and must not preallocate accelerator memory. Settings are collected into a
//! [`FrameworkSettings`] value and applied to the worker process environment
//! instead of being mutated globally.

use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::{
    collective::{
        CollectiveBackend, CollectiveError, EnvRendezvous, GroupMembership, ProcessGroup,
    },
    device::{Device, DeviceContext, ProcessEnv},
    logging::RankLogger,
    profiler::Profiler,
};

/// Backend used for the collective group. Fixed, workers always join over NCCL.
pub const COLLECTIVE_BACKEND: CollectiveBackend = CollectiveBackend::Nccl;

/// Process settings both frameworks read at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkSettings {
    /// Whether the secondary framework may grab accelerator memory up front.
    pub secondary_preallocate: bool,
    /// Platforms the secondary framework may use.
    pub secondary_platforms: String,
    /// Benchmark convolution algorithms and keep the fastest.
    pub conv_autotune: bool,
    /// Input pipeline intra-op thread limit.
    pub pipeline_intra_op_threads: Option<usize>,
    /// Input pipeline inter-op thread limit.
    pub pipeline_inter_op_threads: Option<usize>,
    /// Device the worker is bound to.
    pub device: Option<Device>,
    /// Visibility mask that leaves only `device` to the worker.
    pub visible_devices: Option<String>,
}

impl Default for FrameworkSettings {
    fn default() -> Self {
        Self {
            secondary_preallocate: true,
            secondary_platforms: String::new(),
            conv_autotune: false,
            pipeline_intra_op_threads: None,
            pipeline_inter_op_threads: None,
            device: None,
            visible_devices: None,
        }
    }
}

impl FrameworkSettings {
    /// Render the settings as environment variables, in a stable order.
    #[must_use]
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![(
            "XLA_PYTHON_CLIENT_PREALLOCATE",
            self.secondary_preallocate.to_string(),
        )];
        if !self.secondary_platforms.is_empty() {
            vars.push(("JAX_PLATFORMS", self.secondary_platforms.clone()));
        }
        if self.conv_autotune {
            vars.push(("TF_CUDNN_USE_AUTOTUNE", "1".to_string()));
            vars.push(("CUDNN_BENCHMARK", "1".to_string()));
        }
        if let Some(threads) = self.pipeline_intra_op_threads {
            vars.push(("TF_NUM_INTRAOP_THREADS", threads.to_string()));
        }
        if let Some(threads) = self.pipeline_inter_op_threads {
            vars.push(("TF_NUM_INTEROP_THREADS", threads.to_string()));
        }
        if let Some(ref mask) = self.visible_devices {
            vars.push(("CUDA_VISIBLE_DEVICES", mask.clone()));
        }
        vars
    }

    /// Apply the settings to a worker command before it is spawned.
    pub fn apply<'a>(&self, cmd: &'a mut Command) -> &'a mut Command {
        cmd.envs(self.env_vars())
    }
}

/// Everything a worker needs after bootstrap.
#[derive(Debug, Clone)]
pub struct Bootstrapped {
    pub context: DeviceContext,
    pub settings: FrameworkSettings,
    pub logger: RankLogger,
    /// Present only for distributed workers.
    pub membership: Option<GroupMembership>,
}

/// Configure a worker for `ctx`, joining `group` when distributed.
///
/// Group join failures are returned as-is; callers are expected to abort.
pub fn init(
    ctx: &DeviceContext,
    group: &mut impl ProcessGroup,
    profiler: &mut Profiler,
) -> Result<Bootstrapped, BootstrapError> {
    let mut settings = FrameworkSettings {
        secondary_preallocate: false,
        secondary_platforms: "cpu".to_string(),
        conv_autotune: true,
        ..FrameworkSettings::default()
    };

    if !ctx.distributed {
        return Ok(Bootstrapped {
            context: ctx.clone(),
            settings,
            logger: RankLogger::Active,
            membership: None,
        });
    }

    if !ctx.is_primary() {
        // one input pipeline thread per worker, otherwise ranks oversubscribe the host
        settings.pipeline_intra_op_threads = Some(1);
        settings.pipeline_inter_op_threads = Some(1);
    }

    settings.device = Some(ctx.device);
    settings.visible_devices = ctx.pinned_mask();
    profiler.set_local_rank(ctx.local_rank);
    let logger = RankLogger::for_context(ctx);

    let membership = group.join(COLLECTIVE_BACKEND, ctx)?;
    logger.info(format_args!(
        "rank {} bound to {} ({} visible accelerators)",
        membership.rank, ctx.device, ctx.visible_gpus
    ));

    Ok(Bootstrapped {
        context: ctx.clone(),
        settings,
        logger,
        membership: Some(membership),
    })
}

/// Bootstrap the current process from its environment, using the env:// rendezvous.
pub fn init_from_env(profiler: &mut Profiler) -> Result<Bootstrapped, BootstrapError> {
    let ctx = DeviceContext::from_env()?;
    let mut group = EnvRendezvous::new(ProcessEnv);
    init(&ctx, &mut group, profiler)
}

/// Errors that can occur during bootstrap.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("device setup failed: {0}")]
    Device(#[from] crate::device::DeviceError),
    #[error("process group init failed: {0}")]
    Collective(#[from] CollectiveError),
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records joins instead of talking to a rendezvous.
    #[derive(Default)]
    struct RecordingGroup {
        joins: Vec<(CollectiveBackend, usize)>,
        fail: bool,
    }

    impl ProcessGroup for RecordingGroup {
        fn join(
            &mut self,
            backend: CollectiveBackend,
            ctx: &DeviceContext,
        ) -> Result<GroupMembership, CollectiveError> {
            if self.fail {
                return Err(CollectiveError::MissingVar("MASTER_ADDR"));
            }
            self.joins.push((backend, ctx.local_rank));
            Ok(GroupMembership {
                backend,
                rank: ctx.local_rank,
                world_size: 2,
                master_addr: "127.0.0.1".to_string(),
                master_port: 29500,
            })
        }
    }

    fn ctx(distributed: bool, rank: usize) -> DeviceContext {
        DeviceContext {
            distributed,
            local_rank: rank,
            device: Device::Cuda(rank),
            visible_gpus: 2,
            mask_entry: None,
        }
    }

    #[test]
    fn test_single_process_skips_group() {
        let mut group = RecordingGroup::default();
        let mut profiler = Profiler::new();
        let out = init(&ctx(false, 0), &mut group, &mut profiler).unwrap();

        assert!(group.joins.is_empty());
        assert!(out.membership.is_none());
        assert_eq!(out.logger, RankLogger::Active);
        assert_eq!(out.settings.device, None);
        assert_eq!(profiler.local_rank(), None);
        assert!(!out.settings.secondary_preallocate);
        assert_eq!(out.settings.secondary_platforms, "cpu");
        assert!(out.settings.conv_autotune);
    }

    #[test]
    fn test_primary_rank_joins_and_keeps_logging() {
        let mut group = RecordingGroup::default();
        let mut profiler = Profiler::new();
        let out = init(&ctx(true, 0), &mut group, &mut profiler).unwrap();

        assert_eq!(group.joins, vec![(CollectiveBackend::Nccl, 0)]);
        assert_eq!(out.logger, RankLogger::Active);
        assert_eq!(out.settings.pipeline_intra_op_threads, None);
        assert_eq!(out.settings.device, Some(Device::Cuda(0)));
        assert_eq!(profiler.local_rank(), Some(0));
    }

    #[test]
    fn test_secondary_rank_is_silenced_and_throttled() {
        let mut group = RecordingGroup::default();
        let mut profiler = Profiler::new();
        let out = init(&ctx(true, 1), &mut group, &mut profiler).unwrap();

        assert_eq!(out.logger, RankLogger::Silent);
        assert!(!out.logger.info_enabled());
        assert_eq!(out.settings.pipeline_intra_op_threads, Some(1));
        assert_eq!(out.settings.pipeline_inter_op_threads, Some(1));
        assert_eq!(out.membership.unwrap().rank, 1);
    }

    #[test]
    fn test_join_failure_propagates() {
        let mut group = RecordingGroup {
            fail: true,
            ..Default::default()
        };
        let err = init(&ctx(true, 0), &mut group, &mut Profiler::new()).unwrap_err();
        assert!(matches!(err, BootstrapError::Collective(_)));
    }

    #[test]
    fn test_env_vars() {
        let mut group = RecordingGroup::default();
        let out = init(&ctx(true, 1), &mut group, &mut Profiler::new()).unwrap();
        let vars = out.settings.env_vars();

        assert!(vars.contains(&("XLA_PYTHON_CLIENT_PREALLOCATE", "false".to_string())));
        assert!(vars.contains(&("JAX_PLATFORMS", "cpu".to_string())));
        assert!(vars.contains(&("TF_NUM_INTRAOP_THREADS", "1".to_string())));
        assert!(vars.contains(&("CUDA_VISIBLE_DEVICES", "1".to_string())));
    }

    #[test]
    fn test_worker_mask_keeps_physical_id() {
        let env: std::collections::HashMap<String, String> = [
            ("LOCAL_RANK", "1"),
            ("CUDA_VISIBLE_DEVICES", "4,5"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let ctx = DeviceContext::from_source(&env, 2).unwrap();

        let mut group = RecordingGroup::default();
        let out = init(&ctx, &mut group, &mut Profiler::new()).unwrap();

        assert_eq!(out.settings.device, Some(Device::Cuda(1)));
        assert_eq!(out.settings.visible_devices.as_deref(), Some("5"));
        assert!(out.settings.env_vars().contains(&("CUDA_VISIBLE_DEVICES", "5".to_string())));
    }

    #[test]
    fn test_apply_sets_command_env() {
        let settings = FrameworkSettings {
            secondary_preallocate: false,
            ..FrameworkSettings::default()
        };
        let mut cmd = Command::new("true");
        settings.apply(&mut cmd);
        let envs: Vec<_> = cmd.get_envs().collect();
        assert!(envs.contains(&(
            std::ffi::OsStr::new("XLA_PYTHON_CLIENT_PREALLOCATE"),
            Some(std::ffi::OsStr::new("false"))
        )));
    }
}
