#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::doc_markdown,
    clippy::module_name_repetitions,
    //
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
)]

//! AlgoPerf Core
//!
//! This crate provides the worker-side setup shared by every submission:
//! - `DeviceContext` - distributed mode, local rank and device from the environment
//! - `bootstrap::init` - framework settings, rank logger and process group join
//! - `ProcessGroup` trait - collective group membership (`EnvRendezvous` for env://)
//! - `Module` trait - dropout patching over a model's module tree

pub mod bootstrap;
pub mod collective;
pub mod device;
pub mod dropout;
pub mod logging;
pub mod profiler;

pub use bootstrap::{BootstrapError, Bootstrapped, FrameworkSettings};
pub use collective::{CollectiveBackend, EnvRendezvous, GroupMembership, ProcessGroup};
pub use device::{Device, DeviceContext, EnvSource, ProcessEnv};
pub use dropout::{Module, maybe_update_dropout, update_attention_dropout};
pub use logging::RankLogger;
pub use profiler::Profiler;
