#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::too_many_lines
)]

//! AlgoPerf Launcher
//!
//! Runs benchmark workloads one container at a time: waits for the host to
//! go idle, drops the page cache, launches the next workload and records
//! the outcome.

pub mod config;
pub mod docker;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod wait;

pub use config::{HostSettings, LauncherConfig, RunOptions};
pub use docker::{DockerHost, Host};
pub use runner::{DockerRunCommand, LaunchOutcome, Runner};
pub use scheduler::{Scheduler, SchedulerResult};
pub use wait::Poller;
