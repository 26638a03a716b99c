//! Rank-aware logging.
//!
//! In a distributed job every worker runs the same code, so informational
//! output is only kept on the primary rank. Warnings and errors always pass.

use std::fmt;

use tracing_subscriber::filter::LevelFilter;

use crate::device::DeviceContext;

/// Logger handed to worker code in place of the global `info` sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankLogger {
    /// Emits everything.
    Active,
    /// Informational messages are dropped.
    Silent,
}

impl RankLogger {
    /// `Silent` for non-primary ranks of a distributed job, `Active` otherwise.
    #[must_use]
    pub fn for_context(ctx: &DeviceContext) -> Self {
        if ctx.distributed && !ctx.is_primary() {
            Self::Silent
        } else {
            Self::Active
        }
    }

    #[must_use]
    pub fn info_enabled(self) -> bool {
        self == Self::Active
    }

    pub fn info(self, args: fmt::Arguments<'_>) {
        if self.info_enabled() {
            tracing::info!("{args}");
        }
    }

    pub fn warn(self, args: fmt::Arguments<'_>) {
        tracing::warn!("{args}");
    }

    pub fn error(self, args: fmt::Arguments<'_>) {
        tracing::error!("{args}");
    }

    /// Maximum level a subscriber installed by this worker should record.
    #[must_use]
    pub fn level_filter(self) -> LevelFilter {
        match self {
            Self::Active => LevelFilter::INFO,
            Self::Silent => LevelFilter::WARN,
        }
    }
}

/// Level filter for a worker's subscriber, following [`RankLogger::for_context`].
#[must_use]
pub fn rank_filter(ctx: &DeviceContext) -> LevelFilter {
    RankLogger::for_context(ctx).level_filter()
}
