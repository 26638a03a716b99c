//! Collective communication group membership.
//!
//! Workers of a distributed job rendezvous through environment variables set
//! by the launcher (`MASTER_ADDR`, `MASTER_PORT`, `WORLD_SIZE`, `RANK`). The
//! collective library itself is external; joining here validates the
//! rendezvous and records the membership the library will be initialized with.

use std::{fmt, net::ToSocketAddrs};

use serde::{Deserialize, Serialize};

use crate::device::{DeviceContext, EnvSource};

/// Collective communication backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectiveBackend {
    /// GPU collectives. Requires an accelerator device.
    Nccl,
    /// CPU collectives.
    Gloo,
}

impl CollectiveBackend {
    #[must_use]
    pub fn requires_accelerator(self) -> bool {
        matches!(self, Self::Nccl)
    }
}

impl fmt::Display for CollectiveBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nccl => write!(f, "nccl"),
            Self::Gloo => write!(f, "gloo"),
        }
    }
}

/// Result of joining a process group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    pub backend: CollectiveBackend,
    pub rank: usize,
    pub world_size: usize,
    pub master_addr: String,
    pub master_port: u16,
}

/// A collective communication group a worker can join.
pub trait ProcessGroup {
    fn join(
        &mut self,
        backend: CollectiveBackend,
        ctx: &DeviceContext,
    ) -> Result<GroupMembership, CollectiveError>;
}

/// env:// rendezvous.
pub struct EnvRendezvous<E> {
    env: E,
    joined: Option<GroupMembership>,
}

impl<E: EnvSource> EnvRendezvous<E> {
    #[must_use]
    pub fn new(env: E) -> Self {
        Self { env, joined: None }
    }

    /// Membership recorded by a successful join.
    #[must_use]
    pub fn membership(&self) -> Option<&GroupMembership> {
        self.joined.as_ref()
    }

    fn required(&self, key: &'static str) -> Result<String, CollectiveError> {
        self.env
            .var(key)
            .filter(|v| !v.trim().is_empty())
            .ok_or(CollectiveError::MissingVar(key))
    }

    fn number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, CollectiveError> {
        raw.trim().parse().map_err(|_| CollectiveError::InvalidVar {
            key,
            value: raw.to_string(),
        })
    }
}

impl<E: EnvSource> ProcessGroup for EnvRendezvous<E> {
    fn join(
        &mut self,
        backend: CollectiveBackend,
        ctx: &DeviceContext,
    ) -> Result<GroupMembership, CollectiveError> {
        if self.joined.is_some() {
            return Err(CollectiveError::AlreadyJoined);
        }

        if backend.requires_accelerator() && !ctx.device.is_accelerator() {
            return Err(CollectiveError::NoAccelerator(backend));
        }

        let master_addr = self.required("MASTER_ADDR")?;
        let master_port: u16 = Self::number("MASTER_PORT", &self.required("MASTER_PORT")?)?;
        let world_size: usize = Self::number("WORLD_SIZE", &self.required("WORLD_SIZE")?)?;
        let rank: usize = match self.env.var("RANK") {
            Some(raw) => Self::number("RANK", &raw)?,
            None => ctx.local_rank,
        };

        if world_size == 0 || rank >= world_size {
            return Err(CollectiveError::RankOutOfRange { rank, world_size });
        }

        let resolvable = (master_addr.as_str(), master_port)
            .to_socket_addrs()
            .map(|mut addrs| addrs.next().is_some())
            .unwrap_or(false);
        if !resolvable {
            return Err(CollectiveError::Unresolvable(master_addr, master_port));
        }

        let membership = GroupMembership {
            backend,
            rank,
            world_size,
            master_addr,
            master_port,
        };
        tracing::debug!(
            "joined {} group as rank {}/{} via {}:{}",
            membership.backend,
            membership.rank,
            membership.world_size,
            membership.master_addr,
            membership.master_port
        );
        self.joined = Some(membership.clone());
        Ok(membership)
    }
}

/// Errors that can occur when joining a process group.
#[derive(Debug, thiserror::Error)]
pub enum CollectiveError {
    #[error("{0} backend requested but no accelerator is visible")]
    NoAccelerator(CollectiveBackend),
    #[error("rendezvous variable {0} is not set")]
    MissingVar(&'static str),
    #[error("rendezvous variable {key} has invalid value '{value}'")]
    InvalidVar { key: &'static str, value: String },
    #[error("rank {rank} is outside world size {world_size}")]
    RankOutOfRange { rank: usize, world_size: usize },
    #[error("master address {0}:{1} does not resolve")]
    Unresolvable(String, u16),
    #[error("process group already initialized")]
    AlreadyJoined,
}
