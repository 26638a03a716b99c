//! Framework and dataset enums plus the validated run percentage.

use serde::{Deserialize, Serialize};

/// Training framework a submission is written for.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Jax,
    #[cfg_attr(feature = "clap", value(alias = "torch"))]
    Pytorch,
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Jax => write!(f, "jax"),
            Self::Pytorch => write!(f, "pytorch"),
        }
    }
}

impl std::str::FromStr for Framework {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jax" => Ok(Self::Jax),
            "pytorch" | "torch" => Ok(Self::Pytorch),
            _ => Err(format!("unknown framework '{s}'. Use: jax, pytorch")),
        }
    }
}

/// Dataset a workload trains on. Mounted under `/data/<dataset>` in the container.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    Imagenet,
    Fastmri,
    Ogbg,
    Wmt,
    Librispeech,
    Criteo1tb,
}

impl Dataset {
    pub const ALL: [Self; 6] = [
        Self::Imagenet,
        Self::Fastmri,
        Self::Ogbg,
        Self::Wmt,
        Self::Librispeech,
        Self::Criteo1tb,
    ];
}

impl std::fmt::Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Imagenet => write!(f, "imagenet"),
            Self::Fastmri => write!(f, "fastmri"),
            Self::Ogbg => write!(f, "ogbg"),
            Self::Wmt => write!(f, "wmt"),
            Self::Librispeech => write!(f, "librispeech"),
            Self::Criteo1tb => write!(f, "criteo1tb"),
        }
    }
}

impl std::str::FromStr for Dataset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.to_string() == s.to_lowercase())
            .ok_or_else(|| {
                format!(
                    "unknown dataset '{s}'. Use: imagenet, fastmri, ogbg, wmt, librispeech, criteo1tb"
                )
            })
    }
}

/// Percentage of a workload's step budget to run for, always within `0..=100`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct RunPercentage(u8);

impl RunPercentage {
    pub const FULL: Self = Self(100);

    /// Create a percentage, rejecting values above 100.
    pub fn new(value: u8) -> Result<Self, String> {
        if value > 100 {
            return Err(format!("run percentage must be within 0..=100, got {value}"));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }

    /// Scale a step count: `floor(steps * percentage / 100)`.
    #[must_use]
    pub fn scale(self, steps: u64) -> u64 {
        // widen so large step counts cannot overflow the multiplication
        let scaled = u128::from(steps) * u128::from(self.0) / 100;
        scaled as u64
    }
}

impl Default for RunPercentage {
    fn default() -> Self {
        Self::FULL
    }
}

impl TryFrom<u8> for RunPercentage {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RunPercentage> for u8 {
    fn from(value: RunPercentage) -> Self {
        value.0
    }
}

impl std::fmt::Display for RunPercentage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.0)
    }
}

impl std::str::FromStr for RunPercentage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches('%');
        let value: u8 = trimmed
            .parse()
            .map_err(|_| format!("invalid run percentage '{s}', expected an integer in 0..=100"))?;
        Self::new(value)
    }
}
