//! Benchmark workload table.

use serde::{Deserialize, Serialize};

use crate::{Dataset, RunPercentage};

/// A benchmark workload: what to train, on which dataset, for how many steps at most.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WorkloadSpec {
    pub name: String,
    pub max_steps: u64,
    pub dataset: Dataset,
}

impl WorkloadSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, max_steps: u64, dataset: Dataset) -> Self {
        Self {
            name: name.into(),
            max_steps,
            dataset,
        }
    }

    /// Step budget after scaling `max_steps` by the run percentage.
    #[must_use]
    pub fn step_budget(&self, percentage: RunPercentage) -> u64 {
        percentage.scale(self.max_steps)
    }
}

const BUILTIN: [(&str, u64, Dataset); 8] = [
    ("imagenet_resnet", 186_666, Dataset::Imagenet),
    ("imagenet_vit", 186_666, Dataset::Imagenet),
    ("fastmri", 36_189, Dataset::Fastmri),
    ("ogbg", 80_000, Dataset::Ogbg),
    ("wmt", 133_333, Dataset::Wmt),
    ("librispeech_deepspeech", 48_000, Dataset::Librispeech),
    ("criteo1tb", 10_666, Dataset::Criteo1tb),
    ("librispeech_conformer", 80_000, Dataset::Librispeech),
];

/// The fixed workload table, in launch order.
#[must_use]
pub fn builtin_workloads() -> Vec<WorkloadSpec> {
    BUILTIN
        .iter()
        .map(|&(name, max_steps, dataset)| WorkloadSpec::new(name, max_steps, dataset))
        .collect()
}

/// Look up a built-in workload by name.
#[must_use]
pub fn find_builtin(name: &str) -> Option<WorkloadSpec> {
    BUILTIN
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|&(name, max_steps, dataset)| WorkloadSpec::new(name, max_steps, dataset))
}
