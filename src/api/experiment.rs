//! The `FinetuneExperiment` parent resource.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::job::{FinetuneJobSpec, FinetuneJobStatus};
use super::meta::{ObjectMeta, Resource};
use super::{API_VERSION, FinetuneState};

/// One entry of `spec.finetuneJobs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinetuneJobSetting {
    /// Explicit child name. When absent a deterministic default is derived
    /// from the experiment name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub spec: FinetuneJobSpec,
}

impl FinetuneJobSetting {
    pub fn named(name: &str, spec: FinetuneJobSpec) -> Self {
        Self {
            name: Some(name.to_string()),
            spec,
        }
    }

    pub fn unnamed(spec: FinetuneJobSpec) -> Self {
        Self { name: None, spec }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinetuneExperimentSpec {
    /// Holds the experiment before any child is created.
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub finetune_jobs: Vec<FinetuneJobSetting>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinetuneExperimentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<FinetuneState>,
    /// Latest observed status of each child, keyed by job name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub jobs_status: BTreeMap<String, FinetuneJobStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinetuneExperiment {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: FinetuneExperimentSpec,
    #[serde(default)]
    pub status: FinetuneExperimentStatus,
}

impl FinetuneExperiment {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: FinetuneExperimentSpec::default(),
            status: FinetuneExperimentStatus::default(),
        }
    }

    pub fn with_jobs(mut self, jobs: Vec<FinetuneJobSetting>) -> Self {
        self.spec.finetune_jobs = jobs;
        self
    }

    pub fn with_pending(mut self, pending: bool) -> Self {
        self.spec.pending = pending;
        self
    }
}

impl Resource for FinetuneExperiment {
    const API_VERSION: &'static str = API_VERSION;
    const KIND: &'static str = "FinetuneExperiment";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
