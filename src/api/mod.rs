//! Resource types managed by the controller.
//!
//! `FinetuneExperiment` is the parent descriptor; each entry of its
//! `spec.finetuneJobs` materializes as one owned `FinetuneJob`.

mod experiment;
mod job;
mod meta;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use experiment::{
    FinetuneExperiment, FinetuneExperimentSpec, FinetuneExperimentStatus, FinetuneJobSetting,
};
pub use job::{FinetuneJob, FinetuneJobSpec, FinetuneJobStatus};
pub use meta::{ObjectKey, ObjectMeta, OwnerReference, Resource, set_controller_reference};

pub const API_VERSION: &str = "finetune.datatunerx.io/v1beta1";

/// Finalizer that defers physical deletion of an experiment until cleanup ran.
pub const FINETUNE_GROUP_FINALIZER: &str = "finetune.datatunerx.io/finalizer";

/// Lifecycle state reported in experiment and job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinetuneState {
    Pending,
    Processing,
    Success,
    Failed,
}

impl fmt::Display for FinetuneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinetuneState::Pending => write!(f, "PENDING"),
            FinetuneState::Processing => write!(f, "PROCESSING"),
            FinetuneState::Success => write!(f, "SUCCESS"),
            FinetuneState::Failed => write!(f, "FAILED"),
        }
    }
}
