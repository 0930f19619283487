//! Child job name resolution.
//!
//! Explicit names are used as given. Unnamed entries resolve to
//! `<experiment>-finetunejob`; the second and later unnamed entries get an
//! ordinal suffix (`<experiment>-finetunejob-1`, `-2`, ...) so that several
//! unnamed entries never collapse onto one child. Resolution depends only on
//! the experiment name and list order, so it is stable across invocations.

use std::collections::HashSet;
use tracing::warn;

use crate::api::{FinetuneExperiment, FinetuneJobSetting};
use crate::label::LABEL_FINETUNE_JOB;

/// Default child name for the first unnamed job of an experiment.
pub fn default_job_name(experiment_name: &str) -> String {
    format!("{}-{}", experiment_name, LABEL_FINETUNE_JOB)
}

/// Resolves the child name of every job setting, in list order.
///
/// If two settings still resolve to the same name (an explicit name that
/// repeats, or one that shadows a default), the first wins and the later
/// duplicates are dropped.
pub fn resolve_job_names(experiment: &FinetuneExperiment) -> Vec<(String, &FinetuneJobSetting)> {
    let base = default_job_name(&experiment.metadata.name);
    let mut unnamed = 0usize;
    let mut seen = HashSet::new();
    let mut resolved = Vec::with_capacity(experiment.spec.finetune_jobs.len());

    for (index, setting) in experiment.spec.finetune_jobs.iter().enumerate() {
        let name = match setting.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                let name = if unnamed == 0 {
                    base.clone()
                } else {
                    format!("{}-{}", base, unnamed)
                };
                unnamed += 1;
                name
            }
        };

        if !seen.insert(name.clone()) {
            warn!(
                name = %experiment.metadata.name,
                namespace = %experiment.metadata.namespace,
                job = %name,
                index,
                "Duplicate finetune job name, skipping entry"
            );
            continue;
        }
        resolved.push((name, setting));
    }

    resolved
}
