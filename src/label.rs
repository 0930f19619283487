//! Label sets for child jobs.
//!
//! Every merge is left-biased: keys already present in the base set are never
//! overwritten, so system-reserved keys survive user-supplied custom labels.

use std::collections::BTreeMap;

pub type Labels = BTreeMap<String, String>;

pub const LABEL_INSTANCE_KEY: &str = "finetune.datatunerx.io/instance";
pub const LABEL_COMPONENT_KEY: &str = "finetune.datatunerx.io/component";
pub const LABEL_PART_OF_KEY: &str = "finetune.datatunerx.io/part-of";
pub const LABEL_FINETUNE_BINDING_KEY: &str = "finetune.datatunerx.io/finetunebinding";

pub const LABEL_DATATUNERX: &str = "datatunerx";
pub const LABEL_FINETUNE_JOB: &str = "finetunejob";
pub const LABEL_FINETUNE: &str = "finetune";
pub const LABEL_FINETUNE_EXPERIMENT: &str = "finetuneexperiment";

/// The fixed "part of this system" label.
pub fn base_labels() -> Labels {
    Labels::from([(LABEL_PART_OF_KEY.to_string(), LABEL_DATATUNERX.to_string())])
}

/// Labels for one job instance: instance and component keys, then custom
/// labels, all under the base labels.
pub fn instance_labels(instance_name: &str, custom_labels: Option<&Labels>) -> Labels {
    let instance = Labels::from([
        (LABEL_INSTANCE_KEY.to_string(), instance_name.to_string()),
        (LABEL_COMPONENT_KEY.to_string(), LABEL_FINETUNE_JOB.to_string()),
    ]);
    let custom = merge_labels(instance, custom_labels);
    merge_labels(base_labels(), Some(&custom))
}

/// Left-biased union of `base` and `overlay`.
pub fn merge_labels(mut base: Labels, overlay: Option<&Labels>) -> Labels {
    for (key, value) in overlay.into_iter().flatten() {
        base.entry(key.clone()).or_insert_with(|| value.clone());
    }
    base
}
