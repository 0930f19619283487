//! The `FinetuneJob` child resource.
//!
//! The controller only creates jobs and reads their status; the spec payload is
//! opaque to it and the status is written by the job-level controller.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::meta::{ObjectMeta, Resource};
use super::API_VERSION;

/// Opaque job payload, copied verbatim from the experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FinetuneJobSpec(pub Map<String, Value>);

impl FinetuneJobSpec {
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// Status snapshot maintained by the job-level controller.
///
/// The job controller owns the state vocabulary (`INIT`, `FINETUNE`,
/// `BUILDIMAGE`, `SERVE`, ...), so `state` is kept as an opaque string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinetuneJobStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Any further fields the job controller reports, preserved as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinetuneJob {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: FinetuneJobSpec,
    #[serde(default)]
    pub status: FinetuneJobStatus,
}

impl FinetuneJob {
    pub fn new(namespace: &str, name: &str, spec: FinetuneJobSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: FinetuneJobStatus::default(),
        }
    }
}

impl Resource for FinetuneJob {
    const API_VERSION: &'static str = API_VERSION;
    const KIND: &'static str = "FinetuneJob";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
