//! Experiment manifests on disk.
//!
//! A manifest directory holds `*.json`, `*.yaml` and `*.yml` files. A JSON
//! file contains one experiment object or an array of them; a YAML file may
//! contain several `---` separated documents. `apiVersion` and `kind` are
//! optional; documents declaring another kind are skipped.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::api::{FinetuneExperiment, FinetuneJob, Resource};
use crate::store::Client;

pub const DEFAULT_NAMESPACE: &str = "default";

const PATTERNS: [&str; 3] = ["*.json", "*.yaml", "*.yml"];

/// Manifest files in `dir`, sorted by path.
pub fn manifest_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("Manifest directory {} does not exist", dir.display());
    }
    let mut files = Vec::new();
    for pattern in PATTERNS {
        let full = dir.join(pattern);
        let full = full
            .to_str()
            .with_context(|| format!("Non UTF-8 manifest path {}", dir.display()))?;
        for entry in glob::glob(full).context("Invalid manifest glob pattern")? {
            files.push(entry.context("Failed to read manifest directory entry")?);
        }
    }
    files.sort();
    Ok(files)
}

fn documents(path: &Path, content: &str) -> Result<Vec<Value>> {
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    if is_json {
        return match serde_json::from_str(content)? {
            Value::Array(items) => Ok(items),
            value => Ok(vec![value]),
        };
    }
    let mut values = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(document)?;
        if !value.is_null() {
            values.push(value);
        }
    }
    Ok(values)
}

/// Converts one manifest document into an experiment.
///
/// Returns `Ok(None)` for documents of another kind.
pub fn parse_experiment(mut document: Value) -> Result<Option<FinetuneExperiment>> {
    let Some(object) = document.as_object_mut() else {
        anyhow::bail!("Manifest document is not an object");
    };
    if let Some(kind) = object.remove("kind")
        && kind.as_str() != Some(FinetuneExperiment::KIND)
    {
        warn!(kind = %kind, "Skipping manifest document of unsupported kind");
        return Ok(None);
    }
    object.remove("apiVersion");

    let mut experiment: FinetuneExperiment =
        serde_json::from_value(document).context("Invalid FinetuneExperiment manifest")?;
    if experiment.metadata.name.is_empty() {
        anyhow::bail!("FinetuneExperiment manifest has no metadata.name");
    }
    if experiment.metadata.namespace.is_empty() {
        experiment.metadata.namespace = DEFAULT_NAMESPACE.to_string();
    }
    Ok(Some(experiment))
}

/// Reads every experiment in the manifest files of `dir`.
pub fn load_dir(dir: &Path) -> Result<Vec<FinetuneExperiment>> {
    let mut experiments = Vec::new();
    for path in manifest_files(dir)? {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let docs = documents(&path, &content)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))?;
        for doc in docs {
            if let Some(experiment) = parse_experiment(doc)
                .with_context(|| format!("Invalid manifest {}", path.display()))?
            {
                debug!(file = %path.display(), experiment = %experiment.key(), "Loaded manifest");
                experiments.push(experiment);
            }
        }
    }
    Ok(experiments)
}

/// Experiments and jobs currently held by a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub experiments: Vec<FinetuneExperiment>,
    pub jobs: Vec<FinetuneJob>,
}

impl Snapshot {
    pub async fn capture<C: Client>(client: &C) -> Result<Self> {
        Ok(Self {
            experiments: client
                .list::<FinetuneExperiment>(None)
                .await
                .context("Failed to list finetuneExperiments")?,
            jobs: client
                .list::<FinetuneJob>(None)
                .await
                .context("Failed to list finetuneJobs")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_parse_defaults_namespace() {
        let exp = parse_experiment(json!({
            "apiVersion": "finetune.datatunerx.io/v1beta1",
            "kind": "FinetuneExperiment",
            "metadata": {"name": "exp1"},
            "spec": {"finetuneJobs": [{"spec": {"lr": 0.1}}]}
        }))
        .unwrap()
        .unwrap();
        assert_eq!(exp.metadata.namespace, DEFAULT_NAMESPACE);
        assert_eq!(exp.spec.finetune_jobs.len(), 1);
        assert_eq!(exp.spec.finetune_jobs[0].spec.get("lr"), Some(&json!(0.1)));
    }

    #[test]
    fn test_parse_skips_other_kinds() {
        let parsed = parse_experiment(json!({
            "kind": "ConfigMap",
            "metadata": {"name": "cm"}
        }))
        .unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_parse_requires_name() {
        let err = parse_experiment(json!({"metadata": {"namespace": "a"}})).unwrap_err();
        assert!(err.to_string().contains("metadata.name"));
    }

    #[test]
    fn test_load_dir_reads_json_and_yaml_in_order() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("a.json"),
            r#"[{"metadata": {"name": "exp-a"}}, {"metadata": {"name": "exp-b", "namespace": "team"}}]"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("b.yaml"),
            "metadata:\n  name: exp-c\nspec:\n  pending: true\n---\nkind: FinetuneJob\nmetadata:\n  name: stray\n---\n",
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let experiments = load_dir(dir.path()).unwrap();
        let names: Vec<_> = experiments
            .iter()
            .map(|e| e.key().to_string())
            .collect();
        assert_eq!(names, vec!["default/exp-a", "team/exp-b", "default/exp-c"]);
        assert!(experiments[2].spec.pending);
    }

    #[test]
    fn test_load_dir_names_bad_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        let err = load_dir(dir.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.json"));
    }

    #[test]
    fn test_missing_dir_errors() {
        let dir = tempdir().unwrap();
        assert!(load_dir(&dir.path().join("absent")).is_err());
    }
}
