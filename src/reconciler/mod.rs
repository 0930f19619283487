//! Experiment reconciler.
//!
//! One invocation converges a single `FinetuneExperiment` toward its spec:
//!
//! 1. **Fetch** the experiment; a missing object is treated as already deleted.
//! 2. **Deletion**: with a deletion marker set, run cleanup and drop the finalizer.
//! 3. **Finalizer**: attach the finalizer before touching anything else.
//! 4. **Pending gate**: `spec.pending` holds the experiment in `PENDING`.
//! 5. **Convergence**: create each child job (idempotently) and mirror its status.
//! 6. **Finalize**: record `PROCESSING` in one status write.
//!
//! Every invocation starts from a fresh read and writes through optimistic
//! concurrency, so re-delivery and interleaving with other writers are safe.
//! Failures are never retried here; they are returned to the caller, which
//! requeues the key.

mod naming;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::api::{
    FINETUNE_GROUP_FINALIZER, FinetuneExperiment, FinetuneExperimentStatus, FinetuneJob,
    FinetuneState, ObjectKey, set_controller_reference,
};
use crate::errors::{ReconcileError, StoreError};
use crate::label::instance_labels;
use crate::store::Client;

pub use naming::{default_job_name, resolve_job_names};

/// What the scheduler should do with a key after one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Converged; wait for the next trigger.
    Done,
    /// Retry after the scheduler's default backoff.
    Requeue,
    /// Retry after the given delay.
    RequeueAfter(Duration),
}

/// Maps the outcome of an invocation onto a scheduler action.
pub fn handle_result(result: Result<(), ReconcileError>) -> Action {
    match result {
        Ok(()) => Action::Done,
        Err(_) => Action::Requeue,
    }
}

/// Runs a store call under the invocation's cancellation token.
async fn call<T, F>(
    ctx: &CancellationToken,
    operation: &'static str,
    future: F,
) -> Result<T, ReconcileError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(ReconcileError::Cancelled),
        result = future => result.map_err(|e| ReconcileError::store(operation, e)),
    }
}

fn is_store_error(err: &ReconcileError, predicate: fn(&StoreError) -> bool) -> bool {
    err.store_error().is_some_and(predicate)
}

pub struct Reconciler<C: Client> {
    client: Arc<C>,
}

impl<C: Client> Clone for Reconciler<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
        }
    }
}

impl<C: Client> Reconciler<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Reconciles one experiment and converts the outcome into an [`Action`].
    pub async fn run(&self, key: &ObjectKey, ctx: &CancellationToken) -> Action {
        let result = self.reconcile(key, ctx).await;
        if let Err(e) = &result {
            error!(name = %key.name, namespace = %key.namespace, error = %e, "Reconcile failed");
        }
        handle_result(result)
    }

    #[instrument(name = "reconcile", skip_all, fields(name = %key.name, namespace = %key.namespace))]
    pub async fn reconcile(
        &self,
        key: &ObjectKey,
        ctx: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        info!("Start reconcile finetuneExperiment");

        let experiment = match call(
            ctx,
            "get finetuneExperiment",
            self.client.get::<FinetuneExperiment>(key),
        )
        .await
        {
            Ok(experiment) => experiment,
            Err(e) if is_store_error(&e, StoreError::is_not_found) => {
                info!("FinetuneExperiment not found, ignoring since object must be deleted");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if experiment.metadata.is_deleting() {
            return self.finalize_deletion(experiment, ctx).await;
        }

        let experiment = self.ensure_finalizer(experiment, ctx).await?;

        if experiment.spec.pending {
            let status = FinetuneExperimentStatus {
                state: Some(FinetuneState::Pending),
                ..experiment.status.clone()
            };
            return self.write_status(experiment, status, ctx).await;
        }

        let mut status = experiment.status.clone();
        self.converge_jobs(&experiment, &mut status, ctx).await?;
        status.state = Some(FinetuneState::Processing);
        self.write_status(experiment, status, ctx).await
    }

    async fn finalize_deletion(
        &self,
        mut experiment: FinetuneExperiment,
        ctx: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        if !experiment
            .metadata
            .contains_finalizer(FINETUNE_GROUP_FINALIZER)
        {
            debug!("Deletion in progress and finalizer already removed");
            return Ok(());
        }

        self.cleanup(&experiment);
        experiment
            .metadata
            .remove_finalizer(FINETUNE_GROUP_FINALIZER);
        call(ctx, "remove finalizer", self.client.update(&experiment)).await?;
        info!("Removed finalizer");
        Ok(())
    }

    /// Teardown hook run before the finalizer is released. Child jobs are
    /// removed by the store's garbage collector through their owner
    /// references, so nothing is deleted explicitly.
    fn cleanup(&self, experiment: &FinetuneExperiment) {
        debug!(
            jobs = experiment.status.jobs_status.len(),
            "Releasing experiment; owned jobs are garbage-collected by the store"
        );
    }

    async fn ensure_finalizer(
        &self,
        mut experiment: FinetuneExperiment,
        ctx: &CancellationToken,
    ) -> Result<FinetuneExperiment, ReconcileError> {
        if !experiment.metadata.add_finalizer(FINETUNE_GROUP_FINALIZER) {
            return Ok(experiment);
        }
        let updated = call(ctx, "add finalizer", self.client.update(&experiment)).await?;
        info!("Added finalizer");
        Ok(updated)
    }

    /// Creates every child job and records its latest status under its name.
    async fn converge_jobs(
        &self,
        experiment: &FinetuneExperiment,
        status: &mut FinetuneExperimentStatus,
        ctx: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        let owner_uid = experiment.metadata.uid.as_deref();
        let namespace = experiment.metadata.namespace.as_str();

        for (name, setting) in resolve_job_names(experiment) {
            let mut job = FinetuneJob::new(namespace, &name, setting.spec.clone());
            job.metadata.labels = instance_labels(&name, Some(&experiment.metadata.labels));
            set_controller_reference(experiment, &mut job)?;

            match call(ctx, "create finetuneJob", self.client.create(&job)).await {
                Ok(_) => info!(job = %name, "Created finetuneJob"),
                Err(e) if is_store_error(&e, StoreError::is_already_exists) => {
                    debug!(job = %name, "FinetuneJob already exists");
                }
                Err(e) => return Err(e),
            }

            let existing = call(
                ctx,
                "get finetuneJob",
                self.client
                    .get::<FinetuneJob>(&ObjectKey::new(namespace, name.as_str())),
            )
            .await?;

            let owned = owner_uid.is_some_and(|uid| {
                existing
                    .metadata
                    .controller_reference()
                    .is_some_and(|r| r.uid == uid)
            });
            if !owned {
                warn!(
                    job = %name,
                    "FinetuneJob exists but is controlled by another owner, not tracking its status"
                );
                continue;
            }

            status.jobs_status.insert(name, existing.status);
        }
        Ok(())
    }

    /// Persists `status` unless it matches what is already stored.
    async fn write_status(
        &self,
        mut experiment: FinetuneExperiment,
        status: FinetuneExperimentStatus,
        ctx: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        if experiment.status == status {
            debug!("Status unchanged, skipping update");
            return Ok(());
        }
        let state = status.state;
        experiment.status = status;
        call(
            ctx,
            "update finetuneExperiment status",
            self.client.update_status(&experiment),
        )
        .await?;
        info!(state = ?state, "Updated finetuneExperiment status");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{FinetuneJobSetting, FinetuneJobSpec, FinetuneJobStatus, Resource};
    use crate::store::{InMemoryStore, WatchEvent};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    /// Store wrapper that fails or stalls selected operations.
    #[derive(Default)]
    struct FlakyClient {
        inner: InMemoryStore,
        fail: Mutex<Vec<(&'static str, &'static str)>>,
        stall: Mutex<Vec<(&'static str, &'static str)>>,
        calls: Mutex<Vec<String>>,
    }

    impl FlakyClient {
        fn fail_on(&self, op: &'static str, kind: &'static str) {
            self.fail.lock().unwrap().push((op, kind));
        }

        /// Makes `op` on `kind` never complete.
        fn stall_on(&self, op: &'static str, kind: &'static str) {
            self.stall.lock().unwrap().push((op, kind));
        }

        async fn maybe_stall(&self, op: &'static str, kind: &str) {
            let stalled = self
                .stall
                .lock()
                .unwrap()
                .iter()
                .any(|(o, k)| *o == op && *k == kind);
            if stalled {
                std::future::pending::<()>().await;
            }
        }

        fn check(&self, op: &'static str, kind: &str) -> Result<(), StoreError> {
            self.calls.lock().unwrap().push(format!("{} {}", op, kind));
            let failing = self
                .fail
                .lock()
                .unwrap()
                .iter()
                .any(|(o, k)| *o == op && *k == kind);
            if failing {
                return Err(StoreError::Unavailable(format!("injected {} failure", op)));
            }
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Client for FlakyClient {
        async fn get<K: Resource>(&self, key: &ObjectKey) -> Result<K, StoreError> {
            self.check("get", K::KIND)?;
            self.maybe_stall("get", K::KIND).await;
            self.inner.get(key).await
        }

        async fn list<K: Resource>(&self, namespace: Option<&str>) -> Result<Vec<K>, StoreError> {
            self.check("list", K::KIND)?;
            self.inner.list(namespace).await
        }

        async fn create<K: Resource>(&self, object: &K) -> Result<K, StoreError> {
            self.check("create", K::KIND)?;
            self.maybe_stall("create", K::KIND).await;
            self.inner.create(object).await
        }

        async fn update<K: Resource>(&self, object: &K) -> Result<K, StoreError> {
            self.check("update", K::KIND)?;
            self.inner.update(object).await
        }

        async fn update_status<K: Resource>(&self, object: &K) -> Result<K, StoreError> {
            self.check("update_status", K::KIND)?;
            self.inner.update_status(object).await
        }

        async fn delete<K: Resource>(&self, key: &ObjectKey) -> Result<(), StoreError> {
            self.check("delete", K::KIND)?;
            self.inner.delete::<K>(key).await
        }

        fn watch(&self) -> broadcast::Receiver<WatchEvent> {
            self.inner.watch()
        }

        async fn wait_for_sync(&self) -> Result<(), StoreError> {
            self.inner.wait_for_sync().await
        }
    }

    const EXP: &str = "FinetuneExperiment";
    const JOB: &str = "FinetuneJob";

    fn key() -> ObjectKey {
        ObjectKey::new("default", "exp1")
    }

    fn job_key(name: &str) -> ObjectKey {
        ObjectKey::new("default", name)
    }

    fn spec(llm: &str) -> FinetuneJobSpec {
        FinetuneJobSpec::from_value(json!({"finetune": {"llm": llm}})).unwrap()
    }

    async fn setup(experiment: FinetuneExperiment) -> (Arc<FlakyClient>, Reconciler<FlakyClient>) {
        let client = Arc::new(FlakyClient::default());
        client.inner.create(&experiment).await.unwrap();
        (client.clone(), Reconciler::new(client))
    }

    fn two_job_experiment() -> FinetuneExperiment {
        FinetuneExperiment::new("default", "exp1").with_jobs(vec![
            FinetuneJobSetting::named("custom-job", spec("llama2")),
            FinetuneJobSetting::unnamed(spec("qwen")),
        ])
    }

    #[test]
    fn test_handle_result_maps_errors_to_requeue() {
        assert_eq!(handle_result(Ok(())), Action::Done);
        assert_eq!(handle_result(Err(ReconcileError::Cancelled)), Action::Requeue);
    }

    #[tokio::test]
    async fn test_missing_experiment_is_a_noop() {
        let client = Arc::new(FlakyClient::default());
        let reconciler = Reconciler::new(client.clone());
        let ctx = CancellationToken::new();

        assert_eq!(reconciler.run(&key(), &ctx).await, Action::Done);
        assert_eq!(client.inner.write_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_requeues() {
        let (client, reconciler) = setup(two_job_experiment()).await;
        client.fail_on("get", EXP);

        let err = reconciler
            .reconcile(&key(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err.store_error(),
            Some(StoreError::Unavailable(_))
        ));
        assert_eq!(client.inner.count(JOB), 0);
    }

    #[tokio::test]
    async fn test_creates_children_with_owner_labels_and_status() {
        let mut exp = two_job_experiment();
        exp.metadata.labels.insert("team".into(), "nlp".into());
        let (client, reconciler) = setup(exp).await;

        reconciler
            .reconcile(&key(), &CancellationToken::new())
            .await
            .unwrap();

        let stored: FinetuneExperiment = client.inner.get(&key()).await.unwrap();
        assert!(stored.metadata.contains_finalizer(FINETUNE_GROUP_FINALIZER));
        assert_eq!(stored.status.state, Some(FinetuneState::Processing));
        assert_eq!(
            stored.status.jobs_status.keys().collect::<Vec<_>>(),
            vec!["custom-job", "exp1-finetunejob"]
        );

        for (name, llm) in [("custom-job", "llama2"), ("exp1-finetunejob", "qwen")] {
            let job: FinetuneJob = client.inner.get(&job_key(name)).await.unwrap();
            let owner = job.metadata.controller_reference().unwrap();
            assert_eq!(owner.name, "exp1");
            assert_eq!(owner.uid, stored.metadata.uid.clone().unwrap());
            assert_eq!(job.spec, spec(llm));
            assert_eq!(job.metadata.labels["finetune.datatunerx.io/instance"], name);
            assert_eq!(job.metadata.labels["team"], "nlp");
        }
    }

    #[tokio::test]
    async fn test_second_run_writes_nothing() {
        let (client, reconciler) = setup(two_job_experiment()).await;
        let ctx = CancellationToken::new();

        reconciler.reconcile(&key(), &ctx).await.unwrap();
        let first: FinetuneExperiment = client.inner.get(&key()).await.unwrap();
        let writes = client.inner.write_count();

        reconciler.reconcile(&key(), &ctx).await.unwrap();
        let second: FinetuneExperiment = client.inner.get(&key()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(client.inner.write_count(), writes);
        assert_eq!(client.inner.count(JOB), 2);
    }

    #[tokio::test]
    async fn test_finalizer_attached_before_any_child() {
        let (client, reconciler) = setup(two_job_experiment()).await;
        reconciler
            .reconcile(&key(), &CancellationToken::new())
            .await
            .unwrap();

        let calls = client.calls();
        let update = calls.iter().position(|c| c == "update FinetuneExperiment").unwrap();
        let create = calls.iter().position(|c| c == "create FinetuneJob").unwrap();
        let status = calls
            .iter()
            .position(|c| c == "update_status FinetuneExperiment")
            .unwrap();
        assert!(update < create);
        let last_create = calls.iter().rposition(|c| c == "create FinetuneJob").unwrap();
        assert!(last_create < status);
    }

    #[tokio::test]
    async fn test_finalizer_failure_stops_invocation() {
        let (client, reconciler) = setup(two_job_experiment()).await;
        client.fail_on("update", EXP);

        let result = reconciler.reconcile(&key(), &CancellationToken::new()).await;
        assert!(result.is_err());
        assert_eq!(client.inner.count(JOB), 0);
        let stored: FinetuneExperiment = client.inner.get(&key()).await.unwrap();
        assert!(stored.status.state.is_none());
    }

    #[tokio::test]
    async fn test_create_failure_aborts_remaining_jobs() {
        let (client, reconciler) = setup(two_job_experiment()).await;
        client.fail_on("create", JOB);

        let action = reconciler.run(&key(), &CancellationToken::new()).await;
        assert_eq!(action, Action::Requeue);
        assert_eq!(
            client
                .calls()
                .iter()
                .filter(|c| *c == "create FinetuneJob")
                .count(),
            1
        );
        let stored: FinetuneExperiment = client.inner.get(&key()).await.unwrap();
        assert!(stored.status.state.is_none());
    }

    #[tokio::test]
    async fn test_existing_child_is_adopted_idempotently() {
        let (client, reconciler) = setup(two_job_experiment()).await;
        let ctx = CancellationToken::new();
        reconciler.reconcile(&key(), &ctx).await.unwrap();

        // A later run that loses its status write still leaves exactly two children.
        client.fail_on("update_status", EXP);
        let mut exp: FinetuneExperiment = client.inner.get(&key()).await.unwrap();
        exp.status.jobs_status.clear();
        client.inner.update_status(&exp).await.unwrap();
        assert!(reconciler.reconcile(&key(), &ctx).await.is_err());
        assert_eq!(client.inner.count(JOB), 2);
    }

    #[tokio::test]
    async fn test_pending_holds_children() {
        let (client, reconciler) = setup(two_job_experiment().with_pending(true)).await;
        let ctx = CancellationToken::new();

        reconciler.reconcile(&key(), &ctx).await.unwrap();
        let stored: FinetuneExperiment = client.inner.get(&key()).await.unwrap();
        assert_eq!(stored.status.state, Some(FinetuneState::Pending));
        assert!(stored.metadata.contains_finalizer(FINETUNE_GROUP_FINALIZER));
        assert_eq!(client.inner.count(JOB), 0);

        let mut resumed = stored;
        resumed.spec.pending = false;
        client.inner.update(&resumed).await.unwrap();

        reconciler.reconcile(&key(), &ctx).await.unwrap();
        let stored: FinetuneExperiment = client.inner.get(&key()).await.unwrap();
        assert_eq!(stored.status.state, Some(FinetuneState::Processing));
        assert_eq!(client.inner.count(JOB), 2);
    }

    #[tokio::test]
    async fn test_deletion_removes_finalizer_without_child_operations() {
        let mut exp = two_job_experiment();
        exp.metadata.add_finalizer(FINETUNE_GROUP_FINALIZER);
        let (client, reconciler) = setup(exp).await;
        client.inner.delete::<FinetuneExperiment>(&key()).await.unwrap();

        reconciler
            .reconcile(&key(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(client.calls().iter().all(|c| !c.ends_with(JOB)));
        // The store finishes removal once no finalizers remain.
        let err = client.inner.get::<FinetuneExperiment>(&key()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_deletion_without_finalizer_is_noop() {
        let mut exp = two_job_experiment();
        exp.metadata.add_finalizer("other.io/keep");
        let (client, reconciler) = setup(exp).await;
        client.inner.delete::<FinetuneExperiment>(&key()).await.unwrap();
        let writes = client.inner.write_count();

        reconciler
            .reconcile(&key(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(client.inner.write_count(), writes);
    }

    #[tokio::test]
    async fn test_finalizer_removal_failure_is_retryable() {
        let mut exp = two_job_experiment();
        exp.metadata.add_finalizer(FINETUNE_GROUP_FINALIZER);
        let (client, reconciler) = setup(exp).await;
        client.inner.delete::<FinetuneExperiment>(&key()).await.unwrap();
        client.fail_on("update", EXP);

        let action = reconciler.run(&key(), &CancellationToken::new()).await;
        assert_eq!(action, Action::Requeue);
        let stored: FinetuneExperiment = client.inner.get(&key()).await.unwrap();
        assert!(stored.metadata.contains_finalizer(FINETUNE_GROUP_FINALIZER));
    }

    #[tokio::test]
    async fn test_status_entries_refresh_and_never_shrink() {
        let (client, reconciler) = setup(two_job_experiment()).await;
        let ctx = CancellationToken::new();
        reconciler.reconcile(&key(), &ctx).await.unwrap();

        // The job-level controller reports progress.
        let mut job: FinetuneJob = client.inner.get(&job_key("custom-job")).await.unwrap();
        job.status = FinetuneJobStatus {
            state: Some("SUCCESSFUL".to_string()),
            ..Default::default()
        };
        client.inner.update_status(&job).await.unwrap();

        // The unnamed entry is dropped from the spec.
        let mut exp: FinetuneExperiment = client.inner.get(&key()).await.unwrap();
        exp.spec.finetune_jobs.truncate(1);
        client.inner.update(&exp).await.unwrap();

        reconciler.reconcile(&key(), &ctx).await.unwrap();
        let stored: FinetuneExperiment = client.inner.get(&key()).await.unwrap();
        assert_eq!(stored.status.jobs_status.len(), 2);
        assert_eq!(
            stored.status.jobs_status["custom-job"].state.as_deref(),
            Some("SUCCESSFUL")
        );
        assert!(stored.status.jobs_status.contains_key("exp1-finetunejob"));
    }

    #[tokio::test]
    async fn test_job_controller_state_is_mirrored_verbatim() {
        let (client, reconciler) = setup(two_job_experiment()).await;
        let ctx = CancellationToken::new();
        reconciler.reconcile(&key(), &ctx).await.unwrap();

        for state in ["INIT", "FINETUNE", "BUILDIMAGE", "SERVE"] {
            let mut job: FinetuneJob = client.inner.get(&job_key("custom-job")).await.unwrap();
            job.status.state = Some(state.to_string());
            job.status
                .extra
                .insert("stats".to_string(), json!({"phase": state}));
            client.inner.update_status(&job).await.unwrap();

            reconciler.reconcile(&key(), &ctx).await.unwrap();
            let stored: FinetuneExperiment = client.inner.get(&key()).await.unwrap();
            let mirrored = &stored.status.jobs_status["custom-job"];
            assert_eq!(mirrored.state.as_deref(), Some(state));
            assert_eq!(mirrored.extra["stats"], json!({"phase": state}));
            assert_eq!(stored.status.state, Some(FinetuneState::Processing));
        }
    }

    #[tokio::test]
    async fn test_foreign_job_with_same_name_is_not_tracked() {
        let (client, reconciler) = setup(two_job_experiment()).await;
        client
            .inner
            .create(&FinetuneJob::new("default", "custom-job", spec("other")))
            .await
            .unwrap();

        reconciler
            .reconcile(&key(), &CancellationToken::new())
            .await
            .unwrap();
        let stored: FinetuneExperiment = client.inner.get(&key()).await.unwrap();
        assert!(!stored.status.jobs_status.contains_key("custom-job"));
        assert!(stored.status.jobs_status.contains_key("exp1-finetunejob"));
        let foreign: FinetuneJob = client.inner.get(&job_key("custom-job")).await.unwrap();
        assert_eq!(foreign.spec, spec("other"));
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts() {
        let (client, reconciler) = setup(two_job_experiment()).await;
        let ctx = CancellationToken::new();
        ctx.cancel();

        let err = reconciler.reconcile(&key(), &ctx).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Cancelled));
        assert_eq!(client.inner.count(JOB), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_mid_invocation_skips_later_steps() {
        let (client, reconciler) = setup(two_job_experiment()).await;
        client.stall_on("create", JOB);
        let ctx = CancellationToken::new();
        let deadline = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                ctx.cancel();
            })
        };

        let err = reconciler.reconcile(&key(), &ctx).await.unwrap_err();
        deadline.await.unwrap();
        assert!(matches!(err, ReconcileError::Cancelled));

        let calls = client.calls();
        assert_eq!(
            calls.iter().filter(|c| *c == "create FinetuneJob").count(),
            1
        );
        assert!(!calls.iter().any(|c| c == "get FinetuneJob"));
        assert!(!calls.iter().any(|c| c.starts_with("update_status")));
        assert_eq!(client.inner.count(JOB), 0);

        let stored: FinetuneExperiment = client.inner.get(&key()).await.unwrap();
        assert!(stored.metadata.contains_finalizer(FINETUNE_GROUP_FINALIZER));
        assert!(stored.status.state.is_none());
    }

    #[tokio::test]
    async fn test_conflicting_status_write_is_retryable() {
        let (client, reconciler) = setup(two_job_experiment()).await;
        let ctx = CancellationToken::new();
        reconciler.reconcile(&key(), &ctx).await.unwrap();

        // Hand the reconciler a stale copy to write from.
        let stale: FinetuneExperiment = client.inner.get(&key()).await.unwrap();
        let mut fresh = stale.clone();
        fresh.metadata.labels.insert("touched".into(), "yes".into());
        client.inner.update(&fresh).await.unwrap();

        let mut status = stale.status.clone();
        status.state = Some(FinetuneState::Pending);
        let err = reconciler
            .write_status(stale, status, &ctx)
            .await
            .unwrap_err();
        assert!(is_store_error(&err, StoreError::is_conflict));
    }
}
