//! Correlation and run registry.

use crate::core::{PipelineRun, RunRequest};
use crate::errors::{AlertflowError, StoreError};
use crate::store::RunStore;
use crate::utils::generate_trace_id;
use md5::{Digest, Md5};
use std::sync::Arc;

/// Fingerprint of an inbound event: md5 hex of the canonical JSON of
/// `{"payload": ..., "source": ...}`.
#[must_use]
pub fn alert_fingerprint(source: &str, payload: &serde_json::Value) -> String {
    let canonical = serde_json::json!({ "payload": payload, "source": source }).to_string();
    hex::encode(Md5::digest(canonical.as_bytes()))
}

/// Allocates ids and creates run records.
#[derive(Clone)]
pub struct RunRegistry {
    store: Arc<dyn RunStore>,
}

impl std::fmt::Debug for RunRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRegistry").finish_non_exhaustive()
    }
}

impl RunRegistry {
    /// Creates a registry over a store.
    #[must_use]
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// Creates and persists a pending run.
    ///
    /// A supplied `trace_id` is reused; otherwise a new one is generated.
    /// `run_id` is always fresh. Fails with a validation error when the
    /// trace is already bound to an in-flight run with a different
    /// fingerprint.
    pub async fn create_run(
        &self,
        request: &RunRequest,
        default_environment: &str,
    ) -> Result<PipelineRun, AlertflowError> {
        let fingerprint = alert_fingerprint(&request.source, &request.payload);

        let trace_id = match request.trace_id.as_deref() {
            Some(trace) if trace.trim().is_empty() => {
                return Err(AlertflowError::Validation("trace_id must not be blank".to_string()));
            }
            Some(trace) => trace.to_string(),
            None => generate_trace_id(),
        };
        let supplied_trace = request.trace_id.is_some();

        let environment = request
            .environment
            .clone()
            .unwrap_or_else(|| default_environment.to_string());
        let mut run = PipelineRun::new(
            trace_id,
            request.source.clone(),
            environment,
            request.payload.clone(),
        );
        run.alert_fingerprint = Some(fingerprint);

        if supplied_trace {
            match self.store.insert_run_on_trace(&run).await {
                Err(StoreError::TraceConflict(reason)) => {
                    return Err(AlertflowError::Validation(reason));
                }
                other => other?,
            }
        } else {
            self.store.insert_run(&run).await?;
        }
        tracing::debug!(run_id = %run.run_id, trace_id = %run.trace_id, "Run created");
        Ok(run)
    }

    /// Creates and persists the run that continues `original`.
    ///
    /// The new run shares the trace, event and incident link and records
    /// where it came from.
    pub async fn create_resumed_run(
        &self,
        original: &PipelineRun,
    ) -> Result<PipelineRun, AlertflowError> {
        let mut run = PipelineRun::new(
            original.trace_id.clone(),
            original.source.clone(),
            original.environment.clone(),
            original.payload.clone(),
        );
        run.alert_fingerprint.clone_from(&original.alert_fingerprint);
        run.incident_ref.clone_from(&original.incident_ref);
        run.resumed_from = Some(original.run_id);
        run.origin_run_id = Some(original.idempotency_scope());

        self.store.insert_run(&run).await?;
        tracing::debug!(
            run_id = %run.run_id,
            resumed_from = %original.run_id,
            trace_id = %run.trace_id,
            "Resumed run created"
        );
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunStatus;
    use crate::errors::ErrorInfo;
    use crate::store::InMemoryRunStore;
    use serde_json::json;

    fn registry() -> (RunRegistry, Arc<InMemoryRunStore>) {
        let store = Arc::new(InMemoryRunStore::new());
        (RunRegistry::new(store.clone()), store)
    }

    #[test]
    fn test_fingerprint_is_stable_and_key_order_independent() {
        let a = alert_fingerprint("grafana", &json!({"name": "HighCPU", "severity": "critical"}));
        let b = alert_fingerprint("grafana", &json!({"severity": "critical", "name": "HighCPU"}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(a, alert_fingerprint("prometheus", &json!({"name": "HighCPU", "severity": "critical"})));
    }

    #[tokio::test]
    async fn test_generates_trace_and_fresh_run_ids() {
        let (registry, store) = registry();
        let request = RunRequest::new(json!({"name": "HighCPU"}), "grafana");

        let first = registry.create_run(&request, "production").await.unwrap();
        let second = registry.create_run(&request, "production").await.unwrap();

        assert_ne!(first.run_id, second.run_id);
        assert_ne!(first.trace_id, second.trace_id);
        assert_eq!(first.status, RunStatus::Pending);
        assert_eq!(first.environment, "production");
        assert!(first.alert_fingerprint.is_some());
        assert_eq!(store.run_count(), 2);
    }

    #[tokio::test]
    async fn test_reuses_supplied_trace() {
        let (registry, _) = registry();
        let request = RunRequest::new(json!({"name": "HighCPU"}), "grafana")
            .with_trace_id("trace-42")
            .with_environment("staging");

        let first = registry.create_run(&request, "production").await.unwrap();
        let second = registry.create_run(&request, "production").await.unwrap();

        assert_eq!(first.trace_id, "trace-42");
        assert_eq!(second.trace_id, "trace-42");
        assert_eq!(first.environment, "staging");
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn test_rejects_cross_wired_trace() {
        let (registry, _) = registry();
        let original = RunRequest::new(json!({"name": "HighCPU"}), "grafana").with_trace_id("t");
        registry.create_run(&original, "production").await.unwrap();

        let other = RunRequest::new(json!({"name": "DiskFull"}), "grafana").with_trace_id("t");
        let err = registry.create_run(&other, "production").await.unwrap_err();
        assert!(matches!(err, AlertflowError::Validation(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_cannot_cross_wire_trace() {
        let (registry, store) = registry();
        let tasks: Vec<_> = (0..12)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let request = RunRequest::new(json!({"name": format!("alert-{}", i % 3)}), "grafana")
                        .with_trace_id("shared");
                    registry.create_run(&request, "production").await
                })
            })
            .collect();

        let mut rejected = 0;
        for task in tasks {
            if let Err(err) = task.await.unwrap() {
                assert!(matches!(err, AlertflowError::Validation(_)));
                rejected += 1;
            }
        }

        let runs = store.find_by_trace("shared").await.unwrap();
        assert_eq!(runs.len() + rejected, 12);
        let first = runs[0].alert_fingerprint.clone();
        assert!(runs.iter().all(|r| r.alert_fingerprint == first));
    }

    #[tokio::test]
    async fn test_terminal_runs_do_not_bind_trace() {
        let (registry, store) = registry();
        let original = RunRequest::new(json!({"name": "HighCPU"}), "grafana").with_trace_id("t");
        let mut run = registry.create_run(&original, "production").await.unwrap();
        run.fail(ErrorInfo::permanent("boom")).unwrap();
        store.save_run(&run).await.unwrap();

        let other = RunRequest::new(json!({"name": "DiskFull"}), "grafana").with_trace_id("t");
        assert!(registry.create_run(&other, "production").await.is_ok());
    }

    #[tokio::test]
    async fn test_blank_trace_is_rejected() {
        let (registry, _) = registry();
        let request = RunRequest::new(json!({}), "cli").with_trace_id("  ");
        assert!(registry.create_run(&request, "production").await.is_err());
    }

    #[tokio::test]
    async fn test_resumed_run_links_original() {
        let (registry, _) = registry();
        let mut original = registry
            .create_run(&RunRequest::new(json!({"name": "HighCPU"}), "grafana"), "production")
            .await
            .unwrap();
        original.incident_ref = Some("INC-1".into());

        let resumed = registry.create_resumed_run(&original).await.unwrap();
        assert_eq!(resumed.trace_id, original.trace_id);
        assert_eq!(resumed.resumed_from, Some(original.run_id));
        assert_eq!(resumed.incident_ref.as_deref(), Some("INC-1"));
        assert_eq!(resumed.alert_fingerprint, original.alert_fingerprint);
        assert_ne!(resumed.run_id, original.run_id);
        assert_eq!(resumed.idempotency_scope(), original.run_id);

        let again = registry.create_resumed_run(&resumed).await.unwrap();
        assert_eq!(again.resumed_from, Some(resumed.run_id));
        assert_eq!(again.idempotency_scope(), original.run_id);
    }
}
