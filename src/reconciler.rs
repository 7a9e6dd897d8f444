use crate::notification::Notification;
use crate::runtime::ContainerRuntime;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Seconds the runtime waits for a container to stop gracefully before killing it on restart.
pub const RESTART_TIMEOUT_SECONDS: u32 = 10;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("notification does not carry an image reference")]
    InvalidNotification,
    #[error("container runtime is unavailable")]
    RuntimeUnavailable(#[source] anyhow::Error),
}

/// What one reconciliation pass did. Pull and restart failures are recorded here, not raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub image_reference: String,
    pub matched_count: usize,
    /// Containers restarted successfully, in snapshot order
    pub restarted_ids: Vec<String>,
    pub pull_error: Option<String>,
    pub restart_errors: BTreeMap<String, String>,
}

impl ReconcileOutcome {
    fn noop(image_reference: &str) -> Self {
        ReconcileOutcome {
            image_reference: image_reference.to_string(),
            ..Default::default()
        }
    }

    /// No running container used the image, so nothing was pulled or restarted.
    pub fn is_noop(&self) -> bool {
        self.matched_count == 0
    }

    pub fn is_success(&self) -> bool {
        self.pull_error.is_none() && self.restart_errors.is_empty()
    }
}

/// Maps an image push notification onto restarts of the local containers running that image.
///
/// Holds no state between calls: every `act` re-reads the running containers from the runtime.
pub struct Reconciler {
    runtime: Arc<dyn ContainerRuntime>,
}

impl Reconciler {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Reconciler { runtime }
    }

    pub async fn act(&self, notification: &Notification) -> Result<ReconcileOutcome, ReconcileError> {
        let image_reference = notification.image_reference();
        if image_reference.is_empty() {
            warn!(
                "Dropping notification pushed by {} without repository name",
                notification.pusher
            );
            return Err(ReconcileError::InvalidNotification);
        }

        let containers = self.runtime.list_running_containers().await.map_err(|e| {
            error!(
                "Could not list running containers for image {}: {:#}",
                image_reference, e
            );
            ReconcileError::RuntimeUnavailable(e)
        })?;

        // Exact comparison: `acme/app:v2` must never restart a container on `acme/app:latest`
        let restart_set: Vec<&str> = containers
            .iter()
            .filter(|container| container.image == image_reference)
            .map(|container| container.id.as_str())
            .collect();

        if restart_set.is_empty() {
            info!(
                "Skipping image {}, none of the {} running containers use it",
                image_reference,
                containers.len()
            );
            return Ok(ReconcileOutcome::noop(image_reference));
        }

        info!(
            "Found {} running containers with image {}: {}",
            restart_set.len(),
            image_reference,
            restart_set.join(", ")
        );

        let mut outcome = ReconcileOutcome {
            image_reference: image_reference.to_string(),
            matched_count: restart_set.len(),
            ..Default::default()
        };

        // A failed pull still restarts, onto whatever version of the image is cached locally
        match self.runtime.pull_image(image_reference).await {
            Ok(()) => info!("Pulled image {}", image_reference),
            Err(e) => {
                error!(
                    "Failed to pull image {}, restarting on the cached image: {:#}",
                    image_reference, e
                );
                outcome.pull_error = Some(format!("{:#}", e));
            }
        }

        for id in restart_set {
            match self
                .runtime
                .restart_container(id, RESTART_TIMEOUT_SECONDS)
                .await
            {
                Ok(()) => {
                    info!("Restarted container {} with image {}", id, image_reference);
                    outcome.restarted_ids.push(id.to_string());
                }
                Err(e) => {
                    error!("Failed to restart container {}: {:#}", id, e);
                    outcome.restart_errors.insert(id.to_string(), format!("{:#}", e));
                }
            }
        }

        info!(
            "Reconciled image {}: {} of {} containers restarted{}",
            image_reference,
            outcome.restarted_ids.len(),
            outcome.matched_count,
            match outcome.pull_error {
                Some(_) => " without a fresh pull",
                None => "",
            }
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ContainerInfo, ContainerStatus};
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        List,
        Pull(String),
        Restart(String, u32),
    }

    #[derive(Default)]
    struct FakeRuntime {
        containers: Vec<ContainerInfo>,
        unavailable: bool,
        fail_pull: bool,
        fail_restart: HashSet<String>,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeRuntime {
        fn with_containers(containers: &[(&str, &str)]) -> Self {
            FakeRuntime {
                containers: containers
                    .iter()
                    .map(|(id, image)| ContainerInfo {
                        id: id.to_string(),
                        image: image.to_string(),
                        status: ContainerStatus::Running,
                    })
                    .collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn pulls(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Pull(reference) => Some(reference),
                    _ => None,
                })
                .collect()
        }

        fn restarts(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Restart(id, _) => Some(id),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn list_running_containers(&self) -> Result<Vec<ContainerInfo>> {
            self.calls.lock().unwrap().push(Call::List);
            if self.unavailable {
                bail!("Cannot connect to the Docker daemon at unix:///var/run/docker.sock");
            }
            Ok(self.containers.clone())
        }

        async fn pull_image(&self, reference: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Pull(reference.to_string()));
            if self.fail_pull {
                bail!("pull access denied for {}", reference);
            }
            Ok(())
        }

        async fn restart_container(&self, id: &str, timeout_seconds: u32) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Restart(id.to_string(), timeout_seconds));
            if self.fail_restart.contains(id) {
                bail!("No such container: {}", id);
            }
            Ok(())
        }
    }

    fn notification(image_reference: &str) -> Notification {
        let mut notification = Notification::default();
        notification.repository.repo_name = image_reference.to_string();
        notification
    }

    fn reconciler(runtime: &Arc<FakeRuntime>) -> Reconciler {
        Reconciler::new(runtime.clone())
    }

    #[tokio::test]
    async fn test_empty_image_reference_makes_no_runtime_calls() {
        let runtime = Arc::new(FakeRuntime::with_containers(&[("c1", "")]));

        let result = reconciler(&runtime).act(&notification("")).await;

        assert!(matches!(result, Err(ReconcileError::InvalidNotification)));
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_matching_container_is_noop() {
        let runtime = Arc::new(FakeRuntime::with_containers(&[
            ("c1", "other/app"),
            ("c2", "acme/app:v2"),
        ]));

        let outcome = reconciler(&runtime)
            .act(&notification("acme/app"))
            .await
            .unwrap();

        assert!(outcome.is_noop());
        assert!(outcome.is_success());
        assert_eq!(outcome.matched_count, 0);
        assert_eq!(runtime.calls(), vec![Call::List]);
    }

    #[tokio::test]
    async fn test_noop_is_repeatable() {
        let runtime = Arc::new(FakeRuntime::with_containers(&[("c1", "other/app")]));
        let reconciler = reconciler(&runtime);

        let first = reconciler.act(&notification("acme/app")).await.unwrap();
        let second = reconciler.act(&notification("acme/app")).await.unwrap();

        assert_eq!(first, second);
        assert!(first.is_noop());
        assert_eq!(runtime.calls(), vec![Call::List, Call::List]);
    }

    #[tokio::test]
    async fn test_matching_is_exact_and_case_sensitive() {
        let runtime = Arc::new(FakeRuntime::with_containers(&[
            ("c1", "app:latest"),
            ("c2", "app:v2"),
            ("c3", "App:latest"),
            ("c4", "app"),
        ]));

        let outcome = reconciler(&runtime)
            .act(&notification("app:latest"))
            .await
            .unwrap();

        assert_eq!(outcome.matched_count, 1);
        assert_eq!(runtime.restarts(), vec!["c1"]);
    }

    #[tokio::test]
    async fn test_single_pull_and_one_restart_per_match() {
        let runtime = Arc::new(FakeRuntime::with_containers(&[
            ("c1", "acme/app"),
            ("c2", "acme/app"),
            ("c3", "acme/app"),
            ("c4", "acme/app"),
        ]));

        let outcome = reconciler(&runtime)
            .act(&notification("acme/app"))
            .await
            .unwrap();

        assert_eq!(runtime.pulls(), vec!["acme/app"]);
        assert_eq!(runtime.restarts().len(), 4);
        assert_eq!(outcome.matched_count, 4);
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_pull_precedes_restarts_in_snapshot_order() {
        let runtime = Arc::new(FakeRuntime::with_containers(&[
            ("c", "acme/app"),
            ("a", "acme/app"),
            ("b", "acme/app"),
        ]));

        let outcome = reconciler(&runtime)
            .act(&notification("acme/app"))
            .await
            .unwrap();

        assert_eq!(
            runtime.calls(),
            vec![
                Call::List,
                Call::Pull("acme/app".to_string()),
                Call::Restart("c".to_string(), RESTART_TIMEOUT_SECONDS),
                Call::Restart("a".to_string(), RESTART_TIMEOUT_SECONDS),
                Call::Restart("b".to_string(), RESTART_TIMEOUT_SECONDS),
            ]
        );
        assert_eq!(outcome.restarted_ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_pull_failure_still_restarts() {
        let runtime = Arc::new(FakeRuntime {
            fail_pull: true,
            ..FakeRuntime::with_containers(&[("c1", "acme/app"), ("c2", "acme/app")])
        });

        let outcome = reconciler(&runtime)
            .act(&notification("acme/app"))
            .await
            .unwrap();

        assert_eq!(runtime.restarts(), vec!["c1", "c2"]);
        assert_eq!(outcome.restarted_ids, vec!["c1", "c2"]);
        assert_eq!(
            outcome.pull_error.as_deref(),
            Some("pull access denied for acme/app")
        );
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_restart_failure_does_not_stop_remaining_restarts() {
        let runtime = Arc::new(FakeRuntime {
            fail_restart: HashSet::from(["c1".to_string()]),
            ..FakeRuntime::with_containers(&[("c1", "acme/app"), ("c2", "acme/app")])
        });

        let outcome = reconciler(&runtime)
            .act(&notification("acme/app"))
            .await
            .unwrap();

        assert_eq!(runtime.restarts(), vec!["c1", "c2"]);
        assert_eq!(outcome.restarted_ids, vec!["c2"]);
        assert_eq!(outcome.matched_count, 2);
        assert_eq!(
            outcome.restart_errors.get("c1").map(String::as_str),
            Some("No such container: c1")
        );
        assert!(outcome.pull_error.is_none());
    }

    #[tokio::test]
    async fn test_runtime_unavailable_has_no_side_effects() {
        let runtime = Arc::new(FakeRuntime {
            unavailable: true,
            ..FakeRuntime::with_containers(&[("c1", "acme/app")])
        });

        let result = reconciler(&runtime).act(&notification("acme/app")).await;

        assert!(matches!(result, Err(ReconcileError::RuntimeUnavailable(_))));
        assert_eq!(runtime.calls(), vec![Call::List]);
    }

    #[tokio::test]
    async fn test_end_to_end_restarts_only_the_notified_image() {
        let runtime = Arc::new(FakeRuntime::with_containers(&[
            ("c1", "acme/app"),
            ("c2", "other/app"),
        ]));

        let outcome = reconciler(&runtime)
            .act(&notification("acme/app"))
            .await
            .unwrap();

        assert_eq!(runtime.pulls(), vec!["acme/app"]);
        assert_eq!(
            runtime.calls(),
            vec![
                Call::List,
                Call::Pull("acme/app".to_string()),
                Call::Restart("c1".to_string(), RESTART_TIMEOUT_SECONDS),
            ]
        );
        assert_eq!(
            outcome,
            ReconcileOutcome {
                image_reference: "acme/app".to_string(),
                matched_count: 1,
                restarted_ids: vec!["c1".to_string()],
                pull_error: None,
                restart_errors: BTreeMap::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_overlapping_notifications_act_independently() {
        let runtime = Arc::new(FakeRuntime::with_containers(&[
            ("c1", "acme/app"),
            ("c2", "acme/app"),
            ("c3", "other/app"),
        ]));
        let reconciler = reconciler(&runtime);
        let notification = notification("acme/app");

        let (first, second) = tokio::join!(
            reconciler.act(&notification),
            reconciler.act(&notification)
        );

        let first = first.unwrap();
        let second = second.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.restarted_ids, vec!["c1", "c2"]);

        let calls = runtime.calls();
        assert_eq!(calls.iter().filter(|call| **call == Call::List).count(), 2);
        assert_eq!(runtime.pulls(), vec!["acme/app", "acme/app"]);
        let restarts = runtime.restarts();
        assert_eq!(restarts.len(), 4);
        assert_eq!(restarts.iter().filter(|id| *id == "c1").count(), 2);
        assert_eq!(restarts.iter().filter(|id| *id == "c2").count(), 2);
        assert!(!restarts.contains(&"c3".to_string()));
    }

    #[test]
    fn test_runtime_unavailable_reports_cause_once() {
        let err = ReconcileError::RuntimeUnavailable(anyhow::anyhow!("connection refused"));
        assert_eq!(err.to_string(), "container runtime is unavailable");
        let source = std::error::Error::source(&err).expect("cause is exposed as source");
        assert_eq!(source.to_string(), "connection refused");
    }
}
