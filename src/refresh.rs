use std::sync::Arc;

use log::{debug, info, warn};

use crate::aggregate::{Aggregator, PipelineRecord, StatePriorities, StepRecord, TieBreakPolicy};
use crate::auth::CredentialStore;
use crate::error::Result;
use crate::providers::BitbucketClient;
use crate::snapshot::Snapshot;
use crate::store::SnapshotStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshState {
    Idle,
    Refreshing,
}

/// What a trigger call amounted to.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// A full cycle ran and the saved snapshot was replaced.
    Completed(Snapshot),
    /// A refresh was already in flight; this trigger was dropped.
    Skipped,
}

/// Orchestrates one fetch, aggregate and save pass at a time.
///
/// At most one refresh runs concurrently; triggers arriving while one is in
/// flight are dropped, not queued. A cycle either completes in full and
/// replaces the stored snapshot, or fails in full and leaves it untouched;
/// partial aggregates are never saved. Auth failures additionally
/// invalidate the shared credential so the caller can re-prompt. There is
/// no retry or backoff here; the caller's periodic timer is the sole retry
/// mechanism.
pub struct RefreshLoop {
    client: BitbucketClient,
    store: SnapshotStore,
    credentials: Arc<CredentialStore>,
    policy: TieBreakPolicy,
    priorities: StatePriorities,
    min_step_duration: f64,
    state: RefreshState,
}

impl RefreshLoop {
    pub fn new(
        client: BitbucketClient,
        store: SnapshotStore,
        credentials: Arc<CredentialStore>,
        policy: TieBreakPolicy,
        priorities: StatePriorities,
        min_step_duration: f64,
    ) -> Self {
        Self {
            client,
            store,
            credentials,
            policy,
            priorities,
            min_step_duration,
            state: RefreshState::Idle,
        }
    }

    /// The snapshot left behind by the last completed cycle, if any.
    pub fn cached(&self) -> Option<Snapshot> {
        self.store.load()
    }

    /// Runs one refresh cycle unless one is already in flight.
    ///
    /// # Errors
    ///
    /// Propagates the first failure of the cycle. The stored snapshot is
    /// left as it was; on auth failures the credential is invalidated
    /// before returning.
    pub async fn trigger_refresh(&mut self) -> Result<RefreshOutcome> {
        if self.state == RefreshState::Refreshing {
            debug!("Refresh already in flight, dropping trigger");
            return Ok(RefreshOutcome::Skipped);
        }

        self.state = RefreshState::Refreshing;
        let result = self.run_cycle().await;
        self.state = RefreshState::Idle;

        match result {
            Ok(snapshot) => {
                self.store.save(&snapshot)?;
                info!(
                    "Refresh completed: {} branches aggregated",
                    snapshot.branches.len()
                );
                Ok(RefreshOutcome::Completed(snapshot))
            }
            Err(e) => {
                if e.is_auth() {
                    warn!("Credential rejected during refresh");
                    self.credentials.invalidate();
                }
                Err(e)
            }
        }
    }

    async fn run_cycle(&self) -> Result<Snapshot> {
        let numbers = self.client.list_recent_pipelines().await?;
        info!("Refreshing {} pipelines...", numbers.len());

        // Fan out all per-pipeline fetches at once; the cycle completes
        // only when every one of them has settled.
        let fetches: Vec<_> = numbers
            .iter()
            .map(|&number| self.client.fetch_pipeline_with_steps(number))
            .collect();

        let results = futures::future::join_all(fetches).await;

        // One failure aborts the whole cycle; partial batches never reach
        // the fold.
        let mut batch: Vec<(PipelineRecord, Vec<StepRecord>)> =
            results.into_iter().collect::<Result<_>>()?;

        // The fold is the sole writer of the snapshot under construction,
        // and visits pipelines in ascending number order so the outcome is
        // independent of fetch completion order.
        batch.sort_by_key(|(pipeline, _)| pipeline.number);

        let mut aggregator = Aggregator::new(
            self.policy,
            self.priorities.clone(),
            self.min_step_duration,
        );
        for (pipeline, steps) in &batch {
            aggregator.fold(pipeline, steps);
        }

        Ok(aggregator.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Token;
    use crate::snapshot::{BranchAggregate, StepState};
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    struct Fixture {
        dir: TempDir,
        credentials: Arc<CredentialStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                credentials: Arc::new(CredentialStore::new(Some(Token::from("c2VjcmV0")))),
            }
        }

        fn refresh_loop(&self, server: &mockito::Server) -> RefreshLoop {
            let client = BitbucketClient::new(
                &server.url(),
                "acme".to_string(),
                "widgets".to_string(),
                Arc::clone(&self.credentials),
                100,
            )
            .unwrap();
            let store = SnapshotStore::at_path(self.dir.path().join("acme-widgets.json"));

            RefreshLoop::new(
                client,
                store,
                Arc::clone(&self.credentials),
                TieBreakPolicy::RecencyOnTie,
                StatePriorities::default(),
                120.0,
            )
        }
    }

    async fn mock_pipeline(
        server: &mut mockito::Server,
        number: u64,
        branch: Option<&str>,
        step_body: &str,
    ) {
        let target = match branch {
            Some(name) => format!(r#"{{"ref_name": "{name}"}}"#),
            None => "{}".to_string(),
        };
        server
            .mock("GET", format!("/repositories/acme/widgets/pipelines/{number}").as_str())
            .with_status(200)
            .with_body(format!(r#"{{"build_number": {number}, "target": {target}}}"#))
            .create_async()
            .await;
        server
            .mock(
                "GET",
                format!("/repositories/acme/widgets/pipelines/{number}/steps/").as_str(),
            )
            .with_status(200)
            .with_body(format!(r#"{{"values": [{step_body}]}}"#))
            .create_async()
            .await;
    }

    fn step_body(name: &str, duration: u64, result: &str) -> String {
        format!(
            r#"{{"name": "{name}", "duration_in_seconds": {duration},
                 "state": {{"name": "COMPLETED", "result": {{"name": "{result}"}}}}}}"#
        )
    }

    #[tokio::test]
    async fn test_full_cycle_aggregates_and_saves() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repositories/acme/widgets/pipelines/")
            .with_status(200)
            .with_body(r#"{"size": 3}"#)
            .create_async()
            .await;
        mock_pipeline(&mut server, 1, Some("main"), &step_body("build", 200, "SUCCESSFUL")).await;
        mock_pipeline(&mut server, 2, Some("main"), &step_body("build", 200, "FAILED")).await;
        mock_pipeline(&mut server, 3, None, &step_body("build", 200, "SUCCESSFUL")).await;

        let fixture = Fixture::new();
        let mut refresh = fixture.refresh_loop(&server);

        let outcome = assert_ok!(refresh.trigger_refresh().await);
        let RefreshOutcome::Completed(snapshot) = outcome else {
            panic!("expected a completed cycle");
        };

        // Branchless pipeline 3 contributes nothing.
        assert_eq!(snapshot.branches.len(), 1);
        let branch = &snapshot.branches["main"];
        assert_eq!(branch.last_pipeline_number, 2);
        assert_eq!(branch.steps["build"].state, StepState::Failed);
        assert_eq!(branch.steps["build"].origin_pipeline, 2);

        // The saved snapshot matches what the cycle produced.
        assert_eq!(refresh.cached().unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_auth_failure_among_fetches_invalidates_and_saves_nothing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repositories/acme/widgets/pipelines/")
            .with_status(200)
            .with_body(r#"{"size": 2}"#)
            .create_async()
            .await;
        mock_pipeline(&mut server, 2, Some("main"), &step_body("build", 200, "SUCCESSFUL")).await;
        server
            .mock("GET", "/repositories/acme/widgets/pipelines/1")
            .with_status(403)
            .with_body(r#"{"error": {"message": "Access denied"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/repositories/acme/widgets/pipelines/1/steps/")
            .with_status(403)
            .with_body(r#"{"error": {"message": "Access denied"}}"#)
            .create_async()
            .await;

        let fixture = Fixture::new();

        // A snapshot from an earlier cycle is already stored; the failed
        // cycle must leave it exactly as it was.
        let mut seeded = Snapshot::new();
        seeded.branches.insert(
            "develop".to_string(),
            BranchAggregate::new("develop".to_string(), 99),
        );
        SnapshotStore::at_path(fixture.dir.path().join("acme-widgets.json"))
            .save(&seeded)
            .unwrap();

        let mut refresh = fixture.refresh_loop(&server);

        let err = refresh.trigger_refresh().await.unwrap_err();
        assert!(err.is_auth());
        assert_eq!(refresh.cached().unwrap(), seeded);
        assert!(fixture.credentials.get().is_none());
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_credential_and_snapshot_alone() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repositories/acme/widgets/pipelines/")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let fixture = Fixture::new();
        let mut refresh = fixture.refresh_loop(&server);

        let err = refresh.trigger_refresh().await.unwrap_err();
        assert!(!err.is_auth());
        assert!(refresh.cached().is_none());
        assert!(fixture.credentials.get().is_some());
    }

    #[tokio::test]
    async fn test_trigger_while_refreshing_is_dropped() {
        let server = mockito::Server::new_async().await;
        let fixture = Fixture::new();
        let mut refresh = fixture.refresh_loop(&server);

        refresh.state = RefreshState::Refreshing;
        let outcome = refresh.trigger_refresh().await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Skipped));
    }
}
