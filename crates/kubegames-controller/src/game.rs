//! Game reconciler
//!
//! Each pass moves a Game at most one pod closer to `spec.replicas`:
//!
//! ```text
//!   status.pods < replicas  ->  create pod <gameID>-<count>
//!   status.pods > replicas  ->  drain + delete pod <gameID>-<count-1>
//!   status.pods = replicas  ->  nothing
//! ```
//!
//! The count is taken from status, not from the live pods, so a new pod is
//! only created once the previous one is ready and recorded by the Pod
//! reconciler. That status write re-queues the Game.
//!
//! A Game being deleted keeps its finalizer until every pod labelled with its
//! GameID has been drained and deleted.

use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use kubegames_common::crd::Game;
use kubegames_common::Error;
use kubegames_runtime::{ObjectKey, Reconciler};

use crate::context::Context;
use crate::drain::drain_pod;
use crate::manifests::{build_config_map, build_pod};

/// Reconciles Game resources
pub struct GameReconciler {
    ctx: Arc<Context>,
}

impl GameReconciler {
    /// Reconciler using `ctx` for all cluster access
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// One reconcile pass for the Game identified by `key`
    #[instrument(skip(self, key), fields(game = %key.name, namespace = %key.namespace))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<(), Error> {
        let Some(game) = self.ctx.cluster.get_game(&key.namespace, &key.name).await? else {
            // The config map is named after the GameID, which matches the Game's name
            debug!("game is gone, removing its config map");
            return self
                .ctx
                .cluster
                .delete_config_map(&key.namespace, &key.name)
                .await;
        };

        if game.is_terminating() {
            return self.finalize(&game).await;
        }
        self.scale(&game).await
    }

    async fn scale(&self, game: &Game) -> Result<(), Error> {
        let desired = game.spec.replicas;
        let actual = game.pod_count();
        if actual == desired {
            debug!(replicas = desired, "game is at desired scale");
            return Ok(());
        }

        let cluster = &self.ctx.cluster;
        let namespace = game.namespace().unwrap_or_default();
        cluster.ensure_namespace(&namespace).await?;
        cluster.ensure_config_map(&build_config_map(game)).await?;

        if actual < desired {
            let pod_name = game.pod_name(actual);
            info!(pod = %pod_name, actual, desired, "scaling up");
            return cluster.create_pod(&build_pod(game, &pod_name)?).await;
        }

        let pod_name = game.pod_name(actual - 1);
        info!(pod = %pod_name, actual, desired, "scaling down");
        match cluster.get_pod(&namespace, &pod_name).await? {
            Some(pod) => drain_pod(cluster.as_ref(), self.ctx.drain.as_ref(), &pod, game).await,
            None => self.prune_status_entry(game, &pod_name).await,
        }
    }

    /// Drop a status entry whose pod no longer exists
    async fn prune_status_entry(&self, game: &Game, pod_name: &str) -> Result<(), Error> {
        let mut updated = game.clone();
        let status = updated.status_mut();
        if status.pods.remove(pod_name).is_none() {
            warn!(pod = %pod_name, "scale-down target is neither running nor recorded in status");
            return Ok(());
        }
        status.update_at = Some(chrono::Utc::now().to_rfc3339());
        info!(pod = %pod_name, "pruning status entry of missing pod");
        self.ctx.cluster.replace_game_status(&updated).await
    }

    async fn finalize(&self, game: &Game) -> Result<(), Error> {
        if !game.has_finalizer() {
            debug!("game is terminating without finalizer");
            return Ok(());
        }

        let namespace = game.namespace().unwrap_or_default();
        let cluster = &self.ctx.cluster;
        let pods = cluster.list_game_pods(&namespace, game.game_id()).await?;
        if pods.is_empty() {
            let mut updated = game.clone();
            updated.remove_finalizer();
            cluster.replace_game(&updated).await?;
            info!("all pods closed, finalizer removed");
            return Ok(());
        }

        for pod in &pods {
            if let Err(e) = drain_pod(cluster.as_ref(), self.ctx.drain.as_ref(), pod, game).await {
                warn!(pod = %pod.name_any(), error = %e, "failed to close pod");
            }
        }
        Err(Error::pods_remaining(game.name_any(), pods.len()))
    }
}

#[async_trait]
impl Reconciler for GameReconciler {
    fn name(&self) -> &'static str {
        "game"
    }

    async fn sync(&self, key: &ObjectKey) -> Result<(), Error> {
        self.reconcile(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterClient;
    use crate::drain::MockDrainClient;
    use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus as K8sPodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;
    use kubegames_common::crd::{GameSpec, GameStatus, PodStatus};
    use kubegames_common::GAME_FINALIZER;
    use mockall::predicate::eq;
    use parking_lot::Mutex;

    // ===== Test Fixture Helpers =====

    fn key() -> ObjectKey {
        ObjectKey::new("games", "poker")
    }

    fn game(replicas: u32, recorded: u32) -> Game {
        let mut game = Game::new(
            "poker",
            GameSpec {
                game_id: "poker".to_string(),
                image: "kubegames/poker:1.0".to_string(),
                port: 8080,
                replicas,
                ..Default::default()
            },
        );
        game.metadata.namespace = Some("games".to_string());
        game.metadata.resource_version = Some("7".to_string());
        game.add_finalizer();
        if recorded > 0 {
            let mut status = GameStatus::default();
            for ordinal in 0..recorded {
                let name = game.pod_name(ordinal);
                status.pods.insert(
                    name.clone(),
                    PodStatus {
                        name,
                        phase: "Running".to_string(),
                        ..Default::default()
                    },
                );
            }
            game.status = Some(status);
        }
        game
    }

    fn terminating(mut game: Game) -> Game {
        game.metadata.deletion_timestamp =
            Some(serde_json::from_value::<Time>(serde_json::json!("2024-05-01T10:00:00Z")).unwrap());
        game
    }

    fn ready_pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("games".to_string()),
                ..Default::default()
            },
            status: Some(K8sPodStatus {
                phase: Some("Running".to_string()),
                pod_ip: Some("10.1.0.9".to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "ContainersReady".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn reconciler(cluster: MockClusterClient, drain: MockDrainClient) -> GameReconciler {
        GameReconciler::new(Arc::new(Context::from_parts(
            Arc::new(cluster),
            Arc::new(drain),
        )))
    }

    fn returning_game(cluster: &mut MockClusterClient, game: Game) {
        cluster
            .expect_get_game()
            .with(eq("games"), eq("poker"))
            .returning(move |_, _| Ok(Some(game.clone())));
    }

    fn ensures_prerequisites(cluster: &mut MockClusterClient) {
        cluster
            .expect_ensure_namespace()
            .with(eq("games"))
            .times(1)
            .returning(|_| Ok(()));
        cluster
            .expect_ensure_config_map()
            .withf(|cm| cm.metadata.name.as_deref() == Some("poker"))
            .times(1)
            .returning(|_| Ok(()));
    }

    // ===== Scaling Tests =====

    /// Story: a Game already at its desired size costs no API writes at all
    #[tokio::test]
    async fn story_converged_game_is_left_alone() {
        let mut cluster = MockClusterClient::new();
        returning_game(&mut cluster, game(2, 2));
        cluster.expect_ensure_namespace().never();
        cluster.expect_ensure_config_map().never();
        cluster.expect_create_pod().never();
        cluster.expect_delete_pod().never();
        cluster.expect_replace_game_status().never();

        reconciler(cluster, MockDrainClient::new())
            .reconcile(&key())
            .await
            .unwrap();
    }

    /// Story: scaling up creates exactly one pod, at the next free ordinal
    #[tokio::test]
    async fn story_scale_up_creates_next_ordinal() {
        let mut cluster = MockClusterClient::new();
        returning_game(&mut cluster, game(3, 1));
        ensures_prerequisites(&mut cluster);
        cluster
            .expect_create_pod()
            .withf(|pod| pod.metadata.name.as_deref() == Some("poker-1"))
            .times(1)
            .returning(|_| Ok(()));

        reconciler(cluster, MockDrainClient::new())
            .reconcile(&key())
            .await
            .unwrap();
    }

    /// Story: scaling down drains the highest ordinal first
    #[tokio::test]
    async fn story_scale_down_drains_highest_ordinal() {
        let mut cluster = MockClusterClient::new();
        returning_game(&mut cluster, game(1, 3));
        ensures_prerequisites(&mut cluster);
        cluster
            .expect_get_pod()
            .with(eq("games"), eq("poker-2"))
            .returning(|_, name| Ok(Some(ready_pod(name))));
        cluster.expect_delete_pod_events().returning(|_, _| Ok(()));
        cluster
            .expect_delete_pod()
            .with(eq("games"), eq("poker-2"))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut drain = MockDrainClient::new();
        drain
            .expect_request_termination()
            .with(eq("10.1.0.9:8080"), eq("poker"))
            .times(1)
            .returning(|_, _| Ok(true));

        reconciler(cluster, drain).reconcile(&key()).await.unwrap();
    }

    #[tokio::test]
    async fn scale_down_waits_while_server_refuses() {
        let mut cluster = MockClusterClient::new();
        returning_game(&mut cluster, game(0, 1));
        ensures_prerequisites(&mut cluster);
        cluster
            .expect_get_pod()
            .returning(|_, name| Ok(Some(ready_pod(name))));
        cluster.expect_delete_pod().never();

        let mut drain = MockDrainClient::new();
        drain
            .expect_request_termination()
            .returning(|_, _| Ok(false));

        let err = reconciler(cluster, drain)
            .reconcile(&key())
            .await
            .unwrap_err();
        assert!(err.is_waiting());
    }

    #[tokio::test]
    async fn scale_down_prunes_entry_of_missing_pod() {
        let written = Arc::new(Mutex::new(None));
        let capture = Arc::clone(&written);

        let mut cluster = MockClusterClient::new();
        returning_game(&mut cluster, game(1, 2));
        ensures_prerequisites(&mut cluster);
        cluster.expect_get_pod().returning(|_, _| Ok(None));
        cluster
            .expect_replace_game_status()
            .times(1)
            .returning(move |game| {
                *capture.lock() = Some(game.clone());
                Ok(())
            });

        reconciler(cluster, MockDrainClient::new())
            .reconcile(&key())
            .await
            .unwrap();

        let written = written.lock().clone().unwrap();
        let status = written.status.unwrap();
        assert_eq!(status.pods.keys().collect::<Vec<_>>(), vec!["poker-0"]);
        assert!(status.update_at.is_some());
        assert_eq!(written.metadata.resource_version.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn prerequisite_failure_fails_the_pass() {
        let mut cluster = MockClusterClient::new();
        returning_game(&mut cluster, game(1, 0));
        cluster
            .expect_ensure_namespace()
            .returning(|_| Err(Error::internal_with_context("test", "api down")));
        cluster.expect_create_pod().never();

        assert!(reconciler(cluster, MockDrainClient::new())
            .reconcile(&key())
            .await
            .is_err());
    }

    // ===== Deletion Tests =====

    #[tokio::test]
    async fn vanished_game_removes_config_map() {
        let mut cluster = MockClusterClient::new();
        cluster.expect_get_game().returning(|_, _| Ok(None));
        cluster
            .expect_delete_config_map()
            .with(eq("games"), eq("poker"))
            .times(1)
            .returning(|_, _| Ok(()));

        reconciler(cluster, MockDrainClient::new())
            .reconcile(&key())
            .await
            .unwrap();
    }

    /// Story: a deleted Game keeps its finalizer while pods remain, draining
    /// all of them, and asks to be retried
    #[tokio::test]
    async fn story_deletion_drains_pods_and_keeps_finalizer() {
        let mut cluster = MockClusterClient::new();
        returning_game(&mut cluster, terminating(game(2, 2)));
        cluster
            .expect_list_game_pods()
            .with(eq("games"), eq("poker"))
            .returning(|_, _| Ok(vec![ready_pod("poker-0"), ready_pod("poker-1")]));
        cluster.expect_delete_pod_events().returning(|_, _| Ok(()));
        cluster.expect_delete_pod().times(2).returning(|_, _| Ok(()));
        cluster.expect_replace_game().never();

        let mut drain = MockDrainClient::new();
        drain
            .expect_request_termination()
            .times(2)
            .returning(|_, _| Ok(true));

        let err = reconciler(cluster, drain)
            .reconcile(&key())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PodsRemaining { remaining: 2, .. }));
    }

    #[tokio::test]
    async fn deletion_tolerates_individual_drain_failures() {
        let mut cluster = MockClusterClient::new();
        returning_game(&mut cluster, terminating(game(2, 2)));
        cluster
            .expect_list_game_pods()
            .returning(|_, _| Ok(vec![ready_pod("poker-0"), ready_pod("poker-1")]));
        cluster.expect_delete_pod_events().returning(|_, _| Ok(()));
        cluster
            .expect_delete_pod()
            .with(eq("games"), eq("poker-1"))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut drain = MockDrainClient::new();
        drain
            .expect_request_termination()
            .returning(|_, _| Ok(false))
            .times(1);
        drain
            .expect_request_termination()
            .returning(|_, _| Ok(true))
            .times(1);

        let err = reconciler(cluster, drain)
            .reconcile(&key())
            .await
            .unwrap_err();
        assert!(err.is_waiting());
    }

    /// Story: once no pods remain the finalizer is removed so the API server
    /// can delete the Game
    #[tokio::test]
    async fn story_finalizer_removed_when_no_pods_remain() {
        let mut cluster = MockClusterClient::new();
        returning_game(&mut cluster, terminating(game(2, 0)));
        cluster.expect_list_game_pods().returning(|_, _| Ok(vec![]));
        cluster
            .expect_replace_game()
            .withf(|game| !game.finalizers().iter().any(|f| f == GAME_FINALIZER))
            .times(1)
            .returning(|_| Ok(()));

        reconciler(cluster, MockDrainClient::new())
            .reconcile(&key())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn terminating_game_without_finalizer_is_ignored() {
        let mut doomed = terminating(game(2, 2));
        doomed.remove_finalizer();

        let mut cluster = MockClusterClient::new();
        returning_game(&mut cluster, doomed);
        cluster.expect_list_game_pods().never();
        cluster.expect_replace_game().never();

        reconciler(cluster, MockDrainClient::new())
            .reconcile(&key())
            .await
            .unwrap();
    }
}
