//! Cluster operations used by the reconcilers
//!
//! The reconcilers only talk to the API server through [`ClusterClient`], so
//! unit tests can substitute a mock and integration tests an in-memory fake.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod};
use k8s_openapi::api::events::v1::Event;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use kubegames_common::crd::Game;
use kubegames_common::kube_utils::{ok_if_exists, ok_if_missing};
use kubegames_common::{Error, FIELD_MANAGER, LABEL_CONTROLLER, LABEL_CONTROLLER_VALUE, LABEL_GAME_ID};

/// Trait abstracting the Kubernetes API for the Game and Pod reconcilers
///
/// Creates treat "already exists" as success and deletes treat "not found" as
/// success; every other API failure is returned.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch a Game, `None` if it does not exist
    async fn get_game(&self, namespace: &str, name: &str) -> Result<Option<Game>, Error>;

    /// Replace a Game (metadata and spec), guarded by its resourceVersion
    async fn replace_game(&self, game: &Game) -> Result<(), Error>;

    /// Replace a Game's status subresource, guarded by its resourceVersion
    async fn replace_game_status(&self, game: &Game) -> Result<(), Error>;

    /// Create the namespace unless it already exists
    async fn ensure_namespace(&self, name: &str) -> Result<(), Error>;

    /// Create the config map unless one with the same name already exists
    ///
    /// An existing config map is left untouched.
    async fn ensure_config_map(&self, config_map: &ConfigMap) -> Result<(), Error>;

    /// Delete a config map
    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Fetch a pod, `None` if it does not exist
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error>;

    /// List the pods labelled with the given GameID
    async fn list_game_pods(&self, namespace: &str, game_id: &str) -> Result<Vec<Pod>, Error>;

    /// Create a pod
    async fn create_pod(&self, pod: &Pod) -> Result<(), Error>;

    /// Delete a pod
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Notes of the events recorded against a pod, in list order
    async fn list_pod_events(&self, namespace: &str, pod: &str) -> Result<Vec<String>, Error>;

    /// Delete every event recorded against a pod
    async fn delete_pod_events(&self, namespace: &str, pod: &str) -> Result<(), Error>;
}

/// [`ClusterClient`] backed by a kube-rs client
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn games(&self, namespace: &str) -> Api<Game> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn events(&self, namespace: &str) -> Api<Event> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

fn regarding(pod: &str) -> ListParams {
    ListParams::default().fields(&format!("regarding.name={pod}"))
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_game(&self, namespace: &str, name: &str) -> Result<Option<Game>, Error> {
        Ok(self.games(namespace).get_opt(name).await?)
    }

    async fn replace_game(&self, game: &Game) -> Result<(), Error> {
        let namespace = game.namespace().unwrap_or_default();
        self.games(&namespace)
            .replace(&game.name_any(), &post_params(), game)
            .await?;
        Ok(())
    }

    async fn replace_game_status(&self, game: &Game) -> Result<(), Error> {
        let namespace = game.namespace().unwrap_or_default();
        self.games(&namespace)
            .replace_status(&game.name_any(), &post_params(), serde_json::to_vec(game)?)
            .await?;
        Ok(())
    }

    async fn ensure_namespace(&self, name: &str) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        if api.get_opt(name).await?.is_some() {
            debug!(namespace = %name, "namespace already exists");
            return Ok(());
        }

        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    LABEL_CONTROLLER.to_string(),
                    LABEL_CONTROLLER_VALUE.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };

        info!(namespace = %name, "creating namespace");
        ok_if_exists(api.create(&post_params(), &ns).await)?;
        Ok(())
    }

    async fn ensure_config_map(&self, config_map: &ConfigMap) -> Result<(), Error> {
        let namespace = config_map.namespace().unwrap_or_default();
        let name = config_map.name_any();
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &namespace);
        if api.get_opt(&name).await?.is_some() {
            return Ok(());
        }

        info!(namespace = %namespace, config_map = %name, "creating config map");
        ok_if_exists(api.create(&post_params(), config_map).await)?;
        Ok(())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        if ok_if_missing(api.delete(name, &DeleteParams::default()).await)?.is_some() {
            info!(namespace = %namespace, config_map = %name, "deleted config map");
        }
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error> {
        Ok(self.pods(namespace).get_opt(name).await?)
    }

    async fn list_game_pods(&self, namespace: &str, game_id: &str) -> Result<Vec<Pod>, Error> {
        let params = ListParams::default().labels(&format!("{LABEL_GAME_ID}={game_id}"));
        Ok(self.pods(namespace).list(&params).await?.items)
    }

    async fn create_pod(&self, pod: &Pod) -> Result<(), Error> {
        let namespace = pod.namespace().unwrap_or_default();
        ok_if_exists(self.pods(&namespace).create(&post_params(), pod).await)?;
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error> {
        ok_if_missing(self.pods(namespace).delete(name, &DeleteParams::default()).await)?;
        Ok(())
    }

    async fn list_pod_events(&self, namespace: &str, pod: &str) -> Result<Vec<String>, Error> {
        let events = self.events(namespace).list(&regarding(pod)).await?;
        Ok(events
            .items
            .into_iter()
            .map(|event| event.note.unwrap_or_default())
            .collect())
    }

    async fn delete_pod_events(&self, namespace: &str, pod: &str) -> Result<(), Error> {
        ok_if_missing(
            self.events(namespace)
                .delete_collection(&DeleteParams::default(), &regarding(pod))
                .await,
        )?;
        Ok(())
    }
}
