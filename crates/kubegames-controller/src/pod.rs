//! Pod reconciler
//!
//! Projects managed pods into their Game's status: a ready pod gets an entry
//! under its name, a deleted pod loses it. Every status write changes the
//! Game's resource version, which queues the Game for another pass.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use kubegames_common::crd::{game_id_from_pod_name, PodStatus};
use kubegames_common::{Error, LABEL_GAME_ID};
use kubegames_runtime::{ObjectKey, Reconciler};

use crate::context::Context;
use crate::drain::is_pod_ready;

/// Reconciles managed pods
pub struct PodReconciler {
    ctx: Arc<Context>,
}

impl PodReconciler {
    /// Reconciler using `ctx` for all cluster access
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// One reconcile pass for the pod identified by `key`
    #[instrument(skip(self, key), fields(pod = %key.name, namespace = %key.namespace))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<(), Error> {
        match self.ctx.cluster.get_pod(&key.namespace, &key.name).await? {
            None => self.pod_removed(key).await,
            Some(pod) => self.pod_changed(&pod).await,
        }
    }

    async fn pod_removed(&self, key: &ObjectKey) -> Result<(), Error> {
        let Some(game_id) = game_id_from_pod_name(&key.name) else {
            warn!("pod name does not follow <gameID>-<ordinal>, ignoring");
            return Ok(());
        };
        let Some(mut game) = self.ctx.cluster.get_game(&key.namespace, game_id).await? else {
            debug!(game = %game_id, "owning game is gone");
            return Ok(());
        };
        if game.is_terminating() {
            return Ok(());
        }

        let Some(status) = game.status.as_mut() else {
            return Ok(());
        };
        if status.pods.remove(&key.name).is_none() {
            debug!(game = %game_id, "pod was not recorded in status");
            return Ok(());
        }
        status.update_at = Some(chrono::Utc::now().to_rfc3339());

        self.ctx.cluster.replace_game_status(&game).await?;
        info!(game = %game_id, "removed pod from game status");
        Ok(())
    }

    async fn pod_changed(&self, pod: &Pod) -> Result<(), Error> {
        if !is_pod_ready(pod) {
            debug!("pod not ready");
            return Ok(());
        }
        let Some(game_id) = pod.labels().get(LABEL_GAME_ID).cloned() else {
            warn!("managed pod has no gameid label");
            return Ok(());
        };
        let namespace = pod.namespace().unwrap_or_default();
        let Some(mut game) = self.ctx.cluster.get_game(&namespace, &game_id).await? else {
            debug!(game = %game_id, "owning game not found");
            return Ok(());
        };

        let name = pod.name_any();
        let events = self.ctx.cluster.list_pod_events(&namespace, &name).await?;
        let observed = pod.status.as_ref();
        let entry = PodStatus {
            name: name.clone(),
            host_ip: observed.and_then(|s| s.host_ip.clone()).unwrap_or_default(),
            pod_ip: observed.and_then(|s| s.pod_ip.clone()).unwrap_or_default(),
            port: game.spec.port,
            phase: observed.and_then(|s| s.phase.clone()).unwrap_or_default(),
            events,
        };

        let status = game.status_mut();
        status.pods.insert(name, entry);
        status.update_at = Some(chrono::Utc::now().to_rfc3339());

        self.ctx.cluster.replace_game_status(&game).await?;
        info!(game = %game_id, "recorded ready pod in game status");
        Ok(())
    }
}

#[async_trait]
impl Reconciler for PodReconciler {
    fn name(&self) -> &'static str {
        "pod"
    }

    async fn sync(&self, key: &ObjectKey) -> Result<(), Error> {
        self.reconcile(key).await
    }
}
