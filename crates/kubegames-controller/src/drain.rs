//! Drain protocol: ask a game server for permission before deleting its pod
//!
//! A ready game server is called over gRPC (`GameService/Delete`). It answers
//! `false` while players are still connected, in which case the pod is kept
//! and the caller retries later. When the call itself fails the pod is deleted
//! anyway: an unreachable server is treated as already gone.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tonic::transport::Endpoint;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use kubegames_common::crd::Game;
use kubegames_common::Error;
use kubegames_proto::game_service_client::GameServiceClient;
use kubegames_proto::DeleteRequest;

use crate::client::ClusterClient;

/// Asks a game server whether it may be terminated
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DrainClient: Send + Sync {
    /// Call the server at `address` (`host:port`) for `game_id`
    ///
    /// `Ok(true)` allows termination, `Ok(false)` refuses it for now; `Err`
    /// reports a transport or RPC failure.
    async fn request_termination(&self, address: &str, game_id: &str) -> Result<bool, Error>;
}

/// [`DrainClient`] dialling the game server over plaintext gRPC for every call
#[derive(Clone, Debug)]
pub struct GrpcDrainClient {
    timeout: Duration,
}

impl GrpcDrainClient {
    /// Client bounding both connect and call by `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl DrainClient for GrpcDrainClient {
    async fn request_termination(&self, address: &str, game_id: &str) -> Result<bool, Error> {
        let endpoint = Endpoint::from_shared(format!("http://{address}"))
            .map_err(|e| Error::drain(address, e.to_string()))?
            .connect_timeout(self.timeout)
            .timeout(self.timeout);
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| Error::drain(address, e.to_string()))?;

        let response = GameServiceClient::new(channel)
            .delete(DeleteRequest {
                game_id: game_id.to_string(),
            })
            .await
            .map_err(|status| Error::drain(address, status.message()))?;

        Ok(response.into_inner().success)
    }
}

/// Whether a pod is running, not being deleted, and has all containers ready
pub fn is_pod_ready(pod: &Pod) -> bool {
    if pod.metadata.deletion_timestamp.is_some() {
        return false;
    }
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }
    status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == "ContainersReady" && c.status == "True")
}

/// Drain and delete one game server pod
///
/// Ready pods are asked first; a refusal returns [`Error::DrainPending`] and
/// leaves the pod in place. Events recorded against the pod are removed on a
/// best-effort basis before the pod itself is deleted.
pub async fn drain_pod(
    cluster: &dyn ClusterClient,
    drain: &dyn DrainClient,
    pod: &Pod,
    game: &Game,
) -> Result<(), Error> {
    let name = pod.name_any();
    let namespace = pod.namespace().unwrap_or_default();

    if is_pod_ready(pod) {
        match pod.status.as_ref().and_then(|s| s.pod_ip.as_deref()) {
            Some(ip) => {
                let address = format!("{ip}:{}", game.spec.port);
                match drain.request_termination(&address, game.game_id()).await {
                    Ok(true) => debug!(pod = %name, "game server allowed termination"),
                    Ok(false) => return Err(Error::drain_pending(name)),
                    Err(e) => {
                        warn!(pod = %name, error = %e, "drain call failed, deleting anyway")
                    }
                }
            }
            None => warn!(pod = %name, "ready pod has no IP, deleting without drain call"),
        }
    }

    if let Err(e) = cluster.delete_pod_events(&namespace, &name).await {
        warn!(pod = %name, error = %e, "failed to delete pod events");
    }
    cluster.delete_pod(&namespace, &name).await?;
    info!(pod = %name, namespace = %namespace, "deleted game server pod");
    Ok(())
}
