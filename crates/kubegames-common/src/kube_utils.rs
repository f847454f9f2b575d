//! Shared Kubernetes helpers using kube-rs
//!
//! Client construction and classification of API errors. Reconcilers treat
//! "already exists" on create and "not found" on delete as success, so the
//! checks live here instead of being repeated at every call site.

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::Error;

/// Default connect timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
///
/// Applies to watch responses too: a watch idle for longer than this fails
/// with "body read timed out", so every watcher must ask the API server for a
/// shorter timeout (`watcher::Config::timeout`).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from optional kubeconfig path with default timeouts
///
/// Without a path the configuration is inferred: in-cluster service account
/// first, then `$KUBECONFIG` / `~/.kube/config`.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Whether the API server answered 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Whether a create was rejected because the object already exists
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists")
}

/// Whether a write lost an optimistic-concurrency race (stale resourceVersion)
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason != "AlreadyExists")
}

/// Map a create result so that "already exists" counts as success
pub fn ok_if_exists<T>(result: Result<T, kube::Error>) -> Result<Option<T>, Error> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if is_already_exists(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Map a get/delete result so that "not found" counts as success
pub fn ok_if_missing<T>(result: Result<T, kube::Error>) -> Result<Option<T>, Error> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
