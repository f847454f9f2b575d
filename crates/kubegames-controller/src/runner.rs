//! Wiring of informers, queues and worker pools for both reconcilers

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::runtime::watcher;
use kube::Client;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use kubegames_common::crd::Game;
use kubegames_common::{Error, MANAGED_LABEL_SELECTOR};
use kubegames_runtime::informer::wait_for_cache_sync;
use kubegames_runtime::{Informer, WorkQueue, WorkerPool};

use crate::config::ControllerConfig;
use crate::context::Context;
use crate::game::GameReconciler;
use crate::pod::PodReconciler;

/// Watcher timeout (seconds); must stay below the client read timeout so the
/// API server closes idle watches before the client gives up on them
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Watch settings for Games
pub fn game_watch_config() -> watcher::Config {
    watcher::Config::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Watch settings for managed pods
pub fn pod_watch_config() -> watcher::Config {
    watcher::Config::default()
        .labels(MANAGED_LABEL_SELECTOR)
        .timeout(WATCH_TIMEOUT_SECS)
}

/// Run the Game and Pod reconcilers until `shutdown` fires
///
/// Workers start only after both caches have synced; a sync that does not
/// finish within `config.cache_sync_timeout` is returned as an error, unless
/// shutdown was requested meanwhile. On shutdown the watches stop, queued
/// keys are drained and this returns once every worker has exited.
pub async fn run_controllers(
    client: Client,
    config: ControllerConfig,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    let ctx = Arc::new(Context::new(client.clone(), &config));
    let stop = shutdown.child_token();

    let game_queue = WorkQueue::new();
    let pod_queue = WorkQueue::new();

    let games = Informer::new(
        "games",
        Api::<Game>::all(client.clone()),
        game_watch_config(),
    );
    let pods = Informer::new(
        "pods",
        Api::<Pod>::all(client),
        pod_watch_config(),
    );
    let game_store = games.reader();
    let pod_store = pods.reader();

    let mut tasks = JoinSet::new();
    tasks.spawn(games.run(game_queue.clone(), stop.clone()));
    tasks.spawn(pods.run(pod_queue.clone(), stop.clone()));

    let synced = tokio::select! {
        result = async {
            tokio::try_join!(
                wait_for_cache_sync("games", &game_store, config.cache_sync_timeout),
                wait_for_cache_sync("pods", &pod_store, config.cache_sync_timeout),
            )
        } => result.map(|_| ()),
        _ = stop.cancelled() => Ok(()),
    };
    if let Err(e) = sync_outcome(synced, &stop) {
        stop.cancel();
        while tasks.join_next().await.is_some() {}
        return Err(e);
    }
    if stop.is_cancelled() {
        info!("shutdown requested before caches synced");
        while tasks.join_next().await.is_some() {}
        return Ok(());
    }

    let pool = WorkerPool::new(config.threadiness, config.retry_delay);
    {
        let pool = pool.clone();
        let reconciler = Arc::new(GameReconciler::new(Arc::clone(&ctx)));
        let stop = stop.clone();
        tasks.spawn(async move { pool.run(game_queue, reconciler, stop).await });
    }
    {
        let reconciler = Arc::new(PodReconciler::new(ctx));
        let stop = stop.clone();
        tasks.spawn(async move { pool.run(pod_queue, reconciler, stop).await });
    }
    info!(
        threadiness = config.threadiness,
        retry_delay = ?config.retry_delay,
        "controllers running"
    );

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "controller task failed");
        }
    }
    info!("controllers stopped");
    Ok(())
}

/// A failed sync is only an error when nobody asked to stop
fn sync_outcome(synced: Result<(), Error>, stop: &CancellationToken) -> Result<(), Error> {
    match synced {
        Err(e) if !stop.is_cancelled() => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubegames_common::kube_utils::DEFAULT_READ_TIMEOUT;

    #[test]
    fn watches_end_before_client_read_timeout() {
        for config in [game_watch_config(), pod_watch_config()] {
            let timeout = config.timeout.expect("watch timeout must be set");
            assert!(u64::from(timeout) < DEFAULT_READ_TIMEOUT.as_secs());
        }
    }

    #[test]
    fn pod_watch_selects_managed_pods_only() {
        assert_eq!(
            pod_watch_config().label_selector.as_deref(),
            Some(MANAGED_LABEL_SELECTOR)
        );
        assert!(game_watch_config().label_selector.is_none());
    }

    #[test]
    fn sync_failure_during_shutdown_is_not_an_error() {
        let stop = CancellationToken::new();
        let failed = || Err(Error::internal_with_context("cache_sync", "writer dropped"));

        assert!(sync_outcome(failed(), &stop).is_err());
        stop.cancel();
        assert!(sync_outcome(failed(), &stop).is_ok());
        assert!(sync_outcome(Ok(()), &stop).is_ok());
    }
}
