//! Operator startup: CRD installation, signal handling and task wiring

use std::sync::Arc;

use anyhow::Context as _;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use kubegames_common::crd::Game;
use kubegames_common::kube_utils::create_client;
use kubegames_common::FIELD_MANAGER;
use kubegames_controller::run_controllers;
use kubegames_webhook::{serve_tls, WebhookState};

use crate::cli::Cli;

/// The Game CRD rendered as YAML
pub fn crd_manifest() -> anyhow::Result<String> {
    serde_yaml::to_string(&Game::crd()).context("failed to serialize Game CRD")
}

/// Install or refresh the Game CRD using server-side apply
pub async fn install_crds(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let crd = Game::crd();
    let name = crd.name_any();
    let params = PatchParams::apply(FIELD_MANAGER).force();

    info!(crd = %name, "installing CRD");
    crds.patch(&name, &params, &Patch::Apply(&crd))
        .await
        .with_context(|| format!("failed to install CRD {name}"))?;
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM
pub async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "failed to listen for ctrl-c");
                return;
            }
            info!("received interrupt, shutting down");
        }
        _ = terminate => info!("received SIGTERM, shutting down"),
        _ = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}

/// Run the controllers and, unless disabled, the admission webhook
///
/// Returns after a termination signal once both have stopped. A webhook that
/// fails to start brings the controllers down with it.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = create_client(cli.kubeconfig.as_deref())
        .await
        .context("failed to create kubernetes client")?;

    if cli.install_crds {
        install_crds(&client).await?;
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let webhook = if cli.no_webhook {
        info!("admission webhook disabled");
        None
    } else {
        let addr = cli.webhook_addr;
        let tls_dir = cli.tls_dir.clone();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            let state = Arc::new(WebhookState::new());
            let result = serve_tls(addr, &tls_dir, state, shutdown.clone()).await;
            if let Err(e) = &result {
                error!(error = %e, "admission webhook failed");
                shutdown.cancel();
            }
            result
        }))
    };

    let controllers = run_controllers(client, cli.controller_config(), shutdown.clone()).await;
    shutdown.cancel();

    if let Some(webhook) = webhook {
        webhook.await.context("webhook task panicked")??;
    }
    controllers?;
    info!("operator stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crd_manifest_describes_games() {
        let yaml = crd_manifest().unwrap();
        assert!(yaml.contains("name: games.kubegames.io"));
        assert!(yaml.contains("kind: Game"));
        assert!(yaml.contains("gameID"));
    }

    #[tokio::test]
    async fn signal_listener_exits_when_already_shutting_down() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        cancel_on_signal(shutdown.clone()).await;
        assert!(shutdown.is_cancelled());
    }
}
