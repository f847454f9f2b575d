//! Shared reconciler context

use std::sync::Arc;

use kube::Client;

use crate::client::{ClusterClient, KubeClusterClient};
use crate::config::ControllerConfig;
use crate::drain::{DrainClient, GrpcDrainClient};

/// Dependencies of the Game and Pod reconcilers
///
/// Both are trait objects so tests can run the reconcilers against mocks or
/// an in-memory cluster.
pub struct Context {
    /// Kubernetes API access
    pub cluster: Arc<dyn ClusterClient>,
    /// Drain RPC client
    pub drain: Arc<dyn DrainClient>,
}

impl Context {
    /// Context talking to the real API server and game servers
    pub fn new(client: Client, config: &ControllerConfig) -> Self {
        Self::from_parts(
            Arc::new(KubeClusterClient::new(client)),
            Arc::new(GrpcDrainClient::new(config.drain_timeout)),
        )
    }

    /// Context from explicit clients
    pub fn from_parts(cluster: Arc<dyn ClusterClient>, drain: Arc<dyn DrainClient>) -> Self {
        Self { cluster, drain }
    }
}
