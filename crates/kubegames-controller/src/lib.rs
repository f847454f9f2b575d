//! Reconcilers for the kubegames operator
//!
//! Two controllers cooperate through the Game resource only:
//!
//! - [`GameReconciler`] scales a Game's pods one at a time towards
//!   `spec.replicas`, draining pods before deleting them, and holds the Game's
//!   finalizer until every pod is gone.
//! - [`PodReconciler`] watches managed pods and records every ready pod in the
//!   owning Game's status. That status write is what re-triggers the Game
//!   reconciler, so a scale-up proceeds pod by pod as each one becomes ready.

#![deny(missing_docs)]

pub mod client;
pub mod config;
pub mod context;
pub mod drain;
pub mod game;
pub mod manifests;
pub mod pod;
pub mod runner;

pub use client::{ClusterClient, KubeClusterClient};
pub use config::ControllerConfig;
pub use context::Context;
pub use drain::{drain_pod, is_pod_ready, DrainClient, GrpcDrainClient};
pub use game::GameReconciler;
pub use pod::PodReconciler;
pub use runner::run_controllers;
