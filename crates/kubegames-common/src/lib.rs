//! Common types for kubegames: the Game CRD, errors, and Kubernetes helpers

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// Finalizer that blocks physical removal of a Game until its pods are drained
pub const GAME_FINALIZER: &str = "kubegames.io/finalizer";

/// Label carrying the GameID on Games, pods and configuration objects
pub const LABEL_GAME_ID: &str = "gameid";

/// Label marking objects managed by this operator
pub const LABEL_CONTROLLER: &str = "controller";

/// Value of [`LABEL_CONTROLLER`] on managed objects
pub const LABEL_CONTROLLER_VALUE: &str = "kubegames";

/// Label selector matching every managed object (for watch/list queries)
pub const MANAGED_LABEL_SELECTOR: &str = "controller=kubegames";

/// Label carrying the game server port on managed pods
pub const LABEL_PORT: &str = "port";

/// Annotation carrying the base64 routing rules consumed by the game proxy
pub const ANNOTATION_PROXY: &str = "proxy";

/// Key of the single entry in a Game's configuration object
pub const CONFIG_KEY: &str = "config";

/// Mount path of the configuration object inside game server containers
pub const CONFIG_MOUNT_PATH: &str = "/game/config";

/// Environment variable exposing the assigned port to the game server
pub const ENV_RUN_PORT: &str = "RUN_PORT";

/// Environment variable exposing the pod's own name
pub const ENV_POD_NAME: &str = "POD_NAME";

/// Environment variable exposing the pod's own IP
pub const ENV_POD_IP: &str = "POD_IP";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "kubegames-operator";

/// Default delay before a failed key is retried
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 15;
