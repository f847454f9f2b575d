//! Manifests for the objects a Game owns: its config map and its pods

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource,
    ObjectFieldSelector, Pod, PodSpec, Probe, ResourceRequirements, TCPSocketAction, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

use kubegames_common::crd::Game;
use kubegames_common::{
    Error, ANNOTATION_PROXY, CONFIG_KEY, CONFIG_MOUNT_PATH, ENV_POD_IP, ENV_POD_NAME, ENV_RUN_PORT,
    LABEL_CONTROLLER, LABEL_CONTROLLER_VALUE, LABEL_GAME_ID, LABEL_PORT,
};

/// Readiness probe initial delay (seconds)
pub const READINESS_INITIAL_DELAY_SECS: i32 = 5;
/// Liveness probe initial delay (seconds)
pub const LIVENESS_INITIAL_DELAY_SECS: i32 = 20;
/// Period of both probes (seconds)
pub const PROBE_PERIOD_SECS: i32 = 10;

/// Routing rules published on each pod for the game proxy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteRules {
    /// Target kind; always `pod` for game servers
    pub kind: String,
    /// Rules routing requests to this pod
    pub rules: Vec<RouteRule>,
}

/// One proxy routing rule
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteRule {
    /// HTTP method matched; `any` matches every method
    pub method: String,
    /// Path prefix matched
    pub path: String,
    /// Host matched; empty matches every host
    pub host: String,
    /// Destination port on the pod
    pub port: i64,
}

impl RouteRules {
    /// Rules routing `/<gameID>/<podName>` to the pod's game port
    pub fn for_pod(game_id: &str, pod_name: &str, port: u32) -> Self {
        Self {
            kind: "pod".to_string(),
            rules: vec![RouteRule {
                method: "any".to_string(),
                path: format!("/{game_id}/{pod_name}"),
                host: String::new(),
                port: i64::from(port),
            }],
        }
    }

    /// Base64 of the JSON encoding, as stored in the `proxy` annotation
    pub fn encode(&self) -> Result<String, Error> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }
}

fn labels(game: &Game) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_GAME_ID.to_string(), game.spec.game_id.clone()),
        (LABEL_CONTROLLER.to_string(), LABEL_CONTROLLER_VALUE.to_string()),
    ])
}

/// Config map named after the GameID holding the raw game configuration
pub fn build_config_map(game: &Game) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(game.spec.game_id.clone()),
            namespace: game.namespace(),
            labels: Some(labels(game)),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            CONFIG_KEY.to_string(),
            game.spec.config.clone(),
        )])),
        ..Default::default()
    }
}

fn tcp_probe(port: i32, initial_delay: i32) -> Probe {
    Probe {
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(PROBE_PERIOD_SECS),
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn limits(game: &Game) -> Option<BTreeMap<String, Quantity>> {
    let mut limits = BTreeMap::new();
    if game.spec.cpu > 0 {
        limits.insert("cpu".to_string(), Quantity(format!("{}m", game.spec.cpu)));
    }
    if game.spec.memory > 0 {
        limits.insert("memory".to_string(), Quantity(format!("{}Mi", game.spec.memory)));
    }
    (!limits.is_empty()).then_some(limits)
}

/// TCP port of the game server, rejected unless it is a valid port number
fn container_port(game: &Game) -> Result<i32, Error> {
    let port = game.spec.port;
    if port == 0 || port > u32::from(u16::MAX) {
        return Err(Error::validation(
            game.name_any(),
            format!("port {port} is not a valid TCP port"),
        ));
    }
    i32::try_from(port).map_err(|_| Error::validation(game.name_any(), "port out of range"))
}

/// Game server pod `pod_name` for `game`
pub fn build_pod(game: &Game, pod_name: &str) -> Result<Pod, Error> {
    let spec = &game.spec;
    let game_id = spec.game_id.clone();
    let port = container_port(game)?;

    let mut pod_labels = labels(game);
    pod_labels.insert(LABEL_PORT.to_string(), spec.port.to_string());

    let route = RouteRules::for_pod(&game_id, pod_name, spec.port).encode()?;

    let container = Container {
        name: game_id.clone(),
        image: Some(spec.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: (!spec.commands.is_empty()).then(|| spec.commands.clone()),
        ports: Some(vec![ContainerPort {
            container_port: port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        resources: Some(ResourceRequirements {
            limits: limits(game),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: game_id.clone(),
            mount_path: CONFIG_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        env: Some(vec![
            EnvVar {
                name: ENV_RUN_PORT.to_string(),
                value: Some(spec.port.to_string()),
                ..Default::default()
            },
            EnvVar {
                name: ENV_POD_NAME.to_string(),
                value: Some(pod_name.to_string()),
                ..Default::default()
            },
            EnvVar {
                name: ENV_POD_IP.to_string(),
                value_from: Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        field_path: "status.podIP".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ]),
        readiness_probe: Some(tcp_probe(port, READINESS_INITIAL_DELAY_SECS)),
        liveness_probe: Some(tcp_probe(port, LIVENESS_INITIAL_DELAY_SECS)),
        ..Default::default()
    };

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(pod_name.to_string()),
            namespace: game.namespace(),
            labels: Some(pod_labels),
            annotations: Some(BTreeMap::from([(ANNOTATION_PROXY.to_string(), route)])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![container],
            volumes: Some(vec![Volume {
                name: game_id.clone(),
                config_map: Some(ConfigMapVolumeSource {
                    name: game_id,
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}
