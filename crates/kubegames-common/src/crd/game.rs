//! Game CRD types
//!
//! A `Game` describes a scalable group of stateful game-server pods. Users set
//! the spec; the operator owns the status, which maps every ready pod to the
//! address clients use to reach it.

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::GAME_FINALIZER;

/// Desired state of a group of game servers
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubegames.io",
    version = "v1",
    kind = "Game",
    plural = "games",
    shortname = "gm",
    namespaced,
    status = "GameStatus",
    derive = "PartialEq",
    derive = "Default",
    printcolumn = r#"{"name":"GameID","type":"string","jsonPath":".spec.gameID"}"#,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GameSpec {
    /// Game identity; also names the configuration object and prefixes pod names
    #[serde(rename = "gameID", default)]
    pub game_id: String,

    /// Raw configuration text mounted into every game server
    #[serde(default)]
    pub config: String,

    /// Container image of the game server
    #[serde(default)]
    pub image: String,

    /// CPU limit in millicores (1000 = 1 CPU); 0 means unlimited
    #[serde(default)]
    pub cpu: u32,

    /// Memory limit in MiB; 0 means unlimited
    #[serde(default)]
    pub memory: u32,

    /// Port the game server listens on
    #[serde(default)]
    #[schemars(range(max = 65535))]
    pub port: u32,

    /// Container command (argv)
    ///
    /// Manifests written for the first releases spell this `commonds`; both
    /// names are accepted.
    #[serde(default, alias = "commonds", skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,

    /// Desired number of game server pods
    #[serde(default)]
    pub replicas: u32,
}

/// Observed state of a Game, written only by the operator
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameStatus {
    /// Ready pods keyed by pod name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pods: BTreeMap<String, PodStatus>,

    /// Timestamp (RFC 3339) of the last status write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_at: Option<String>,
}

/// Snapshot of one ready game server pod
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    /// Pod name
    pub name: String,

    /// IP of the node running the pod
    #[serde(default)]
    pub host_ip: String,

    /// IP of the pod
    #[serde(default)]
    pub pod_ip: String,

    /// Game server port, copied from the owning Game's spec
    #[serde(default)]
    pub port: u32,

    /// Pod phase at observation time
    #[serde(default)]
    pub phase: String,

    /// Notes of the cluster events recorded for the pod, in list order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
}

impl Game {
    /// GameID from the spec
    pub fn game_id(&self) -> &str {
        &self.spec.game_id
    }

    /// Number of pods currently recorded in status
    pub fn pod_count(&self) -> u32 {
        self.status
            .as_ref()
            .map(|s| s.pods.len() as u32)
            .unwrap_or(0)
    }

    /// Name of the pod at the given ordinal (`<gameID>-<ordinal>`)
    pub fn pod_name(&self, ordinal: u32) -> String {
        pod_name(&self.spec.game_id, ordinal)
    }

    /// Whether the Game has been marked for deletion
    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the lifecycle finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == GAME_FINALIZER)
    }

    /// Append the lifecycle finalizer unless it is already present
    pub fn add_finalizer(&mut self) {
        if !self.has_finalizer() {
            self.finalizers_mut().push(GAME_FINALIZER.to_string());
        }
    }

    /// Remove every occurrence of the lifecycle finalizer
    pub fn remove_finalizer(&mut self) {
        self.finalizers_mut().retain(|f| f != GAME_FINALIZER);
    }

    /// Status, initialising an empty one if none has been written yet
    pub fn status_mut(&mut self) -> &mut GameStatus {
        self.status.get_or_insert_with(GameStatus::default)
    }
}

/// Name of the pod at `ordinal` for `game_id`
pub fn pod_name(game_id: &str, ordinal: u32) -> String {
    format!("{game_id}-{ordinal}")
}

/// Recover the GameID from a managed pod name
///
/// Splits at the last `-`; the suffix must be a numeric ordinal. Returns
/// `None` for names that do not follow the `<gameID>-<ordinal>` convention.
pub fn game_id_from_pod_name(pod_name: &str) -> Option<&str> {
    let (game_id, ordinal) = pod_name.rsplit_once('-')?;
    if game_id.is_empty() || ordinal.parse::<u32>().is_err() {
        return None;
    }
    Some(game_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;
    use rstest::rstest;

    fn sample_game() -> Game {
        Game::new(
            "poker",
            GameSpec {
                game_id: "poker".to_string(),
                image: "kubegames/poker:1.0".to_string(),
                port: 8080,
                replicas: 2,
                ..Default::default()
            },
        )
    }

    #[test]
    fn spec_uses_wire_field_names() {
        let json = serde_json::to_value(&sample_game().spec).unwrap();
        assert_eq!(json["gameID"], "poker");
        assert_eq!(json["replicas"], 2);
        assert!(json.get("commands").is_none());
    }

    #[test]
    fn legacy_commonds_field_is_accepted() {
        let spec: GameSpec = serde_json::from_value(serde_json::json!({
            "gameID": "poker",
            "image": "kubegames/poker:1.0",
            "commonds": ["/server", "--fast"]
        }))
        .unwrap();
        assert_eq!(spec.commands, vec!["/server", "--fast"]);
        assert!(serde_json::to_value(&spec).unwrap().get("commonds").is_none());
    }

    #[test]
    fn status_round_trips_with_camel_case_keys() {
        let mut status = GameStatus::default();
        status.pods.insert(
            "poker-0".to_string(),
            PodStatus {
                name: "poker-0".to_string(),
                host_ip: "10.0.0.1".to_string(),
                pod_ip: "10.1.0.5".to_string(),
                port: 8080,
                phase: "Running".to_string(),
                events: vec!["Pulled".to_string()],
            },
        );
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["pods"]["poker-0"]["hostIp"], "10.0.0.1");
        assert_eq!(json["pods"]["poker-0"]["podIp"], "10.1.0.5");

        let back: GameStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn pod_count_defaults_to_zero_without_status() {
        assert_eq!(sample_game().pod_count(), 0);
    }

    #[test]
    fn pod_names_are_ordinal_suffixed() {
        let game = sample_game();
        assert_eq!(game.pod_name(0), "poker-0");
        assert_eq!(game.pod_name(11), "poker-11");
    }

    #[test]
    fn finalizer_is_added_once_and_removed() {
        let mut game = sample_game();
        assert!(!game.has_finalizer());

        game.add_finalizer();
        game.add_finalizer();
        assert_eq!(game.finalizers(), &[GAME_FINALIZER.to_string()]);

        game.remove_finalizer();
        assert!(!game.has_finalizer());
    }

    #[rstest]
    #[case("poker-0", Some("poker"))]
    #[case("texas-holdem-12", Some("texas-holdem"))]
    #[case("poker", None)]
    #[case("poker-x", None)]
    #[case("-3", None)]
    fn game_id_is_recovered_from_pod_name(#[case] pod: &str, #[case] expected: Option<&str>) {
        assert_eq!(game_id_from_pod_name(pod), expected);
    }

    #[test]
    fn crd_has_status_subresource() {
        let crd = serde_yaml::to_string(&Game::crd()).unwrap();
        assert!(crd.contains("games.kubegames.io"));
        assert!(crd.contains("status: {}"));
    }
}
