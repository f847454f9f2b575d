//! Decoding admission objects into Games

use kube::api::DynamicObject;
use kube::Resource;

use kubegames_common::crd::Game;

use crate::error::WebhookError;

/// Decodes the raw object of an admission request into a [`Game`]
///
/// Built once at startup and shared by the handlers.
#[derive(Clone, Debug)]
pub struct GameCodec {
    api_version: String,
    kind: String,
}

impl Default for GameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl GameCodec {
    /// Codec for the served Game API version
    pub fn new() -> Self {
        Self {
            api_version: Game::api_version(&()).into_owned(),
            kind: Game::kind(&()).into_owned(),
        }
    }

    /// Whether an admission request's `kind` names a Game
    pub fn handles_kind(&self, kind: &str) -> bool {
        kind == self.kind
    }

    /// Decode `obj`, rejecting objects that declare another apiVersion or kind
    pub fn decode(&self, obj: &DynamicObject) -> Result<Game, WebhookError> {
        if let Some(types) = &obj.types {
            if types.api_version != self.api_version || types.kind != self.kind {
                return Err(WebhookError::UnexpectedType {
                    api_version: types.api_version.clone(),
                    kind: types.kind.clone(),
                });
            }
        }
        Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: serde_json::Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn decodes_game_objects() {
        let obj = object(json!({
            "apiVersion": "kubegames.io/v1",
            "kind": "Game",
            "metadata": {"name": "poker", "namespace": "games"},
            "spec": {"gameID": "poker", "image": "kubegames/poker:1.0", "replicas": 2}
        }));

        let game = GameCodec::new().decode(&obj).unwrap();
        assert_eq!(game.spec.game_id, "poker");
        assert_eq!(game.spec.replicas, 2);
        assert_eq!(game.metadata.namespace.as_deref(), Some("games"));
    }

    #[test]
    fn rejects_other_kinds() {
        let obj = object(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "poker-0"},
            "spec": {}
        }));

        let err = GameCodec::new().decode(&obj).unwrap_err();
        assert!(matches!(err, WebhookError::UnexpectedType { .. }));
    }

    #[test]
    fn rejects_malformed_spec() {
        let obj = object(json!({
            "apiVersion": "kubegames.io/v1",
            "kind": "Game",
            "metadata": {"name": "poker"},
            "spec": {"replicas": "many"}
        }));

        let err = GameCodec::new().decode(&obj).unwrap_err();
        assert!(matches!(err, WebhookError::Serialization(_)));
    }

    #[test]
    fn handles_only_game_kind() {
        let codec = GameCodec::new();
        assert!(codec.handles_kind("Game"));
        assert!(!codec.handles_kind("Pod"));
    }
}
