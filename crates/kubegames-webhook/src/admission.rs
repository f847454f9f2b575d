//! Admission decisions for Game resources
//!
//! Both decisions only look at `CREATE` requests for kind `Game`; anything
//! else is allowed unchanged. A request whose object cannot be decoded is
//! denied with the decode error as reason.

use json_patch::Patch;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, Operation};
use kube::ResourceExt;
use tracing::{debug, info, warn};

use kubegames_common::crd::Game;
use kubegames_common::{GAME_FINALIZER, LABEL_CONTROLLER, LABEL_CONTROLLER_VALUE, LABEL_GAME_ID};

use crate::codec::GameCodec;
use crate::error::WebhookError;

/// Check the invariants the reconcilers rely on, returning the denial reason
pub fn validate_game(game: &Game) -> Result<(), String> {
    if game.spec.game_id.is_empty() {
        return Err("spec.gameID must not be empty".to_string());
    }
    if game.spec.image.is_empty() {
        return Err("spec.image must not be empty".to_string());
    }
    if !game.has_finalizer() {
        return Err(format!("finalizer {GAME_FINALIZER} is missing"));
    }
    Ok(())
}

/// JSON patch adding the identity labels and the lifecycle finalizer
///
/// The patch is the difference between `game` and a labelled copy of it; it
/// touches nothing but `metadata.labels` and `metadata.finalizers`.
pub fn mutate_game(game: &Game) -> Result<Patch, WebhookError> {
    let mut mutated = game.clone();
    let labels = mutated.labels_mut();
    labels.insert(LABEL_GAME_ID.to_string(), game.spec.game_id.clone());
    labels.insert(LABEL_CONTROLLER.to_string(), LABEL_CONTROLLER_VALUE.to_string());
    mutated.add_finalizer();

    let original = serde_json::to_value(game)?;
    let mutated = serde_json::to_value(&mutated)?;
    Ok(json_patch::diff(&original, &mutated))
}

/// Decode the Game of a request that both decisions act on
///
/// `Ok(None)` means the request is out of scope and must be allowed as is.
fn admitted_game(
    codec: &GameCodec,
    req: &AdmissionRequest<DynamicObject>,
) -> Result<Option<Game>, WebhookError> {
    if req.operation != Operation::Create || !codec.handles_kind(&req.kind.kind) {
        return Ok(None);
    }
    let obj = req
        .object
        .as_ref()
        .ok_or_else(|| WebhookError::InvalidReview("request has no object".to_string()))?;
    codec.decode(obj).map(Some)
}

/// Validating decision for one admission request
pub fn review_validating(codec: &GameCodec, req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let game = match admitted_game(codec, req) {
        Ok(Some(game)) => game,
        Ok(None) => return AdmissionResponse::from(req),
        Err(e) => {
            warn!(uid = %req.uid, error = %e, "failed to decode game");
            return AdmissionResponse::from(req).deny(e.to_string());
        }
    };

    match validate_game(&game) {
        Ok(()) => {
            debug!(uid = %req.uid, game = %game.name_any(), "game admitted");
            AdmissionResponse::from(req)
        }
        Err(reason) => {
            info!(uid = %req.uid, game = %game.name_any(), reason = %reason, "game rejected");
            AdmissionResponse::from(req).deny(reason)
        }
    }
}

/// Mutating decision for one admission request
pub fn review_mutating(codec: &GameCodec, req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let game = match admitted_game(codec, req) {
        Ok(Some(game)) => game,
        Ok(None) => return AdmissionResponse::from(req),
        Err(e) => {
            warn!(uid = %req.uid, error = %e, "failed to decode game");
            return AdmissionResponse::from(req).deny(e.to_string());
        }
    };

    let patch = match mutate_game(&game) {
        Ok(patch) => patch,
        Err(e) => return AdmissionResponse::from(req).deny(e.to_string()),
    };
    info!(
        uid = %req.uid,
        game = %game.name_any(),
        patch_ops = patch.0.len(),
        "mutating game"
    );

    match AdmissionResponse::from(req).with_patch(patch) {
        Ok(response) => response,
        Err(e) => {
            let err = WebhookError::Patch(e.to_string());
            warn!(uid = %req.uid, error = %err, "failed to attach patch");
            AdmissionResponse::from(req).deny(err.to_string())
        }
    }
}
