//! Protocol buffer definitions for the game server drain protocol.
//!
//! Every game server pod serves [`game_service_server::GameService`]. Before
//! the operator deletes a pod it dials the pod directly and calls `Delete`
//! with the pod's GameID:
//!
//! ```text
//!   operator ── Delete{game_id} ──▶ game server (podIP:port)
//!            ◀── DeleteResponse{success} ──
//! ```
//!
//! `success = false` means the server still hosts players and the operator
//! retries later. The client stub lives in [`game_service_client`].

// Generated protobuf code doesn't have docs
#![allow(missing_docs)]

/// Generated protobuf types from game.proto
pub mod game {
    /// Version 1 of the game server protocol
    pub mod v1 {
        tonic::include_proto!("kubegames.game.v1");
    }
}

pub use game::v1::*;
