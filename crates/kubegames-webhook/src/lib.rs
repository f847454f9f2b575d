//! Admission webhook for Game resources
//!
//! Two admission decisions guard Game creation:
//!
//! - **mutating** (`POST /mutating`): labels the Game with its GameID and the
//!   controller marker, and adds the lifecycle finalizer
//! - **validating** (`POST /validating`): rejects Games without a GameID, an
//!   image, or the finalizer
//!
//! The API server runs mutation first, so a well-formed Game always passes
//! validation with the metadata the reconcilers rely on.

#![deny(missing_docs)]

pub mod admission;
pub mod codec;
pub mod error;
pub mod server;

pub use admission::{mutate_game, review_mutating, review_validating, validate_game};
pub use codec::GameCodec;
pub use error::WebhookError;
pub use server::{serve_tls, webhook_router, WebhookState};
