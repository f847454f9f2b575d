//! kubegames operator
//!
//! Runs the Game and Pod reconcilers together with the admission webhook
//! that labels and validates new Games.

#![deny(missing_docs)]

pub mod cli;
pub mod startup;

pub use cli::Cli;
pub use startup::{cancel_on_signal, crd_manifest, install_crds, run};
