//! Custom Resource Definitions for kubegames

mod game;

pub use game::{game_id_from_pod_name, pod_name, Game, GameSpec, GameStatus, PodStatus};
