// Library root: re-exports all modules so the CLI, integration tests and
// embedding services can reach the league core's public API.

pub mod achievements;
pub mod config;
pub mod db;
pub mod error;
pub mod hooks;
pub mod model;
pub mod payload;
pub mod service;
pub mod xp;

pub use error::{MatchdayError, Result};
pub use service::LeagueService;
