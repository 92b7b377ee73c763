//! # Data Models
//!
//! This module contains the SeaORM entity models used throughout the
//! orchestrator.

pub mod installation;
pub mod prediction;
pub mod repo;
pub mod repo_config;
pub mod user;

pub use installation::Entity as Installation;
pub use prediction::Entity as Prediction;
pub use repo::Entity as Repo;
pub use repo::RepoState;
pub use repo_config::RepoConfig;
pub use user::Entity as User;
