//! # Repository Layer
//!
//! This module contains repository implementations that encapsulate SeaORM
//! operations for database entities, providing a clean API for data access.

pub mod installation;
pub mod prediction;
pub mod repo;
pub mod user;

pub use installation::InstallationRepository;
pub use prediction::PredictionRepository;
pub use repo::RepoRepository;
pub use user::UserRepository;
