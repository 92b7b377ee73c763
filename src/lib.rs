//! # GFI-Bot Orchestrator Library
//!
//! This library provides the core functionality for the GFI-Bot update
//! orchestrator: the repo lifecycle state machine, the trigger scheduler,
//! the credential pool, and the update pipeline.

pub mod batch;
pub mod collaborators;
pub mod config;
pub mod credentials;
pub mod cron;
pub mod db;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod repositories;
pub mod scheduler;
pub mod telemetry;
pub use migration;
