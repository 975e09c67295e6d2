//! Mailweave newsletter platform library.

// Core subsystems
pub mod config;
pub mod net;
pub mod storage;
pub mod web;

// Domain services
pub mod permissions;
pub mod services;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod privileges;

pub use config::ServerConfig;
pub use lifecycle::{Bootstrap, BootstrapError, ReadyFlag, Shutdown};
pub use storage::Database;
pub use web::AppTier;
