//! Configuration subsystem: schema, loading, validation.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    DirectoryConfig, ExecutorConfig, FeedCheckConfig, IntervalConfig, MtaConfig,
    ObservabilityConfig, PrivilegeConfig, RelayConfig, RetentionConfig, RoleConfig, RolesConfig,
    SendersConfig, ServerConfig, WwwConfig,
};
pub use validation::{validate_config, ValidationError};
