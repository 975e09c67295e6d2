//! Process lifecycle: startup sequencing, readiness, shutdown.

pub mod readiness;
pub mod shutdown;
pub mod startup;

pub use readiness::ReadyFlag;
pub use shutdown::Shutdown;
pub use startup::{Bootstrap, BootstrapError, Stage};
