//! Privileged filesystem setup and root relinquishment.
//!
//! # Responsibilities
//! - Ensure working directories exist before privileges are dropped
//! - Hand directory ownership to the unprivileged identity
//! - Permanently drop root once every privileged resource is acquired
//!
//! # Design Decisions
//! - The drop is irreversible; nothing may re-request elevation after it
//! - Not running as root is a no-op, so development runs work unchanged
//! - setgroups runs before setgid before setuid; a partial drop is an error

use std::path::Path;

use nix::unistd::{chown, setgid, setgroups, setuid, Group, Uid, User};
use thiserror::Error;

use crate::config::PrivilegeConfig;

/// Errors from directory setup or the privilege drop.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to change ownership of {path}: {source}")]
    Chown { path: String, source: nix::Error },

    #[error("unknown user {0:?}")]
    UnknownUser(String),

    #[error("unknown group {0:?}")]
    UnknownGroup(String),

    #[error("failed to look up {name:?}: {source}")]
    Lookup { name: String, source: nix::Error },

    #[error("failed to drop privileges: {0}")]
    Drop(nix::Error),
}

fn resolve_user(name: &str) -> Result<User, PrivilegeError> {
    User::from_name(name)
        .map_err(|source| PrivilegeError::Lookup {
            name: name.to_string(),
            source,
        })?
        .ok_or_else(|| PrivilegeError::UnknownUser(name.to_string()))
}

fn resolve_group(name: &str) -> Result<Group, PrivilegeError> {
    Group::from_name(name)
        .map_err(|source| PrivilegeError::Lookup {
            name: name.to_string(),
            source,
        })?
        .ok_or_else(|| PrivilegeError::UnknownGroup(name.to_string()))
}

/// Create a working directory if absent.
///
/// When running as root the directory is chowned to the configured
/// unprivileged identity, so it stays writable after the drop.
pub async fn ensure_dir(path: &Path, privileges: &PrivilegeConfig) -> Result<(), PrivilegeError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| PrivilegeError::CreateDir {
            path: path.display().to_string(),
            source,
        })?;

    if Uid::effective().is_root() {
        let user = resolve_user(&privileges.user)?;
        let group = resolve_group(&privileges.group)?;
        chown(path, Some(user.uid), Some(group.gid)).map_err(|source| PrivilegeError::Chown {
            path: path.display().to_string(),
            source,
        })?;
    }

    tracing::debug!(path = %path.display(), "Directory ensured");
    Ok(())
}

/// Permanently drop root privileges for the rest of the process lifetime.
///
/// Must only be called once every privileged bind and privileged
/// filesystem operation has completed. No-op when not running as root.
pub fn drop_root_privileges(privileges: &PrivilegeConfig) -> Result<(), PrivilegeError> {
    if !Uid::effective().is_root() {
        tracing::debug!("Not running as root, no privileges to drop");
        return Ok(());
    }

    let user = resolve_user(&privileges.user)?;
    let group = resolve_group(&privileges.group)?;

    setgroups(&[group.gid]).map_err(PrivilegeError::Drop)?;
    setgid(group.gid).map_err(PrivilegeError::Drop)?;
    setuid(user.uid).map_err(PrivilegeError::Drop)?;

    tracing::info!(
        user = %privileges.user,
        group = %privileges.group,
        "Dropped root privileges"
    );
    Ok(())
}
