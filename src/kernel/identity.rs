//! The fixed low-privilege account every sandboxed process runs as.
//!
//! Resolved once at startup and shared read-only afterwards. Failing to
//! resolve or create it is fatal to startup.

use crate::config::types::{Result, SandboxError};
use nix::unistd::User;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxIdentity {
    uid: u32,
    gid: u32,
}

impl SandboxIdentity {
    /// Root ids are rejected: a sandbox identity must be unprivileged.
    pub fn new(uid: u32, gid: u32) -> Result<Self> {
        if uid == 0 || gid == 0 {
            return Err(SandboxError::Identity(format!(
                "sandbox identity cannot be root (uid={}, gid={})",
                uid, gid
            )));
        }
        Ok(Self { uid, gid })
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    /// Look up `user`, creating it with `uid` when it does not exist yet.
    pub fn resolve_or_create(user: &str, uid: u32) -> Result<Self> {
        if let Some(existing) = lookup(user)? {
            if existing.uid.as_raw() != uid {
                log::warn!(
                    "Sandbox user {} exists with uid {} (configured {}), using existing uid",
                    user,
                    existing.uid,
                    uid
                );
            }
            return Self::new(existing.uid.as_raw(), existing.gid.as_raw());
        }

        log::info!("Creating sandbox user {} with uid {}", user, uid);
        let output = Command::new("useradd")
            .arg("-u")
            .arg(uid.to_string())
            .arg(user)
            .output()
            .map_err(|e| SandboxError::Identity(format!("failed to run useradd: {}", e)))?;
        if !output.status.success() {
            return Err(SandboxError::Identity(format!(
                "useradd {} failed: {}",
                user,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let created = lookup(user)?.ok_or_else(|| {
            SandboxError::Identity(format!("user {} not found after useradd", user))
        })?;
        Self::new(created.uid.as_raw(), created.gid.as_raw())
    }
}

fn lookup(user: &str) -> Result<Option<User>> {
    User::from_name(user)
        .map_err(|e| SandboxError::Identity(format!("failed to look up user {}: {}", user, e)))
}
