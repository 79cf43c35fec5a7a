//! Code bootstrap
//!
//! Turns raw user code into a launcher script on disk plus the one-time key
//! the launcher needs to decode it:
//!
//! 1. draw a fresh [`key::ExecutionKey`]
//! 2. XOR the code with the key and base64 both ([`payload`])
//! 3. render the language launcher ([`template`])
//! 4. write it to a uniquely named, owner-only file
//!
//! The key is returned to the caller for the launch arguments and is never
//! written into the script.

pub mod key;
pub mod payload;
pub mod template;

use crate::config::types::{Result, SandboxError};
use crate::kernel::identity::SandboxIdentity;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use template::{BootstrapParams, TemplateFn};
use uuid::Uuid;

/// A launcher written to disk and the base64 key that decodes its payload.
pub struct StagedScript {
    pub path: PathBuf,
    pub key: String,
}

impl fmt::Debug for StagedScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedScript")
            .field("path", &self.path)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Bootstrap settings for one run.
#[derive(Debug, Clone, Copy)]
pub struct CodeBootstrap<'a> {
    pub identity: SandboxIdentity,
    pub enable_network: bool,
    pub preload: &'a str,
    pub template: TemplateFn,
    /// Script file extension, without the dot
    pub extension: &'a str,
}

impl CodeBootstrap<'_> {
    /// Obfuscate `code`, render the launcher and write it under `script_dir`.
    pub fn stage(&self, code: &[u8], script_dir: &Path) -> Result<StagedScript> {
        let obfuscated = payload::obfuscate(code)?;

        let script = (self.template)(&BootstrapParams {
            uid: self.identity.uid(),
            gid: self.identity.gid(),
            enable_network: self.enable_network,
            preload: self.preload,
            payload: &obfuscated.code,
        });

        fs::create_dir_all(script_dir).map_err(|e| {
            SandboxError::Environment(format!(
                "failed to create script directory {}: {}",
                script_dir.display(),
                e
            ))
        })?;

        let name = format!("{}.{}", Uuid::new_v4().simple(), self.extension);
        let path = script_dir.join(name);
        write_owner_only(&path, script.as_bytes()).map_err(|e| {
            let _ = fs::remove_file(&path);
            SandboxError::Environment(format!(
                "failed to write launcher {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(StagedScript {
            path,
            key: obfuscated.key,
        })
    }
}

fn write_owner_only(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o700)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}
