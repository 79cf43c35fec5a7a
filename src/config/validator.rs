//! Run-option validation.
//!
//! Options are checked before any resource is allocated for a run; a rejection
//! here surfaces as a 400-class response.

use crate::config::loader::SandboxConfig;
use crate::config::types::{Result, RunOptions, SandboxError};

const MAX_SYSCALLS: usize = 512;
const MAX_SYSCALL_NAME_LEN: usize = 64;

/// Validate and normalise caller-supplied options against the service config.
pub fn validate_options(options: &RunOptions, config: &SandboxConfig) -> Result<RunOptions> {
    if options.enable_network && !config.enable_network {
        return Err(SandboxError::InvalidOptions(
            "network access is disabled for this sandbox".to_string(),
        ));
    }

    if options.allowed_syscalls.len() > MAX_SYSCALLS {
        return Err(SandboxError::InvalidOptions(format!(
            "too many allowed syscalls: {} (max {})",
            options.allowed_syscalls.len(),
            MAX_SYSCALLS
        )));
    }

    let mut syscalls: Vec<String> = Vec::with_capacity(options.allowed_syscalls.len());
    for raw in &options.allowed_syscalls {
        let name = raw.trim();
        check_syscall_name(name)?;
        if !syscalls.iter().any(|s| s == name) {
            syscalls.push(name.to_string());
        }
    }

    Ok(RunOptions {
        enable_network: options.enable_network,
        allowed_syscalls: syscalls,
    })
}

/// Syscall list handed to the sandboxed process: the run's own list when it
/// has one, the configured default otherwise.
pub fn effective_syscalls<'a>(options: &'a RunOptions, config: &'a SandboxConfig) -> &'a [String] {
    if options.allowed_syscalls.is_empty() {
        &config.allowed_syscalls
    } else {
        &options.allowed_syscalls
    }
}

fn check_syscall_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SandboxError::InvalidOptions(
            "empty syscall name in allowed_syscalls".to_string(),
        ));
    }
    if name.len() > MAX_SYSCALL_NAME_LEN {
        return Err(SandboxError::InvalidOptions(format!(
            "syscall name too long: {name}"
        )));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
    {
        return Err(SandboxError::InvalidOptions(format!(
            "invalid syscall name: {name:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(network: bool, syscalls: &[&str]) -> RunOptions {
        RunOptions {
            enable_network: network,
            allowed_syscalls: syscalls.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn dedupes_keeping_first_occurrence() {
        let config = SandboxConfig::default();
        let out = validate_options(&options(false, &["write", " read", "write", "exit"]), &config)
            .unwrap();
        assert_eq!(out.allowed_syscalls, vec!["write", "read", "exit"]);
    }

    #[test]
    fn rejects_bad_names() {
        let config = SandboxConfig::default();
        for bad in ["", "READ", "read,write", "open at", "x".repeat(65).as_str()] {
            let err = validate_options(&options(false, &[bad]), &config).unwrap_err();
            assert_eq!(err.code(), -400, "{bad:?} should be rejected");
        }
    }

    #[test]
    fn rejects_network_when_globally_disabled() {
        let mut config = SandboxConfig::default();
        config.enable_network = false;
        assert!(validate_options(&options(true, &[]), &config).is_err());
        assert!(validate_options(&options(false, &[]), &config).is_ok());
    }

    #[test]
    fn rejects_oversized_list() {
        let config = SandboxConfig::default();
        let many: Vec<String> = (0..=MAX_SYSCALLS).map(|i| format!("sys_{i}")).collect();
        let opts = RunOptions {
            enable_network: false,
            allowed_syscalls: many,
        };
        assert!(validate_options(&opts, &config).is_err());
    }

    #[test]
    fn effective_syscalls_falls_back_to_config() {
        let mut config = SandboxConfig::default();
        config.allowed_syscalls = vec!["read".to_string()];
        let empty = options(false, &[]);
        assert_eq!(effective_syscalls(&empty, &config), &["read".to_string()]);
        let own = options(false, &["write"]);
        assert_eq!(effective_syscalls(&own, &config), &["write".to_string()]);
    }
}
