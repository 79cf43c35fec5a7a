//! Configuration loading from config.json
use crate::config::types::{Language, Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Outbound proxy settings injected into sandboxed processes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub socks5: String,
    pub http: String,
    pub https: String,
}

impl ProxyConfig {
    /// Environment entries for the sandboxed process.
    /// A SOCKS5 proxy wins over the individual http/https entries.
    pub fn environment(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if !self.socks5.is_empty() {
            env.push(("HTTPS_PROXY".to_string(), self.socks5.clone()));
            env.push(("HTTP_PROXY".to_string(), self.socks5.clone()));
            return env;
        }
        if !self.https.is_empty() {
            env.push(("HTTPS_PROXY".to_string(), self.https.clone()));
        }
        if !self.http.is_empty() {
            env.push(("HTTP_PROXY".to_string(), self.http.clone()));
        }
        env
    }
}

/// Byte caps on what a run may send back. Output past a cap is read and
/// discarded so the process never stalls on a full pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputLimits {
    /// Combined stdout+stderr limit (bytes)
    pub combined_limit: usize,
    pub stdout_limit: usize,
    pub stderr_limit: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            combined_limit: 10 * 1024 * 1024,
            stdout_limit: 8 * 1024 * 1024,
            stderr_limit: 2 * 1024 * 1024,
        }
    }
}

/// Interpreter and staging-area settings for one language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Interpreter executable
    pub interpreter: PathBuf,
    /// Staging library root; runs execute with this as working directory
    pub lib_root: PathBuf,
    /// Host library paths mirrored into `lib_root`
    #[serde(default)]
    pub lib_paths: Vec<PathBuf>,
    /// Native helper performing privilege drop and syscall filtering
    pub helper_library: PathBuf,
    /// Requirements installed by the dependency refresher
    #[serde(default)]
    pub requirements_file: Option<PathBuf>,
}

impl LanguageConfig {
    fn python_default() -> Self {
        Self {
            interpreter: PathBuf::from("/usr/local/bin/python3"),
            lib_root: PathBuf::from("/var/sandbox/sandbox-python"),
            lib_paths: vec![
                PathBuf::from("/usr/local/lib/python3.10"),
                PathBuf::from("/usr/lib/python3.10"),
                PathBuf::from("/usr/lib/python3"),
                PathBuf::from("/etc/ssl/certs/ca-certificates.crt"),
                PathBuf::from("/etc/nsswitch.conf"),
                PathBuf::from("/etc/hosts"),
                PathBuf::from("/etc/resolv.conf"),
                PathBuf::from("/run/systemd/resolve/stub-resolv.conf"),
                PathBuf::from("/run/resolvconf/resolv.conf"),
            ],
            helper_library: PathBuf::from("/usr/local/lib/codebox/libsandbox.so"),
            requirements_file: Some(PathBuf::from("dependencies/python-requirements.txt")),
        }
    }

    fn nodejs_default() -> Self {
        Self {
            interpreter: PathBuf::from("/usr/local/bin/node"),
            lib_root: PathBuf::from("/var/sandbox/sandbox-nodejs"),
            lib_paths: vec![
                PathBuf::from("/etc/ssl/certs/ca-certificates.crt"),
                PathBuf::from("/etc/nsswitch.conf"),
                PathBuf::from("/etc/hosts"),
                PathBuf::from("/etc/resolv.conf"),
            ],
            helper_library: PathBuf::from("/usr/local/lib/codebox/libsandbox.so"),
            requirements_file: Some(PathBuf::from("dependencies/nodejs-requirements.txt")),
        }
    }
}

/// Full config.json structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Concurrently executing subprocesses (worker semaphore capacity)
    pub max_workers: usize,
    /// Concurrently accepted requests before fast rejection
    pub max_requests: usize,
    /// Wall-clock limit per run, in seconds
    pub worker_timeout_secs: u64,
    pub enable_network: bool,
    pub enable_preload: bool,
    /// Syscall allow-list used when a run does not bring its own
    pub allowed_syscalls: Vec<String>,
    pub proxy: ProxyConfig,
    pub sandbox_user: String,
    pub sandbox_uid: u32,
    pub python: LanguageConfig,
    pub nodejs: LanguageConfig,
    /// Dependency refresh period in seconds; 0 disables the refresher
    pub deps_update_interval_secs: u64,
    pub log_level: String,
    pub output_limits: OutputLimits,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_requests: 50,
            worker_timeout_secs: 5,
            enable_network: true,
            enable_preload: false,
            allowed_syscalls: Vec::new(),
            proxy: ProxyConfig::default(),
            sandbox_user: "sandbox".to_string(),
            sandbox_uid: 65537,
            python: LanguageConfig::python_default(),
            nodejs: LanguageConfig::nodejs_default(),
            deps_update_interval_secs: 30 * 60,
            log_level: "info".to_string(),
            output_limits: OutputLimits::default(),
        }
    }
}

impl SandboxConfig {
    /// Load configuration from a JSON file, then apply environment overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let mut config: SandboxConfig = serde_json::from_str(&content)
            .map_err(|e| SandboxError::Config(format!("Failed to parse config JSON: {}", e)))?;

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.check()?;
        Ok(config)
    }

    /// Load ./config.json, falling back to built-in defaults when it is absent
    pub fn load_default() -> Result<Self> {
        let config_path = std::env::current_dir()
            .map_err(|e| SandboxError::Config(format!("Failed to get current directory: {}", e)))?
            .join("config.json");

        if config_path.exists() {
            return Self::load_from_file(config_path);
        }

        log::warn!("config.json not found in current directory, using defaults");
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.check()?;
        Ok(config)
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    pub fn deps_update_interval(&self) -> Option<Duration> {
        (self.deps_update_interval_secs > 0)
            .then(|| Duration::from_secs(self.deps_update_interval_secs))
    }

    pub fn language(&self, language: Language) -> &LanguageConfig {
        match language {
            Language::Python => &self.python,
            Language::NodeJs => &self.nodejs,
        }
    }

    /// Apply `SANDBOX_*` overrides. `lookup` is injectable so tests avoid the process env.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SANDBOX_MAX_WORKERS") {
            self.max_workers = parse_override("SANDBOX_MAX_WORKERS", &v)?;
        }
        if let Some(v) = lookup("SANDBOX_MAX_REQUESTS") {
            self.max_requests = parse_override("SANDBOX_MAX_REQUESTS", &v)?;
        }
        if let Some(v) = lookup("SANDBOX_WORKER_TIMEOUT") {
            self.worker_timeout_secs = parse_override("SANDBOX_WORKER_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("SANDBOX_ENABLE_NETWORK") {
            self.enable_network = parse_bool("SANDBOX_ENABLE_NETWORK", &v)?;
        }
        if let Some(v) = lookup("SANDBOX_ENABLE_PRELOAD") {
            self.enable_preload = parse_bool("SANDBOX_ENABLE_PRELOAD", &v)?;
        }
        if let Some(v) = lookup("SANDBOX_ALLOWED_SYSCALLS") {
            self.allowed_syscalls = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup("SANDBOX_SOCKS5_PROXY") {
            self.proxy.socks5 = v;
        }
        if let Some(v) = lookup("SANDBOX_HTTP_PROXY") {
            self.proxy.http = v;
        }
        if let Some(v) = lookup("SANDBOX_HTTPS_PROXY") {
            self.proxy.https = v;
        }
        if let Some(v) = lookup("SANDBOX_OUTPUT_LIMIT") {
            self.output_limits.combined_limit = parse_override("SANDBOX_OUTPUT_LIMIT", &v)?;
        }
        if let Some(v) = lookup("SANDBOX_PYTHON_PATH") {
            self.python.interpreter = PathBuf::from(v);
        }
        if let Some(v) = lookup("SANDBOX_NODEJS_PATH") {
            self.nodejs.interpreter = PathBuf::from(v);
        }
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(SandboxError::Config("max_workers must be at least 1".to_string()));
        }
        if self.max_requests == 0 {
            return Err(SandboxError::Config("max_requests must be at least 1".to_string()));
        }
        if self.worker_timeout_secs == 0 {
            return Err(SandboxError::Config(
                "worker_timeout_secs must be at least 1".to_string(),
            ));
        }
        let limits = &self.output_limits;
        if limits.combined_limit == 0 || limits.stdout_limit == 0 || limits.stderr_limit == 0 {
            return Err(SandboxError::Config(
                "output limits must be at least 1 byte".to_string(),
            ));
        }
        if self.max_requests < self.max_workers {
            log::warn!(
                "max_requests ({}) is below max_workers ({}); some workers will never be used",
                self.max_requests,
                self.max_workers
            );
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SandboxError::Config(format!("{key} has an invalid value: {value:?}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SandboxError::Config(format!(
            "{key} has an invalid boolean value: {value:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_sane() {
        let config = SandboxConfig::default();
        assert!(config.max_requests >= config.max_workers);
        assert_eq!(config.worker_timeout(), Duration::from_secs(5));
        assert!(config.check().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: SandboxConfig =
            serde_json::from_str(r#"{"max_workers": 2, "enable_preload": true}"#).unwrap();
        assert_eq!(config.max_workers, 2);
        assert!(config.enable_preload);
        assert_eq!(config.max_requests, 50);
        assert_eq!(config.sandbox_user, "sandbox");
    }

    #[test]
    fn load_from_file_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_requests": 7, "worker_timeout_secs": 3}"#).unwrap();
        let config = SandboxConfig::load_from_file(&path).unwrap();
        assert_eq!(config.max_requests, 7);
        assert_eq!(config.worker_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn load_from_file_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            SandboxConfig::load_from_file(&path),
            Err(SandboxError::Config(_))
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = SandboxConfig::default();
        config
            .apply_env_overrides(lookup_from(&[
                ("SANDBOX_MAX_WORKERS", "8"),
                ("SANDBOX_ENABLE_NETWORK", "false"),
                ("SANDBOX_ALLOWED_SYSCALLS", "read, write,,exit"),
                ("SANDBOX_PYTHON_PATH", "/opt/python/bin/python3"),
            ]))
            .unwrap();
        assert_eq!(config.max_workers, 8);
        assert!(!config.enable_network);
        assert_eq!(config.allowed_syscalls, vec!["read", "write", "exit"]);
        assert_eq!(
            config.python.interpreter,
            PathBuf::from("/opt/python/bin/python3")
        );
    }

    #[test]
    fn malformed_override_is_config_error() {
        let mut config = SandboxConfig::default();
        let err = config
            .apply_env_overrides(lookup_from(&[("SANDBOX_MAX_REQUESTS", "many")]))
            .unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));

        let err = config
            .apply_env_overrides(lookup_from(&[("SANDBOX_ENABLE_PRELOAD", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));
    }

    #[test]
    fn output_limits_from_json_and_env() {
        let mut config: SandboxConfig =
            serde_json::from_str(r#"{"output_limits": {"stdout_limit": 1024}}"#).unwrap();
        assert_eq!(config.output_limits.stdout_limit, 1024);
        assert_eq!(
            config.output_limits.stderr_limit,
            OutputLimits::default().stderr_limit
        );

        config
            .apply_env_overrides(lookup_from(&[("SANDBOX_OUTPUT_LIMIT", "4096")]))
            .unwrap();
        assert_eq!(config.output_limits.combined_limit, 4096);

        config.output_limits.stderr_limit = 0;
        assert!(config.check().is_err());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut config = SandboxConfig::default();
        config.max_workers = 0;
        assert!(config.check().is_err());
    }

    #[test]
    fn socks5_proxy_sets_both_variables() {
        let proxy = ProxyConfig {
            socks5: "socks5://127.0.0.1:1080".to_string(),
            http: "http://ignored".to_string(),
            https: String::new(),
        };
        let env = proxy.environment();
        assert_eq!(env.len(), 2);
        assert!(env.iter().all(|(_, v)| v == "socks5://127.0.0.1:1080"));
    }

    #[test]
    fn http_proxies_are_independent() {
        let proxy = ProxyConfig {
            socks5: String::new(),
            http: "http://proxy:3128".to_string(),
            https: String::new(),
        };
        assert_eq!(
            proxy.environment(),
            vec![("HTTP_PROXY".to_string(), "http://proxy:3128".to_string())]
        );
        assert!(ProxyConfig::default().environment().is_empty());
    }
}
