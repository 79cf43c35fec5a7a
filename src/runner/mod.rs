//! Language runners.
//!
//! The run pipeline is shared; runners only supply the interpreter-specific
//! parts (launcher template, script extension, command line).
//!
//! A run: validate options -> lease the staging area (re-provisioning it if
//! missing) -> stage the launcher in `<lib_root>/tmp` -> spawn the interpreter
//! with an otherwise empty environment -> stream output. The launcher file is
//! deleted and the lease returned once the process is gone.

pub mod adapter;
pub mod languages;
pub mod registry;

use crate::bootstrap::CodeBootstrap;
use crate::config::loader::SandboxConfig;
use crate::config::types::{Result, RunRequest, SandboxError};
use crate::config::validator::{effective_syscalls, validate_options};
use crate::exec::{OutputCapture, OutputStreams, RunContext};
use crate::kernel::identity::SandboxIdentity;
use crate::provision::provisioner::SCRIPT_DIR;
use crate::provision::LanguageStaging;
use adapter::LanguageRunner;
use log::{debug, info, warn};
use std::fs;
use uuid::Uuid;

/// Process-wide collaborators a run needs.
#[derive(Debug, Clone, Copy)]
pub struct RunEnvironment<'a> {
    pub config: &'a SandboxConfig,
    pub identity: SandboxIdentity,
    pub staging: &'a LanguageStaging,
}

pub fn run(
    runner: &dyn LanguageRunner,
    ctx: &RunContext,
    request: &RunRequest,
    env: &RunEnvironment<'_>,
) -> Result<OutputStreams> {
    let language = runner.language();
    if request.language != language || env.staging.language() != language {
        return Err(SandboxError::InvalidOptions(format!(
            "{} request routed to the {} runner",
            request.language, language
        )));
    }

    let run_id = Uuid::new_v4();
    let options = validate_options(&request.options, env.config)?;
    let lang_config = env.config.language(language);

    let lease = env.staging.acquire()?;

    let staged = CodeBootstrap {
        identity: env.identity,
        enable_network: options.enable_network,
        preload: &request.preload,
        template: runner.template(),
        extension: runner.script_extension(),
    }
    .stage(&request.code, &lang_config.lib_root.join(SCRIPT_DIR))?;

    let mut command = runner.command(lang_config, &staged.path, &staged.key);
    command.env_clear();
    command.envs(env.config.proxy.environment());
    let syscalls = effective_syscalls(&options, env.config);
    if !syscalls.is_empty() {
        command.env("ALLOWED_SYSCALLS", syscalls.join(","));
    }

    let mut capture = OutputCapture::new(request.timeout);
    capture.set_output_limits(env.config.output_limits);
    if let Some(stdin) = &request.stdin {
        capture.set_stdin(stdin.clone());
    }
    let script = staged.path;
    capture.set_after_exit_hook(move || {
        if let Err(e) = fs::remove_file(&script) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("[{}] failed to remove {}: {}", run_id, script.display(), e);
            }
        }
        drop(lease);
        debug!("[{}] run finished, launcher removed", run_id);
    });

    info!(
        "[{}] Running {} code ({} bytes, network={}, syscalls={}, timeout={:?})",
        run_id,
        language,
        request.code.len(),
        options.enable_network,
        syscalls.len(),
        request.timeout
    );
    capture.capture(ctx, command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::template::{BootstrapParams, TemplateFn};
    use crate::config::types::{Language, RunOptions};
    use crate::provision::tests::FakeProvisioner;
    use std::path::PathBuf;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// Launcher that reports what it was started with instead of running code
    fn render_sh(params: &BootstrapParams<'_>) -> String {
        format!(
            "{}\necho \"root=$1\"\necho \"keylen=${{#2}}\"\necho \"net={}\"\necho \"uid={}\"\nenv\n",
            params.preload,
            u8::from(params.enable_network),
            params.uid,
        )
    }

    struct ShellRunner;

    impl LanguageRunner for ShellRunner {
        fn language(&self) -> Language {
            Language::Python
        }

        fn template(&self) -> TemplateFn {
            render_sh
        }

        fn script_extension(&self) -> &'static str {
            "sh"
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        lib_root: PathBuf,
        config: SandboxConfig,
        staging: LanguageStaging,
        fake: Arc<FakeProvisioner>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let lib_root = dir.path().join("sandbox-python");
        fs::create_dir_all(&lib_root).unwrap();

        let mut config = SandboxConfig::default();
        config.python.interpreter = PathBuf::from("/bin/sh");
        config.python.lib_root = lib_root.clone();
        config.allowed_syscalls = vec!["read".to_string(), "write".to_string()];

        let fake = Arc::new(FakeProvisioner::default());
        let staging = LanguageStaging::new(fake.clone());
        Fixture {
            _dir: dir,
            lib_root,
            config,
            staging,
            fake,
        }
    }

    fn run_sh(fx: &Fixture, request: &RunRequest) -> Result<crate::exec::CollectedOutput> {
        let env = RunEnvironment {
            config: &fx.config,
            identity: SandboxIdentity::new(65537, 65537).unwrap(),
            staging: &fx.staging,
        };
        run(&ShellRunner, &RunContext::background(), request, &env).map(OutputStreams::collect)
    }

    fn request(code: &str) -> RunRequest {
        RunRequest::new(Language::Python, code, Duration::from_secs(5))
    }

    #[test]
    fn launches_with_lib_root_key_and_clean_env() {
        let fx = fixture();
        let out = run_sh(&fx, &request("print(1)")).unwrap();
        let stdout = String::from_utf8(out.stdout).unwrap();

        assert!(stdout.contains(&format!("root={}\n", fx.lib_root.display())));
        assert!(stdout.contains("keylen=88\n"));
        assert!(stdout.contains("uid=65537\n"));
        assert!(stdout.contains("ALLOWED_SYSCALLS=read,write\n"));
        assert!(!stdout.contains("HOME="));
        assert!(out.report.success());
    }

    #[test]
    fn run_options_override_default_syscalls() {
        let fx = fixture();
        let req = request("x").with_options(RunOptions {
            enable_network: true,
            allowed_syscalls: vec!["openat".to_string(), "openat".to_string()],
        });
        let out = run_sh(&fx, &req).unwrap();
        let stdout = String::from_utf8(out.stdout).unwrap();
        assert!(stdout.contains("ALLOWED_SYSCALLS=openat\n"));
        assert!(stdout.contains("net=1\n"));
    }

    #[test]
    fn proxy_settings_reach_the_process() {
        let mut fx = fixture();
        fx.config.proxy.socks5 = "socks5://10.0.0.1:1080".to_string();
        let out = run_sh(&fx, &request("x")).unwrap();
        let stdout = String::from_utf8(out.stdout).unwrap();
        assert!(stdout.contains("HTTP_PROXY=socks5://10.0.0.1:1080\n"));
        assert!(stdout.contains("HTTPS_PROXY=socks5://10.0.0.1:1080\n"));
    }

    #[test]
    fn launcher_is_removed_and_lease_returned() {
        let fx = fixture();
        run_sh(&fx, &request("x")).unwrap();
        let leftovers = fs::read_dir(fx.lib_root.join(SCRIPT_DIR)).unwrap().count();
        assert_eq!(leftovers, 0);
        assert_eq!(fx.staging.area().active_leases(), 0);
    }

    #[test]
    fn missing_staging_area_is_provisioned_first() {
        let fx = fixture();
        run_sh(&fx, &request("x")).unwrap();
        run_sh(&fx, &request("x")).unwrap();
        assert_eq!(fx.fake.prepares.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn provisioning_failure_fails_the_run() {
        let fx = fixture();
        fx.fake.fail_prepare.store(true, Ordering::SeqCst);
        let err = run_sh(&fx, &request("x")).unwrap_err();
        assert_eq!(err.code(), -500);
    }

    #[test]
    fn invalid_options_are_rejected_before_staging() {
        let mut fx = fixture();
        fx.config.enable_network = false;
        let req = request("x").with_options(RunOptions {
            enable_network: true,
            allowed_syscalls: Vec::new(),
        });
        let err = run_sh(&fx, &req).unwrap_err();
        assert_eq!(err.code(), -400);
        assert_eq!(fx.fake.prepares.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn configured_output_limits_apply() {
        let mut fx = fixture();
        fx.config.output_limits.stdout_limit = 16;
        let out = run_sh(&fx, &request("x")).unwrap();
        assert_eq!(out.stdout.len(), 16);
        assert!(out.report.output_truncated);
    }

    #[test]
    fn escaped_descendant_releases_the_lease() {
        let fx = fixture();
        let mut req = request("x").with_preload("setsid sleep 5 & sleep 0.2");
        req.timeout = Duration::from_secs(10);
        let started = Instant::now();
        run_sh(&fx, &req).unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(fx.staging.area().active_leases(), 0);
    }

    #[test]
    fn timeout_is_enforced() {
        let fx = fixture();
        let mut req = request("x").with_preload("sleep 30");
        req.timeout = Duration::from_millis(300);
        let out = run_sh(&fx, &req).unwrap();
        assert!(out.report.timed_out);
        assert!(out.stdout.is_empty());
    }
}
