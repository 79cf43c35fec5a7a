//! End-to-end scenarios against a real interpreter.
//!
//! These need root, the sandbox helper library and network-free Python at the
//! configured paths, so they are ignored by default:
//!
//! ```text
//! sudo -E cargo test --test sandbox_scenarios -- --ignored
//! ```

use codebox::config::loader::SandboxConfig;
use codebox::config::types::{Language, RunOptions};
use codebox::exec::RunContext;
use codebox::kernel::identity::SandboxIdentity;
use codebox::service::SandboxService;
use std::time::{Duration, Instant};

fn service(tweak: impl FnOnce(&mut SandboxConfig)) -> SandboxService {
    let mut config = SandboxConfig::load_default().unwrap();
    config.deps_update_interval_secs = 0;
    tweak(&mut config);
    let identity = SandboxIdentity::resolve_or_create(&config.sandbox_user, config.sandbox_uid)
        .expect("sandbox identity");
    let service = SandboxService::new(config, identity);
    assert!(service.update_dependencies(Language::Python).is_success());
    service
}

#[test]
#[ignore = "needs root, python3 and the sandbox helper library"]
fn test_python_hello() {
    let service = service(|c| c.worker_timeout_secs = 5);
    let resp = service.run_code(
        &RunContext::background(),
        Language::Python,
        "print(\"hi\")",
        "",
        RunOptions::default(),
    );
    assert_eq!(resp.code, 0, "{}", resp.message);
    let data = resp.data.unwrap();
    assert_eq!(data.stdout, "hi\n");
    assert_eq!(data.stderr, "");
}

#[test]
#[ignore = "needs root, python3 and the sandbox helper library"]
fn test_python_sleep_is_cut_off() {
    let service = service(|c| c.worker_timeout_secs = 1);
    let started = Instant::now();
    let resp = service.run_code(
        &RunContext::background(),
        Language::Python,
        "import time\ntime.sleep(10)\nprint('late')",
        "",
        RunOptions::default(),
    );
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(resp.code, 0);
    assert_eq!(resp.data.unwrap().stdout, "");
}

#[test]
#[ignore = "needs root, python3 and the sandbox helper library"]
fn test_disallowed_syscall_fails_inside_the_run() {
    let service = service(|_| {});
    let resp = service.run_code(
        &RunContext::background(),
        Language::Python,
        "import os\nprint(os.listdir('/'))",
        "",
        RunOptions {
            enable_network: false,
            allowed_syscalls: vec!["read".to_string(), "write".to_string()],
        },
    );
    assert_eq!(resp.code, 0);
    let data = resp.data.unwrap();
    assert!(data.stdout.is_empty());
    assert!(!data.stderr.is_empty());
}
