use crate::config::loader::SandboxConfig;
use crate::config::types::{Language, RunOptions, RunRequest};
use crate::exec::{CancelHandle, RunContext};
use crate::kernel::identity::SandboxIdentity;
use crate::service::response::SandboxResponse;
use crate::service::SandboxService;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::{select, Receiver};
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about = "Run untrusted Python and Node.js code as a low-privilege sandbox user", long_about = None)]
struct Cli {
    /// Path to the JSON config file (defaults to ./config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute code and print the JSON response
    Run {
        /// Language (python3 or nodejs)
        #[arg(long)]
        language: Language,
        /// Source code as string
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        code: Option<String>,
        /// Read source code from a file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Snippet run before the code, ignored unless preloading is enabled
        #[arg(long, default_value = "")]
        preload: String,
        /// Input data to pass to stdin
        #[arg(long)]
        stdin: Option<String>,
        /// Allow network access (must also be enabled in the config)
        #[arg(long)]
        enable_network: bool,
        /// Syscall to allow; repeat for more. Defaults to the configured list
        #[arg(long = "allowed-syscall", value_name = "NAME")]
        allowed_syscalls: Vec<String>,
        /// Wall clock limit in seconds (defaults to worker_timeout_secs)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Build the language's staging area
    Prepare {
        #[arg(long)]
        language: Language,
    },
    /// Install the configured requirements, then rebuild the staging area
    InstallDeps {
        #[arg(long)]
        language: Language,
    },
    /// List the configured requirements
    ListDeps {
        #[arg(long)]
        language: Language,
    },
    /// Report identity, admission limits and staging readiness
    Check,
}

impl Commands {
    /// Only runs react to SIGINT/SIGTERM; everything else keeps the default
    /// disposition and dies on the signal.
    fn cancellable(&self) -> bool {
        matches!(self, Commands::Run { .. })
    }
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn signal_handler(_sig: i32) {
    // async-signal-safe: only an atomic store
    INTERRUPTED.store(true, Ordering::SeqCst);
}

fn setup_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as usize);
        libc::signal(libc::SIGINT, signal_handler as usize);
    }
}

/// Cancel the run when SIGINT/SIGTERM arrives, until `finished` closes.
fn watch_signals(handle: CancelHandle, finished: Receiver<()>) {
    thread::spawn(move || {
        let ticker = crossbeam_channel::tick(Duration::from_millis(50));
        loop {
            select! {
                recv(finished) -> _ => return,
                recv(ticker) -> _ => {
                    if INTERRUPTED.load(Ordering::SeqCst) {
                        log::warn!("Interrupted, cancelling run");
                        handle.cancel();
                        return;
                    }
                },
            }
        }
    });
}

/// Install the logger before anything else logs. Without `RUST_LOG` the
/// configured level applies once the config is loaded.
fn init_logging() -> bool {
    let from_env = std::env::var_os("RUST_LOG").is_some();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
    from_env
}

fn apply_log_level(level: &str) {
    match log::LevelFilter::from_str(level) {
        Ok(filter) => log::set_max_level(filter),
        Err(_) => log::warn!("unknown log_level {:?}, keeping info", level),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<SandboxConfig> {
    let config = match path {
        Some(path) => SandboxConfig::load_from_file(path),
        None => SandboxConfig::load_default(),
    };
    config.context("failed to load configuration")
}

fn print_response<T: Serialize>(response: &SandboxResponse<T>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(response)?);
    if !response.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let rust_log = init_logging();

    let cli = Cli::parse();
    if cli.command.cancellable() {
        setup_signal_handlers();
    }
    let config = load_config(cli.config.as_ref())?;
    if !rust_log {
        apply_log_level(&config.log_level);
    }

    let identity = SandboxIdentity::resolve_or_create(&config.sandbox_user, config.sandbox_uid)
        .context("failed to resolve sandbox identity")?;
    log::info!(
        "Sandbox identity {} (uid={}, gid={})",
        config.sandbox_user,
        identity.uid(),
        identity.gid()
    );

    let service = SandboxService::new(config, identity);
    let _refresher = service.start_refresher();

    match cli.command {
        Commands::Run {
            language,
            code,
            file,
            preload,
            stdin,
            enable_network,
            allowed_syscalls,
            timeout,
        } => {
            let code = match (code, file) {
                (Some(code), _) => code.into_bytes(),
                (None, Some(file)) => std::fs::read(&file)
                    .with_context(|| format!("failed to read {}", file.display()))?,
                (None, None) => anyhow::bail!("either --code or --file is required"),
            };
            let timeout = timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| service.config().worker_timeout());

            let mut request = RunRequest::new(language, code, timeout)
                .with_preload(preload)
                .with_options(RunOptions {
                    enable_network,
                    allowed_syscalls,
                });
            if let Some(stdin) = stdin {
                request = request.with_stdin(stdin.into_bytes());
            }

            let (ctx, handle) = RunContext::with_cancel();
            let (finished_tx, finished_rx) = crossbeam_channel::bounded::<()>(0);
            watch_signals(handle, finished_rx);
            let response = service.execute(&ctx, request);
            drop(finished_tx);
            print_response(&response)
        }
        Commands::Prepare { language } => print_response(&service.update_dependencies(language)),
        Commands::InstallDeps { language } => {
            print_response(&service.refresh_dependencies(language))
        }
        Commands::ListDeps { language } => print_response(&service.list_dependencies(language)),
        Commands::Check => {
            let staging: serde_json::Map<String, serde_json::Value> =
                [Language::Python, Language::NodeJs]
                    .into_iter()
                    .map(|language| {
                        let lang_config = service.config().language(language);
                        (
                            language.to_string(),
                            serde_json::json!({
                                "ready": service.staging(language).provisioner().is_ready(),
                                "interpreter": lang_config.interpreter,
                                "lib_root": lang_config.lib_root,
                            }),
                        )
                    })
                    .collect();
            let report = serde_json::json!({
                "identity": { "uid": identity.uid(), "gid": identity.gid() },
                "max_workers": service.gate().max_workers(),
                "max_requests": service.gate().max_requests(),
                "staging": staging,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}
