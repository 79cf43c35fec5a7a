//! Service façade
//!
//! Owns the process-wide state (config, identity, admission gate, staging
//! areas) and turns each call into a response envelope. Per-run failures are
//! reported in the envelope and never escape as panics or process errors.

pub mod response;

use crate::admission::AdmissionGate;
use crate::config::loader::SandboxConfig;
use crate::config::types::{Language, Result, RunOptions, RunRequest};
use crate::config::validator::validate_options;
use crate::exec::{CollectedOutput, RunContext};
use crate::kernel::identity::SandboxIdentity;
use crate::provision::dependencies::parse_requirements;
use crate::provision::provisioner::StagingProvisioner;
use crate::provision::refresher::DependencyRefresher;
use crate::provision::LanguageStaging;
use crate::runner::{self, registry::runner_for, RunEnvironment};
use log::{error, info};
use response::{DependenciesResponse, RunCodeResponse, SandboxResponse, UpdateDependenciesResponse};
use std::sync::Arc;

#[derive(Debug)]
pub struct SandboxService {
    config: SandboxConfig,
    identity: SandboxIdentity,
    gate: AdmissionGate,
    python: LanguageStaging,
    nodejs: LanguageStaging,
}

impl SandboxService {
    pub fn new(config: SandboxConfig, identity: SandboxIdentity) -> Self {
        let python = LanguageStaging::new(Arc::new(StagingProvisioner::new(
            Language::Python,
            config.python.clone(),
        )));
        let nodejs = LanguageStaging::new(Arc::new(StagingProvisioner::new(
            Language::NodeJs,
            config.nodejs.clone(),
        )));
        Self::with_staging(config, identity, python, nodejs)
    }

    /// Build with caller-supplied staging areas.
    pub fn with_staging(
        config: SandboxConfig,
        identity: SandboxIdentity,
        python: LanguageStaging,
        nodejs: LanguageStaging,
    ) -> Self {
        let gate = AdmissionGate::new(config.max_workers, config.max_requests);
        Self {
            config,
            identity,
            gate,
            python,
            nodejs,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn identity(&self) -> SandboxIdentity {
        self.identity
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn staging(&self, language: Language) -> &LanguageStaging {
        match language {
            Language::Python => &self.python,
            Language::NodeJs => &self.nodejs,
        }
    }

    /// Run `code` with the configured timeout and collect its output.
    pub fn run_code(
        &self,
        ctx: &RunContext,
        language: Language,
        code: impl Into<Vec<u8>>,
        preload: &str,
        options: RunOptions,
    ) -> SandboxResponse<RunCodeResponse> {
        let request = RunRequest::new(language, code, self.config.worker_timeout())
            .with_preload(preload)
            .with_options(options);
        self.execute(ctx, request)
    }

    /// Run a fully specified request.
    pub fn execute(&self, ctx: &RunContext, request: RunRequest) -> SandboxResponse<RunCodeResponse> {
        match self.execute_inner(ctx, request) {
            Ok(output) => SandboxResponse::success(RunCodeResponse {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Err(e) => {
                error!("run failed: {}", e);
                e.into()
            }
        }
    }

    fn execute_inner(&self, ctx: &RunContext, mut request: RunRequest) -> Result<CollectedOutput> {
        validate_options(&request.options, &self.config)?;
        let _ticket = self.gate.admit(ctx)?;

        if !self.config.enable_preload {
            request.preload.clear();
        }

        let env = RunEnvironment {
            config: &self.config,
            identity: self.identity,
            staging: self.staging(request.language),
        };
        let language_runner = runner_for(request.language);
        let output = runner::run(language_runner.as_ref(), ctx, &request, &env)?.collect();

        let report = &output.report;
        if report.timed_out {
            info!("{} run timed out after {:?}", request.language, report.elapsed);
        } else if report.cancelled {
            info!("{} run cancelled after {:?}", request.language, report.elapsed);
        } else {
            info!(
                "{} run exited (code {:?}, signal {:?}) in {:?}",
                request.language, report.exit_code, report.signal, report.elapsed
            );
        }
        Ok(output)
    }

    pub fn list_dependencies(&self, language: Language) -> SandboxResponse<DependenciesResponse> {
        match self.staging(language).provisioner().requirements() {
            Ok(text) => SandboxResponse::success(DependenciesResponse {
                dependencies: parse_requirements(&text),
            }),
            Err(e) => e.into(),
        }
    }

    /// Install the current requirements and rebuild the staging area.
    pub fn refresh_dependencies(&self, language: Language) -> SandboxResponse<DependenciesResponse> {
        if let Err(e) = self.staging(language).refresh() {
            error!("failed to refresh {} dependencies: {}", language, e);
            return e.into();
        }
        self.list_dependencies(language)
    }

    /// Rebuild the staging area without reinstalling packages.
    pub fn update_dependencies(&self, language: Language) -> SandboxResponse<UpdateDependenciesResponse> {
        match self.staging(language).rebuild() {
            Ok(()) => SandboxResponse::success(UpdateDependenciesResponse {}),
            Err(e) => {
                error!("failed to update {} dependencies: {}", language, e);
                e.into()
            }
        }
    }

    /// Start the periodic refresher when an interval is configured.
    pub fn start_refresher(&self) -> Option<DependencyRefresher> {
        let interval = self.config.deps_update_interval()?;
        Some(DependencyRefresher::start(
            interval,
            vec![self.python.clone(), self.nodejs.clone()],
        ))
    }
}
