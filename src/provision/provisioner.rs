/// Per-language staging-area provisioning
///
/// A staging area is the library root a language's runs execute in: mirrored
/// host library paths, the native sandbox helper and a `tmp/` directory for
/// launcher scripts.
use super::dependencies::{parse_requirements, read_requirements};
use super::DependencyProvisioner;
use crate::bootstrap::template::HELPER_LIBRARY_NAME;
use crate::config::loader::LanguageConfig;
use crate::config::types::{Language, Result, SandboxError};
use crate::safety::workspace::with_temp_dir;
use log::{info, warn};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const ENV_SCRIPT: &str = include_str!("../../scripts/env.sh");

/// Directory inside a library root that receives launcher scripts
pub const SCRIPT_DIR: &str = "tmp";

#[derive(Debug, Clone)]
pub struct StagingProvisioner {
    language: Language,
    config: LanguageConfig,
    workspace_root: PathBuf,
}

impl StagingProvisioner {
    pub fn new(language: Language, config: LanguageConfig) -> Self {
        Self {
            language,
            config,
            workspace_root: std::env::temp_dir(),
        }
    }

    /// Where scratch workspaces for provisioning are created.
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn lib_root(&self) -> &Path {
        &self.config.lib_root
    }

    pub fn script_dir(&self) -> PathBuf {
        self.config.lib_root.join(SCRIPT_DIR)
    }

    fn mirror_lib_paths(&self, workspace: &Path) -> Result<()> {
        let script = workspace.join("env.sh");
        write_file(&script, ENV_SCRIPT.as_bytes(), 0o755)?;

        for lib_path in &self.config.lib_paths {
            if !lib_path.exists() {
                warn!(
                    "{} lib path {} is not available, skipping",
                    self.language,
                    lib_path.display()
                );
                continue;
            }
            let output = Command::new("/bin/sh")
                .arg(&script)
                .arg(lib_path)
                .arg(&self.config.lib_root)
                .output()
                .map_err(|e| {
                    SandboxError::Environment(format!("failed to run env.sh: {}", e))
                })?;
            check_output(&output, &format!("mirroring {}", lib_path.display()))?;
        }
        Ok(())
    }

    fn install_helper(&self) -> Result<()> {
        let target = self.config.lib_root.join(HELPER_LIBRARY_NAME);
        fs::copy(&self.config.helper_library, &target).map_err(|e| {
            SandboxError::Environment(format!(
                "failed to stage sandbox helper {}: {}",
                self.config.helper_library.display(),
                e
            ))
        })?;
        Ok(())
    }

    fn install_command(&self, requirements_path: &Path, requirements: &str) -> Command {
        match self.language {
            Language::Python => {
                let mut cmd = Command::new(&self.config.interpreter);
                cmd.args(["-m", "pip", "install", "--no-input", "-r"])
                    .arg(requirements_path);
                cmd
            }
            Language::NodeJs => {
                let mut cmd = Command::new("npm");
                cmd.arg("install")
                    .arg("--prefix")
                    .arg(&self.config.lib_root)
                    .args(parse_requirements(requirements).into_iter().map(|dep| {
                        if dep.version.is_empty() {
                            dep.name
                        } else {
                            format!("{}@{}", dep.name, dep.version)
                        }
                    }));
                cmd
            }
        }
    }
}

impl DependencyProvisioner for StagingProvisioner {
    fn language(&self) -> Language {
        self.language
    }

    fn requirements(&self) -> Result<String> {
        read_requirements(self.config.requirements_file.as_deref())
    }

    fn install_dependencies(&self, requirements: &str) -> Result<()> {
        if requirements.trim().is_empty() {
            return Ok(());
        }
        info!("Installing {} dependencies", self.language);

        with_temp_dir(&self.workspace_root, &[], |workspace| {
            let path = workspace.join("requirements.txt");
            write_file(&path, requirements.as_bytes(), 0o644)?;

            let output = self
                .install_command(&path, requirements)
                .current_dir(workspace)
                .output()
                .map_err(|e| {
                    SandboxError::Environment(format!(
                        "failed to run {} package installer: {}",
                        self.language, e
                    ))
                })?;
            check_output(&output, "dependency installation")
        })
    }

    fn prepare_execution_environment(&self) -> Result<()> {
        info!(
            "Preparing {} staging area at {}",
            self.language,
            self.config.lib_root.display()
        );
        fs::create_dir_all(&self.config.lib_root).map_err(|e| {
            SandboxError::Environment(format!(
                "failed to create {}: {}",
                self.config.lib_root.display(),
                e
            ))
        })?;

        with_temp_dir(&self.workspace_root, &[], |workspace| {
            self.mirror_lib_paths(workspace)
        })?;
        self.install_helper()?;

        fs::create_dir_all(self.script_dir()).map_err(|e| {
            SandboxError::Environment(format!(
                "failed to create script directory {}: {}",
                self.script_dir().display(),
                e
            ))
        })?;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.script_dir().is_dir() && self.config.lib_root.join(HELPER_LIBRARY_NAME).is_file()
    }
}

fn write_file(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
        .map_err(|e| SandboxError::Environment(format!("failed to write {}: {}", path.display(), e)))?;
    file.write_all(contents)?;
    Ok(())
}

fn check_output(output: &Output, what: &str) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(SandboxError::Environment(format!(
        "{} failed ({}): {}",
        what,
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
    )))
}
