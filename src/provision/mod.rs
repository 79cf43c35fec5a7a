//! Dependency provisioning
//!
//! Keeps each language's staging area (library root) usable by runs:
//!
//! - [`provisioner`]: builds a staging area and installs packages into it
//! - [`staging`]: lease/refresh exclusion so rebuilds only happen between runs
//! - [`refresher`]: periodic background refresh
//! - [`dependencies`]: requirements-file listing

pub mod dependencies;
pub mod provisioner;
pub mod refresher;
pub mod staging;

use crate::config::types::{Language, Result, SandboxError};
use staging::{StagingArea, StagingLease};
use std::fmt;
use std::sync::Arc;

/// Readiness collaborator for a language's staging area
pub trait DependencyProvisioner: Send + Sync {
    fn language(&self) -> Language;
    /// Current requirements text; empty when none are configured.
    fn requirements(&self) -> Result<String>;
    fn install_dependencies(&self, requirements: &str) -> Result<()>;
    fn prepare_execution_environment(&self) -> Result<()>;
    fn is_ready(&self) -> bool;
}

/// A provisioner paired with the lease guard of the area it builds.
#[derive(Clone)]
pub struct LanguageStaging {
    provisioner: Arc<dyn DependencyProvisioner>,
    area: Arc<StagingArea>,
}

impl fmt::Debug for LanguageStaging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LanguageStaging")
            .field("language", &self.provisioner.language())
            .field("area", &self.area)
            .finish()
    }
}

impl LanguageStaging {
    pub fn new(provisioner: Arc<dyn DependencyProvisioner>) -> Self {
        Self {
            provisioner,
            area: StagingArea::new(),
        }
    }

    pub fn language(&self) -> Language {
        self.provisioner.language()
    }

    pub fn provisioner(&self) -> &dyn DependencyProvisioner {
        self.provisioner.as_ref()
    }

    pub fn area(&self) -> &Arc<StagingArea> {
        &self.area
    }

    /// Lease the area for one run, rebuilding it first when it is missing.
    pub fn acquire(&self) -> Result<StagingLease> {
        if !self.provisioner.is_ready() {
            log::warn!(
                "{} staging area not ready, re-provisioning",
                self.language()
            );
            self.area.exclusive(|| {
                // another run may have rebuilt it while we waited
                if self.provisioner.is_ready() {
                    Ok(())
                } else {
                    self.provisioner.prepare_execution_environment()
                }
            })?;
        }

        let lease = self.area.lease();
        if !self.provisioner.is_ready() {
            return Err(SandboxError::Environment(format!(
                "{} staging area is not ready",
                self.language()
            )));
        }
        Ok(lease)
    }

    /// Rebuild the area between runs.
    pub fn rebuild(&self) -> Result<()> {
        self.area
            .exclusive(|| self.provisioner.prepare_execution_environment())
    }

    /// Install the current requirements, then rebuild, between runs.
    pub fn refresh(&self) -> Result<()> {
        let requirements = self.provisioner.requirements()?;
        self.area.exclusive(|| {
            self.provisioner.install_dependencies(&requirements)?;
            self.provisioner.prepare_execution_environment()
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory provisioner recording calls
    #[derive(Default)]
    pub(crate) struct FakeProvisioner {
        pub ready: AtomicBool,
        pub prepares: AtomicUsize,
        pub installs: AtomicUsize,
        pub fail_prepare: AtomicBool,
    }

    impl DependencyProvisioner for FakeProvisioner {
        fn language(&self) -> Language {
            Language::Python
        }

        fn requirements(&self) -> Result<String> {
            Ok("numpy==1.0\n".to_string())
        }

        fn install_dependencies(&self, _requirements: &str) -> Result<()> {
            self.installs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn prepare_execution_environment(&self) -> Result<()> {
            self.prepares.fetch_add(1, Ordering::SeqCst);
            if self.fail_prepare.load(Ordering::SeqCst) {
                return Err(SandboxError::Environment("prepare failed".to_string()));
            }
            self.ready.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn acquire_provisions_lazily_once() {
        let fake = Arc::new(FakeProvisioner::default());
        let staging = LanguageStaging::new(fake.clone());

        let first = staging.acquire().unwrap();
        let second = staging.acquire().unwrap();
        assert_eq!(fake.prepares.load(Ordering::SeqCst), 1);
        assert_eq!(staging.area().active_leases(), 2);
        drop((first, second));
        assert_eq!(staging.area().active_leases(), 0);
    }

    #[test]
    fn failed_provisioning_surfaces_as_error() {
        let fake = Arc::new(FakeProvisioner::default());
        fake.fail_prepare.store(true, Ordering::SeqCst);
        let staging = LanguageStaging::new(fake.clone());

        let err = staging.acquire().unwrap_err();
        assert!(matches!(err, SandboxError::Environment(_)));
        assert_eq!(staging.area().active_leases(), 0);
    }

    #[test]
    fn refresh_installs_then_prepares() {
        let fake = Arc::new(FakeProvisioner::default());
        let staging = LanguageStaging::new(fake.clone());
        staging.refresh().unwrap();
        assert_eq!(fake.installs.load(Ordering::SeqCst), 1);
        assert_eq!(fake.prepares.load(Ordering::SeqCst), 1);
        assert!(fake.is_ready());
    }
}
