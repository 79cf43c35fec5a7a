use crate::bootstrap::template::TemplateFn;
use crate::config::loader::LanguageConfig;
use crate::config::types::Language;
use std::path::Path;
use std::process::Command;

/// Runner contract for a language: what differs between interpreters.
pub trait LanguageRunner: Send + Sync {
    fn language(&self) -> Language;
    fn template(&self) -> TemplateFn;
    fn script_extension(&self) -> &'static str;

    /// `<interpreter> <script> <lib_root> <key>`, run from the library root.
    fn command(&self, config: &LanguageConfig, script: &Path, key: &str) -> Command {
        let mut cmd = Command::new(&config.interpreter);
        cmd.arg(script)
            .arg(&config.lib_root)
            .arg(key)
            .current_dir(&config.lib_root);
        cmd
    }
}
