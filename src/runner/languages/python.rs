use crate::bootstrap::template::{render_python, TemplateFn};
use crate::config::types::Language;
use crate::runner::adapter::LanguageRunner;

#[derive(Debug, Clone, Default)]
pub struct PythonRunner;

impl LanguageRunner for PythonRunner {
    fn language(&self) -> Language {
        Language::Python
    }

    fn template(&self) -> TemplateFn {
        render_python
    }

    fn script_extension(&self) -> &'static str {
        "py"
    }
}
