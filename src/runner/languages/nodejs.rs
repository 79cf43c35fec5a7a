use crate::bootstrap::template::{render_nodejs, TemplateFn};
use crate::config::types::Language;
use crate::runner::adapter::LanguageRunner;

#[derive(Debug, Clone, Default)]
pub struct NodeJsRunner;

impl LanguageRunner for NodeJsRunner {
    fn language(&self) -> Language {
        Language::NodeJs
    }

    fn template(&self) -> TemplateFn {
        render_nodejs
    }

    fn script_extension(&self) -> &'static str {
        "js"
    }
}
