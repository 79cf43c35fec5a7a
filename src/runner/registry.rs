use crate::config::types::Language;
use crate::runner::adapter::LanguageRunner;
use crate::runner::languages::{nodejs::NodeJsRunner, python::PythonRunner};

pub fn runner_for(language: Language) -> Box<dyn LanguageRunner> {
    match language {
        Language::Python => Box::new(PythonRunner),
        Language::NodeJs => Box::new(NodeJsRunner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_language_has_a_runner() {
        for language in [Language::Python, Language::NodeJs] {
            assert_eq!(runner_for(language).language(), language);
        }
        assert_eq!(runner_for(Language::Python).script_extension(), "py");
        assert_eq!(runner_for(Language::NodeJs).script_extension(), "js");
    }
}
