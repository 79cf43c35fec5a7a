/// Requirements-file parsing
use crate::config::types::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    /// Empty when the requirement is unpinned
    pub version: String,
}

/// Parse `name==version`, `name@version` and bare `name` lines.
///
/// Blank lines, `#` comments and installer options (`-r`, `--index-url`) are skipped.
pub fn parse_requirements(text: &str) -> Vec<Dependency> {
    text.lines().filter_map(parse_line).collect()
}

/// Requirements text at `path`; a missing file reads as empty.
pub fn read_requirements(path: Option<&Path>) -> Result<String> {
    let Some(path) = path else {
        return Ok(String::new());
    };
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::warn!("requirements file {} not found", path.display());
            Ok(String::new())
        }
        Err(e) => Err(SandboxError::Environment(format!(
            "failed to read requirements {}: {}",
            path.display(),
            e
        ))),
    }
}

fn parse_line(line: &str) -> Option<Dependency> {
    let line = line.split('#').next().unwrap_or_default().trim();
    if line.is_empty() || line.starts_with('-') {
        return None;
    }

    if let Some((name, version)) = line.split_once("==") {
        return Some(dependency(name, version));
    }
    // skip the scope marker of `@scope/pkg@1.0`
    if let Some(at) = line.rfind('@').filter(|&at| at > 0) {
        let (name, version) = line.split_at(at);
        return Some(dependency(name, &version[1..]));
    }
    if let Some(op) = line.find(['>', '<', '~', '!', '=']) {
        let (name, version) = line.split_at(op);
        return Some(dependency(name, version));
    }
    Some(dependency(line, ""))
}

fn dependency(name: &str, version: &str) -> Dependency {
    Dependency {
        name: name.trim().to_string(),
        version: version.trim().to_string(),
    }
}
