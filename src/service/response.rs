//! Response envelopes returned by the service
use crate::config::types::SandboxError;
use crate::provision::dependencies::Dependency;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxResponse<T> {
    /// 0 on success, negative error class otherwise
    pub code: i32,
    pub message: String,
    pub data: Option<T>,
}

impl<T> SandboxResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

impl<T> From<SandboxError> for SandboxResponse<T> {
    fn from(err: SandboxError) -> Self {
        Self::error(err.code(), err.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCodeResponse {
    pub stdout: String,
    #[serde(rename = "error")]
    pub stderr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependenciesResponse {
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDependenciesResponse {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_envelope_shape() {
        let resp = SandboxResponse::success(RunCodeResponse {
            stdout: "hi\n".to_string(),
            stderr: String::new(),
        });
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"code": 0, "message": "success", "data": {"stdout": "hi\n", "error": ""}})
        );
    }

    #[test]
    fn errors_map_to_codes() {
        let resp: SandboxResponse<RunCodeResponse> =
            SandboxError::Unavailable("Too many requests".to_string()).into();
        assert_eq!(resp.code, -503);
        assert_eq!(resp.message, "Too many requests");
        assert!(resp.data.is_none());

        let resp: SandboxResponse<()> =
            SandboxError::InvalidOptions("bad syscall".to_string()).into();
        assert_eq!(resp.code, -400);
        assert!(!resp.is_success());
    }
}
