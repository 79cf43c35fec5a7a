//! XOR obfuscation of user code.
//!
//! This is not encryption: the key travels next to the payload as a launch
//! argument. It keeps plaintext code out of the script file and the launch
//! arguments until the interpreter decodes it.

use crate::bootstrap::key::ExecutionKey;
use crate::config::types::{Result, SandboxError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Base64 cipher text paired with its base64 key.
#[derive(Clone, PartialEq, Eq)]
pub struct ObfuscatedPayload {
    pub code: String,
    pub key: String,
}

impl std::fmt::Debug for ObfuscatedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObfuscatedPayload")
            .field("code_len", &self.code.len())
            .finish_non_exhaustive()
    }
}

/// `out[i] = data[i] ^ key[i % key.len()]`. Applying it twice with the same key
/// is the identity.
pub fn xor_with_key(data: &[u8], key: &[u8]) -> Vec<u8> {
    if key.is_empty() {
        return data.to_vec();
    }
    data.iter()
        .zip(key.iter().cycle())
        .map(|(byte, k)| byte ^ k)
        .collect()
}

/// Obfuscate `code` with a freshly generated key.
pub fn obfuscate(code: &[u8]) -> Result<ObfuscatedPayload> {
    let key = ExecutionKey::generate()?;
    Ok(obfuscate_with(code, &key))
}

pub(crate) fn obfuscate_with(code: &[u8], key: &ExecutionKey) -> ObfuscatedPayload {
    ObfuscatedPayload {
        code: STANDARD.encode(xor_with_key(code, key.as_bytes())),
        key: key.to_base64(),
    }
}

/// Inverse of [`obfuscate`]; this is what the bootstrap script does in-process.
pub fn reveal(payload: &ObfuscatedPayload) -> Result<Vec<u8>> {
    let cipher = STANDARD
        .decode(&payload.code)
        .map_err(|e| SandboxError::Process(format!("invalid payload encoding: {e}")))?;
    let key = STANDARD
        .decode(&payload.key)
        .map_err(|e| SandboxError::Process(format!("invalid key encoding: {e}")))?;
    Ok(xor_with_key(&cipher, &key))
}
