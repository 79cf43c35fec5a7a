//! Single-use execution keys.

use crate::config::types::{Result, SandboxError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::fmt;

/// Key length in bytes (512 bits).
pub const KEY_LEN: usize = 64;

/// A fresh random key scoped to one run. Never persisted; zeroed on drop.
pub struct ExecutionKey([u8; KEY_LEN]);

impl ExecutionKey {
    /// Draw a key from the OS CSPRNG. Failure is fatal to the run only.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; KEY_LEN];
        getrandom::getrandom(&mut bytes).map_err(|e| SandboxError::Randomness(e.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for ExecutionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExecutionKey(<redacted>)")
    }
}

impl Drop for ExecutionKey {
    fn drop(&mut self) {
        for byte in self.0.iter_mut() {
            unsafe { std::ptr::write_volatile(byte, 0) };
        }
    }
}
