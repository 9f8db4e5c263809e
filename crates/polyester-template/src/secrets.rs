//! Secret decoding boundary. The manifest's `secrets/` directory holds
//! ciphertext; an implementation of [`SecretDecoder`] turns it into
//! plaintext bytes before a template sees it. Nothing in this workspace
//! implements a real cipher — callers that need one (age, sops, a vault
//! client) plug it in at this seam.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("failed to decode secret {name:?}: {reason}")]
    Decode { name: String, reason: String },
}

pub trait SecretDecoder: Send + Sync {
    fn decode(&self, name: &str, ciphertext: &[u8]) -> Result<Vec<u8>, SecretError>;
}

/// The default decoder: treats `secrets/` contents as already-plaintext.
/// Correct for manifests that keep secrets out of band (injected at deploy
/// time, mounted read-only) and a deliberate no-op otherwise — it never
/// invents a cipher.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDecoder;

impl SecretDecoder for NullDecoder {
    fn decode(&self, _name: &str, ciphertext: &[u8]) -> Result<Vec<u8>, SecretError> {
        Ok(ciphertext.to_vec())
    }
}
