//! The RSA signature-verification collaborator used by `FILE_DELETE` (§4.7).
//!
//! Public keys are pre-installed, named files under a `pem/` directory
//! (§6); the caller names one by its bare filename (no extension, no path
//! traversal) and the default implementation reads `<pem_dir>/<name>.pem`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rsa::{
    pkcs1v15::{Signature, VerifyingKey},
    pkcs8::DecodePublicKey,
    signature::Verifier,
    RsaPublicKey,
};
use sha2::Sha256;

use crate::error::OverlayError;

#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Verify `signature` over `message` against the public key named `pem_name`.
    async fn verify(&self, pem_name: &str, message: &[u8], signature: &[u8]) -> Result<(), OverlayError>;
}

/// Default verifier: RSASSA-PKCS1-v1_5 over SHA-256, keys loaded from a
/// `pem/` directory by name.
pub struct RsaSignatureVerifier {
    pem_dir: PathBuf,
}

impl RsaSignatureVerifier {
    pub fn new(pem_dir: impl Into<PathBuf>) -> Self {
        RsaSignatureVerifier {
            pem_dir: pem_dir.into(),
        }
    }

    fn key_path(&self, pem_name: &str) -> Result<PathBuf, OverlayError> {
        // Reject path traversal — pem_name must be a bare filename component.
        if pem_name.contains('/') || pem_name.contains('\\') || pem_name.contains("..") {
            return Err(OverlayError::SignatureInvalid(format!(
                "invalid pem name: {pem_name}"
            )));
        }
        Ok(self.pem_dir.join(format!("{pem_name}.pem")))
    }
}

#[async_trait]
impl SignatureVerifier for RsaSignatureVerifier {
    async fn verify(&self, pem_name: &str, message: &[u8], signature: &[u8]) -> Result<(), OverlayError> {
        let path = self.key_path(pem_name)?;
        verify_at_path(&path, message, signature)
    }
}

fn verify_at_path(path: &Path, message: &[u8], signature: &[u8]) -> Result<(), OverlayError> {
    let pem = std::fs::read_to_string(path)
        .map_err(|e| OverlayError::SignatureInvalid(format!("reading {}: {e}", path.display())))?;
    let public_key = RsaPublicKey::from_public_key_pem(&pem)
        .map_err(|e| OverlayError::SignatureInvalid(format!("bad public key: {e}")))?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let sig = Signature::try_from(signature)
        .map_err(|e| OverlayError::SignatureInvalid(format!("bad signature encoding: {e}")))?;
    verifying_key
        .verify(message, &sig)
        .map_err(|e| OverlayError::SignatureInvalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::{pkcs1v15::SigningKey, pkcs8::EncodePublicKey, signature::Signer, RsaPrivateKey};

    #[tokio::test]
    async fn accepts_a_valid_signature_and_rejects_a_tampered_message() {
        let mut rng = rsa::rand_core::OsRng;
        let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public = RsaPublicKey::from(&private);
        let pem = public.to_public_key_pem(Default::default()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("master.pem"), pem).unwrap();

        let signing_key = SigningKey::<Sha256>::new(private);
        let message = b"deadbeef:1700000000.0";
        let signature = signing_key.sign(message);

        let verifier = RsaSignatureVerifier::new(dir.path());
        verifier
            .verify("master", message, signature.to_bytes().as_ref())
            .await
            .expect("valid signature should verify");

        let bad = verifier
            .verify("master", b"different message", signature.to_bytes().as_ref())
            .await;
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn rejects_path_traversal_in_pem_name() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = RsaSignatureVerifier::new(dir.path());
        let result = verifier.verify("../../etc/passwd", b"x", b"y").await;
        assert!(result.is_err());
    }
}
