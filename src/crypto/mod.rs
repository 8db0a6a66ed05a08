//! Cryptographic Operations Module
//!
//! Attestation signing for the verifier. One 32-byte secret, loaded from the environment
//! variable named in the config, backs both schemes:
//!
//! - EVM: secp256k1 recoverable signature over the Ethereum-prefixed message hash,
//!   encoded as `r || s || v` (65 bytes, v = 27 or 28)
//! - MVM / SVM: Ed25519 signature over the message hash (64 bytes)
//!
//! Private keys must never be logged.

use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signature as Ed25519Signature, Signer, SigningKey, Verifier, VerifyingKey};
use k256::ecdsa::{
    RecoveryId, Signature as EcdsaSignature, SigningKey as EcdsaSigningKey,
    VerifyingKey as EcdsaVerifyingKey,
};
use tracing::info;

use crate::config::{ChainFamily, Config};
use crate::message::keccak256;

/// Signature scheme used for attestations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// secp256k1 with Ethereum message prefix, 65-byte `r || s || v`
    EcdsaSecp256k1,
    /// Ed25519, 64 bytes
    Ed25519,
}

impl From<ChainFamily> for SignatureScheme {
    fn from(family: ChainFamily) -> Self {
        match family {
            ChainFamily::Evm => Self::EcdsaSecp256k1,
            ChainFamily::Mvm | ChainFamily::Svm => Self::Ed25519,
        }
    }
}

// ============================================================================
// ATTESTATION SIGNER IMPLEMENTATION
// ============================================================================

/// Signs message hashes on behalf of the verifier.
pub struct AttestationSigner {
    scheme: SignatureScheme,
    /// Ed25519 signing key
    signing_key: SigningKey,
    /// ECDSA signing key for EVM (secp256k1), same 32-byte secret
    ecdsa_signing_key: EcdsaSigningKey,
}

impl std::fmt::Debug for AttestationSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationSigner")
            .field("scheme", &self.scheme)
            .field("public_key", &self.get_public_key())
            .finish()
    }
}

impl AttestationSigner {
    /// Creates a signer from configuration.
    ///
    /// Loads the base64 secret from the environment variable named by
    /// `verifier.signer_private_key_env` and picks the scheme from the source family.
    pub fn from_config(config: &Config) -> Result<Self> {
        let private_key_b64 = config.verifier.get_private_key()?;
        let private_key_bytes = general_purpose::STANDARD.decode(private_key_b64.trim())?;

        if private_key_bytes.len() != 32 {
            return Err(anyhow::anyhow!(
                "Invalid private key length: expected 32 bytes, got {}",
                private_key_bytes.len()
            ));
        }

        let secret: [u8; 32] = private_key_bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Failed to convert private key to array"))?;

        let signer = Self::from_secret(&secret, config.source_family()?.into())?;
        info!(
            "Attestation signer initialized ({:?}) from environment variable '{}'",
            signer.scheme, config.verifier.signer_private_key_env
        );
        Ok(signer)
    }

    /// Creates a signer from a raw 32-byte secret.
    pub fn from_secret(secret: &[u8; 32], scheme: SignatureScheme) -> Result<Self> {
        let signing_key = SigningKey::from_bytes(secret);
        let ecdsa_signing_key = EcdsaSigningKey::from_bytes(&(*secret).into())
            .map_err(|e| anyhow::anyhow!("Failed to create ECDSA signing key: {}", e))?;

        Ok(Self {
            scheme,
            signing_key,
            ecdsa_signing_key,
        })
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    /// Signs a 32-byte message hash with the configured scheme.
    pub fn sign(&self, message_hash: &[u8; 32]) -> Result<Vec<u8>> {
        match self.scheme {
            SignatureScheme::EcdsaSecp256k1 => self.sign_evm(message_hash),
            SignatureScheme::Ed25519 => Ok(self.signing_key.sign(message_hash).to_bytes().to_vec()),
        }
    }

    /// Checks that `signature` over `message_hash` was produced by this signer.
    pub fn verify(&self, message_hash: &[u8; 32], signature: &[u8]) -> bool {
        match self.scheme {
            SignatureScheme::EcdsaSecp256k1 => self.verify_evm(message_hash, signature),
            SignatureScheme::Ed25519 => {
                let Ok(bytes) = <[u8; 64]>::try_from(signature) else {
                    return false;
                };
                self.signing_key
                    .verifying_key()
                    .verify(message_hash, &Ed25519Signature::from_bytes(&bytes))
                    .is_ok()
            }
        }
    }

    /// Returns the Ed25519 public key as a base64 string.
    pub fn get_public_key(&self) -> String {
        general_purpose::STANDARD.encode(self.ed25519_verifying_key().to_bytes())
    }

    fn ed25519_verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Derives the Ethereum address from the ECDSA public key.
    ///
    /// The Ethereum address is computed as:
    /// keccak256(uncompressed_public_key)[12:32] (last 20 bytes)
    pub fn get_ethereum_address(&self) -> Result<String> {
        let public_key_point = self.ecdsa_signing_key.verifying_key().to_encoded_point(false);
        let public_key_bytes = public_key_point.as_bytes();

        // Uncompressed format: 0x04 || x (32 bytes) || y (32 bytes) = 65 bytes total
        if public_key_bytes.len() != 65 || public_key_bytes[0] != 0x04 {
            return Err(anyhow::anyhow!(
                "Invalid public key format: expected 65 bytes with 0x04 prefix"
            ));
        }

        let hash = keccak256(&public_key_bytes[1..]);
        Ok(format!("0x{}", hex::encode(&hash[12..32])))
    }

    /// Signs `keccak256("\x19Ethereum Signed Message:\n32" || message_hash)`.
    fn sign_evm(&self, message_hash: &[u8; 32]) -> Result<Vec<u8>> {
        let prefixed_hash = eth_signed_message_hash(message_hash);

        let (signature, recovery_id) = self
            .ecdsa_signing_key
            .sign_prehash_recoverable(&prefixed_hash)
            .map_err(|e| anyhow::anyhow!("Failed to sign precomputed hash: {}", e))?;

        // r || s || v, with v in Ethereum format (27 or 28)
        let mut final_sig = Vec::with_capacity(65);
        final_sig.extend_from_slice(&signature.to_bytes());
        final_sig.push(recovery_id.to_byte() + 27);
        Ok(final_sig)
    }

    fn verify_evm(&self, message_hash: &[u8; 32], signature: &[u8]) -> bool {
        if signature.len() != 65 {
            return false;
        }
        let Ok(sig) = EcdsaSignature::from_slice(&signature[..64]) else {
            return false;
        };
        let Some(recovery_id) = signature[64].checked_sub(27).and_then(RecoveryId::from_byte)
        else {
            return false;
        };

        let prefixed_hash = eth_signed_message_hash(message_hash);
        EcdsaVerifyingKey::recover_from_prehash(&prefixed_hash, &sig, recovery_id)
            .map(|recovered| recovered == *self.ecdsa_signing_key.verifying_key())
            .unwrap_or(false)
    }
}

fn eth_signed_message_hash(message_hash: &[u8; 32]) -> [u8; 32] {
    let prefix = b"\x19Ethereum Signed Message:\n32";
    let mut prefixed_message = Vec::with_capacity(prefix.len() + 32);
    prefixed_message.extend_from_slice(prefix);
    prefixed_message.extend_from_slice(message_hash);
    keccak256(&prefixed_message)
}
