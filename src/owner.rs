//! Signed owner identifiers
//!
//! A token is `<owner_id>.<signature>` where the signature is the URL-safe
//! base64 HMAC-SHA256 of the owner id. Owner ids never contain a dot, so the
//! last dot always separates the two halves.

use crate::storage::{Storage, StorageResult};
use anyhow::{anyhow, Result};
use base64::prelude::*;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct OwnerTokens {
    key: Vec<u8>,
}

impl std::fmt::Debug for OwnerTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerTokens").finish_non_exhaustive()
    }
}

impl OwnerTokens {
    /// Build a signer from `secret`
    /// If secret is None, generates a random key (WARNING: tokens won't survive restarts)
    pub fn new(secret: Option<&str>) -> Self {
        let key = match secret {
            Some(s) if !s.is_empty() => s.as_bytes().to_vec(),
            _ => {
                use rand::RngExt;
                let mut rng = rand::rng();
                (0..32).map(|_| rng.random::<u8>()).collect()
            }
        };
        Self { key }
    }

    fn signature(&self, owner_id: &str) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| anyhow!("Failed to create HMAC: {}", e))?;
        mac.update(owner_id.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Sign an owner id
    pub fn issue(&self, owner_id: &str) -> Result<String> {
        let signature = self.signature(owner_id)?;
        Ok(format!(
            "{}.{}",
            owner_id,
            BASE64_URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    /// Return the owner id carried by `token` if its signature checks out
    pub fn verify(&self, token: &str) -> Option<String> {
        let (owner_id, signature_b64) = token.rsplit_once('.')?;
        if owner_id.is_empty() {
            return None;
        }

        let provided = BASE64_URL_SAFE_NO_PAD.decode(signature_b64).ok()?;
        let expected = self.signature(owner_id).ok()?;

        if expected.ct_eq(&provided[..]).into() {
            Some(owner_id.to_string())
        } else {
            None
        }
    }

    /// Mint a new owner through the backend and return `(owner_id, token)`
    pub async fn create(&self, storage: &dyn Storage) -> StorageResult<(String, String)> {
        let owner_id = storage.create_user().await?;
        let token = self.issue(&owner_id)?;
        Ok((owner_id, token))
    }
}
