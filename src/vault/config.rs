#![forbid(unsafe_code)]

//! Vault config token codec: `vault.cryptomator`.
//!
//! A compact HS256-signed token (three base64url segments joined by `.`)
//! asserting the vault's format parameters, signed with `encKey ‖ macKey`.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::crypto::CryptoError;
use crate::crypto::keys::MasterKey;

/// Vault format version this codec emits and requires.
pub const FORMAT: u32 = 8;
/// Filename-shortening threshold (characters) this codec emits and requires.
pub const SHORTENING_THRESHOLD: usize = 220;
/// The only cipher combination this codec supports.
pub const CIPHER_COMBO: &str = "SIV_CTRMAC";
/// `kid` header claim identifying the co-located masterkey file.
pub const KEY_ID: &str = "masterkeyfile:masterkey.cryptomator";

/// Claims carried by the vault config token.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VaultConfigurationClaims {
    pub format: u32,
    #[serde(rename = "shorteningThreshold")]
    pub shortening_threshold: usize,
    pub jti: String,
    #[serde(rename = "cipherCombo")]
    pub cipher_combo: String,
}

impl VaultConfigurationClaims {
    fn expected(jti: String) -> Self {
        Self {
            format: FORMAT,
            shortening_threshold: SHORTENING_THRESHOLD,
            jti,
            cipher_combo: CIPHER_COMBO.to_string(),
        }
    }

    fn matches_required_parameters(&self) -> bool {
        self.format == FORMAT
            && self.shortening_threshold == SHORTENING_THRESHOLD
            && self.cipher_combo == CIPHER_COMBO
    }
}

/// A vault config token: the raw compact token plus its parsed claims.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub claims: VaultConfigurationClaims,
    raw: String,
}

/// Errors building or reading the vault config token.
#[derive(Error, Debug)]
pub enum VaultConfigError {
    /// The token is not well-formed compact JWT.
    #[error("vault config token is malformed: {0}")]
    Malformed(#[from] jsonwebtoken::errors::Error),
    /// Signature verification failed.
    #[error("vault config signature verification failed")]
    BadSignature,
    /// One or more required parameter claims did not match this format.
    #[error("unsupported vault parameter: {0:?}")]
    UnsupportedParameter(VaultConfigurationClaims),
    /// The token header is missing the `kid` claim or it doesn't match.
    #[error("vault config token is missing or has an unexpected 'kid' header")]
    MissingKeyId,
    /// Cryptographic key access failed.
    #[error("cryptographic operation failed: {0}")]
    Crypto(#[from] CryptoError),
}

impl VaultConfig {
    /// Build and sign a fresh config token for a newly created vault.
    #[instrument(level = "debug", skip(master_key))]
    pub fn new(master_key: &MasterKey) -> Result<Self, VaultConfigError> {
        let claims = VaultConfigurationClaims::expected(Uuid::new_v4().to_string());
        let signing_key = master_key.jwt_signing_key()?;

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(KEY_ID.to_string());

        let raw = encode(&header, &claims, &EncodingKey::from_secret(signing_key.as_slice()))?;
        debug!("vault config token created");
        Ok(Self { claims, raw })
    }

    /// Parse claims and header *without* verifying the signature. Used to
    /// recover the `kid` (and thus where to find the masterkey file) before
    /// the master key itself is available.
    pub fn unmarshal_unverified(raw: &str) -> Result<Self, VaultConfigError> {
        let header = decode_header(raw)?;
        if header.kid.as_deref() != Some(KEY_ID) {
            return Err(VaultConfigError::MissingKeyId);
        }

        // Decode without verifying: use a permissive validation that still
        // parses the payload so we can read the claims.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        let dummy_key = DecodingKey::from_secret(&[0u8; 64]);
        let data = decode::<VaultConfigurationClaims>(raw, &dummy_key, &validation)?;

        Ok(Self {
            claims: data.claims,
            raw: raw.to_string(),
        })
    }

    /// Recompute the HS256 signature with `master_key` and check it in
    /// constant time, then assert every parameter claim equals the one
    /// constant this format accepts.
    #[instrument(level = "debug", skip(self, master_key))]
    pub fn verify(&self, master_key: &MasterKey) -> Result<(), VaultConfigError> {
        let signing_key = master_key.jwt_signing_key()?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        decode::<VaultConfigurationClaims>(
            &self.raw,
            &DecodingKey::from_secret(signing_key.as_slice()),
            &validation,
        )
        .map_err(|_| {
            warn!("vault config signature verification failed");
            VaultConfigError::BadSignature
        })?;

        if !self.claims.matches_required_parameters() {
            warn!(claims = ?self.claims, "vault config parameters do not match the required constants");
            return Err(VaultConfigError::UnsupportedParameter(self.claims.clone()));
        }

        debug!("vault config verified");
        Ok(())
    }

    /// The raw compact token bytes, ready to write to `vault.cryptomator`.
    #[must_use]
    pub fn marshal(&self) -> &str {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_correct_keys() {
        let master_key = MasterKey::random().unwrap();
        let config = VaultConfig::new(&master_key).unwrap();

        let unverified = VaultConfig::unmarshal_unverified(config.marshal()).unwrap();
        assert_eq!(unverified.claims, config.claims);
        unverified.verify(&master_key).unwrap();
    }

    #[test]
    fn wrong_key_fails_verification() {
        let master_key = MasterKey::random().unwrap();
        let other_key = MasterKey::random().unwrap();
        let config = VaultConfig::new(&master_key).unwrap();

        let unverified = VaultConfig::unmarshal_unverified(config.marshal()).unwrap();
        let result = unverified.verify(&other_key);
        assert!(matches!(result, Err(VaultConfigError::BadSignature)));
    }

    #[test]
    fn tampered_claim_is_rejected_even_with_correct_signature() {
        // Build a token with a wrong cipher combo signed with the real key,
        // simulating an implementation bug or an attempt to downgrade.
        let master_key = MasterKey::random().unwrap();
        let signing_key = master_key.jwt_signing_key().unwrap();
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(KEY_ID.to_string());
        let bad_claims = VaultConfigurationClaims {
            format: FORMAT,
            shortening_threshold: SHORTENING_THRESHOLD,
            jti: Uuid::new_v4().to_string(),
            cipher_combo: "SIV_GCM".to_string(),
        };
        let raw = encode(&header, &bad_claims, &EncodingKey::from_secret(signing_key.as_slice())).unwrap();

        let unverified = VaultConfig::unmarshal_unverified(&raw).unwrap();
        assert!(matches!(
            unverified.verify(&master_key),
            Err(VaultConfigError::UnsupportedParameter(_))
        ));
    }

    #[test]
    fn kid_header_matches_expected_constant() {
        let master_key = MasterKey::random().unwrap();
        let config = VaultConfig::new(&master_key).unwrap();
        let header = decode_header(config.marshal()).unwrap();
        assert_eq!(header.kid.as_deref(), Some("masterkeyfile:masterkey.cryptomator"));
    }
}
