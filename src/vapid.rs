//! VAPID key handling for web push (RFC 8292).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use p256::ecdsa::SigningKey;
use p256::elliptic_curve::rand_core::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// VAPID keypair.
///
/// The private key is the raw 32-byte P-256 scalar and the public key the
/// 65-byte uncompressed SEC1 point, both unpadded base64url. That is the
/// format `VapidSignatureBuilder::from_base64` and the browser's
/// `applicationServerKey` expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VapidKeys {
    private_key: String,
    public_key: String,
}

impl VapidKeys {
    pub fn generate() -> Self {
        Self::from_signing_key(&SigningKey::random(&mut OsRng))
    }

    /// Derive the public half from a configured private key.
    pub fn from_private_key(private_key_b64: &str) -> Result<Self, ConfigError> {
        let bytes = BASE64URL
            .decode(private_key_b64.trim().trim_end_matches('='))
            .map_err(|e| ConfigError::Invalid(format!("VAPID private key is not base64url: {}", e)))?;
        if bytes.len() != 32 {
            return Err(ConfigError::Invalid(format!(
                "VAPID private key must be a 32-byte P-256 scalar, got {} bytes",
                bytes.len()
            )));
        }
        let signing_key = SigningKey::from_bytes(bytes.as_slice().into())
            .map_err(|_| ConfigError::Invalid("VAPID private key is not a valid P-256 scalar".into()))?;
        Ok(Self::from_signing_key(&signing_key))
    }

    fn from_signing_key(signing_key: &SigningKey) -> Self {
        let public_point = signing_key.verifying_key().to_encoded_point(false);
        Self {
            private_key: BASE64URL.encode(signing_key.to_bytes().as_slice()),
            public_key: BASE64URL.encode(public_point.as_bytes()),
        }
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_expected_sizes() {
        let keys = VapidKeys::generate();
        let public = BASE64URL.decode(keys.public_key()).unwrap();
        assert_eq!(public.len(), 65);
        assert_eq!(public[0], 0x04);
        assert_eq!(BASE64URL.decode(keys.private_key()).unwrap().len(), 32);
    }

    #[test]
    fn public_key_is_derived_from_private_key() {
        let keys = VapidKeys::generate();
        let derived = VapidKeys::from_private_key(keys.private_key()).unwrap();
        assert_eq!(derived.public_key(), keys.public_key());
    }

    #[test]
    fn generated_key_is_accepted_by_web_push() {
        use web_push::{SubscriptionInfo, VapidSignatureBuilder};

        let keys = VapidKeys::generate();
        let sub = SubscriptionInfo::new("https://push.example.com/test", "", "");
        assert!(VapidSignatureBuilder::from_base64(keys.private_key(), &sub).is_ok());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(VapidKeys::from_private_key("AAAA").is_err());
        assert!(VapidKeys::from_private_key("not base64 at all").is_err());
    }
}
