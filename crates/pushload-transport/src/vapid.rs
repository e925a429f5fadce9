//! VAPID signing — voluntary application-server identification.
//!
//! Senders carry a signed ES256 JWS in an `Authorization: Bearer` header and
//! their P-256 public key as a `p256ecdsa=` segment of the `Crypto-key`
//! header. Claims must name the audience (`aud`, the push server origin) and
//! a contact (`sub`); `exp` defaults to 24 hours out.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Map, Value};

use crate::TransportError;

const DEFAULT_EXP_SECS: u64 = 86_400;

/// A VAPID signing key pair.
pub struct Vapid {
    encoding_key: EncodingKey,
    public_key_b64: String,
}

impl Vapid {
    /// Generate a fresh P-256 key pair.
    pub fn generate() -> Result<Self, TransportError> {
        let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| TransportError::VapidKey(e.to_string()))?;
        Self::from_key_pair(&key_pair)
    }

    /// Import a private key from a PKCS#8 or SEC1 PEM string.
    pub fn from_pem(pem: &str) -> Result<Self, TransportError> {
        let key_pair = rcgen::KeyPair::from_pem(pem)
            .map_err(|e| TransportError::VapidKey(e.to_string()))?;
        Self::from_key_pair(&key_pair)
    }

    fn from_key_pair(key_pair: &rcgen::KeyPair) -> Result<Self, TransportError> {
        let pem = key_pair.serialize_pem();
        let encoding_key = EncodingKey::from_ec_pem(pem.as_bytes())
            .map_err(|e| TransportError::VapidKey(e.to_string()))?;
        // The raw SubjectPublicKey bits are the uncompressed EC point the
        // push server expects in `p256ecdsa=`.
        let public_key_b64 = URL_SAFE_NO_PAD.encode(key_pair.public_key_raw());
        Ok(Self {
            encoding_key,
            public_key_b64,
        })
    }

    /// The urlsafe-base64 public key, as carried in `Crypto-key`.
    pub fn public_key_urlsafe(&self) -> &str {
        &self.public_key_b64
    }

    /// Sign a claim set, returning the headers to add to the notification.
    ///
    /// Fills `exp` when absent. `aud` and `sub` are required; callers derive
    /// `aud` from the endpoint before signing (see the notification sender).
    /// Existing `crypto_key` content gets the `p256ecdsa=` segment
    /// comma-appended.
    pub fn sign(
        &self,
        mut claims: Map<String, Value>,
        crypto_key: Option<&str>,
    ) -> Result<VapidHeaders, TransportError> {
        if !claims.contains_key("exp") {
            let exp = jsonwebtoken::get_current_timestamp() + DEFAULT_EXP_SECS;
            claims.insert("exp".into(), Value::from(exp));
        }
        if !claims.contains_key("aud") {
            return Err(TransportError::VapidClaim("aud"));
        }
        if !claims.contains_key("sub") {
            return Err(TransportError::VapidClaim("sub"));
        }

        let jws = jsonwebtoken::encode(
            &Header::new(Algorithm::ES256),
            &claims,
            &self.encoding_key,
        )
        .map_err(TransportError::VapidSign)?;

        let pkey = format!("p256ecdsa={}", self.public_key_b64);
        let crypto_key = match crypto_key {
            Some(existing) => format!("{existing},{pkey}"),
            None => pkey,
        };

        Ok(VapidHeaders {
            authorization: format!("Bearer {jws}"),
            crypto_key,
        })
    }
}

/// Header values produced by a VAPID signature.
#[derive(Debug, Clone)]
pub struct VapidHeaders {
    pub authorization: String,
    pub crypto_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(entries: &[(&str, &str)]) -> Map<String, Value> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::from(*v)))
            .collect()
    }

    #[test]
    fn sign_produces_bearer_and_public_key() {
        let vapid = Vapid::generate().unwrap();
        let headers = vapid
            .sign(
                claims(&[("aud", "https://push.example.com"), ("sub", "mailto:ops@example.com")]),
                None,
            )
            .unwrap();

        assert!(headers.authorization.starts_with("Bearer "));
        // Three dot-separated JWS segments.
        let jws = headers.authorization.trim_start_matches("Bearer ");
        assert_eq!(jws.split('.').count(), 3);
        assert_eq!(
            headers.crypto_key,
            format!("p256ecdsa={}", vapid.public_key_urlsafe())
        );
    }

    #[test]
    fn sign_comma_appends_to_existing_crypto_key() {
        let vapid = Vapid::generate().unwrap();
        let headers = vapid
            .sign(
                claims(&[("aud", "https://push.example.com"), ("sub", "mailto:ops@example.com")]),
                Some("id=previous"),
            )
            .unwrap();
        assert!(headers.crypto_key.starts_with("id=previous,p256ecdsa="));
    }

    #[test]
    fn sign_requires_aud_and_sub() {
        let vapid = Vapid::generate().unwrap();
        assert!(matches!(
            vapid.sign(claims(&[("sub", "mailto:a@b.c")]), None),
            Err(TransportError::VapidClaim("aud"))
        ));
        assert!(matches!(
            vapid.sign(claims(&[("aud", "https://x.y")]), None),
            Err(TransportError::VapidClaim("sub"))
        ));
    }

    #[test]
    fn pem_round_trip_preserves_public_key() {
        let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let pem = key_pair.serialize_pem();
        let a = Vapid::from_pem(&pem).unwrap();
        let b = Vapid::from_pem(&pem).unwrap();
        assert_eq!(a.public_key_urlsafe(), b.public_key_urlsafe());
    }
}
