//! HTTP notification delivery.
//!
//! All drivers share one [`NotificationSender`] (one connection pool).
//! Notifications use the older `aesgcm` content encoding with fixed,
//! somewhat bogus encryption headers — the load target does not decrypt,
//! it forwards the body untouched.

use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE,
};
use reqwest::redirect;
use serde_json::{Map, Value};
use url::Url;

use crate::vapid::Vapid;
use crate::TransportError;

const CRYPTO_KEY: &str = "keyid=p256dh;dh=c2VuZGVy";
const ENCRYPTION: &str = "keyid=p256dh;salt=XZwpw6o37R-6qoZjw6KwAw";

const HDR_TTL: HeaderName = HeaderName::from_static("ttl");
const HDR_CRYPTO_KEY: HeaderName = HeaderName::from_static("crypto-key");
const HDR_ENCRYPTION: HeaderName = HeaderName::from_static("encryption");

/// TLS posture towards the push endpoint.
#[derive(Debug, Clone, Default)]
pub struct EndpointTls {
    /// Client certificate + key as a PEM bundle, for mTLS endpoints.
    pub identity_pem: Option<Vec<u8>>,
    /// Skip server certificate verification.
    pub accept_invalid_certs: bool,
}

/// A notification to deliver.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub endpoint_url: String,
    pub data: Option<Vec<u8>>,
    pub ttl: u32,
    /// VAPID claims for this single request; falls back to the sender's
    /// default claims.
    pub claims: Option<Map<String, Value>>,
}

/// Response metadata and body from the push endpoint.
#[derive(Debug, Clone)]
pub struct NotificationResponse {
    pub status: u16,
    pub body: String,
}

/// Shared HTTP adapter posting notifications to push endpoints.
pub struct NotificationSender {
    client: reqwest::Client,
    endpoint_override: Option<Url>,
    vapid: Option<Vapid>,
    default_claims: Option<Map<String, Value>>,
}

impl NotificationSender {
    pub fn new(
        client: reqwest::Client,
        endpoint_override: Option<Url>,
        vapid: Option<Vapid>,
        default_claims: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            client,
            endpoint_override,
            vapid,
            default_claims,
        }
    }

    /// Build the shared client: redirects disabled, endpoint TLS policy
    /// applied.
    pub fn build_client(tls: &EndpointTls) -> Result<reqwest::Client, TransportError> {
        let mut builder = reqwest::Client::builder().redirect(redirect::Policy::none());
        if tls.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(pem) = &tls.identity_pem {
            let identity =
                reqwest::Identity::from_pem(pem).map_err(|e| TransportError::Tls(e.to_string()))?;
            builder = builder.identity(identity);
        }
        builder.build().map_err(TransportError::Http)
    }

    /// POST one notification. Network-level failures are errors; any HTTP
    /// status is a completed delivery attempt and comes back as a response.
    pub async fn send(
        &self,
        request: NotificationRequest,
    ) -> Result<NotificationResponse, TransportError> {
        let mut url =
            Url::parse(&request.endpoint_url).map_err(|e| TransportError::InvalidEndpoint {
                url: request.endpoint_url.clone(),
                reason: e.to_string(),
            })?;
        self.apply_override(&mut url)?;

        let headers = self.build_headers(&url, request.ttl, request.data.is_some(), request.claims)?;

        let response = self
            .client
            .post(url)
            .headers(headers)
            .body(request.data.unwrap_or_default())
            .send()
            .await
            .map_err(TransportError::Http)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(TransportError::Http)?;
        Ok(NotificationResponse { status, body })
    }

    /// Replace scheme://host:port with the configured override, keeping the
    /// endpoint path.
    fn apply_override(&self, url: &mut Url) -> Result<(), TransportError> {
        let Some(over) = &self.endpoint_override else {
            return Ok(());
        };
        let invalid = |reason: &str| TransportError::InvalidEndpoint {
            url: over.to_string(),
            reason: reason.to_string(),
        };
        url.set_scheme(over.scheme())
            .map_err(|()| invalid("bad scheme"))?;
        url.set_host(over.host_str())
            .map_err(|_| invalid("bad host"))?;
        url.set_port(over.port()).map_err(|()| invalid("bad port"))?;
        Ok(())
    }

    fn build_headers(
        &self,
        url: &Url,
        ttl: u32,
        has_data: bool,
        claims: Option<Map<String, Value>>,
    ) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(HDR_TTL, header_value(&ttl.to_string())?);

        let mut crypto_key = CRYPTO_KEY.to_string();
        let claims = claims.or_else(|| self.default_claims.clone());
        if let (Some(vapid), Some(mut claims)) = (&self.vapid, claims) {
            if !claims.is_empty() {
                if !claims.contains_key("aud") {
                    let aud = origin_of(url);
                    tracing::debug!("deriving vapid aud {aud}");
                    claims.insert("aud".into(), Value::from(aud));
                }
                let signed = vapid.sign(claims, None)?;
                headers.insert(AUTHORIZATION, header_value(&signed.authorization)?);
                // The aesgcm value keeps its own parameter list; the public
                // key is joined onto it with a semicolon.
                crypto_key = if has_data {
                    format!("{CRYPTO_KEY};p256ecdsa={}", vapid.public_key_urlsafe())
                } else {
                    signed.crypto_key
                };
            }
        }

        if has_data {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("aesgcm"));
            headers.insert(HDR_CRYPTO_KEY, header_value(&crypto_key)?);
            headers.insert(HDR_ENCRYPTION, HeaderValue::from_static(ENCRYPTION));
        } else if headers.contains_key(AUTHORIZATION) {
            // Signed but data-free: the public key still travels.
            headers.insert(HDR_CRYPTO_KEY, header_value(&crypto_key)?);
        }

        Ok(headers)
    }
}

fn origin_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    }
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value).map_err(|e| TransportError::InvalidEndpoint {
        url: String::new(),
        reason: format!("bad header value: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(vapid: Option<Vapid>, over: Option<&str>) -> NotificationSender {
        NotificationSender::new(
            reqwest::Client::new(),
            over.map(|o| Url::parse(o).unwrap()),
            vapid,
            None,
        )
    }

    #[test]
    fn data_free_request_carries_only_ttl() {
        let s = sender(None, None);
        let url = Url::parse("https://push.example.com/wpush/v1/tok").unwrap();
        let headers = s.build_headers(&url, 60, false, None).unwrap();
        assert_eq!(headers.get(HDR_TTL).unwrap(), "60");
        assert!(headers.get(CONTENT_TYPE).is_none());
        assert!(headers.get(HDR_CRYPTO_KEY).is_none());
    }

    #[test]
    fn data_request_carries_aesgcm_headers() {
        let s = sender(None, None);
        let url = Url::parse("https://push.example.com/wpush/v1/tok").unwrap();
        let headers = s.build_headers(&url, 60, true, None).unwrap();
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/octet-stream");
        assert_eq!(headers.get(CONTENT_ENCODING).unwrap(), "aesgcm");
        assert_eq!(headers.get(HDR_CRYPTO_KEY).unwrap(), CRYPTO_KEY);
        assert_eq!(headers.get(HDR_ENCRYPTION).unwrap(), ENCRYPTION);
    }

    #[test]
    fn vapid_claims_add_authorization_and_public_key() {
        let s = sender(Some(Vapid::generate().unwrap()), None);
        let url = Url::parse("https://push.example.com:8082/wpush/v1/tok").unwrap();
        let mut claims = Map::new();
        claims.insert("sub".into(), Value::from("mailto:ops@example.com"));
        let headers = s.build_headers(&url, 60, true, Some(claims)).unwrap();

        let auth = headers.get(AUTHORIZATION).unwrap().to_str().unwrap();
        assert!(auth.starts_with("Bearer "));
        let ck = headers.get(HDR_CRYPTO_KEY).unwrap().to_str().unwrap();
        assert!(ck.starts_with("keyid=p256dh;dh=c2VuZGVy;p256ecdsa="));
    }

    #[test]
    fn endpoint_override_rewrites_origin_only() {
        let s = sender(None, Some("https://proxy.example.net:4430"));
        let mut url = Url::parse("http://push.example.com/wpush/v1/tok").unwrap();
        s.apply_override(&mut url).unwrap();
        assert_eq!(url.as_str(), "https://proxy.example.net:4430/wpush/v1/tok");
    }

    #[test]
    fn origin_derivation_keeps_explicit_port() {
        let url = Url::parse("https://push.example.com:8082/v1/t").unwrap();
        assert_eq!(origin_of(&url), "https://push.example.com:8082");
        let url = Url::parse("https://push.example.com/v1/t").unwrap();
        assert_eq!(origin_of(&url), "https://push.example.com");
    }
}
