//! Webhook signature validation (Twilio request signing).
//!
//! The provider signs each request with HMAC-SHA1 keyed by the account's auth
//! token. The signed string is the public webhook URL followed by every POST
//! parameter, sorted by name, written as `name` immediately followed by
//! `value`. The base64 digest arrives in the `X-Twilio-Signature` header.
//!
//! The URL comes from configuration, never from the request: behind a reverse
//! proxy the host/scheme the service sees differs from what the provider signed.

use axum::http::HeaderMap;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Header carrying the provider's request signature.
pub const SIGNATURE_HEADER: &str = "x-twilio-signature";

/// Outcome of checking a request signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    /// Signature matches.
    Valid,
    /// Auth token or webhook URL is not configured. Fails closed.
    MissingConfig,
    /// The request carries no signature header.
    MissingHeader,
    /// The header is not valid base64.
    Malformed,
    /// The signature does not match the request.
    Mismatch,
}

impl SignatureCheck {
    pub fn is_valid(self) -> bool {
        self == Self::Valid
    }

    /// Short label for logging.
    pub fn label(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::MissingConfig => "missing_config",
            Self::MissingHeader => "missing_header",
            Self::Malformed => "malformed",
            Self::Mismatch => "mismatch",
        }
    }
}

/// Validates inbound webhook signatures against the configured secrets.
#[derive(Debug, Clone)]
pub struct SignatureValidator {
    auth_token: Option<SecretString>,
    webhook_url: Option<String>,
}

impl SignatureValidator {
    pub fn new(auth_token: Option<SecretString>, webhook_url: Option<String>) -> Self {
        Self {
            auth_token,
            webhook_url,
        }
    }

    /// Check a request's headers and decoded form body.
    ///
    /// Pure: reads nothing but its arguments and the configured secrets.
    pub fn validate(&self, headers: &HeaderMap, params: &[(String, String)]) -> SignatureCheck {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        validate_signature(
            self.auth_token.as_ref().map(|t| t.expose_secret()),
            self.webhook_url.as_deref(),
            signature,
            params,
        )
    }
}

/// Check a signature given every input explicitly.
pub fn validate_signature(
    auth_token: Option<&str>,
    webhook_url: Option<&str>,
    signature: Option<&str>,
    params: &[(String, String)],
) -> SignatureCheck {
    let (Some(token), Some(url)) = (
        auth_token.filter(|t| !t.is_empty()),
        webhook_url.filter(|u| !u.is_empty()),
    ) else {
        return SignatureCheck::MissingConfig;
    };

    let Some(signature) = signature.map(str::trim).filter(|s| !s.is_empty()) else {
        return SignatureCheck::MissingHeader;
    };

    let Ok(expected) = STANDARD.decode(signature) else {
        return SignatureCheck::Malformed;
    };

    let Some(mac) = keyed_mac(token, url, params) else {
        return SignatureCheck::MissingConfig;
    };

    // verify_slice compares in constant time.
    match mac.verify_slice(&expected) {
        Ok(()) => SignatureCheck::Valid,
        Err(_) => SignatureCheck::Mismatch,
    }
}

/// Compute the base64 signature the provider would send for this request.
pub fn compute_signature(
    auth_token: &str,
    webhook_url: &str,
    params: &[(String, String)],
) -> Option<String> {
    let mac = keyed_mac(auth_token, webhook_url, params)?;
    Some(STANDARD.encode(mac.finalize().into_bytes()))
}

fn keyed_mac(token: &str, url: &str, params: &[(String, String)]) -> Option<HmacSha1> {
    let mut mac = HmacSha1::new_from_slice(token.as_bytes()).ok()?;
    mac.update(signed_payload(url, params).as_bytes());
    Some(mac)
}

/// URL followed by `name value` pairs sorted by name (then value, for repeated names).
fn signed_payload(url: &str, params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();

    let mut payload = String::with_capacity(url.len() + params.len() * 32);
    payload.push_str(url);
    for (name, value) in sorted {
        payload.push_str(name);
        payload.push_str(value);
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const TOKEN: &str = "12345";
    const URL: &str = "https://mycompany.com/myapp.php?foo=1&bar=2";

    /// Parameters from the provider's published signing example.
    fn documented_params() -> Vec<(String, String)> {
        [
            ("CallSid", "CA1234567890ABCDE"),
            ("Caller", "+12349013030"),
            ("Digits", "1234"),
            ("From", "+12349013030"),
            ("To", "+18005551212"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn matches_documented_signature() {
        let sig = compute_signature(TOKEN, URL, &documented_params()).unwrap();
        assert_eq!(sig, "0/KCTR6DLpKmkAf8muzZqo1nDgQ=");
    }

    #[test]
    fn parameter_order_does_not_matter() {
        let mut params = documented_params();
        params.reverse();
        let sig = compute_signature(TOKEN, URL, &params).unwrap();
        assert_eq!(
            validate_signature(Some(TOKEN), Some(URL), Some(&sig), &documented_params()),
            SignatureCheck::Valid
        );
    }

    #[test]
    fn rejects_tampered_body() {
        let sig = compute_signature(TOKEN, URL, &documented_params()).unwrap();
        let mut params = documented_params();
        params[2].1 = "9999".into();
        assert_eq!(
            validate_signature(Some(TOKEN), Some(URL), Some(&sig), &params),
            SignatureCheck::Mismatch
        );
    }

    #[test]
    fn rejects_different_url() {
        let sig = compute_signature(TOKEN, URL, &documented_params()).unwrap();
        assert_eq!(
            validate_signature(
                Some(TOKEN),
                Some("http://internal:8080/sms/webhook"),
                Some(&sig),
                &documented_params()
            ),
            SignatureCheck::Mismatch
        );
    }

    #[test]
    fn fails_closed_without_config() {
        let sig = compute_signature(TOKEN, URL, &documented_params()).unwrap();
        let params = documented_params();
        assert_eq!(
            validate_signature(None, Some(URL), Some(&sig), &params),
            SignatureCheck::MissingConfig
        );
        assert_eq!(
            validate_signature(Some(TOKEN), None, Some(&sig), &params),
            SignatureCheck::MissingConfig
        );
        assert_eq!(
            validate_signature(Some(""), Some(URL), Some(&sig), &params),
            SignatureCheck::MissingConfig
        );
    }

    #[test]
    fn missing_or_garbage_header() {
        let params = documented_params();
        assert_eq!(
            validate_signature(Some(TOKEN), Some(URL), None, &params),
            SignatureCheck::MissingHeader
        );
        assert_eq!(
            validate_signature(Some(TOKEN), Some(URL), Some("  "), &params),
            SignatureCheck::MissingHeader
        );
        assert_eq!(
            validate_signature(Some(TOKEN), Some(URL), Some("not base64!!"), &params),
            SignatureCheck::Malformed
        );
    }

    #[test]
    fn validator_reads_header() {
        let validator =
            SignatureValidator::new(Some(SecretString::from(TOKEN)), Some(URL.to_string()));
        let params = documented_params();
        let mut headers = HeaderMap::new();
        assert_eq!(
            validator.validate(&headers, &params),
            SignatureCheck::MissingHeader
        );

        let sig = compute_signature(TOKEN, URL, &params).unwrap();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&sig).unwrap());
        assert!(validator.validate(&headers, &params).is_valid());
    }
}
