//! Outbound SMS — the `SmsSender` seam and its Twilio REST implementation.
//!
//! The client is built once from configuration and handed to whoever needs it
//! (`AppState`, `Notifier`). Nothing reads provider credentials from the
//! environment after startup.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::SmsError;
use crate::sms::phone::{normalize_phone, to_e164};

const DEFAULT_API_BASE: &str = "https://api.twilio.com";

/// A message accepted by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentSms {
    /// Provider message id.
    pub sid: String,
    /// Recipient, normalized.
    pub to: String,
}

/// Sends text messages through the provider.
#[async_trait]
pub trait SmsSender: Send + Sync {
    /// The shop's own number, normalized.
    fn from_number(&self) -> &str;

    /// Send `body` to `to` (any format; normalized before use).
    async fn send(&self, to: &str, body: &str) -> Result<SentSms, SmsError>;
}

/// Twilio REST configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    pub from_number: String,
    pub api_base: String,
}

impl TwilioConfig {
    /// Build config from a variable source (the environment, in `AppConfig`).
    /// Returns `None` unless `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN` and
    /// `TWILIO_FROM_NUMBER` are all set (outbound sending disabled).
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let account_sid = var("TWILIO_ACCOUNT_SID")?;
        let auth_token = var("TWILIO_AUTH_TOKEN")?;
        let from_number = var("TWILIO_FROM_NUMBER")?;
        let api_base = var("TWILIO_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        if account_sid.is_empty() || auth_token.is_empty() || from_number.is_empty() {
            return None;
        }

        Some(Self {
            account_sid,
            auth_token: SecretString::from(auth_token),
            from_number,
            api_base,
        })
    }
}

/// Response body of the Messages resource (only the fields we read).
#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
}

/// Twilio REST client.
pub struct TwilioClient {
    config: TwilioConfig,
    from_number: String,
    client: reqwest::Client,
}

impl TwilioClient {
    pub fn new(config: TwilioConfig) -> Self {
        let from_number = normalize_phone(&config.from_number);
        Self {
            config,
            from_number,
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_base.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

#[async_trait]
impl SmsSender for TwilioClient {
    fn from_number(&self) -> &str {
        &self.from_number
    }

    async fn send(&self, to: &str, body: &str) -> Result<SentSms, SmsError> {
        let to = normalize_phone(to);
        if to.is_empty() {
            return Err(SmsError::SendFailed {
                to,
                reason: "recipient has no digits".into(),
            });
        }

        let form = [
            ("To", to_e164(&to)),
            ("From", to_e164(&self.from_number)),
            ("Body", body.to_string()),
        ];

        let resp = self
            .client
            .post(self.messages_url())
            .basic_auth(
                &self.config.account_sid,
                Some(self.config.auth_token.expose_secret()),
            )
            .form(&form)
            .send()
            .await
            .map_err(|e| SmsError::SendFailed {
                to: to.clone(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            warn!(to = %to, status = %status, "SMS provider rejected message");
            return Err(SmsError::SendFailed {
                to,
                reason: format!("HTTP {status}: {detail}"),
            });
        }

        let resource: MessageResource = resp
            .json()
            .await
            .map_err(|e| SmsError::InvalidResponse(e.to_string()))?;

        debug!(to = %to, sid = %resource.sid, "SMS accepted by provider");
        Ok(SentSms {
            sid: resource.sid,
            to,
        })
    }
}
