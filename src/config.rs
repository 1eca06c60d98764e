//! Configuration types, read from environment variables at startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use rust_decimal::Decimal;
use secrecy::SecretString;

use crate::billing::CostRules;
use crate::error::ConfigError;
use crate::sms::TwilioConfig;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_DB_PATH: &str = "./data/repair-sms.db";
const DEFAULT_SHOP_NAME: &str = "the shop";

/// HTTP server and storage settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub db_path: PathBuf,
    /// Daily-rolling log files go here when set.
    pub log_dir: Option<PathBuf>,
    /// Mount the internal `/api/repairs/...` notification routes.
    pub notify_api: bool,
}

/// Inputs to webhook signature validation.
///
/// Both are optional here; a missing value rejects each request instead of
/// failing startup.
#[derive(Debug, Clone, Default)]
pub struct WebhookConfig {
    /// Public URL the provider posts to (the service may sit behind a proxy).
    pub webhook_url: Option<String>,
    pub auth_token: Option<SecretString>,
}

/// Shop identity and pricing.
#[derive(Debug, Clone)]
pub struct ShopConfig {
    pub name: String,
    pub cost_rules: CostRules,
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SHOP_NAME.to_string(),
            cost_rules: CostRules::default(),
        }
    }
}

/// Everything the binary needs.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
    pub shop: ShopConfig,
    /// `None` disables outbound sending.
    pub twilio: Option<TwilioConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        let bind_addr = parse_or("SMS_BIND_ADDR", var("SMS_BIND_ADDR"), DEFAULT_BIND_ADDR)?;
        let db_path = PathBuf::from(var("SMS_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.into()));
        let log_dir = var("SMS_LOG_DIR").map(PathBuf::from);
        let notify_api = var("SMS_NOTIFY_API").is_some_and(|v| is_truthy(&v));

        let webhook = WebhookConfig {
            webhook_url: var("SMS_WEBHOOK_URL"),
            auth_token: var("TWILIO_AUTH_TOKEN").map(SecretString::from),
        };

        let defaults = CostRules::default();
        let tax_rate: Decimal = match var("SHOP_TAX_RATE") {
            Some(raw) => parse_value("SHOP_TAX_RATE", &raw)?,
            None => defaults.tax_rate,
        };
        if tax_rate < Decimal::ZERO || tax_rate >= Decimal::ONE {
            return Err(ConfigError::InvalidValue {
                key: "SHOP_TAX_RATE".into(),
                message: format!("{tax_rate} is not a fraction between 0 and 1"),
            });
        }
        let default_diagnostic_fee: Decimal = match var("SHOP_DEFAULT_DIAGNOSTIC_FEE") {
            Some(raw) => parse_value("SHOP_DEFAULT_DIAGNOSTIC_FEE", &raw)?,
            None => defaults.default_diagnostic_fee,
        };
        if default_diagnostic_fee < Decimal::ZERO {
            return Err(ConfigError::InvalidValue {
                key: "SHOP_DEFAULT_DIAGNOSTIC_FEE".into(),
                message: "must not be negative".into(),
            });
        }

        Ok(Self {
            server: ServerConfig {
                bind_addr,
                db_path,
                log_dir,
                notify_api,
            },
            webhook,
            shop: ShopConfig {
                name: var("SHOP_NAME").unwrap_or_else(|| DEFAULT_SHOP_NAME.into()),
                cost_rules: CostRules {
                    tax_rate,
                    default_diagnostic_fee,
                },
            },
            twilio: TwilioConfig::from_lookup(var),
        })
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}

fn parse_or<T>(key: &str, raw: Option<String>, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(key, raw.as_deref().unwrap_or(default))
}

fn is_truthy(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use rust_decimal_macros::dec;
    use secrecy::ExposeSecret;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(cfg.server.db_path, PathBuf::from("./data/repair-sms.db"));
        assert!(cfg.server.log_dir.is_none());
        assert!(!cfg.server.notify_api);
        assert!(cfg.webhook.webhook_url.is_none());
        assert!(cfg.webhook.auth_token.is_none());
        assert_eq!(cfg.shop.name, "the shop");
        assert_eq!(cfg.shop.cost_rules.tax_rate, dec!(0.075));
        assert_eq!(cfg.shop.cost_rules.default_diagnostic_fee, dec!(89.00));
        assert!(cfg.twilio.is_none());
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("SMS_BIND_ADDR", "127.0.0.1:9000"),
            ("SMS_WEBHOOK_URL", "https://shop.example.com/sms/webhook"),
            ("TWILIO_AUTH_TOKEN", "tok"),
            ("TWILIO_ACCOUNT_SID", "AC1"),
            ("TWILIO_FROM_NUMBER", "+15550001111"),
            ("SHOP_NAME", "Fixit Labs"),
            ("SHOP_TAX_RATE", "0.0825"),
            ("SHOP_DEFAULT_DIAGNOSTIC_FEE", "75"),
            ("SMS_NOTIFY_API", "1"),
        ])
        .unwrap();
        assert_eq!(cfg.server.bind_addr.port(), 9000);
        assert!(cfg.server.notify_api);
        assert_eq!(
            cfg.webhook.auth_token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("tok".to_string())
        );
        assert_eq!(cfg.shop.name, "Fixit Labs");
        assert_eq!(cfg.shop.cost_rules.tax_rate, dec!(0.0825));
        assert_eq!(cfg.shop.cost_rules.default_diagnostic_fee, dec!(75));
        assert_eq!(cfg.twilio.unwrap().account_sid, "AC1");
    }

    #[test]
    fn empty_values_are_unset() {
        let cfg = config(&[("SMS_WEBHOOK_URL", "  "), ("SHOP_NAME", "")]).unwrap();
        assert!(cfg.webhook.webhook_url.is_none());
        assert_eq!(cfg.shop.name, "the shop");
    }

    #[test]
    fn invalid_values_are_rejected() {
        for (key, value) in [
            ("SMS_BIND_ADDR", "not-an-addr"),
            ("SHOP_TAX_RATE", "seven"),
            ("SHOP_TAX_RATE", "7.5"),
            ("SHOP_DEFAULT_DIAGNOSTIC_FEE", "-1"),
        ] {
            let err = config(&[(key, value)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { key: ref k, .. } if k == key),
                "{key}={value}"
            );
        }
    }
}
