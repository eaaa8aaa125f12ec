use std::{env, time::Duration};

use secrecy::SecretString;

pub const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CURRENCY: &str = "usd";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: SecretString,
    pub payment: PaymentSettings,
}

/// Merchant payment settings handed to the order placement service.
#[derive(Debug, Clone)]
pub struct PaymentSettings {
    /// `None` when the merchant has no gateway key on file.
    pub stripe_secret_key: Option<SecretString>,
    pub stripe_api_base: String,
    pub gateway_timeout: Duration,
    pub currency: String,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            stripe_secret_key: None,
            stripe_api_base: DEFAULT_STRIPE_API_BASE.to_string(),
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET is not set"))?
            .into();
        Ok(Self {
            port,
            database_url,
            host,
            jwt_secret,
            payment: PaymentSettings::from_env(),
        })
    }
}

impl PaymentSettings {
    pub fn from_env() -> Self {
        let stripe_secret_key = non_blank(env::var("STRIPE_SECRET_KEY").ok()).map(SecretString::from);
        let stripe_api_base = non_blank(env::var("STRIPE_API_BASE").ok())
            .unwrap_or_else(|| DEFAULT_STRIPE_API_BASE.to_string());
        let gateway_timeout = parse_timeout(env::var("PAYMENT_GATEWAY_TIMEOUT_SECS").ok());
        let currency = non_blank(env::var("STORE_CURRENCY").ok())
            .map(|c| c.to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        Self {
            stripe_secret_key,
            stripe_api_base,
            gateway_timeout,
            currency,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_timeout(value: Option<String>) -> Duration {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_GATEWAY_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_are_treated_as_unset() {
        assert_eq!(non_blank(Some("   ".into())), None);
        assert_eq!(non_blank(None), None);
        assert_eq!(non_blank(Some(" sk_test ".into())), Some("sk_test".into()));
    }

    #[test]
    fn timeout_falls_back_to_default() {
        assert_eq!(parse_timeout(Some("3".into())), Duration::from_secs(3));
        assert_eq!(parse_timeout(Some("0".into())), DEFAULT_GATEWAY_TIMEOUT);
        assert_eq!(parse_timeout(Some("soon".into())), DEFAULT_GATEWAY_TIMEOUT);
        assert_eq!(parse_timeout(None), DEFAULT_GATEWAY_TIMEOUT);
    }
}
