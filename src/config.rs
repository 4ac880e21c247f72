//! Environment-driven configuration, loaded once at startup.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default reminder sweep schedule: 13:00 UTC daily.
pub const DEFAULT_REMINDER_CRON: &str = "0 0 13 * * *";

const DEFAULT_MAX_CONNECTIONS: usize = 8;
const DEFAULT_PORT: u16 = 8085;
const DEFAULT_INBOUND_BODY_MAX_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: usize,
}

/// Email identity and provider settings. `sendgrid_api_key` is `None` when
/// the provider is not configured; sends then fail fast without retries.
#[derive(Clone)]
pub struct EmailConfig {
    pub sendgrid_api_key: Option<SecretString>,
    /// Domain for reply-to addresses and Message-IDs.
    pub domain: String,
    pub from_address: String,
    pub firm_name: String,
    /// Base URL for deep links in internal notifications, no trailing slash.
    pub app_base_url: String,
}

impl fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailConfig")
            .field(
                "sendgrid_api_key",
                &self.sendgrid_api_key.as_ref().map(|_| "[redacted]"),
            )
            .field("domain", &self.domain)
            .field("from_address", &self.from_address)
            .field("firm_name", &self.firm_name)
            .field("app_base_url", &self.app_base_url)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Cap on inbound-parse webhook bodies (raw MIME can be large).
    pub inbound_body_max_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub email: EmailConfig,
    pub server: ServerConfig,
    /// Six-field cron expression for the reminder sweep.
    pub reminder_cron: String,
}

fn required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingValue(key.to_string()))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match optional_env(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Reject malformed cron expressions at startup instead of at first tick.
pub fn validate_cron(expr: &str) -> Result<(), ConfigError> {
    cron::Schedule::from_str(expr)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidValue {
            key: "REMINDER_CRON".to_string(),
            message: e.to_string(),
        })
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let domain = required_env("EMAIL_DOMAIN")?;
        let from_address =
            optional_env("EMAIL_FROM").unwrap_or_else(|| format!("notifications@{domain}"));
        let app_base_url = optional_env("APP_BASE_URL")
            .unwrap_or_else(|| format!("https://{domain}"))
            .trim_end_matches('/')
            .to_string();

        let reminder_cron =
            optional_env("REMINDER_CRON").unwrap_or_else(|| DEFAULT_REMINDER_CRON.to_string());
        validate_cron(&reminder_cron)?;

        Ok(Self {
            database: DatabaseConfig {
                url: required_env("DATABASE_URL")?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            },
            email: EmailConfig {
                sendgrid_api_key: optional_env("SENDGRID_API_KEY").map(SecretString::from),
                domain,
                from_address,
                firm_name: optional_env("FIRM_NAME").unwrap_or_else(|| "Law Firm".to_string()),
                app_base_url,
            },
            server: ServerConfig {
                host: parse_env("NOTIFY_HOST", IpAddr::from([0, 0, 0, 0]))?,
                port: parse_env("NOTIFY_PORT", DEFAULT_PORT)?,
                inbound_body_max_bytes: parse_env(
                    "INBOUND_BODY_MAX_BYTES",
                    DEFAULT_INBOUND_BODY_MAX_BYTES,
                )?,
            },
            reminder_cron,
        })
    }
}
