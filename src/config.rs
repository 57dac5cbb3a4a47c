use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::store::retry::RetryConfig;

const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// A string that is wiped on drop and never printed by `Debug`.
#[derive(Clone, Default)]
pub struct SecretString(Zeroizing<String>);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Deployment tier. Doubles as the `env` tag on analytics rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Prod,
    Stg,
    #[default]
    Dev,
}

impl Environment {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Environment::Prod,
            "stg" | "staging" => Environment::Stg,
            _ => Environment::Dev,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Prod => "prod",
            Environment::Stg => "stg",
            Environment::Dev => "dev",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Prod)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: Environment,
    /// Service-account identity (`name@project.iam.gserviceaccount.com`).
    pub service_account_email: Option<String>,
    pub private_key: Option<SecretString>,
    pub spreadsheet_id: Option<String>,
    pub admin_secret: Option<SecretString>,
    pub sheets_api_base: String,
    pub token_uri: String,
    /// Base for the public/display/poster URLs stored on each event.
    pub public_base_url: String,
    /// Brand identifiers events may be created under.
    pub brands: Vec<String>,
    pub retry: RetryConfig,
}

impl Config {
    /// True when both halves of the service account and the spreadsheet id are present.
    pub fn sheets_configured(&self) -> bool {
        self.service_account_email.is_some()
            && self.private_key.is_some()
            && self.spreadsheet_id.is_some()
    }

    pub fn is_known_brand(&self, brand_id: &str) -> bool {
        self.brands.iter().any(|b| b.eq_ignore_ascii_case(brand_id))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            environment: Environment::Dev,
            service_account_email: None,
            private_key: None,
            spreadsheet_id: None,
            admin_secret: None,
            sheets_api_base: DEFAULT_SHEETS_API_BASE.to_string(),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
            public_base_url: "http://localhost:8080".to_string(),
            brands: vec!["root".to_string()],
            retry: RetryConfig::default(),
        }
    }
}

/// Service account private keys are usually pasted into env files with the
/// newlines escaped.
pub fn normalize_private_key(raw: &str) -> String {
    raw.trim().trim_matches('"').replace("\\n", "\n")
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let environment = Environment::parse(&std::env::var("EVENTSHEET_ENV").unwrap_or_default());
    let defaults = RetryConfig::default();

    let sheets_api_base = non_empty_var("EVENTSHEET_SHEETS_API_BASE")
        .unwrap_or_else(|| DEFAULT_SHEETS_API_BASE.into());
    let token_uri =
        non_empty_var("EVENTSHEET_TOKEN_URI").unwrap_or_else(|| DEFAULT_TOKEN_URI.into());
    for (name, raw) in [("sheets api base", &sheets_api_base), ("token uri", &token_uri)] {
        url::Url::parse(raw).map_err(|e| anyhow::anyhow!("invalid {} '{}': {}", name, raw, e))?;
    }

    let cfg = Config {
        port: std::env::var("EVENTSHEET_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .unwrap_or(8080),
        environment,
        service_account_email: non_empty_var("EVENTSHEET_SERVICE_ACCOUNT_EMAIL"),
        private_key: non_empty_var("EVENTSHEET_PRIVATE_KEY")
            .map(|k| SecretString::new(normalize_private_key(&k))),
        spreadsheet_id: non_empty_var("EVENTSHEET_SPREADSHEET_ID"),
        admin_secret: non_empty_var("EVENTSHEET_ADMIN_SECRET").map(SecretString::new),
        sheets_api_base: sheets_api_base.trim_end_matches('/').to_string(),
        token_uri,
        public_base_url: non_empty_var("EVENTSHEET_PUBLIC_BASE_URL")
            .unwrap_or_else(|| "http://localhost:8080".into())
            .trim_end_matches('/')
            .to_string(),
        brands: std::env::var("EVENTSHEET_BRANDS")
            .unwrap_or_else(|_| "root".into())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_ascii_lowercase())
            .collect(),
        retry: RetryConfig {
            max_retries: std::env::var("EVENTSHEET_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            initial_delay_ms: std::env::var("EVENTSHEET_RETRY_INITIAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.initial_delay_ms),
            max_delay_ms: std::env::var("EVENTSHEET_RETRY_MAX_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_delay_ms),
            ..defaults
        },
    };

    if cfg.environment.is_production() {
        if cfg.spreadsheet_id.is_none() || cfg.service_account_email.is_none() {
            anyhow::bail!(
                "EVENTSHEET_SPREADSHEET_ID and EVENTSHEET_SERVICE_ACCOUNT_EMAIL must be set in production"
            );
        }
        if cfg.admin_secret.is_none() {
            tracing::error!("EVENTSHEET_ADMIN_SECRET is not set; admin routes will refuse every request");
        }
    } else if cfg.admin_secret.is_none() {
        tracing::warn!("EVENTSHEET_ADMIN_SECRET is not set; admin routes are open outside production");
    }

    Ok(cfg)
}
