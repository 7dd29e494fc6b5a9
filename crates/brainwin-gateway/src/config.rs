use brainwin::TokenCodec;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DB_PATH: &str = "./brainwin.db";
const DEFAULT_LEDGER_DB_PATH: &str = "./brainwin-ledger.db";
const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:5173";
const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_SENDGRID_API_BASE: &str = "https://api.sendgrid.com";
const DEFAULT_SENDGRID_FROM_NAME: &str = "BrainWin";
const DEFAULT_RATE_LIMIT_RPM: u32 = 120;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 10;

/// Credentials for the one-time admin bootstrap.
#[derive(Clone)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for BootstrapAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAdmin")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone)]
pub struct GatewayConfig {
    /// HS256 signer for bearer tokens
    pub token_codec: TokenCodec,
    /// Payment provider API key
    pub stripe_secret_key: String,
    /// Shared secret for webhook signatures
    pub stripe_webhook_secret: Vec<u8>,
    pub stripe_api_base: String,
    /// Base URL of the downstream profile service
    pub profile_api_base: String,
    /// Directory with provisioning templates (None = built-in templates)
    pub template_dir: Option<PathBuf>,
    /// SendGrid API key (None = email delivery disabled)
    pub sendgrid_api_key: Option<String>,
    pub sendgrid_api_base: String,
    pub sendgrid_from_email: String,
    pub sendgrid_from_name: String,
    /// The single origin allowed by CORS
    pub allowed_origin: String,
    pub db_path: String,
    pub ledger_db_path: String,
    pub port: u16,
    pub rate_limit_rpm: u32,
    /// Bound on every outbound call
    pub upstream_timeout: Duration,
    /// Bearer token required for /metrics (None = public)
    pub metrics_token: Option<String>,
    /// Set the Secure flag on the auth cookie
    pub cookie_secure: bool,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token_codec", &self.token_codec)
            .field("stripe_secret_key", &"[REDACTED]")
            .field("stripe_webhook_secret", &"[REDACTED]")
            .field("stripe_api_base", &self.stripe_api_base)
            .field("profile_api_base", &self.profile_api_base)
            .field("template_dir", &self.template_dir)
            .field(
                "sendgrid_api_key",
                &self.sendgrid_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("sendgrid_api_base", &self.sendgrid_api_base)
            .field("sendgrid_from_email", &self.sendgrid_from_email)
            .field("sendgrid_from_name", &self.sendgrid_from_name)
            .field("allowed_origin", &self.allowed_origin)
            .field("db_path", &self.db_path)
            .field("ledger_db_path", &self.ledger_db_path)
            .field("port", &self.port)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field("upstream_timeout", &self.upstream_timeout)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("cookie_secure", &self.cookie_secure)
            .field("bootstrap_admin", &self.bootstrap_admin)
            .finish()
    }
}

impl GatewayConfig {
    /// Configuration with local-development defaults around the two secrets
    /// that have no sensible default.
    pub fn with_defaults(token_codec: TokenCodec, stripe_webhook_secret: Vec<u8>) -> Self {
        Self {
            token_codec,
            stripe_secret_key: String::new(),
            stripe_webhook_secret,
            stripe_api_base: DEFAULT_STRIPE_API_BASE.to_string(),
            profile_api_base: "http://localhost:8081".to_string(),
            template_dir: None,
            sendgrid_api_key: None,
            sendgrid_api_base: DEFAULT_SENDGRID_API_BASE.to_string(),
            sendgrid_from_email: "no-reply@brainwin.local".to_string(),
            sendgrid_from_name: DEFAULT_SENDGRID_FROM_NAME.to_string(),
            allowed_origin: DEFAULT_ALLOWED_ORIGIN.to_string(),
            db_path: DEFAULT_DB_PATH.to_string(),
            ledger_db_path: DEFAULT_LEDGER_DB_PATH.to_string(),
            port: DEFAULT_PORT,
            rate_limit_rpm: DEFAULT_RATE_LIMIT_RPM,
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            metrics_token: None,
            cookie_secure: false,
            bootstrap_admin: None,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        // Required: token secret, validated before anything else
        let token_codec = TokenCodec::from_base64(env::var("JWT_SECRET").ok().as_deref())
            .map_err(|e| ConfigError::TokenSecret(e.to_string()))?;

        let stripe_secret_key = required("STRIPE_SECRET_KEY")?;
        let stripe_webhook_secret = required("STRIPE_WEBHOOK_SECRET")?.into_bytes();

        let stripe_api_base = url_var("STRIPE_API_BASE", DEFAULT_STRIPE_API_BASE)?;
        let profile_api_base = required("PROFILE_API_BASE")?;
        validate_url(&profile_api_base)?;
        let profile_api_base = profile_api_base.trim_end_matches('/').to_string();

        let template_dir = optional("TEMPLATE_DIR").map(PathBuf::from);
        if let Some(ref dir) = template_dir {
            if !dir.is_dir() {
                return Err(ConfigError::InvalidValue {
                    name: "TEMPLATE_DIR",
                    reason: format!("{} is not a directory", dir.display()),
                });
            }
        }

        let sendgrid_api_key = optional("SENDGRID_API_KEY");
        let sendgrid_api_base = url_var("SENDGRID_API_BASE", DEFAULT_SENDGRID_API_BASE)?;
        let sendgrid_from_email = optional("SENDGRID_FROM_EMAIL")
            .unwrap_or_else(|| "no-reply@brainwin.local".to_string());
        let sendgrid_from_name = optional("SENDGRID_FROM_NAME")
            .unwrap_or_else(|| DEFAULT_SENDGRID_FROM_NAME.to_string());
        if sendgrid_api_key.is_none() {
            tracing::warn!("SENDGRID_API_KEY not set; verification emails will not be delivered");
        }

        let allowed_origin =
            optional("ALLOWED_ORIGIN").unwrap_or_else(|| DEFAULT_ALLOWED_ORIGIN.to_string());
        if allowed_origin == "*" {
            tracing::error!(
                "Wildcard CORS origin '*' cannot be combined with credentialed requests. \
                 Set ALLOWED_ORIGIN to the frontend origin."
            );
            return Err(ConfigError::InvalidValue {
                name: "ALLOWED_ORIGIN",
                reason: "wildcard origin is not allowed".to_string(),
            });
        }
        validate_url(&allowed_origin)?;

        let db_path = optional("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let ledger_db_path =
            optional("LEDGER_DB_PATH").unwrap_or_else(|| DEFAULT_LEDGER_DB_PATH.to_string());

        let port = parsed("PORT", DEFAULT_PORT)?;
        let rate_limit_rpm = parsed("RATE_LIMIT_RPM", DEFAULT_RATE_LIMIT_RPM)?;
        let upstream_timeout = Duration::from_secs(parsed(
            "UPSTREAM_TIMEOUT_SECS",
            DEFAULT_UPSTREAM_TIMEOUT_SECS,
        )?);

        let metrics_token = optional("METRICS_TOKEN");
        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set; /metrics endpoint is publicly accessible");
        }

        let cookie_secure = optional("COOKIE_SECURE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let bootstrap_admin = match (
            optional("BOOTSTRAP_ADMIN_EMAIL"),
            optional("BOOTSTRAP_ADMIN_PASSWORD"),
        ) {
            (Some(email), Some(password)) => Some(BootstrapAdmin { email, password }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::InvalidValue {
                    name: "BOOTSTRAP_ADMIN_EMAIL",
                    reason: "BOOTSTRAP_ADMIN_EMAIL and BOOTSTRAP_ADMIN_PASSWORD must be set together"
                        .to_string(),
                })
            }
        };

        Ok(Self {
            token_codec,
            stripe_secret_key,
            stripe_webhook_secret,
            stripe_api_base,
            profile_api_base,
            template_dir,
            sendgrid_api_key,
            sendgrid_api_base,
            sendgrid_from_email,
            sendgrid_from_name,
            allowed_origin,
            db_path,
            ledger_db_path,
            port,
            rate_limit_rpm,
            upstream_timeout,
            metrics_token,
            cookie_secure,
            bootstrap_admin,
        })
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::MissingRequired(name))
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            name,
            reason: format!("cannot parse '{raw}'"),
        }),
    }
}

fn url_var(name: &'static str, default: &str) -> Result<String, ConfigError> {
    let value = optional(name).unwrap_or_else(|| default.to_string());
    validate_url(&value)?;
    Ok(value.trim_end_matches('/').to_string())
}

fn validate_url(value: &str) -> Result<(), ConfigError> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|_| ConfigError::InvalidUrl(value.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid token secret: {0}")]
    TokenSecret(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}
