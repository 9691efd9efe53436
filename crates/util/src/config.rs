use std::{env, fmt, net::SocketAddr, time::Duration};

use url::Url;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://famdomain.db?mode=rwc";
pub const DEFAULT_SPACESHIP_BASE_URL: &str = "https://spaceship.dev/api/v1/";
pub const DEFAULT_RAILWAY_API_URL: &str = "https://backboard.railway.com/graphql/v2";

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Registrar account settings. Present only when both API credentials are set.
#[derive(Debug, Clone)]
pub struct RegistrarConfig {
    pub base_url: Url,
    pub api_key: String,
    pub api_secret: String,
    pub contact_id: Option<String>,
    pub cname_target: Option<String>,
}

/// Hosting platform credentials. Present only when all three values are set.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub api_url: Url,
    pub token: String,
    pub service_id: String,
    pub environment_id: String,
}

/// Poll cadence of the provisioning pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisioningTuning {
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for ProvisioningTuning {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_polls: 30,
        }
    }
}

/// Limits applied to the search endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchTuning {
    pub rate_limit_per_minute: u32,
    pub cache_ttl: Duration,
}

impl Default for SearchTuning {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 10,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub registrar: Option<RegistrarConfig>,
    pub platform: Option<PlatformConfig>,
    pub provisioning: ProvisioningTuning,
    pub search: SearchTuning,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr: SocketAddr = optional_var("APP_BIND_ADDR")
            .as_deref()
            .unwrap_or(DEFAULT_BIND_ADDR)
            .parse()
            .map_err(ConfigError::BindAddress)?;
        let database_url =
            optional_var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let defaults = ProvisioningTuning::default();
        let provisioning = ProvisioningTuning {
            poll_interval: Duration::from_secs(number_var(
                "PROVISION_POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )?),
            max_polls: number_var("PROVISION_MAX_POLLS", defaults.max_polls)?,
        };

        let defaults = SearchTuning::default();
        let search = SearchTuning {
            rate_limit_per_minute: number_var(
                "SEARCH_RATE_LIMIT_PER_MINUTE",
                defaults.rate_limit_per_minute,
            )?,
            cache_ttl: Duration::from_secs(number_var(
                "AVAILABILITY_CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )?),
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            registrar: registrar_from_env()?,
            platform: platform_from_env()?,
            provisioning,
            search,
        })
    }
}

fn registrar_from_env() -> Result<Option<RegistrarConfig>, ConfigError> {
    let (api_key, api_secret) = match (
        optional_var("SPACESHIP_API_KEY"),
        optional_var("SPACESHIP_API_SECRET"),
    ) {
        (Some(key), Some(secret)) => (key, secret),
        (None, None) => return Ok(None),
        _ => {
            return Err(ConfigError::PartialCredentials(
                "SPACESHIP_API_KEY and SPACESHIP_API_SECRET",
            ))
        }
    };

    let raw_base = optional_var("SPACESHIP_API_BASE_URL")
        .unwrap_or_else(|| DEFAULT_SPACESHIP_BASE_URL.to_string());

    Ok(Some(RegistrarConfig {
        base_url: url_var("SPACESHIP_API_BASE_URL", &with_trailing_slash(&raw_base))?,
        api_key,
        api_secret,
        contact_id: optional_var("SPACESHIP_CONTACT_ID"),
        cname_target: optional_var("HOSTING_CNAME_TARGET"),
    }))
}

fn platform_from_env() -> Result<Option<PlatformConfig>, ConfigError> {
    let values = (
        optional_var("RAILWAY_API_TOKEN"),
        optional_var("RAILWAY_SERVICE_ID"),
        optional_var("RAILWAY_ENVIRONMENT_ID"),
    );
    let (token, service_id, environment_id) = match values {
        (Some(token), Some(service), Some(environment)) => (token, service, environment),
        (None, None, None) => return Ok(None),
        _ => {
            return Err(ConfigError::PartialCredentials(
                "RAILWAY_API_TOKEN, RAILWAY_SERVICE_ID and RAILWAY_ENVIRONMENT_ID",
            ))
        }
    };

    let raw_url =
        optional_var("RAILWAY_API_URL").unwrap_or_else(|| DEFAULT_RAILWAY_API_URL.to_string());

    Ok(Some(PlatformConfig {
        api_url: url_var("RAILWAY_API_URL", &raw_url)?,
        token,
        service_id,
        environment_id,
    }))
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn number_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional_var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { var: name, value: raw }),
        None => Ok(default),
    }
}

fn url_var(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { var: name, source })
}

// relative joins drop the last path segment unless the base ends with '/'
fn with_trailing_slash(raw: &str) -> String {
    if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    PartialCredentials(&'static str),
    InvalidUrl {
        var: &'static str,
        source: url::ParseError,
    },
    InvalidNumber {
        var: &'static str,
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::PartialCredentials(vars) => {
                write!(f, "{vars} must be set together or not at all")
            }
            Self::InvalidUrl { var, source } => write!(f, "invalid {var} value: {source}"),
            Self::InvalidNumber { var, value } => {
                write!(f, "{var} must be a non-negative integer (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
