use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::counters::IterationLimits;
use crate::domain::specialist::SpecialistKind;

pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["buybuddy.toml", "config/buybuddy.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub specialists: SpecialistsConfig,
    pub limits: LimitsConfig,
    pub server: ServerConfig,
    pub sessions: SessionsConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct SpecialistsConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub api_key: Option<SecretString>,
    pub product: SpecialistEndpointConfig,
    pub insurance: SpecialistEndpointConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecialistEndpointConfig {
    pub endpoint: Option<String>,
    pub agent_name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LimitsConfig {
    pub customer_clarifications: u32,
    pub product_agent_calls: u32,
    pub insurance_agent_calls: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

/// Bounds on the in-memory session store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionsConfig {
    pub max_sessions: usize,
    pub idle_ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub product_endpoint: Option<String>,
    pub insurance_endpoint: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            specialists: SpecialistsConfig {
                timeout_secs: 30,
                max_retries: 1,
                api_key: None,
                product: SpecialistEndpointConfig {
                    endpoint: None,
                    agent_name: "product-agent".to_string(),
                },
                insurance: SpecialistEndpointConfig {
                    endpoint: None,
                    agent_name: "insurance-agent".to_string(),
                },
            },
            limits: LimitsConfig::from(IterationLimits::default()),
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            sessions: SessionsConfig { max_sessions: 10_000, idle_ttl_secs: 1_800 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl From<IterationLimits> for LimitsConfig {
    fn from(value: IterationLimits) -> Self {
        Self {
            customer_clarifications: value.customer_clarifications,
            product_agent_calls: value.product_agent_calls,
            insurance_agent_calls: value.insurance_agent_calls,
        }
    }
}

impl LimitsConfig {
    pub fn iteration_limits(&self) -> IterationLimits {
        IterationLimits {
            customer_clarifications: self.customer_clarifications,
            product_agent_calls: self.product_agent_calls,
            insurance_agent_calls: self.insurance_agent_calls,
        }
    }
}

impl SpecialistsConfig {
    pub fn endpoint(&self, kind: SpecialistKind) -> &SpecialistEndpointConfig {
        match kind {
            SpecialistKind::Product => &self.product,
            SpecialistKind::Insurance => &self.insurance,
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(specialists) = patch.specialists {
            if let Some(timeout_secs) = specialists.timeout_secs {
                self.specialists.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = specialists.max_retries {
                self.specialists.max_retries = max_retries;
            }
            if let Some(api_key) = specialists.api_key {
                self.specialists.api_key = Some(secret_value(api_key));
            }
            if let Some(product) = specialists.product {
                apply_endpoint_patch(&mut self.specialists.product, product);
            }
            if let Some(insurance) = specialists.insurance {
                apply_endpoint_patch(&mut self.specialists.insurance, insurance);
            }
        }

        if let Some(limits) = patch.limits {
            if let Some(value) = limits.customer_clarifications {
                self.limits.customer_clarifications = value;
            }
            if let Some(value) = limits.product_agent_calls {
                self.limits.product_agent_calls = value;
            }
            if let Some(value) = limits.insurance_agent_calls {
                self.limits.insurance_agent_calls = value;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(sessions) = patch.sessions {
            if let Some(max_sessions) = sessions.max_sessions {
                self.sessions.max_sessions = max_sessions;
            }
            if let Some(idle_ttl_secs) = sessions.idle_ttl_secs {
                self.sessions.idle_ttl_secs = idle_ttl_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("BUYBUDDY_SPECIALISTS_TIMEOUT_SECS") {
            self.specialists.timeout_secs = parse_u64("BUYBUDDY_SPECIALISTS_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("BUYBUDDY_SPECIALISTS_MAX_RETRIES") {
            self.specialists.max_retries = parse_u32("BUYBUDDY_SPECIALISTS_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("BUYBUDDY_SPECIALISTS_API_KEY") {
            self.specialists.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("BUYBUDDY_SPECIALISTS_PRODUCT_ENDPOINT") {
            self.specialists.product.endpoint = Some(value);
        }
        if let Some(value) = read_env("BUYBUDDY_SPECIALISTS_PRODUCT_AGENT_NAME") {
            self.specialists.product.agent_name = value;
        }
        if let Some(value) = read_env("BUYBUDDY_SPECIALISTS_INSURANCE_ENDPOINT") {
            self.specialists.insurance.endpoint = Some(value);
        }
        if let Some(value) = read_env("BUYBUDDY_SPECIALISTS_INSURANCE_AGENT_NAME") {
            self.specialists.insurance.agent_name = value;
        }

        if let Some(value) = read_env("BUYBUDDY_LIMITS_CUSTOMER_CLARIFICATIONS") {
            self.limits.customer_clarifications =
                parse_u32("BUYBUDDY_LIMITS_CUSTOMER_CLARIFICATIONS", &value)?;
        }
        if let Some(value) = read_env("BUYBUDDY_LIMITS_PRODUCT_AGENT_CALLS") {
            self.limits.product_agent_calls =
                parse_u32("BUYBUDDY_LIMITS_PRODUCT_AGENT_CALLS", &value)?;
        }
        if let Some(value) = read_env("BUYBUDDY_LIMITS_INSURANCE_AGENT_CALLS") {
            self.limits.insurance_agent_calls =
                parse_u32("BUYBUDDY_LIMITS_INSURANCE_AGENT_CALLS", &value)?;
        }

        if let Some(value) = read_env("BUYBUDDY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("BUYBUDDY_SERVER_PORT") {
            self.server.port = parse_u16("BUYBUDDY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("BUYBUDDY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("BUYBUDDY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("BUYBUDDY_SESSIONS_MAX_SESSIONS") {
            self.sessions.max_sessions = parse_usize("BUYBUDDY_SESSIONS_MAX_SESSIONS", &value)?;
        }
        if let Some(value) = read_env("BUYBUDDY_SESSIONS_IDLE_TTL_SECS") {
            self.sessions.idle_ttl_secs = parse_u64("BUYBUDDY_SESSIONS_IDLE_TTL_SECS", &value)?;
        }

        let log_level =
            read_env("BUYBUDDY_LOGGING_LEVEL").or_else(|| read_env("BUYBUDDY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("BUYBUDDY_LOGGING_FORMAT").or_else(|| read_env("BUYBUDDY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(endpoint) = overrides.product_endpoint {
            self.specialists.product.endpoint = Some(endpoint);
        }
        if let Some(endpoint) = overrides.insurance_endpoint {
            self.specialists.insurance.endpoint = Some(endpoint);
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_specialists(&self.specialists)?;
        validate_limits(&self.limits)?;
        validate_server(&self.server)?;
        validate_sessions(&self.sessions)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn apply_endpoint_patch(target: &mut SpecialistEndpointConfig, patch: EndpointPatch) {
    if let Some(endpoint) = patch.endpoint {
        target.endpoint = Some(endpoint);
    }
    if let Some(agent_name) = patch.agent_name {
        target.agent_name = agent_name;
    }
}

/// First existing config file: the explicit path, else the default locations.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_FILES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_specialists(specialists: &SpecialistsConfig) -> Result<(), ConfigError> {
    if specialists.timeout_secs == 0 || specialists.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "specialists.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if specialists.max_retries > 5 {
        return Err(ConfigError::Validation(
            "specialists.max_retries must be at most 5".to_string(),
        ));
    }

    if let Some(api_key) = &specialists.api_key {
        if api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "specialists.api_key must not be blank when set".to_string(),
            ));
        }
    }

    for (section, endpoint) in
        [("specialists.product", &specialists.product), ("specialists.insurance", &specialists.insurance)]
    {
        if let Some(url) = &endpoint.endpoint {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Validation(format!(
                    "{section}.endpoint must start with http:// or https://"
                )));
            }
        }
        if endpoint.agent_name.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{section}.agent_name must not be empty")));
        }
    }

    Ok(())
}

fn validate_limits(limits: &LimitsConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("limits.customer_clarifications", limits.customer_clarifications),
        ("limits.product_agent_calls", limits.product_agent_calls),
        ("limits.insurance_agent_calls", limits.insurance_agent_calls),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation(format!("{name} must be at least 1")));
        }
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_sessions(sessions: &SessionsConfig) -> Result<(), ConfigError> {
    if sessions.max_sessions == 0 {
        return Err(ConfigError::Validation("sessions.max_sessions must be at least 1".to_string()));
    }
    if sessions.idle_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "sessions.idle_ttl_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    specialists: Option<SpecialistsPatch>,
    limits: Option<LimitsPatch>,
    server: Option<ServerPatch>,
    sessions: Option<SessionsPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SpecialistsPatch {
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    api_key: Option<String>,
    product: Option<EndpointPatch>,
    insurance: Option<EndpointPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct EndpointPatch {
    endpoint: Option<String>,
    agent_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LimitsPatch {
    customer_clarifications: Option<u32>,
    product_agent_calls: Option<u32>,
    insurance_agent_calls: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionsPatch {
    max_sessions: Option<usize>,
    idle_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
