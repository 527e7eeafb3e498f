use std::env;
use std::fs;
use std::path::Path;

use buybuddy_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::CommandResult;

pub fn run() -> CommandResult {
    run_with(LoadOptions::default())
}

pub fn run_with(options: LoadOptions) -> CommandResult {
    let config_file_path = resolve_config_path(options.config_path.as_deref());
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let specialists = &config.specialists;
    let api_key = specialists
        .api_key
        .as_ref()
        .map(|key| redact_secret(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    let fields: Vec<(&str, String, &str)> = vec![
        (
            "specialists.timeout_secs",
            specialists.timeout_secs.to_string(),
            "BUYBUDDY_SPECIALISTS_TIMEOUT_SECS",
        ),
        (
            "specialists.max_retries",
            specialists.max_retries.to_string(),
            "BUYBUDDY_SPECIALISTS_MAX_RETRIES",
        ),
        ("specialists.api_key", api_key, "BUYBUDDY_SPECIALISTS_API_KEY"),
        (
            "specialists.product.endpoint",
            unset_or(specialists.product.endpoint.as_deref()),
            "BUYBUDDY_SPECIALISTS_PRODUCT_ENDPOINT",
        ),
        (
            "specialists.product.agent_name",
            specialists.product.agent_name.clone(),
            "BUYBUDDY_SPECIALISTS_PRODUCT_AGENT_NAME",
        ),
        (
            "specialists.insurance.endpoint",
            unset_or(specialists.insurance.endpoint.as_deref()),
            "BUYBUDDY_SPECIALISTS_INSURANCE_ENDPOINT",
        ),
        (
            "specialists.insurance.agent_name",
            specialists.insurance.agent_name.clone(),
            "BUYBUDDY_SPECIALISTS_INSURANCE_AGENT_NAME",
        ),
        (
            "limits.customer_clarifications",
            config.limits.customer_clarifications.to_string(),
            "BUYBUDDY_LIMITS_CUSTOMER_CLARIFICATIONS",
        ),
        (
            "limits.product_agent_calls",
            config.limits.product_agent_calls.to_string(),
            "BUYBUDDY_LIMITS_PRODUCT_AGENT_CALLS",
        ),
        (
            "limits.insurance_agent_calls",
            config.limits.insurance_agent_calls.to_string(),
            "BUYBUDDY_LIMITS_INSURANCE_AGENT_CALLS",
        ),
        ("server.bind_address", config.server.bind_address.clone(), "BUYBUDDY_SERVER_BIND_ADDRESS"),
        ("server.port", config.server.port.to_string(), "BUYBUDDY_SERVER_PORT"),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            "BUYBUDDY_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        (
            "sessions.max_sessions",
            config.sessions.max_sessions.to_string(),
            "BUYBUDDY_SESSIONS_MAX_SESSIONS",
        ),
        (
            "sessions.idle_ttl_secs",
            config.sessions.idle_ttl_secs.to_string(),
            "BUYBUDDY_SESSIONS_IDLE_TTL_SECS",
        ),
        ("logging.level", config.logging.level.clone(), "BUYBUDDY_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "BUYBUDDY_LOGGING_FORMAT"),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in fields {
        let source =
            field_source(key, Some(env_key), config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    CommandResult::output(lines.join("\n"))
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn unset_or(value: Option<&str>) -> String {
    value.unwrap_or("<unset>").to_string()
}

fn redact_secret(secret: &str) -> String {
    if secret.trim().is_empty() {
        "<empty>".to_string()
    } else {
        "<redacted>".to_string()
    }
}
