use crate::secret_string::SecretString;
use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use std::{env, fs, path::Path};
use tracing::{info, warn};

pub const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub webserver: Webserver,
    #[serde(default)]
    pub registries: Vec<Registry>,
    #[serde(default)]
    pub feature_flags: FeatureFlags,
    #[serde(default)]
    pub callback: Callback,
}

#[derive(Debug, Deserialize)]
pub struct Registry {
    pub hostname: String,
    pub username: Option<String>,
    pub token: SecretString,
}

#[derive(Debug, Deserialize)]
pub struct Webserver {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for Webserver {
    fn default() -> Self {
        Webserver {
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    #[serde(default)]
    pub enable_registry_callback: bool,
}

/// Hosts a webhook's `callback_url` may point at when registry callbacks are enabled.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Callback {
    #[serde(default = "default_callback_hosts")]
    pub allowed_hosts: Vec<String>,
}

impl Default for Callback {
    fn default() -> Self {
        Callback {
            allowed_hosts: default_callback_hosts(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_callback_hosts() -> Vec<String> {
    vec!["registry.hub.docker.com".to_string()]
}

/// Builds the process configuration: the YAML file named by `CONFIG_PATH` if set,
/// otherwise defaults, then the `PORT` environment variable on top.
pub fn load() -> Result<Config> {
    let mut config = match env::var("CONFIG_PATH") {
        Ok(path) => load_config(path)?,
        Err(_) => {
            info!("CONFIG_PATH not set, using default configuration");
            Config::default()
        }
    };

    if let Some(port) = port_from_env(env::var("PORT").ok().as_deref())? {
        config.webserver.port = port;
    }

    for registry in config.registries.iter().filter(|r| r.token.is_empty()) {
        warn!(
            "Registry {} is configured with an empty token, pulls will likely be rejected",
            registry.hostname
        );
    }

    Ok(config)
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    Ok(config)
}

fn port_from_env(value: Option<&str>) -> Result<Option<u16>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(port) => port
            .parse::<u16>()
            .map(Some)
            .with_context(|| format!("Invalid PORT value: {}", port)),
    }
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error naming every variable that is not set.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let mut missing = Vec::new();
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| {
            missing.push(var_name.to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        bail!("Missing environment variable: {}", missing.join(", "));
    }

    Ok(result.into_owned())
}
