//! Loading and validating the configuration file.

use crate::error::{ConfigError, Result};
use crate::model::ProxyConfig;
use secrecy::ExposeSecret;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use url::Url;
use validator::Validate;

/// Environment variable overriding `redis.url`.
pub const REDIS_URL_ENV: &str = "OKA_REDIS_URL";

/// Load, override from the environment, and validate the config at `path`.
///
/// When `path` does not exist but `<path>.example` does, the example is copied
/// into place and [`ConfigError::FirstRun`] is returned so the operator can
/// edit it before starting again.
pub async fn load_config(path: impl AsRef<Path>) -> Result<ProxyConfig> {
    let path = path.as_ref();

    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(bootstrap_from_example(path).await);
    }

    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let mut config: ProxyConfig = toml::from_str(&raw)?;
    apply_env_overrides(&mut config);
    validate(&config)?;

    info!(
        path = %path.display(),
        servers = config.servers.len(),
        "Configuration loaded"
    );
    Ok(config)
}

/// Parse and validate a config from a TOML string. No environment overrides.
pub fn parse_config(raw: &str) -> Result<ProxyConfig> {
    let config: ProxyConfig = toml::from_str(raw)?;
    validate(&config)?;
    Ok(config)
}

async fn bootstrap_from_example(path: &Path) -> ConfigError {
    let mut example = path.as_os_str().to_owned();
    example.push(".example");
    let example = PathBuf::from(example);

    if !tokio::fs::try_exists(&example).await.unwrap_or(false) {
        return ConfigError::NotFound(path.to_path_buf());
    }

    match tokio::fs::copy(&example, path).await {
        Ok(_) => {
            warn!(
                path = %path.display(),
                example = %example.display(),
                "Config file missing, created from example"
            );
            ConfigError::FirstRun {
                path: path.to_path_buf(),
            }
        }
        Err(source) => ConfigError::Read {
            path: example,
            source,
        },
    }
}

fn apply_env_overrides(config: &mut ProxyConfig) {
    if let Ok(url) = std::env::var(REDIS_URL_ENV) {
        if !url.is_empty() {
            config.redis.url = url;
        }
    }
}

fn validate(config: &ProxyConfig) -> Result<()> {
    if config.servers.is_empty() {
        return Err(ConfigError::validation(
            "at least one [[server]] must be configured",
        ));
    }

    config
        .limit
        .validate()
        .map_err(|e| ConfigError::validation(format!("limit: {e}")))?;

    let mut names = HashSet::new();
    for spec in &config.servers {
        if spec.name.trim().is_empty() {
            return Err(ConfigError::validation("server name is required"));
        }
        if !names.insert(spec.name.as_str()) {
            return Err(ConfigError::server(&spec.name, "duplicate server name"));
        }

        spec.validate()
            .map_err(|e| ConfigError::server(&spec.name, e))?;

        let target = Url::parse(&spec.target_url)
            .map_err(|e| ConfigError::server(&spec.name, format!("invalid target_url: {e}")))?;
        if !matches!(target.scheme(), "http" | "https") || target.host_str().is_none() {
            return Err(ConfigError::server(
                &spec.name,
                "target_url must be an absolute http(s) URL",
            ));
        }

        if spec.secret_key.expose_secret().is_empty() {
            return Err(ConfigError::server(&spec.name, "secret_key is required"));
        }

        if spec.https.enabled {
            for (field, value) in [
                ("cert_path", &spec.https.cert_path),
                ("key_path", &spec.https.key_path),
            ] {
                match value {
                    None => {
                        return Err(ConfigError::server(
                            &spec.name,
                            format!("https.{field} is required when https is enabled"),
                        ))
                    }
                    Some(file) if !file.exists() => {
                        return Err(ConfigError::server(
                            &spec.name,
                            format!("https.{field} {} does not exist", file.display()),
                        ))
                    }
                    Some(_) => {}
                }
            }
        }
    }

    Ok(())
}
