//! Provider configuration
//!
//! Credentials come from, in order: the provider block, the `OXIDE_*`
//! environment variables, or a named profile in `credentials.toml`.

use crate::schema::Diagnostic;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_HOST: &str = "OXIDE_HOST";
pub const ENV_TOKEN: &str = "OXIDE_TOKEN";
pub const ENV_PROFILE: &str = "OXIDE_PROFILE";
pub const ENV_CONFIG_DIR: &str = "OXIDE_CONFIG_DIR";
pub const ENV_INSECURE_SKIP_VERIFY: &str = "OXIDE_INSECURE_SKIP_VERIFY";

const CREDENTIALS_FILE: &str = "credentials.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not determine the home directory to locate {0}")]
    NoHomeDir(&'static str),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("profile {profile:?} not found in {path}")]
    UnknownProfile { profile: String, path: PathBuf },
}

/// Provider block as sent by the host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub host: Option<String>,
    pub token: Option<String>,
    pub profile: Option<String>,
    pub config_dir: Option<String>,
    pub insecure_skip_verify: Option<bool>,
}

/// Settings the client is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub host: String,
    pub token: String,
    pub profile: Option<String>,
    pub insecure_skip_verify: bool,
}

/// One `[profile.<name>]` table of the credentials file
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileCredentials {
    pub host: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    profile: HashMap<String, ProfileCredentials>,
}

/// `~/.config/oxide`
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".config").join("oxide"))
        .ok_or(ConfigError::NoHomeDir(CREDENTIALS_FILE))
}

/// Load `profile` from `<config_dir>/credentials.toml`
pub fn load_profile(config_dir: &Path, profile: &str) -> Result<ProfileCredentials, ConfigError> {
    let path = config_dir.join(CREDENTIALS_FILE);
    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let mut file: CredentialsFile =
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;

    file.profile
        .remove(profile)
        .ok_or_else(|| ConfigError::UnknownProfile {
            profile: profile.to_string(),
            path,
        })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl ProviderConfig {
    /// Resolve credentials, with `env` standing in for the process environment
    pub fn resolve<E>(&self, env: E) -> Result<ResolvedConfig, Vec<Diagnostic>>
    where
        E: Fn(&str) -> Option<String>,
    {
        let insecure_skip_verify = match self.insecure_skip_verify {
            Some(value) => value,
            None => non_empty(env(ENV_INSECURE_SKIP_VERIFY))
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true"))
                .unwrap_or(false),
        };

        // An explicit host or token outranks a profile named only in the environment
        let explicit_credentials =
            non_empty(self.host.clone()).is_some() || non_empty(self.token.clone()).is_some();
        let profile = non_empty(self.profile.clone()).or_else(|| {
            if explicit_credentials {
                None
            } else {
                non_empty(env(ENV_PROFILE))
            }
        });

        if let Some(profile) = profile {
            let config_dir = match non_empty(self.config_dir.clone())
                .or_else(|| non_empty(env(ENV_CONFIG_DIR)))
            {
                Some(dir) => PathBuf::from(dir),
                None => default_config_dir().map_err(|e| vec![profile_error(&e)])?,
            };
            let credentials =
                load_profile(&config_dir, &profile).map_err(|e| vec![profile_error(&e)])?;

            tracing::debug!(profile = %profile, host = %credentials.host, "using credentials profile");
            return Ok(ResolvedConfig {
                host: credentials.host,
                token: credentials.token,
                profile: Some(profile),
                insecure_skip_verify,
            });
        }

        let host = non_empty(self.host.clone()).or_else(|| non_empty(env(ENV_HOST)));
        let token = non_empty(self.token.clone()).or_else(|| non_empty(env(ENV_TOKEN)));

        let mut diagnostics = Vec::new();
        if token.is_none() {
            diagnostics.push(
                Diagnostic::error("Missing API Token Configuration").with_detail(
                    "While configuring the provider, the API token was not found in the \
                     OXIDE_TOKEN environment variable or configuration block token \
                     attribute, or profile.",
                ),
            );
        }
        if host.is_none() {
            diagnostics.push(Diagnostic::error("Missing Host Configuration").with_detail(
                "While configuring the provider, the host was not found in the OXIDE_HOST \
                 environment variable or configuration block host attribute, or profile.",
            ));
        }

        match (host, token) {
            (Some(host), Some(token)) => Ok(ResolvedConfig {
                host,
                token,
                profile: None,
                insecure_skip_verify,
            }),
            _ => Err(diagnostics),
        }
    }
}

fn profile_error(err: &ConfigError) -> Diagnostic {
    Diagnostic::error("Unable to load credentials profile")
        .with_detail(&err.to_string())
        .with_attribute(vec!["profile".to_string()])
}
