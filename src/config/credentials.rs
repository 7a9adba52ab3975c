//! Credentials for HTTP basic authentication

use crate::config::types::CredentialsConfig;
use crate::ConfigError;
use std::fmt;

/// Prefix marking a password that is read from an environment variable
const ENV_PREFIX: &str = "env:";

/// A resolved username/password pair handed to the fetcher
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Never print the password.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Turns raw configured credentials into usable ones
///
/// Implementations may decrypt or look up secrets; the crawl engine only ever sees
/// the resolved [`Credentials`].
pub trait CredentialProvider: Send + Sync {
    fn resolve(&self, raw: &CredentialsConfig) -> Result<Credentials, ConfigError>;
}

/// Provider that takes values from the configuration file as written
///
/// A password of the form `env:NAME` is read from the environment variable `NAME`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigCredentialProvider;

impl CredentialProvider for ConfigCredentialProvider {
    fn resolve(&self, raw: &CredentialsConfig) -> Result<Credentials, ConfigError> {
        if raw.username.is_empty() {
            return Err(ConfigError::Credentials(
                "username cannot be empty".to_string(),
            ));
        }

        let password = match raw.password.strip_prefix(ENV_PREFIX) {
            Some(var) => std::env::var(var).map_err(|_| {
                ConfigError::Credentials(format!("environment variable {} is not set", var))
            })?,
            None => raw.password.clone(),
        };

        Ok(Credentials::new(raw.username.clone(), password))
    }
}
