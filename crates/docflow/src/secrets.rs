//! Resolution of the webhook service token.
//!
//! The token may be given in three ways, tried in this order:
//!
//! 1. **Direct value** - for local testing (`service_token: "dev-token"`)
//! 2. **File reference** - Docker secrets (`service_token_file: /run/secrets/docflow`)
//! 3. **Env var reference** - Kubernetes/production (`service_token_env: DOCFLOW_TOKEN`)
//!
//! The resolved value is wrapped in `SecretString` and never logged.

use std::fs;

use secrecy::SecretString;

use crate::config::NotifierConfig;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Secret file '{path}' is empty")]
    EmptyFile { path: String },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

/// One place a secret can come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource<'a> {
    Value(&'a str),
    File(&'a str),
    Env(&'a str),
}

impl<'a> SecretSource<'a> {
    fn reference(&self) -> &'a str {
        match self {
            SecretSource::Value(s) | SecretSource::File(s) | SecretSource::Env(s) => s,
        }
    }

    fn read(&self) -> Result<SecretString, SecretError> {
        match *self {
            SecretSource::Value(value) => Ok(SecretString::from(value.to_string())),
            SecretSource::File(path) => {
                let expanded = expand_home(path);
                let content =
                    fs::read_to_string(&expanded).map_err(|e| SecretError::FileReadError {
                        path: expanded.clone(),
                        source: e,
                    })?;
                let trimmed = content.trim();
                if trimmed.is_empty() {
                    return Err(SecretError::EmptyFile { path: expanded });
                }
                Ok(SecretString::from(trimmed.to_string()))
            }
            SecretSource::Env(name) => match std::env::var(name) {
                // Env vars may carry a trailing newline
                Ok(value) => Ok(SecretString::from(value.trim().to_string())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: name.to_string(),
                }),
            },
        }
    }
}

/// Returns the secret from the first non-empty source, or `None` when every
/// source is empty. A configured source that cannot be read is an error; the
/// remaining sources are not consulted.
pub fn resolve_secret(sources: &[SecretSource<'_>]) -> Result<Option<SecretString>, SecretError> {
    match sources.iter().find(|s| !s.reference().is_empty()) {
        Some(source) => source.read().map(Some),
        None => Ok(None),
    }
}

/// Resolves the `X-Service-Token` sent with every webhook.
pub fn resolve_service_token(config: &NotifierConfig) -> Result<Option<SecretString>, SecretError> {
    let mut sources = Vec::with_capacity(3);
    if let Some(value) = config.service_token.as_deref() {
        sources.push(SecretSource::Value(value));
    }
    if let Some(path) = config.service_token_file.as_deref() {
        sources.push(SecretSource::File(path));
    }
    if let Some(name) = config.service_token_env.as_deref() {
        sources.push(SecretSource::Env(name));
    }
    resolve_secret(&sources)
}

/// Expands a leading `~` to the user's home directory (HOME, then
/// USERPROFILE). `~user/path` is not supported.
pub(crate) fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            let home = home.to_string_lossy();
            return if path == "~" {
                home.into_owned()
            } else {
                format!("{}{}", home, &path[1..])
            };
        }
    }
    path.to_string()
}
