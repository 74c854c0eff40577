use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context};
use billing::{PaymentProvider, SandboxProvider, StripeProvider};
use ::config::{Config, Environment, File};
use serde::Deserialize;

const SETTINGS_FILE: &str = "server.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub token_ttl_seconds: i64,
    pub cors_allowed_origin: Option<String>,
    pub payment_provider: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_api_base: String,
    pub currency: String,
    pub max_attachment_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8080".into(),
            database_url: "sqlite://./data/okr.db".into(),
            jwt_secret: "dev-secret-change-me".into(),
            token_ttl_seconds: 86_400,
            cors_allowed_origin: None,
            payment_provider: "sandbox".into(),
            stripe_secret_key: None,
            stripe_api_base: "https://api.stripe.com".into(),
            currency: "usd".into(),
            max_attachment_bytes: 8 * 1024 * 1024,
        }
    }
}

impl Settings {
    pub fn build_payment_provider(&self) -> anyhow::Result<Arc<dyn PaymentProvider>> {
        match self.payment_provider.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Arc::new(SandboxProvider::default())),
            "stripe" => {
                let Some(secret_key) = self
                    .stripe_secret_key
                    .as_deref()
                    .filter(|key| !key.trim().is_empty())
                else {
                    bail!("stripe_secret_key is required when payment_provider is 'stripe'");
                };
                Ok(Arc::new(StripeProvider::new(
                    secret_key,
                    self.stripe_api_base.as_str(),
                )))
            }
            other => bail!("unknown payment_provider '{other}' (expected 'sandbox' or 'stripe')"),
        }
    }
}

/// Defaults, then `server.toml` in the working directory, then `APP__*`
/// environment variables.
pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new(SETTINGS_FILE))
}

pub(crate) fn load_settings_from(path: &Path) -> anyhow::Result<Settings> {
    let settings = Config::builder()
        .add_source(File::from(path).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("failed to read settings from '{}'", path.display()))?
        .try_deserialize::<Settings>()
        .context("invalid server settings")?;

    if settings.jwt_secret.trim().is_empty() {
        bail!("jwt_secret must not be empty");
    }
    if settings.token_ttl_seconds <= 0 {
        bail!("token_ttl_seconds must be positive");
    }
    Ok(settings)
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    if let Some(parent) = sqlite_path(&database_url)
        .as_deref()
        .and_then(Path::parent)
        .filter(|parent| !parent.as_os_str().is_empty())
    {
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create directory '{}' for database '{database_url}'",
                parent.display()
            )
        })?;
    }
    Ok(database_url)
}

pub(crate) fn normalize_database_url(raw_database_url: &str) -> String {
    let raw = raw_database_url.trim();
    if raw.is_empty() {
        return Settings::default().database_url;
    }
    if raw.starts_with("sqlite:") || raw.contains("://") {
        return raw.to_string();
    }
    format!("sqlite://{}", raw.replace('\\', "/"))
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") {
        return None;
    }
    let rest = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
