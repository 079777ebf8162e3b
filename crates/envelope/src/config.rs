//! Configuration loading and validation for the envelope service.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any required variable is missing or invalid.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::ops::DefaultKeys;
use crate::provider::local;

/// Which key-custody backend holds the master keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// AWS KMS.
    #[default]
    Aws,
    /// Azure Key Vault (REST API 7.4).
    Azure,
    /// In-process software keys. Development and tests only.
    Local,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Aws => "aws",
            ProviderKind::Azure => "azure",
            ProviderKind::Local => "local",
        }
    }
}

/// Validated envelope service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Key-custody backend.
    #[serde(default)]
    pub provider: ProviderKind,

    /// Default master key for `aes_encrypt` / `aes_decrypt`.
    pub aes_key_id: Option<String>,

    /// Default RSA key pair for `rsa_encrypt` / `rsa_decrypt`.
    pub rsa_key_id: Option<String>,

    /// Default P-256 key pair for `ecc_sign` / `ecc_verify` with `ECDSA_SHA_256`.
    pub ecc_key_id: Option<String>,

    /// Default P-384 key pair for `ECDSA_SHA_384`.
    pub ecc384_key_id: Option<String>,

    /// Default HMAC key for `hmac_generate` with `HMAC_SHA_256`.
    pub hmac_key_id: Option<String>,

    /// Default HMAC key for `HMAC_SHA_384`.
    pub hmac384_key_id: Option<String>,

    /// Override for the KMS endpoint (LocalStack, VPC endpoint).
    pub aws_endpoint_url_kms: Option<String>,

    /// Vault base URL, e.g. `https://my-vault.vault.azure.net`. Required for `azure`.
    pub azure_key_vault_url: Option<String>,

    /// Static bearer token for Key Vault. Skips managed identity when set.
    pub azure_access_token: Option<String>,

    /// Client id of a user-assigned managed identity.
    pub azure_client_id: Option<String>,

    /// App Service / Functions identity endpoint, set by the platform.
    pub identity_endpoint: Option<String>,

    /// Secret header value paired with `identity_endpoint`.
    pub identity_header: Option<String>,

    /// Hex AES-256 master key for the local provider. Generated if absent.
    pub local_master_key: Option<String>,

    /// Hex HMAC key for the local provider. Generated if absent.
    pub local_hmac_key: Option<String>,

    /// Hex P-256 private scalar for the local provider. Generated if absent.
    pub local_ecc256_key: Option<String>,

    /// Hex P-384 private scalar for the local provider. Generated if absent.
    pub local_ecc384_key: Option<String>,

    /// Deadline for one operation, including every provider call it makes.
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,

    /// Attempts per provider call, first try included.
    #[serde(default = "default_provider_max_attempts")]
    pub provider_max_attempts: u32,

    /// Port the HTTP adapter listens on.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Whole-request timeout applied by the HTTP adapter.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// OTLP collector endpoint. Spans are only exported when set.
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_provider_timeout_ms() -> u64 {
    10_000
}
fn default_provider_max_attempts() -> u32 {
    1
}
fn default_http_port() -> u16 {
    8080
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty_if_set(&self.aes_key_id, "AES_KEY_ID")?;
        ensure_non_empty_if_set(&self.rsa_key_id, "RSA_KEY_ID")?;
        ensure_non_empty_if_set(&self.ecc_key_id, "ECC_KEY_ID")?;
        ensure_non_empty_if_set(&self.ecc384_key_id, "ECC384_KEY_ID")?;
        ensure_non_empty_if_set(&self.hmac_key_id, "HMAC_KEY_ID")?;
        ensure_non_empty_if_set(&self.hmac384_key_id, "HMAC384_KEY_ID")?;
        ensure_non_empty_if_set(&self.otel_exporter_otlp_endpoint, "OTEL_EXPORTER_OTLP_ENDPOINT")?;

        if self.provider == ProviderKind::Azure {
            let url = self.azure_key_vault_url.as_deref().unwrap_or_default();
            ensure_non_empty(url, "AZURE_KEY_VAULT_URL")?;
            if !url.starts_with("https://") && !url.starts_with("http://") {
                anyhow::bail!("AZURE_KEY_VAULT_URL must be an http(s) URL");
            }
        }
        if self.provider_timeout_ms == 0 {
            anyhow::bail!("PROVIDER_TIMEOUT_MS must be > 0");
        }
        if !(1..=5).contains(&self.provider_max_attempts) {
            anyhow::bail!("PROVIDER_MAX_ATTEMPTS must be between 1 and 5");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("REQUEST_TIMEOUT_SECS must be > 0");
        }
        // The operation deadline must fire first so a slow provider still gets
        // a `deadline_exceeded` body.
        if self.request_timeout_secs.saturating_mul(1000) <= self.provider_timeout_ms {
            anyhow::bail!("REQUEST_TIMEOUT_SECS must exceed PROVIDER_TIMEOUT_MS");
        }
        Ok(())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Key ids used when a request omits `key_id`.
    ///
    /// The local provider always has keys under its well-known names, so those
    /// fill any gap when it is selected. Its one HMAC key serves both MAC
    /// algorithms.
    pub fn default_keys(&self) -> DefaultKeys {
        let mut keys = DefaultKeys {
            aes: self.aes_key_id.clone(),
            rsa: self.rsa_key_id.clone(),
            ecc256: self.ecc_key_id.clone(),
            ecc384: self.ecc384_key_id.clone(),
            hmac256: self.hmac_key_id.clone(),
            hmac384: self.hmac384_key_id.clone(),
        };
        if self.provider == ProviderKind::Local {
            keys.aes.get_or_insert_with(|| local::AES_KEY_NAME.into());
            keys.ecc256.get_or_insert_with(|| local::ECC256_KEY_NAME.into());
            keys.ecc384.get_or_insert_with(|| local::ECC384_KEY_NAME.into());
            let hmac = keys.hmac256.get_or_insert_with(|| local::HMAC_KEY_NAME.into()).clone();
            keys.hmac384.get_or_insert(hmac);
        }
        keys
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}

fn ensure_non_empty_if_set(value: &Option<String>, name: &str) -> Result<()> {
    match value {
        Some(v) if v.trim().is_empty() => anyhow::bail!("{name} must not be empty when set"),
        _ => Ok(()),
    }
}
