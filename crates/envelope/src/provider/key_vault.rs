//! [`KeyVaultProvider`]: Azure Key Vault over its REST API (version 7.4).
//!
//! Keys are addressed as `name` or `name/version`. Signing sends a locally
//! computed digest; signatures come back as raw `r || s` and are rendered as
//! unpadded base64url. Key Vault has no data-key generation and no HMAC keys,
//! so `aes_*` and `hmac_generate` report `unsupported_algorithm`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use common::protocol::{MacAlgorithm, SigningAlgorithm};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::{GeneratedDataKey, KeyHandle, KeyProvider, ProviderError, SignInput, WrapAlgorithm};
use crate::config::Config;
use crate::crypto::encoding::SignatureEncoding;
use crate::crypto::DataKey;

const API_VERSION: &str = "7.4";
const VAULT_RESOURCE: &str = "https://vault.azure.net";
const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN_SECS: u64 = 300;

/// Where bearer tokens for the vault come from.
pub enum Credential {
    /// A pre-issued token, used as-is.
    Static(String),
    /// Managed identity via IMDS or the App Service identity endpoint.
    ManagedIdentity(ManagedIdentity),
}

pub struct ManagedIdentity {
    endpoint: String,
    /// `X-IDENTITY-HEADER` secret; present only for the App Service endpoint.
    identity_header: Option<String>,
    client_id: Option<String>,
    cached: RwLock<Option<CachedToken>>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_on: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_on: serde_json::Value,
    #[serde(default)]
    expires_in: serde_json::Value,
}

impl TokenResponse {
    /// Absolute expiry in unix seconds. The identity endpoints send numbers as
    /// strings; App Service sends `expires_on` as a number.
    fn expiry(&self, now: u64) -> u64 {
        as_u64(&self.expires_on)
            .or_else(|| as_u64(&self.expires_in).map(|secs| now + secs))
            .unwrap_or(now + TOKEN_REFRESH_MARGIN_SECS)
    }
}

fn as_u64(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl ManagedIdentity {
    pub fn new(
        endpoint: Option<String>,
        identity_header: Option<String>,
        client_id: Option<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.unwrap_or_else(|| IMDS_TOKEN_URL.into()),
            identity_header,
            client_id,
            cached: RwLock::new(None),
        }
    }

    async fn token(&self, http: &reqwest::Client) -> Result<String, ProviderError> {
        let now = unix_now();
        if let Some(cached) = self.cached.read().await.as_ref() {
            if cached.expires_on > now + TOKEN_REFRESH_MARGIN_SECS {
                return Ok(cached.token.clone());
            }
        }

        let mut request = http.get(&self.endpoint).query(&[("resource", VAULT_RESOURCE)]);
        request = match &self.identity_header {
            Some(secret) => request
                .query(&[("api-version", "2019-08-01")])
                .header("X-IDENTITY-HEADER", secret),
            None => request
                .query(&[("api-version", "2018-02-01")])
                .header("Metadata", "true"),
        };
        if let Some(client_id) = &self.client_id {
            request = request.query(&[("client_id", client_id)]);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // A failed token exchange is an access problem, whatever the status.
            return Err(match classify_status(status, &body) {
                ProviderError::Unavailable(detail) => ProviderError::Unavailable(detail),
                other => ProviderError::AccessDenied(other.to_string()),
            });
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("identity token: {e}")))?;

        let cached = CachedToken {
            expires_on: token.expiry(now),
            token: token.access_token,
        };
        debug!(expires_on = cached.expires_on, "refreshed managed identity token");
        *self.cached.write().await = Some(cached.clone());
        Ok(cached.token)
    }
}

impl Credential {
    async fn token(&self, http: &reqwest::Client) -> Result<String, ProviderError> {
        match self {
            Credential::Static(token) => Ok(token.clone()),
            Credential::ManagedIdentity(identity) => identity.token(http).await,
        }
    }
}

/// [`KeyProvider`] backed by one Azure Key Vault.
pub struct KeyVaultProvider {
    http: reqwest::Client,
    vault_url: String,
    credential: Credential,
}

#[derive(Serialize)]
struct KeyOperationRequest<'a> {
    alg: &'a str,
    value: String,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    alg: &'a str,
    digest: String,
    value: String,
}

#[derive(Deserialize)]
struct KeyOperationResult {
    value: String,
}

#[derive(Deserialize)]
struct VerifyResult {
    value: bool,
}

impl KeyVaultProvider {
    pub fn new(vault_url: &str, credential: Credential, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Key Vault HTTP client")?;
        Ok(Self {
            http,
            vault_url: vault_url.trim_end_matches('/').to_owned(),
            credential,
        })
    }

    /// # Errors
    ///
    /// Returns an error if `AZURE_KEY_VAULT_URL` is missing.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let vault_url = cfg
            .azure_key_vault_url
            .as_deref()
            .context("AZURE_KEY_VAULT_URL is required for the azure provider")?;

        let credential = match &cfg.azure_access_token {
            Some(token) => Credential::Static(token.clone()),
            None => Credential::ManagedIdentity(ManagedIdentity::new(
                cfg.identity_endpoint.clone(),
                cfg.identity_header.clone(),
                cfg.azure_client_id.clone(),
            )),
        };
        Self::new(vault_url, credential, cfg.provider_timeout())
    }

    fn key_url(&self, key: &KeyHandle, operation: &str) -> String {
        format!(
            "{}/keys/{}/{operation}?api-version={API_VERSION}",
            self.vault_url,
            key.as_str().trim_matches('/')
        )
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        key: &KeyHandle,
        operation: &str,
        body: &B,
    ) -> Result<T, ProviderError> {
        let token = self.credential.token(&self.http).await?;
        let response = self
            .http
            .post(self.key_url(key, operation))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("{operation}: {e}")))
    }

    async fn key_operation(
        &self,
        key: &KeyHandle,
        operation: &str,
        alg: &str,
        value: &[u8],
    ) -> Result<Vec<u8>, ProviderError> {
        let body = KeyOperationRequest {
            alg,
            value: URL_SAFE_NO_PAD.encode(value),
        };
        let result: KeyOperationResult = self.post(key, operation, &body).await?;
        URL_SAFE_NO_PAD
            .decode(result.value.trim_end_matches('='))
            .map_err(|e| ProviderError::MalformedResponse(format!("{operation}: {e}")))
    }
}

fn rsa_algorithm(algorithm: WrapAlgorithm) -> Result<&'static str, ProviderError> {
    match algorithm {
        WrapAlgorithm::RsaesOaepSha256 => Ok("RSA-OAEP-256"),
        WrapAlgorithm::SymmetricDefault => Err(ProviderError::UnsupportedAlgorithm(
            "SYMMETRIC_DEFAULT wrapping is not available on Azure Key Vault".into(),
        )),
    }
}

fn jose_algorithm(algorithm: SigningAlgorithm) -> &'static str {
    match algorithm {
        SigningAlgorithm::EcdsaSha256 => "ES256",
        SigningAlgorithm::EcdsaSha384 => "ES384",
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Unavailable(err.to_string())
    }
}

/// Map a non-success Key Vault status onto [`ProviderError`].
fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let detail = format!("{status}: {}", body.chars().take(512).collect::<String>());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::AccessDenied(detail),
        StatusCode::NOT_FOUND => ProviderError::KeyNotFound(detail),
        StatusCode::REQUEST_TIMEOUT => ProviderError::Timeout,
        StatusCode::TOO_MANY_REQUESTS => ProviderError::Unavailable(detail),
        s if s.is_server_error() => ProviderError::Unavailable(detail),
        _ => ProviderError::Rejected(detail),
    }
}

#[async_trait]
impl KeyProvider for KeyVaultProvider {
    fn name(&self) -> &'static str {
        "azure-key-vault"
    }

    fn signature_encoding(&self) -> SignatureEncoding {
        SignatureEncoding::Base64UrlNoPad
    }

    async fn generate_data_key(&self, _key: &KeyHandle) -> Result<GeneratedDataKey, ProviderError> {
        Err(ProviderError::UnsupportedAlgorithm(
            "data key generation is not available on Azure Key Vault".into(),
        ))
    }

    async fn wrap_key(
        &self,
        key: &KeyHandle,
        algorithm: WrapAlgorithm,
        data_key: &DataKey,
    ) -> Result<Vec<u8>, ProviderError> {
        let alg = rsa_algorithm(algorithm)?;
        self.key_operation(key, "wrapkey", alg, data_key.as_bytes()).await
    }

    async fn unwrap_key(
        &self,
        key: &KeyHandle,
        algorithm: WrapAlgorithm,
        wrapped: &[u8],
    ) -> Result<DataKey, ProviderError> {
        let alg = rsa_algorithm(algorithm)?;
        let mut plaintext = self.key_operation(key, "unwrapkey", alg, wrapped).await?;
        let data_key = DataKey::from_slice(&plaintext)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()));
        plaintext.iter_mut().for_each(|b| *b = 0);
        data_key
    }

    async fn sign(
        &self,
        key: &KeyHandle,
        algorithm: SigningAlgorithm,
        input: &SignInput,
    ) -> Result<Vec<u8>, ProviderError> {
        self.key_operation(key, "sign", jose_algorithm(algorithm), &input.digest(algorithm))
            .await
    }

    async fn verify(
        &self,
        key: &KeyHandle,
        algorithm: SigningAlgorithm,
        input: &SignInput,
        signature: &[u8],
    ) -> Result<bool, ProviderError> {
        let body = VerifyRequest {
            alg: jose_algorithm(algorithm),
            digest: URL_SAFE_NO_PAD.encode(input.digest(algorithm)),
            value: URL_SAFE_NO_PAD.encode(signature),
        };
        let result: VerifyResult = self.post(key, "verify", &body).await?;
        Ok(result.value)
    }

    async fn generate_mac(
        &self,
        _key: &KeyHandle,
        algorithm: MacAlgorithm,
        _message: &[u8],
    ) -> Result<Vec<u8>, ProviderError> {
        Err(ProviderError::UnsupportedAlgorithm(format!(
            "{} is not available on Azure Key Vault",
            algorithm.as_str()
        )))
    }
}
