//! GCP authentication for Vertex AI
//!
//! Issues OAuth2 bearer tokens either from a service account key (JWT
//! bearer grant, cached until shortly before expiry) or from a token
//! supplied up front.

use base64::Engine;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

use crate::config::GcpSettings;
use crate::error::{Error, Result};

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const TOKEN_LIFETIME: Duration = Duration::from_secs(55 * 60);
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

enum Credentials {
    ServiceAccount(PathBuf),
    Static(String),
}

/// GCP authentication manager
pub struct GcpAuth {
    credentials: Credentials,
    project_id: String,
    token: RwLock<Option<CachedToken>>,
    http: reqwest::Client,
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(serde::Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl GcpAuth {
    /// Authenticate with a service account JSON key file
    pub fn from_service_account(key_path: impl AsRef<Path>, project_id: impl Into<String>) -> Result<Self> {
        let key_path = key_path.as_ref().to_path_buf();
        if !key_path.exists() {
            return Err(Error::config(format!(
                "Service account key not found: {}",
                key_path.display()
            )));
        }
        Ok(Self::with_credentials(
            Credentials::ServiceAccount(key_path),
            project_id.into(),
        ))
    }

    /// Authenticate with a pre-issued access token
    pub fn from_token(access_token: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self::with_credentials(Credentials::Static(access_token.into()), project_id.into())
    }

    /// Pick credentials from settings; a key file wins over a static token
    pub fn from_settings(settings: &GcpSettings) -> Result<Self> {
        if settings.project_id.is_empty() {
            return Err(Error::config("gcp.project_id is not set"));
        }
        match (&settings.service_account_key_path, &settings.access_token) {
            (Some(path), _) => Self::from_service_account(path, settings.project_id.clone()),
            (None, Some(token)) => Ok(Self::from_token(token.clone(), settings.project_id.clone())),
            (None, None) => Err(Error::config(
                "either gcp.service_account_key_path or gcp.access_token is required",
            )),
        }
    }

    fn with_credentials(credentials: Credentials, project_id: String) -> Self {
        Self {
            credentials,
            project_id,
            token: RwLock::new(None),
            http: reqwest::Client::new(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// A valid access token, refreshed when close to expiry
    pub async fn bearer_token(&self) -> Result<String> {
        let key_path = match &self.credentials {
            Credentials::Static(token) => return Ok(token.clone()),
            Credentials::ServiceAccount(path) => path,
        };

        {
            let token = self.token.read().await;
            if let Some(ref cached) = *token {
                if cached.expires_at > Instant::now() + REFRESH_MARGIN {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let access_token = self.exchange_jwt(key_path).await?;
        *self.token.write().await = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at: Instant::now() + TOKEN_LIFETIME,
        });
        tracing::debug!("Refreshed GCP access token");

        Ok(access_token)
    }

    async fn exchange_jwt(&self, key_path: &Path) -> Result<String> {
        let key_content = tokio::fs::read_to_string(key_path).await.map_err(|e| {
            Error::config(format!(
                "Failed to read service account key {}: {}",
                key_path.display(),
                e
            ))
        })?;
        let key: ServiceAccountKey = serde_json::from_str(&key_content)
            .map_err(|e| Error::config(format!("Invalid service account key format: {}", e)))?;

        let jwt = sign_assertion(&key)?;

        let response = self
            .http
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", jwt.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::remote("oauth2", status, body));
        }

        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }
}

/// Build an RS256-signed JWT assertion for the token endpoint
fn sign_assertion(key: &ServiceAccountKey) -> Result<String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::internal(format!("System clock before epoch: {}", e)))?
        .as_secs();

    let claims = serde_json::json!({
        "iss": key.client_email,
        "scope": CLOUD_PLATFORM_SCOPE,
        "aud": key.token_uri,
        "iat": now,
        "exp": now + 3600,
    });

    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = engine.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = engine.encode(claims.to_string().as_bytes());
    let signing_input = format!("{}.{}", header, payload);

    let private_key = key.private_key.replace("\\n", "\n");
    let der = pem::parse(&private_key)
        .map_err(|e| Error::config(format!("Failed to parse private key PEM: {}", e)))?;
    let key_pair = ring::signature::RsaKeyPair::from_pkcs8(der.contents())
        .map_err(|e| Error::config(format!("Failed to parse private key: {:?}", e)))?;

    let mut signature = vec![0u8; key_pair.public().modulus_len()];
    key_pair
        .sign(
            &ring::signature::RSA_PKCS1_SHA256,
            &ring::rand::SystemRandom::new(),
            signing_input.as_bytes(),
            &mut signature,
        )
        .map_err(|e| Error::config(format!("Failed to sign JWT: {:?}", e)))?;

    Ok(format!("{}.{}", signing_input, engine.encode(&signature)))
}
