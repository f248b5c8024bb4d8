use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid token url: {0}")]
    Url(#[from] url::ParseError),
    /// The endpoint answered with a standard OAuth error document.
    #[error("token endpoint rejected the grant ({status}): {code} {}", .description.as_deref().unwrap_or(""))]
    Rejected {
        status: StatusCode,
        code: String,
        description: Option<String>,
    },
    #[error("token endpoint returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

impl OAuthError {
    /// `invalid_grant` means the refresh token was revoked or expired and a
    /// new one has to be issued interactively.
    pub fn is_revoked(&self) -> bool {
        matches!(self, OAuthError::Rejected { code, .. } if code == "invalid_grant")
    }
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Deserialize)]
struct ErrorDocument {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Google token endpoint client for installed-app credentials.
///
/// Only the refresh grant is supported; the initial refresh token is issued
/// outside this crate.
#[derive(Clone)]
pub struct OAuthClient {
    http: Client,
    token_url: Url,
    client_id: String,
    client_secret: String,
}

impl OAuthClient {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, OAuthError> {
        Self::with_token_url(DEFAULT_TOKEN_URL, client_id, client_secret)
    }

    /// Points the client at `<base_url>/token`.
    pub fn with_base_url(
        base_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, OAuthError> {
        let token_url = Url::parse(base_url)?.join("/token")?;
        Self::with_token_url(token_url.as_str(), client_id, client_secret)
    }

    fn with_token_url(
        token_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, OAuthError> {
        Ok(Self {
            http: Client::new(),
            token_url: Url::parse(token_url)?,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }

    /// Exchanges a long-lived refresh token for a fresh access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<OAuthToken, OAuthError> {
        let grant = RefreshGrant {
            grant_type: "refresh_token",
            refresh_token,
            client_id: &self.client_id,
            client_secret: &self.client_secret,
        };
        let response = self
            .http
            .post(self.token_url.clone())
            .form(&grant)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<OAuthToken>().await?);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match serde_json::from_str::<ErrorDocument>(&body) {
            Ok(doc) => OAuthError::Rejected {
                status,
                code: doc.error,
                description: doc.error_description,
            },
            Err(_) => OAuthError::Api { status, body },
        })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}
