use gdrive_core::{OAuthClient, OAuthError};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no drive credentials: set GDRIVE_ACCESS_TOKEN or GDRIVE_CLIENT_ID, GDRIVE_CLIENT_SECRET and GDRIVE_REFRESH_TOKEN")]
    Missing,
    #[error("oauth refresh failed: {0}")]
    OAuth(#[from] OAuthError),
}

#[derive(Clone, PartialEq, Eq)]
pub enum DriveCredentials {
    AccessToken(String),
    Refresh {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
}

impl std::fmt::Debug for DriveCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriveCredentials::AccessToken(_) => f.write_str("AccessToken(..)"),
            DriveCredentials::Refresh { client_id, .. } => f
                .debug_struct("Refresh")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

impl DriveCredentials {
    /// A ready token takes precedence over refresh credentials.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CredentialError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("GDRIVE_ACCESS_TOKEN").filter(|t| !t.trim().is_empty()) {
            return Ok(DriveCredentials::AccessToken(token));
        }
        match (
            lookup("GDRIVE_CLIENT_ID"),
            lookup("GDRIVE_CLIENT_SECRET"),
            lookup("GDRIVE_REFRESH_TOKEN"),
        ) {
            (Some(client_id), Some(client_secret), Some(refresh_token)) => {
                Ok(DriveCredentials::Refresh {
                    client_id,
                    client_secret,
                    refresh_token,
                })
            }
            _ => Err(CredentialError::Missing),
        }
    }
}

/// Turns configured credentials into a bearer token without any user
/// interaction.
pub struct TokenProvider {
    credentials: DriveCredentials,
    oauth_base_url: Option<String>,
}

impl TokenProvider {
    pub fn new(credentials: DriveCredentials) -> Self {
        Self {
            credentials,
            oauth_base_url: None,
        }
    }

    pub fn with_oauth_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.oauth_base_url = Some(base_url.into());
        self
    }

    pub async fn access_token(&self) -> Result<String, CredentialError> {
        let (client_id, client_secret, refresh_token) = match &self.credentials {
            DriveCredentials::AccessToken(token) => return Ok(token.clone()),
            DriveCredentials::Refresh {
                client_id,
                client_secret,
                refresh_token,
            } => (client_id, client_secret, refresh_token),
        };
        let client = match &self.oauth_base_url {
            Some(url) => OAuthClient::with_base_url(url, client_id, client_secret)?,
            None => OAuthClient::new(client_id, client_secret)?,
        };
        let token = client.refresh(refresh_token).await?;
        debug!(expires_in = ?token.expires_in, "drive access token refreshed");
        Ok(token.access_token)
    }
}
