//! Credential resolution: cached token, refresh, or a fresh authorization.

use reqwest::{Client, RequestBuilder};
use tracing::{info, warn};

use crate::error::{DriveError, Result};
use crate::flow::AcquireAuthorization;
use crate::models::TokenResponse;
use crate::token_store::{Credential, TokenStore};

/// Read-only access to file metadata and content.
pub const DRIVE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

/// Handle that signs Drive API requests on behalf of the user.
///
/// The credential inside is never exposed; callers can only attach it to a
/// request.
#[derive(Clone)]
pub struct AuthorizedClient {
    credential: Credential,
    scope: &'static str,
}

impl AuthorizedClient {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            scope: DRIVE_READONLY_SCOPE,
        }
    }

    pub fn scope(&self) -> &str {
        self.scope
    }

    /// Attach the bearer token to a request.
    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.credential.access_token)
    }
}

impl std::fmt::Debug for AuthorizedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizedClient")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Produces an [`AuthorizedClient`] from the token cache or a new authorization.
pub struct Authenticator {
    store: TokenStore,
    flow: Box<dyn AcquireAuthorization>,
    http: Client,
}

impl Authenticator {
    pub fn new(store: TokenStore, flow: Box<dyn AcquireAuthorization>) -> Self {
        Self {
            store,
            flow,
            http: Client::new(),
        }
    }

    pub async fn authenticate(&self) -> Result<AuthorizedClient> {
        info!("Starting authentication...");

        let cached = self.load_cached();
        if let Some(credential) = &cached {
            if credential.is_valid() {
                info!("Authentication successful");
                return Ok(AuthorizedClient::new(credential.clone()));
            }
        }

        let credential = match cached {
            Some(stale) if stale.is_expired() && stale.can_refresh() => {
                info!("Refreshing token...");
                match self.refresh(&stale).await {
                    Ok(refreshed) => refreshed,
                    Err(e) => {
                        warn!("{e}; falling back to a new authorization");
                        self.acquire().await?
                    }
                }
            }
            _ => self.acquire().await?,
        };

        self.store.save(&credential)?;
        info!("Token saved to {}", self.store.path().display());
        info!("Authentication successful");
        Ok(AuthorizedClient::new(credential))
    }

    /// Load the cached credential, treating unusable caches as absent.
    fn load_cached(&self) -> Option<Credential> {
        let path = self.store.path().display();
        match self.store.load() {
            Ok(Some(credential)) if !credential.has_scope(DRIVE_READONLY_SCOPE) => {
                warn!("Cached token in {path} lacks the required scope; ignoring it");
                None
            }
            Ok(Some(credential)) => {
                info!("Loaded token from {path}");
                Some(credential)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring cached token: {e}");
                None
            }
        }
    }

    async fn acquire(&self) -> Result<Credential> {
        info!("Initiating new authentication flow...");
        self.flow.acquire(DRIVE_READONLY_SCOPE).await
    }

    /// Exchange the refresh token for a new access token.
    pub async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or_else(|| DriveError::AuthRefresh("no refresh token".to_string()))?;
        let client_id = credential.client_id.as_deref().unwrap_or_default();
        let client_secret = credential.client_secret.as_deref().unwrap_or_default();

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];

        let response = self
            .http
            .post(&credential.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| DriveError::AuthRefresh(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::AuthRefresh(format!("Status {status}: {body}")));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| DriveError::AuthRefresh(e.to_string()))?;

        let mut refreshed = Credential::from_token_response(
            token_response,
            DRIVE_READONLY_SCOPE,
            &credential.token_uri,
            credential.refresh_token.clone(),
        );
        refreshed.client_id = credential.client_id.clone();
        refreshed.client_secret = credential.client_secret.clone();
        Ok(refreshed)
    }
}
