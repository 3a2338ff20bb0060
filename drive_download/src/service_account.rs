//! Service account authentication for headless runs.

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::Serialize;

use crate::error::{DriveError, Result};
use crate::flow::AcquireAuthorization;
use crate::models::{default_token_uri, ServiceAccountCredentials, TokenResponse};
use crate::token_store::Credential;

/// Lifetime of the signed assertion, the maximum Google accepts.
const ASSERTION_LIFETIME_SECS: u64 = 3600;

/// JWT claims for service account authentication.
#[derive(Debug, Serialize)]
struct Claims {
    iss: String,   // Issuer (service account email)
    scope: String, // OAuth scope
    aud: String,   // Audience (token endpoint)
    exp: u64,      // Expiration time
    iat: u64,      // Issued at
}

/// Obtains credentials with the JWT-bearer grant; never needs a browser.
pub struct ServiceAccountFlow {
    credentials: ServiceAccountCredentials,
    http: Client,
}

impl ServiceAccountFlow {
    /// Create a new flow from a service account JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            DriveError::Configuration(format!(
                "Failed to read service account file {}: {e}",
                path.display()
            ))
        })?;
        let credentials: ServiceAccountCredentials = serde_json::from_str(&content)?;
        Ok(Self::new(credentials))
    }

    pub fn new(credentials: ServiceAccountCredentials) -> Self {
        Self {
            credentials,
            http: Client::new(),
        }
    }

    fn token_uri(&self) -> String {
        self.credentials
            .token_uri
            .clone()
            .unwrap_or_else(default_token_uri)
    }

    fn signed_assertion(&self, scope: &str, token_uri: &str) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| DriveError::OAuth(format!("System clock before epoch: {e}")))?
            .as_secs();

        let claims = Claims {
            iss: self.credentials.client_email.clone(),
            scope: scope.to_string(),
            aud: token_uri.to_string(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        let header = Header::new(Algorithm::RS256);
        let key = EncodingKey::from_rsa_pem(self.credentials.private_key.as_bytes())?;
        Ok(encode(&header, &claims, &key)?)
    }
}

#[async_trait]
impl AcquireAuthorization for ServiceAccountFlow {
    async fn acquire(&self, scope: &str) -> Result<Credential> {
        let token_uri = self.token_uri();
        let jwt = self.signed_assertion(scope, &token_uri)?;

        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", jwt.as_str()),
        ];

        let response = self.http.post(&token_uri).form(&params).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::OAuth(format!(
                "Service account token request failed with status {status}: {body}"
            )));
        }

        let token_response: TokenResponse = response.json().await?;
        Ok(Credential::from_token_response(
            token_response,
            scope,
            &token_uri,
            None,
        ))
    }
}
