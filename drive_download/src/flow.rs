//! Interactive OAuth consent flow for installed applications.
//!
//! The flow listens on a loopback port, sends the user to Google's consent
//! page and trades the returned authorization code for a [`Credential`].

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use reqwest::{Client, Url};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::error::{DriveError, Result};
use crate::models::{ClientSecrets, ClientSecretsFile, TokenResponse};
use crate::token_store::Credential;

/// Address the redirect listener binds to.
const LOOPBACK: &str = "127.0.0.1";

/// Strategy for obtaining a brand-new credential.
#[async_trait]
pub trait AcquireAuthorization: Send + Sync {
    async fn acquire(&self, scope: &str) -> Result<Credential>;
}

/// OAuth flow for desktop clients using a local redirect listener.
pub struct InstalledAppFlow {
    secrets_path: PathBuf,
    timeout: Duration,
    open_browser: bool,
    http: Client,
}

impl InstalledAppFlow {
    pub fn new<P: Into<PathBuf>>(secrets_path: P) -> Self {
        Self {
            secrets_path: secrets_path.into(),
            timeout: Duration::from_secs(300),
            open_browser: true,
            http: Client::new(),
        }
    }

    /// How long to wait for the browser to hit the redirect URI.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_browser(mut self, open_browser: bool) -> Self {
        self.open_browser = open_browser;
        self
    }

    /// Read the client secrets file; it is only needed once consent is required.
    pub fn load_secrets(path: &Path) -> Result<ClientSecrets> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DriveError::Configuration(format!(
                    "Credentials file not found: {}",
                    path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let file: ClientSecretsFile = serde_json::from_str(&content).map_err(|e| {
            DriveError::Configuration(format!("Invalid credentials file {}: {e}", path.display()))
        })?;

        file.into_secrets().ok_or_else(|| {
            DriveError::Configuration(format!(
                "Credentials file {} has neither an \"installed\" nor a \"web\" client",
                path.display()
            ))
        })
    }

    async fn exchange_code(
        &self,
        secrets: &ClientSecrets,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
        scope: &str,
    ) -> Result<Credential> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", code_verifier),
            ("redirect_uri", redirect_uri),
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.as_str()),
        ];

        let response = self.http.post(&secrets.token_uri).form(&params).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::OAuth(format!(
                "Token exchange failed with status {status}: {body}"
            )));
        }

        let token_response: TokenResponse = response.json().await?;
        Ok(
            Credential::from_token_response(token_response, scope, &secrets.token_uri, None)
                .with_client(&secrets.client_id, &secrets.client_secret),
        )
    }
}

#[async_trait]
impl AcquireAuthorization for InstalledAppFlow {
    async fn acquire(&self, scope: &str) -> Result<Credential> {
        let secrets = Self::load_secrets(&self.secrets_path)?;

        let listener = TcpListener::bind((LOOPBACK, 0)).await?;
        let port = listener.local_addr()?.port();
        let redirect_uri = loopback_redirect_uri(port);

        let pkce = Pkce::generate();
        let state = random_token();
        let auth_url = consent_url(&secrets, &redirect_uri, scope, &state, &pkce.challenge)?;

        info!("Please visit this URL to authorize this application: {auth_url}");
        if self.open_browser && webbrowser::open(auth_url.as_str()).is_err() {
            warn!("Could not open browser automatically");
        }

        let callback = listen_for_callback(listener, self.timeout).await?;
        if callback.state.as_deref() != Some(state.as_str()) {
            return Err(DriveError::OAuth(
                "State mismatch in OAuth callback".to_string(),
            ));
        }

        self.exchange_code(&secrets, &callback.code, &pkce.verifier, &redirect_uri, scope)
            .await
    }
}

/// Redirect target for the listener; the literal address matches the bound socket.
fn loopback_redirect_uri(port: u16) -> String {
    format!("http://{LOOPBACK}:{port}/")
}

/// Build the consent page URL for the given client.
fn consent_url(
    secrets: &ClientSecrets,
    redirect_uri: &str,
    scope: &str,
    state: &str,
    code_challenge: &str,
) -> Result<Url> {
    Url::parse_with_params(
        &secrets.auth_uri,
        &[
            ("response_type", "code"),
            ("client_id", secrets.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("scope", scope),
            ("state", state),
            ("code_challenge", code_challenge),
            ("code_challenge_method", "S256"),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ],
    )
    .map_err(|e| DriveError::Configuration(format!("Invalid auth_uri {}: {e}", secrets.auth_uri)))
}

struct Pkce {
    verifier: String,
    challenge: String,
}

impl Pkce {
    fn generate() -> Self {
        let verifier = random_token();
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self { verifier, challenge }
    }
}

fn random_token() -> String {
    let mut buf = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Query parameters the provider sent back to the redirect URI.
#[derive(Debug, PartialEq)]
struct Callback {
    code: String,
    state: Option<String>,
}

async fn listen_for_callback(listener: TcpListener, timeout: Duration) -> Result<Callback> {
    let accept = async {
        let (mut stream, _) = listener.accept().await?;

        let mut buf = vec![0u8; 8192];
        let n = stream.read(&mut buf).await?;
        let request = String::from_utf8_lossy(&buf[..n]);
        let parsed = parse_callback(&request);

        let (status, body) = match &parsed {
            Ok(_) => (
                "200 OK",
                "<!DOCTYPE html><html><body><h1>Authentication successful!</h1>\
                 <p>You can close this window and return to the terminal.</p></body></html>",
            ),
            Err(_) => (
                "400 Bad Request",
                "<!DOCTYPE html><html><body><h1>Authentication failed</h1>\
                 <p>Check the terminal for details.</p></body></html>",
            ),
        };
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await?;
        stream.shutdown().await?;

        parsed
    };

    tokio::time::timeout(timeout, accept).await.map_err(|_| {
        DriveError::OAuth(format!(
            "Timed out waiting for OAuth callback after {}s",
            timeout.as_secs()
        ))
    })?
}

/// Extract `code` and `state` from a raw `GET /?code=...` request.
fn parse_callback(request: &str) -> Result<Callback> {
    let target = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .ok_or_else(|| DriveError::OAuth("Malformed OAuth callback request".to_string()))?;

    let url = Url::parse("http://localhost")
        .and_then(|base| base.join(target))
        .map_err(|e| DriveError::OAuth(format!("Malformed OAuth callback target: {e}")))?;

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" if !value.is_empty() => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => {
                return Err(DriveError::OAuth(format!("Authorization denied: {value}")));
            }
            _ => {}
        }
    }

    let code = code.ok_or_else(|| {
        DriveError::OAuth("No authorization code found in callback request".to_string())
    })?;
    Ok(Callback { code, state })
}
