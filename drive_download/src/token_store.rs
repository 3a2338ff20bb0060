//! On-disk cache of OAuth credentials.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DriveError, Result};
use crate::models::{default_token_uri, TokenResponse};

/// Tokens expiring within this many seconds are treated as already expired.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Token material plus the OAuth client it was issued to.
///
/// The client identity travels with the token so that a refresh works even
/// when the client secrets file is no longer around.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Credential {
    /// Build a credential from a token endpoint response.
    ///
    /// `previous_refresh` is kept when the endpoint does not rotate the refresh
    /// token, which is the usual case for refresh grants.
    pub fn from_token_response(
        response: TokenResponse,
        requested_scope: &str,
        token_uri: &str,
        previous_refresh: Option<String>,
    ) -> Self {
        let expires_at = response
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs));
        let scopes = match response.scope {
            Some(granted) => granted.split_whitespace().map(str::to_string).collect(),
            None => vec![requested_scope.to_string()],
        };

        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            expires_at,
            token_type: response.token_type,
            scopes,
            token_uri: token_uri.to_string(),
            client_id: None,
            client_secret: None,
        }
    }

    /// Attach the OAuth client used for refreshing.
    pub fn with_client(mut self, client_id: &str, client_secret: &str) -> Self {
        self.client_id = Some(client_id.to_string());
        self.client_secret = Some(client_secret.to_string());
        self
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires) => Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) >= expires,
            None => false,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty() && !self.is_expired()
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// File-backed credential cache.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached credential.
    ///
    /// Returns `Ok(None)` when no cache exists and `CorruptToken` when the
    /// file cannot be parsed.
    pub fn load(&self) -> Result<Option<Credential>> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| DriveError::CorruptToken {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    /// Persist a credential, replacing any previous one.
    ///
    /// The file is written next to the target and renamed into place so a
    /// crash never leaves a truncated store behind.
    pub fn save(&self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let data = serde_json::to_string_pretty(credential)?;
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        // A leftover from a crashed save would keep its old permissions.
        match fs::remove_file(&tmp_path) {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        let mut file = private_file_options().open(&tmp_path)?;
        file.write_all(data.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// Options for a new file that only the owner can read.
fn private_file_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(expires_at: Option<DateTime<Utc>>) -> Credential {
        Credential {
            access_token: "access".into(),
            refresh_token: Some("refresh".into()),
            expires_at,
            token_type: "Bearer".into(),
            scopes: vec!["scope-a".into()],
            token_uri: default_token_uri(),
            client_id: Some("client".into()),
            client_secret: Some("secret".into()),
        }
    }

    #[test]
    fn credential_without_expiry_is_valid() {
        let cred = credential(None);
        assert!(!cred.is_expired());
        assert!(cred.is_valid());
    }

    #[test]
    fn credential_expiring_within_margin_is_expired() {
        let cred = credential(Some(Utc::now() + Duration::seconds(30)));
        assert!(cred.is_expired());
        assert!(!cred.is_valid());

        let cred = credential(Some(Utc::now() + Duration::hours(1)));
        assert!(cred.is_valid());
    }

    #[test]
    fn empty_access_token_is_invalid() {
        let mut cred = credential(None);
        cred.access_token.clear();
        assert!(!cred.is_valid());
    }

    #[test]
    fn can_refresh_requires_non_empty_token() {
        let mut cred = credential(None);
        assert!(cred.can_refresh());
        cred.refresh_token = Some(String::new());
        assert!(!cred.can_refresh());
        cred.refresh_token = None;
        assert!(!cred.can_refresh());
    }

    #[test]
    fn from_token_response_keeps_previous_refresh_token() {
        let response = TokenResponse {
            access_token: "new".into(),
            refresh_token: None,
            expires_in: Some(3600),
            token_type: "Bearer".into(),
            scope: None,
        };
        let cred = Credential::from_token_response(
            response,
            "scope-a",
            "https://example.com/token",
            Some("old-refresh".into()),
        );
        assert_eq!(cred.access_token, "new");
        assert_eq!(cred.refresh_token.as_deref(), Some("old-refresh"));
        assert!(cred.has_scope("scope-a"));
        assert_eq!(cred.token_uri, "https://example.com/token");
        assert!(cred.is_valid());
    }

    #[test]
    fn from_token_response_uses_granted_scopes() {
        let response = TokenResponse {
            access_token: "new".into(),
            refresh_token: Some("rotated".into()),
            expires_in: None,
            token_type: "Bearer".into(),
            scope: Some("scope-b scope-c".into()),
        };
        let cred = Credential::from_token_response(response, "scope-a", "uri", Some("old".into()));
        assert_eq!(cred.refresh_token.as_deref(), Some("rotated"));
        assert!(!cred.has_scope("scope-a"));
        assert!(cred.has_scope("scope-c"));
    }

    #[test]
    fn load_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.pkl"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load_preserves_credential() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("nested").join("token.pkl"));
        let expires = Utc::now() + Duration::hours(1);

        store.save(&credential(Some(expires))).unwrap();
        let loaded = store.load().unwrap().unwrap();

        assert_eq!(loaded.access_token, "access");
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(loaded.expires_at, Some(expires));
        assert_eq!(loaded.client_id.as_deref(), Some("client"));
        assert!(!dir.path().join("nested").join("token.pkl.tmp").exists());
    }

    #[test]
    fn save_overwrites_previous_credential() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.pkl"));

        store.save(&credential(None)).unwrap();
        let mut updated = credential(None);
        updated.access_token = "second".into();
        store.save(&updated).unwrap();

        assert_eq!(store.load().unwrap().unwrap().access_token, "second");
    }

    #[test]
    fn load_garbage_is_corrupt_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.pkl");
        fs::write(&path, b"\x80\x04\x95not json").unwrap();

        let err = TokenStore::new(&path).load().unwrap_err();
        assert!(matches!(err, DriveError::CorruptToken { .. }));
    }

    #[test]
    fn load_text_that_is_not_a_credential_is_corrupt_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.pkl");
        fs::write(&path, r#"{"unexpected": true}"#).unwrap();

        let err = TokenStore::new(&path).load().unwrap_err();
        assert!(matches!(err, DriveError::CorruptToken { .. }));
    }

    #[test]
    fn save_replaces_stale_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.pkl"));
        fs::write(dir.path().join("token.pkl.tmp"), b"leftover").unwrap();

        store.save(&credential(None)).unwrap();

        assert_eq!(store.load().unwrap().unwrap().access_token, "access");
        assert!(!dir.path().join("token.pkl.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn saved_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.pkl"));
        store.save(&credential(None)).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn private_file_options_create_owner_only_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        private_file_options().open(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }
}
