//! drive_download - Mirror every binary file of a Google Drive account to local disk.
//!
//! This library provides functionality to:
//! - Authenticate with a cached token, a refresh, or an interactive consent flow
//! - Page through the Drive file listing
//! - Stream each file's content into a local directory, skipping Google-native documents
//!
//! # Example
//!
//! ```no_run
//! use drive_download::{download_all, Authenticator, DriveClient, InstalledAppFlow, TokenStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let flow = InstalledAppFlow::new("credentials.json");
//!     let auth = Authenticator::new(TokenStore::new("token.pkl"), Box::new(flow));
//!     let client = DriveClient::new(auth.authenticate().await?);
//!
//!     let report = download_all(&client, "drive_download".as_ref(), 1000).await?;
//!     println!("{} files downloaded", report.downloaded);
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod downloader;
pub mod error;
pub mod flow;
pub mod models;
pub mod service_account;
pub mod token_store;

// Re-exports for convenience
pub use auth::{Authenticator, AuthorizedClient, DRIVE_READONLY_SCOPE};
pub use client::{DriveClient, DriveService};
pub use downloader::{download_all, DownloadReport};
pub use error::{DriveError, Result};
pub use flow::{AcquireAuthorization, InstalledAppFlow};
pub use models::FileMetadata;
pub use service_account::ServiceAccountFlow;
pub use token_store::{Credential, TokenStore};
