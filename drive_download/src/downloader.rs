//! Bulk download of every binary file in a Drive listing.

use std::path::{self, Component, Path, PathBuf};

use tokio::fs::{self, File};
use tracing::{error, info, warn};

use crate::client::DriveService;
use crate::error::{DriveError, Result};
use crate::models::FileMetadata;

/// Outcome of a [`download_all`] run.
#[derive(Debug, Default)]
pub struct DownloadReport {
    /// Files written to disk.
    pub downloaded: usize,
    /// Google-native documents that have no binary content.
    pub skipped: usize,
    /// Files whose transfer failed.
    pub failed: usize,
    /// Listing pages fetched successfully.
    pub pages: usize,
    /// Set when a listing call failed and the run stopped early.
    pub aborted: Option<DriveError>,
}

impl DownloadReport {
    /// Settle the run's outcome.
    ///
    /// A listing failure before any page arrived means nothing could be
    /// listed at all and becomes an error. A failure on a later page keeps
    /// the partial result.
    pub fn into_result(mut self) -> Result<Self> {
        if self.pages == 0 {
            if let Some(e) = self.aborted.take() {
                return Err(e);
            }
        }
        Ok(self)
    }
}

/// Download every non-native file visible to `service` into `save_dir`.
///
/// Per-file failures are logged and counted. A failing listing call ends the
/// run and is reported through [`DownloadReport::aborted`]; only failing to
/// create `save_dir` is returned as an error.
pub async fn download_all(
    service: &dyn DriveService,
    save_dir: &Path,
    page_size: u32,
) -> Result<DownloadReport> {
    info!("Creating download directory: {}", save_dir.display());
    fs::create_dir_all(save_dir).await?;

    let mut report = DownloadReport::default();
    let mut page_token: Option<String> = None;

    loop {
        info!("Fetching file list...");
        let page = match service.list_page(page_token.as_deref(), page_size).await {
            Ok(page) => page,
            Err(e) => {
                let e = DriveError::ListingFetch(Box::new(e));
                error!("{e}");
                report.aborted = Some(e);
                break;
            }
        };
        report.pages += 1;

        if page.files.is_empty() {
            info!("No files found");
            break;
        }

        let total = page.files.len();
        info!("Found {total} files");
        for (idx, entry) in page.files.iter().enumerate() {
            let progress = format!("[{}/{}]", idx + 1, total);

            if entry.is_native_document() {
                info!("{progress} Skipping Google Docs file: {}", entry.name);
                report.skipped += 1;
                continue;
            }

            match download_one(service, save_dir, entry).await {
                Ok(bytes) => {
                    info!("{progress} Downloaded: {} ({bytes} bytes)", entry.name);
                    report.downloaded += 1;
                }
                Err(e) => {
                    error!("{progress} {e}");
                    report.failed += 1;
                }
            }
        }

        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => break,
        }
    }

    info!("Total files downloaded: {}", report.downloaded);
    Ok(report)
}

/// Transfer a single entry, removing the partial file on failure.
async fn download_one(
    service: &dyn DriveService,
    save_dir: &Path,
    entry: &FileMetadata,
) -> Result<u64> {
    let wrap = |source: DriveError| DriveError::FileTransfer {
        name: entry.name.clone(),
        source: Box::new(source),
    };

    let path = target_path(save_dir, &entry.name).map_err(wrap)?;

    // A file we never opened is not ours to delete.
    let mut file = File::create(&path).await.map_err(|e| wrap(e.into()))?;
    let result = service.download_content(&entry.id, &mut file).await;
    drop(file);

    if result.is_err() {
        if let Err(e) = fs::remove_file(&path).await {
            warn!("Could not remove partial file {}: {e}", path.display());
        }
    }
    result.map_err(wrap)
}

/// Resolve the on-disk path for a display name.
///
/// Names must be a single plain path component so that an entry can never
/// write outside `save_dir`. Only the platform's own separators count, so a
/// backslash is an ordinary character on Unix.
fn target_path(save_dir: &Path, name: &str) -> Result<PathBuf> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.chars().any(path::is_separator) => {
            Ok(save_dir.join(name))
        }
        _ => Err(DriveError::UnsafeFileName(name.to_string())),
    }
}
