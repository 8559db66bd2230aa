//! Dataset sources: local directories and remote zip archives.

use crate::error::{AutoClassError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const COMPLETE_MARKER: &str = ".complete";
const EXTRACTED_DIR: &str = "extracted";
const ARCHIVE_NAME: &str = "archive.zip";

/// Where a dataset comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatasetSource {
    /// A directory already laid out as class folders.
    Local { path: PathBuf },
    /// A zip archive that unpacks to the class-folder layout.
    Remote { url: String },
}

impl DatasetSource {
    /// `http://` and `https://` locations are archives; anything else is a path.
    pub fn parse(location: &str) -> Self {
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            DatasetSource::Remote {
                url: location.to_string(),
            }
        } else {
            DatasetSource::Local {
                path: PathBuf::from(location),
            }
        }
    }
}

impl std::fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetSource::Local { path } => write!(f, "{}", path.display()),
            DatasetSource::Remote { url } => write!(f, "{url}"),
        }
    }
}

impl From<&Path> for DatasetSource {
    fn from(path: &Path) -> Self {
        DatasetSource::Local {
            path: path.to_path_buf(),
        }
    }
}

/// Resolves a [`DatasetSource`] to a local directory, downloading and
/// extracting archives at most once per URL.
pub struct DatasetFetcher {
    cache_dir: PathBuf,
}

impl DatasetFetcher {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Cache subdirectory name for a URL.
    pub fn cache_key(url: &str) -> String {
        let digest = Sha256::digest(url.as_bytes());
        format!("{digest:x}")[..16].to_string()
    }

    /// Cache directory holding the archive and extracted tree for `url`.
    pub fn entry_dir(&self, url: &str) -> PathBuf {
        self.cache_dir.join(Self::cache_key(url))
    }

    /// Local directory holding the dataset.
    pub async fn resolve(&self, source: &DatasetSource) -> Result<PathBuf> {
        match source {
            DatasetSource::Local { path } => {
                if path.is_dir() {
                    Ok(path.clone())
                } else {
                    Err(AutoClassError::data_format(format!(
                        "dataset directory {} does not exist",
                        path.display()
                    )))
                }
            }
            DatasetSource::Remote { url } => self.fetch(url).await,
        }
    }

    async fn fetch(&self, url: &str) -> Result<PathBuf> {
        let entry = self.entry_dir(url);
        let extracted = entry.join(EXTRACTED_DIR);
        if entry.join(COMPLETE_MARKER).exists() {
            tracing::debug!(url, cache = %entry.display(), "Using cached dataset archive");
            return Ok(dataset_root(&extracted));
        }

        std::fs::create_dir_all(&entry)
            .map_err(|e| AutoClassError::download(format!("cannot create cache dir: {e}")))?;
        let archive = entry.join(ARCHIVE_NAME);
        tracing::info!(url, "Downloading dataset archive");
        download(url, &archive).await?;

        let target = extracted.clone();
        let archive_path = archive.clone();
        tokio::task::spawn_blocking(move || extract_once(&archive_path, &target))
            .await
            .map_err(|e| AutoClassError::download(format!("extraction task failed: {e}")))??;

        std::fs::write(entry.join(COMPLETE_MARKER), url.as_bytes())
            .map_err(|e| AutoClassError::download(format!("cannot mark cache entry: {e}")))?;
        let _ = std::fs::remove_file(&archive);
        Ok(dataset_root(&extracted))
    }
}

async fn download(url: &str, dest: &Path) -> Result<()> {
    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| AutoClassError::download(format!("GET {url}: {e}")))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| AutoClassError::download(format!("reading body of {url}: {e}")))?;
    autoclass_core::persistence::atomic_write(dest, &bytes)
        .map_err(|e| AutoClassError::download(format!("writing {}: {e}", dest.display())))?;
    Ok(())
}

/// Unpack into a private staging directory, then rename into place. If a
/// concurrent fetch got there first, its tree is kept.
fn extract_once(archive: &Path, target: &Path) -> Result<()> {
    if target.is_dir() {
        return Ok(());
    }
    let staging = target.with_file_name(format!(
        ".{EXTRACTED_DIR}-{}",
        uuid::Uuid::new_v4().simple()
    ));
    extract_zip(archive, &staging)?;
    if std::fs::rename(&staging, target).is_err() {
        let _ = std::fs::remove_dir_all(&staging);
        if !target.is_dir() {
            return Err(AutoClassError::download(format!(
                "could not move extracted archive into {}",
                target.display()
            )));
        }
    }
    Ok(())
}

/// Extract a zip archive, refusing entries that escape `dest`.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(archive)
        .map_err(|e| AutoClassError::download(format!("opening {}: {e}", archive.display())))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| AutoClassError::download(format!("invalid zip archive: {e}")))?;
    create_dir(dest)?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| AutoClassError::download(format!("reading zip entry {i}: {e}")))?;
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!(name = entry.name(), "Skipping zip entry with unsafe path");
            continue;
        };
        let out = dest.join(relative);
        if entry.is_dir() {
            create_dir(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            create_dir(parent)?;
        }
        let mut writer = std::fs::File::create(&out)
            .map_err(|e| AutoClassError::download(format!("creating {}: {e}", out.display())))?;
        std::io::copy(&mut entry, &mut writer)
            .map_err(|e| AutoClassError::download(format!("extracting {}: {e}", out.display())))?;
    }
    Ok(())
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .map_err(|e| AutoClassError::download(format!("creating {}: {e}", path.display())))
}

/// Descend through a single wrapper directory (other than `train`) that an
/// archive may add around the class folders.
fn dataset_root(extracted: &Path) -> PathBuf {
    let Ok(entries) = std::fs::read_dir(extracted) else {
        return extracted.to_path_buf();
    };
    let visible: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.path())
        .collect();
    match visible.as_slice() {
        [only] if only.is_dir() && !only.ends_with("train") => only.clone(),
        _ => extracted.to_path_buf(),
    }
}
