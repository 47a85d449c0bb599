//! Model artifact download and on-disk cache.
//!
//! The reference model ships as a gzipped tarball holding an `onnx/`
//! directory with `model.onnx` and `tokenizer.json`. The archive is fetched
//! once, checked against a pinned SHA-256, and unpacked into the cache.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::error::ArtifactError;
use crate::Result;

/// Model name, also the cache subdirectory.
pub const MODEL_NAME: &str = "all-MiniLM-L6-v2";

/// Location of the packaged model archive.
pub const ARCHIVE_URL: &str =
    "https://chroma-onnx-models.s3.amazonaws.com/all-MiniLM-L6-v2/onnx.tar.gz";

/// SHA-256 of the archive at [`ARCHIVE_URL`].
pub const ARCHIVE_SHA256: &str =
    "913d7300ceae3b2dbc2c50d1de4baacab4be7b9380491c27fab7418616a16ec3";

/// ONNX model file name inside the extracted directory.
pub const MODEL_FILE: &str = "model.onnx";

/// Tokenizer file name inside the extracted directory.
pub const TOKENIZER_FILE: &str = "tokenizer.json";

const ARCHIVE_FILE: &str = "onnx.tar.gz";
const EXTRACTED_DIR: &str = "onnx";

// Serializes download/extract across every pool in the process.
static FETCH_LOCK: Mutex<()> = Mutex::new(());

/// A model archive and the cache directory it unpacks into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    cache_dir: PathBuf,
    url: String,
    sha256: Option<String>,
}

impl ModelArtifact {
    /// Create an artifact cached in `cache_dir`, fetched from `url`.
    ///
    /// When `sha256` is `None` the archive is not verified.
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>, url: impl Into<String>, sha256: Option<String>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            url: url.into(),
            sha256,
        }
    }

    /// The reference all-MiniLM-L6-v2 artifact, cached in
    /// `{models_dir}/all-MiniLM-L6-v2`.
    #[must_use]
    pub fn minilm(models_dir: impl AsRef<Path>) -> Self {
        Self::new(
            models_dir.as_ref().join(MODEL_NAME),
            ARCHIVE_URL,
            Some(ARCHIVE_SHA256.to_string()),
        )
    }

    /// Cache directory for this model.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Archive URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Where the downloaded archive is kept.
    #[must_use]
    pub fn archive_path(&self) -> PathBuf {
        self.cache_dir.join(ARCHIVE_FILE)
    }

    /// Directory holding the unpacked files.
    #[must_use]
    pub fn extracted_dir(&self) -> PathBuf {
        self.cache_dir.join(EXTRACTED_DIR)
    }

    /// Path to the ONNX model.
    #[must_use]
    pub fn model_path(&self) -> PathBuf {
        self.extracted_dir().join(MODEL_FILE)
    }

    /// Path to `tokenizer.json`.
    #[must_use]
    pub fn tokenizer_path(&self) -> PathBuf {
        self.extracted_dir().join(TOKENIZER_FILE)
    }

    /// Whether both model and tokenizer are present on disk.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.model_path().is_file() && self.tokenizer_path().is_file()
    }

    /// Make sure model and tokenizer exist locally, fetching if needed.
    ///
    /// Safe to call from many threads at once: the first caller downloads
    /// and extracts, later callers find the files already in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the download, checksum, or extraction fails.
    pub fn ensure(&self) -> Result<()> {
        if self.is_available() {
            return Ok(());
        }

        let _guard = FETCH_LOCK.lock();
        if self.is_available() {
            tracing::debug!(dir = %self.cache_dir.display(), "Model fetched by another worker");
            return Ok(());
        }

        fs::create_dir_all(&self.cache_dir)?;

        if self.archive_is_valid()? {
            tracing::debug!(path = %self.archive_path().display(), "Reusing cached model archive");
        } else {
            self.download()?;
        }

        self.extract()?;

        for path in [self.model_path(), self.tokenizer_path()] {
            if !path.is_file() {
                return Err(ArtifactError::Missing(path.display().to_string()).into());
            }
        }

        tracing::info!(dir = %self.extracted_dir().display(), "Model artifact ready");
        Ok(())
    }

    fn archive_is_valid(&self) -> Result<bool> {
        let path = self.archive_path();
        if !path.is_file() {
            return Ok(false);
        }
        let Some(expected) = &self.sha256 else {
            return Ok(true);
        };
        let actual = sha256_file(&path)?;
        if actual.eq_ignore_ascii_case(expected) {
            Ok(true)
        } else {
            tracing::warn!(
                path = %path.display(),
                expected = %expected,
                actual = %actual,
                "Cached model archive is corrupt, downloading again"
            );
            fs::remove_file(&path)?;
            Ok(false)
        }
    }

    fn download(&self) -> Result<()> {
        let target = self.archive_path();
        let partial = target.with_extension("part");

        tracing::info!(url = %self.url, "Downloading model archive");

        let response = ureq::get(&self.url)
            .call()
            .map_err(|e| ArtifactError::Download {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        {
            let mut out = File::create(&partial)?;
            io::copy(&mut response.into_reader(), &mut out).map_err(|e| {
                ArtifactError::Download {
                    url: self.url.clone(),
                    reason: e.to_string(),
                }
            })?;
            out.sync_all()?;
        }

        if let Some(expected) = &self.sha256 {
            let actual = sha256_file(&partial)?;
            if !actual.eq_ignore_ascii_case(expected) {
                let _ = fs::remove_file(&partial);
                return Err(ArtifactError::Checksum {
                    expected: expected.clone(),
                    actual,
                }
                .into());
            }
        }

        fs::rename(&partial, &target)?;
        tracing::info!(path = %target.display(), "Model archive downloaded");
        Ok(())
    }

    fn extract(&self) -> Result<()> {
        let staging = self
            .cache_dir
            .join(format!(".extract-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&staging)?;

        let result = self.extract_into(&staging);
        let _ = fs::remove_dir_all(&staging);
        result
    }

    fn extract_into(&self, staging: &Path) -> Result<()> {
        let archive = File::open(self.archive_path())?;
        let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(archive)));
        tar.unpack(staging)
            .map_err(|e| ArtifactError::Extract(e.to_string()))?;

        let unpacked = staging.join(EXTRACTED_DIR);
        if !unpacked.is_dir() {
            return Err(ArtifactError::Extract(format!(
                "archive has no '{EXTRACTED_DIR}/' directory"
            ))
            .into());
        }

        let target = self.extracted_dir();
        if target.exists() {
            // Leftover from an interrupted extraction.
            fs::remove_dir_all(&target)?;
        }
        fs::rename(&unpacked, &target)?;
        Ok(())
    }
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut file = File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
