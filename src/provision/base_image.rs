/// Base distribution image fetch, verification and extraction
///
/// The root filesystem is marked complete only after the whole tarball has
/// been unpacked, so an interrupted extraction is redone on the next run.
use crate::config::config::BaseImageConfig;
use crate::kernel::mount::{release_stale_binds, Mounter};
use crate::types::{HarnessError, Result};
use flate2::read::GzDecoder;
use log::{info, warn};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tar::Archive;

/// Marker holding the id of the base image extracted into a root
pub const BASE_MARKER: &str = ".kerncheck-base";

/// Download timeout for a whole base tarball
const HTTP_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Remote(String),
    Local(PathBuf),
}

impl ImageSource {
    pub fn parse(source: &str) -> Self {
        if source.starts_with("http://") || source.starts_with("https://") {
            ImageSource::Remote(source.to_string())
        } else {
            ImageSource::Local(PathBuf::from(source.strip_prefix("file://").unwrap_or(source)))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseImageStatus {
    /// Marker matched; nothing downloaded or extracted
    Cached,
    Fetched,
}

/// Make sure `root` holds the extracted base image described by `image`.
///
/// A stale root is cleared only after any host filesystem still bound under
/// it has been detached through `mounter`.
pub fn ensure_base(
    root: &Path,
    image: &BaseImageConfig,
    mounter: &dyn Mounter,
) -> Result<BaseImageStatus> {
    let marker = root.join(BASE_MARKER);
    match fs::read_to_string(&marker) {
        Ok(id) if id.trim() == image.id => {
            info!("Base image {} already cached at {}", image.id, root.display());
            return Ok(BaseImageStatus::Cached);
        }
        Ok(id) => warn!(
            "Cached root {} holds {}, replacing with {}",
            root.display(),
            id.trim(),
            image.id
        ),
        Err(_) if root.exists() => {
            warn!("Discarding incomplete root {}", root.display())
        }
        Err(_) => {}
    }

    if root.exists() {
        release_stale_binds(mounter, root)
            .and_then(|()| fs::remove_dir_all(root).map_err(HarnessError::from))
            .map_err(|e| {
                HarnessError::Fetch(format!("Failed to clear {}: {}", root.display(), e))
            })?;
    }
    let parent = root.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| fetch_io("create", parent, e))?;

    let (tarball, downloaded) = match ImageSource::parse(&image.source) {
        ImageSource::Local(path) => {
            if !path.is_file() {
                return Err(HarnessError::Fetch(format!(
                    "Base image tarball not found: {}",
                    path.display()
                )));
            }
            (path, false)
        }
        ImageSource::Remote(url) => {
            let path = parent.join(format!("{}.tar.gz.part", image.id));
            download(&url, &path)?;
            (path, true)
        }
    };

    let result = verify_and_extract(&tarball, root, image);
    if downloaded {
        if let Err(e) = fs::remove_file(&tarball) {
            warn!("Failed to remove {}: {}", tarball.display(), e);
        }
    }
    result?;

    fs::write(&marker, &image.id).map_err(|e| fetch_io("write", &marker, e))?;
    info!("Extracted base image {} into {}", image.id, root.display());
    Ok(BaseImageStatus::Fetched)
}

fn verify_and_extract(tarball: &Path, root: &Path, image: &BaseImageConfig) -> Result<()> {
    if let Some(expected) = &image.sha256 {
        let actual = file_sha256(tarball).map_err(|e| {
            HarnessError::Fetch(format!("Failed to hash {}: {}", tarball.display(), e))
        })?;
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            return Err(HarnessError::Fetch(format!(
                "Checksum mismatch for {}: expected {}, got {}",
                image.id, expected, actual
            )));
        }
    }
    extract(tarball, root)
}

fn download(url: &str, dest: &Path) -> Result<()> {
    info!("Downloading {}", url);
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .user_agent(format!("kerncheck/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| HarnessError::Fetch(format!("Failed to build HTTP client: {}", e)))?;

    let mut response = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(|e| HarnessError::Fetch(format!("GET {} failed: {}", url, e)))?;

    let mut file = File::create(dest).map_err(|e| fetch_io("create", dest, e))?;
    response
        .copy_to(&mut file)
        .map_err(|e| HarnessError::Fetch(format!("Download of {} interrupted: {}", url, e)))?;
    Ok(())
}

/// Hex-encoded SHA-256 of a file
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn extract(tarball: &Path, root: &Path) -> Result<()> {
    fs::create_dir_all(root).map_err(|e| fetch_io("create", root, e))?;
    let file = File::open(tarball).map_err(|e| fetch_io("open", tarball, e))?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    archive.unpack(root).map_err(|e| {
        HarnessError::Fetch(format!(
            "Failed to extract {} into {}: {}",
            tarball.display(),
            root.display(),
            e
        ))
    })
}

fn fetch_io(action: &str, path: &Path, e: io::Error) -> HarnessError {
    HarnessError::Fetch(format!("Failed to {} {}: {}", action, path.display(), e))
}
