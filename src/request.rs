//! Per-invocation fetch request and storage path derivation.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::FetchConfig;
use crate::url::FetchUrl;

/// Top-level directory under `DL_DIR` holding fetched source packages.
pub const STORAGE_ROOT: &str = "deb-src";

/// Replace characters that must not appear in a storage path component.
pub fn sanitize_host(host: &str) -> String {
    host.replace('=', "_")
}

/// `deb-src/<distro>-<codename>/<host>`, relative to the download directory.
pub fn storage_path(base_distro: &str, codename: &str, host: &str) -> PathBuf {
    Path::new(STORAGE_ROOT)
        .join(format!("{base_distro}-{codename}"))
        .join(sanitize_host(host))
}

/// Immutable description of one source package fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchRequest {
    /// Package spec handed to `apt-get source` (may carry `=version`).
    pub src_package: String,
    /// Storage path relative to the download directory.
    pub localfile: PathBuf,
    /// Absolute host path of [`Self::localfile`].
    pub localpath: PathBuf,
}

impl FetchRequest {
    pub fn new(url: &FetchUrl, config: &FetchConfig) -> Self {
        let localfile = storage_path(&config.base_distro, &config.codename, url.host());
        Self {
            src_package: url.location().to_string(),
            localpath: config.dl_dir.join(&localfile),
            localfile,
        }
    }

    /// Where the storage path appears inside the session.
    pub fn session_download_dir(&self) -> PathBuf {
        Path::new(crate::backend::SESSION_DOWNLOADS).join(&self.localfile)
    }
}
