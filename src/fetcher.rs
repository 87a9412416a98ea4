//! The `apt://` fetch method.

use std::fs;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::backend::{Schroot, SessionBackend, SessionEnvironment};
use crate::config::FetchConfig;
use crate::error::{FetchError, Result};
use crate::lock::RepoLock;
use crate::request::FetchRequest;
use crate::script::{self, PlanStep, UnpackOutcome};
use crate::session::with_session;
use crate::sync::sync_if_enabled;
use crate::url::FetchUrl;

/// Capability set every fetch method provides to the build framework.
pub trait FetchMethod {
    fn name(&self) -> &'static str;

    /// Whether this method handles `url`. Pure.
    fn supports(&self, url: &FetchUrl) -> bool;

    /// Derive the request (storage paths) for `url`.
    fn init(&self, url: &FetchUrl, config: &FetchConfig) -> Result<FetchRequest>;

    fn download(&self, request: &FetchRequest, config: &FetchConfig) -> Result<()>;

    fn unpack(&self, request: &FetchRequest, rootdir: &Path, config: &FetchConfig) -> Result<()>;

    /// Remove everything [`Self::download`] stored locally.
    fn clean(&self, request: &FetchRequest, config: &FetchConfig) -> Result<()>;
}

pub const APT_SCHEME: &str = "apt";

/// Debian source packages fetched with `apt-get source` in a build chroot.
#[derive(Debug, Clone, Default)]
pub struct AptSrc<B = Schroot> {
    backend: B,
}

impl AptSrc<Schroot> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: SessionBackend> AptSrc<B> {
    pub fn with_backend(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// What `download` would run, without starting a session.
    pub fn plan(&self, request: &FetchRequest, config: &FetchConfig) -> Vec<PlanStep> {
        script::download_plan(config, request)
    }

    /// Unpack and report which descriptor was extracted.
    pub fn unpack_sources(
        &self,
        request: &FetchRequest,
        rootdir: &Path,
        config: &FetchConfig,
    ) -> Result<UnpackOutcome> {
        let (pp, pps) = config.unpack_dirs()?;
        debug!(
            package = %request.src_package,
            rootdir = %rootdir.display(),
            tree = %pps.display(),
            "unpacking source package"
        );

        with_session(
            &self.backend,
            SessionEnvironment::from_config(config),
            |guard| {
                sync_if_enabled(
                    config.prefetch_base_apt,
                    &config.repo_lock_path(),
                    guard.backend(),
                    guard.session(),
                )?;
                script::run_unpack(guard.backend(), guard.session(), request, pp, pps)
            },
        )
    }

    fn prefetch_base_apt(&self, request: &FetchRequest, config: &FetchConfig) -> Result<()> {
        let cmd = script::debrepo_command(config, request).allow_fail();
        info!(package = %request.src_package, "prefetching sources into base-apt");
        let failed = |status: String, stderr: String| FetchError::CommandExecution {
            step: "base-apt prefetch".to_string(),
            command: cmd.display(),
            status,
            stderr,
        };
        let result = cmd
            .run()
            .map_err(|e| failed("not started".to_string(), format!("{e:#}")))?;
        if !result.success() {
            return Err(failed(result.status_string(), result.stderr));
        }
        Ok(())
    }
}

impl<B: SessionBackend> FetchMethod for AptSrc<B> {
    fn name(&self) -> &'static str {
        "aptsrc"
    }

    fn supports(&self, url: &FetchUrl) -> bool {
        url.scheme() == APT_SCHEME
    }

    fn init(&self, url: &FetchUrl, config: &FetchConfig) -> Result<FetchRequest> {
        if !self.supports(url) {
            return Err(FetchError::UnsupportedUrl {
                url: url.to_string(),
                scheme: url.scheme().to_string(),
            });
        }
        Ok(FetchRequest::new(url, config))
    }

    fn download(&self, request: &FetchRequest, config: &FetchConfig) -> Result<()> {
        with_session(
            &self.backend,
            SessionEnvironment::from_config(config),
            |guard| {
                // isar-apt must not change under us while sources are fetched.
                guard.hold(RepoLock::acquire(&config.isar_lock_path())?);

                if config.prefetch_base_apt {
                    self.prefetch_base_apt(request, config)?;
                }
                sync_if_enabled(
                    config.prefetch_base_apt,
                    &config.repo_lock_path(),
                    guard.backend(),
                    guard.session(),
                )?;
                script::run_download(guard.backend(), guard.session(), request)
            },
        )
    }

    fn unpack(&self, request: &FetchRequest, rootdir: &Path, config: &FetchConfig) -> Result<()> {
        self.unpack_sources(request, rootdir, config).map(|_| ())
    }

    fn clean(&self, request: &FetchRequest, _config: &FetchConfig) -> Result<()> {
        let path = &request.localpath;
        if !path.exists() {
            debug!(path = %path.display(), "nothing to clean");
            return Ok(());
        }

        let mut files = 0usize;
        for entry in WalkDir::new(path) {
            let entry = entry.map_err(|e| {
                FetchError::io(format!("walking '{}'", path.display()), e.into())
            })?;
            if entry.file_type().is_file() {
                files += 1;
            }
        }

        let removed = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        removed.map_err(|e| FetchError::io(format!("removing '{}'", path.display()), e))?;

        info!(path = %path.display(), files, "cleaned source package storage");
        Ok(())
    }
}
