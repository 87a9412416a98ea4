//! Build-variable resolution.
//!
//! The enclosing build framework exposes its configuration as named string
//! variables (`BASE_DISTRO`, `SBUILD_CHROOT`, ...). Everything the fetcher
//! needs is read once, at the start of each operation, into a [`FetchConfig`]
//! that is then passed down explicitly.

use anyhow::Context;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FetchError, Result};

/// Proxy variables exported into every host command.
pub const PROXY_VARS: &[&str] = &["http_proxy", "https_proxy", "ftp_proxy", "no_proxy"];

/// Session user when neither `SCHROOT_USER` nor `USER` is set.
pub const DEFAULT_SCHROOT_USER: &str = "builder";

pub const DEFAULT_SCHROOT_CONF: &str = "/etc/schroot";

/// Source of named build variables.
pub trait VarSource {
    fn get(&self, name: &str) -> Option<String>;
}

impl VarSource for BTreeMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        BTreeMap::get(self, name).cloned()
    }
}

/// Variables from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvVars;

impl VarSource for EnvVars {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Variables from a flat TOML file of `NAME = "value"` pairs.
#[derive(Debug, Clone, Default)]
pub struct TomlVars {
    vars: BTreeMap<String, String>,
}

impl TomlVars {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading fetch config '{}'", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing fetch config '{}'", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let table: toml::Table = toml::from_str(text)?;
        let mut vars = BTreeMap::new();
        for (name, value) in table {
            let value = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Boolean(b) => String::from(if b { "1" } else { "0" }),
                other => anyhow::bail!(
                    "variable '{}' must be a string, integer or boolean, got {}",
                    name,
                    other.type_str()
                ),
            };
            vars.insert(name, value);
        }
        Ok(Self { vars })
    }
}

impl VarSource for TomlVars {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// Tries each source in order; the first one that knows a variable wins.
pub struct Layered<'a> {
    sources: Vec<&'a dyn VarSource>,
}

impl<'a> Layered<'a> {
    pub fn new(sources: Vec<&'a dyn VarSource>) -> Self {
        Self { sources }
    }
}

impl VarSource for Layered<'_> {
    fn get(&self, name: &str) -> Option<String> {
        self.sources.iter().find_map(|s| s.get(name))
    }
}

/// Proxy settings exported to host commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Proxies {
    vars: BTreeMap<String, String>,
}

impl Proxies {
    pub fn from_source(vars: &dyn VarSource) -> Self {
        let vars = PROXY_VARS
            .iter()
            .filter_map(|name| {
                vars.get(name)
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| (name.to_string(), v))
            })
            .collect();
        Self { vars }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Everything one fetch operation needs, resolved up front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchConfig {
    pub base_distro: String,
    pub codename: String,
    /// schroot chroot name sessions are started from.
    pub sbuild_chroot: String,
    /// Host download directory, bind-mounted at `/downloads`.
    pub dl_dir: PathBuf,
    /// Host work directory, bind-mounted at `/home/builder`.
    pub workdir: PathBuf,
    /// Rootfs the chroot definition points at.
    pub schroot_dir: PathBuf,
    /// schroot configuration root (usually `/etc/schroot`).
    pub schroot_conf: PathBuf,
    pub schroot_user: String,
    pub repo_isar_dir: PathBuf,
    pub repo_base_dir: PathBuf,
    pub debrepo_target_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub prefetch_base_apt: bool,
    /// Parent of the extracted tree, inside the session.
    pub pp: Option<PathBuf>,
    /// Extracted source tree, inside the session.
    pub pps: Option<PathBuf>,
    pub proxies: Proxies,
}

impl FetchConfig {
    pub fn resolve(vars: &dyn VarSource) -> Result<Self> {
        let dl_dir = match vars.get("DL_DIR").filter(|dir| !dir.trim().is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => default_dl_dir()?,
        };

        Ok(Self {
            base_distro: required(vars, "BASE_DISTRO")?,
            codename: required(vars, "BASE_DISTRO_CODENAME")?,
            sbuild_chroot: required(vars, "SBUILD_CHROOT")?,
            dl_dir,
            workdir: required(vars, "WORKDIR")?.into(),
            schroot_dir: required(vars, "SCHROOT_DIR")?.into(),
            schroot_conf: vars
                .get("SCHROOT_CONF")
                .unwrap_or_else(|| DEFAULT_SCHROOT_CONF.to_string())
                .into(),
            schroot_user: schroot_user(vars),
            repo_isar_dir: required(vars, "REPO_ISAR_DIR")?.into(),
            repo_base_dir: required(vars, "REPO_BASE_DIR")?.into(),
            debrepo_target_dir: required(vars, "DEBREPO_TARGET_DIR")?.into(),
            scripts_dir: required(vars, "SCRIPTSDIR")?.into(),
            prefetch_base_apt: vars
                .get("ISAR_PREFETCH_BASE_APT")
                .is_some_and(|v| v.trim() == "1"),
            pp: vars.get("PP").map(PathBuf::from),
            pps: vars.get("PPS").map(PathBuf::from),
            proxies: Proxies::from_source(vars),
        })
    }

    /// `(PP, PPS)`, both of which unpack requires.
    pub fn unpack_dirs(&self) -> Result<(&Path, &Path)> {
        let pp = self
            .pp
            .as_deref()
            .ok_or_else(|| FetchError::config("PP is not set; unpack needs the source parent dir"))?;
        let pps = self
            .pps
            .as_deref()
            .ok_or_else(|| FetchError::config("PPS is not set; unpack needs the source tree dir"))?;
        Ok((pp, pps))
    }

    pub fn isar_lock_path(&self) -> PathBuf {
        self.repo_isar_dir.join("isar.lock")
    }

    pub fn repo_lock_path(&self) -> PathBuf {
        self.repo_base_dir.join("repo.lock")
    }

    pub fn debrepo_script(&self) -> PathBuf {
        self.scripts_dir.join("debrepo")
    }
}

fn required(vars: &dyn VarSource, name: &str) -> Result<String> {
    match vars.get(name) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(FetchError::config(format!("required variable {name} is not set"))),
    }
}

/// schroot grants access to the host user that starts the session, so the
/// default is whoever invokes the fetcher.
fn schroot_user(vars: &dyn VarSource) -> String {
    ["SCHROOT_USER", "USER"]
        .iter()
        .filter_map(|name| vars.get(name))
        .find(|user| !user.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SCHROOT_USER.to_string())
}

fn default_dl_dir() -> Result<PathBuf> {
    dirs::cache_dir()
        .map(|dir| dir.join("aptsrc-fetcher").join("downloads"))
        .ok_or_else(|| FetchError::config("DL_DIR is not set and no user cache directory exists"))
}

#[cfg(test)]
pub(crate) fn test_vars(root: &Path) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    let mut set = |k: &str, v: String| {
        vars.insert(k.to_string(), v);
    };
    set("BASE_DISTRO", "debian".into());
    set("BASE_DISTRO_CODENAME", "bookworm".into());
    set("SBUILD_CHROOT", "isar-debian-bookworm-amd64".into());
    set("DL_DIR", root.join("downloads").display().to_string());
    set("WORKDIR", root.join("work").display().to_string());
    set("SCHROOT_DIR", root.join("rootfs").display().to_string());
    set("SCHROOT_CONF", root.join("schroot").display().to_string());
    set("REPO_ISAR_DIR", root.join("repo/isar").display().to_string());
    set("REPO_BASE_DIR", root.join("repo/base").display().to_string());
    set("DEBREPO_TARGET_DIR", root.join("debrepo").display().to_string());
    set("SCRIPTSDIR", root.join("scripts").display().to_string());
    set("ISAR_PREFETCH_BASE_APT", "0".into());
    set("PP", "/home/builder/hello".into());
    set("PPS", "/home/builder/hello/src".into());
    vars
}
