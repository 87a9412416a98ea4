//! Command sequences run inside a session for download and unpack.
//!
//! Each step is a typed [`SessionCommand`]; a failing step stops the sequence
//! and its error is returned unchanged.

use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::backend::{Session, SessionBackend};
use crate::command::SessionCommand;
use crate::config::FetchConfig;
use crate::error::{FetchError, Result};
use crate::process::Cmd;
use crate::request::FetchRequest;

/// Leftovers of the internal isar-apt repository that would shadow the
/// official sources during a fetch.
pub const ISAR_APT_FILES: &[&str] = &[
    "/etc/apt/sources.list.d/isar-apt.list",
    "/etc/apt/preferences.d/isar-apt",
];

pub fn remove_isar_apt_command() -> SessionCommand {
    SessionCommand::root("remove isar-apt sources", "rm")
        .arg("-f")
        .args(ISAR_APT_FILES.iter().copied())
}

/// Create the storage directory, then fetch the source package into it.
pub fn download_commands(request: &FetchRequest) -> Vec<SessionCommand> {
    let dir = request.session_download_dir();
    vec![
        SessionCommand::builder("create download dir", "mkdir")
            .arg("-p")
            .arg_path(&dir),
        SessionCommand::builder("download", "apt-get")
            .args(["-y", "--download-only", "--only-source", "source"])
            .arg(request.src_package.as_str())
            .in_dir(&dir),
    ]
}

/// Host-side base-apt prefetch of the package's sources.
pub fn debrepo_command(config: &FetchConfig, request: &FetchRequest) -> Cmd {
    Cmd::new(config.debrepo_script().display().to_string())
        .arg(format!("--workdir={}", config.debrepo_target_dir.display()))
        .arg("--srcmode")
        .arg(request.src_package.as_str())
        .envs(config.proxies.iter())
}

pub fn run_download<B: SessionBackend + ?Sized>(
    backend: &B,
    session: &Session,
    request: &FetchRequest,
) -> Result<()> {
    backend.run_in(session, &remove_isar_apt_command())?;
    for command in download_commands(request) {
        backend.run_in(session, &command)?;
    }
    info!(session = %session.id, package = %request.src_package, "downloaded source package");
    Ok(())
}

/// Dry-run query listing the files `apt-get source` would fetch.
pub fn print_uris_command(src_package: &str) -> SessionCommand {
    SessionCommand::builder("resolve dsc", "apt-get").args([
        "-y",
        "-qq",
        "--print-uris",
        "--only-source",
        "source",
        src_package,
    ])
}

/// Pick the `.dsc` file name out of `apt-get --print-uris` output.
///
/// Lines look like `'http://deb.debian.org/.../hello_2.10-3.dsc' hello_2.10-3.dsc 1847 SHA256:...`.
/// The second field of the first line whose second field mentions `.dsc`
/// wins.
pub fn parse_dsc_name(print_uris: &str) -> Option<String> {
    print_uris
        .lines()
        .filter_map(|line| line.split(' ').nth(1))
        .find(|name| name.contains(".dsc"))
        .map(str::to_string)
}

/// `<tree>.prev`, where a previous extraction is parked during unpack.
pub fn previous_tree(pps: &Path) -> PathBuf {
    let mut name = OsString::from(pps.as_os_str());
    name.push(".prev");
    PathBuf::from(name)
}

/// Copy every downloaded file into the extraction parent directory.
pub fn copy_downloads_command(request: &FetchRequest, pp: &Path) -> SessionCommand {
    SessionCommand::builder("copy downloads", "find")
        .arg_path(&request.session_download_dir())
        .args(["-mindepth", "1", "-maxdepth", "1", "-type", "f", "-exec", "cp", "-t"])
        .arg_path(pp)
        .args(["{}", "+"])
}

pub fn tree_exists_command(pps: &Path) -> SessionCommand {
    SessionCommand::builder("check previous tree", "test")
        .arg("-e")
        .arg_path(pps)
}

pub fn stash_previous_command(pps: &Path) -> SessionCommand {
    SessionCommand::builder("stash previous tree", "mv")
        .args(["-f", "-T"])
        .arg_path(pps)
        .arg_path(&previous_tree(pps))
}

pub fn extract_command(pp: &Path, dsc: &str, pps: &Path) -> SessionCommand {
    SessionCommand::builder("extract", "dpkg-source")
        .args(["-x", dsc])
        .arg_path(pps)
        .in_dir(pp)
}

/// Move every top-level entry of the previous tree into the new one.
pub fn merge_previous_command(pps: &Path) -> SessionCommand {
    SessionCommand::builder("merge previous tree", "find")
        .arg_path(&previous_tree(pps))
        .args(["-mindepth", "1", "-maxdepth", "1", "-exec", "mv", "{}"])
        .arg(format!("{}/", pps.display()))
        .arg(";")
}

pub fn remove_previous_command(pps: &Path) -> SessionCommand {
    SessionCommand::builder("remove previous tree", "rmdir").arg_path(&previous_tree(pps))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnpackOutcome {
    pub dsc: String,
    pub merged_previous: bool,
}

pub fn run_unpack<B: SessionBackend + ?Sized>(
    backend: &B,
    session: &Session,
    request: &FetchRequest,
    pp: &Path,
    pps: &Path,
) -> Result<UnpackOutcome> {
    backend.run_in(session, &remove_isar_apt_command())?;

    let query = print_uris_command(&request.src_package);
    let listing = backend.run_in(session, &query)?;
    let dsc = parse_dsc_name(&listing).ok_or_else(|| FetchError::CommandExecution {
        step: query.step.to_string(),
        command: query.to_string(),
        status: "no .dsc file listed".to_string(),
        stderr: String::new(),
    })?;
    debug!(session = %session.id, dsc = %dsc, "resolved source descriptor");

    backend.run_in(session, &copy_downloads_command(request, pp))?;

    let had_previous = backend.probe_in(session, &tree_exists_command(pps))?;
    if had_previous {
        backend.run_in(session, &stash_previous_command(pps))?;
    }

    backend.run_in(session, &extract_command(pp, &dsc, pps))?;

    if had_previous {
        backend.run_in(session, &merge_previous_command(pps))?;
        backend.run_in(session, &remove_previous_command(pps))?;
    }

    info!(session = %session.id, dsc = %dsc, tree = %pps.display(), "unpacked source package");
    Ok(UnpackOutcome {
        dsc,
        merged_previous: had_previous,
    })
}

/// One entry of a printed download plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanStep {
    Lock { path: PathBuf },
    Unlock { path: PathBuf },
    Host { program: String, args: Vec<String> },
    Session(SessionCommand),
}

/// Everything [`crate::fetcher::AptSrc::download`] would do, in order.
pub fn download_plan(config: &FetchConfig, request: &FetchRequest) -> Vec<PlanStep> {
    let isar_lock = config.isar_lock_path();
    let mut plan = vec![PlanStep::Lock {
        path: isar_lock.clone(),
    }];

    if config.prefetch_base_apt {
        let debrepo = debrepo_command(config, request);
        plan.push(PlanStep::Host {
            program: debrepo.program().to_string(),
            args: debrepo.arg_list(),
        });
        let repo_lock = config.repo_lock_path();
        plan.push(PlanStep::Lock {
            path: repo_lock.clone(),
        });
        plan.push(PlanStep::Session(crate::sync::refresh_command()));
        plan.push(PlanStep::Unlock { path: repo_lock });
    }

    plan.push(PlanStep::Session(remove_isar_apt_command()));
    plan.extend(download_commands(request).into_iter().map(PlanStep::Session));
    plan.push(PlanStep::Unlock { path: isar_lock });
    plan
}
