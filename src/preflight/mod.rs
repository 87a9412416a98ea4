//! Preflight checks for fetch operations.
//!
//! Validates that the host has the tools a session needs before one is
//! started, so a missing schroot shows up as a clear message instead of a
//! failed session.
//!
//! # Example
//!
//! ```rust
//! use aptsrc_fetcher::preflight::{check_required_tools, command_exists};
//!
//! if !command_exists("schroot") {
//!     println!("schroot not installed");
//! }
//!
//! let tools = &[("schroot", "schroot")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};

/// Check if a command exists in `PATH`.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Host tools needed by download and unpack.
///
/// Each tuple is (command_name, package_name).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[("schroot", "schroot")];

/// Check that specific tools are available.
///
/// Returns an error listing every missing tool and the package providing it.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Check everything in [`REQUIRED_TOOLS`].
pub fn check_host_tools() -> Result<()> {
    check_required_tools(REQUIRED_TOOLS)
}
