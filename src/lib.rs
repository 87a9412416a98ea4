//! Fetch and unpack Debian source packages inside schroot build sessions.
//!
//! This crate is the `apt://` fetch method of an image build framework. Every
//! `download` or `unpack` call runs its commands inside a fresh schroot
//! session and tears that session down again on every exit path:
//!
//! - **Session manager** - writes the schroot config, begins and ends sessions
//! - **Repository sync** - optional base-apt index refresh under `repo.lock`
//! - **Command scripts** - typed `apt-get` / `dpkg-source` steps, no shell
//! - **Cleanup** - locks released, session ended, config removed, in that order
//!
//! # Architecture
//!
//! ```text
//! FetchRegistry ── select(url) ──► AptSrc<B: SessionBackend>
//!                                      │
//!     download / unpack ───────────────┤
//!                                      ▼
//!                          with_session(SessionGuard)
//!                           ├── RepoLock (isar.lock, download only)
//!                           ├── sync_if_enabled (repo.lock, refresh only)
//!                           └── script::run_download / run_unpack
//!                                      │
//!                                      ▼
//!                          Schroot ── schroot -r -c <session> -- argv
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use aptsrc_fetcher::{EnvVars, FetchConfig, FetchMethod, FetchRegistry, FetchUrl};
//!
//! let config = FetchConfig::resolve(&EnvVars)?;
//! let url = FetchUrl::parse("apt://hello")?;
//! let registry = FetchRegistry::with_defaults();
//! let method = registry.select(&url)?;
//! let request = method.init(&url, &config)?;
//! method.download(&request, &config)?;
//! ```

pub mod backend;
pub mod command;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod lock;
pub mod preflight;
pub mod process;
pub mod registry;
pub mod request;
pub mod script;
pub mod session;
pub mod sync;
pub mod url;

pub use backend::{Schroot, Session, SessionBackend, SessionEnvironment};
pub use command::{RunAs, SessionCommand};
pub use config::{EnvVars, FetchConfig, Layered, TomlVars, VarSource};
pub use error::{FetchError, Result};
pub use fetcher::{AptSrc, FetchMethod};
pub use registry::FetchRegistry;
pub use request::FetchRequest;
pub use url::FetchUrl;
