use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use aptsrc_fetcher::preflight::check_host_tools;
use aptsrc_fetcher::{
    AptSrc, EnvVars, FetchConfig, FetchMethod, FetchRegistry, FetchRequest, FetchUrl, Layered,
    TomlVars, VarSource,
};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "APTSRC_LOG";

fn usage() -> &'static str {
    "Usage:\n  aptsrc-fetch [--config <vars.toml>] download <apt://package>\n  aptsrc-fetch [--config <vars.toml>] unpack <apt://package> <rootdir>\n  aptsrc-fetch [--config <vars.toml>] clean <apt://package>\n  aptsrc-fetch [--config <vars.toml>] plan <apt://package>\n\nVariables are read from the config file first, then the environment."
}

fn main() -> Result<()> {
    init_logging();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = take_option(&mut args, "--config")?;

    let file_vars = match &config_path {
        Some(path) => TomlVars::load(path)?,
        None => TomlVars::default(),
    };
    let vars = Layered::new(vec![&file_vars as &dyn VarSource, &EnvVars]);

    match args.as_slice() {
        [cmd, url] if cmd == "download" => download(url, &vars),
        [cmd, url, rootdir] if cmd == "unpack" => unpack(url, Path::new(rootdir), &vars),
        [cmd, url] if cmd == "clean" => clean(url, &vars),
        [cmd, url] if cmd == "plan" => plan(url, &vars),
        _ => bail!(usage()),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn take_option(args: &mut Vec<String>, flag: &str) -> Result<Option<PathBuf>> {
    let Some(pos) = args.iter().position(|a| a == flag) else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        bail!("{} requires a value\n\n{}", flag, usage());
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Ok(Some(PathBuf::from(value)))
}

/// Parse the URL, resolve variables once and pick the fetch method.
fn prepare<'r>(
    registry: &'r FetchRegistry,
    raw_url: &str,
    vars: &dyn VarSource,
) -> Result<(&'r dyn FetchMethod, FetchRequest, FetchConfig)> {
    let url = FetchUrl::parse(raw_url)?;
    let config = FetchConfig::resolve(vars).context("resolving build variables")?;
    let method = registry.select(&url)?;
    let request = method.init(&url, &config)?;
    Ok((method, request, config))
}

fn download(raw_url: &str, vars: &dyn VarSource) -> Result<()> {
    check_host_tools()?;
    let registry = FetchRegistry::with_defaults();
    let (method, request, config) = prepare(&registry, raw_url, vars)?;
    method
        .download(&request, &config)
        .with_context(|| format!("downloading '{}'", raw_url))?;
    println!("{}", request.localpath.display());
    Ok(())
}

fn unpack(raw_url: &str, rootdir: &Path, vars: &dyn VarSource) -> Result<()> {
    check_host_tools()?;
    let registry = FetchRegistry::with_defaults();
    let (method, request, config) = prepare(&registry, raw_url, vars)?;
    method
        .unpack(&request, rootdir, &config)
        .with_context(|| format!("unpacking '{}' into '{}'", raw_url, rootdir.display()))
}

fn clean(raw_url: &str, vars: &dyn VarSource) -> Result<()> {
    let registry = FetchRegistry::with_defaults();
    let (method, request, config) = prepare(&registry, raw_url, vars)?;
    method
        .clean(&request, &config)
        .with_context(|| format!("cleaning '{}'", request.localpath.display()))
}

fn plan(raw_url: &str, vars: &dyn VarSource) -> Result<()> {
    let url = FetchUrl::parse(raw_url)?;
    let config = FetchConfig::resolve(vars).context("resolving build variables")?;
    let fetcher = AptSrc::new();
    let request = fetcher.init(&url, &config)?;
    let steps = fetcher.plan(&request, &config);
    let json = serde_json::json!({
        "request": request,
        "steps": steps,
    });
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
