use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use env_logger::{Env, Target};
use log::LevelFilter;
use std::fs::OpenOptions;

/// HTTP stack modules that flood debug output.
const NOISY_MODULES: [&str; 3] = ["hyper", "reqwest", "rustls"];

pub fn init(config: &LoggingConfig, verbose: bool, quiet: bool) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(&config.level));
    if quiet {
        builder.filter_level(LevelFilter::Warn);
    } else if verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    if !verbose {
        for module in NOISY_MODULES {
            builder.filter_module(module, LevelFilter::Warn);
        }
    }
    builder.target(target(config)?);
    builder.try_init().context("logger already initialized")
}

fn target(config: &LoggingConfig) -> Result<Target> {
    let Some(path) = &config.file else {
        return Ok(Target::Stderr);
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    Ok(Target::Pipe(Box::new(file)))
}
