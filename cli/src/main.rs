//! Command-line host for the DevTools debugging bridge.
//!
//! Starts the bridge and runs scripts of a small line-oriented language on
//! worker threads, so a DevTools front-end has live contexts to attach to.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

mod debug;

use cdp_bridge::codec::handshake::SESSION_PATH;
use cdp_bridge::{Backend, BridgeConfig, launch};
use clap::{Parser, ValueHint};
use color_eyre::eyre::{self, WrapErr, ensure, eyre};
use debug::Script;
use log::{LevelFilter, info};
use simple_logger::SimpleLogger;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Read when `--log-level` is not given.
const LOG_ENV: &str = "CDP_BRIDGE_LOG";

#[derive(Debug, Parser)]
#[command(author, version, about, name = "cdp-bridge")]
struct Opt {
    /// Script files to run under the debugger. A built-in sample runs when
    /// none is given.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    files: Vec<PathBuf>,

    /// TOML configuration file.
    #[arg(long, short = 'c', value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration.
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Port to listen on, overriding the configuration.
    #[arg(long, short = 'p')]
    port: Option<u16>,

    /// Run the scripts without a debugger.
    #[arg(long)]
    no_debug: bool,

    /// Number of worker threads; each one runs every script.
    #[arg(long, short = 'w', default_value_t = 1)]
    workers: usize,

    /// How many times each worker runs the scripts; 0 runs forever.
    #[arg(long, default_value_t = 0)]
    runs: u32,

    /// Log level, falling back to `$CDP_BRIDGE_LOG` and then `info`.
    #[arg(long)]
    log_level: Option<LevelFilter>,
}

impl Opt {
    fn log_level(&self) -> LevelFilter {
        self.log_level
            .or_else(|| std::env::var(LOG_ENV).ok()?.parse().ok())
            .unwrap_or(LevelFilter::Info)
    }

    fn bridge_config(&self) -> eyre::Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::load(path)
                .wrap_err_with(|| format!("cannot load {}", path.display()))?,
            None => BridgeConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.no_debug {
            config.backend = Backend::Disabled;
        }
        config.validate()?;
        Ok(config)
    }

    fn scripts(&self) -> eyre::Result<Arc<[Script]>> {
        if self.files.is_empty() {
            return Ok(Arc::from([Script::parse("counter.script", debug::SAMPLE)?]));
        }
        self.files
            .iter()
            .map(|path| {
                let source = std::fs::read_to_string(path)
                    .wrap_err_with(|| format!("cannot read {}", path.display()))?;
                Script::parse(path.display().to_string(), source)
            })
            .collect()
    }
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let opt = Opt::parse();
    SimpleLogger::new()
        .with_level(opt.log_level())
        .init()
        .map_err(|e| eyre!("cannot install the logger: {e}"))?;
    ensure!(opt.workers > 0, "at least one worker is needed");

    let config = opt.bridge_config()?;
    let scripts = opt.scripts()?;
    let launched = launch(&config)?;
    if let Some(server) = &launched.server {
        info!(
            "waiting for a DevTools client on ws://{}{SESSION_PATH}",
            server.local_addr()
        );
    }

    debug::run_workers(&launched.debugger, &scripts, opt.workers, opt.runs)?;

    if let Some(server) = launched.server {
        server.shutdown();
    }
    Ok(())
}
