//! fastpath control binary
//!
//! Loads the JSON config, builds and validates the module graph and the
//! routing tables, then logs the resulting layout. NIC queue polling and the
//! launch of forwarding threads belong to the NIC layer outside this crate,
//! which drives packets in through [`fastpath::Fastpath::input`].

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use fastpath::routing::InitError;
use fastpath::{Fastpath, FastpathConfig, StackError};
use fastpath_log::{LogConfig, LogLevel};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Stack configuration (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Mirror every log record into this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Minimum level printed on screen by the log history
    #[arg(long, default_value = "warning")]
    screen_level: LogLevel,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let sink = fastpath_log::init(&LogConfig {
        file: args.log_file.clone(),
        screen_level: args.screen_level,
        ..Default::default()
    })?;

    info!(config = %args.config.display(), "Starting fastpath");

    let config = FastpathConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let fp = match Fastpath::from_config(&config) {
        Ok(fp) => fp,
        Err(StackError::Init(e)) => fatal(e),
        Err(e) => return Err(e).context("building forwarding stack"),
    };

    for lcore in fp.topology().lcores() {
        info!(lcore = lcore.id, socket = lcore.socket, "Forwarding core");
    }
    for (prefix, nh) in fp.routes().routes() {
        info!(%prefix, %nh, "Route");
    }

    fp.shutdown();
    sink.set_file(None);
    Ok(())
}

/// Table allocation failed; the stack cannot run without its tables.
fn fatal(e: InitError) -> ! {
    error!(fatal = true, error = %e, "Table initialisation failed");
    std::process::exit(1);
}
