//! Concord node
//!
//! Runs one replica of the OR-set over TCP, driven either by a REPL on
//! stdin or by the automated load generator.

mod automated;
mod interactive;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;

use concord_runtime::{logging, FaultModel, LogFormat, NodeConfig, QuorumMode, Service};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Interactive,
    Automated,
}

#[derive(Parser, Debug)]
#[command(name = "concord-node", version, about = "Replicated OR-set node")]
struct Args {
    /// JSON configuration file; flags below override it
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// host:port to listen on
    #[arg(long)]
    listen: Option<String>,

    /// Comma-separated host:port list
    #[arg(long, value_delimiter = ',')]
    neighbors: Option<Vec<String>>,

    /// crash or byzantine
    #[arg(long)]
    fault_model: Option<FaultModel>,

    /// Byzantine processes tolerated
    #[arg(short = 'f', long = "faults")]
    faults: Option<usize>,

    /// Use the (n + f + 2) / 2 echo quorum
    #[arg(long)]
    strict_quorum: bool,

    /// Hex Ed25519 seed
    #[arg(long)]
    seed: Option<String>,

    #[arg(long, value_enum, default_value = "interactive")]
    mode: Mode,

    /// text or json
    #[arg(long, default_value = "text")]
    log_format: LogFormat,

    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn node_config(&self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_file(path)?,
            None => NodeConfig::default(),
        };

        if let Some(listen) = &self.listen {
            config.listen = Some(listen.clone());
        }
        if let Some(neighbors) = &self.neighbors {
            config.neighbors = Some(neighbors.clone());
        }
        if let Some(fault_model) = self.fault_model {
            config.fault_model = fault_model;
        }
        if let Some(f) = self.faults {
            config.f = f;
        }
        if self.strict_quorum {
            config.echo_quorum = QuorumMode::Strict;
        }
        if let Some(seed) = &self.seed {
            config.identity_seed = Some(seed.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    logging::init_with_level(args.log_format, level);

    let settings = args
        .node_config()?
        .resolve()
        .context("invalid node configuration")?;
    info!(
        local = %settings.local,
        neighbors = settings.neighbors.len(),
        fault_model = ?settings.fault_model,
        key = %settings.identity.fingerprint(),
        "concord-node v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let service = Service::start(&settings)
        .await
        .with_context(|| format!("cannot start node on {}", settings.local))?;
    let (handle, task) = service.spawn(256);

    match args.mode {
        Mode::Interactive => interactive::run(handle).await?,
        Mode::Automated => automated::run(handle, settings.local, &settings.app).await?,
    }

    let report = task.await.context("service task failed")?;
    info!(digest = %report.digest, elements = report.elements.len(), "node stopped");
    Ok(())
}
