use std::{path::PathBuf, sync::Arc};

use anyhow::{Result, anyhow};
use clap::Parser;
use contract_monitor::{
    cfg,
    collaborator::{Collaborators, Injector},
    injector::{DryRunInjector, HttpInjector},
    logging,
    resolver::IpfsGatewayResolver,
    supervisor::MonitorSupervisor,
};
use tracing::*;

#[derive(Parser, Debug)]
struct Args {
    #[clap(long, short, default_values = ["config.toml"])]
    config_file: Vec<PathBuf>,
    #[clap(long, default_value = "false")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init(args.log_json);
    logging::install_panic_hook();

    let config = cfg::read_config(&args.config_file)?;

    let injector: Arc<dyn Injector> = match &config.verifier_url {
        Some(url) => Arc::new(HttpInjector::new(url)?),
        None => {
            warn!("No verifier_url configured, contracts will only be logged");
            Arc::new(DryRunInjector)
        }
    };
    let collaborators = Collaborators {
        resolver: Arc::new(IpfsGatewayResolver::new(&config.ipfs_gateway)?),
        injector,
    };

    let mut supervisor = MonitorSupervisor::connect(&config, collaborators).await?;
    let errors = supervisor.start().await;
    if errors.len() == supervisor.monitors().len() {
        return Err(anyhow!("none of the {} monitors could be started", errors.len()));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    supervisor.stop();
    supervisor.join().await;

    Ok(())
}
