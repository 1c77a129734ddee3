use std::sync::Arc;

use anyhow::{Result, anyhow};
use futures::future::join_all;
use tracing::*;

use crate::{
    cfg::{Config, PollingConfig},
    collaborator::Collaborators,
    error::MonitorError,
    monitor::{ChainMonitor, MonitoredChain},
    provider::RpcProvider,
};

/// Runs one [ChainMonitor] per chain. The monitors run independently and share the collaborators.
pub struct MonitorSupervisor {
    monitors: Vec<ChainMonitor>,
}

impl MonitorSupervisor {
    pub fn new(
        polling: PollingConfig,
        chains: Vec<MonitoredChain>,
        collaborators: Collaborators,
    ) -> Self {
        let monitors = chains
            .into_iter()
            .map(|chain| ChainMonitor::new(chain, polling.clone(), collaborators.clone()))
            .collect();
        MonitorSupervisor { monitors }
    }

    /// Connects to every configured chain. A chain none of whose endpoints can be used is skipped; it is only an error
    /// if no chain at all could be connected to.
    pub async fn connect(config: &Config, collaborators: Collaborators) -> Result<Self> {
        let connections = join_all(config.chains.iter().map(|chain| async move {
            let urls = chain.rpc_urls()?;
            let (identity, provider) =
                RpcProvider::connect(&chain.name, chain.chain_id, &urls).await?;
            Ok::<_, anyhow::Error>(MonitoredChain {
                chain: identity,
                provider: Arc::new(provider),
                start_block: chain.start_block,
            })
        }))
        .await;

        let mut chains = Vec::with_capacity(connections.len());
        for (chain_config, connection) in config.chains.iter().zip(connections) {
            match connection {
                Ok(chain) => chains.push(chain),
                Err(e) => error!(chain = %chain_config.name, "Not monitoring chain: {e:#}"),
            }
        }
        if chains.is_empty() {
            return Err(anyhow!("could not connect to any of the configured chains"));
        }
        Ok(MonitorSupervisor::new(
            config.polling.clone(),
            chains,
            collaborators,
        ))
    }

    /// Starts every monitor concurrently. A monitor that fails to start is reported in the result but does not hold
    /// back the others.
    pub async fn start(&mut self) -> Vec<MonitorError> {
        let results = join_all(self.monitors.iter_mut().map(|monitor| monitor.start())).await;
        let mut errors = Vec::new();
        for (monitor, result) in self.monitors.iter().zip(results) {
            if let Err(e) = result {
                error!(chain = %monitor.chain(), "Failed to start monitor: {e}");
                errors.push(e);
            }
        }
        errors
    }

    pub fn stop(&mut self) {
        for monitor in &mut self.monitors {
            monitor.stop();
        }
    }

    pub async fn join(&mut self) {
        join_all(self.monitors.iter_mut().map(|monitor| monitor.join())).await;
    }

    pub fn monitors(&self) -> &[ChainMonitor] {
        &self.monitors
    }
}
