use std::sync::Arc;

use tokio::{sync::watch, task::JoinHandle};
use tracing::*;

use crate::{
    cfg::PollingConfig,
    chain::{CandidateContract, ChainIdentity},
    collaborator::{Collaborators, InjectionRequest},
    error::MonitorError,
    metadata::{self, MetadataPointer},
    poller::BlockPoller,
    provider::ChainProvider,
    retriever::BytecodeRetriever,
};

/// A chain to monitor, bound to the provider it is read through.
#[derive(Clone)]
pub struct MonitoredChain {
    pub chain: ChainIdentity,
    pub provider: Arc<dyn ChainProvider>,
    /// Height to start from instead of the chain head.
    pub start_block: Option<u64>,
}

enum Lifecycle {
    Idle,
    Running(JoinHandle<()>),
    /// The poll task, if the monitor was ever started and has not been joined yet.
    Stopped(Option<JoinHandle<()>>),
}

/// Watches a single chain for contract deployments and hands each deployment's metadata to the collaborators.
///
/// A monitor is started at most once. After [ChainMonitor::stop] it cannot be restarted; build a new one instead.
pub struct ChainMonitor {
    chain: ChainIdentity,
    provider: Arc<dyn ChainProvider>,
    polling: PollingConfig,
    start_block: Option<u64>,
    collaborators: Collaborators,
    running: watch::Sender<bool>,
    lifecycle: Lifecycle,
}

impl ChainMonitor {
    pub fn new(
        chain: MonitoredChain,
        polling: PollingConfig,
        collaborators: Collaborators,
    ) -> Self {
        let (running, _) = watch::channel(false);
        ChainMonitor {
            chain: chain.chain,
            provider: chain.provider,
            polling,
            start_block: chain.start_block,
            collaborators,
            running,
            lifecycle: Lifecycle::Idle,
        }
    }

    pub fn chain(&self) -> &ChainIdentity {
        &self.chain
    }

    pub fn is_running(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Running(_))
    }

    /// Resolves the starting height and spawns the poll task. Returns the height polling starts at.
    ///
    /// If the starting height cannot be determined the monitor stays idle and `start` may be retried.
    pub async fn start(&mut self) -> Result<u64, MonitorError> {
        match self.lifecycle {
            Lifecycle::Idle => {}
            Lifecycle::Running(_) => {
                return Err(MonitorError::AlreadyRunning(self.chain.to_string()));
            }
            Lifecycle::Stopped(_) => return Err(MonitorError::Stopped(self.chain.to_string())),
        }

        let height = match self.start_block {
            Some(height) => height,
            None => self
                .provider
                .current_height()
                .await
                .map_err(|source| MonitorError::StartHeight {
                    chain: self.chain.to_string(),
                    source,
                })?,
        };
        info!(
            chain = %self.chain,
            endpoint = self.chain.endpoint(),
            height,
            configured = self.start_block.is_some(),
            "startup"
        );

        self.running.send_replace(true);
        let poller = BlockPoller::new(
            self.chain.clone(),
            self.provider.clone(),
            height,
            &self.polling,
            self.running.subscribe(),
        );
        let pipeline = ContractPipeline {
            chain: self.chain.clone(),
            retriever: BytecodeRetriever::new(
                self.chain.clone(),
                self.provider.clone(),
                self.polling.bytecode_retry_pause,
                self.running.subscribe(),
            ),
            collaborators: self.collaborators.clone(),
        };
        let handle = tokio::spawn(poller.run(move |candidate| {
            tokio::spawn(pipeline.clone().process(candidate));
        }));
        self.lifecycle = Lifecycle::Running(handle);
        Ok(height)
    }

    /// Stops scheduling new work. Fetches and collaborator calls already in flight are left to finish. Calling this
    /// more than once, or on a monitor that was never started, is harmless.
    pub fn stop(&mut self) {
        self.running.send_replace(false);
        self.lifecycle = match std::mem::replace(&mut self.lifecycle, Lifecycle::Stopped(None)) {
            Lifecycle::Idle => Lifecycle::Stopped(None),
            Lifecycle::Running(handle) => {
                info!(chain = %self.chain, "Stopping monitor");
                Lifecycle::Stopped(Some(handle))
            }
            stopped @ Lifecycle::Stopped(_) => stopped,
        };
    }

    /// Waits for the poll task of a stopped monitor to exit. Returns immediately unless the monitor has been stopped.
    pub async fn join(&mut self) {
        let Lifecycle::Stopped(handle) = &mut self.lifecycle else {
            return;
        };
        if let Some(handle) = handle.take() {
            if let Err(e) = handle.await {
                error!(chain = %self.chain, "Poll task failed: {e}");
            }
        }
    }
}

/// The work done for every candidate: retrieve its code, find the metadata pointer, resolve the sources and inject
/// them. Each candidate runs in its own task.
#[derive(Clone)]
struct ContractPipeline {
    chain: ChainIdentity,
    retriever: BytecodeRetriever,
    collaborators: Collaborators,
}

impl ContractPipeline {
    async fn process(self, mut candidate: CandidateContract) {
        let Some(bytecode) = self.retriever.fetch(&mut candidate).await else {
            return;
        };

        let metadata = match metadata::extract(&bytecode) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(
                    chain = %self.chain,
                    address = %candidate.address,
                    tx_hash = %candidate.tx_hash,
                    "metadata-decode-failed: {e}"
                );
                return;
            }
        };
        let pointer = MetadataPointer::new(metadata, candidate.address, self.chain.clone());
        debug!(
            chain = %self.chain,
            address = %candidate.address,
            hash = %pointer.hash,
            compiler = pointer.compiler.as_deref().unwrap_or("unknown"),
            "Found metadata"
        );

        let contract = match self.collaborators.resolver.resolve(&pointer).await {
            Ok(contract) => contract,
            Err(e) => {
                error!(
                    chain = %self.chain,
                    address = %candidate.address,
                    hash = %pointer.hash,
                    "source-resolution-failed: {e:#}"
                );
                return;
            }
        };

        let request = InjectionRequest {
            contract,
            bytecode,
            chain_id: self.chain.chain_id(),
            addresses: vec![candidate.address],
        };
        match self.collaborators.injector.inject(request).await {
            Ok(outcome) => {
                info!(
                    chain = %self.chain,
                    address = %candidate.address,
                    status = %outcome.status,
                    "injected"
                );
            }
            Err(e) => {
                error!(
                    chain = %self.chain,
                    address = %candidate.address,
                    "injection-failed: {e:#}"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use alloy::primitives::{Bytes, address};
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::{ChainMonitor, MonitoredChain};
    use crate::{
        cfg::PollingConfig,
        chain::ChainIdentity,
        collaborator::{Collaborators, InjectionRequest},
        error::MonitorError,
        metadata::MetadataPointer,
        test_util::{
            CodeResponse, FakeInjector, FakeProvider, FakeResolver, block, creation, test_bytecode,
        },
    };

    struct Harness {
        monitor: ChainMonitor,
        resolved: UnboundedReceiver<MetadataPointer>,
        injected: UnboundedReceiver<InjectionRequest>,
    }

    fn harness(
        provider: Arc<FakeProvider>,
        start_block: Option<u64>,
        (resolver, resolved): (FakeResolver, UnboundedReceiver<MetadataPointer>),
    ) -> Harness {
        let (injector, injected) = FakeInjector::new();
        let chain = MonitoredChain {
            chain: ChainIdentity::new("test", 1, "http://localhost:8545"),
            provider,
            start_block,
        };
        let collaborators = Collaborators {
            resolver: Arc::new(resolver),
            injector: Arc::new(injector),
        };
        Harness {
            monitor: ChainMonitor::new(chain, PollingConfig::default(), collaborators),
            resolved,
            injected,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle() {
        let provider = Arc::new(FakeProvider::new(5));
        let mut harness = harness(provider, None, FakeResolver::new());
        let monitor = &mut harness.monitor;
        assert!(!monitor.is_running());

        assert_eq!(monitor.start().await.unwrap(), 5);
        assert!(monitor.is_running());
        assert!(matches!(
            monitor.start().await,
            Err(MonitorError::AlreadyRunning(_))
        ));

        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());
        assert!(matches!(monitor.start().await, Err(MonitorError::Stopped(_))));
        monitor.join().await;
        monitor.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_start() {
        let provider = Arc::new(FakeProvider::new(5));
        let mut harness = harness(provider.clone(), None, FakeResolver::new());

        harness.monitor.stop();
        harness.monitor.join().await;

        assert!(matches!(
            harness.monitor.start().await,
            Err(MonitorError::Stopped(_))
        ));
        assert!(provider.block_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn start_height_failure_stays_idle() {
        let provider = Arc::new(FakeProvider::new(5));
        provider.fail_current_height();
        let mut harness = harness(provider.clone(), None, FakeResolver::new());

        for _ in 0..2 {
            assert!(matches!(
                harness.monitor.start().await,
                Err(MonitorError::StartHeight { .. })
            ));
            assert!(!harness.monitor.is_running());
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(provider.block_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn configured_start_block() {
        let provider = Arc::new(FakeProvider::new(100));
        provider.fail_current_height();
        let mut harness = harness(provider.clone(), Some(42), FakeResolver::new());

        assert_eq!(harness.monitor.start().await.unwrap(), 42);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(provider.block_requests().first(), Some(&42));

        harness.monitor.stop();
        harness.monitor.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_metadata_is_skipped() {
        let deployer = address!("6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0");
        let contract = address!("cd234a471b72ba2f1ccf0a70fcaba648a5eecd8d");
        let provider = Arc::new(FakeProvider::new(0));
        provider.add_block(block(1, vec![creation(deployer, 0)]));
        provider.script_code(
            contract,
            [CodeResponse::Code(Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]))],
        );
        let mut harness = harness(provider.clone(), Some(1), FakeResolver::new());

        harness.monitor.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        harness.monitor.stop();
        harness.monitor.join().await;

        // Retrieval succeeded, so the code was only requested once.
        assert_eq!(provider.code_requests(contract), 1);
        assert!(harness.resolved.try_recv().is_err());
        assert!(harness.injected.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn resolution_failure_skips_injection() {
        let deployer = address!("6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0");
        let contract = address!("cd234a471b72ba2f1ccf0a70fcaba648a5eecd8d");
        let provider = Arc::new(FakeProvider::new(0));
        provider.add_block(block(1, vec![creation(deployer, 0)]));
        provider.script_code(
            contract,
            [CodeResponse::Code(test_bytecode())],
        );
        let mut harness = harness(provider, Some(1), FakeResolver::failing());

        harness.monitor.start().await.unwrap();
        let pointer = harness.resolved.recv().await.unwrap();
        assert_eq!(pointer.address, contract);
        assert_eq!(pointer.compiler.as_deref(), Some("0.8.17"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        harness.monitor.stop();
        harness.monitor.join().await;
        assert!(harness.injected.try_recv().is_err());
    }
}
