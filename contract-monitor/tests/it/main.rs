mod pipeline;
mod supervisor;

use std::sync::Arc;

use alloy::primitives::{Address, address};
use contract_monitor::{
    chain::ChainIdentity,
    collaborator::{Collaborators, InjectionRequest},
    metadata::MetadataPointer,
    monitor::MonitoredChain,
    test_util::{FakeInjector, FakeProvider, FakeResolver},
};
use tokio::sync::mpsc::UnboundedReceiver;

const DEPLOYER: Address = address!("6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0");

/// Shared collaborators with the receiving ends of everything they were asked to do.
struct Network {
    collaborators: Collaborators,
    resolved: UnboundedReceiver<MetadataPointer>,
    injected: UnboundedReceiver<InjectionRequest>,
}

impl Network {
    fn new() -> Self {
        Self::with_resolver(FakeResolver::new())
    }

    fn with_failing_resolver() -> Self {
        Self::with_resolver(FakeResolver::failing())
    }

    fn with_resolver(
        (resolver, resolved): (FakeResolver, UnboundedReceiver<MetadataPointer>),
    ) -> Self {
        let (injector, injected) = FakeInjector::new();
        Network {
            collaborators: Collaborators {
                resolver: Arc::new(resolver),
                injector: Arc::new(injector),
            },
            resolved,
            injected,
        }
    }
}

fn chain(
    name: &str,
    chain_id: u64,
    provider: Arc<FakeProvider>,
    start_block: Option<u64>,
) -> MonitoredChain {
    MonitoredChain {
        chain: ChainIdentity::new(name, chain_id, &format!("http://{name}.invalid")),
        provider,
        start_block,
    }
}
