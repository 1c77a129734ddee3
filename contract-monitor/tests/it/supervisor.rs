use std::{collections::BTreeMap, sync::Arc};

use contract_monitor::{
    cfg::PollingConfig,
    error::MonitorError,
    supervisor::MonitorSupervisor,
    test_util::{CodeResponse, FakeProvider, block, creation, test_bytecode},
};

use crate::{DEPLOYER, Network, chain};

fn chain_with_deployment(height: u64, nonce: u64) -> Arc<FakeProvider> {
    let provider = Arc::new(FakeProvider::new(height));
    provider.add_block(block(height, vec![creation(DEPLOYER, nonce)]));
    provider.script_code(
        DEPLOYER.create(nonce),
        [CodeResponse::Code(test_bytecode())],
    );
    provider
}

#[tokio::test(start_paused = true)]
async fn chains_are_monitored_independently() {
    let broken = Arc::new(FakeProvider::new(0));
    broken.fail_current_height();
    let mut network = Network::new();
    let mut supervisor = MonitorSupervisor::new(
        PollingConfig::default(),
        vec![
            chain("mainnet", 1, chain_with_deployment(50, 0), None),
            chain("broken", 5, broken, None),
            chain("polygon", 137, chain_with_deployment(900, 3), None),
        ],
        network.collaborators.clone(),
    );

    let errors = supervisor.start().await;
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], MonitorError::StartHeight { .. }));

    let mut injected = BTreeMap::new();
    for _ in 0..2 {
        let request = network.injected.recv().await.unwrap();
        injected.insert(request.chain_id, request.addresses);
    }
    supervisor.stop();
    supervisor.join().await;

    assert_eq!(
        injected,
        BTreeMap::from([
            (1, vec![DEPLOYER.create(0)]),
            (137, vec![DEPLOYER.create(3)]),
        ])
    );
    assert!(supervisor.monitors().iter().all(|m| !m.is_running()));
}
