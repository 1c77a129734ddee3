use std::{collections::BTreeSet, sync::Arc, time::Duration};

use alloy::primitives::address;
use contract_monitor::{
    cfg::PollingConfig,
    monitor::ChainMonitor,
    test_util::{
        CodeResponse, FakeProvider, TEST_METADATA_CID, block, call, creation, test_bytecode,
    },
};
use tokio::time::Instant;

use crate::{DEPLOYER, Network, chain};

#[tokio::test(start_paused = true)]
async fn contract_is_injected_once_code_appears() {
    let contract = address!("343c43a37d37dff08ae8c4a11544c718abb4fcf8");
    let provider = Arc::new(FakeProvider::new(100));
    provider.add_block(block(
        100,
        vec![
            call(DEPLOYER, address!("0000000000000000000000000000000000000001"), 0),
            creation(DEPLOYER, 1),
        ],
    ));
    provider.script_code(
        contract,
        [
            CodeResponse::Empty,
            CodeResponse::Empty,
            CodeResponse::Code(test_bytecode()),
        ],
    );
    let mut network = Network::new();
    let polling = PollingConfig::default();
    let retry_pause = polling.bytecode_retry_pause;
    let mut monitor = ChainMonitor::new(
        chain("mainnet", 1, provider.clone(), Some(100)),
        polling,
        network.collaborators.clone(),
    );
    let start = Instant::now();

    assert_eq!(monitor.start().await.unwrap(), 100);

    let pointer = network.resolved.recv().await.unwrap();
    assert_eq!(pointer.address, contract);
    assert_eq!(pointer.chain.chain_id(), 1);
    assert_eq!(pointer.hash.ipfs_cid().as_deref(), Some(TEST_METADATA_CID));
    // Two empty answers, each followed by a pause, before the code is found.
    assert!(start.elapsed() >= retry_pause * 2);

    let request = network.injected.recv().await.unwrap();
    assert_eq!(request.addresses, [contract]);
    assert_eq!(request.chain_id, 1);
    assert_eq!(request.bytecode, test_bytecode());
    assert!(request.contract.sources.contains_key("contracts/Storage.sol"));

    tokio::time::sleep(Duration::from_secs(600)).await;
    monitor.stop();
    monitor.join().await;

    assert_eq!(provider.code_requests(contract), 3);
    assert!(network.resolved.try_recv().is_err());
    assert!(network.injected.try_recv().is_err());
    let requests = provider.block_requests();
    assert_eq!(requests[0], 100);
    assert!(requests[1..].iter().all(|&h| h == 101));
}

#[tokio::test(start_paused = true)]
async fn every_creation_in_a_block_is_processed() {
    let provider = Arc::new(FakeProvider::new(0));
    provider.add_block(block(
        7,
        (0..4).map(|nonce| creation(DEPLOYER, nonce)).collect(),
    ));
    let addresses: BTreeSet<_> = (0..4).map(|nonce| DEPLOYER.create(nonce)).collect();
    for &address in &addresses {
        provider.script_code(address, [CodeResponse::Code(test_bytecode())]);
    }
    let mut network = Network::new();
    let mut monitor = ChainMonitor::new(
        chain("mainnet", 1, provider, Some(7)),
        PollingConfig::default(),
        network.collaborators.clone(),
    );

    monitor.start().await.unwrap();
    let mut injected = BTreeSet::new();
    for _ in 0..4 {
        let request = network.injected.recv().await.unwrap();
        injected.extend(request.addresses);
    }
    monitor.stop();
    monitor.join().await;

    assert_eq!(injected, addresses);
}

#[tokio::test(start_paused = true)]
async fn stop_abandons_pending_retries() {
    let contract = address!("cd234a471b72ba2f1ccf0a70fcaba648a5eecd8d");
    let provider = Arc::new(FakeProvider::new(0));
    provider.add_block(block(1, vec![creation(DEPLOYER, 0)]));
    let mut network = Network::new();
    let mut monitor = ChainMonitor::new(
        chain("mainnet", 1, provider.clone(), Some(1)),
        PollingConfig::default(),
        network.collaborators.clone(),
    );

    monitor.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(provider.code_requests(contract), 1);
    monitor.stop();
    monitor.join().await;

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(provider.code_requests(contract), 1);
    assert!(network.resolved.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn resolver_failure_is_not_injected() {
    let contract = address!("cd234a471b72ba2f1ccf0a70fcaba648a5eecd8d");
    let provider = Arc::new(FakeProvider::new(0));
    provider.add_block(block(1, vec![creation(DEPLOYER, 0)]));
    provider.script_code(contract, [CodeResponse::Code(test_bytecode())]);
    let mut network = Network::with_failing_resolver();
    let mut monitor = ChainMonitor::new(
        chain("mainnet", 1, provider, Some(1)),
        PollingConfig::default(),
        network.collaborators.clone(),
    );

    monitor.start().await.unwrap();
    assert_eq!(network.resolved.recv().await.unwrap().address, contract);
    tokio::time::sleep(Duration::from_secs(60)).await;
    monitor.stop();
    monitor.join().await;

    assert!(network.injected.try_recv().is_err());
}
