//! In-memory fakes of a chain node and of the collaborators, for tests.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Mutex,
};

use alloy::primitives::{Address, B256, Bytes};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    chain::{Block, BlockTransaction},
    collaborator::{ContractArtifact, InjectionOutcome, InjectionRequest, Injector, SourceResolver},
    metadata::MetadataPointer,
    provider::ChainProvider,
};

/// Deployed code of a contract compiled with solc 0.8.17, with an IPFS metadata hash whose CIDv0 is
/// [TEST_METADATA_CID].
pub const TEST_BYTECODE: &str = "6080604052348015600f57600080fd5b50fea264697066735822122065eab11e2da42b7b064ba4722f3589fa1503a31faf42d1ed50e4bdae81bb726b64736f6c63430008110033";
pub const TEST_METADATA_CID: &str = "QmVCVT31FTPAeqeSqs3UnL8JVojFTfe4PvNe489gtCu5VL";

pub fn test_bytecode() -> Bytes {
    hex::decode(TEST_BYTECODE).unwrap().into()
}

/// A transaction deploying a contract from `from` with `nonce`.
pub fn creation(from: Address, nonce: u64) -> BlockTransaction {
    BlockTransaction {
        hash: B256::with_last_byte(nonce as u8),
        from,
        to: None,
        nonce,
    }
}

/// A plain call from `from` to `to`.
pub fn call(from: Address, to: Address, nonce: u64) -> BlockTransaction {
    BlockTransaction {
        hash: B256::with_last_byte(nonce as u8),
        from,
        to: Some(to),
        nonce,
    }
}

pub fn block(number: u64, transactions: Vec<BlockTransaction>) -> Block {
    Block {
        number,
        hash: B256::with_last_byte(number as u8),
        transactions,
    }
}

#[derive(Debug, Clone)]
pub enum CodeResponse {
    Empty,
    Code(Bytes),
    Error,
}

#[derive(Default)]
struct FakeChain {
    height: u64,
    height_failure: bool,
    blocks: BTreeMap<u64, Block>,
    block_failures: usize,
    block_requests: Vec<u64>,
    code: HashMap<Address, VecDeque<CodeResponse>>,
    code_requests: HashMap<Address, usize>,
}

/// A [ChainProvider] over a scripted chain. Blocks exist once added; code requests are answered from a per-address
/// script, and with empty code once the script runs out.
#[derive(Default)]
pub struct FakeProvider {
    chain: Mutex<FakeChain>,
}

impl FakeProvider {
    pub fn new(height: u64) -> Self {
        let provider = FakeProvider::default();
        provider.chain.lock().unwrap().height = height;
        provider
    }

    pub fn add_block(&self, block: Block) {
        let mut chain = self.chain.lock().unwrap();
        chain.height = chain.height.max(block.number);
        chain.blocks.insert(block.number, block);
    }

    pub fn fail_current_height(&self) {
        self.chain.lock().unwrap().height_failure = true;
    }

    /// Makes the next `count` block requests fail with a transport error.
    pub fn fail_block_requests(&self, count: usize) {
        self.chain.lock().unwrap().block_failures = count;
    }

    pub fn script_code(&self, address: Address, responses: impl IntoIterator<Item = CodeResponse>) {
        self.chain
            .lock()
            .unwrap()
            .code
            .insert(address, responses.into_iter().collect());
    }

    pub fn block_requests(&self) -> Vec<u64> {
        self.chain.lock().unwrap().block_requests.clone()
    }

    pub fn code_requests(&self, address: Address) -> usize {
        self.chain
            .lock()
            .unwrap()
            .code_requests
            .get(&address)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChainProvider for FakeProvider {
    async fn current_height(&self) -> Result<u64> {
        let chain = self.chain.lock().unwrap();
        if chain.height_failure {
            return Err(anyhow!("connection refused"));
        }
        Ok(chain.height)
    }

    async fn block(&self, height: u64) -> Result<Option<Block>> {
        let mut chain = self.chain.lock().unwrap();
        chain.block_requests.push(height);
        if chain.block_failures > 0 {
            chain.block_failures -= 1;
            return Err(anyhow!("request timed out"));
        }
        Ok(chain.blocks.get(&height).cloned())
    }

    async fn code(&self, address: Address) -> Result<Bytes> {
        let mut chain = self.chain.lock().unwrap();
        *chain.code_requests.entry(address).or_default() += 1;
        let response = chain
            .code
            .get_mut(&address)
            .and_then(|responses| responses.pop_front())
            .unwrap_or(CodeResponse::Empty);
        match response {
            CodeResponse::Empty => Ok(Bytes::new()),
            CodeResponse::Code(code) => Ok(code),
            CodeResponse::Error => Err(anyhow!("internal error")),
        }
    }
}

/// A [SourceResolver] that answers every pointer with the same artifact and reports each pointer it was asked about.
pub struct FakeResolver {
    artifact: Option<ContractArtifact>,
    pointers: mpsc::UnboundedSender<MetadataPointer>,
}

impl FakeResolver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MetadataPointer>) {
        let (pointers, receiver) = mpsc::unbounded_channel();
        let artifact = ContractArtifact {
            metadata: String::from(r#"{"language":"Solidity"}"#),
            sources: BTreeMap::from([(
                String::from("contracts/Storage.sol"),
                String::from("contract Storage {}"),
            )]),
        };
        (
            FakeResolver {
                artifact: Some(artifact),
                pointers,
            },
            receiver,
        )
    }

    /// A resolver that fails every resolution.
    pub fn failing() -> (Self, mpsc::UnboundedReceiver<MetadataPointer>) {
        let (mut resolver, receiver) = Self::new();
        resolver.artifact = None;
        (resolver, receiver)
    }
}

#[async_trait]
impl SourceResolver for FakeResolver {
    async fn resolve(&self, pointer: &MetadataPointer) -> Result<ContractArtifact> {
        let _ = self.pointers.send(pointer.clone());
        self.artifact
            .clone()
            .ok_or_else(|| anyhow!("metadata {} not found", pointer.hash))
    }
}

/// An [Injector] that accepts every request and reports it.
pub struct FakeInjector {
    requests: mpsc::UnboundedSender<InjectionRequest>,
}

impl FakeInjector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<InjectionRequest>) {
        let (requests, receiver) = mpsc::unbounded_channel();
        (FakeInjector { requests }, receiver)
    }
}

#[async_trait]
impl Injector for FakeInjector {
    async fn inject(&self, request: InjectionRequest) -> Result<InjectionOutcome> {
        let _ = self.requests.send(request);
        Ok(InjectionOutcome {
            status: String::from("perfect"),
        })
    }
}
