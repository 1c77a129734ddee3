use std::{fmt, sync::Arc};

use alloy::{
    consensus::Transaction as _,
    network::{AnyRpcBlock, TransactionResponse},
    primitives::{Address, B256},
};
use url::Url;

/// A monitored chain. Cloning is cheap; every task working on behalf of a chain carries one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainIdentity(Arc<ChainIdentityInner>);

#[derive(Debug, PartialEq, Eq)]
struct ChainIdentityInner {
    name: String,
    chain_id: u64,
    /// Scheme and host only; see [redact].
    endpoint: String,
}

impl ChainIdentity {
    pub fn new(name: impl Into<String>, chain_id: u64, endpoint: &str) -> Self {
        ChainIdentity(Arc::new(ChainIdentityInner {
            name: name.into(),
            chain_id,
            endpoint: redact(endpoint),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn chain_id(&self) -> u64 {
        self.0.chain_id
    }

    pub fn endpoint(&self) -> &str {
        &self.0.endpoint
    }
}

/// Endpoint URLs often carry API keys in their path or query, so only the scheme and host are kept.
pub fn redact(url: &str) -> String {
    match Url::parse(url) {
        Ok(url) => format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default()),
        Err(_) => String::from("<invalid url>"),
    }
}

impl fmt::Display for ChainIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0.name, self.0.chain_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub hash: B256,
    pub transactions: Vec<BlockTransaction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTransaction {
    pub hash: B256,
    pub from: Address,
    /// `None` for contract creations.
    pub to: Option<Address>,
    pub nonce: u64,
}

/// Converts a block of any network. Transaction types unknown to Ethereum, such as OP-stack deposits, are kept and
/// read through their generic fields.
impl From<AnyRpcBlock> for Block {
    fn from(block: AnyRpcBlock) -> Self {
        let transactions = block
            .transactions
            .txns()
            .map(|tx| BlockTransaction {
                hash: tx.tx_hash(),
                from: TransactionResponse::from(tx),
                to: tx.to(),
                nonce: tx.nonce(),
            })
            .collect();
        Block {
            number: block.header.number,
            hash: block.header.hash,
            transactions,
        }
    }
}

/// A contract created in a block, waiting for its code to be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateContract {
    pub address: Address,
    pub creator: Address,
    pub nonce: u64,
    pub tx_hash: B256,
    pub block: u64,
    pub retries_remaining: u32,
}

impl BlockTransaction {
    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }

    /// The address a CREATE from this transaction deploys to: `keccak256(rlp([from, nonce]))[12..]`.
    pub fn created_address(&self) -> Option<Address> {
        self.is_contract_creation()
            .then(|| self.from.create(self.nonce))
    }
}

/// Every contract created by `block`'s transactions, in transaction order.
pub fn contract_creations(block: &Block, retries: u32) -> Vec<CandidateContract> {
    block
        .transactions
        .iter()
        .filter_map(|tx| {
            tx.created_address().map(|address| CandidateContract {
                address,
                creator: tx.from,
                nonce: tx.nonce,
                tx_hash: tx.hash,
                block: block.number,
                retries_remaining: retries,
            })
        })
        .collect()
}
