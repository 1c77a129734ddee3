use std::{collections::BTreeMap, sync::Arc};

use alloy::primitives::{Address, Bytes};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::metadata::MetadataPointer;

/// A contract's metadata JSON and the source files it lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractArtifact {
    /// The metadata JSON exactly as published, so its hash still matches the one in the bytecode.
    pub metadata: String,
    /// Source contents keyed by the path used in the metadata.
    pub sources: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionRequest {
    pub contract: ContractArtifact,
    pub bytecode: Bytes,
    pub chain_id: u64,
    pub addresses: Vec<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InjectionOutcome {
    #[serde(default = "status_default")]
    pub status: String,
}

fn status_default() -> String {
    String::from("accepted")
}

impl Default for InjectionOutcome {
    fn default() -> Self {
        InjectionOutcome {
            status: status_default(),
        }
    }
}

/// Turns a metadata pointer into the contract's metadata and sources.
///
/// Resolution may take arbitrarily long, or never finish; callers must not wait on it from the poll loop.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(&self, pointer: &MetadataPointer) -> Result<ContractArtifact>;
}

/// Matches a reconstructed contract against its on-chain bytecode and records the result.
#[async_trait]
pub trait Injector: Send + Sync {
    async fn inject(&self, request: InjectionRequest) -> Result<InjectionOutcome>;
}

/// The collaborators every chain monitor shares. Both must tolerate concurrent calls from all chains.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn SourceResolver>,
    pub injector: Arc<dyn Injector>,
}
