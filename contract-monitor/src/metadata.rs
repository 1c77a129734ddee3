//! Extraction of the metadata pointer the Solidity compiler appends to deployed bytecode.
//!
//! The bytecode ends with a CBOR-encoded map followed by the map's length as a big-endian `u16`:
//!
//! ```text
//! <runtime code> <cbor map> <length: 2 bytes>
//! ```
//!
//! The map holds the hash of the contract's metadata JSON under `ipfs` (a sha2-256 multihash) or, for older
//! compilers, `bzzr0`/`bzzr1` (a Swarm hash), plus the compiler version under `solc`.

use std::fmt;

use alloy::primitives::{Address, B256};
use serde::{
    Deserialize, Deserializer,
    de::{self, Visitor},
};
use serde_bytes::ByteBuf;

use crate::{chain::ChainIdentity, error::MetadataError};

/// Length of a sha2-256 multihash: the 0x12 0x20 prefix and the 32-byte digest.
const IPFS_HASH_LENGTH: usize = 34;
const SWARM_HASH_LENGTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwarmVersion {
    Bzzr0,
    Bzzr1,
}

/// A content-addressed reference to a contract's metadata JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentHash {
    /// The raw multihash; its base58 encoding is a CIDv0.
    Ipfs(Vec<u8>),
    Swarm { version: SwarmVersion, hash: B256 },
}

impl ContentHash {
    /// The CIDv0 of an IPFS hash, e.g. `QmVCVT31FTPAeqeSqs3UnL8JVojFTfe4PvNe489gtCu5VL`.
    pub fn ipfs_cid(&self) -> Option<String> {
        match self {
            ContentHash::Ipfs(multihash) => Some(bs58::encode(multihash).into_string()),
            ContentHash::Swarm { .. } => None,
        }
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentHash::Ipfs(multihash) => {
                write!(f, "ipfs://{}", bs58::encode(multihash).into_string())
            }
            ContentHash::Swarm { hash, .. } => write!(f, "bzz-raw://{}", hex::encode(hash)),
        }
    }
}

/// What the trailing metadata of a bytecode says about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMetadata {
    pub hash: ContentHash,
    /// Compiler version, e.g. `0.8.17`. Absent for compilers that predate the `solc` key.
    pub compiler: Option<String>,
}

/// A metadata hash together with the deployment it was found in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataPointer {
    pub hash: ContentHash,
    pub compiler: Option<String>,
    pub address: Address,
    pub chain: ChainIdentity,
}

impl MetadataPointer {
    pub fn new(metadata: ExtractedMetadata, address: Address, chain: ChainIdentity) -> Self {
        MetadataPointer {
            hash: metadata.hash,
            compiler: metadata.compiler,
            address,
            chain,
        }
    }
}

#[derive(Deserialize)]
struct RawMetadata {
    #[serde(default)]
    ipfs: Option<ByteBuf>,
    #[serde(default)]
    bzzr0: Option<ByteBuf>,
    #[serde(default)]
    bzzr1: Option<ByteBuf>,
    #[serde(default)]
    solc: Option<CompilerVersion>,
}

/// Release builds encode the version as three bytes; pre-release builds as a full version string.
struct CompilerVersion(String);

impl<'de> Deserialize<'de> for CompilerVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CompilerVersionVisitor;

        impl Visitor<'_> for CompilerVersionVisitor {
            type Value = CompilerVersion;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a 3-byte version or a version string")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                match v {
                    [major, minor, patch] => {
                        Ok(CompilerVersion(format!("{major}.{minor}.{patch}")))
                    }
                    _ => Err(E::invalid_length(v.len(), &self)),
                }
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(CompilerVersion(v.to_owned()))
            }
        }

        deserializer.deserialize_any(CompilerVersionVisitor)
    }
}

pub fn extract(bytecode: &[u8]) -> Result<ExtractedMetadata, MetadataError> {
    let Some(split) = bytecode.len().checked_sub(2) else {
        return Err(MetadataError::TooShort(bytecode.len()));
    };
    let (body, length) = bytecode.split_at(split);
    let length = u16::from_be_bytes([length[0], length[1]]) as usize;
    if length == 0 || length > body.len() {
        return Err(MetadataError::LengthOutOfBounds {
            length,
            available: body.len(),
        });
    }
    let cbor = &body[body.len() - length..];

    let raw: RawMetadata = cbor4ii::serde::from_slice(cbor)
        .map_err(|e| MetadataError::Decode(format!("{e:?}")))?;

    let hash = if let Some(ipfs) = raw.ipfs {
        if ipfs.len() != IPFS_HASH_LENGTH {
            return Err(MetadataError::HashLength {
                key: "ipfs",
                length: ipfs.len(),
            });
        }
        ContentHash::Ipfs(ipfs.into_vec())
    } else if let Some((key, version, hash)) = raw
        .bzzr1
        .map(|h| ("bzzr1", SwarmVersion::Bzzr1, h))
        .or_else(|| raw.bzzr0.map(|h| ("bzzr0", SwarmVersion::Bzzr0, h)))
    {
        if hash.len() != SWARM_HASH_LENGTH {
            return Err(MetadataError::HashLength {
                key,
                length: hash.len(),
            });
        }
        ContentHash::Swarm {
            version,
            hash: B256::from_slice(&hash),
        }
    } else {
        return Err(MetadataError::NoContentHash);
    };

    Ok(ExtractedMetadata {
        hash,
        compiler: raw.solc.map(|v| v.0),
    })
}
