use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::*;
use url::Url;

use crate::{
    collaborator::{ContractArtifact, SourceResolver},
    metadata::MetadataPointer,
};

/// Resolves IPFS metadata pointers through an HTTP gateway. Swarm pointers are not supported.
pub struct IpfsGatewayResolver {
    client: Client,
    gateway: Url,
}

#[derive(Deserialize)]
struct Metadata {
    #[serde(default)]
    sources: BTreeMap<String, MetadataSource>,
}

#[derive(Deserialize)]
struct MetadataSource {
    /// Present when the contract was compiled with `useLiteralContent`.
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    urls: Vec<String>,
}

impl IpfsGatewayResolver {
    pub fn new(gateway: &str) -> Result<Self> {
        // Without a trailing slash, joining a CID would replace the last path segment.
        let gateway = if gateway.ends_with('/') {
            Url::parse(gateway)?
        } else {
            Url::parse(&format!("{gateway}/"))?
        };
        Ok(IpfsGatewayResolver {
            client: Client::builder().user_agent("contract-monitor").build()?,
            gateway,
        })
    }

    fn url(&self, cid: &str) -> Result<Url> {
        Ok(self.gateway.join(cid)?)
    }

    async fn fetch(&self, cid: &str) -> Result<String> {
        let response = self
            .client
            .get(self.url(cid)?)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

/// The CID of the first `dweb:/ipfs/<cid>` URL.
fn ipfs_source_cid(urls: &[String]) -> Option<&str> {
    urls.iter().find_map(|url| url.strip_prefix("dweb:/ipfs/"))
}

#[async_trait]
impl SourceResolver for IpfsGatewayResolver {
    async fn resolve(&self, pointer: &MetadataPointer) -> Result<ContractArtifact> {
        let cid = pointer.hash.ipfs_cid().ok_or_else(|| {
            anyhow!(
                "cannot resolve {}: only IPFS metadata is supported",
                pointer.hash
            )
        })?;
        let metadata = self
            .fetch(&cid)
            .await
            .with_context(|| format!("failed to fetch metadata {cid}"))?;
        let parsed: Metadata = serde_json::from_str(&metadata)
            .with_context(|| format!("metadata {cid} is not valid JSON"))?;

        let mut sources = BTreeMap::new();
        for (path, source) in parsed.sources {
            let content = match source.content {
                Some(content) => content,
                None => {
                    let source_cid = ipfs_source_cid(&source.urls)
                        .ok_or_else(|| anyhow!("source {path} has no IPFS URL"))?;
                    trace!(
                        address = %pointer.address,
                        path = %path,
                        source_cid,
                        "Fetching source"
                    );
                    self.fetch(source_cid)
                        .await
                        .with_context(|| format!("failed to fetch source {path}"))?
                }
            };
            sources.insert(path, content);
        }
        debug!(
            chain = %pointer.chain,
            address = %pointer.address,
            sources = sources.len(),
            "Resolved metadata {cid}"
        );

        Ok(ContractArtifact { metadata, sources })
    }
}
