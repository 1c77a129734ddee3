use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use tracing::*;
use url::Url;

use crate::collaborator::{InjectionOutcome, InjectionRequest, Injector};

/// Submits reconstructed contracts to a verification service as JSON.
pub struct HttpInjector {
    client: Client,
    url: Url,
}

impl HttpInjector {
    pub fn new(url: &str) -> Result<Self> {
        Ok(HttpInjector {
            client: Client::builder().user_agent("contract-monitor").build()?,
            url: Url::parse(url)?,
        })
    }
}

/// The service may answer with `{"status": ...}`. Any other answer to a successful request counts as accepted.
fn parse_outcome(body: &str) -> InjectionOutcome {
    serde_json::from_str(body).unwrap_or_default()
}

#[async_trait]
impl Injector for HttpInjector {
    async fn inject(&self, request: InjectionRequest) -> Result<InjectionOutcome> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        Ok(parse_outcome(&body))
    }
}

/// Logs reconstructed contracts instead of submitting them.
pub struct DryRunInjector;

#[async_trait]
impl Injector for DryRunInjector {
    async fn inject(&self, request: InjectionRequest) -> Result<InjectionOutcome> {
        info!(
            chain_id = request.chain_id,
            addresses = ?request.addresses,
            sources = ?request.contract.sources.keys().collect::<Vec<_>>(),
            bytecode_len = request.bytecode.len(),
            "Not submitting contract, no verifier configured"
        );
        Ok(InjectionOutcome {
            status: String::from("dry-run"),
        })
    }
}
