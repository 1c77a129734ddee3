use std::{sync::Arc, time::Duration};

use alloy::primitives::Bytes;
use tokio::sync::watch;
use tracing::*;

use crate::{
    chain::{CandidateContract, ChainIdentity},
    provider::ChainProvider,
    time::sleep_while_running,
};

/// Fetches the code of freshly created contracts, tolerating nodes that have not caught up with the block the
/// contract was created in yet.
#[derive(Clone)]
pub struct BytecodeRetriever {
    chain: ChainIdentity,
    provider: Arc<dyn ChainProvider>,
    retry_pause: Duration,
    running: watch::Receiver<bool>,
}

impl BytecodeRetriever {
    pub fn new(
        chain: ChainIdentity,
        provider: Arc<dyn ChainProvider>,
        retry_pause: Duration,
        running: watch::Receiver<bool>,
    ) -> Self {
        BytecodeRetriever {
            chain,
            provider,
            retry_pause,
            running,
        }
    }

    /// Returns the candidate's code, making at most `candidate.retries_remaining` attempts `retry_pause` apart.
    ///
    /// Empty code and failed requests both use up an attempt. `None` means the attempts ran out or the monitor
    /// stopped in between; either way the candidate is abandoned.
    pub async fn fetch(&self, candidate: &mut CandidateContract) -> Option<Bytes> {
        let mut running = self.running.clone();
        while candidate.retries_remaining > 0 {
            candidate.retries_remaining -= 1;
            match self.provider.code(candidate.address).await {
                Ok(code) if !code.is_empty() => return Some(code),
                Ok(_) => {
                    debug!(
                        chain = %self.chain,
                        address = %candidate.address,
                        retries_remaining = candidate.retries_remaining,
                        "bytecode-empty"
                    );
                }
                Err(e) => {
                    error!(
                        chain = %self.chain,
                        address = %candidate.address,
                        retries_remaining = candidate.retries_remaining,
                        "bytecode-failed: {e}"
                    );
                }
            }
            if candidate.retries_remaining == 0
                || !sleep_while_running(&mut running, self.retry_pause).await
            {
                break;
            }
        }
        debug!(
            chain = %self.chain,
            address = %candidate.address,
            "Abandoning contract created in block {}",
            candidate.block
        );
        None
    }
}
