use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::sync::watch;
use tracing::*;

use crate::{
    cfg::PollingConfig,
    chain::{Block, CandidateContract, ChainIdentity, contract_creations},
    provider::ChainProvider,
    time::sleep_while_running,
};

/// A delay that grows multiplicatively while nothing happens and shrinks by the same factor when something does,
/// always staying within `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollDelay {
    current: Duration,
    min: Duration,
    max: Duration,
    factor: f64,
}

impl PollDelay {
    pub fn new(initial: Duration, min: Duration, max: Duration, factor: f64) -> Self {
        let mut delay = PollDelay {
            current: initial,
            min,
            max,
            factor,
        };
        delay.current = delay.bound(initial.as_secs_f64());
        delay
    }

    pub fn from_config(config: &PollingConfig) -> Self {
        PollDelay::new(
            config.initial_poll_delay,
            config.min_poll_delay,
            config.max_poll_delay,
            config.growth_factor,
        )
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn grow(&mut self) {
        self.current = self.bound(self.current.as_secs_f64() * self.factor);
    }

    pub fn shrink(&mut self) {
        self.current = self.bound(self.current.as_secs_f64() / self.factor);
    }

    fn bound(&self, secs: f64) -> Duration {
        // Overflow and NaN both fall back to the upper bound.
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max)
            .max(self.min)
            .min(self.max)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollState {
    /// The lowest height not processed yet.
    pub next_height: u64,
    pub delay: PollDelay,
}

/// Walks a chain one block at a time, in strictly increasing height order, pacing itself to the chain's block time.
pub struct BlockPoller {
    chain: ChainIdentity,
    provider: Arc<dyn ChainProvider>,
    state: PollState,
    retries: u32,
    running: watch::Receiver<bool>,
}

impl BlockPoller {
    pub fn new(
        chain: ChainIdentity,
        provider: Arc<dyn ChainProvider>,
        start_height: u64,
        config: &PollingConfig,
        running: watch::Receiver<bool>,
    ) -> Self {
        BlockPoller {
            chain,
            provider,
            state: PollState {
                next_height: start_height,
                delay: PollDelay::from_config(config),
            },
            retries: config.bytecode_retries,
            running,
        }
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    /// Requests the block at `next_height` and updates the state accordingly. The height only advances once the block
    /// has been retrieved, and a provider error leaves the state untouched.
    pub async fn poll_next(&mut self) -> Result<Option<Block>> {
        let block = self.provider.block(self.state.next_height).await?;
        match block {
            Some(_) => {
                self.state.delay.shrink();
                self.state.next_height += 1;
            }
            None => self.state.delay.grow(),
        }
        Ok(block)
    }

    /// Polls until the monitor stops, passing every contract created in a retrieved block to `on_candidate`.
    pub async fn run<F>(mut self, mut on_candidate: F)
    where
        F: FnMut(CandidateContract) + Send,
    {
        let mut running = self.running.clone();
        while *running.borrow_and_update() {
            let height = self.state.next_height;
            match self.poll_next().await {
                Ok(Some(block)) => {
                    let candidates = contract_creations(&block, self.retries);
                    trace!(
                        chain = %self.chain,
                        height,
                        transactions = block.transactions.len(),
                        candidates = candidates.len(),
                        "block"
                    );
                    candidates.into_iter().for_each(&mut on_candidate);
                }
                Ok(None) => {
                    debug!(
                        chain = %self.chain,
                        height,
                        delay = ?self.state.delay.current(),
                        "block-wait"
                    );
                }
                Err(e) => {
                    error!(chain = %self.chain, height, "block-failed: {e}");
                }
            }
            if !sleep_while_running(&mut running, self.state.delay.current()).await {
                break;
            }
        }
        debug!(
            chain = %self.chain,
            next_height = self.state.next_height,
            "Poller stopped"
        );
    }
}
