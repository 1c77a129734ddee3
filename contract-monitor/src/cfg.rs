use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::PathBuf,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Individual configuration for every chain to monitor.
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    /// Tunables shared by every chain's poll loop and bytecode retrieval.
    #[serde(default)]
    pub polling: PollingConfig,
    /// Base URL of the IPFS gateway metadata and sources are fetched from. Defaults to "https://ipfs.io/ipfs/".
    #[serde(default = "ipfs_gateway_default")]
    pub ipfs_gateway: String,
    /// Endpoint that reconstructed contracts are POSTed to. If not set, contracts are only logged.
    #[serde(default)]
    pub verifier_url: Option<String>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            return Err(anyhow!("At least one chain must be configured"));
        }
        let mut chain_ids = HashSet::new();
        for chain in &self.chains {
            if chain.rpc.is_empty() {
                return Err(anyhow!("chain {} has no RPC endpoints", chain.name));
            }
            if !chain_ids.insert(chain.chain_id) {
                return Err(anyhow!(
                    "chain id {} is configured more than once",
                    chain.chain_id
                ));
            }
        }
        self.polling.validate()
    }
}

/// Reads every file in `paths`, merges them and validates the result. Each top-level key may only be set by one file.
pub fn read_config(paths: &[PathBuf]) -> Result<Config> {
    let files = paths
        .iter()
        .map(|path| {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let table: toml::Table = toml::from_str(&contents)
                .with_context(|| format!("{} is not valid TOML", path.display()))?;
            Ok((path.display().to_string(), table))
        })
        .collect::<Result<Vec<_>>>()?;

    let config = Config::deserialize(merge_tables(files)?)?;
    config.validate()?;
    Ok(config)
}

fn merge_tables(files: Vec<(String, toml::Table)>) -> Result<toml::Table> {
    let mut merged = toml::Table::new();
    let mut origins = BTreeMap::new();
    for (file, table) in files {
        for (key, value) in table {
            if let Some(first) = origins.get(&key) {
                return Err(anyhow!(
                    "configuration conflict: {key:?} is set in both {first} and {file}"
                ));
            }
            origins.insert(key.clone(), file.clone());
            merged.insert(key, value);
        }
    }
    Ok(merged)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    /// Human readable name, used in logs.
    pub name: String,
    /// EIP-155 chain identifier. Endpoints reporting a different id are rejected.
    pub chain_id: u64,
    /// RPC endpoints, tried in order until one connects. `{NAME}` placeholders are substituted from the environment.
    pub rpc: Vec<String>,
    /// Height to start monitoring from. If not set, monitoring starts at the chain head.
    #[serde(default)]
    pub start_block: Option<u64>,
}

impl ChainConfig {
    /// The configured endpoints with credential placeholders filled in from the process environment.
    pub fn rpc_urls(&self) -> Result<Vec<String>> {
        self.rpc
            .iter()
            .map(|url| substitute_placeholders(url, |name| std::env::var(name).ok()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollingConfig {
    /// The poll delay is multiplied by this after a missed block and divided by it after a found one.
    #[serde(default = "growth_factor_default")]
    pub growth_factor: f64,
    /// Lower bound of the poll delay. Defaults to 500 milliseconds.
    #[serde(default = "min_poll_delay_default")]
    pub min_poll_delay: Duration,
    /// Upper bound of the poll delay. Defaults to 30 seconds.
    #[serde(default = "max_poll_delay_default")]
    pub max_poll_delay: Duration,
    /// Poll delay a freshly started monitor begins with. Clamped to the bounds above. Defaults to 5 seconds.
    #[serde(default = "initial_poll_delay_default")]
    pub initial_poll_delay: Duration,
    /// Pause between attempts to fetch the code of a newly created contract.
    #[serde(default = "bytecode_retry_pause_default")]
    pub bytecode_retry_pause: Duration,
    /// Number of attempts made to fetch the code of a newly created contract.
    #[serde(default = "bytecode_retries_default")]
    pub bytecode_retries: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        PollingConfig {
            growth_factor: growth_factor_default(),
            min_poll_delay: min_poll_delay_default(),
            max_poll_delay: max_poll_delay_default(),
            initial_poll_delay: initial_poll_delay_default(),
            bytecode_retry_pause: bytecode_retry_pause_default(),
            bytecode_retries: bytecode_retries_default(),
        }
    }
}

impl PollingConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.growth_factor.is_finite() || self.growth_factor <= 1.0 {
            return Err(anyhow!(
                "growth_factor must be a finite number greater than 1, got {}",
                self.growth_factor
            ));
        }
        if self.min_poll_delay > self.max_poll_delay {
            return Err(anyhow!(
                "min_poll_delay ({:?}) must not exceed max_poll_delay ({:?})",
                self.min_poll_delay,
                self.max_poll_delay
            ));
        }
        Ok(())
    }
}

pub fn ipfs_gateway_default() -> String {
    String::from("https://ipfs.io/ipfs/")
}

pub fn growth_factor_default() -> f64 {
    1.1
}

pub fn min_poll_delay_default() -> Duration {
    Duration::from_millis(500)
}

pub fn max_poll_delay_default() -> Duration {
    Duration::from_secs(30)
}

pub fn initial_poll_delay_default() -> Duration {
    Duration::from_secs(5)
}

pub fn bytecode_retry_pause_default() -> Duration {
    Duration::from_secs(5)
}

pub fn bytecode_retries_default() -> u32 {
    3
}

/// Replaces every `{NAME}` in `template` with `lookup(NAME)`. Unknown or unterminated placeholders are errors, so a
/// missing credential never reaches a provider as a literal.
pub fn substitute_placeholders(
    template: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        output.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| anyhow!("unterminated placeholder in {template:?}"))?;
        let name = &after[..end];
        let value = lookup(name)
            .ok_or_else(|| anyhow!("no value for placeholder {{{name}}} in {template:?}"))?;
        output.push_str(&value);
        rest = &after[end + 1..];
    }
    output.push_str(rest);
    Ok(output)
}
