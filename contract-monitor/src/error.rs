/// Errors from the [crate::monitor::ChainMonitor] lifecycle.
#[derive(thiserror::Error, Debug)]
pub enum MonitorError {
    #[error("monitor for chain {0} is already running")]
    AlreadyRunning(String),
    /// Restarting a stopped monitor is not supported; construct a new one instead.
    #[error("monitor for chain {0} has been stopped")]
    Stopped(String),
    #[error("failed to resolve the starting height of chain {chain}: {source}")]
    StartHeight {
        chain: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Reasons a deployed bytecode does not yield a metadata pointer. These are per-contract and never fatal.
#[derive(thiserror::Error, Debug)]
pub enum MetadataError {
    #[error("bytecode is too short to carry metadata: {0} bytes")]
    TooShort(usize),
    #[error("metadata length {length} exceeds the {available} bytes preceding it")]
    LengthOutOfBounds { length: usize, available: usize },
    #[error("malformed metadata: {0}")]
    Decode(String),
    #[error("metadata contains no content hash")]
    NoContentHash,
    #[error("{key} hash has unexpected length {length}")]
    HashLength { key: &'static str, length: usize },
}
