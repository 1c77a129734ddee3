pub mod cfg;
pub mod chain;
pub mod collaborator;
pub mod error;
pub mod injector;
pub mod logging;
pub mod metadata;
pub mod monitor;
pub mod poller;
pub mod provider;
pub mod resolver;
pub mod retriever;
pub mod supervisor;
pub mod test_util;
pub mod time;
