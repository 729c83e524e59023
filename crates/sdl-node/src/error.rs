use std::io;
use thiserror::Error;

/// Errors raised by the node.
///
/// Usage errors (`AlreadyTransacting`, `NotInitialized`, ...) signal caller
/// bugs and are returned synchronously. Main chain failures never show up
/// here; they are values of [`sdl_mainchain::CommitOutcome`].
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("there is already a transaction pattern running")]
    AlreadyTransacting,

    #[error("node is not initialized")]
    NotInitialized,

    #[error("node is already initialized")]
    AlreadyInitialized,

    #[error("node has been stopped")]
    Stopped,

    #[error("no transaction pattern has been set")]
    NoPattern,

    #[error("cannot bind connection listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("cannot build http client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("registry update failed: {0}")]
    Registry(String),

    #[error("transaction sender is shut down")]
    SenderShutdown,

    #[error("interrupted while waiting: {0}")]
    Interrupted(&'static str),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error ({0}): {1}")]
    Io(&'static str, #[source] io::Error),
}
