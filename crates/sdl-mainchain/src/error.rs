use thiserror::Error;

/// Errors raised while constructing main chain requests or clients.
///
/// Outcomes of commit and query calls are never errors: they are reported
/// as [`crate::CommitOutcome`] values and booleans.
#[derive(Debug, Error)]
pub enum MainChainError {
    /// A commit payload must carry at least one byte.
    #[error("commit payload is empty")]
    EmptyPayload,

    /// Hex text could not be decoded into a hash.
    #[error("invalid hex hash {input:?}: {source}")]
    InvalidHex {
        input: String,
        #[source]
        source: hex::FromHexError,
    },

    /// The configured endpoint address does not form a valid URL.
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The HTTP client could not be built.
    #[error("http client setup failed: {0}")]
    ClientSetup(#[source] reqwest::Error),
}
