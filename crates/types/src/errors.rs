use std::error::Error;

use derive_more::Display;

#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[display("invalid config: {_0}")]
    InvalidConfig(String),
    #[display("invalid signer: {_0}")]
    InvalidSigner(String),
    #[display("not found: {_0}")]
    NotFound(String),
    #[display("remote signer failed: {_0}")]
    RemoteFailed(String),
    #[display("backend failure: {_0}")]
    Backend(String),
    #[display("quorum unreachable: {_0}")]
    QuorumUnreachable(String),
}

impl Error for SignerError {}

impl From<serde_json::Error> for SignerError {
    fn from(e: serde_json::Error) -> Self {
        Self::RemoteFailed(e.to_string())
    }
}
