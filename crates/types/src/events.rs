use serde::{Deserialize, Serialize};

/// Lifecycle of one outbound NIP-46 connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Typed events flowing from the connection manager (and the tick source)
/// into the coordinator's single-writer event loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SignerEvent {
    RemoteSignature {
        session_id: String,
        signer: String,
        signature: String,
    },
    RemoteRejected {
        session_id: String,
        signer: String,
        reason: String,
    },
    RequestTimedOut {
        session_id: String,
        signer: String,
    },
    ConnectionStateChanged {
        signer: String,
        state: ConnectionState,
        error: Option<String>,
    },
    Tick,
}

/// Outcome of prompting the user for a local co-signer. `Deferred` means the
/// decision arrives later through `approve_local` / `reject_local`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptDecision {
    Approved,
    Rejected,
    Deferred,
}
