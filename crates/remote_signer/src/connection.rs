use std::time::Instant;

use types::events::ConnectionState;

/// The single in-flight signing request allowed on a connection.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub session_id: String,
    pub payload: String,
    pub deadline: Instant,
    pub attempts: u8,
}

/// Book-keeping for one remote co-signer connection. The protocol session
/// itself is held separately by the manager so the connection entry stays
/// plain data.
#[derive(Debug, Clone)]
pub struct RemoteConnection {
    pub identity: String,
    pub bunker_uri: String,
    pub relays: Vec<String>,
    pub state: ConnectionState,
    pub error_message: Option<String>,
    pub last_contact: Option<Instant>,
    pub pending: Option<PendingRequest>,
}

impl RemoteConnection {
    #[must_use]
    pub fn new(identity: String, bunker_uri: String, relays: Vec<String>) -> Self {
        Self {
            identity,
            bunker_uri,
            relays,
            state: ConnectionState::Disconnected,
            error_message: None,
            last_contact: None,
            pending: None,
        }
    }

    pub fn set_state(&mut self, state: ConnectionState, error: Option<String>) {
        self.state = state;
        self.error_message = error;
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_contact = Some(now);
    }

    #[must_use]
    pub fn take_pending(&mut self) -> Option<PendingRequest> {
        self.pending.take()
    }
}
