pub mod classify;
pub mod connection;
pub mod manager;
pub mod uri;

pub use connection::{PendingRequest, RemoteConnection};
pub use manager::ConnectionManager;
pub use uri::{BunkerUri, encode_npub, parse_bunker_uri};

use types::errors::SignerError;

/// One paired NIP-46 protocol session. The wire framing, encryption and relay
/// plumbing live behind this seam; both methods only initiate work and return
/// once the request is on its way. Responses come back through
/// [`ConnectionManager::handle_response`] and the protocol ack/error hooks.
#[async_trait::async_trait]
pub trait ProtocolSession: Send {
    async fn connect(
        &mut self,
        uri: &BunkerUri,
        local_identity: Option<&str>,
    ) -> Result<(), SignerError>;

    async fn send_sign_request(&mut self, payload: &str) -> Result<(), SignerError>;

    async fn close(&mut self);
}

pub trait ProtocolSessionFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn ProtocolSession>, SignerError>;
}
