use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{info, warn};

use types::errors::SignerError;
use types::events::{ConnectionState, SignerEvent};

use crate::classify::{Classification, classify_response};
use crate::connection::{PendingRequest, RemoteConnection};
use crate::uri::parse_bunker_uri;
use crate::{ProtocolSession, ProtocolSessionFactory};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_REQUEST_ATTEMPTS: u8 = 3;

/// Owns every remote co-signer connection, keyed by npub. Raw protocol
/// callbacks come in through `handle_response` / `handle_protocol_*` and
/// leave as typed [`SignerEvent`]s on the broadcast channel the coordinator
/// polls.
pub struct ConnectionManager {
    connections: HashMap<String, RemoteConnection>,
    sessions: HashMap<String, Box<dyn ProtocolSession>>,
    factory: Arc<dyn ProtocolSessionFactory>,
    events: broadcast::Sender<SignerEvent>,
    request_timeout: Duration,
    max_request_attempts: u8,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(
        factory: Arc<dyn ProtocolSessionFactory>,
        events: broadcast::Sender<SignerEvent>,
    ) -> Self {
        Self {
            connections: HashMap::new(),
            sessions: HashMap::new(),
            factory,
            events,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_request_attempts: DEFAULT_MAX_REQUEST_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration, max_attempts: u8) -> Self {
        self.request_timeout = timeout;
        self.max_request_attempts = max_attempts;
        self
    }

    /// Parse the pairing URI and initiate a connection. A no-op when the
    /// identity is already `Connecting` or `Connected`; completion is
    /// reported asynchronously through `handle_protocol_ack` /
    /// `handle_protocol_error`.
    pub async fn connect(
        &mut self,
        bunker_uri: &str,
        local_identity: Option<&str>,
    ) -> Result<String, SignerError> {
        let parsed = parse_bunker_uri(bunker_uri)?;
        let identity = parsed.remote_identity.clone();

        if let Some(existing) = self.connections.get(&identity) {
            if matches!(
                existing.state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                return Ok(identity);
            }
        }

        // A session box left over from a failed attempt gets a clean
        // shutdown before the fresh one takes its slot.
        if let Some(mut stale) = self.sessions.remove(&identity) {
            stale.close().await;
        }

        let mut conn = RemoteConnection::new(
            identity.clone(),
            bunker_uri.to_string(),
            parsed.relays.clone(),
        );
        conn.set_state(ConnectionState::Connecting, None);
        self.connections.insert(identity.clone(), conn);
        self.emit_state(&identity, ConnectionState::Connecting, None);

        let mut session = match self.factory.open() {
            Ok(session) => session,
            Err(e) => {
                self.fail_connection(&identity, &format!("failed to open session: {e}"));
                return Err(SignerError::Backend(format!(
                    "failed to open protocol session for {identity}: {e}"
                )));
            }
        };

        if let Err(e) = session.connect(&parsed, local_identity).await {
            self.fail_connection(&identity, &format!("connection initiation failed: {e}"));
            return Err(SignerError::RemoteFailed(format!(
                "failed to initiate connection to {identity}: {e}"
            )));
        }

        self.sessions.insert(identity.clone(), session);
        info!(
            "Connecting to remote signer {} via {} relay(s)",
            identity,
            parsed.relays.len()
        );
        Ok(identity)
    }

    pub async fn disconnect(&mut self, identity: &str) {
        if let Some(mut session) = self.sessions.remove(identity) {
            session.close().await;
        }
        let Some(conn) = self.connections.get_mut(identity) else {
            return;
        };
        let orphaned = conn.take_pending();
        conn.set_state(ConnectionState::Disconnected, None);

        // A request still in flight on a torn-down connection can never
        // complete; surface that to the coordinator now.
        if let Some(pending) = orphaned {
            self.emit(SignerEvent::RemoteRejected {
                session_id: pending.session_id,
                signer: identity.to_string(),
                reason: "connection closed".to_string(),
            });
        }
        self.emit_state(identity, ConnectionState::Disconnected, None);
        info!("Disconnected from remote signer {}", identity);
    }

    /// Send one signing request over an established connection. At most one
    /// request may be in flight per connection.
    pub async fn request_signature(
        &mut self,
        identity: &str,
        session_id: &str,
        payload: &str,
    ) -> Result<(), SignerError> {
        let conn = self.connections.get_mut(identity).ok_or_else(|| {
            SignerError::NotFound(format!("no connection to signer {identity}"))
        })?;

        if conn.state != ConnectionState::Connected {
            return Err(SignerError::RemoteFailed(format!(
                "signer {identity} is not connected"
            )));
        }
        if let Some(pending) = &conn.pending {
            return Err(SignerError::RemoteFailed(format!(
                "signer {identity} already has a pending request for session {}",
                pending.session_id
            )));
        }

        let session = self.sessions.get_mut(identity).ok_or_else(|| {
            SignerError::Backend(format!("no protocol session for signer {identity}"))
        })?;

        session.send_sign_request(payload).await?;
        conn.pending = Some(PendingRequest {
            session_id: session_id.to_string(),
            payload: payload.to_string(),
            deadline: Instant::now() + self.request_timeout,
            attempts: 1,
        });
        info!(
            "Requested signature from {} for session {}",
            identity, session_id
        );
        Ok(())
    }

    /// `Disconnected` for unknown identities, never an error.
    #[must_use]
    pub fn get_state(&self, identity: &str) -> ConnectionState {
        self.connections
            .get(identity)
            .map_or(ConnectionState::Disconnected, |conn| conn.state)
    }

    /// Whether a signing request is currently in flight on this connection.
    #[must_use]
    pub fn has_pending(&self, identity: &str) -> bool {
        self.connections
            .get(identity)
            .is_some_and(|conn| conn.pending.is_some())
    }

    #[must_use]
    pub fn connected_identities(&self) -> Vec<String> {
        self.connections
            .values()
            .filter(|conn| conn.state == ConnectionState::Connected)
            .map(|conn| conn.identity.clone())
            .collect()
    }

    /// Protocol-level acknowledgment that the handshake completed.
    pub fn handle_protocol_ack(&mut self, identity: &str) {
        let Some(conn) = self.connections.get_mut(identity) else {
            warn!("Protocol ack for unknown signer {}", identity);
            return;
        };
        conn.set_state(ConnectionState::Connected, None);
        conn.touch(Instant::now());
        info!("Remote signer {} connected", identity);
        self.emit_state(identity, ConnectionState::Connected, None);
    }

    /// Protocol-level failure at any point in the connection's life.
    pub fn handle_protocol_error(&mut self, identity: &str, message: &str) {
        let Some(conn) = self.connections.get_mut(identity) else {
            warn!("Protocol error for unknown signer {}: {}", identity, message);
            return;
        };
        conn.set_state(ConnectionState::Error, Some(message.to_string()));
        let pending = conn.take_pending();
        warn!("Remote signer {} errored: {}", identity, message);
        self.emit_state(identity, ConnectionState::Error, Some(message.to_string()));
        if let Some(pending) = pending {
            self.emit(SignerEvent::RemoteRejected {
                session_id: pending.session_id,
                signer: identity.to_string(),
                reason: format!("connection error: {message}"),
            });
        }
    }

    /// Classify a raw protocol response for the pending request on this
    /// connection and route it to the coordinator as a typed event.
    pub fn handle_response(&mut self, identity: &str, raw: &str) {
        let Some(conn) = self.connections.get_mut(identity) else {
            warn!("Response from unknown signer {}", identity);
            return;
        };
        let Some(pending) = conn.pending.as_ref() else {
            warn!("Response from {} with no pending request", identity);
            return;
        };
        let session_id = pending.session_id.clone();

        match classify_response(raw) {
            Classification::Signature(signature) => {
                conn.pending = None;
                conn.touch(Instant::now());
                conn.set_state(ConnectionState::Connected, None);
                info!(
                    "Received signature from {} for session {}",
                    identity, session_id
                );
                self.emit(SignerEvent::RemoteSignature {
                    session_id,
                    signer: identity.to_string(),
                    signature,
                });
            }
            Classification::Rejection(reason) => {
                conn.pending = None;
                conn.touch(Instant::now());
                warn!(
                    "Signer {} rejected session {}: {}",
                    identity, session_id, reason
                );
                self.emit(SignerEvent::RemoteRejected {
                    session_id,
                    signer: identity.to_string(),
                    reason,
                });
            }
            Classification::Unrecognized => {
                // Leave the pending request armed; the deadline will fire
                // if nothing usable ever arrives.
                warn!(
                    "Unrecognized response from {} for session {}",
                    identity, session_id
                );
            }
        }
    }

    /// Retry or expire pending requests whose deadline has passed. Driven by
    /// the coordinator on every tick.
    pub async fn check_deadlines(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .connections
            .values()
            .filter(|conn| {
                conn.pending
                    .as_ref()
                    .is_some_and(|pending| pending.deadline <= now)
            })
            .map(|conn| conn.identity.clone())
            .collect();

        for identity in expired {
            let Some(conn) = self.connections.get_mut(&identity) else {
                continue;
            };
            let Some(pending) = conn.pending.as_mut() else {
                continue;
            };

            if pending.attempts < self.max_request_attempts {
                pending.attempts += 1;
                pending.deadline = now + self.request_timeout;
                let payload = pending.payload.clone();
                let session_id = pending.session_id.clone();
                let attempt = pending.attempts;

                if let Some(session) = self.sessions.get_mut(&identity) {
                    match session.send_sign_request(&payload).await {
                        Ok(()) => {
                            info!(
                                "Re-sent signing request to {} for session {} (attempt {})",
                                identity, session_id, attempt
                            );
                            continue;
                        }
                        Err(e) => {
                            warn!("Retry to {} failed: {}", identity, e);
                        }
                    }
                }
            }

            // Out of attempts, or the re-send itself failed.
            let Some(conn) = self.connections.get_mut(&identity) else {
                continue;
            };
            if let Some(pending) = conn.take_pending() {
                warn!(
                    "Signing request to {} for session {} timed out",
                    identity, pending.session_id
                );
                self.emit(SignerEvent::RequestTimedOut {
                    session_id: pending.session_id,
                    signer: identity.clone(),
                });
            }
        }
    }

    fn fail_connection(&mut self, identity: &str, message: &str) {
        if let Some(conn) = self.connections.get_mut(identity) {
            conn.set_state(ConnectionState::Error, Some(message.to_string()));
        }
        self.emit_state(identity, ConnectionState::Error, Some(message.to_string()));
    }

    fn emit_state(&self, identity: &str, state: ConnectionState, error: Option<String>) {
        self.emit(SignerEvent::ConnectionStateChanged {
            signer: identity.to_string(),
            state,
            error,
        });
    }

    fn emit(&self, event: SignerEvent) {
        if self.events.send(event).is_err() {
            warn!("No receivers alive for signer events");
        }
    }
}
