use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use remote_signer::ConnectionManager;
use types::errors::SignerError;
use types::events::{ConnectionState, PromptDecision, SignerEvent};
use types::wallet::{CosignerKind, CosignerStatus};

use crate::session::{SessionState, SigningSession};
use crate::traits::{
    LocalSigner, SessionObserver, SessionOutcome, SignatureAggregator, SigningPrompt, WalletStore,
};

/// Sessions that have not finished after this long fail with a timeout.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(300);

/// Owns the active signing sessions and drives them to completion. One
/// instance per application root; all mutation goes through these methods,
/// so the owner (usually the task running [`Self::run`]) is the single
/// writer for the session map.
pub struct SigningCoordinator {
    sessions: HashMap<String, SigningSession>,
    pub manager: ConnectionManager,
    events: broadcast::Receiver<SignerEvent>,
    wallets: Arc<dyn WalletStore>,
    local_signer: Arc<dyn LocalSigner>,
    aggregator: Arc<dyn SignatureAggregator>,
    prompt: Arc<dyn SigningPrompt>,
    observer: Arc<dyn SessionObserver>,
    session_timeout: Duration,
}

impl SigningCoordinator {
    #[must_use]
    pub fn new(
        manager: ConnectionManager,
        events: broadcast::Receiver<SignerEvent>,
        wallets: Arc<dyn WalletStore>,
        local_signer: Arc<dyn LocalSigner>,
        aggregator: Arc<dyn SignatureAggregator>,
        prompt: Arc<dyn SigningPrompt>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            manager,
            events,
            wallets,
            local_signer,
            aggregator,
            prompt,
            observer,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Start collecting signatures for `payload` against the given wallet.
    /// Only conditions that prevent the session from starting at all are
    /// returned as errors; everything after that surfaces through the
    /// observer.
    pub async fn start_signing(
        &mut self,
        wallet_id: &str,
        payload: &str,
        auto_sign_local: bool,
    ) -> Result<String, SignerError> {
        let wallet = self.wallets.get(wallet_id)?;
        wallet.validate()?;

        let session_id = Uuid::new_v4().to_string();
        let mut session = SigningSession::new(session_id.clone(), &wallet, payload);
        info!(
            "🚀 Started signing session {} for wallet {} ({}-of-{})",
            session_id,
            wallet_id,
            wallet.threshold_m,
            wallet.n()
        );

        for cs in &wallet.cosigners {
            match cs.kind {
                CosignerKind::Local => {
                    if auto_sign_local {
                        self.sign_with_local_key(&mut session, &cs.identity);
                    } else {
                        match self.prompt.prompt(&session_id, payload, &cs.identity) {
                            PromptDecision::Approved => {
                                self.sign_with_local_key(&mut session, &cs.identity);
                            }
                            PromptDecision::Rejected => {
                                info!("Local signer {} rejected at prompt", cs.identity);
                                session.record_status(&cs.identity, CosignerStatus::Rejected);
                            }
                            PromptDecision::Deferred => {
                                session.record_status(&cs.identity, CosignerStatus::Requested);
                                session.awaiting_prompt.insert(cs.identity.clone());
                            }
                        }
                    }
                }
                CosignerKind::Remote => {
                    // validate() guarantees a pairing URI on remote signers.
                    let Some(uri) = cs.bunker_uri.as_deref() else {
                        session.record_status(&cs.identity, CosignerStatus::Error);
                        continue;
                    };
                    if self.manager.get_state(&cs.identity) == ConnectionState::Connected {
                        if self.manager.has_pending(&cs.identity) {
                            // Busy serving another session; the tick sweep
                            // re-issues the request once the slot frees.
                            info!(
                                "Signer {} busy, leaving it pending in session {}",
                                cs.identity, session_id
                            );
                        } else {
                            match self
                                .manager
                                .request_signature(&cs.identity, &session_id, payload)
                                .await
                            {
                                Ok(()) => {
                                    session.record_status(&cs.identity, CosignerStatus::Requested);
                                }
                                Err(e) => {
                                    error!(
                                        "❌ Failed to request signature from {}: {e}",
                                        cs.identity
                                    );
                                    session.record_status(&cs.identity, CosignerStatus::Error);
                                }
                            }
                        }
                    } else if let Err(e) = self.manager.connect(uri, None).await {
                        error!("❌ Failed to connect to remote signer {}: {e}", cs.identity);
                        session.record_status(&cs.identity, CosignerStatus::Error);
                    }
                    // Still `Pending` after a connect initiation: the request
                    // goes out once the connection reports Connected.
                }
            }
        }

        self.settle(session);
        Ok(session_id)
    }

    /// Resolve a deferred (or re-raised) prompt by signing locally. Unknown
    /// session/signer pairs are logged no-ops.
    pub fn approve_local(&mut self, session_id: &str, signer: &str) {
        let Some(mut session) = self.sessions.remove(session_id) else {
            warn!("Local approval for unknown session {}", session_id);
            return;
        };
        if session.statuses.get(signer).is_some_and(|s| s.can_sign()) {
            session.awaiting_prompt.remove(signer);
            self.sign_with_local_key(&mut session, signer);
        } else {
            warn!(
                "Local approval for {} in session {} is not applicable",
                signer, session_id
            );
        }
        self.settle(session);
    }

    pub fn reject_local(&mut self, session_id: &str, signer: &str) {
        let Some(mut session) = self.sessions.remove(session_id) else {
            warn!("Local rejection for unknown session {}", session_id);
            return;
        };
        session.awaiting_prompt.remove(signer);
        if session.record_status(signer, CosignerStatus::Rejected) {
            info!("Local signer {} rejected session {}", signer, session_id);
        }
        self.settle(session);
    }

    /// Accept a signature collected from a remote co-signer. Duplicate or
    /// late deliveries are no-ops.
    pub fn receive_remote_signature(&mut self, session_id: &str, signer: &str, signature: String) {
        let Some(mut session) = self.sessions.remove(session_id) else {
            info!(
                "Discarding late signature from {} for session {}",
                signer, session_id
            );
            return;
        };
        if !self.note_signature(&mut session, signer, signature) {
            info!(
                "Ignoring duplicate signature from {} for session {}",
                signer, session_id
            );
        }
        self.settle(session);
    }

    pub fn remote_rejected(&mut self, session_id: &str, signer: &str, reason: &str) {
        let Some(mut session) = self.sessions.remove(session_id) else {
            info!("Discarding late rejection for session {}", session_id);
            return;
        };
        if session.record_status(signer, CosignerStatus::Rejected) {
            warn!(
                "Remote signer {} rejected session {}: {}",
                signer, session_id, reason
            );
        }
        self.settle(session);
    }

    pub fn record_timeout(&mut self, session_id: &str, signer: &str) {
        let Some(mut session) = self.sessions.remove(session_id) else {
            return;
        };
        if session.record_status(signer, CosignerStatus::Timeout) {
            warn!("Signer {} timed out in session {}", signer, session_id);
        }
        self.settle(session);
    }

    /// Cancel in any non-terminal state. The completion notification fires
    /// exactly once; late responses for the canceled session are discarded.
    pub fn cancel_session(&mut self, session_id: &str) {
        let Some(mut session) = self.sessions.remove(session_id) else {
            warn!("Cancel for unknown session {}", session_id);
            return;
        };
        session.state = SessionState::Canceled;
        info!("Canceled session {}", session_id);
        self.finish(&session, &SessionOutcome::failure("canceled".to_string()));
    }

    pub fn get_session_progress(&self, session_id: &str) -> Result<(u16, u16), SignerError> {
        self.sessions.get(session_id).map_or_else(
            || Err(SignerError::NotFound(format!("session {session_id}"))),
            |session| Ok((session.collected, session.threshold_m)),
        )
    }

    #[must_use]
    pub fn active_session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Read-only view of an active session.
    #[must_use]
    pub fn session(&self, session_id: &str) -> Option<&SigningSession> {
        self.sessions.get(session_id)
    }

    /// Route one typed event into the session it belongs to.
    pub async fn handle(&mut self, event: SignerEvent) {
        match event {
            SignerEvent::RemoteSignature {
                session_id,
                signer,
                signature,
            } => self.receive_remote_signature(&session_id, &signer, signature),
            SignerEvent::RemoteRejected {
                session_id,
                signer,
                reason,
            } => self.remote_rejected(&session_id, &signer, &reason),
            SignerEvent::RequestTimedOut { session_id, signer } => {
                self.record_timeout(&session_id, &signer);
            }
            SignerEvent::ConnectionStateChanged { signer, state, .. } => {
                if state == ConnectionState::Connected {
                    self.retry_pending_for(&signer).await;
                }
            }
            SignerEvent::Tick => {
                self.manager.check_deadlines(Instant::now()).await;
                self.expire_sessions();
                self.retry_pending().await;
            }
        }
    }

    /// Non-blocking variant of [`Self::poll`]; returns whether an event was
    /// consumed.
    pub async fn try_poll(&mut self) -> Result<bool, SignerError> {
        match self.events.try_recv() {
            Ok(event) => {
                self.handle(event).await;
                Ok(true)
            }
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                warn!("Signer event stream lagged by {} events", n);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    pub async fn poll(&mut self) -> Result<(), SignerError> {
        loop {
            match self.events.recv().await {
                Ok(event) => {
                    self.handle(event).await;
                    return Ok(());
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Signer event stream lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(SignerError::Backend(
                        "signer event stream closed".to_string(),
                    ));
                }
            }
        }
    }

    pub async fn run(&mut self) -> Result<(), SignerError> {
        loop {
            self.poll().await?;
        }
    }

    fn sign_with_local_key(&self, session: &mut SigningSession, signer: &str) {
        match self.local_signer.sign(signer, &session.payload) {
            Ok(signature) => {
                info!(
                    "Local signer {} signed session {}",
                    signer, session.session_id
                );
                self.note_signature(session, signer, signature);
            }
            Err(e) => {
                error!("❌ Local signing failed for {}: {e}", signer);
                session.record_status(signer, CosignerStatus::Error);
            }
        }
    }

    fn note_signature(&self, session: &mut SigningSession, signer: &str, signature: String) -> bool {
        if !session.record_signature(signer, signature) {
            return false;
        }
        info!(
            "Session {} collected {}/{} signatures",
            session.session_id, session.collected, session.threshold_m
        );
        self.observer.on_progress(
            &session.session_id,
            session.collected,
            session.threshold_m,
            signer,
        );
        true
    }

    /// Decide what happens to a session after a mutation: completion once
    /// the quorum is met, early failure once it is unreachable, otherwise
    /// back into the map.
    fn settle(&mut self, mut session: SigningSession) {
        debug_assert!(session.collected_matches_statuses());

        if session.state == SessionState::Collecting {
            if session.quorum_met() {
                session.state = SessionState::Aggregating;
                match self.aggregator.aggregate(
                    &session.session_id,
                    &session.wallet_id,
                    &session.partial_sigs,
                ) {
                    Ok(aggregated) => {
                        session.state = SessionState::Complete;
                        info!("Session {} complete", session.session_id);
                        self.finish(&session, &SessionOutcome::success(aggregated));
                    }
                    Err(e) => {
                        session.state = SessionState::Failed;
                        error!(
                            "❌ Aggregation failed for session {}: {e}",
                            session.session_id
                        );
                        self.finish(
                            &session,
                            &SessionOutcome::failure(format!("aggregation failed: {e}")),
                        );
                    }
                }
                return;
            }
            if session.quorum_unreachable() {
                session.state = SessionState::Failed;
                warn!(
                    "Session {} failed: {} of {} co-signers lost, quorum unreachable",
                    session.session_id,
                    session.unreachable_count(),
                    session.total_n
                );
                self.finish(
                    &session,
                    &SessionOutcome::failure("quorum unreachable".to_string()),
                );
                return;
            }
        }

        self.sessions.insert(session.session_id.clone(), session);
    }

    /// Final notification. The session is already out of the map, so this
    /// runs at most once per session no matter which path led here.
    fn finish(&self, session: &SigningSession, outcome: &SessionOutcome) {
        self.observer.on_complete(&session.session_id, outcome);
    }

    fn expire_sessions(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .sessions
            .values()
            .filter(|s| now.duration_since(s.started_at) >= self.session_timeout)
            .map(|s| s.session_id.clone())
            .collect();

        for session_id in expired {
            let Some(mut session) = self.sessions.remove(&session_id) else {
                continue;
            };
            for status in session.statuses.values_mut() {
                if status.can_sign() {
                    *status = CosignerStatus::Timeout;
                }
            }
            session.state = SessionState::Failed;
            warn!("Session {} timed out", session_id);
            self.finish(
                &session,
                &SessionOutcome::failure("signing session timed out".to_string()),
            );
        }
    }

    /// Opportunistic retry: co-signers left `Pending` because their
    /// connection was not up get a request as soon as it is.
    async fn retry_pending_for(&mut self, signer: &str) {
        let targets: Vec<(String, String)> = self
            .sessions
            .values()
            .filter(|s| {
                s.state == SessionState::Collecting
                    && s.statuses.get(signer) == Some(&CosignerStatus::Pending)
            })
            .map(|s| (s.session_id.clone(), s.payload.clone()))
            .collect();

        for (session_id, payload) in targets {
            match self
                .manager
                .request_signature(signer, &session_id, &payload)
                .await
            {
                Ok(()) => {
                    if let Some(session) = self.sessions.get_mut(&session_id) {
                        session.record_status(signer, CosignerStatus::Requested);
                    }
                }
                // Usually the at-most-one-in-flight guard; try again on the
                // next tick.
                Err(e) => {
                    info!(
                        "Deferred signature request to {} for session {}: {e}",
                        signer, session_id
                    );
                }
            }
        }
    }

    async fn retry_pending(&mut self) {
        for identity in self.manager.connected_identities() {
            self.retry_pending_for(&identity).await;
        }
    }
}
